use crate::message::ProgressEvent;
use crate::store::{SessionId, SessionStore};
use async_stream::stream;
use futures::Stream;
use log::*;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Tail a session: poll it every `poll_interval` and yield only events not yielded before.
///
/// The stream ends when the session is no longer in the store, or when `cancel`
/// is set to `true` (or its sender is dropped).
pub fn tail(
    store: Arc<SessionStore>,
    session_id: SessionId,
    poll_interval: Duration,
    mut cancel: watch::Receiver<bool>,
) -> impl Stream<Item = ProgressEvent> {
    stream! {
        let mut sent = 0usize;
        let mut ticker = tokio::time::interval(poll_interval);

        loop {
            if *cancel.borrow() {
                break;
            }
            tokio::select! {
                _ = ticker.tick() => {}
                changed = cancel.changed() => {
                    if changed.is_err() || *cancel.borrow() {
                        break;
                    }
                }
            }

            match store.events_since(&session_id, sent) {
                Some(events) => {
                    sent += events.len();
                    for event in events {
                        yield event;
                    }
                }
                None => break,
            }
        }

        debug!("Progress tail for session {} closed after {} event(s)", session_id.as_str(), sent);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{EventStatus, Stage};
    use futures::StreamExt;

    fn event(key: &str) -> ProgressEvent {
        ProgressEvent::new(key, Stage::Transcription, EventStatus::Completed, 100)
    }

    #[tokio::test]
    async fn test_tail_yields_each_event_once_and_ends_with_session() {
        let store = Arc::new(SessionStore::new(Duration::ZERO));
        let session = store.create_session();
        store.append(&session, event("a"));

        let (_cancel_tx, cancel_rx) = watch::channel(false);
        let mut events = Box::pin(tail(
            Arc::clone(&store),
            session.clone(),
            Duration::from_millis(5),
            cancel_rx,
        ));

        assert_eq!(events.next().await.unwrap().key, "a");
        store.append(&session, event("b"));
        assert_eq!(events.next().await.unwrap().key, "b");

        store.finish(&session);
        store.sweep();
        assert!(events.next().await.is_none());
    }

    #[tokio::test]
    async fn test_tail_stops_on_cancel() {
        let store = Arc::new(SessionStore::new(Duration::from_secs(60)));
        let session = store.create_session();

        let (cancel_tx, cancel_rx) = watch::channel(false);
        let mut events = Box::pin(tail(
            Arc::clone(&store),
            session,
            Duration::from_millis(5),
            cancel_rx,
        ));

        cancel_tx.send(true).unwrap();
        assert!(events.next().await.is_none());
    }
}

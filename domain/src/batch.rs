//! Bounded-concurrency helpers shared by the download and transcription stages.

use futures::future::join_all;
use log::*;
use std::future::Future;
use std::time::Duration;

/// Run `f` over `items` in sequential chunks of `chunk_size`.
///
/// Items inside a chunk run concurrently; the next chunk does not start until
/// every item of the current one has settled. `pause` is slept between chunks
/// (never after the last). Results are returned in input order.
pub async fn for_each_chunk<T, R, F, Fut>(
    items: Vec<T>,
    chunk_size: usize,
    pause: Duration,
    f: F,
) -> Vec<R>
where
    F: Fn(T) -> Fut,
    Fut: Future<Output = R>,
{
    let chunk_size = chunk_size.max(1);
    let total = items.len();
    let mut results = Vec::with_capacity(total);
    let mut remaining = items.into_iter().peekable();
    let mut chunk_index = 0usize;

    while remaining.peek().is_some() {
        let chunk: Vec<T> = remaining.by_ref().take(chunk_size).collect();
        chunk_index += 1;
        debug!("Starting chunk {chunk_index} ({} item(s) of {total})", chunk.len());

        results.extend(join_all(chunk.into_iter().map(&f)).await);

        if remaining.peek().is_some() && !pause.is_zero() {
            tokio::time::sleep(pause).await;
        }
    }

    results
}

//! Session-scoped progress tracking for batch pipeline runs.
//!
//! # Architecture
//!
//! - **One session per batch invocation**: a stage opens a session, appends
//!   granular [`ProgressEvent`]s while it runs, and marks the session finished
//!   when it returns.
//! - **Append-only log per session**: events are stored in arrival order in a
//!   `DashMap` keyed by [`SessionId`]; concurrent workers append under the
//!   entry's shard lock so no write is lost.
//! - **TTL eviction by a single sweeper task**: finishing a session stamps an
//!   expiry; one background task spawned by [`SessionStore::spawn_sweeper`]
//!   removes expired sessions.
//! - **Tailing**: [`stream::tail`] polls a session and yields only the events
//!   it has not yielded before, ending when the session is evicted or the
//!   caller cancels.
//!
//! # Example
//!
//! ```rust,ignore
//! let store = Arc::new(SessionStore::new(Duration::from_secs(60)));
//! let _sweeper = store.spawn_sweeper(Duration::from_secs(10));
//!
//! let session = store.create_session();
//! store.append(&session, ProgressEvent::new("call-1", Stage::Download, EventStatus::Completed, 100));
//! store.finish(&session);
//! ```

pub mod message;
pub mod store;
pub mod stream;

pub use message::{EventStatus, EventType, ProgressEvent, Stage};
pub use store::{SessionId, SessionStore};

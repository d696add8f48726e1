//! Batch orchestration for the call pipeline.
//!
//! Three stages, each usable on its own:
//! - [`fetcher`] walks a date range of the telephony call log and produces
//!   deduplicated [`call::CallRecord`]s
//! - [`download`] filters those calls and downloads their recordings in
//!   rate-limited chunks
//! - [`transcription`] uploads local recordings to the transcription provider,
//!   polls the jobs and writes speaker-labelled transcripts
//!
//! [`pipeline`] wires the stages to a progress session store.

pub mod batch;
pub mod call;
pub mod download;
pub mod error;
pub mod fetcher;
pub mod gateway;
pub mod pipeline;
pub mod transcription;

pub use call::CallRecord;
pub use error::Error;

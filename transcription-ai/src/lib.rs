//! Speech-to-text provider abstraction for the call pipeline.
//!
//! The batcher in `domain` only talks to the [`traits::transcription::Provider`]
//! trait: upload raw audio, submit a speaker-labelled job, poll it. Concrete
//! providers (AssemblyAI today) live in `domain::gateway` and map their native
//! payloads and errors onto the types here.

pub mod error;
pub mod traits;
pub mod types;

// Re-export commonly used types
pub use error::Error;
pub use traits::transcription::Provider;
pub use types::transcription::{Config, Status, Transcription, Utterance};

#[cfg(feature = "mock")]
pub use traits::transcription::MockProvider;

//! Transcription provider trait.

use crate::types::transcription::{Config, Transcription};
use crate::Error;
use async_trait::async_trait;

/// Abstraction for upload-then-poll speech-to-text services.
///
/// A job goes through three calls: `upload_audio` hands the provider the raw
/// bytes and returns an opaque handle, `create_transcription` submits a job for
/// that handle, and `get_transcription` is polled until the status is terminal.
#[cfg_attr(feature = "mock", mockall::automock)]
#[async_trait]
pub trait Provider: Send + Sync {
    /// Upload raw audio bytes; returns the provider's handle (URL) for the upload.
    async fn upload_audio(&self, audio: Vec<u8>) -> std::result::Result<String, Error>;

    /// Start an async transcription job. Returns immediately with the job ID.
    async fn create_transcription(
        &self,
        config: Config,
    ) -> std::result::Result<Transcription, Error>;

    /// Retrieve transcription status and results by ID.
    ///
    /// Utterances and text populate only once the status is `Completed`.
    async fn get_transcription(
        &self,
        transcription_id: &str,
    ) -> std::result::Result<Transcription, Error>;

    /// Return unique identifier for this provider (e.g., "assemblyai").
    fn provider_id(&self) -> &str;
}

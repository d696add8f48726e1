//! Types for transcription operations.

use serde::{Deserialize, Serialize};

/// Processing status of a speech-to-text transcription job.
///
/// Jobs progress Queued → Processing → Completed (or Error).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Queued,
    Processing,
    Completed,
    Error,
}

impl Status {
    /// True once the provider will not change the job any further.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Status::Completed | Status::Error)
    }
}

/// Continuous speech segment (utterance) from a single speaker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Utterance {
    pub text: String,
    pub speaker: String,
    pub start_ms: i64,
    pub end_ms: i64,
    pub confidence: f64,
}

/// A transcription job as last reported by the provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transcription {
    pub id: String,
    pub status: Status,
    pub text: Option<String>,
    pub utterances: Vec<Utterance>,
    pub confidence: Option<f64>,
    pub duration_seconds: Option<f64>,
    pub error_message: Option<String>,
}

impl Transcription {
    /// A freshly submitted job with no results yet.
    pub fn queued(id: &str) -> Self {
        Self {
            id: id.to_string(),
            status: Status::Queued,
            text: None,
            utterances: Vec::new(),
            confidence: None,
            duration_seconds: None,
            error_message: None,
        }
    }
}

/// Configuration for creating a transcription job.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Handle returned by `Provider::upload_audio`.
    pub audio_url: String,
    pub speech_model: String,
    pub enable_speaker_labels: bool,
    pub language_code: String,
}

impl Config {
    /// Speaker-labelled job for an uploaded file.
    pub fn speaker_labeled(audio_url: &str, speech_model: &str, language_code: &str) -> Self {
        Self {
            audio_url: audio_url.to_string(),
            speech_model: speech_model.to_string(),
            enable_speaker_labels: true,
            language_code: language_code.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_parses_lowercase() {
        let status: Status = serde_json::from_str("\"processing\"").unwrap();
        assert_eq!(status, Status::Processing);
        assert!(!status.is_terminal());
        assert!(Status::Error.is_terminal());
        assert!(Status::Completed.is_terminal());
    }

    #[test]
    fn test_speaker_labeled_config() {
        let config = Config::speaker_labeled("https://cdn/upload/1", "best", "en");
        assert!(config.enable_speaker_labels);
        assert_eq!(config.speech_model, "best");
        assert_eq!(config.language_code, "en");
    }
}

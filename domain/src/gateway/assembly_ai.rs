//! AssemblyAI API client for transcription services.
//!
//! Implements [`transcription_ai::Provider`] on top of the v2 REST API:
//! `POST /upload`, `POST /transcript` and `GET /transcript/{id}`.

use crate::error::{internal_error, Error, InternalErrorKind};
use async_trait::async_trait;
use log::*;
use serde::{Deserialize, Serialize};
use service::config::Config;
use transcription_ai::{
    Config as TranscriptionConfig, Error as ProviderError, Provider, Status, Transcription,
    Utterance,
};

/// Request to create a new transcription
#[derive(Debug, Serialize)]
pub struct CreateTranscriptRequest {
    pub audio_url: String,
    pub speech_model: String,
    pub speaker_labels: bool,
    pub language_code: String,
}

impl From<TranscriptionConfig> for CreateTranscriptRequest {
    fn from(config: TranscriptionConfig) -> Self {
        Self {
            audio_url: config.audio_url,
            speech_model: config.speech_model,
            speaker_labels: config.enable_speaker_labels,
            language_code: config.language_code,
        }
    }
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    upload_url: String,
}

/// Transcript as returned by `POST /transcript` and `GET /transcript/{id}`
#[derive(Debug, Deserialize)]
pub struct TranscriptResponse {
    pub id: String,
    pub status: Status,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub utterances: Option<Vec<UtteranceResponse>>,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub audio_duration: Option<f64>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Utterance (speaker segment) with timing
#[derive(Debug, Deserialize, Clone)]
pub struct UtteranceResponse {
    pub text: String,
    pub start: i64,
    pub end: i64,
    #[serde(default)]
    pub confidence: f64,
    pub speaker: String,
}

impl From<TranscriptResponse> for Transcription {
    fn from(response: TranscriptResponse) -> Self {
        Transcription {
            id: response.id,
            status: response.status,
            text: response.text,
            utterances: response
                .utterances
                .unwrap_or_default()
                .into_iter()
                .map(|u| Utterance {
                    text: u.text,
                    speaker: u.speaker,
                    start_ms: u.start,
                    end_ms: u.end,
                    confidence: u.confidence,
                })
                .collect(),
            confidence: response.confidence,
            duration_seconds: response.audio_duration,
            error_message: response.error,
        }
    }
}

/// AssemblyAI API client
pub struct AssemblyAiClient {
    client: reqwest::Client,
    base_url: String,
    /// Per-request limit; the transcription wall-clock budget is enforced by the caller.
    request_timeout: std::time::Duration,
}

impl AssemblyAiClient {
    /// Create a new AssemblyAI client with the given API key and base URL
    pub fn new(api_key: &str, base_url: &str, timeout: std::time::Duration) -> Result<Self, Error> {
        let mut headers = reqwest::header::HeaderMap::new();

        let mut header_value = reqwest::header::HeaderValue::from_str(api_key).map_err(|e| {
            warn!("Failed to create auth header: {:?}", e);
            Error {
                source: Some(Box::new(e)),
                error_kind: crate::error::DomainErrorKind::Internal(InternalErrorKind::Config),
            }
        })?;
        header_value.set_sensitive(true);
        headers.insert("authorization", header_value);

        let client = reqwest::Client::builder()
            .use_rustls_tls()
            .timeout(timeout)
            .default_headers(headers)
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            request_timeout: timeout,
        })
    }

    /// Build a client from configuration; fails when the API key is missing.
    pub fn from_config(config: &Config) -> Result<Self, Error> {
        let api_key = config
            .assemblyai_api_key()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| {
                internal_error(InternalErrorKind::Config, "AssemblyAI API key is required")
            })?;
        Self::new(&api_key, config.assemblyai_base_url(), config.http_timeout())
    }

    async fn read_transcript(response: reqwest::Response) -> Result<Transcription, ProviderError> {
        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            error!("AssemblyAI API returned {}: {}", status, error_text);
            return Err(status_error(status, error_text));
        }

        let transcript: TranscriptResponse = response.json().await.map_err(|e| {
            warn!("Failed to parse AssemblyAI response: {:?}", e);
            ProviderError::Deserialization(e.to_string())
        })?;
        Ok(transcript.into())
    }
}

fn network_error(e: reqwest::Error) -> ProviderError {
    if e.is_timeout() {
        ProviderError::Timeout(e.to_string())
    } else {
        ProviderError::Network(e.to_string())
    }
}

fn status_error(status: reqwest::StatusCode, body: String) -> ProviderError {
    let message = if body.is_empty() {
        status.to_string()
    } else {
        format!("{status}: {body}")
    };
    match status.as_u16() {
        401 | 403 => ProviderError::Authentication(message),
        404 => ProviderError::NotFound(message),
        _ => ProviderError::Provider(message),
    }
}

#[async_trait]
impl Provider for AssemblyAiClient {
    async fn upload_audio(&self, audio: Vec<u8>) -> Result<String, ProviderError> {
        let url = format!("{}/upload", self.base_url);
        debug!(
            "Uploading {} bytes to AssemblyAI (request timeout {}s)",
            audio.len(),
            self.request_timeout.as_secs()
        );

        let response = self
            .client
            .post(&url)
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(audio)
            .send()
            .await
            .map_err(|e| {
                warn!("Failed to upload audio to AssemblyAI: {:?}", e);
                network_error(e)
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            error!("AssemblyAI upload returned {}: {}", status, error_text);
            return Err(status_error(status, error_text));
        }

        let upload: UploadResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Deserialization(e.to_string()))?;
        Ok(upload.upload_url)
    }

    async fn create_transcription(
        &self,
        config: TranscriptionConfig,
    ) -> Result<Transcription, ProviderError> {
        let url = format!("{}/transcript", self.base_url);
        let request = CreateTranscriptRequest::from(config);

        debug!("Creating AssemblyAI transcript for audio: {}", request.audio_url);

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                warn!("Failed to create AssemblyAI transcript: {:?}", e);
                network_error(e)
            })?;

        let transcript = Self::read_transcript(response).await?;
        info!("Created AssemblyAI transcript with ID: {}", transcript.id);
        Ok(transcript)
    }

    async fn get_transcription(&self, transcription_id: &str) -> Result<Transcription, ProviderError> {
        let url = format!("{}/transcript/{}", self.base_url, transcription_id);

        let response = self.client.get(&url).send().await.map_err(|e| {
            warn!("Failed to get AssemblyAI transcript: {:?}", e);
            network_error(e)
        })?;

        Self::read_transcript(response).await
    }

    fn provider_id(&self) -> &str {
        "assemblyai"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;
    use serde_json::json;
    use std::time::Duration;

    fn client(base_url: &str) -> AssemblyAiClient {
        AssemblyAiClient::new("test-key", base_url, Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn test_from_config_uses_http_timeout() {
        let config = Config::from_args([
            "call_pipeline_rs",
            "--assemblyai-api-key",
            "test-key",
            "--http-timeout-secs",
            "7",
            "--transcription-timeout-secs",
            "300",
        ])
        .unwrap();

        let client = AssemblyAiClient::from_config(&config).unwrap();

        assert_eq!(client.request_timeout, Duration::from_secs(7));
    }

    #[tokio::test]
    async fn test_upload_sends_raw_bytes() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/upload")
            .match_header("authorization", "test-key")
            .match_header("content-type", "application/octet-stream")
            .match_body(vec![1u8, 2, 3])
            .with_status(200)
            .with_body(r#"{"upload_url": "https://cdn.example/upload/1"}"#)
            .create_async()
            .await;

        let handle = client(&server.url()).upload_audio(vec![1, 2, 3]).await.unwrap();

        mock.assert_async().await;
        assert_eq!(handle, "https://cdn.example/upload/1");
    }

    #[tokio::test]
    async fn test_create_transcription_body() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/transcript")
            .match_body(Matcher::Json(json!({
                "audio_url": "https://cdn.example/upload/1",
                "speech_model": "best",
                "speaker_labels": true,
                "language_code": "en"
            })))
            .with_status(200)
            .with_body(r#"{"id": "t-1", "status": "queued"}"#)
            .create_async()
            .await;

        let config = TranscriptionConfig::speaker_labeled("https://cdn.example/upload/1", "best", "en");
        let transcription = client(&server.url()).create_transcription(config).await.unwrap();

        mock.assert_async().await;
        assert_eq!(transcription.id, "t-1");
        assert_eq!(transcription.status, Status::Queued);
    }

    #[tokio::test]
    async fn test_completed_transcript_maps_utterances() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/transcript/t-1")
            .with_status(200)
            .with_body(
                json!({
                    "id": "t-1",
                    "status": "completed",
                    "text": "Hello there. Hi.",
                    "utterances": [
                        {"text": "Hello there.", "start": 0, "end": 900, "confidence": 0.9, "speaker": "A"},
                        {"text": "Hi.", "start": 1000, "end": 1300, "confidence": 0.8, "speaker": "B"}
                    ],
                    "confidence": 0.85,
                    "audio_duration": 2.0
                })
                .to_string(),
            )
            .create_async()
            .await;

        let transcription = client(&server.url()).get_transcription("t-1").await.unwrap();

        assert_eq!(transcription.status, Status::Completed);
        assert_eq!(transcription.utterances.len(), 2);
        assert_eq!(transcription.utterances[1].speaker, "B");
        assert_eq!(transcription.utterances[1].start_ms, 1000);
        assert_eq!(transcription.duration_seconds, Some(2.0));
    }

    #[tokio::test]
    async fn test_error_statuses_map_to_provider_errors() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/transcript/denied")
            .with_status(401)
            .with_body("bad key")
            .create_async()
            .await;
        server
            .mock("GET", "/transcript/missing")
            .with_status(404)
            .create_async()
            .await;
        server
            .mock("GET", "/transcript/broken")
            .with_status(500)
            .with_body("oops")
            .create_async()
            .await;

        let assembly = client(&server.url());
        assert!(matches!(
            assembly.get_transcription("denied").await,
            Err(ProviderError::Authentication(_))
        ));
        assert!(matches!(
            assembly.get_transcription("missing").await,
            Err(ProviderError::NotFound(_))
        ));
        match assembly.get_transcription("broken").await {
            Err(ProviderError::Provider(msg)) => assert!(msg.contains("oops")),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_invalid_api_key_is_a_config_error() {
        let err = AssemblyAiClient::new("bad\nkey", "http://localhost", Duration::from_secs(1))
            .err()
            .unwrap();
        assert_eq!(
            err.error_kind,
            crate::error::DomainErrorKind::Internal(InternalErrorKind::Config)
        );
    }
}

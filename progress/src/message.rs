use chrono::{DateTime, Utc};
use serde::Serialize;

/// Trait for getting the event name a streaming consumer should label an event with
pub trait EventType {
    fn event_type(&self) -> &'static str;
}

/// Pipeline stage an event belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Fetch,
    Download,
    Transcription,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    Started,
    InProgress,
    Completed,
    Failed,
}

/// One granular progress update for a unit of work (a day, a call or a file)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressEvent {
    /// call_id, filename or day the event is about
    pub key: String,
    pub stage: Stage,
    pub status: EventStatus,
    /// 0-100
    pub progress: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub at: DateTime<Utc>,
}

impl ProgressEvent {
    pub fn new(key: &str, stage: Stage, status: EventStatus, progress: u8) -> Self {
        Self {
            key: key.to_string(),
            stage,
            status,
            progress: progress.min(100),
            message: None,
            at: Utc::now(),
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

impl EventType for ProgressEvent {
    fn event_type(&self) -> &'static str {
        match (self.stage, self.status) {
            (_, EventStatus::Failed) => "item_failed",
            (Stage::Fetch, _) => "fetch_progress",
            (Stage::Download, _) => "download_progress",
            (Stage::Transcription, _) => "transcription_progress",
        }
    }
}

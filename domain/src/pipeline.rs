//! Stage runners that record their progress into a session of a [`SessionStore`].
//!
//! The caller opens the session (so it can start tailing before work begins)
//! and marks it finished afterwards; these functions only append events.

use crate::call::CallRecord;
use crate::download::{download_calls, DownloadReport, DownloadSettings};
use crate::error::Error;
use crate::fetcher::{fetch_calls, DateRange, DayResult, FetchOutcome, FetchSettings};
use crate::gateway::telephony::TelephonyClient;
use crate::transcription::{
    discover_pending, transcribe_batch, Discovery, TranscriptionReport, TranscriptionSettings,
};
use log::*;
use progress::{EventStatus, ProgressEvent, SessionId, SessionStore, Stage};
use serde::Serialize;
use service::config::Config;
use std::path::{Path, PathBuf};
use telephony_auth::token::TokenSource;
use transcription_ai::Provider;

/// Appends events for one stage to one session.
struct Recorder<'a> {
    store: &'a SessionStore,
    session: &'a SessionId,
    stage: Stage,
}

impl<'a> Recorder<'a> {
    fn new(store: &'a SessionStore, session: &'a SessionId, stage: Stage) -> Self {
        Self {
            store,
            session,
            stage,
        }
    }

    fn record(&self, event: ProgressEvent) {
        if !self.store.append(self.session, event) {
            debug!("Session {} is gone, dropping progress event", self.session.as_str());
        }
    }

    fn event(&self, key: &str, status: EventStatus, progress: u8) -> ProgressEvent {
        ProgressEvent::new(key, self.stage, status, progress)
    }

    fn stage_key(&self) -> &'static str {
        match self.stage {
            Stage::Fetch => "fetch",
            Stage::Download => "download",
            Stage::Transcription => "transcription",
        }
    }

    fn started(&self) {
        self.record(self.event(self.stage_key(), EventStatus::Started, 0));
    }

    fn finished<T>(&self, result: &Result<T, Error>, summary: impl FnOnce(&T) -> String) {
        let event = match result {
            Ok(value) => self
                .event(self.stage_key(), EventStatus::Completed, 100)
                .with_message(summary(value)),
            Err(e) => self
                .event(self.stage_key(), EventStatus::Failed, 0)
                .with_message(e.to_string()),
        };
        self.record(event);
    }
}

fn percent(done: usize, total: usize) -> u8 {
    if total == 0 {
        100
    } else {
        ((done * 100) / total).min(100) as u8
    }
}

pub async fn fetch_stage<S: TokenSource>(
    store: &SessionStore,
    session: &SessionId,
    client: &TelephonyClient<S>,
    range: &DateRange,
    settings: &FetchSettings,
) -> Result<FetchOutcome, Error> {
    let recorder = Recorder::new(store, session, Stage::Fetch);
    recorder.started();

    let total_days = range.days().count();
    let done = std::sync::atomic::AtomicUsize::new(0);
    let on_day = |day: &DayResult| {
        let n = done.fetch_add(1, std::sync::atomic::Ordering::SeqCst) + 1;
        let event = if day.success {
            recorder
                .event(&day.date, EventStatus::Completed, percent(n, total_days))
                .with_message(format!("{} call(s)", day.calls_found))
        } else {
            recorder
                .event(&day.date, EventStatus::Failed, percent(n, total_days))
                .with_message(day.error.clone().unwrap_or_default())
        };
        recorder.record(event);
    };

    let result = fetch_calls(client, range, settings, &on_day).await;
    recorder.finished(&result, |outcome| format!("{} call(s)", outcome.calls.len()));
    result
}

pub async fn download_stage<S: TokenSource>(
    store: &SessionStore,
    session: &SessionId,
    client: &TelephonyClient<S>,
    calls: Vec<CallRecord>,
    min_duration: u64,
    settings: &DownloadSettings,
) -> Result<DownloadReport, Error> {
    let recorder = Recorder::new(store, session, Stage::Download);
    recorder.started();

    let on_progress = |call_id: &str, progress: u8| {
        recorder.record(recorder.event(call_id, EventStatus::InProgress, progress));
    };
    let result = download_calls(client, calls, min_duration, settings, &on_progress).await;

    if let Ok(report) = &result {
        for downloaded in &report.successful {
            recorder.record(
                recorder
                    .event(&downloaded.call_id, EventStatus::Completed, 100)
                    .with_message(downloaded.filename.clone()),
            );
        }
        for failure in &report.failed {
            recorder.record(
                recorder
                    .event(&failure.call_id, EventStatus::Failed, 0)
                    .with_message(failure.reason.clone()),
            );
        }
    }
    recorder.finished(&result, |report| {
        format!("{} downloaded, {} failed", report.successful.len(), report.failed.len())
    });
    result
}

pub async fn transcribe_stage(
    store: &SessionStore,
    session: &SessionId,
    provider: &dyn Provider,
    audio_dir: &Path,
    transcripts_dir: &Path,
    settings: &TranscriptionSettings,
) -> Result<TranscriptionReport, Error> {
    let recorder = Recorder::new(store, session, Stage::Transcription);
    recorder.started();

    let result = async {
        let Discovery {
            pending,
            already_transcribed,
            malformed,
        } = discover_pending(audio_dir, transcripts_dir).await?;

        let total = pending.len();
        let on_progress = |settled: usize, filename: &str| {
            recorder.record(
                recorder
                    .event(filename, EventStatus::InProgress, percent(settled, total))
                    .with_message(format!("{settled}/{total}")),
            );
        };
        let outcomes = transcribe_batch(provider, pending, settings, &on_progress).await;

        for outcome in outcomes.iter().filter(|o| !o.success) {
            recorder.record(
                recorder
                    .event(&outcome.file, EventStatus::Failed, 0)
                    .with_message(outcome.error.clone().unwrap_or_default()),
            );
        }
        Ok::<_, Error>(TranscriptionReport::new(already_transcribed, malformed, outcomes))
    }
    .await;

    recorder.finished(&result, |report| {
        format!("{} transcribed, {} failed", report.successful, report.failed)
    });
    result
}

/// Everything `run_all` needs besides the clients.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub fetch: FetchSettings,
    pub download: DownloadSettings,
    pub transcription: TranscriptionSettings,
    pub transcripts_dir: PathBuf,
}

impl From<&Config> for PipelineSettings {
    fn from(config: &Config) -> Self {
        Self {
            fetch: FetchSettings::from(config),
            download: DownloadSettings::from(config),
            transcription: TranscriptionSettings::from(config),
            transcripts_dir: config.transcripts_dir.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub fetch: FetchOutcome,
    pub download: DownloadReport,
    pub transcription: TranscriptionReport,
}

/// Fetch, download and transcribe in sequence, all recorded into one session.
pub async fn run_all<S: TokenSource>(
    store: &SessionStore,
    session: &SessionId,
    telephony: &TelephonyClient<S>,
    provider: &dyn Provider,
    range: &DateRange,
    settings: &PipelineSettings,
) -> Result<RunReport, Error> {
    let fetch = fetch_stage(store, session, telephony, range, &settings.fetch).await?;
    let download = download_stage(
        store,
        session,
        telephony,
        fetch.calls.clone(),
        settings.fetch.min_duration,
        &settings.download,
    )
    .await?;
    let transcription = transcribe_stage(
        store,
        session,
        provider,
        &settings.download.output_dir,
        &settings.transcripts_dir,
        &settings.transcription,
    )
    .await?;

    Ok(RunReport {
        fetch,
        download,
        transcription,
    })
}

//! Upload, poll and format transcription of downloaded recordings.

use crate::batch::for_each_chunk;
use crate::error::{external_error, validation_error, Error, ExternalErrorKind};
use log::*;
use serde::Serialize;
use serde_json::{json, Value};
use service::config::Config;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use transcription_ai::{Config as JobConfig, Provider, Status, Transcription};

/// Audio extensions picked up by discovery.
pub const AUDIO_EXTENSIONS: [&str; 2] = ["wav", "mp3"];

/// A local recording and the artifacts its transcription produces.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TranscriptionFile {
    pub filepath: PathBuf,
    pub filename: String,
    pub broker_id: String,
    pub call_id: String,
    pub transcript_file: PathBuf,
    pub raw_transcript_file: PathBuf,
}

impl TranscriptionFile {
    /// Derive ids from `<brokerId>_<callId>.<ext>`; the call id keeps any further underscores.
    pub fn new(filepath: &Path, transcripts_dir: &Path) -> Result<Self, Error> {
        let filename = filepath
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| validation_error(&format!("unusable file name {}", filepath.display())))?
            .to_string();
        let stem = filepath
            .file_stem()
            .and_then(|stem| stem.to_str())
            .unwrap_or_default();

        let (broker_id, call_id) = stem
            .split_once('_')
            .filter(|(broker, call)| !broker.is_empty() && !call.is_empty())
            .ok_or_else(|| {
                validation_error(&format!("{filename} is not named <brokerId>_<callId>"))
            })?;

        let base = format!("{broker_id}_{call_id}");
        Ok(Self {
            filepath: filepath.to_path_buf(),
            broker_id: broker_id.to_string(),
            call_id: call_id.to_string(),
            transcript_file: transcripts_dir.join(format!("{base}.txt")),
            raw_transcript_file: transcripts_dir.join("raw").join(format!("{base}.json")),
            filename,
        })
    }

    pub fn is_transcribed(&self) -> bool {
        self.transcript_file.is_file()
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Discovery {
    pub pending: Vec<TranscriptionFile>,
    pub already_transcribed: usize,
    /// Audio files whose names do not split into broker and call id.
    pub malformed: Vec<String>,
}

/// List audio files in `audio_dir` that have no transcript in `transcripts_dir` yet.
pub async fn discover_pending(audio_dir: &Path, transcripts_dir: &Path) -> Result<Discovery, Error> {
    let mut discovery = Discovery::default();
    if !audio_dir.is_dir() {
        debug!("Audio directory {} does not exist", audio_dir.display());
        return Ok(discovery);
    }

    let mut audio_files = Vec::new();
    let mut entries = tokio::fs::read_dir(audio_dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let is_audio = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| AUDIO_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()));
        if is_audio && path.is_file() {
            audio_files.push(path);
        }
    }
    audio_files.sort();

    for path in audio_files {
        match TranscriptionFile::new(&path, transcripts_dir) {
            Ok(file) if file.is_transcribed() => discovery.already_transcribed += 1,
            Ok(file) => discovery.pending.push(file),
            Err(e) => {
                warn!("Skipping {}: {e}", path.display());
                discovery
                    .malformed
                    .push(path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default());
            }
        }
    }

    Ok(discovery)
}

/// `m:ss`, or `h:mm:ss` once at least an hour has elapsed.
pub fn format_timestamp(ms: i64) -> String {
    let total_secs = ms.max(0) / 1000;
    let (hours, minutes, seconds) = (total_secs / 3600, (total_secs % 3600) / 60, total_secs % 60);
    if hours > 0 {
        format!("{hours}:{minutes:02}:{seconds:02}")
    } else {
        format!("{minutes}:{seconds:02}")
    }
}

/// Speaker-labelled text rendition of a finished job.
pub fn format_transcript(transcription: &Transcription) -> String {
    if transcription.status == Status::Error {
        let message = transcription
            .error_message
            .as_deref()
            .unwrap_or("unknown error");
        return format!("Transcription failed: {message}");
    }

    if transcription.utterances.is_empty() {
        return transcription.text.clone().unwrap_or_default();
    }

    transcription
        .utterances
        .iter()
        .map(|u| {
            format!(
                "[{}] Speaker {}: {}",
                format_timestamp(u.start_ms),
                u.speaker,
                u.text.trim()
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// The subset of the provider result kept next to the formatted transcript.
pub fn raw_snapshot(transcription: &Transcription) -> Value {
    json!({
        "id": transcription.id,
        "status": transcription.status,
        "text": transcription.text,
        "utterances": transcription.utterances,
        "error": transcription.error_message,
        "confidence": transcription.confidence,
        "audio_duration": transcription.duration_seconds,
    })
}

async fn persist(file: &TranscriptionFile, transcription: &Transcription) -> Result<(), Error> {
    for path in [&file.transcript_file, &file.raw_transcript_file] {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }

    tokio::fs::write(&file.transcript_file, format_transcript(transcription)).await?;
    let raw = serde_json::to_vec_pretty(&raw_snapshot(transcription))?;
    tokio::fs::write(&file.raw_transcript_file, raw).await?;
    Ok(())
}

#[derive(Debug, Clone)]
pub struct TranscriptionSettings {
    /// Files transcribed at the same time.
    pub concurrency: usize,
    pub poll_interval: Duration,
    /// Wall-clock budget for one job, from submission to a terminal status.
    pub timeout: Duration,
    pub speech_model: String,
    pub language_code: String,
}

impl Default for TranscriptionSettings {
    fn default() -> Self {
        Self {
            concurrency: 3,
            poll_interval: Duration::from_secs(3),
            timeout: Duration::from_secs(300),
            speech_model: "best".to_string(),
            language_code: "en".to_string(),
        }
    }
}

impl From<&Config> for TranscriptionSettings {
    fn from(config: &Config) -> Self {
        Self {
            concurrency: config.transcription_concurrency,
            poll_interval: config.poll_interval(),
            timeout: config.transcription_timeout(),
            speech_model: config.speech_model.clone(),
            language_code: config.language_code.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FileOutcome {
    pub file: String,
    pub broker_id: String,
    pub call_id: String,
    pub success: bool,
    pub error: Option<String>,
    /// The job did not reach a terminal status within the timeout.
    pub timed_out: bool,
    /// A transcript already existed; nothing was sent to the provider.
    pub skipped: bool,
}

impl FileOutcome {
    fn new(file: &TranscriptionFile, result: Result<bool, Error>) -> Self {
        let (success, skipped, error, timed_out) = match result {
            Ok(skipped) => (true, skipped, None, false),
            Err(e) => (false, false, Some(e.to_string()), e.is_timeout()),
        };
        Self {
            file: file.filename.clone(),
            broker_id: file.broker_id.clone(),
            call_id: file.call_id.clone(),
            success,
            error,
            timed_out,
            skipped,
        }
    }
}

async fn wait_for_completion(
    provider: &dyn Provider,
    mut job: Transcription,
    poll_interval: Duration,
) -> Result<Transcription, Error> {
    while !job.status.is_terminal() {
        tokio::time::sleep(poll_interval).await;
        match provider.get_transcription(&job.id).await {
            Ok(latest) => job = latest,
            // The caller's wall-clock timeout bounds how long this can repeat.
            Err(e) if e.is_transient() => {
                warn!("Polling transcription {} failed, will retry: {e}", job.id);
                continue;
            }
            Err(e) => return Err(e.into()),
        }
        trace!("Transcription {} is {:?}", job.id, job.status);
    }
    Ok(job)
}

/// Returns `Ok(true)` when the file was skipped because its transcript exists.
async fn transcribe_file(
    provider: &dyn Provider,
    file: &TranscriptionFile,
    settings: &TranscriptionSettings,
) -> Result<bool, Error> {
    if file.is_transcribed() {
        debug!("{} already transcribed", file.filename);
        return Ok(true);
    }

    let audio = tokio::fs::read(&file.filepath).await?;
    if audio.is_empty() {
        return Err(validation_error(&format!("{} is empty", file.filename)));
    }

    let upload_url = provider.upload_audio(audio).await?;
    let job = provider
        .create_transcription(JobConfig::speaker_labeled(
            &upload_url,
            &settings.speech_model,
            &settings.language_code,
        ))
        .await?;
    debug!("{}: submitted transcription {}", file.filename, job.id);

    let job_id = job.id.clone();
    let finished = tokio::time::timeout(
        settings.timeout,
        wait_for_completion(provider, job, settings.poll_interval),
    )
    .await
    .map_err(|_| {
        external_error(
            ExternalErrorKind::Timeout,
            &format!(
                "transcription {job_id} did not finish within {}s",
                settings.timeout.as_secs()
            ),
        )
    })??;

    persist(file, &finished).await?;

    if finished.status == Status::Error {
        let message = finished
            .error_message
            .unwrap_or_else(|| "unknown error".to_string());
        return Err(external_error(
            ExternalErrorKind::Provider(message.clone()),
            &format!("transcription {job_id} failed: {message}"),
        ));
    }

    info!("{}: transcribed ({} utterances)", file.filename, finished.utterances.len());
    Ok(false)
}

/// Transcribe `files` in chunks of `settings.concurrency`.
///
/// `on_progress` fires once per settled file with the running count of settled
/// files and the file's name. One outcome is returned per input file, in order.
pub async fn transcribe_batch(
    provider: &dyn Provider,
    files: Vec<TranscriptionFile>,
    settings: &TranscriptionSettings,
    on_progress: &(dyn Fn(usize, &str) + Sync),
) -> Vec<FileOutcome> {
    let settled = AtomicUsize::new(0);
    let settled = &settled;

    for_each_chunk(
        files,
        settings.concurrency,
        Duration::ZERO,
        |file: TranscriptionFile| async move {
            let result = transcribe_file(provider, &file, settings).await;
            if let Err(e) = &result {
                warn!("{}: transcription failed: {e}", file.filename);
            }
            let outcome = FileOutcome::new(&file, result);
            let count = settled.fetch_add(1, Ordering::SeqCst) + 1;
            on_progress(count, &file.filename);
            outcome
        },
    )
    .await
}

#[derive(Debug, Clone, Serialize)]
pub struct TranscriptionReport {
    pub pending: usize,
    pub already_transcribed: usize,
    pub malformed: Vec<String>,
    pub successful: usize,
    pub failed: usize,
    pub timed_out: usize,
    pub outcomes: Vec<FileOutcome>,
}

impl TranscriptionReport {
    pub fn new(already_transcribed: usize, malformed: Vec<String>, outcomes: Vec<FileOutcome>) -> Self {
        let successful = outcomes.iter().filter(|o| o.success).count();
        Self {
            pending: outcomes.len(),
            already_transcribed,
            malformed,
            successful,
            failed: outcomes.len() - successful,
            timed_out: outcomes.iter().filter(|o| o.timed_out).count(),
            outcomes,
        }
    }
}

/// Discover untranscribed recordings and transcribe them.
pub async fn transcribe_pending(
    provider: &dyn Provider,
    audio_dir: &Path,
    transcripts_dir: &Path,
    settings: &TranscriptionSettings,
    on_progress: &(dyn Fn(usize, &str) + Sync),
) -> Result<TranscriptionReport, Error> {
    let discovery = discover_pending(audio_dir, transcripts_dir).await?;
    info!(
        "{} file(s) to transcribe, {} already done, {} malformed",
        discovery.pending.len(),
        discovery.already_transcribed,
        discovery.malformed.len()
    );

    let Discovery {
        pending,
        already_transcribed,
        malformed,
    } = discovery;
    let outcomes = transcribe_batch(provider, pending, settings, on_progress).await;
    Ok(TranscriptionReport::new(already_transcribed, malformed, outcomes))
}

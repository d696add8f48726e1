//! Eligibility filtering and rate-limited download of call recordings.
//!
//! Downloads run in fixed-size chunks: every call in a chunk is probed and
//! streamed concurrently, and the next chunk starts only after the whole chunk
//! settled plus a fixed cooldown. Each call ends up in exactly one of
//! `successful` or `failed`.

use crate::batch::for_each_chunk;
use crate::call::CallRecord;
use crate::error::{external_error, validation_error, Error, ExternalErrorKind};
use crate::gateway::telephony::{RecordingStatus, TelephonyClient};
use futures::StreamExt;
use log::*;
use serde::Serialize;
use service::config::Config;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use telephony_auth::token::TokenSource;
use tokio::io::AsyncWriteExt;

pub const AUDIO_EXTENSION: &str = "wav";

/// Partition of a call list into downloadable calls and per-reason exclusions.
#[derive(Debug, Clone, Default, Serialize)]
pub struct EligibilityReport {
    pub eligible: Vec<CallRecord>,
    pub skipped_no_call_id: usize,
    pub skipped_too_short: usize,
    pub skipped_no_recording: usize,
}

impl EligibilityReport {
    pub fn skipped(&self) -> usize {
        self.skipped_no_call_id + self.skipped_too_short + self.skipped_no_recording
    }
}

/// Split `calls` by the first exclusion that applies: missing call id, then
/// duration below `min_duration`, then a blank recording URL.
pub fn filter_eligible(calls: Vec<CallRecord>, min_duration: u64) -> EligibilityReport {
    let mut report = EligibilityReport::default();
    for call in calls {
        if call.call_id.trim().is_empty() {
            report.skipped_no_call_id += 1;
        } else if call.duration < min_duration {
            report.skipped_too_short += 1;
        } else if call.recording_url.trim().is_empty() {
            report.skipped_no_recording += 1;
        } else {
            report.eligible.push(call);
        }
    }
    report
}

/// First three alphanumeric characters of the broker id, lowercased; `unk` if none.
pub fn broker_prefix(broker_id: &str) -> String {
    let prefix: String = broker_id
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .take(3)
        .collect::<String>()
        .to_ascii_lowercase();
    if prefix.is_empty() {
        "unk".to_string()
    } else {
        prefix
    }
}

/// Call id restricted to `[A-Za-z0-9_-]` with `..` sequences removed.
pub fn sanitize_call_id(call_id: &str) -> Result<String, Error> {
    let safe: String = call_id
        .replace("..", "")
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
        .collect();
    if safe.is_empty() {
        return Err(validation_error(&format!(
            "call id {call_id:?} has no usable characters"
        )));
    }
    Ok(safe)
}

/// `<brokerPrefix>_<callId>.wav`
pub fn audio_filename(call: &CallRecord) -> Result<String, Error> {
    Ok(format!(
        "{}_{}.{AUDIO_EXTENSION}",
        broker_prefix(&call.broker_id),
        sanitize_call_id(&call.call_id)?
    ))
}

#[derive(Debug, Clone)]
pub struct DownloadSettings {
    pub output_dir: PathBuf,
    pub batch_size: usize,
    pub batch_delay: Duration,
}

impl From<&Config> for DownloadSettings {
    fn from(config: &Config) -> Self {
        Self {
            output_dir: config.audio_dir.clone(),
            batch_size: config.download_batch_size,
            batch_delay: config.download_batch_delay(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DownloadResult {
    pub file_path: PathBuf,
    pub filename: String,
    /// Bytes on disk; always greater than zero.
    pub size: u64,
    pub call_id: String,
    pub broker_id: String,
    /// The file was already on disk and nothing was downloaded.
    pub already_present: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct DownloadFailure {
    pub call_id: String,
    pub broker_id: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchDownload {
    pub successful: Vec<DownloadResult>,
    pub failed: Vec<DownloadFailure>,
}

/// Download every call's recording into `settings.output_dir`.
///
/// `on_progress` receives `(call_id, percent)` while bodies with a known
/// length stream in. Per-call failures land in [`BatchDownload::failed`];
/// only an unusable output directory or an unobtainable token fails the batch.
pub async fn download_batch<S: TokenSource>(
    client: &TelephonyClient<S>,
    calls: Vec<CallRecord>,
    settings: &DownloadSettings,
    on_progress: &(dyn Fn(&str, u8) + Sync),
) -> Result<BatchDownload, Error> {
    if calls.is_empty() {
        return Ok(BatchDownload::default());
    }

    tokio::fs::create_dir_all(&settings.output_dir).await?;
    client.authenticate().await?;

    let mut batch = BatchDownload::default();
    let (calls, collisions) = claim_filenames(calls);
    for (call, owner) in collisions {
        let reason = validation_error(&format!(
            "call {} maps to the same file as call {owner}",
            call.call_id
        ))
        .to_string();
        warn!("Skipping download of call {}: {reason}", call.call_id);
        batch.failed.push(DownloadFailure {
            call_id: call.call_id,
            broker_id: call.broker_id,
            reason,
        });
    }

    info!(
        "Downloading {} recording(s) in chunks of {}",
        calls.len(),
        settings.batch_size
    );

    let outcomes = for_each_chunk(
        calls,
        settings.batch_size,
        settings.batch_delay,
        |call: CallRecord| async move {
            let outcome = download_one(client, &call, &settings.output_dir, on_progress).await;
            (call, outcome)
        },
    )
    .await;

    for (call, outcome) in outcomes {
        match outcome {
            Ok(result) => batch.successful.push(result),
            Err(e) => {
                warn!("Download of call {} failed: {e}", call.call_id);
                batch.failed.push(DownloadFailure {
                    call_id: call.call_id,
                    broker_id: call.broker_id,
                    reason: e.to_string(),
                });
            }
        }
    }

    info!(
        "Downloads finished: {} succeeded, {} failed",
        batch.successful.len(),
        batch.failed.len()
    );
    Ok(batch)
}

/// Give each audio filename to the first call that maps to it.
///
/// Returns the calls to download and, separately, each later call whose
/// sanitized filename is already taken, paired with the owning call id. Calls
/// whose filename cannot be built are kept; `download_one` reports them.
fn claim_filenames(calls: Vec<CallRecord>) -> (Vec<CallRecord>, Vec<(CallRecord, String)>) {
    let mut owners: HashMap<String, String> = HashMap::new();
    let mut claimed = Vec::with_capacity(calls.len());
    let mut collisions = Vec::new();

    for call in calls {
        let Ok(filename) = audio_filename(&call) else {
            claimed.push(call);
            continue;
        };
        match owners.get(&filename) {
            Some(owner) if *owner != call.call_id => {
                let owner = owner.clone();
                collisions.push((call, owner));
            }
            Some(_) => claimed.push(call),
            None => {
                owners.insert(filename, call.call_id.clone());
                claimed.push(call);
            }
        }
    }

    (claimed, collisions)
}

async fn download_one<S: TokenSource>(
    client: &TelephonyClient<S>,
    call: &CallRecord,
    output_dir: &Path,
    on_progress: &(dyn Fn(&str, u8) + Sync),
) -> Result<DownloadResult, Error> {
    let filename = audio_filename(call)?;
    let file_path = output_dir.join(&filename);

    let result = |size: u64, already_present: bool| DownloadResult {
        file_path: file_path.clone(),
        filename: filename.clone(),
        size,
        call_id: call.call_id.clone(),
        broker_id: call.broker_id.clone(),
        already_present,
    };

    if let Ok(metadata) = tokio::fs::metadata(&file_path).await {
        if metadata.is_file() && metadata.len() > 0 {
            debug!("{filename} already downloaded, skipping");
            on_progress(&call.call_id, 100);
            return Ok(result(metadata.len(), true));
        }
    }

    let info = client.recording_info(&call.call_id).await?;
    let Some(url) = info.download_url() else {
        let kind = match info.status {
            RecordingStatus::NotFound => ExternalErrorKind::NotFound,
            status => ExternalErrorKind::Provider(format!("recording status {status:?}")),
        };
        return Err(external_error(
            kind,
            &format!("recording for call {} is not available ({:?})", call.call_id, info.status),
        ));
    };

    let response = client.download_recording(url).await?;
    let size = match stream_to_file(response, &file_path, |percent| {
        on_progress(&call.call_id, percent)
    })
    .await
    {
        Ok(size) => size,
        Err(e) => {
            remove_partial(&file_path).await;
            return Err(e);
        }
    };

    if size == 0 {
        remove_partial(&file_path).await;
        return Err(external_error(
            ExternalErrorKind::Provider("empty recording".to_string()),
            &format!("recording for call {} downloaded as 0 bytes", call.call_id),
        ));
    }

    debug!("Saved {filename} ({size} bytes)");
    Ok(result(size, false))
}

/// Stream a response body to `path`, reporting whole-percent progress when the
/// body length is known. Returns the number of bytes written.
async fn stream_to_file(
    response: reqwest::Response,
    path: &Path,
    progress: impl Fn(u8),
) -> Result<u64, Error> {
    let total = response.content_length().filter(|len| *len > 0);
    let mut file = tokio::fs::File::create(path).await?;
    let mut body = response.bytes_stream();
    let mut written: u64 = 0;
    let mut last_percent = None;

    while let Some(chunk) = body.next().await {
        let chunk = chunk?;
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;

        if let Some(total) = total {
            let percent = (written.saturating_mul(100) / total).min(100) as u8;
            if last_percent != Some(percent) {
                last_percent = Some(percent);
                progress(percent);
            }
        }
    }

    file.flush().await?;
    Ok(written)
}

async fn remove_partial(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!("Could not remove partial download {}: {e}", path.display());
        }
    }
}

/// Eligibility plus download outcome for a whole call list.
#[derive(Debug, Clone, Serialize)]
pub struct DownloadReport {
    pub total: usize,
    pub eligible: usize,
    pub skipped_no_call_id: usize,
    pub skipped_too_short: usize,
    pub skipped_no_recording: usize,
    pub successful: Vec<DownloadResult>,
    pub failed: Vec<DownloadFailure>,
}

/// Filter `calls` and download the eligible ones.
pub async fn download_calls<S: TokenSource>(
    client: &TelephonyClient<S>,
    calls: Vec<CallRecord>,
    min_duration: u64,
    settings: &DownloadSettings,
    on_progress: &(dyn Fn(&str, u8) + Sync),
) -> Result<DownloadReport, Error> {
    let total = calls.len();
    let report = filter_eligible(calls, min_duration);
    info!(
        "{} of {total} call(s) eligible for download ({} skipped)",
        report.eligible.len(),
        report.skipped()
    );

    let eligible = report.eligible.len();
    let batch = download_batch(client, report.eligible, settings, on_progress).await?;

    Ok(DownloadReport {
        total,
        eligible,
        skipped_no_call_id: report.skipped_no_call_id,
        skipped_too_short: report.skipped_too_short,
        skipped_no_recording: report.skipped_no_recording,
        successful: batch.successful,
        failed: batch.failed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::SecretString;
    use serde_json::json;
    use std::sync::Mutex;
    use telephony_auth::http::HttpClientBuilder;
    use telephony_auth::token::{ClientCredentials, ClientCredentialsSource};

    fn record(call_id: &str, broker_id: &str, duration: u64, recording_url: &str) -> CallRecord {
        CallRecord {
            call_id: call_id.to_string(),
            from_number: "+15550001".to_string(),
            to_number: "+15550002".to_string(),
            from_username: String::new(),
            from_name: "John Doe".to_string(),
            start_time: "2024-03-01T10:00:00Z".to_string(),
            duration,
            recording_url: recording_url.to_string(),
            broker_id: broker_id.to_string(),
            date: "2024-03-01".to_string(),
        }
    }

    fn client(server: &mockito::ServerGuard) -> TelephonyClient {
        let http = HttpClientBuilder::new()
            .with_timeout(Duration::from_secs(5))
            .build()
            .unwrap();
        let credentials = ClientCredentials::new(
            "account",
            SecretString::new("secret".to_string()),
            &format!("{}/oauth/token", server.url()),
        );
        TelephonyClient::new(
            http,
            &server.url(),
            credentials,
            ClientCredentialsSource::new(reqwest::Client::new()),
        )
    }

    async fn token_mock(server: &mut mockito::ServerGuard) {
        server
            .mock("POST", "/oauth/token")
            .with_status(200)
            .with_body(r#"{"access_token": "tok"}"#)
            .create_async()
            .await;
    }

    async fn recording_mock(server: &mut mockito::ServerGuard, call_id: &str) {
        let body = json!({
            "recordings": [{
                "status": "available",
                "url": format!("{}/audio/{call_id}", server.url()),
                "duration": 60
            }]
        });
        server
            .mock("GET", format!("/calls/{call_id}/recordings").as_str())
            .with_status(200)
            .with_body(body.to_string())
            .create_async()
            .await;
    }

    fn settings(dir: &Path) -> DownloadSettings {
        DownloadSettings {
            output_dir: dir.to_path_buf(),
            batch_size: 2,
            batch_delay: Duration::ZERO,
        }
    }

    fn no_progress(_: &str, _: u8) {}

    #[test]
    fn test_filter_eligible_checks_in_order() {
        let calls = vec![
            record("", "joh", 5, ""),
            record("a", "joh", 5, ""),
            record("b", "joh", 60, "  "),
            record("c", "joh", 60, "https://rec/c"),
            record("d", "joh", 15, "https://rec/d"),
        ];
        let report = filter_eligible(calls.clone(), 15);

        assert_eq!(report.skipped_no_call_id, 1);
        assert_eq!(report.skipped_too_short, 1);
        assert_eq!(report.skipped_no_recording, 1);
        let ids: Vec<&str> = report.eligible.iter().map(|c| c.call_id.as_str()).collect();
        assert_eq!(ids, vec!["c", "d"]);
        assert_eq!(report.eligible.len() + report.skipped(), calls.len());
    }

    #[test]
    fn test_filenames_are_sanitized() {
        assert_eq!(audio_filename(&record("abc-1", "J.o h", 1, "")).unwrap(), "joh_abc-1.wav");
        assert_eq!(audio_filename(&record("x_y", "", 1, "")).unwrap(), "unk_x_y.wav");
        assert_eq!(sanitize_call_id("../../etc/passwd").unwrap(), "etcpasswd");
        assert!(sanitize_call_id("../..").is_err());
        assert_eq!(broker_prefix("12345"), "123");
    }

    #[tokio::test]
    async fn test_successful_download_reports_progress() {
        let mut server = mockito::Server::new_async().await;
        token_mock(&mut server).await;
        recording_mock(&mut server, "c-1").await;
        server
            .mock("GET", "/audio/c-1")
            .with_status(200)
            .with_body("RIFF0000WAVE")
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let percents = Mutex::new(Vec::new());
        let on_progress = |_: &str, percent: u8| percents.lock().unwrap().push(percent);

        let batch = download_batch(
            &client(&server),
            vec![record("c-1", "joh", 60, "https://rec/c-1")],
            &settings(dir.path()),
            &on_progress,
        )
        .await
        .unwrap();

        assert!(batch.failed.is_empty());
        let result = &batch.successful[0];
        assert_eq!(result.filename, "joh_c-1.wav");
        assert_eq!(result.size, 12);
        assert!(!result.already_present);
        assert_eq!(std::fs::read(&result.file_path).unwrap(), b"RIFF0000WAVE");
        assert_eq!(percents.lock().unwrap().last(), Some(&100));
    }

    #[tokio::test]
    async fn test_empty_body_is_a_failure_and_leaves_no_file() {
        let mut server = mockito::Server::new_async().await;
        token_mock(&mut server).await;
        recording_mock(&mut server, "c-1").await;
        server
            .mock("GET", "/audio/c-1")
            .with_status(200)
            .with_body("")
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let batch = download_batch(
            &client(&server),
            vec![record("c-1", "joh", 60, "https://rec/c-1")],
            &settings(dir.path()),
            &no_progress,
        )
        .await
        .unwrap();

        assert!(batch.successful.is_empty());
        assert_eq!(batch.failed.len(), 1);
        assert!(!dir.path().join("joh_c-1.wav").exists());
    }

    #[tokio::test]
    async fn test_truncated_body_leaves_no_file() {
        let mut server = mockito::Server::new_async().await;
        token_mock(&mut server).await;
        recording_mock(&mut server, "c-1").await;
        server
            .mock("GET", "/audio/c-1")
            .with_status(200)
            .with_header("content-length", "1000")
            .with_body("")
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let batch = download_batch(
            &client(&server),
            vec![record("c-1", "joh", 60, "https://rec/c-1")],
            &settings(dir.path()),
            &no_progress,
        )
        .await
        .unwrap();

        assert!(batch.successful.is_empty());
        assert_eq!(batch.failed[0].call_id, "c-1");
        assert!(!dir.path().join("joh_c-1.wav").exists());
    }

    #[tokio::test]
    async fn test_failures_do_not_cancel_siblings() {
        let mut server = mockito::Server::new_async().await;
        token_mock(&mut server).await;
        recording_mock(&mut server, "ok-1").await;
        recording_mock(&mut server, "ok-2").await;
        server
            .mock("GET", "/calls/gone/recordings")
            .with_status(404)
            .create_async()
            .await;
        server
            .mock("GET", "/calls/busy/recordings")
            .with_status(200)
            .with_body(r#"{"recordings": [{"status": "processing"}]}"#)
            .create_async()
            .await;
        for call_id in ["ok-1", "ok-2"] {
            server
                .mock("GET", format!("/audio/{call_id}").as_str())
                .with_status(200)
                .with_body("audio")
                .create_async()
                .await;
        }

        let dir = tempfile::tempdir().unwrap();
        let calls = vec![
            record("ok-1", "joh", 60, "u"),
            record("gone", "joh", 60, "u"),
            record("busy", "joh", 60, "u"),
            record("ok-2", "joh", 60, "u"),
        ];
        let batch = download_batch(&client(&server), calls, &settings(dir.path()), &no_progress)
            .await
            .unwrap();

        assert_eq!(batch.successful.len(), 2);
        assert_eq!(batch.failed.len(), 2);
        let gone = batch.failed.iter().find(|f| f.call_id == "gone").unwrap();
        assert!(gone.reason.starts_with("Not found"));
    }

    #[tokio::test]
    async fn test_existing_audio_is_not_downloaded_again() {
        let mut server = mockito::Server::new_async().await;
        token_mock(&mut server).await;
        let lookup = server
            .mock("GET", "/calls/c-1/recordings")
            .expect(0)
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("joh_c-1.wav"), b"cached").unwrap();

        let report = download_calls(
            &client(&server),
            vec![record("c-1", "joh", 60, "https://rec/c-1")],
            0,
            &settings(dir.path()),
            &no_progress,
        )
        .await
        .unwrap();

        lookup.assert_async().await;
        assert_eq!(report.eligible, 1);
        assert!(report.successful[0].already_present);
        assert_eq!(report.successful[0].size, 6);
    }

    #[tokio::test]
    async fn test_calls_sharing_a_filename_download_once() {
        let mut server = mockito::Server::new_async().await;
        token_mock(&mut server).await;
        recording_mock(&mut server, "a.b").await;
        server
            .mock("GET", "/audio/a.b")
            .with_status(200)
            .with_body("audio-a.b")
            .create_async()
            .await;
        let second_lookup = server
            .mock("GET", "/calls/ab/recordings")
            .expect(0)
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let calls = vec![record("a.b", "joh", 60, "u"), record("ab", "joh", 60, "u")];
        let batch = download_batch(&client(&server), calls, &settings(dir.path()), &no_progress)
            .await
            .unwrap();

        second_lookup.assert_async().await;
        assert_eq!(batch.successful.len(), 1);
        assert_eq!(batch.successful[0].call_id, "a.b");
        assert_eq!(batch.successful[0].filename, "joh_ab.wav");
        assert_eq!(batch.failed.len(), 1);
        assert_eq!(batch.failed[0].call_id, "ab");
        assert!(batch.failed[0].reason.contains("a.b"));
        assert_eq!(
            std::fs::read(dir.path().join("joh_ab.wav")).unwrap(),
            b"audio-a.b"
        );
    }
}

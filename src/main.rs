use domain::call::CallRecord;
use domain::download::DownloadSettings;
use domain::error::{validation_error, Error};
use domain::fetcher::{DateRange, FetchSettings};
use domain::gateway::assembly_ai::AssemblyAiClient;
use domain::gateway::telephony::TelephonyClient;
use domain::pipeline::{self, PipelineSettings};
use domain::transcription::TranscriptionSettings;
use futures::StreamExt;
use log::*;
use progress::{stream::tail, EventStatus, EventType, ProgressEvent, SessionId, SessionStore};
use serde_json::Value;
use service::{
    config::{Command, Config},
    logging::Logger,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

const TAIL_INTERVAL: Duration = Duration::from_millis(250);

#[tokio::main]
async fn main() {
    let config = Config::new();
    Logger::init_logger(&config as &Config);

    let Some(command) = config.command.clone() else {
        error!("No command given, run with --help to see the available commands");
        std::process::exit(2);
    };

    let store = Arc::new(SessionStore::new(config.session_ttl()));
    let _sweeper = store.spawn_sweeper(config.session_sweep_interval());
    let session = store.create_session();
    debug!("Progress session {}", session.as_str());

    let (cancel_tx, cancel_rx) = watch::channel(false);
    let tail_task = tokio::spawn(log_progress(
        Arc::clone(&store),
        session.clone(),
        cancel_rx,
    ));

    let result = run(&config, command, &store, &session).await;

    let _ = cancel_tx.send(true);
    let logged = tail_task.await.unwrap_or_default();
    for event in store.events_since(&session, logged).unwrap_or_default() {
        log_event(&event);
    }
    store.finish(&session);

    match result {
        Ok(output) => match serde_json::to_string_pretty(&output) {
            Ok(json) => println!("{json}"),
            Err(e) => {
                error!("Failed to render result: {e}");
                std::process::exit(1);
            }
        },
        Err(e) => {
            error!("{e}");
            std::process::exit(1);
        }
    }
}

async fn run(
    config: &Config,
    command: Command,
    store: &SessionStore,
    session: &SessionId,
) -> Result<Value, Error> {
    match command {
        Command::Fetch { start, end, output } => {
            let range = DateRange::new(start, end)?;
            let client = TelephonyClient::from_config(config)?;
            let outcome = pipeline::fetch_stage(
                store,
                session,
                &client,
                &range,
                &FetchSettings::from(config),
            )
            .await?;

            if let Some(path) = output {
                tokio::fs::write(&path, serde_json::to_vec_pretty(&outcome.calls)?).await?;
                info!("Wrote {} call(s) to {}", outcome.calls.len(), path.display());
            }
            Ok(serde_json::to_value(&outcome)?)
        }
        Command::Download { calls } => {
            let raw = tokio::fs::read(&calls).await?;
            let calls: Vec<CallRecord> = serde_json::from_slice(&raw).map_err(|e| {
                validation_error(&format!("{} is not a list of calls: {e}", calls.display()))
            })?;
            let client = TelephonyClient::from_config(config)?;
            let report = pipeline::download_stage(
                store,
                session,
                &client,
                calls,
                config.min_duration_secs,
                &DownloadSettings::from(config),
            )
            .await?;
            Ok(serde_json::to_value(&report)?)
        }
        Command::Transcribe => {
            let provider = AssemblyAiClient::from_config(config)?;
            let report = pipeline::transcribe_stage(
                store,
                session,
                &provider,
                &config.audio_dir,
                &config.transcripts_dir,
                &TranscriptionSettings::from(config),
            )
            .await?;
            Ok(serde_json::to_value(&report)?)
        }
        Command::Run { start, end } => {
            let range = DateRange::new(start, end)?;
            let telephony = TelephonyClient::from_config(config)?;
            let provider = AssemblyAiClient::from_config(config)?;
            let report = pipeline::run_all(
                store,
                session,
                &telephony,
                &provider,
                &range,
                &PipelineSettings::from(config),
            )
            .await?;
            Ok(serde_json::to_value(&report)?)
        }
    }
}

/// Log a session's events as they arrive; returns how many were logged.
async fn log_progress(
    store: Arc<SessionStore>,
    session: SessionId,
    cancel: watch::Receiver<bool>,
) -> usize {
    let mut events = Box::pin(tail(store, session, TAIL_INTERVAL, cancel));
    let mut logged = 0;
    while let Some(event) = events.next().await {
        log_event(&event);
        logged += 1;
    }
    logged
}

fn log_event(event: &ProgressEvent) {
    let message = event.message.as_deref().unwrap_or_default();
    match event.status {
        EventStatus::Failed => warn!("[{}] {}: {}", event.event_type(), event.key, message),
        EventStatus::InProgress => debug!(
            "[{}] {} {}% {}",
            event.event_type(),
            event.key,
            event.progress,
            message
        ),
        EventStatus::Started | EventStatus::Completed => info!(
            "[{}] {} {:?} {}",
            event.event_type(),
            event.key,
            event.status,
            message
        ),
    }
}

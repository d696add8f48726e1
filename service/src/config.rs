use chrono::NaiveDate;
use clap::builder::TypedValueParser as _;
use clap::{Parser, Subcommand};
use dotenvy::dotenv;
use log::LevelFilter;
use std::path::PathBuf;
use std::time::Duration;

/// Default telephony API base URL used when `TELEPHONY_BASE_URL` is not set.
pub const DEFAULT_TELEPHONY_BASE_URL: &str = "https://api.telephony.example/v1";

/// Default AssemblyAI API base URL used when `ASSEMBLYAI_BASE_URL` is not set.
pub const DEFAULT_ASSEMBLYAI_BASE_URL: &str = "https://api.assemblyai.com/v2";

/// Which stage (or all of them) a run executes.
#[derive(Clone, Debug, Subcommand)]
pub enum Command {
    /// Fetch call metadata for an inclusive UTC date range and print it as JSON.
    Fetch {
        /// First day (YYYY-MM-DD)
        #[arg(long)]
        start: NaiveDate,
        /// Last day, inclusive (YYYY-MM-DD)
        #[arg(long)]
        end: NaiveDate,
        /// Write the fetched calls to this JSON file as well
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Download recordings for the calls in a JSON file produced by `fetch`.
    Download {
        /// Path to a JSON array of call records
        #[arg(long)]
        calls: PathBuf,
    },
    /// Transcribe every audio file in the audio directory that has no transcript yet.
    Transcribe,
    /// Fetch, download and transcribe in one go.
    Run {
        #[arg(long)]
        start: NaiveDate,
        #[arg(long)]
        end: NaiveDate,
    },
}

#[derive(Clone, Debug, Parser)]
#[command(author, version, about, long_about = None)]
pub struct Config {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// The base URL of the telephony provider's REST API.
    /// Override in tests to point at a mock server.
    #[arg(long, env, default_value = DEFAULT_TELEPHONY_BASE_URL)]
    telephony_base_url: String,

    /// The client-credentials token endpoint. Defaults to `<base>/oauth/token`.
    #[arg(long, env)]
    telephony_token_url: Option<String>,

    /// OAuth client ID of the telephony account.
    #[arg(long, env)]
    telephony_client_id: Option<String>,

    /// OAuth client secret of the telephony account.
    #[arg(long, env, hide_env_values = true)]
    telephony_client_secret: Option<String>,

    /// The base URL of the AssemblyAI API.
    #[arg(long, env, default_value = DEFAULT_ASSEMBLYAI_BASE_URL)]
    assemblyai_base_url: String,

    /// The API key to use when calling the AssemblyAI API.
    #[arg(long, env, hide_env_values = true)]
    assemblyai_api_key: Option<String>,

    /// Directory downloaded recordings are written to
    #[arg(long, env, default_value = "./recordings")]
    pub audio_dir: PathBuf,

    /// Directory transcripts (and `raw/` JSON snapshots) are written to
    #[arg(long, env, default_value = "./transcripts")]
    pub transcripts_dir: PathBuf,

    /// Number of call-log entries requested per page
    #[arg(long, env, default_value_t = 500)]
    pub page_size: u32,

    /// Calls shorter than this many seconds are dropped
    #[arg(long, env, default_value_t = 0)]
    pub min_duration_secs: u64,

    /// Pause between days when walking a date range
    #[arg(long, env, default_value_t = 1000)]
    pub inter_day_delay_ms: u64,

    /// Recordings downloaded concurrently per chunk
    #[arg(long, env, default_value_t = 5)]
    pub download_batch_size: usize,

    /// Pause between download chunks
    #[arg(long, env, default_value_t = 2000)]
    pub download_batch_delay_ms: u64,

    /// Files transcribed concurrently per chunk
    #[arg(long, env, default_value_t = 3)]
    pub transcription_concurrency: usize,

    /// Seconds between transcription status polls
    #[arg(long, env, default_value_t = 3)]
    pub poll_interval_secs: u64,

    /// Wall-clock budget per transcription job, in seconds
    #[arg(long, env, default_value_t = 300)]
    pub transcription_timeout_secs: u64,

    /// Speech model requested from the transcription provider
    #[arg(long, env, default_value = "best")]
    pub speech_model: String,

    /// Language code requested from the transcription provider
    #[arg(long, env, default_value = "en")]
    pub language_code: String,

    /// Seconds a finished progress session is kept before eviction
    #[arg(long, env, default_value_t = 60)]
    pub session_ttl_secs: u64,

    /// Seconds between sweeps of expired progress sessions
    #[arg(long, env, default_value_t = 10)]
    pub session_sweep_interval_secs: u64,

    /// Per-request HTTP timeout in seconds
    #[arg(long, env, default_value_t = 30)]
    pub http_timeout_secs: u64,

    /// Retries of transient HTTP failures (5xx, 429, connect errors) on telephony calls
    #[arg(long, env, default_value_t = 0)]
    pub http_max_retries: u32,

    /// Set the log level verbosity threshold (level) to control what gets displayed on console output
    #[arg(
        short,
        long,
        env,
        default_value_t = LevelFilter::Info,
        value_parser = clap::builder::PossibleValuesParser::new(["OFF", "ERROR", "WARN", "INFO", "DEBUG", "TRACE"])
            .map(|s| s.parse::<LevelFilter>().unwrap()),
        )]
    pub log_level_filter: LevelFilter,
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

impl Config {
    pub fn new() -> Self {
        // Load .env file first
        dotenv().ok();
        // Then parse the command line parameters and flags
        Config::parse()
    }

    /// Parse from an explicit argument list without touching `.env`.
    pub fn from_args<I, T>(args: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        Config::try_parse_from(args)
    }

    pub fn telephony_base_url(&self) -> &str {
        self.telephony_base_url.trim_end_matches('/')
    }

    pub fn telephony_token_url(&self) -> String {
        self.telephony_token_url
            .clone()
            .unwrap_or_else(|| format!("{}/oauth/token", self.telephony_base_url()))
    }

    pub fn telephony_client_id(&self) -> Option<String> {
        self.telephony_client_id.clone()
    }

    pub fn telephony_client_secret(&self) -> Option<String> {
        self.telephony_client_secret.clone()
    }

    /// Returns the AssemblyAI API base URL.
    pub fn assemblyai_base_url(&self) -> &str {
        self.assemblyai_base_url.trim_end_matches('/')
    }

    /// Returns the AssemblyAI API key, if configured.
    pub fn assemblyai_api_key(&self) -> Option<String> {
        self.assemblyai_api_key.clone()
    }

    pub fn inter_day_delay(&self) -> Duration {
        Duration::from_millis(self.inter_day_delay_ms)
    }

    pub fn download_batch_delay(&self) -> Duration {
        Duration::from_millis(self.download_batch_delay_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn transcription_timeout(&self) -> Duration {
        Duration::from_secs(self.transcription_timeout_secs)
    }

    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_secs)
    }

    pub fn session_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.session_sweep_interval_secs)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::from_args(["call_pipeline_rs"]).unwrap();
        assert_eq!(config.page_size, 500);
        assert_eq!(config.inter_day_delay(), Duration::from_secs(1));
        assert_eq!(config.poll_interval(), Duration::from_secs(3));
        assert_eq!(config.transcription_timeout(), Duration::from_secs(300));
        assert_eq!(config.session_ttl(), Duration::from_secs(60));
        assert_eq!(config.log_level_filter, LevelFilter::Info);
        assert!(config.command.is_none());
    }

    #[test]
    fn test_token_url_defaults_to_base() {
        let config = Config::from_args([
            "call_pipeline_rs",
            "--telephony-base-url",
            "http://localhost:9000/api/",
        ])
        .unwrap();
        assert_eq!(config.telephony_base_url(), "http://localhost:9000/api");
        assert_eq!(
            config.telephony_token_url(),
            "http://localhost:9000/api/oauth/token"
        );
    }

    #[test]
    fn test_run_subcommand_parses_dates() {
        let config = Config::from_args([
            "call_pipeline_rs",
            "run",
            "--start",
            "2024-03-01",
            "--end",
            "2024-03-02",
        ])
        .unwrap();
        match config.command {
            Some(Command::Run { start, end }) => {
                assert_eq!(start.to_string(), "2024-03-01");
                assert_eq!(end.to_string(), "2024-03-02");
            }
            other => panic!("Expected run command, got {other:?}"),
        }
    }
}

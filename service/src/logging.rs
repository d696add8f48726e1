use crate::config::Config;
use log::LevelFilter;
use simplelog::{ColorChoice, ConfigBuilder, TermLogger, TerminalMode};

/// Log targets that drown out pipeline output below TRACE.
const NOISY_TARGETS: &[&str] = &[
    "reqwest",
    "reqwest_retry",
    "hyper",
    "hyper_util",
    "h2",
    "rustls",
    "mio",
    "tokio",
];

pub struct Logger {}

impl Logger {
    /// Install a terminal logger at the configured level.
    ///
    /// Below TRACE the HTTP stack and runtime targets are silenced.
    pub fn init_logger(config: &Config) {
        let level = config.log_level_filter;
        let log_config = Self::log_config(level);

        if let Err(e) = TermLogger::init(
            Self::to_simplelog(level),
            log_config,
            TerminalMode::Mixed,
            ColorChoice::Auto,
        ) {
            eprintln!("Failed to start simplelog: {e}");
        }
    }

    fn to_simplelog(level: LevelFilter) -> simplelog::LevelFilter {
        match level {
            LevelFilter::Off => simplelog::LevelFilter::Off,
            LevelFilter::Error => simplelog::LevelFilter::Error,
            LevelFilter::Warn => simplelog::LevelFilter::Warn,
            LevelFilter::Info => simplelog::LevelFilter::Info,
            LevelFilter::Debug => simplelog::LevelFilter::Debug,
            LevelFilter::Trace => simplelog::LevelFilter::Trace,
        }
    }

    fn silenced_targets(level: LevelFilter) -> &'static [&'static str] {
        if level == LevelFilter::Trace {
            &[]
        } else {
            NOISY_TARGETS
        }
    }

    fn log_config(level: LevelFilter) -> simplelog::Config {
        let mut builder = ConfigBuilder::new();
        builder.set_time_format_rfc3339();
        for target in Self::silenced_targets(level) {
            builder.add_filter_ignore_str(target);
        }
        builder.build()
    }
}

//! Ambient infrastructure shared by the pipeline: configuration and logging.

pub mod config;
pub mod logging;

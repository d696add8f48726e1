//! HTTP client building with middleware.

mod client;
mod retry;

pub use client::{ApiClient, HttpClientBuilder, HttpClientConfig};
pub use retry::BackoffPolicy;

//! Middleware-wrapped HTTP client used for telephony API calls.

use std::time::Duration;

use reqwest_middleware::ClientBuilder;
use reqwest_retry::RetryTransientMiddleware;

use super::BackoffPolicy;

/// Settings for [`HttpClientBuilder`].
#[derive(Debug, Clone, PartialEq)]
pub struct HttpClientConfig {
    /// Whole-request timeout, including the body.
    pub timeout: Duration,
    /// Transient-failure retries; 0 means a failed request is not repeated.
    pub max_retries: u32,
    pub user_agent: String,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_retries: 0,
            user_agent: concat!("call-pipeline/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

/// Client type the telephony gateway sends through.
pub type ApiClient = reqwest_middleware::ClientWithMiddleware;

/// Builds an [`ApiClient`]: rustls, timeout, user agent and transient-retry middleware.
///
/// Bearer tokens are not set here; they rotate on 401 and are attached per request.
#[derive(Debug, Default)]
pub struct HttpClientBuilder {
    config: HttpClientConfig,
}

impl HttpClientBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.config.max_retries = max_retries;
        self
    }

    pub fn build(self) -> Result<ApiClient, reqwest::Error> {
        let HttpClientConfig {
            timeout,
            max_retries,
            user_agent,
        } = self.config;

        let inner = reqwest::Client::builder()
            .use_rustls_tls()
            .timeout(timeout)
            .user_agent(user_agent)
            .build()?;

        Ok(ClientBuilder::new(inner)
            .with(RetryTransientMiddleware::new_with_policy(BackoffPolicy::new(
                max_retries,
            )))
            .build())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_do_not_retry() {
        let config = HttpClientBuilder::new().config;
        assert_eq!(config.timeout, Duration::from_secs(30));
        assert_eq!(config.max_retries, 0);
        assert!(config.user_agent.starts_with("call-pipeline/"));
    }

    #[test]
    fn test_overrides() {
        let config = HttpClientBuilder::new()
            .with_timeout(Duration::from_secs(5))
            .with_max_retries(2)
            .config;
        assert_eq!(
            config,
            HttpClientConfig {
                timeout: Duration::from_secs(5),
                max_retries: 2,
                ..HttpClientConfig::default()
            }
        );
    }

    #[tokio::test]
    async fn test_transient_failure_is_retried_when_enabled() {
        let mut server = mockito::Server::new_async().await;
        let failing = server
            .mock("GET", "/flaky")
            .with_status(503)
            .expect(2)
            .create_async()
            .await;

        let client = HttpClientBuilder::new().with_max_retries(1).build().unwrap();
        let response = client
            .get(format!("{}/flaky", server.url()))
            .send()
            .await
            .unwrap();

        assert_eq!(response.status(), 503);
        failing.assert_async().await;
    }
}

//! Telephony provider client: call-log pages, recording lookups and audio bodies.
//!
//! Every token-gated request goes through [`TokenCache::call_with_refresh`], so a
//! stale token is refreshed at most once per request and concurrent 401s share a
//! single refresh.

use crate::error::{external_error, internal_error, Error, ExternalErrorKind, InternalErrorKind};
use chrono::{Duration as ChronoDuration, NaiveDate};
use log::*;
use reqwest::StatusCode;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use service::config::Config;
use telephony_auth::http::{ApiClient, HttpClientBuilder};
use telephony_auth::token::{
    Authorized, ClientCredentials, ClientCredentialsSource, TokenCache, TokenSource,
};

/// One page of the call-log endpoint.
#[derive(Debug, Deserialize)]
pub struct CallPage {
    #[serde(default)]
    pub result: Vec<Value>,
    #[serde(default)]
    pub count: Option<u64>,
    /// `None` when the key is absent, `Some(None)` when it is explicitly null.
    #[serde(default, deserialize_with = "present_or_null")]
    pub next: Option<Option<Value>>,
}

fn present_or_null<'de, D>(deserializer: D) -> Result<Option<Option<Value>>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<Value>::deserialize(deserializer).map(Some)
}

impl CallPage {
    /// A full page continues the walk unless the provider explicitly cleared `next`.
    pub fn has_more(&self, page_size: u32) -> bool {
        let full = self.result.len() >= page_size as usize;
        let cursor_cleared = match &self.next {
            Some(None) => true,
            Some(Some(Value::String(cursor))) => cursor.trim().is_empty(),
            _ => false,
        };
        full && !cursor_cleared
    }
}

/// Provider-reported availability of a call's recording.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordingStatus {
    Available,
    Processing,
    Failed,
    NotFound,
}

impl RecordingStatus {
    fn parse(status: Option<&str>, has_url: bool) -> Self {
        match status.map(|s| s.trim().to_ascii_lowercase()).as_deref() {
            Some("available") => RecordingStatus::Available,
            Some("processing") | Some("in_progress") => RecordingStatus::Processing,
            Some("failed") | Some("error") => RecordingStatus::Failed,
            None | Some("") if has_url => RecordingStatus::Available,
            _ => RecordingStatus::Failed,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RecordingInfo {
    pub call_id: String,
    pub status: RecordingStatus,
    pub url: Option<String>,
    pub duration: Option<u64>,
    pub file_size: Option<u64>,
}

impl RecordingInfo {
    fn not_found(call_id: &str) -> Self {
        Self {
            call_id: call_id.to_string(),
            status: RecordingStatus::NotFound,
            url: None,
            duration: None,
            file_size: None,
        }
    }

    /// The URL to download, when the recording is ready.
    pub fn download_url(&self) -> Option<&str> {
        match self.status {
            RecordingStatus::Available => self.url.as_deref().filter(|u| !u.trim().is_empty()),
            _ => None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RecordingsResponse {
    #[serde(default)]
    recordings: Vec<RecordingEntry>,
}

#[derive(Debug, Deserialize)]
struct RecordingEntry {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    duration: Option<f64>,
    #[serde(default)]
    file_size: Option<u64>,
}

/// Telephony API client
pub struct TelephonyClient<S: TokenSource = ClientCredentialsSource> {
    http: ApiClient,
    base_url: String,
    credentials: ClientCredentials,
    tokens: TokenCache<S>,
}

impl TelephonyClient {
    /// Build a client from configuration; fails when credentials are missing.
    pub fn from_config(config: &Config) -> Result<Self, Error> {
        let (client_id, client_secret) =
            match (config.telephony_client_id(), config.telephony_client_secret()) {
                (Some(id), Some(secret)) if !id.is_empty() && !secret.is_empty() => (id, secret),
                _ => {
                    return Err(internal_error(
                        InternalErrorKind::Config,
                        "telephony client id and secret are required",
                    ))
                }
            };

        let credentials = ClientCredentials::new(
            &client_id,
            SecretString::new(client_secret),
            &config.telephony_token_url(),
        );
        let http = HttpClientBuilder::new()
            .with_timeout(config.http_timeout())
            .with_max_retries(config.http_max_retries)
            .build()?;
        let token_client = reqwest::Client::builder()
            .use_rustls_tls()
            .timeout(config.http_timeout())
            .build()?;

        Ok(Self::new(
            http,
            config.telephony_base_url(),
            credentials,
            ClientCredentialsSource::new(token_client),
        ))
    }
}

impl<S: TokenSource> TelephonyClient<S> {
    pub fn new(http: ApiClient, base_url: &str, credentials: ClientCredentials, source: S) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            credentials,
            tokens: TokenCache::new(source),
        }
    }

    /// Make sure a token can be obtained before any batch work starts.
    pub async fn authenticate(&self) -> Result<(), Error> {
        self.tokens.get_token(&self.credentials).await?;
        Ok(())
    }

    /// GET with the cached bearer token, retried once with a fresh token on 401.
    async fn authorized_get(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<reqwest::Response, Error> {
        self.tokens
            .call_with_refresh(&self.credentials, |token: SecretString| {
                let request = self
                    .http
                    .get(url)
                    .query(query)
                    .bearer_auth(token.expose_secret());
                async move {
                    let response = request.send().await.map_err(Error::from)?;
                    if response.status() == StatusCode::UNAUTHORIZED {
                        return Ok::<_, Error>(Authorized::Unauthorized);
                    }
                    Ok(Authorized::Ok(response))
                }
            })
            .await
    }

    /// Fetch one page (1-based) of calls that started within `day` (UTC).
    pub async fn fetch_call_page(
        &self,
        day: NaiveDate,
        page: u32,
        page_size: u32,
        min_duration: u64,
    ) -> Result<CallPage, Error> {
        let url = format!("{}/calls", self.base_url);
        let next_day = day + ChronoDuration::days(1);
        let query = [
            ("start_date", format!("{day}T00:00:00Z")),
            ("end_date", format!("{next_day}T00:00:00Z")),
            ("page_size", page_size.to_string()),
            ("min_duration", min_duration.to_string()),
            ("page", page.to_string()),
        ];

        debug!("Fetching calls for {day}, page {page}");
        let response = self.authorized_get(&url, &query).await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!("Call-log request for {day} page {page} failed with {status}");
            return Err(external_error(
                ExternalErrorKind::Provider(format!("call log returned {status}")),
                &format!("call log returned {status}: {body}"),
            ));
        }

        Ok(response.json::<CallPage>().await?)
    }

    /// Look up the recording of a call.
    pub async fn recording_info(&self, call_id: &str) -> Result<RecordingInfo, Error> {
        let url = format!(
            "{}/calls/{}/recordings",
            self.base_url,
            urlencoding::encode(call_id)
        );
        let response = self.authorized_get(&url, &[]).await?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            debug!("No recording for call {call_id}");
            return Ok(RecordingInfo::not_found(call_id));
        }
        if !status.is_success() {
            return Err(external_error(
                ExternalErrorKind::Provider(format!("recording lookup returned {status}")),
                &format!("recording lookup for {call_id} returned {status}"),
            ));
        }

        let body: RecordingsResponse = response.json().await?;
        let Some(entry) = body.recordings.into_iter().next() else {
            return Ok(RecordingInfo::not_found(call_id));
        };

        let url = entry.url.filter(|u| !u.trim().is_empty());
        Ok(RecordingInfo {
            call_id: call_id.to_string(),
            status: RecordingStatus::parse(entry.status.as_deref(), url.is_some()),
            url,
            duration: entry
                .duration
                .filter(|d| d.is_finite() && *d >= 0.0)
                .map(|d| d.round() as u64),
            file_size: entry.file_size,
        })
    }

    /// Start a plain GET of a recording body; the caller streams it.
    pub async fn download_recording(&self, url: &str) -> Result<reqwest::Response, Error> {
        let response = self.http.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(external_error(
                ExternalErrorKind::Provider(format!("recording download returned {status}")),
                &format!("recording download returned {status}"),
            ));
        }
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use mockito::Matcher;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use telephony_auth::token::Tokens;

    /// Hands out "tok-1", "tok-2", ...
    #[derive(Default)]
    struct SequentialSource {
        fetches: AtomicUsize,
    }

    #[async_trait]
    impl TokenSource for SequentialSource {
        async fn fetch_token(
            &self,
            _credentials: &ClientCredentials,
        ) -> Result<Tokens, telephony_auth::Error> {
            let n = self.fetches.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(Tokens {
                access_token: SecretString::new(format!("tok-{n}")),
                expires_at: None,
                token_type: "Bearer".to_string(),
            })
        }
    }

    fn client(base_url: &str) -> TelephonyClient<SequentialSource> {
        let http = HttpClientBuilder::new()
            .with_timeout(Duration::from_secs(5))
            .build()
            .unwrap();
        let credentials = ClientCredentials::new(
            "account",
            SecretString::new("secret".to_string()),
            "http://unused/token",
        );
        TelephonyClient::new(http, base_url, credentials, SequentialSource::default())
    }

    #[test]
    fn test_has_more_rules() {
        let page = |len: usize, next: Option<Option<Value>>| CallPage {
            result: vec![Value::Null; len],
            count: None,
            next,
        };

        assert!(page(2, None).has_more(2));
        assert!(!page(1, None).has_more(2));
        assert!(!page(2, Some(None)).has_more(2));
        assert!(!page(2, Some(Some(Value::String(String::new())))).has_more(2));
        assert!(page(2, Some(Some(Value::String("abc".into())))).has_more(2));
    }

    #[test]
    fn test_explicit_null_next_is_distinguished_from_absent() {
        let absent: CallPage = serde_json::from_str(r#"{"result": []}"#).unwrap();
        let null: CallPage = serde_json::from_str(r#"{"result": [], "next": null}"#).unwrap();
        assert!(absent.next.is_none());
        assert!(matches!(null.next, Some(None)));
    }

    #[test]
    fn test_recording_status_parsing() {
        assert_eq!(RecordingStatus::parse(Some("Available"), true), RecordingStatus::Available);
        assert_eq!(RecordingStatus::parse(Some("in_progress"), false), RecordingStatus::Processing);
        assert_eq!(RecordingStatus::parse(None, true), RecordingStatus::Available);
        assert_eq!(RecordingStatus::parse(None, false), RecordingStatus::Failed);
        assert_eq!(RecordingStatus::parse(Some("archived"), true), RecordingStatus::Failed);
    }

    #[tokio::test]
    async fn test_fetch_call_page_sends_window_and_bearer() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/calls")
            .match_header("authorization", "Bearer tok-1")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("start_date".into(), "2024-03-01T00:00:00Z".into()),
                Matcher::UrlEncoded("end_date".into(), "2024-03-02T00:00:00Z".into()),
                Matcher::UrlEncoded("page_size".into(), "500".into()),
                Matcher::UrlEncoded("min_duration".into(), "15".into()),
                Matcher::UrlEncoded("page".into(), "1".into()),
            ]))
            .with_status(200)
            .with_body(r#"{"result": [{"call_id": "a"}], "count": 1}"#)
            .create_async()
            .await;

        let day = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let page = client(&server.url())
            .fetch_call_page(day, 1, 500, 15)
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(page.result.len(), 1);
        assert_eq!(page.count, Some(1));
    }

    #[tokio::test]
    async fn test_recording_lookup_retries_once_after_401() {
        let mut server = mockito::Server::new_async().await;
        let stale = server
            .mock("GET", "/calls/c-1/recordings")
            .match_header("authorization", "Bearer tok-1")
            .with_status(401)
            .expect(1)
            .create_async()
            .await;
        let fresh = server
            .mock("GET", "/calls/c-1/recordings")
            .match_header("authorization", "Bearer tok-2")
            .with_status(200)
            .with_body(r#"{"recordings": [{"status": "available", "url": "https://rec/c-1", "duration": 61.6, "file_size": 1000}]}"#)
            .expect(1)
            .create_async()
            .await;

        let telephony = client(&server.url());
        let info = telephony.recording_info("c-1").await.unwrap();

        stale.assert_async().await;
        fresh.assert_async().await;
        assert_eq!(info.status, RecordingStatus::Available);
        assert_eq!(info.download_url(), Some("https://rec/c-1"));
        assert_eq!(info.duration, Some(62));
    }

    #[tokio::test]
    async fn test_second_401_is_an_auth_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/calls/c-1/recordings")
            .with_status(401)
            .expect(2)
            .create_async()
            .await;

        let err = client(&server.url()).recording_info("c-1").await.unwrap_err();
        assert!(err.is_auth());
    }

    #[tokio::test]
    async fn test_missing_recordings_are_not_found() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/calls/gone/recordings")
            .with_status(404)
            .create_async()
            .await;
        server
            .mock("GET", "/calls/empty/recordings")
            .with_status(200)
            .with_body(r#"{"recordings": []}"#)
            .create_async()
            .await;

        let telephony = client(&server.url());
        for call_id in ["gone", "empty"] {
            let info = telephony.recording_info(call_id).await.unwrap();
            assert_eq!(info.status, RecordingStatus::NotFound);
            assert!(info.download_url().is_none());
        }
    }

    #[tokio::test]
    async fn test_call_id_is_encoded_as_one_path_segment() {
        let mut server = mockito::Server::new_async().await;
        let lookup = server
            .mock("GET", "/calls/abc%3Fx%3D1%23frag%2Fy/recordings")
            .with_status(200)
            .with_body(r#"{"recordings": [{"status": "available", "url": "https://rec/abc"}]}"#)
            .expect(1)
            .create_async()
            .await;

        let info = client(&server.url())
            .recording_info("abc?x=1#frag/y")
            .await
            .unwrap();

        lookup.assert_async().await;
        assert_eq!(info.status, RecordingStatus::Available);
        assert_eq!(info.call_id, "abc?x=1#frag/y");
    }

    #[tokio::test]
    async fn test_provider_error_carries_status() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/calls")
            .match_query(Matcher::Any)
            .with_status(500)
            .with_body("boom")
            .create_async()
            .await;

        let day = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let err = client(&server.url())
            .fetch_call_page(day, 1, 10, 0)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("500"));
    }
}

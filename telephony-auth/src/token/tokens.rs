//! Bearer token types.

use chrono::{DateTime, Utc};
use secrecy::SecretString;
use serde::Deserialize;

/// A bearer token with metadata.
#[derive(Debug, Clone)]
pub struct Tokens {
    /// Access token for API requests.
    pub access_token: SecretString,
    /// When the access token expires, if the provider said so.
    pub expires_at: Option<DateTime<Utc>>,
    /// Token type (usually "Bearer").
    pub token_type: String,
}

impl Tokens {
    /// Check if the access token is expired or about to expire.
    ///
    /// Tokens without an expiry stay valid until a 401 invalidates them.
    pub fn is_expired(&self) -> bool {
        self.expires_at
            .map(|expires| expires <= Utc::now() + chrono::Duration::seconds(60))
            .unwrap_or(false)
    }
}

/// Body of a successful client-credentials exchange.
#[derive(Debug, Deserialize)]
pub(crate) struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub token_type: Option<String>,
}

impl TokenResponse {
    pub(crate) fn into_tokens(self) -> Tokens {
        Tokens {
            access_token: SecretString::new(self.access_token),
            expires_at: self
                .expires_in
                .map(|secs| Utc::now() + chrono::Duration::seconds(secs)),
            token_type: self.token_type.unwrap_or_else(|| "Bearer".to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn tokens(expires_at: Option<DateTime<Utc>>) -> Tokens {
        Tokens {
            access_token: SecretString::new("test".to_string()),
            expires_at,
            token_type: "Bearer".to_string(),
        }
    }

    #[test]
    fn test_token_without_expiry_never_expires() {
        assert!(!tokens(None).is_expired());
    }

    #[test]
    fn test_token_not_expired() {
        assert!(!tokens(Some(Utc::now() + Duration::hours(1))).is_expired());
    }

    #[test]
    fn test_token_expired() {
        assert!(tokens(Some(Utc::now() - Duration::hours(1))).is_expired());
    }

    #[test]
    fn test_token_response_defaults_to_bearer() {
        let response: TokenResponse =
            serde_json::from_str(r#"{"access_token":"abc"}"#).unwrap();
        let tokens = response.into_tokens();
        assert_eq!(tokens.token_type, "Bearer");
        assert!(tokens.expires_at.is_none());
    }
}

//! Client-credentials token exchange.

use async_trait::async_trait;
use log::*;
use secrecy::{ExposeSecret, SecretString};

use super::tokens::{TokenResponse, Tokens};
use crate::error::{token_error, Error, ErrorKind, TokenErrorKind};

/// Credentials of one telephony account.
#[derive(Debug, Clone)]
pub struct ClientCredentials {
    pub client_id: String,
    pub client_secret: SecretString,
    pub token_url: String,
}

impl ClientCredentials {
    pub fn new(client_id: &str, client_secret: SecretString, token_url: &str) -> Self {
        Self {
            client_id: client_id.to_string(),
            client_secret,
            token_url: token_url.to_string(),
        }
    }

    /// Key the token cache stores this account's token under.
    pub fn account(&self) -> &str {
        &self.client_id
    }
}

/// Something that can mint a fresh bearer token for an account.
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn fetch_token(&self, credentials: &ClientCredentials) -> Result<Tokens, Error>;
}

/// Form-encoded `grant_type=client_credentials` exchange against the account's token endpoint.
pub struct ClientCredentialsSource {
    client: reqwest::Client,
}

impl ClientCredentialsSource {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl TokenSource for ClientCredentialsSource {
    async fn fetch_token(&self, credentials: &ClientCredentials) -> Result<Tokens, Error> {
        debug!("Requesting access token for account {}", credentials.account());

        let response = self
            .client
            .post(&credentials.token_url)
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", credentials.client_id.as_str()),
                ("client_secret", credentials.client_secret.expose_secret().as_str()),
            ])
            .send()
            .await
            .map_err(|e| {
                warn!("Token endpoint unreachable: {:?}", e);
                Error {
                    source: Some(Box::new(e)),
                    error_kind: ErrorKind::Token(TokenErrorKind::ExchangeFailed),
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            error!("Token endpoint returned {}", status);
            return Err(token_error(
                TokenErrorKind::ExchangeFailed,
                &format!("token endpoint returned {}", status),
            ));
        }

        let body: TokenResponse = response.json().await.map_err(|e| {
            warn!("Failed to parse token response: {:?}", e);
            Error {
                source: Some(Box::new(e)),
                error_kind: ErrorKind::Token(TokenErrorKind::InvalidResponse),
            }
        })?;

        if body.access_token.is_empty() {
            return Err(token_error(
                TokenErrorKind::InvalidResponse,
                "token endpoint returned an empty access_token",
            ));
        }

        info!("Obtained access token for account {}", credentials.account());
        Ok(body.into_tokens())
    }
}

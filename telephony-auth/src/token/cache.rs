//! Per-account token cache with single-flight refresh.

use std::future::Future;
use std::sync::Arc;

use dashmap::DashMap;
use log::*;
use secrecy::{ExposeSecret, SecretString};
use tokio::sync::Mutex;

use super::{ClientCredentials, TokenSource, Tokens};
use crate::error::{token_error, Error, TokenErrorKind};

/// Outcome of one token-gated request attempt.
#[derive(Debug)]
pub enum Authorized<T> {
    /// The provider accepted the token.
    Ok(T),
    /// The provider answered 401; the token is stale.
    Unauthorized,
}

type Slot = Arc<Mutex<Option<Tokens>>>;

/// Holds one bearer token per account, fetched lazily and dropped on 401.
///
/// Each account has its own slot guarded by an async mutex. Fetches and refreshes
/// happen while holding the slot's lock, so when several concurrent requests
/// observe a 401 at the same time only the first one reaches the token endpoint;
/// the others wait on the lock and then pick up the fresh token.
pub struct TokenCache<S: TokenSource> {
    source: S,
    slots: DashMap<String, Slot>,
}

impl<S: TokenSource> TokenCache<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            slots: DashMap::new(),
        }
    }

    fn slot(&self, account: &str) -> Slot {
        self.slots
            .entry(account.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(None)))
            .clone()
    }

    /// Return the cached token for the account, fetching one on a miss.
    pub async fn get_token(&self, credentials: &ClientCredentials) -> Result<SecretString, Error> {
        let slot = self.slot(credentials.account());
        let mut cached = slot.lock().await;

        if let Some(tokens) = cached.as_ref().filter(|t| !t.is_expired()) {
            return Ok(tokens.access_token.clone());
        }

        debug!("No valid token cached for account {}", credentials.account());
        let tokens = self.source.fetch_token(credentials).await?;
        let access_token = tokens.access_token.clone();
        *cached = Some(tokens);
        Ok(access_token)
    }

    /// Replace `stale` with a freshly fetched token.
    ///
    /// If another caller already swapped the token out while we waited for the
    /// lock, its token is returned and no request is made.
    pub async fn refresh(
        &self,
        credentials: &ClientCredentials,
        stale: &SecretString,
    ) -> Result<SecretString, Error> {
        let slot = self.slot(credentials.account());
        let mut cached = slot.lock().await;

        if let Some(tokens) = cached.as_ref() {
            let replaced = tokens.access_token.expose_secret() != stale.expose_secret();
            if replaced && !tokens.is_expired() {
                debug!("Token was refreshed by another request");
                return Ok(tokens.access_token.clone());
            }
        }

        *cached = None;
        info!("Refreshing access token for account {}", credentials.account());
        let tokens = self.source.fetch_token(credentials).await?;
        let access_token = tokens.access_token.clone();
        *cached = Some(tokens);
        Ok(access_token)
    }

    /// Run a token-gated request, retrying it at most once after a 401.
    ///
    /// The first 401 refreshes the token and repeats `op` with the new token.
    /// A second consecutive 401 ends the call with `TokenErrorKind::Unauthorized`.
    pub async fn call_with_refresh<T, E, F, Fut>(
        &self,
        credentials: &ClientCredentials,
        mut op: F,
    ) -> Result<T, E>
    where
        F: FnMut(SecretString) -> Fut,
        Fut: Future<Output = Result<Authorized<T>, E>>,
        E: From<Error>,
    {
        let token = self.get_token(credentials).await?;
        if let Authorized::Ok(value) = op(token.clone()).await? {
            return Ok(value);
        }

        warn!(
            "Request for account {} was rejected with 401, refreshing token once",
            credentials.account()
        );
        let fresh = self.refresh(credentials, &token).await?;
        match op(fresh).await? {
            Authorized::Ok(value) => Ok(value),
            Authorized::Unauthorized => Err(token_error(
                TokenErrorKind::Unauthorized,
                "request rejected with 401 after token refresh",
            )
            .into()),
        }
    }
}

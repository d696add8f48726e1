//! # telephony-auth
//!
//! Authentication plumbing for the telephony provider used by the call pipeline:
//! - Client-credentials token exchange against the account's token endpoint
//! - An in-memory token cache with at most one refresh in flight per account
//! - A bounded (single) retry wrapper for requests rejected with HTTP 401
//! - HTTP client building with retry middleware
//!
//! ## Usage
//!
//! ```rust,ignore
//! use telephony_auth::{
//!     http::HttpClientBuilder,
//!     token::{Authorized, ClientCredentials, ClientCredentialsSource, TokenCache},
//! };
//!
//! let cache = TokenCache::new(ClientCredentialsSource::new(reqwest::Client::new()));
//! let calls = cache
//!     .call_with_refresh(&credentials, |token| async move { fetch_page(token).await })
//!     .await?;
//! ```

pub mod error;
pub mod http;
pub mod token;

// Re-export commonly used types
pub use error::{Error, ErrorKind};

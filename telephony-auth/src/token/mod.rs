//! Token acquisition, caching and the single-retry-on-401 contract.

mod cache;
mod source;
mod tokens;

pub use cache::{Authorized, TokenCache};
pub use source::{ClientCredentials, ClientCredentialsSource, TokenSource};
pub use tokens::Tokens;

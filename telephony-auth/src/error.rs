//! Error types for the `telephony-auth` crate.

use std::error::Error as StdError;
use std::fmt;

/// Root error of the crate: a kind plus the underlying cause, if any.
#[derive(Debug)]
pub struct Error {
    pub source: Option<Box<dyn StdError + Send + Sync>>,
    pub error_kind: ErrorKind,
}

#[derive(Debug, PartialEq)]
pub enum ErrorKind {
    Token(TokenErrorKind),
}

/// Errors from token acquisition and use.
#[derive(Debug, PartialEq)]
pub enum TokenErrorKind {
    /// The token endpoint was unreachable or answered with a non-2xx status.
    ExchangeFailed,
    /// The token endpoint answered 2xx but the body carried no usable token.
    InvalidResponse,
    /// A request was still rejected with 401 after one token refresh.
    Unauthorized,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let ErrorKind::Token(kind) = &self.error_kind;
        let label = match kind {
            TokenErrorKind::ExchangeFailed => "token exchange failed",
            TokenErrorKind::InvalidResponse => "invalid token response",
            TokenErrorKind::Unauthorized => "unauthorized after token refresh",
        };
        match &self.source {
            Some(source) => write!(f, "{label} ({source})"),
            None => write!(f, "{label}"),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn StdError + 'static))
    }
}

impl Error {
    /// True when the caller could not obtain, or could not use, a token.
    pub fn is_auth(&self) -> bool {
        matches!(self.error_kind, ErrorKind::Token(_))
    }
}

/// Token error carrying a plain message as its source.
pub fn token_error(kind: TokenErrorKind, message: &str) -> Error {
    Error {
        source: Some(message.to_string().into()),
        error_kind: ErrorKind::Token(kind),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_includes_source_message() {
        let err = token_error(
            TokenErrorKind::ExchangeFailed,
            "token endpoint returned 503 Service Unavailable",
        );
        assert_eq!(
            err.to_string(),
            "token exchange failed (token endpoint returned 503 Service Unavailable)"
        );
        assert!(err.is_auth());
    }
}

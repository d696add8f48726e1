//! Error types for transcription provider operations.

use std::fmt;

/// Universal error type that abstracts provider-specific errors into common variants.
///
/// Provider implementations map their native errors to these variants so the
/// batcher can tell a transport failure from a provider-reported one.
#[derive(Debug)]
pub enum Error {
    /// API key missing, invalid or rejected by the provider.
    Authentication(String),

    /// Network connectivity issues, DNS failures, or connection timeouts.
    Network(String),

    /// Provider-side business errors, including non-2xx API answers.
    Provider(String),

    /// Operation exceeded the configured timeout period.
    Timeout(String),

    /// Requested transcription does not exist.
    NotFound(String),

    /// A provider response did not have the expected shape.
    Deserialization(String),

    /// Catch-all for errors that don't fit other categories.
    Other(Box<dyn std::error::Error + Send + Sync>),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Authentication(msg) => write!(f, "Authentication failed: {}", msg),
            Error::Network(msg) => write!(f, "Network error: {}", msg),
            Error::Provider(msg) => write!(f, "Provider error: {}", msg),
            Error::Timeout(msg) => write!(f, "Timeout: {}", msg),
            Error::NotFound(msg) => write!(f, "Not found: {}", msg),
            Error::Deserialization(msg) => write!(f, "Unexpected response: {}", msg),
            Error::Other(err) => write!(f, "Other error: {}", err),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Other(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}

impl Error {
    /// Failures worth retrying on a later run rather than reporting as bad input.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Network(_) | Error::Timeout(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_variants() {
        assert!(Error::Network("reset".to_string()).is_transient());
        assert!(Error::Timeout("job t-1".to_string()).is_transient());
        assert!(!Error::NotFound("t-1".to_string()).is_transient());
        assert!(!Error::Authentication("bad key".to_string()).is_transient());
    }

    #[test]
    fn test_display_prefixes_category() {
        let err = Error::Deserialization("missing field `id`".to_string());
        assert_eq!(err.to_string(), "Unexpected response: missing field `id`");
    }
}

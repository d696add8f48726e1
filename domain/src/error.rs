//! Error types for the `domain` layer.
use std::error::Error as StdError;
use std::fmt;
use telephony_auth::error::Error as AuthError;
use transcription_ai::Error as ProviderError;

/// Top-level domain error type.
/// Errors in the Domain layer are modeled as a tree structure with
/// `domain::error::Error` as the root type holding a tree of `error_kind` enums.
/// The `source` field holds the original error (or a plain message) that caused
/// the domain error. Lower layers (`telephony-auth`, `transcription-ai`, reqwest,
/// the filesystem) are translated here so callers only ever see domain kinds.
///
/// Per-item failures are rendered with `Display` into the reason strings that
/// batch results carry, so the rendering always includes the source message.
#[derive(Debug)]
pub struct Error {
    pub source: Option<Box<dyn StdError + Send + Sync>>,
    pub error_kind: DomainErrorKind,
}

/// Enum representing the major categories of errors that can occur in the `domain` layer.
#[derive(Debug, PartialEq)]
pub enum DomainErrorKind {
    Internal(InternalErrorKind),
    External(ExternalErrorKind),
}

/// Errors raised before or outside any provider call.
#[derive(Debug, PartialEq)]
pub enum InternalErrorKind {
    /// Malformed input rejected before any external call (bad date range, filename, call id).
    Validation,
    /// Required configuration (credentials, keys) is missing.
    Config,
    /// Filesystem failure while reading audio or writing artifacts.
    Io,
    Other(String),
}

/// Errors caused by, or reported by, an external provider.
#[derive(Debug, PartialEq)]
pub enum ExternalErrorKind {
    /// Token exchange failed, or a request was still unauthorized after one refresh.
    Auth,
    /// The provider has nothing for the requested call or job.
    NotFound,
    /// Transport failure: connect, timeout of a single request, truncated body.
    Network,
    /// Transcription exceeded its wall-clock budget.
    Timeout,
    /// The provider answered, but with a failure (non-2xx, job status `error`, empty body).
    Provider(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let label = match &self.error_kind {
            DomainErrorKind::Internal(InternalErrorKind::Validation) => "Validation error",
            DomainErrorKind::Internal(InternalErrorKind::Config) => "Configuration error",
            DomainErrorKind::Internal(InternalErrorKind::Io) => "I/O error",
            DomainErrorKind::Internal(InternalErrorKind::Other(_)) => "Internal error",
            DomainErrorKind::External(ExternalErrorKind::Auth) => "Authentication error",
            DomainErrorKind::External(ExternalErrorKind::NotFound) => "Not found",
            DomainErrorKind::External(ExternalErrorKind::Network) => "Network error",
            DomainErrorKind::External(ExternalErrorKind::Timeout) => "Timeout",
            DomainErrorKind::External(ExternalErrorKind::Provider(_)) => "Provider error",
        };
        write!(f, "{label}")?;

        match (&self.error_kind, &self.source) {
            (_, Some(source)) => write!(f, ": {source}"),
            (DomainErrorKind::Internal(InternalErrorKind::Other(msg)), None)
            | (DomainErrorKind::External(ExternalErrorKind::Provider(msg)), None) => {
                write!(f, ": {msg}")
            }
            _ => Ok(()),
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
    pub fn is_timeout(&self) -> bool {
        self.error_kind == DomainErrorKind::External(ExternalErrorKind::Timeout)
    }

    pub fn is_auth(&self) -> bool {
        self.error_kind == DomainErrorKind::External(ExternalErrorKind::Auth)
    }
}

/// Helper to create a validation error with a message.
pub fn validation_error(message: &str) -> Error {
    internal_error(InternalErrorKind::Validation, message)
}

/// Helper to create an internal error with a message.
pub fn internal_error(kind: InternalErrorKind, message: &str) -> Error {
    Error {
        source: Some(message.to_string().into()),
        error_kind: DomainErrorKind::Internal(kind),
    }
}

/// Helper to create an external error with a message.
pub fn external_error(kind: ExternalErrorKind, message: &str) -> Error {
    Error {
        source: Some(message.to_string().into()),
        error_kind: DomainErrorKind::External(kind),
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        // Errors that result from issues building the reqwest::Client instance. This
        // type of error will occur prior to any network calls being made.
        if err.is_builder() {
            Error {
                source: Some(Box::new(err)),
                error_kind: DomainErrorKind::Internal(InternalErrorKind::Other(
                    "Failed to build reqwest client".to_string(),
                )),
            }
        } else if err.is_decode() {
            Error {
                source: Some(Box::new(err)),
                error_kind: DomainErrorKind::External(ExternalErrorKind::Provider(
                    "Unexpected response body".to_string(),
                )),
            }
        // Errors that result from issues with the network call itself.
        } else {
            Error {
                source: Some(Box::new(err)),
                error_kind: DomainErrorKind::External(ExternalErrorKind::Network),
            }
        }
    }
}

impl From<reqwest_middleware::Error> for Error {
    fn from(err: reqwest_middleware::Error) -> Self {
        match err {
            reqwest_middleware::Error::Reqwest(err) => err.into(),
            reqwest_middleware::Error::Middleware(err) => Error {
                source: Some(err.into()),
                error_kind: DomainErrorKind::External(ExternalErrorKind::Network),
            },
        }
    }
}

impl From<AuthError> for Error {
    fn from(err: AuthError) -> Self {
        Error {
            source: Some(Box::new(err)),
            error_kind: DomainErrorKind::External(ExternalErrorKind::Auth),
        }
    }
}

impl From<ProviderError> for Error {
    fn from(err: ProviderError) -> Self {
        // The provider's message becomes the source so Display does not repeat the label.
        let (error_kind, message) = match err {
            ProviderError::Authentication(msg) => (ExternalErrorKind::Auth, msg),
            // A request timing out is a transport failure; `Timeout` is reserved
            // for the transcription wall-clock budget.
            ProviderError::Network(msg) | ProviderError::Timeout(msg) => {
                (ExternalErrorKind::Network, msg)
            }
            ProviderError::NotFound(msg) => (ExternalErrorKind::NotFound, msg),
            ProviderError::Provider(msg) => (ExternalErrorKind::Provider(msg.clone()), msg),
            ProviderError::Deserialization(msg) => (
                ExternalErrorKind::Provider("Unexpected provider response".to_string()),
                msg,
            ),
            ProviderError::Other(source) => {
                return Error {
                    source: Some(source),
                    error_kind: DomainErrorKind::External(ExternalErrorKind::Provider(
                        "Unexpected provider failure".to_string(),
                    )),
                }
            }
        };
        Error {
            source: Some(message.into()),
            error_kind: DomainErrorKind::External(error_kind),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error {
            source: Some(Box::new(err)),
            error_kind: DomainErrorKind::Internal(InternalErrorKind::Io),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error {
            source: Some(Box::new(err)),
            error_kind: DomainErrorKind::Internal(InternalErrorKind::Other(
                "JSON encoding related error".to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use telephony_auth::error::{token_error, TokenErrorKind};

    #[test]
    fn test_display_includes_reason() {
        let err = validation_error("start date 2024-03-02 is after end date 2024-03-01");
        assert_eq!(
            err.to_string(),
            "Validation error: start date 2024-03-02 is after end date 2024-03-01"
        );
    }

    #[test]
    fn test_auth_errors_translate_to_auth_kind() {
        let err: Error = token_error(TokenErrorKind::ExchangeFailed, "token endpoint returned 500").into();
        assert!(err.is_auth());
        assert!(err.to_string().contains("token endpoint returned 500"));
    }

    #[test]
    fn test_provider_request_timeout_is_a_network_error() {
        let timed_out: Error = ProviderError::Timeout("operation timed out".to_string()).into();
        assert!(!timed_out.is_timeout());
        assert_eq!(
            timed_out.error_kind,
            DomainErrorKind::External(ExternalErrorKind::Network)
        );
        assert!(timed_out.to_string().contains("operation timed out"));
    }
}

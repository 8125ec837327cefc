//! Error handling for probing operations.
//!
//! This module defines a single error type covering every way a probe can
//! fail. Errors fall into three categories that must stay distinguishable:
//! transport failures and validation failures describe the *target*, while
//! internal errors describe a defect in the prober itself.

use std::fmt;
use std::time::Duration;

/// Broad classification of a [`ProberError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// The connection could not be established or was lost.
    Transport,
    /// The peer answered, but the answer failed an expectation.
    Validation,
    /// The prober is misconfigured or has a wiring bug.
    Internal,
}

/// Main error type for probing operations.
#[derive(Debug, Clone)]
pub enum ProberError {
    /// Connection refused, DNS failure, TLS handshake failure, reset, ...
    Transport {
        message: String,
        source: Option<String>,
    },

    /// The peer closed the connection before a response was classified.
    ConnectionClosed {
        message: String,
    },

    /// No response arrived within the step timeout
    Timeout {
        operation: String,
        duration: Duration,
    },

    /// A decoded response failed the named assertion.
    Validation {
        assertion: String,
        message: String,
    },

    /// A response could not be decoded at all (bad frame, bad XML, bad HTTP).
    Malformed {
        message: String,
        content: Option<String>,
    },

    /// Configuration errors (invalid settings, unknown sequence names, etc.)
    ConfigError {
        message: String,
    },

    /// File I/O errors when reading configuration, templates or certificates
    FileError {
        path: String,
        message: String,
    },

    /// Logic errors inside the prober (missing placeholder, no connection to reuse, ...)
    Internal {
        message: String,
    },
}

impl ProberError {
    /// Create a new transport error.
    pub fn transport<M: Into<String>>(message: M) -> Self {
        Self::Transport {
            message: message.into(),
            source: None,
        }
    }

    /// Create a new transport error with source information.
    pub fn transport_with_source<M: Into<String>, S: Into<String>>(message: M, source: S) -> Self {
        Self::Transport {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// Create a new connection-closed error.
    pub fn connection_closed<M: Into<String>>(message: M) -> Self {
        Self::ConnectionClosed {
            message: message.into(),
        }
    }

    /// Create a new timeout error.
    pub fn timeout<O: Into<String>>(operation: O, duration: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            duration,
        }
    }

    /// Create a new validation error for the named assertion.
    pub fn validation<A: Into<String>, M: Into<String>>(assertion: A, message: M) -> Self {
        Self::Validation {
            assertion: assertion.into(),
            message: message.into(),
        }
    }

    /// Create a new malformed-response error.
    pub fn malformed<M: Into<String>>(message: M) -> Self {
        Self::Malformed {
            message: message.into(),
            content: None,
        }
    }

    /// Create a new malformed-response error carrying the offending content.
    pub fn malformed_with_content<M: Into<String>, C: Into<String>>(message: M, content: C) -> Self {
        Self::Malformed {
            message: message.into(),
            content: Some(content.into()),
        }
    }

    /// Create a new configuration error.
    pub fn config<M: Into<String>>(message: M) -> Self {
        Self::ConfigError {
            message: message.into(),
        }
    }

    /// Create a new file error.
    pub fn file_error<P: Into<String>, M: Into<String>>(path: P, message: M) -> Self {
        Self::FileError {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create a new internal error.
    pub fn internal<M: Into<String>>(message: M) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Classify this error.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Transport { .. } | Self::ConnectionClosed { .. } | Self::Timeout { .. } => {
                ErrorCategory::Transport
            }
            Self::Validation { .. } | Self::Malformed { .. } => ErrorCategory::Validation,
            Self::ConfigError { .. } | Self::FileError { .. } | Self::Internal { .. } => {
                ErrorCategory::Internal
            }
        }
    }

    /// Whether the error means the target could not be reached.
    pub fn is_transport(&self) -> bool {
        self.category() == ErrorCategory::Transport
    }

    /// Whether the error means the target answered incorrectly.
    pub fn is_validation(&self) -> bool {
        self.category() == ErrorCategory::Validation
    }

    /// Whether the error points at a prober defect rather than the target.
    pub fn is_internal(&self) -> bool {
        self.category() == ErrorCategory::Internal
    }

    /// Name of the failed assertion, if this is a validation failure.
    pub fn assertion(&self) -> Option<&str> {
        match self {
            Self::Validation { assertion, .. } => Some(assertion),
            _ => None,
        }
    }
}

impl fmt::Display for ProberError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transport { message, source } => {
                if let Some(source) = source {
                    write!(f, "Transport error: {} (source: {})", message, source)
                } else {
                    write!(f, "Transport error: {}", message)
                }
            }
            Self::ConnectionClosed { message } => {
                write!(f, "Connection closed: {}", message)
            }
            Self::Timeout { operation, duration } => {
                write!(f, "Timeout after {:?} during: {}", duration, operation)
            }
            Self::Validation { assertion, message } => {
                write!(f, "Assertion '{}' failed: {}", assertion, message)
            }
            Self::Malformed { message, content: _ } => {
                write!(f, "Malformed response: {}", message)
            }
            Self::ConfigError { message } => {
                write!(f, "Configuration error: {}", message)
            }
            Self::FileError { path, message } => {
                write!(f, "File error at '{}': {}", path, message)
            }
            Self::Internal { message } => {
                write!(f, "Internal error: {}", message)
            }
        }
    }
}

impl std::error::Error for ProberError {}

impl From<std::io::Error> for ProberError {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind;

        match err.kind() {
            ErrorKind::UnexpectedEof
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::BrokenPipe => Self::connection_closed(err.to_string()),
            ErrorKind::TimedOut => Self::timeout("I/O operation", Duration::ZERO),
            _ => Self::transport_with_source("I/O failure", err.to_string()),
        }
    }
}

impl From<toml::de::Error> for ProberError {
    fn from(err: toml::de::Error) -> Self {
        Self::ConfigError {
            message: format!("Failed to parse TOML configuration: {}", err),
        }
    }
}

impl From<url::ParseError> for ProberError {
    fn from(err: url::ParseError) -> Self {
        Self::validation("redirect location", format!("invalid URL: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_categories() {
        assert!(ProberError::transport("refused").is_transport());
        assert!(ProberError::connection_closed("eof").is_transport());
        assert!(ProberError::timeout("read", Duration::from_secs(1)).is_transport());
        assert!(ProberError::validation("status", "404").is_validation());
        assert!(ProberError::malformed("bad frame").is_validation());
        assert!(ProberError::internal("no connection").is_internal());
        assert!(ProberError::config("bad").is_internal());
    }

    #[test]
    fn test_display_names_assertion() {
        let err = ProberError::validation("success result code", "got 2500");
        assert_eq!(err.assertion(), Some("success result code"));
        assert_eq!(
            err.to_string(),
            "Assertion 'success result code' failed: got 2500"
        );
    }

    #[test]
    fn test_io_error_conversion() {
        let reset = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        assert!(matches!(
            ProberError::from(reset),
            ProberError::ConnectionClosed { .. }
        ));

        let refused = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        assert!(matches!(
            ProberError::from(refused),
            ProberError::Transport { .. }
        ));
    }
}

//! Error handling for extkit operations.
//!
//! Every helper in the crate reports failures through [`ExtensionsError`].
//! The throttle is the one exception: task failures keep their own error type
//! and travel through [`ThrottleError`] only when cancellation is involved.

use std::fmt;

/// Main error type for extkit operations.
///
/// Validation variants (`MissingArgument`, `InvalidArgument`) are always
/// raised synchronously, before any I/O or asynchronous work starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtensionsError {
    /// A required input was absent (unset config section or field)
    MissingArgument { name: String },

    /// An argument violates a value constraint (blank text, zero limit, ...)
    InvalidArgument { name: String, reason: String },

    /// Reading from or seeking within a stream failed
    Io { message: String },

    /// Bytes could not be decoded as UTF-8
    Encoding { message: String },

    /// Malformed XML input
    Xml { message: String },

    /// Token construction or signing failed
    Token { message: String },

    /// Configuration errors (invalid settings, bad TOML)
    ConfigError { message: String },

    /// File I/O errors when reading configuration
    FileError { path: String, message: String },

    /// Generic internal errors that don't fit other categories
    Internal { message: String },
}

impl ExtensionsError {
    /// Create a new missing argument error.
    pub fn missing_argument<N: Into<String>>(name: N) -> Self {
        Self::MissingArgument { name: name.into() }
    }

    /// Create a new invalid argument error.
    pub fn invalid_argument<N: Into<String>, R: Into<String>>(name: N, reason: R) -> Self {
        Self::InvalidArgument {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Create a new malformed XML error.
    pub fn xml<M: Into<String>>(message: M) -> Self {
        Self::Xml {
            message: message.into(),
        }
    }

    /// Create a new token error.
    pub fn token<M: Into<String>>(message: M) -> Self {
        Self::Token {
            message: message.into(),
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

    /// Check if this error was raised by argument validation.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::MissingArgument { .. } | Self::InvalidArgument { .. }
        )
    }
}

impl fmt::Display for ExtensionsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingArgument { name } => {
                write!(f, "Missing required argument '{}'", name)
            }
            Self::InvalidArgument { name, reason } => {
                write!(f, "Invalid argument '{}': {}", name, reason)
            }
            Self::Io { message } => write!(f, "I/O error: {}", message),
            Self::Encoding { message } => write!(f, "Encoding error: {}", message),
            Self::Xml { message } => write!(f, "XML error: {}", message),
            Self::Token { message } => write!(f, "Token error: {}", message),
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

impl std::error::Error for ExtensionsError {}

// Implement From conversions for common error types
impl From<std::io::Error> for ExtensionsError {
    fn from(err: std::io::Error) -> Self {
        Self::Io {
            message: err.to_string(),
        }
    }
}

impl From<std::string::FromUtf8Error> for ExtensionsError {
    fn from(err: std::string::FromUtf8Error) -> Self {
        Self::Encoding {
            message: err.to_string(),
        }
    }
}

impl From<std::str::Utf8Error> for ExtensionsError {
    fn from(err: std::str::Utf8Error) -> Self {
        Self::Encoding {
            message: err.to_string(),
        }
    }
}

impl From<quick_xml::Error> for ExtensionsError {
    fn from(err: quick_xml::Error) -> Self {
        Self::xml(err.to_string())
    }
}

impl From<quick_xml::events::attributes::AttrError> for ExtensionsError {
    fn from(err: quick_xml::events::attributes::AttrError) -> Self {
        Self::xml(format!("invalid attribute: {}", err))
    }
}

#[cfg(feature = "auth")]
impl From<jsonwebtoken::errors::Error> for ExtensionsError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        Self::token(err.to_string())
    }
}

/// Failure of a cancellable throttled run.
///
/// `E` is the error type of the throttled tasks; it is carried as-is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ThrottleError<E> {
    /// A task failed; the first failure in input order
    Task(E),

    /// The run was cancelled before every task settled
    Cancelled {
        /// Tasks that were started
        admitted: usize,
        /// Admitted tasks that finished, in any order, before cancellation
        settled: usize,
    },
}

impl<E> ThrottleError<E> {
    /// Check if the run was cancelled.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }

    /// The task failure, if this is one.
    pub fn into_task_error(self) -> Option<E> {
        match self {
            Self::Task(err) => Some(err),
            Self::Cancelled { .. } => None,
        }
    }
}

impl<E: fmt::Display> fmt::Display for ThrottleError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Task(err) => write!(f, "Throttled task failed: {}", err),
            Self::Cancelled { admitted, settled } => write!(
                f,
                "Throttled run cancelled after admitting {} tasks ({} settled)",
                admitted, settled
            ),
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for ThrottleError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Task(err) => Some(err),
            Self::Cancelled { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn test_validation_classification() {
        assert!(ExtensionsError::missing_argument("tasks").is_validation());
        assert!(ExtensionsError::invalid_argument("limit", "must be positive").is_validation());
        assert!(!ExtensionsError::xml("unexpected end").is_validation());
    }

    #[test]
    fn test_display_messages() {
        let err = ExtensionsError::invalid_argument("tag_name", "cannot be blank");
        assert_eq!(err.to_string(), "Invalid argument 'tag_name': cannot be blank");

        let err = ExtensionsError::missing_argument("bearer");
        assert_eq!(err.to_string(), "Missing required argument 'bearer'");
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "short read");
        let err: ExtensionsError = io.into();
        assert!(matches!(err, ExtensionsError::Io { .. }));
        assert!(err.to_string().contains("short read"));
    }

    #[test]
    fn test_throttle_error_source() {
        let err: ThrottleError<ExtensionsError> =
            ThrottleError::Task(ExtensionsError::internal("boom"));
        assert!(!err.is_cancelled());
        assert!(err.source().is_some());

        let cancelled: ThrottleError<ExtensionsError> = ThrottleError::Cancelled {
            admitted: 3,
            settled: 1,
        };
        assert!(cancelled.is_cancelled());
        assert!(cancelled.source().is_none());
        assert_eq!(cancelled.into_task_error(), None);
    }
}

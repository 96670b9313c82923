//! Error type shared by every component of the execution layer.
//!
//! A non-zero exit status is *not* an error: it travels back to callers as
//! an ordinary exit code. Likewise a forcibly terminated process surfaces as
//! [`crate::runner::FORCED_TERMINATION`], not as an `Err`.

use std::time::Duration;

use thiserror::Error;

/// Errors raised by the execution and session layer.
#[derive(Debug, Error)]
pub enum Error {
    /// The command was empty or invalid, failed to spawn, or the process
    /// died immediately after creation.
    #[error("unable to start {command:?}: {reason}")]
    Startup { command: String, reason: String },

    /// A filesystem or pipe operation failed.
    #[error("{context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    /// An operation was attempted in a lifecycle state that does not allow it.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// A framed message could not be read, written or decoded.
    #[error("transport error: {0}")]
    Transport(String),

    /// A graceful transport shutdown did not complete within its bound.
    #[error("transport shutdown did not complete within {0:?}")]
    TransportShutdownTimeout(Duration),
}

impl Error {
    /// Wrap an [`std::io::Error`] with a human-readable context message.
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Build a [`Error::Startup`] for the given command tokens.
    pub fn startup(args: &[String], reason: impl Into<String>) -> Self {
        Self::Startup {
            command: args.join(" "),
            reason: reason.into(),
        }
    }

    /// Whether this error aborts a pipeline before any process ran.
    pub fn is_startup(&self) -> bool {
        matches!(self, Self::Startup { .. })
    }
}

/// Convenience alias used across the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn startup_error_joins_command_tokens() {
        let err = Error::startup(&["javac".to_string(), "-d".to_string()], "not found");
        assert!(err.is_startup());
        assert_eq!(err.to_string(), "unable to start \"javac -d\": not found");
    }

    #[test]
    fn io_error_keeps_source() {
        let err = Error::io(
            "failed to create /tmp/x",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        assert!(!err.is_startup());
        assert_eq!(err.to_string(), "failed to create /tmp/x");
        assert!(std::error::Error::source(&err).is_some());
    }
}

//! Error types for Ebb core operations.
//!
//! Following `TigerStyle`: all errors must be handled explicitly.
//! No silent failures, no ignored errors.

use thiserror::Error;

/// The result type for Ebb core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in Ebb core operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    /// An invalid argument was provided.
    #[error("invalid argument '{name}': {reason}")]
    InvalidArgument {
        /// The name of the argument.
        name: &'static str,
        /// Why it was invalid.
        reason: &'static str,
    },

    /// A configuration source could not be read or parsed.
    #[error("invalid configuration from {source_name}: {message}")]
    Config {
        /// Where the configuration came from (file path or "inline").
        source_name: String,
        /// What went wrong.
        message: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_argument_display() {
        let err = Error::InvalidArgument {
            name: "max_reason_bytes",
            reason: "must be positive",
        };
        assert_eq!(
            err.to_string(),
            "invalid argument 'max_reason_bytes': must be positive"
        );
    }
}

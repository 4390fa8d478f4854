//! Error types and result aliases for tributary primitives.
//!
//! These errors describe contract violations on the shared value types
//! (phases, packed arrays, resource scopes). They carry enough context to be
//! reported verbatim to callers.

/// The result type used throughout tributary-core.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur when working with core primitives.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// A string did not name one of the canonical phases.
    #[error("{name} is not a recognized phase")]
    UnrecognizedPhase {
        /// The rejected name.
        name: String,
    },

    /// A numeric code outside the phase table was decoded.
    #[error("phase code {code} is not a recognized phase")]
    InvalidPhaseCode {
        /// The rejected code.
        code: u64,
    },

    /// An index was outside the fixed bounds of an array.
    #[error("index {index} out of range for length {len}")]
    IndexOutOfRange {
        /// The requested index.
        index: usize,
        /// The fixed length of the array.
        len: usize,
    },

    /// A persisted form could not be decoded.
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of the decoding failure.
        message: String,
    },

    /// Invalid input was provided.
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl Error {
    /// Creates a new serialization error.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }
}

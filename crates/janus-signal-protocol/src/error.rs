//! Protocol error types.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors that can occur while encoding or decoding gateway messages.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Message exceeds maximum allowed size.
    #[error("message too large: {size} bytes (max: {max})")]
    MessageTooLarge { size: usize, max: usize },

    /// Failed to serialize or parse JSON.
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Empty text frame received.
    #[error("empty message")]
    EmptyMessage,

    /// The document is valid JSON but not an object.
    #[error("message is not a JSON object")]
    NotAnObject,

    /// A mandatory field is absent.
    #[error("missing field: {0}")]
    MissingField(&'static str),

    /// A field is present but has an unusable value.
    #[error("invalid field {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },

    /// Session description type is not one of offer/answer/pranswer/rollback.
    #[error("unknown session description type: {0}")]
    UnknownSdpType(String),
}

impl ProtocolError {
    /// Creates an invalid field error.
    pub fn invalid_field(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidField {
            field,
            reason: reason.into(),
        }
    }
}

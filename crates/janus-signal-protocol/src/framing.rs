//! Text frame encoding.
//!
//! One JSON document per text frame, no length prefix: the socket layer
//! already delimits frames. The codec only enforces a size limit and rejects
//! empty frames.

use serde::{Serialize, de::DeserializeOwned};

use crate::MAX_MESSAGE_SIZE;
use crate::error::{ProtocolError, ProtocolResult};

/// Encodes a message with the default size limit.
///
/// # Example
///
/// ```rust
/// use janus_signal_protocol::{encode_message, Envelope, Request};
///
/// let text = encode_message(&Envelope::new("t1", Request::Create)).unwrap();
/// assert!(text.starts_with('{'));
/// ```
pub fn encode_message<T: Serialize>(message: &T) -> ProtocolResult<String> {
    TextCodec::default().encode(message)
}

/// Decodes a message with the default size limit.
///
/// # Example
///
/// ```rust
/// use janus_signal_protocol::{decode_message, encode_message, Envelope, Request};
///
/// let text = encode_message(&Envelope::new("t1", Request::Create)).unwrap();
/// let decoded: Envelope<Request> = decode_message(&text).unwrap();
/// assert_eq!(decoded.transaction, "t1");
/// ```
pub fn decode_message<T: DeserializeOwned>(text: &str) -> ProtocolResult<T> {
    TextCodec::default().decode(text)
}

/// Size-limited JSON text codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextCodec {
    max_size: usize,
}

impl Default for TextCodec {
    fn default() -> Self {
        Self::new(MAX_MESSAGE_SIZE)
    }
}

impl TextCodec {
    /// Creates a codec rejecting frames larger than `max_size` bytes.
    pub fn new(max_size: usize) -> Self {
        Self { max_size }
    }

    /// Returns the size limit.
    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Serializes a message to a single text frame.
    pub fn encode<T: Serialize>(&self, message: &T) -> ProtocolResult<String> {
        let text = serde_json::to_string(message)?;
        self.check_size(text.len())?;
        Ok(text)
    }

    /// Parses a single text frame.
    pub fn decode<T: DeserializeOwned>(&self, text: &str) -> ProtocolResult<T> {
        if text.trim().is_empty() {
            return Err(ProtocolError::EmptyMessage);
        }
        self.check_size(text.len())?;
        Ok(serde_json::from_str(text)?)
    }

    fn check_size(&self, size: usize) -> ProtocolResult<()> {
        if size > self.max_size {
            return Err(ProtocolError::MessageTooLarge {
                size,
                max: self.max_size,
            });
        }
        Ok(())
    }
}

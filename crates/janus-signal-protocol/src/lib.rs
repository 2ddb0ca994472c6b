//! Wire format for the gateway signaling protocol.
//!
//! Messages are JSON documents carried one per text frame over a persistent
//! connection. Every request carries a `janus` discriminator and a
//! client-generated `transaction` id which the gateway echoes back in the
//! matching `ack`, `success`, `error` or `event` message.
//!
//! # Outgoing
//!
//! Requests are wrapped in an [`Envelope`] which adds the transaction id:
//!
//! ```rust
//! use janus_signal_protocol::{Envelope, Request, encode_message};
//!
//! let envelope = Envelope::new("abc123", Request::Create);
//! let text = encode_message(&envelope).unwrap();
//! assert!(text.contains("\"janus\":\"create\""));
//! ```
//!
//! # Inbound
//!
//! Inbound messages are kept as a parsed document and read through the
//! accessors on [`Inbound`]:
//!
//! ```rust
//! use janus_signal_protocol::{Discriminator, Inbound};
//!
//! let msg = Inbound::parse(r#"{"janus":"success","transaction":"abc123","data":{"id":1234567890123}}"#).unwrap();
//! assert_eq!(msg.kind(), Some(Discriminator::Success));
//! assert_eq!(msg.data_id(), Some(1234567890123));
//! ```

mod error;
mod framing;
mod inbound;
mod types;

pub use error::{ProtocolError, ProtocolResult};
pub use framing::{TextCodec, decode_message, encode_message};
pub use inbound::{Discriminator, Inbound, Lifecycle};
pub use types::{
    CandidatesCompleted, Envelope, GatewayError, IceCandidate, Jsep, Request, SdpType,
    TrickleCandidate,
};

/// Maximum text frame size (1 MB).
pub const MAX_MESSAGE_SIZE: usize = 1024 * 1024;

/// Plugin result value signalling success in plugin events.
pub const RESULT_OK: &str = "ok";

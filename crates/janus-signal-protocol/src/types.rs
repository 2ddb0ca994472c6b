//! Outgoing request types and the shared description/candidate payloads.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ProtocolError;

/// Request envelope adding the correlation id to a [`Request`].
///
/// The request fields are flattened next to `transaction`, so an envelope
/// serializes to the flat object the gateway expects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope<T> {
    /// Client-generated transaction id, echoed by the gateway.
    pub transaction: String,
    /// The request itself.
    #[serde(flatten)]
    pub payload: T,
}

impl<T> Envelope<T> {
    /// Wraps a payload with the given transaction id.
    pub fn new(transaction: impl Into<String>, payload: T) -> Self {
        Self {
            transaction: transaction.into(),
            payload,
        }
    }
}

/// Requests sent from the client to the gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "janus", rename_all = "snake_case")]
pub enum Request {
    /// Create a gateway session.
    Create,

    /// Attach a plugin handle to a session.
    Attach {
        session_id: u64,
        /// Plugin package name, e.g. `janus.plugin.echotest`.
        plugin: String,
    },

    /// Send a plugin message, optionally carrying a session description.
    Message {
        session_id: u64,
        handle_id: u64,
        body: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        jsep: Option<Jsep>,
    },

    /// Trickle one candidate, or signal the end of candidates.
    Trickle {
        session_id: u64,
        handle_id: u64,
        candidate: TrickleCandidate,
    },

    /// Keep the session from timing out.
    Keepalive { session_id: u64 },

    /// Tear down the PeerConnection of a handle.
    Hangup { session_id: u64, handle_id: u64 },

    /// Destroy the session and every handle in it.
    Destroy { session_id: u64 },
}

impl Request {
    /// Creates an attach request.
    pub fn attach(session_id: u64, plugin: impl Into<String>) -> Self {
        Self::Attach {
            session_id,
            plugin: plugin.into(),
        }
    }

    /// Creates a plugin message request.
    pub fn message(session_id: u64, handle_id: u64, body: Value, jsep: Option<Jsep>) -> Self {
        Self::Message {
            session_id,
            handle_id,
            body,
            jsep,
        }
    }

    /// Creates a trickle request.
    pub fn trickle(session_id: u64, handle_id: u64, candidate: TrickleCandidate) -> Self {
        Self::Trickle {
            session_id,
            handle_id,
            candidate,
        }
    }

    /// Returns the wire discriminator of this request.
    pub fn verb(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Attach { .. } => "attach",
            Self::Message { .. } => "message",
            Self::Trickle { .. } => "trickle",
            Self::Keepalive { .. } => "keepalive",
            Self::Hangup { .. } => "hangup",
            Self::Destroy { .. } => "destroy",
        }
    }
}

/// Session description type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
    Pranswer,
    Rollback,
}

impl SdpType {
    /// Returns the wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Offer => "offer",
            Self::Answer => "answer",
            Self::Pranswer => "pranswer",
            Self::Rollback => "rollback",
        }
    }
}

impl fmt::Display for SdpType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SdpType {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "offer" => Ok(Self::Offer),
            "answer" => Ok(Self::Answer),
            "pranswer" => Ok(Self::Pranswer),
            "rollback" => Ok(Self::Rollback),
            _ => Err(ProtocolError::UnknownSdpType(s.to_string())),
        }
    }
}

/// A local or remote session description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Jsep {
    #[serde(rename = "type")]
    pub kind: SdpType,
    pub sdp: String,
}

impl Jsep {
    /// Creates a description.
    pub fn new(kind: SdpType, sdp: impl Into<String>) -> Self {
        Self {
            kind,
            sdp: sdp.into(),
        }
    }

    /// Creates an offer.
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self::new(SdpType::Offer, sdp)
    }

    /// Creates an answer.
    pub fn answer(sdp: impl Into<String>) -> Self {
        Self::new(SdpType::Answer, sdp)
    }
}

/// One ICE candidate in the browser field layout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidate {
    #[serde(rename = "sdpMid")]
    pub sdp_mid: String,
    #[serde(rename = "sdpMLineIndex")]
    pub sdp_mline_index: u32,
    pub candidate: String,
}

impl IceCandidate {
    /// Creates a candidate.
    pub fn new(sdp_mid: impl Into<String>, sdp_mline_index: u32, candidate: impl Into<String>) -> Self {
        Self {
            sdp_mid: sdp_mid.into(),
            sdp_mline_index,
            candidate: candidate.into(),
        }
    }
}

/// End-of-candidates marker, `{"completed": true}` on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidatesCompleted {
    pub completed: bool,
}

/// The `candidate` member of a trickle message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TrickleCandidate {
    Completed(CandidatesCompleted),
    Candidate(IceCandidate),
}

impl TrickleCandidate {
    /// Creates the end-of-candidates marker.
    pub fn completed() -> Self {
        Self::Completed(CandidatesCompleted { completed: true })
    }

    /// Returns true for the end-of-candidates marker.
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed(c) if c.completed)
    }
}

impl From<IceCandidate> for TrickleCandidate {
    fn from(candidate: IceCandidate) -> Self {
        Self::Candidate(candidate)
    }
}

/// Error object carried by an `error` envelope or a plugin event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayError {
    pub code: i64,
    pub reason: String,
}

impl GatewayError {
    /// Creates a gateway error.
    pub fn new(code: i64, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }
}

impl fmt::Display for GatewayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.code, self.reason)
    }
}

impl std::error::Error for GatewayError {}

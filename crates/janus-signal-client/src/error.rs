//! Client error types.

use std::fmt;

use janus_signal_protocol::{GatewayError, ProtocolError};
use thiserror::Error;

use crate::session::State;

/// Result type for signaling operations.
pub type SignalingResult<T> = Result<T, SignalingError>;

/// Result type for facade operations.
pub type ClientResult<T> = Result<T, ClientError>;

/// Registry bookkeeping failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// A transaction with this id is already pending.
    #[error("transaction {0} is already pending")]
    DuplicateId(String),

    /// The registry was closed and accepts no new transactions.
    #[error("transaction registry is closed")]
    Closed,
}

/// Failure reported by the media engine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("media engine: {0}")]
pub struct MediaError(pub String);

impl MediaError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Failure reported by the transport.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("transport: {0}")]
pub struct TransportError(pub String);

impl TransportError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Everything that can go wrong while negotiating.
///
/// Cloneable so the same value can be returned to a caller and carried in a
/// [`SessionEvent`](crate::SessionEvent).
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SignalingError {
    /// Malformed or unexpected message from the gateway.
    #[error("protocol anomaly: {0}")]
    Protocol(String),

    /// Explicit error envelope from the gateway.
    #[error("gateway error: {0}")]
    Gateway(#[from] GatewayError),

    /// The plugin refused the join or configure request.
    #[error("negotiation failed: {0}")]
    Negotiation(String),

    /// The media engine could not produce or apply a description.
    #[error(transparent)]
    Collaborator(#[from] MediaError),

    /// The connection to the gateway is gone.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Operation not allowed in the current state.
    #[error("cannot {operation} while {state}")]
    InvalidState { operation: &'static str, state: State },

    /// Transaction bookkeeping failed.
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// The gateway expired the session.
    #[error("session timed out on the gateway")]
    SessionTimeout,
}

impl SignalingError {
    /// Creates an invalid state error.
    pub fn invalid_state(operation: &'static str, state: State) -> Self {
        Self::InvalidState { operation, state }
    }
}

impl From<ProtocolError> for SignalingError {
    fn from(err: ProtocolError) -> Self {
        Self::Protocol(err.to_string())
    }
}

/// Errors returned by the [`SignalingHandle`](crate::SignalingHandle).
#[derive(Debug)]
pub enum ClientError {
    /// Rejected before reaching the session.
    InvalidArgument(String),
    /// The signaling task has stopped.
    Closed,
    /// Could not reach the gateway.
    Connection(String),
}

impl ClientError {
    pub(crate) fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidArgument(msg) => write!(f, "invalid argument: {}", msg),
            Self::Closed => write!(f, "signaling client is closed"),
            Self::Connection(msg) => write!(f, "connection error: {}", msg),
        }
    }
}

impl std::error::Error for ClientError {}

impl From<tokio_tungstenite::tungstenite::Error> for ClientError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::Connection(err.to_string())
    }
}

//! Inbound message dispatch.
//!
//! Transactional replies (`success`, `error`, `event`) go to the
//! [`TransactionRegistry`]; `trickle` and lifecycle notifications go to the
//! session through [`SessionNotifications`]. Anything the router cannot
//! place is logged and dropped.

use std::fmt;
use std::sync::Arc;

use janus_signal_protocol::{
    Discriminator, GatewayError, Inbound, Lifecycle, TextCodec, TrickleCandidate,
};
use tracing::{trace, warn};

use crate::registry::{Outcome, TransactionRegistry};

/// Session-level notifications that are not tied to a transaction.
pub trait SessionNotifications {
    /// A candidate (or the end-of-candidates marker) trickled by the gateway.
    fn on_inbound_candidate(&mut self, candidate: TrickleCandidate);

    /// A lifecycle notification about the handle or session.
    fn on_lifecycle(&mut self, lifecycle: Lifecycle, message: &Inbound);
}

/// A message the router had to drop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Anomaly {
    /// Not JSON, not an object, or too large.
    Unparseable(String),
    /// No `janus` member.
    MissingDiscriminator,
    /// A `janus` value we do not know.
    UnknownDiscriminator(String),
    /// A transactional reply without `transaction`.
    MissingTransaction(Discriminator),
    /// A reply for a transaction that is not pending.
    UnknownTransaction(String),
    /// A known message with an unusable payload.
    Malformed(String),
}

impl fmt::Display for Anomaly {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unparseable(reason) => write!(f, "unparseable message: {}", reason),
            Self::MissingDiscriminator => write!(f, "message without janus discriminator"),
            Self::UnknownDiscriminator(kind) => write!(f, "unknown discriminator {}", kind),
            Self::MissingTransaction(kind) => write!(f, "{} without transaction", kind),
            Self::UnknownTransaction(id) => write!(f, "no pending transaction {}", id),
            Self::Malformed(reason) => write!(f, "malformed message: {}", reason),
        }
    }
}

/// What [`MessageRouter::route`] did with a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteOutcome {
    /// `ack`, nothing to do.
    Acknowledged,
    /// Matched a pending transaction.
    Transaction(Outcome),
    /// Handed a trickled candidate to the session.
    Candidate,
    /// Handed a lifecycle notification to the session.
    Lifecycle(Discriminator),
    /// Dropped.
    Anomaly(Anomaly),
}

/// Classifies inbound text and dispatches it.
pub struct MessageRouter<C> {
    registry: Arc<TransactionRegistry<C>>,
    codec: TextCodec,
}

impl<C> Clone for MessageRouter<C> {
    fn clone(&self) -> Self {
        Self {
            registry: self.registry.clone(),
            codec: self.codec,
        }
    }
}

impl<C: SessionNotifications> MessageRouter<C> {
    /// Creates a router feeding `registry`.
    pub fn new(registry: Arc<TransactionRegistry<C>>, codec: TextCodec) -> Self {
        Self { registry, codec }
    }

    /// Routes one text frame. Never panics on bad input.
    pub fn route(&self, text: &str, cx: &mut C) -> RouteOutcome {
        let message = match Inbound::parse_with(&self.codec, text) {
            Ok(message) => message,
            Err(e) => return anomaly(Anomaly::Unparseable(e.to_string())),
        };
        self.dispatch(message, cx)
    }

    /// Routes an already parsed message.
    pub fn dispatch(&self, message: Inbound, cx: &mut C) -> RouteOutcome {
        let kind = match (message.kind(), message.discriminator()) {
            (Some(kind), _) => kind,
            (None, Some(other)) => {
                return anomaly(Anomaly::UnknownDiscriminator(other.to_string()));
            }
            (None, None) => return anomaly(Anomaly::MissingDiscriminator),
        };
        trace!(kind = %kind, transaction = ?message.transaction(), "Inbound message");

        if kind.is_transactional() {
            return self.dispatch_transactional(kind, message, cx);
        }

        match kind {
            Discriminator::Ack => RouteOutcome::Acknowledged,
            Discriminator::Trickle => match message.candidate() {
                Ok(candidate) => {
                    cx.on_inbound_candidate(candidate);
                    RouteOutcome::Candidate
                }
                Err(e) => anomaly(Anomaly::Malformed(e.to_string())),
            },
            _ => match message.lifecycle() {
                Some(lifecycle) => {
                    cx.on_lifecycle(lifecycle, &message);
                    RouteOutcome::Lifecycle(kind)
                }
                None => anomaly(Anomaly::Malformed(format!("{} notification", kind))),
            },
        }
    }

    fn dispatch_transactional(
        &self,
        kind: Discriminator,
        message: Inbound,
        cx: &mut C,
    ) -> RouteOutcome {
        let Some(id) = message.transaction().map(str::to_owned) else {
            return anomaly(Anomaly::MissingTransaction(kind));
        };

        let outcome = match kind {
            Discriminator::Success => self.registry.resolve(&id, message, cx),
            Discriminator::Error => {
                let error = message
                    .gateway_error()
                    .unwrap_or_else(|| GatewayError::new(0, "error without details"));
                self.registry.fail(&id, error, cx)
            }
            _ => self.registry.notify(&id, message, cx),
        };

        match outcome {
            Outcome::NotFound => anomaly(Anomaly::UnknownTransaction(id)),
            outcome => RouteOutcome::Transaction(outcome),
        }
    }
}

fn anomaly(anomaly: Anomaly) -> RouteOutcome {
    warn!(anomaly = %anomaly, "Dropping inbound message");
    RouteOutcome::Anomaly(anomaly)
}

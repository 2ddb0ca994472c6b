//! Pending transaction bookkeeping.
//!
//! Every request awaiting a reply is registered here under its transaction
//! id together with its continuations. Inbound replies are matched by id:
//! `success` resolves, `error` fails, `event` notifies. Resolving or failing
//! removes the record; notifying does not.
//!
//! Continuations receive a caller-supplied context (`&mut C`) instead of
//! capturing it, so they only hold the data they need. They run after the
//! registry lock is released and may therefore register new transactions.

use std::collections::HashMap;
use std::fmt;
use std::time::{Duration, Instant};

use janus_signal_protocol::{GatewayError, Inbound};
use parking_lot::Mutex;
use tracing::{debug, trace};
use uuid::Uuid;

use crate::error::RegistryError;

/// Continuation run with the matching `success` message.
pub type SuccessFn<C> = Box<dyn FnOnce(&mut C, Inbound) + Send>;

/// Continuation run with the gateway error of an `error` message.
pub type ErrorFn<C> = Box<dyn FnOnce(&mut C, GatewayError) + Send>;

/// Continuation run for each plugin `event` referencing the transaction.
pub type EventFn<C> = Box<dyn FnMut(&mut C, Inbound) + Send>;

/// Generates a fresh transaction id (UUID v4, simple form: 32 hex chars).
pub fn new_transaction_id() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Request a transaction belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransactionKind {
    CreateSession,
    AttachHandle,
    Join,
    Configure,
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::CreateSession => "create-session",
            Self::AttachHandle => "attach-handle",
            Self::Join => "join",
            Self::Configure => "configure",
        })
    }
}

/// One outstanding request.
///
/// `on_success` and `on_error` are both `FnOnce`; whichever runs consumes the
/// record, so a transaction completes at most once.
pub struct Transaction<C> {
    id: String,
    kind: TransactionKind,
    on_success: SuccessFn<C>,
    on_error: ErrorFn<C>,
    on_event: Option<EventFn<C>>,
    registered_at: Instant,
}

impl<C> Transaction<C> {
    /// Creates a transaction with its terminal continuations.
    pub fn new(
        id: impl Into<String>,
        kind: TransactionKind,
        on_success: impl FnOnce(&mut C, Inbound) + Send + 'static,
        on_error: impl FnOnce(&mut C, GatewayError) + Send + 'static,
    ) -> Self {
        Self {
            id: id.into(),
            kind,
            on_success: Box::new(on_success),
            on_error: Box::new(on_error),
            on_event: None,
            registered_at: Instant::now(),
        }
    }

    /// Builder: keep the transaction open for plugin events.
    pub fn with_events(mut self, on_event: impl FnMut(&mut C, Inbound) + Send + 'static) -> Self {
        self.on_event = Some(Box::new(on_event));
        self
    }

    /// Returns the transaction id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns the request kind.
    pub fn kind(&self) -> TransactionKind {
        self.kind
    }

    /// Returns true if plugin events are delivered to this transaction.
    pub fn accepts_events(&self) -> bool {
        self.on_event.is_some()
    }

    /// Time since the transaction was created.
    pub fn age(&self) -> Duration {
        self.registered_at.elapsed()
    }
}

impl<C> fmt::Debug for Transaction<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("accepts_events", &self.accepts_events())
            .finish()
    }
}

/// Result of matching an inbound message against the registry.
#[must_use]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// `on_success` ran and the record was removed.
    Resolved,
    /// `on_error` ran and the record was removed.
    Failed,
    /// `on_event` ran; the record stays.
    Notified,
    /// The record exists but takes no events.
    Ignored,
    /// No pending transaction has this id.
    NotFound,
}

struct Pending<C> {
    transactions: HashMap<String, Transaction<C>>,
    closed: bool,
}

/// Pending transactions of one signaling session.
pub struct TransactionRegistry<C> {
    pending: Mutex<Pending<C>>,
}

impl<C> Default for TransactionRegistry<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> TransactionRegistry<C> {
    /// Creates an empty, open registry.
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(Pending {
                transactions: HashMap::new(),
                closed: false,
            }),
        }
    }

    /// Stores a transaction.
    pub fn register(&self, transaction: Transaction<C>) -> Result<(), RegistryError> {
        let mut pending = self.pending.lock();
        if pending.closed {
            return Err(RegistryError::Closed);
        }
        if pending.transactions.contains_key(&transaction.id) {
            return Err(RegistryError::DuplicateId(transaction.id));
        }

        trace!(transaction = %transaction.id, kind = %transaction.kind, "Registered transaction");
        pending
            .transactions
            .insert(transaction.id.clone(), transaction);
        Ok(())
    }

    /// Matches a `success` message and runs `on_success`.
    pub fn resolve(&self, id: &str, payload: Inbound, cx: &mut C) -> Outcome {
        let Some(transaction) = self.take(id) else {
            return Outcome::NotFound;
        };
        debug!(
            transaction = %id,
            kind = %transaction.kind,
            elapsed_ms = transaction.age().as_millis() as u64,
            "Resolved transaction"
        );
        (transaction.on_success)(cx, payload);
        Outcome::Resolved
    }

    /// Matches an `error` message and runs `on_error`.
    pub fn fail(&self, id: &str, error: GatewayError, cx: &mut C) -> Outcome {
        let Some(transaction) = self.take(id) else {
            return Outcome::NotFound;
        };
        debug!(
            transaction = %id,
            kind = %transaction.kind,
            code = error.code,
            "Failed transaction"
        );
        (transaction.on_error)(cx, error);
        Outcome::Failed
    }

    /// Matches an `event` message and runs `on_event`, keeping the record.
    pub fn notify(&self, id: &str, payload: Inbound, cx: &mut C) -> Outcome {
        let handler = {
            let mut pending = self.pending.lock();
            match pending.transactions.get_mut(id) {
                Some(transaction) => transaction.on_event.take(),
                None => return Outcome::NotFound,
            }
        };
        let Some(mut handler) = handler else {
            trace!(transaction = %id, "Event for transaction without event handler");
            return Outcome::Ignored;
        };

        handler(cx, payload);

        // Put the handler back unless the record went away meanwhile.
        let mut pending = self.pending.lock();
        if let Some(transaction) = pending.transactions.get_mut(id) {
            if transaction.on_event.is_none() {
                transaction.on_event = Some(handler);
            }
        }
        Outcome::Notified
    }

    /// Drops a transaction without running any continuation.
    pub fn abandon(&self, id: &str) -> bool {
        self.take(id).is_some()
    }

    /// Abandons every pending transaction and refuses new ones.
    ///
    /// Idempotent. Returns how many transactions were dropped.
    pub fn close(&self) -> usize {
        let dropped = {
            let mut pending = self.pending.lock();
            pending.closed = true;
            std::mem::take(&mut pending.transactions)
        };
        if !dropped.is_empty() {
            debug!(count = dropped.len(), "Abandoned pending transactions");
        }
        // Continuations are dropped here, outside the lock.
        dropped.len()
    }

    /// Returns true once [`close`](Self::close) was called.
    pub fn is_closed(&self) -> bool {
        self.pending.lock().closed
    }

    /// Number of pending transactions.
    pub fn count(&self) -> usize {
        self.pending.lock().transactions.len()
    }

    /// Returns true if `id` is pending.
    pub fn contains(&self, id: &str) -> bool {
        self.pending.lock().transactions.contains_key(id)
    }

    fn take(&self, id: &str) -> Option<Transaction<C>> {
        self.pending.lock().transactions.remove(id)
    }
}

impl<C> fmt::Debug for TransactionRegistry<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let pending = self.pending.lock();
        f.debug_struct("TransactionRegistry")
            .field("pending", &pending.transactions.len())
            .field("closed", &pending.closed)
            .finish()
    }
}

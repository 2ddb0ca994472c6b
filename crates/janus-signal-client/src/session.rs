//! The signaling state machine.
//!
//! One negotiation walks through
//!
//! ```text
//! Idle -> SessionRequested -> SessionReady -> HandleRequested -> HandleReady
//!      -> RoomJoining -> OfferPending -> Negotiating -> Connected
//! ```
//!
//! and ends in `Closed` (on request) or `Failed` (on the first error). Every
//! request-issuing step registers one transaction whose success continuation
//! performs the next step and whose error continuation fails the session.
//! Continuations get the session as their context argument, so the session
//! never hands out references to itself.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use janus_signal_core::{ClientConfig, RoomParams};
use janus_signal_protocol::{
    Envelope, IceCandidate, Inbound, Jsep, Lifecycle, RESULT_OK, Request, SdpType, TextCodec,
    TrickleCandidate,
};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::error::{SignalingError, SignalingResult, TransportError};
use crate::media::MediaEngine;
use crate::registry::{Transaction, TransactionKind, TransactionRegistry, new_transaction_id};
use crate::router::{MessageRouter, RouteOutcome, SessionNotifications};
use crate::transport::Transport;

/// Negotiation state, as observed from outside.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum State {
    Idle,
    SessionRequested,
    SessionReady,
    HandleRequested,
    HandleReady,
    RoomJoining,
    OfferPending,
    Negotiating,
    Connected,
    Closed,
    Failed,
}

impl State {
    /// Returns true for `Closed` and `Failed`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed | Self::Failed)
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Idle => "idle",
            Self::SessionRequested => "session requested",
            Self::SessionReady => "session ready",
            Self::HandleRequested => "handle requested",
            Self::HandleReady => "handle ready",
            Self::RoomJoining => "room joining",
            Self::OfferPending => "offer pending",
            Self::Negotiating => "negotiating",
            Self::Connected => "connected",
            Self::Closed => "closed",
            Self::Failed => "failed",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct HandleIds {
    session_id: u64,
    handle_id: u64,
}

/// State plus the identifiers that exist in it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    SessionRequested,
    SessionReady { session_id: u64 },
    HandleRequested { session_id: u64 },
    HandleReady(HandleIds),
    RoomJoining(HandleIds),
    OfferPending(HandleIds),
    Negotiating(HandleIds),
    Connected(HandleIds),
    Closed,
    Failed,
}

impl Phase {
    fn state(&self) -> State {
        match self {
            Self::Idle => State::Idle,
            Self::SessionRequested => State::SessionRequested,
            Self::SessionReady { .. } => State::SessionReady,
            Self::HandleRequested { .. } => State::HandleRequested,
            Self::HandleReady(_) => State::HandleReady,
            Self::RoomJoining(_) => State::RoomJoining,
            Self::OfferPending(_) => State::OfferPending,
            Self::Negotiating(_) => State::Negotiating,
            Self::Connected(_) => State::Connected,
            Self::Closed => State::Closed,
            Self::Failed => State::Failed,
        }
    }

    fn session_id(&self) -> Option<u64> {
        match self {
            Self::SessionReady { session_id } | Self::HandleRequested { session_id } => {
                Some(*session_id)
            }
            _ => self.handle_ids().map(|ids| ids.session_id),
        }
    }

    fn handle_ids(&self) -> Option<HandleIds> {
        match self {
            Self::HandleReady(ids)
            | Self::RoomJoining(ids)
            | Self::OfferPending(ids)
            | Self::Negotiating(ids)
            | Self::Connected(ids) => Some(*ids),
            _ => None,
        }
    }
}

/// Notifications emitted while the session runs.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// The state machine moved.
    StateChanged { from: State, to: State },
    /// The session failed; no further requests will be sent.
    Failed(SignalingError),
    /// A caller operation was refused without affecting the session.
    Rejected(SignalingError),
    /// Asynchronous notification from the gateway.
    Lifecycle(Lifecycle),
    /// A keepalive went out.
    KeepaliveSent { session_id: u64 },
    /// The session was closed.
    Closed,
}

/// Point-in-time view of a session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSnapshot {
    pub state: State,
    pub session_id: Option<u64>,
    pub handle_id: Option<u64>,
    /// Transactions still awaiting a reply or kept open for events.
    pub pending_transactions: usize,
    /// Remote candidates waiting for the remote description.
    pub queued_candidates: usize,
    /// The gateway reported the PeerConnection up.
    pub media_up: bool,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

type IdSource = Box<dyn FnMut() -> String + Send>;

/// Remote candidates kept while waiting for the remote description.
pub const MAX_QUEUED_CANDIDATES: usize = 256;

/// One negotiation with the gateway.
pub struct SignalingSession {
    phase: Phase,
    registry: Arc<TransactionRegistry<SignalingSession>>,
    router: MessageRouter<SignalingSession>,
    codec: TextCodec,
    media: Box<dyn MediaEngine>,
    transport: Option<Box<dyn Transport>>,
    plugin: String,
    room: RoomParams,
    destroy_on_close: bool,
    queued_candidates: Vec<TrickleCandidate>,
    media_up: bool,
    next_id: IdSource,
    events: Option<mpsc::UnboundedSender<SessionEvent>>,
    created_at: DateTime<Utc>,
    last_activity: DateTime<Utc>,
}

impl SignalingSession {
    /// Creates an idle session driving `media`.
    pub fn new(config: &ClientConfig, media: impl MediaEngine + 'static) -> Self {
        let registry = Arc::new(TransactionRegistry::new());
        let codec = TextCodec::new(config.max_message_size);
        let now = Utc::now();
        Self {
            phase: Phase::Idle,
            router: MessageRouter::new(registry.clone(), codec),
            registry,
            codec,
            media: Box::new(media),
            transport: None,
            plugin: config.plugin.clone(),
            room: config.room.clone(),
            destroy_on_close: config.destroy_on_close,
            queued_candidates: Vec::new(),
            media_up: false,
            next_id: Box::new(new_transaction_id),
            events: None,
            created_at: now,
            last_activity: now,
        }
    }

    /// Builder: replace the transaction id generator.
    pub fn with_transaction_ids(mut self, ids: impl FnMut() -> String + Send + 'static) -> Self {
        self.next_id = Box::new(ids);
        self
    }

    /// Builder: deliver [`SessionEvent`]s to `events`.
    pub fn with_events(mut self, events: mpsc::UnboundedSender<SessionEvent>) -> Self {
        self.events = Some(events);
        self
    }

    /// Current state.
    pub fn state(&self) -> State {
        self.phase.state()
    }

    /// Gateway session id, once assigned.
    pub fn session_id(&self) -> Option<u64> {
        self.phase.session_id()
    }

    /// Plugin handle id, once assigned.
    pub fn handle_id(&self) -> Option<u64> {
        self.phase.handle_ids().map(|ids| ids.handle_id)
    }

    /// Returns a snapshot of the session.
    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            state: self.state(),
            session_id: self.session_id(),
            handle_id: self.handle_id(),
            pending_transactions: self.registry.count(),
            queued_candidates: self.queued_candidates.len(),
            media_up: self.media_up,
            created_at: self.created_at,
            last_activity: self.last_activity,
        }
    }

    /// Installs the transport. Only allowed before negotiation starts.
    pub fn connect(&mut self, transport: Box<dyn Transport>) -> SignalingResult<()> {
        if self.phase != Phase::Idle {
            return Err(SignalingError::invalid_state("connect", self.state()));
        }
        if self.transport.replace(transport).is_some() {
            debug!("Replaced transport");
        }
        Ok(())
    }

    /// Creates a gateway session and drives the negotiation from there.
    pub fn start_negotiation(&mut self, plugin: String, room: RoomParams) -> SignalingResult<()> {
        if self.phase != Phase::Idle {
            return Err(SignalingError::invalid_state(
                "start negotiation",
                self.state(),
            ));
        }
        if self.transport.is_none() {
            return Err(TransportError::new("not connected").into());
        }

        info!(plugin = %plugin, "Starting negotiation");
        self.plugin = plugin;
        self.room = room;

        let transaction = Transaction::new(
            self.next_id(),
            TransactionKind::CreateSession,
            |session: &mut Self, reply| session.on_session_created(reply),
            |session: &mut Self, error| session.fail(error.into()),
        );
        self.transition(Phase::SessionRequested);
        self.issue(transaction, Request::Create)
    }

    /// Sends the local description produced by the media engine.
    pub fn submit_local_description(&mut self, kind: SdpType, sdp: String) -> SignalingResult<()> {
        let Phase::OfferPending(ids) = self.phase else {
            return Err(SignalingError::invalid_state(
                "submit a local description",
                self.state(),
            ));
        };

        let transaction = Transaction::new(
            self.next_id(),
            TransactionKind::Configure,
            |session: &mut Self, reply| session.on_configure_event(reply),
            |session: &mut Self, error| session.fail(error.into()),
        )
        .with_events(|session: &mut Self, event| session.on_configure_event(event));

        debug!(kind = %kind, sdp_len = sdp.len(), "Sending local description");
        let request = Request::message(
            ids.session_id,
            ids.handle_id,
            self.room.configure_body(),
            Some(Jsep::new(kind, sdp)),
        );
        self.transition(Phase::Negotiating(ids));
        self.issue(transaction, request)
    }

    /// Trickles one local candidate.
    pub fn submit_candidate(&mut self, candidate: IceCandidate) -> SignalingResult<()> {
        self.trickle("submit a candidate", candidate.into())
    }

    /// Tells the gateway there are no more local candidates.
    pub fn candidates_complete(&mut self) -> SignalingResult<()> {
        self.trickle("complete candidates", TrickleCandidate::completed())
    }

    /// Sends a keepalive if a gateway session exists.
    ///
    /// Returns the session id the keepalive was sent for.
    pub fn keepalive(&mut self) -> SignalingResult<Option<u64>> {
        if self.state().is_terminal() {
            return Ok(None);
        }
        let Some(session_id) = self.session_id() else {
            return Ok(None);
        };

        let id = self.next_id();
        if let Err(err) = self.send(&id, Request::Keepalive { session_id }) {
            self.fail(err.clone());
            return Err(err);
        }
        self.emit(SessionEvent::KeepaliveSent { session_id });
        Ok(Some(session_id))
    }

    /// Feeds one inbound text frame.
    pub fn on_transport_message(&mut self, text: &str) -> RouteOutcome {
        self.touch();
        let router = self.router.clone();
        router.route(text, self)
    }

    /// The connection is gone.
    pub fn on_transport_closed(&mut self) {
        self.transport = None;
        match self.phase {
            Phase::Closed | Phase::Failed => {}
            Phase::Idle => {
                info!("Transport closed before negotiation");
                self.shutdown();
            }
            _ => self.fail(TransportError::new("connection lost").into()),
        }
    }

    /// Tears the session down. Idempotent.
    ///
    /// Pending transactions are abandoned; their continuations never run.
    pub fn close(&mut self) {
        if self.phase == Phase::Closed {
            return;
        }

        let abandoned = self.registry.close();
        info!(state = %self.state(), abandoned, "Closing session");

        if let Some(ids) = self.phase.handle_ids() {
            let id = self.next_id();
            let hangup = Request::Hangup {
                session_id: ids.session_id,
                handle_id: ids.handle_id,
            };
            if let Err(err) = self.send(&id, hangup) {
                debug!(error = %err, "Hangup not sent");
            }
        }
        if let Some(session_id) = self.session_id().filter(|_| self.destroy_on_close) {
            let id = self.next_id();
            if let Err(err) = self.send(&id, Request::Destroy { session_id }) {
                debug!(error = %err, "Destroy not sent");
            }
        }

        if self.phase != Phase::Failed {
            self.media.close();
        }
        self.shutdown();
    }

    /// Reports a refused operation that left the session untouched.
    pub(crate) fn reject(&self, error: SignalingError) {
        self.emit(SessionEvent::Rejected(error));
    }

    fn shutdown(&mut self) {
        self.registry.close();
        self.queued_candidates.clear();
        self.transport = None;
        self.media_up = false;
        self.transition(Phase::Closed);
        self.emit(SessionEvent::Closed);
    }

    fn on_session_created(&mut self, reply: Inbound) {
        if self.phase != Phase::SessionRequested {
            return;
        }
        let Some(session_id) = reply.data_id() else {
            return self.fail(SignalingError::Protocol(
                "create reply without data.id".into(),
            ));
        };

        info!(session_id, "Session created");
        self.transition(Phase::SessionReady { session_id });

        let transaction = Transaction::new(
            self.next_id(),
            TransactionKind::AttachHandle,
            move |session: &mut Self, reply| session.on_handle_attached(session_id, reply),
            |session: &mut Self, error| session.fail(error.into()),
        );
        let request = Request::attach(session_id, self.plugin.clone());
        self.transition(Phase::HandleRequested { session_id });
        // Failures have already moved the session to Failed.
        let _ = self.issue(transaction, request);
    }

    fn on_handle_attached(&mut self, session_id: u64, reply: Inbound) {
        if self.phase != (Phase::HandleRequested { session_id }) {
            return;
        }
        let Some(handle_id) = reply.data_id() else {
            return self.fail(SignalingError::Protocol(
                "attach reply without data.id".into(),
            ));
        };

        info!(session_id, handle_id, plugin = %self.plugin, "Handle attached");
        let ids = HandleIds {
            session_id,
            handle_id,
        };
        self.transition(Phase::HandleReady(ids));

        let transaction = Transaction::new(
            self.next_id(),
            TransactionKind::Join,
            |session: &mut Self, reply| session.on_join_event(reply),
            |session: &mut Self, error| session.fail(error.into()),
        )
        .with_events(|session: &mut Self, event| session.on_join_event(event));
        let request = Request::message(session_id, handle_id, self.room.join_body(), None);
        self.transition(Phase::RoomJoining(ids));
        if self.issue(transaction, request).is_err() {
            return;
        }

        if let Err(err) = self.media.create_local_description() {
            return self.fail(err.into());
        }
        self.transition(Phase::OfferPending(ids));
    }

    fn on_join_event(&mut self, event: Inbound) {
        if self.state().is_terminal() {
            return;
        }
        if !self.check_plugin_result(&event, "join") {
            return;
        }
        self.take_remote_description(&event);
    }

    fn on_configure_event(&mut self, event: Inbound) {
        if self.state().is_terminal() {
            return;
        }
        if !self.check_plugin_result(&event, "configure") {
            return;
        }
        self.take_remote_description(&event);
    }

    /// Fails the session on a plugin error or a result other than "ok".
    fn check_plugin_result(&mut self, event: &Inbound, request: &str) -> bool {
        if let Some(err) = event.plugin_error() {
            self.fail(SignalingError::Negotiation(format!("{} refused: {}", request, err)));
            return false;
        }
        match event.plugin_result() {
            Some(RESULT_OK) => debug!(request, "Plugin accepted request"),
            Some(other) => {
                self.fail(SignalingError::Negotiation(format!(
                    "{} result {}",
                    request, other
                )));
                return false;
            }
            None => debug!(request, event = %event.as_value(), "Plugin event"),
        }
        true
    }

    fn take_remote_description(&mut self, event: &Inbound) {
        let jsep = match event.jsep() {
            Ok(Some(jsep)) => jsep,
            Ok(None) => return,
            Err(e) => return self.fail(e.into()),
        };

        let ids = match self.phase {
            Phase::Negotiating(ids) | Phase::Connected(ids) => ids,
            _ => {
                warn!(state = %self.state(), "Remote description before local one, ignored");
                return;
            }
        };

        debug!(kind = %jsep.kind, "Applying remote description");
        if let Err(err) = self.media.apply_remote_description(&jsep) {
            return self.fail(err.into());
        }
        if self.phase == Phase::Connected(ids) {
            return;
        }

        info!(session_id = ids.session_id, handle_id = ids.handle_id, "Connected");
        self.transition(Phase::Connected(ids));
        for candidate in std::mem::take(&mut self.queued_candidates) {
            self.apply_remote_candidate(candidate);
        }
    }

    fn apply_remote_candidate(&mut self, candidate: TrickleCandidate) {
        let result = match &candidate {
            TrickleCandidate::Candidate(ice) => self.media.add_remote_candidate(ice),
            done if done.is_completed() => self.media.end_of_remote_candidates(),
            TrickleCandidate::Completed(_) => Ok(()),
        };
        if let Err(err) = result {
            warn!(error = %err, "Media engine rejected remote candidate");
        }
    }

    fn trickle(&mut self, operation: &'static str, candidate: TrickleCandidate) -> SignalingResult<()> {
        let ids = match self.phase {
            Phase::HandleReady(ids)
            | Phase::RoomJoining(ids)
            | Phase::OfferPending(ids)
            | Phase::Negotiating(ids)
            | Phase::Connected(ids) => ids,
            _ => return Err(SignalingError::invalid_state(operation, self.state())),
        };

        let id = self.next_id();
        let request = Request::trickle(ids.session_id, ids.handle_id, candidate);
        if let Err(err) = self.send(&id, request) {
            self.fail(err.clone());
            return Err(err);
        }
        Ok(())
    }

    /// Registers `transaction` and sends `request` under its id.
    ///
    /// Any failure fails the session before being returned.
    fn issue(&mut self, transaction: Transaction<Self>, request: Request) -> SignalingResult<()> {
        let id = transaction.id().to_string();
        let result = self
            .registry
            .register(transaction)
            .map_err(SignalingError::from)
            .and_then(|()| self.send(&id, request));

        if let Err(err) = result {
            let _ = self.registry.abandon(&id);
            self.fail(err.clone());
            return Err(err);
        }
        Ok(())
    }

    fn send(&mut self, transaction: &str, request: Request) -> SignalingResult<()> {
        let verb = request.verb();
        let text = self.codec.encode(&Envelope::new(transaction, request))?;
        let transport = self
            .transport
            .as_mut()
            .ok_or_else(|| TransportError::new("not connected"))?;
        transport.send(text)?;

        debug!(transaction, verb, "Sent request");
        self.touch();
        Ok(())
    }

    fn fail(&mut self, error: SignalingError) {
        if self.state().is_terminal() {
            debug!(error = %error, "Error after session ended");
            return;
        }

        error!(error = %error, state = %self.state(), "Negotiation failed");
        let abandoned = self.registry.close();
        if abandoned > 0 {
            debug!(abandoned, "Abandoned pending transactions");
        }
        self.queued_candidates.clear();
        self.media.close();
        self.transition(Phase::Failed);
        self.emit(SessionEvent::Failed(error));
    }

    fn transition(&mut self, next: Phase) {
        let from = self.state();
        self.phase = next;
        let to = self.state();
        if from != to {
            debug!(from = %from, to = %to, "State changed");
            self.emit(SessionEvent::StateChanged { from, to });
        }
    }

    fn emit(&self, event: SessionEvent) {
        if let Some(events) = &self.events {
            // Nobody listening is fine.
            let _ = events.send(event);
        }
    }

    fn next_id(&mut self) -> String {
        (self.next_id)()
    }

    fn touch(&mut self) {
        self.last_activity = Utc::now();
    }
}

impl SessionNotifications for SignalingSession {
    fn on_inbound_candidate(&mut self, candidate: TrickleCandidate) {
        match self.phase {
            Phase::Connected(_) => self.apply_remote_candidate(candidate),
            Phase::Idle | Phase::Closed | Phase::Failed => {
                warn!(state = %self.state(), "Remote candidate outside negotiation, dropped");
            }
            _ if self.queued_candidates.len() >= MAX_QUEUED_CANDIDATES => {
                warn!(
                    limit = MAX_QUEUED_CANDIDATES,
                    "Remote candidate queue full, dropped"
                );
            }
            _ => {
                debug!(queued = self.queued_candidates.len() + 1, "Queueing remote candidate");
                self.queued_candidates.push(candidate);
            }
        }
    }

    fn on_lifecycle(&mut self, lifecycle: Lifecycle, message: &Inbound) {
        if self.state().is_terminal() {
            debug!(
                lifecycle = ?lifecycle,
                state = %self.state(),
                "Gateway notification after session ended, ignored"
            );
            return;
        }
        info!(
            lifecycle = ?lifecycle,
            session_id = ?message.session_id(),
            sender = ?message.sender(),
            "Gateway notification"
        );
        match &lifecycle {
            Lifecycle::WebrtcUp => self.media_up = true,
            Lifecycle::Hangup { .. } | Lifecycle::Detached => self.media_up = false,
            _ => {}
        }
        let expired = lifecycle == Lifecycle::Timeout;
        self.emit(SessionEvent::Lifecycle(lifecycle));
        if expired {
            self.fail(SignalingError::SessionTimeout);
        }
    }
}

impl fmt::Debug for SignalingSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignalingSession")
            .field("phase", &self.phase)
            .field("plugin", &self.plugin)
            .field("registry", &self.registry)
            .field("connected", &self.transport.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{MediaError, RegistryError};
    use crate::registry::Outcome;
    use crate::router::Anomaly;
    use crate::testing::{FakeMedia, MediaCall, drain_sent, sequential_ids};
    use janus_signal_protocol::{Discriminator, GatewayError};
    use serde_json::{Value, json};

    const PLUGIN: &str = "janus.plugin.echotest";

    struct Harness {
        session: SignalingSession,
        wire: mpsc::UnboundedReceiver<String>,
        events: mpsc::UnboundedReceiver<SessionEvent>,
        media: FakeMedia,
    }

    impl Harness {
        fn new() -> Self {
            Self::with(FakeMedia::new(), ClientConfig::default())
        }

        fn with(media: FakeMedia, config: ClientConfig) -> Self {
            let (transport, wire) = mpsc::unbounded_channel();
            let (events_tx, events) = mpsc::unbounded_channel();
            let mut session = SignalingSession::new(&config, media.clone())
                .with_transaction_ids(sequential_ids("t"))
                .with_events(events_tx);
            session.connect(Box::new(transport)).unwrap();
            Self {
                session,
                wire,
                events,
                media,
            }
        }

        fn start(&mut self) {
            self.session
                .start_negotiation(PLUGIN.to_string(), RoomParams::default())
                .unwrap();
        }

        fn feed(&mut self, text: &str) -> RouteOutcome {
            self.session.on_transport_message(text)
        }

        fn success(&mut self, transaction: &str, id: u64) -> RouteOutcome {
            self.feed(&format!(
                r#"{{"janus":"success","transaction":"{}","data":{{"id":{}}}}}"#,
                transaction, id
            ))
        }

        fn error(&mut self, transaction: &str, code: i64, reason: &str) -> RouteOutcome {
            self.feed(&format!(
                r#"{{"janus":"error","transaction":"{}","error":{{"code":{},"reason":"{}"}}}}"#,
                transaction, code, reason
            ))
        }

        fn event(&mut self, transaction: &str, data: Value, jsep: Option<Value>) -> RouteOutcome {
            let mut msg = json!({
                "janus": "event",
                "transaction": transaction,
                "sender": 42,
                "plugindata": {"plugin": PLUGIN, "data": data},
            });
            if let Some(jsep) = jsep {
                msg["jsep"] = jsep;
            }
            self.feed(&msg.to_string())
        }

        /// Drives the session to OfferPending: session 7, handle 42.
        fn to_offer_pending(&mut self) {
            self.start();
            self.success("t0", 7);
            self.success("t1", 42);
            assert_eq!(self.session.state(), State::OfferPending);
        }

        /// Drives the session to Connected.
        fn to_connected(&mut self) {
            self.to_offer_pending();
            self.session
                .submit_local_description(SdpType::Offer, "v=0 offer".into())
                .unwrap();
            self.event(
                "t3",
                json!({"result": "ok"}),
                Some(json!({"type": "answer", "sdp": "v=0 answer"})),
            );
            assert_eq!(self.session.state(), State::Connected);
        }

        fn sent(&mut self) -> Vec<Value> {
            drain_sent(&mut self.wire)
        }

        fn events(&mut self) -> Vec<SessionEvent> {
            let mut events = Vec::new();
            while let Ok(event) = self.events.try_recv() {
                events.push(event);
            }
            events
        }

        fn states(&mut self) -> Vec<State> {
            self.events()
                .into_iter()
                .filter_map(|event| match event {
                    SessionEvent::StateChanged { to, .. } => Some(to),
                    _ => None,
                })
                .collect()
        }

        fn failure(&mut self) -> Option<SignalingError> {
            self.events().into_iter().find_map(|event| match event {
                SessionEvent::Failed(err) => Some(err),
                _ => None,
            })
        }
    }

    #[test]
    fn state_display() {
        assert_eq!(State::Idle.to_string(), "idle");
        assert_eq!(State::OfferPending.to_string(), "offer pending");
        assert!(State::Failed.is_terminal());
        assert!(!State::Connected.is_terminal());
    }

    #[test]
    fn create_request_on_the_wire() {
        let (transport, mut wire) = mpsc::unbounded_channel::<String>();
        let mut ids = vec!["abc123".to_string()].into_iter();
        let mut session = SignalingSession::new(&ClientConfig::default(), FakeMedia::new())
            .with_transaction_ids(move || ids.next().unwrap_or_default());
        session.connect(Box::new(transport)).unwrap();
        session
            .start_negotiation(PLUGIN.to_string(), RoomParams::default())
            .unwrap();

        let frame = wire.try_recv().unwrap();
        insta::assert_snapshot!(frame, @r#"{"transaction":"abc123","janus":"create"}"#);
    }

    #[test]
    fn full_negotiation_reaches_connected() {
        let mut h = Harness::new();

        h.start();
        assert_eq!(h.session.state(), State::SessionRequested);
        assert_eq!(h.sent(), vec![json!({"janus": "create", "transaction": "t0"})]);

        h.success("t0", 1234567890123);
        assert_eq!(h.session.state(), State::HandleRequested);
        assert_eq!(h.session.session_id(), Some(1234567890123));
        assert_eq!(
            h.sent(),
            vec![json!({
                "janus": "attach",
                "transaction": "t1",
                "session_id": 1234567890123u64,
                "plugin": PLUGIN,
            })]
        );

        h.success("t1", 42);
        assert_eq!(h.session.state(), State::OfferPending);
        assert_eq!(h.session.handle_id(), Some(42));
        assert_eq!(
            h.sent(),
            vec![json!({
                "janus": "message",
                "transaction": "t2",
                "session_id": 1234567890123u64,
                "handle_id": 42,
                "body": {"audio": true, "video": true},
            })]
        );
        assert_eq!(h.media.calls(), vec![MediaCall::CreateLocal]);

        assert_eq!(
            h.event("t2", json!({"echotest": "event", "result": "ok"}), None),
            RouteOutcome::Transaction(Outcome::Notified)
        );
        assert_eq!(h.session.state(), State::OfferPending);

        h.session
            .submit_local_description(SdpType::Offer, "v=0 offer".into())
            .unwrap();
        assert_eq!(h.session.state(), State::Negotiating);
        assert_eq!(
            h.sent(),
            vec![json!({
                "janus": "message",
                "transaction": "t3",
                "session_id": 1234567890123u64,
                "handle_id": 42,
                "body": {"request": "configure", "audio": true, "video": true},
                "jsep": {"type": "offer", "sdp": "v=0 offer"},
            })]
        );

        assert_eq!(
            h.feed(r#"{"janus":"ack","transaction":"t3"}"#),
            RouteOutcome::Acknowledged
        );
        h.event(
            "t3",
            json!({"result": "ok"}),
            Some(json!({"type": "answer", "sdp": "v=0 answer"})),
        );
        assert_eq!(h.session.state(), State::Connected);
        assert_eq!(
            h.media.calls(),
            vec![
                MediaCall::CreateLocal,
                MediaCall::ApplyRemote(Jsep::answer("v=0 answer")),
            ]
        );

        assert_eq!(
            h.states(),
            vec![
                State::SessionRequested,
                State::SessionReady,
                State::HandleRequested,
                State::HandleReady,
                State::RoomJoining,
                State::OfferPending,
                State::Negotiating,
                State::Connected,
            ]
        );
    }

    #[test]
    fn large_session_id_observable_before_attach_reply() {
        let (transport, _wire) = mpsc::unbounded_channel::<String>();
        let mut ids = vec!["abc123".to_string(), "att".to_string()].into_iter();
        let mut session = SignalingSession::new(&ClientConfig::default(), FakeMedia::new())
            .with_transaction_ids(move || ids.next().unwrap_or_default());
        session.connect(Box::new(transport)).unwrap();
        session
            .start_negotiation(PLUGIN.to_string(), RoomParams::default())
            .unwrap();

        session.on_transport_message(
            r#"{"janus":"success","transaction":"abc123","data":{"id":1234567890123}}"#,
        );

        let snapshot = session.snapshot();
        assert_eq!(snapshot.state, State::HandleRequested);
        assert_eq!(snapshot.session_id, Some(1234567890123));
        assert_eq!(snapshot.handle_id, None);
        assert_eq!(snapshot.pending_transactions, 1);
    }

    #[test]
    fn create_error_fails_and_stops_requests() {
        let mut h = Harness::new();
        h.start();
        h.sent();

        assert_eq!(
            h.error("t0", 458, "no such session"),
            RouteOutcome::Transaction(Outcome::Failed)
        );
        assert_eq!(h.session.state(), State::Failed);
        assert_eq!(
            h.failure(),
            Some(SignalingError::Gateway(GatewayError::new(458, "no such session")))
        );

        assert_eq!(
            h.error("t0", 458, "no such session"),
            RouteOutcome::Anomaly(Anomaly::UnknownTransaction("t0".into()))
        );
        assert_eq!(h.session.keepalive().unwrap(), None);
        assert!(h.sent().is_empty());
        assert_eq!(h.session.snapshot().pending_transactions, 0);
    }

    #[test]
    fn create_reply_without_id_fails() {
        let mut h = Harness::new();
        h.start();
        h.feed(r#"{"janus":"success","transaction":"t0","data":{}}"#);

        assert_eq!(h.session.state(), State::Failed);
        assert!(matches!(h.failure(), Some(SignalingError::Protocol(_))));
    }

    #[test]
    fn attach_error_fails() {
        let mut h = Harness::new();
        h.start();
        h.success("t0", 7);
        h.error("t1", 460, "No such plugin");

        assert_eq!(h.session.state(), State::Failed);
        assert!(h.media.calls().is_empty());
    }

    #[test]
    fn join_refusal_fails() {
        let mut h = Harness::new();
        h.to_offer_pending();
        h.event("t2", json!({"error_code": 426, "error": "No such room"}), None);

        assert_eq!(h.session.state(), State::Failed);
        assert_eq!(
            h.failure(),
            Some(SignalingError::Negotiation(
                "join refused: 426 No such room".into()
            ))
        );
    }

    #[test]
    fn join_result_other_than_ok_fails() {
        let mut h = Harness::new();
        h.to_offer_pending();
        h.event("t2", json!({"result": "denied"}), None);
        assert_eq!(h.session.state(), State::Failed);
    }

    #[test]
    fn join_event_without_result_is_logged_only() {
        let mut h = Harness::new();
        h.to_offer_pending();
        h.event("t2", json!({"echotest": "event"}), None);
        assert_eq!(h.session.state(), State::OfferPending);
    }

    #[test]
    fn media_refusing_offer_fails() {
        let mut h = Harness::with(FakeMedia::refusing_offer(), ClientConfig::default());
        h.start();
        h.success("t0", 7);
        h.success("t1", 42);

        assert_eq!(h.session.state(), State::Failed);
        assert_eq!(
            h.failure(),
            Some(SignalingError::Collaborator(MediaError::new(
                "no capture device"
            )))
        );
    }

    #[test]
    fn media_refusing_answer_fails() {
        let mut h = Harness::with(FakeMedia::refusing_answer(), ClientConfig::default());
        h.to_offer_pending();
        h.session
            .submit_local_description(SdpType::Offer, "v=0".into())
            .unwrap();
        h.event(
            "t3",
            json!({"result": "ok"}),
            Some(json!({"type": "answer", "sdp": "v=0 answer"})),
        );

        assert_eq!(h.session.state(), State::Failed);
        assert_eq!(h.media.calls().last(), Some(&MediaCall::Close));
    }

    #[test]
    fn configure_error_fails() {
        let mut h = Harness::new();
        h.to_offer_pending();
        h.session
            .submit_local_description(SdpType::Offer, "v=0".into())
            .unwrap();
        h.error("t3", 465, "Error parsing SDP");
        assert_eq!(h.session.state(), State::Failed);
    }

    #[test]
    fn malformed_answer_fails() {
        let mut h = Harness::new();
        h.to_offer_pending();
        h.session
            .submit_local_description(SdpType::Offer, "v=0".into())
            .unwrap();
        h.event("t3", json!({"result": "ok"}), Some(json!({"type": "weird"})));
        assert!(matches!(h.failure(), Some(SignalingError::Protocol(_))));
    }

    #[test]
    fn operations_rejected_in_wrong_state() {
        let mut h = Harness::new();

        let err = h
            .session
            .submit_local_description(SdpType::Offer, "v=0".into())
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "cannot submit a local description while idle"
        );

        let err = h
            .session
            .submit_candidate(IceCandidate::new("0", 0, "candidate:1 ..."))
            .unwrap_err();
        assert_eq!(
            err,
            SignalingError::invalid_state("submit a candidate", State::Idle)
        );

        h.start();
        let err = h
            .session
            .start_negotiation(PLUGIN.to_string(), RoomParams::default())
            .unwrap_err();
        assert_eq!(
            err,
            SignalingError::invalid_state("start negotiation", State::SessionRequested)
        );
        assert_eq!(h.session.state(), State::SessionRequested);
    }

    #[test]
    fn start_without_transport_is_refused() {
        let mut session = SignalingSession::new(&ClientConfig::default(), FakeMedia::new());
        let err = session
            .start_negotiation(PLUGIN.to_string(), RoomParams::default())
            .unwrap_err();
        assert!(matches!(err, SignalingError::Transport(_)));
        assert_eq!(session.state(), State::Idle);
    }

    #[test]
    fn outbound_candidates_are_trickled() {
        let mut h = Harness::new();
        h.to_offer_pending();
        h.sent();

        h.session
            .submit_candidate(IceCandidate::new("0", 0, "candidate:1 ..."))
            .unwrap();
        h.session.candidates_complete().unwrap();

        assert_eq!(
            h.sent(),
            vec![
                json!({
                    "janus": "trickle",
                    "transaction": "t3",
                    "session_id": 7,
                    "handle_id": 42,
                    "candidate": {"sdpMid": "0", "sdpMLineIndex": 0, "candidate": "candidate:1 ..."},
                }),
                json!({
                    "janus": "trickle",
                    "transaction": "t4",
                    "session_id": 7,
                    "handle_id": 42,
                    "candidate": {"completed": true},
                }),
            ]
        );
        // Trickles are not tracked.
        assert_eq!(h.session.snapshot().pending_transactions, 1);
    }

    #[test]
    fn inbound_candidates_queued_until_connected() {
        let mut h = Harness::new();
        h.to_offer_pending();

        let trickle = r#"{"janus":"trickle","session_id":7,"sender":42,"candidate":{"sdpMid":"0","sdpMLineIndex":0,"candidate":"candidate:1 ..."}}"#;
        assert_eq!(h.feed(trickle), RouteOutcome::Candidate);
        h.feed(r#"{"janus":"trickle","session_id":7,"sender":42,"candidate":{"completed":true}}"#);
        assert_eq!(h.session.snapshot().queued_candidates, 2);
        assert_eq!(h.media.calls(), vec![MediaCall::CreateLocal]);

        h.session
            .submit_local_description(SdpType::Offer, "v=0".into())
            .unwrap();
        h.event(
            "t3",
            json!({"result": "ok"}),
            Some(json!({"type": "answer", "sdp": "v=0 answer"})),
        );

        let candidate = IceCandidate::new("0", 0, "candidate:1 ...");
        assert_eq!(
            h.media.calls(),
            vec![
                MediaCall::CreateLocal,
                MediaCall::ApplyRemote(Jsep::answer("v=0 answer")),
                MediaCall::AddCandidate(candidate.clone()),
                MediaCall::EndOfCandidates,
            ]
        );
        assert_eq!(h.session.snapshot().queued_candidates, 0);

        h.feed(trickle);
        assert_eq!(
            h.media.calls().last(),
            Some(&MediaCall::AddCandidate(candidate))
        );
    }

    #[test]
    fn inbound_candidate_while_idle_is_dropped() {
        let mut h = Harness::new();
        h.feed(r#"{"janus":"trickle","candidate":{"completed":true}}"#);
        assert_eq!(h.session.snapshot().queued_candidates, 0);
        assert!(h.media.calls().is_empty());
    }

    #[test]
    fn close_during_offer_pending_runs_no_continuation() {
        let mut h = Harness::new();
        h.to_offer_pending();
        h.sent();
        h.events();

        h.session.close();
        assert_eq!(h.session.state(), State::Closed);
        assert_eq!(
            h.sent(),
            vec![
                json!({"janus": "hangup", "transaction": "t3", "session_id": 7, "handle_id": 42}),
                json!({"janus": "destroy", "transaction": "t4", "session_id": 7}),
            ]
        );
        assert_eq!(h.session.snapshot().pending_transactions, 0);

        // The join reply arrives late: nothing may react to it.
        assert_eq!(
            h.event("t2", json!({"result": "denied"}), None),
            RouteOutcome::Anomaly(Anomaly::UnknownTransaction("t2".into()))
        );
        assert_eq!(h.session.state(), State::Closed);
        assert_eq!(
            h.events(),
            vec![
                SessionEvent::StateChanged {
                    from: State::OfferPending,
                    to: State::Closed
                },
                SessionEvent::Closed,
            ]
        );
        assert_eq!(
            h.media.calls(),
            vec![MediaCall::CreateLocal, MediaCall::Close]
        );

        let err = h
            .session
            .submit_local_description(SdpType::Offer, "v=0".into())
            .unwrap_err();
        assert_eq!(
            err,
            SignalingError::invalid_state("submit a local description", State::Closed)
        );
    }

    #[test]
    fn close_is_idempotent() {
        let mut h = Harness::new();
        h.start();
        h.success("t0", 7);
        h.sent();

        h.session.close();
        h.session.close();

        assert_eq!(
            h.sent(),
            vec![json!({"janus": "destroy", "transaction": "t2", "session_id": 7})]
        );
        let closed = h
            .events()
            .into_iter()
            .filter(|event| *event == SessionEvent::Closed)
            .count();
        assert_eq!(closed, 1);
    }

    #[test]
    fn close_without_destroy() {
        let config = ClientConfig::default().with_destroy_on_close(false);
        let mut h = Harness::with(FakeMedia::new(), config);
        h.start();
        h.success("t0", 7);
        h.sent();

        h.session.close();
        assert!(h.sent().is_empty());
    }

    #[test]
    fn registration_after_close_is_refused() {
        let mut h = Harness::new();
        h.session.close();
        let err = h
            .session
            .start_negotiation(PLUGIN.to_string(), RoomParams::default())
            .unwrap_err();
        assert_eq!(
            err,
            SignalingError::invalid_state("start negotiation", State::Closed)
        );
        assert!(h.session.registry.is_closed());
        assert_eq!(
            h.session.registry.register(Transaction::new(
                "late",
                TransactionKind::CreateSession,
                |_: &mut SignalingSession, _| {},
                |_: &mut SignalingSession, _| {},
            )),
            Err(RegistryError::Closed)
        );
    }

    #[test]
    fn transport_loss_mid_negotiation_fails() {
        let mut h = Harness::new();
        h.to_offer_pending();
        h.session.on_transport_closed();

        assert_eq!(h.session.state(), State::Failed);
        assert_eq!(
            h.failure(),
            Some(SignalingError::Transport(TransportError::new(
                "connection lost"
            )))
        );
    }

    #[test]
    fn transport_loss_while_idle_closes() {
        let mut h = Harness::new();
        h.session.on_transport_closed();
        assert_eq!(h.session.state(), State::Closed);
        assert!(h.events().contains(&SessionEvent::Closed));
    }

    #[test]
    fn send_failure_fails_session() {
        let mut h = Harness::new();
        h.start();
        drop(std::mem::replace(&mut h.wire, mpsc::unbounded_channel().1));

        h.success("t0", 7);
        assert_eq!(h.session.state(), State::Failed);
        assert!(matches!(h.failure(), Some(SignalingError::Transport(_))));
        assert_eq!(h.session.snapshot().pending_transactions, 0);
    }

    #[test]
    fn keepalive_needs_a_session() {
        let mut h = Harness::new();
        assert_eq!(h.session.keepalive().unwrap(), None);

        h.start();
        h.success("t0", 7);
        h.sent();
        h.events();

        assert_eq!(h.session.keepalive().unwrap(), Some(7));
        assert_eq!(
            h.sent(),
            vec![json!({"janus": "keepalive", "transaction": "t2", "session_id": 7})]
        );
        assert_eq!(
            h.events(),
            vec![SessionEvent::KeepaliveSent { session_id: 7 }]
        );
    }

    #[test]
    fn lifecycle_notifications() {
        let mut h = Harness::new();
        h.to_connected();
        h.events();

        h.feed(r#"{"janus":"webrtcup","session_id":7,"sender":42}"#);
        assert!(h.session.snapshot().media_up);

        h.feed(r#"{"janus":"hangup","session_id":7,"sender":42,"reason":"DTLS alert"}"#);
        assert!(!h.session.snapshot().media_up);
        assert_eq!(
            h.events(),
            vec![
                SessionEvent::Lifecycle(Lifecycle::WebrtcUp),
                SessionEvent::Lifecycle(Lifecycle::Hangup {
                    reason: Some("DTLS alert".into())
                }),
            ]
        );
        assert_eq!(h.session.state(), State::Connected);
    }

    #[test]
    fn lifecycle_after_close_is_ignored() {
        let mut h = Harness::new();
        h.to_offer_pending();
        h.session.close();
        h.events();

        assert_eq!(
            h.feed(r#"{"janus":"webrtcup","session_id":7,"sender":42}"#),
            RouteOutcome::Lifecycle(Discriminator::WebrtcUp)
        );
        h.feed(r#"{"janus":"timeout","session_id":7}"#);

        let snapshot = h.session.snapshot();
        assert_eq!(snapshot.state, State::Closed);
        assert!(!snapshot.media_up);
        assert!(h.events().is_empty());
    }

    #[test]
    fn lifecycle_after_failure_is_ignored() {
        let mut h = Harness::new();
        h.to_connected();
        h.session.on_transport_closed();
        h.events();

        h.feed(r#"{"janus":"webrtcup","session_id":7,"sender":42}"#);
        assert_eq!(h.session.state(), State::Failed);
        assert!(!h.session.snapshot().media_up);
        assert!(h.events().is_empty());
    }

    #[test]
    fn refused_remote_candidate_is_not_fatal() {
        let mut h = Harness::with(FakeMedia::refusing_candidates(), ClientConfig::default());
        h.to_connected();

        h.feed(r#"{"janus":"trickle","session_id":7,"sender":42,"candidate":{"sdpMid":"9","sdpMLineIndex":9,"candidate":"candidate:1 ..."}}"#);
        h.feed(r#"{"janus":"trickle","session_id":7,"sender":42,"candidate":{"completed":true}}"#);

        assert_eq!(h.session.state(), State::Connected);
        assert_eq!(h.failure(), None);
        assert_eq!(
            &h.media.calls()[2..],
            &[
                MediaCall::AddCandidate(IceCandidate::new("9", 9, "candidate:1 ...")),
                MediaCall::EndOfCandidates,
            ]
        );
    }

    #[test]
    fn refused_queued_candidates_do_not_stop_the_flush() {
        let mut h = Harness::with(FakeMedia::refusing_candidates(), ClientConfig::default());
        h.to_offer_pending();
        h.feed(r#"{"janus":"trickle","session_id":7,"sender":42,"candidate":{"sdpMid":"0","sdpMLineIndex":0,"candidate":"candidate:1 ..."}}"#);
        h.feed(r#"{"janus":"trickle","session_id":7,"sender":42,"candidate":{"sdpMid":"0","sdpMLineIndex":0,"candidate":"candidate:2 ..."}}"#);
        h.feed(r#"{"janus":"trickle","session_id":7,"sender":42,"candidate":{"completed":true}}"#);

        h.session
            .submit_local_description(SdpType::Offer, "v=0".into())
            .unwrap();
        h.event(
            "t3",
            json!({"result": "ok"}),
            Some(json!({"type": "answer", "sdp": "v=0 answer"})),
        );

        assert_eq!(h.session.state(), State::Connected);
        assert_eq!(h.failure(), None);
        assert_eq!(h.session.snapshot().queued_candidates, 0);
        assert_eq!(
            &h.media.calls()[2..],
            &[
                MediaCall::AddCandidate(IceCandidate::new("0", 0, "candidate:1 ...")),
                MediaCall::AddCandidate(IceCandidate::new("0", 0, "candidate:2 ...")),
                MediaCall::EndOfCandidates,
            ]
        );
    }

    #[test]
    fn candidate_queue_is_bounded() {
        let mut h = Harness::new();
        h.to_offer_pending();

        let trickle = r#"{"janus":"trickle","session_id":7,"sender":42,"candidate":{"sdpMid":"0","sdpMLineIndex":0,"candidate":"candidate:1 ..."}}"#;
        for _ in 0..MAX_QUEUED_CANDIDATES + 10 {
            h.feed(trickle);
        }

        assert_eq!(
            h.session.snapshot().queued_candidates,
            MAX_QUEUED_CANDIDATES
        );
        assert_eq!(h.session.state(), State::OfferPending);
    }

    #[test]
    fn gateway_timeout_fails_session() {
        let mut h = Harness::new();
        h.to_connected();
        h.feed(r#"{"janus":"timeout","session_id":7}"#);

        assert_eq!(h.session.state(), State::Failed);
        assert_eq!(h.failure(), Some(SignalingError::SessionTimeout));
    }

    #[test]
    fn connect_only_while_idle() {
        let mut h = Harness::new();
        h.start();
        let (transport, _wire) = mpsc::unbounded_channel::<String>();
        let err = h.session.connect(Box::new(transport)).unwrap_err();
        assert_eq!(
            err,
            SignalingError::invalid_state("connect", State::SessionRequested)
        );
    }
}

//! The signaling task and its handle.
//!
//! [`SignalingClient::run`] owns the [`SignalingSession`] and processes
//! commands one at a time, so the session is never touched concurrently.
//! Caller operations, media engine callbacks and transport input all reach it
//! through a cloneable [`SignalingHandle`]. Handle methods never block and can
//! be called from any thread.

use std::future;
use std::str::FromStr;

use janus_signal_core::{ClientConfig, RoomParams};
use janus_signal_protocol::{IceCandidate, SdpType};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::error::{ClientError, ClientResult, SignalingResult};
use crate::media::MediaEngine;
use crate::session::{SessionEvent, SessionSnapshot, SignalingSession, State};
use crate::transport::Transport;

/// Commands processed by the signaling task.
pub(crate) enum Command {
    Connect(Box<dyn Transport>),
    StartNegotiation { plugin: String, room: RoomParams },
    LocalDescription { kind: SdpType, sdp: String },
    Candidate(IceCandidate),
    CandidatesComplete,
    TransportMessage(String),
    TransportClosed,
    Snapshot(oneshot::Sender<SessionSnapshot>),
    Close,
}

impl Command {
    fn name(&self) -> &'static str {
        match self {
            Self::Connect(_) => "connect",
            Self::StartNegotiation { .. } => "start-negotiation",
            Self::LocalDescription { .. } => "local-description",
            Self::Candidate(_) => "candidate",
            Self::CandidatesComplete => "candidates-complete",
            Self::TransportMessage(_) => "transport-message",
            Self::TransportClosed => "transport-closed",
            Self::Snapshot(_) => "snapshot",
            Self::Close => "close",
        }
    }
}

/// Runs one signaling session.
pub struct SignalingClient {
    config: ClientConfig,
    command_tx: mpsc::UnboundedSender<Command>,
    command_rx: mpsc::UnboundedReceiver<Command>,
    events_tx: Option<mpsc::UnboundedSender<SessionEvent>>,
}

impl SignalingClient {
    /// Creates a client; nothing runs until [`run`](Self::run).
    pub fn new(config: ClientConfig) -> Self {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        Self {
            config,
            command_tx,
            command_rx,
            events_tx: None,
        }
    }

    /// Returns a handle for driving the session.
    pub fn handle(&self) -> SignalingHandle {
        SignalingHandle {
            command_tx: self.command_tx.clone(),
        }
    }

    /// Returns the stream of [`SessionEvent`]s. Replaces any earlier stream.
    pub fn events(&mut self) -> mpsc::UnboundedReceiver<SessionEvent> {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        self.events_tx = Some(events_tx);
        events_rx
    }

    /// Returns the configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Spawns [`run`](Self::run) on the current runtime.
    pub fn spawn(self, media: impl MediaEngine + 'static) -> JoinHandle<()> {
        tokio::spawn(self.run(media))
    }

    /// Processes commands until closed or every handle is dropped.
    pub async fn run(self, media: impl MediaEngine + 'static) {
        let Self {
            config,
            command_tx,
            mut command_rx,
            events_tx,
        } = self;
        // Only handles keep the loop alive.
        drop(command_tx);

        let mut session = SignalingSession::new(&config, media);
        if let Some(events_tx) = events_tx {
            session = session.with_events(events_tx);
        }

        let mut keepalive = config.keepalive_interval().map(|period| {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval
        });

        info!(
            gateway = %config.gateway_url,
            keepalive_secs = config.keepalive_interval_secs,
            "Signaling client started"
        );

        loop {
            tokio::select! {
                command = command_rx.recv() => {
                    let Some(command) = command else {
                        debug!("All handles dropped");
                        session.close();
                        break;
                    };
                    if !handle_command(&mut session, command) {
                        break;
                    }
                }
                _ = next_tick(&mut keepalive) => {
                    if let Err(err) = session.keepalive() {
                        warn!(error = %err, "Keepalive failed");
                    }
                }
            }
        }

        info!(state = %session.state(), "Signaling client stopped");
    }
}

async fn next_tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => future::pending().await,
    }
}

/// Applies one command. Returns false once the session is closed for good.
fn handle_command(session: &mut SignalingSession, command: Command) -> bool {
    let name = command.name();
    let before = session.state();

    let result: SignalingResult<()> = match command {
        Command::Connect(transport) => session.connect(transport),
        Command::StartNegotiation { plugin, room } => session.start_negotiation(plugin, room),
        Command::LocalDescription { kind, sdp } => session.submit_local_description(kind, sdp),
        Command::Candidate(candidate) => session.submit_candidate(candidate),
        Command::CandidatesComplete => session.candidates_complete(),
        Command::TransportMessage(text) => {
            let outcome = session.on_transport_message(&text);
            debug!(outcome = ?outcome, "Routed inbound message");
            Ok(())
        }
        Command::TransportClosed => {
            session.on_transport_closed();
            Ok(())
        }
        Command::Snapshot(reply) => {
            let _ = reply.send(session.snapshot());
            Ok(())
        }
        Command::Close => {
            session.close();
            return false;
        }
    };

    if let Err(err) = result {
        // A failure that ended the session was already reported as Failed.
        if !(before != State::Failed && session.state() == State::Failed) {
            warn!(command = name, error = %err, "Command rejected");
            session.reject(err);
        }
    }
    true
}

/// Cloneable handle to a running [`SignalingClient`].
#[derive(Clone, Debug)]
pub struct SignalingHandle {
    command_tx: mpsc::UnboundedSender<Command>,
}

impl SignalingHandle {
    /// Hands the outbound transport to the session.
    pub fn connect(&self, transport: impl Transport + 'static) -> ClientResult<()> {
        self.send(Command::Connect(Box::new(transport)))
    }

    /// Starts a negotiation with `plugin`, joining with `room`.
    pub fn start_negotiation(&self, plugin: impl Into<String>, room: RoomParams) -> ClientResult<()> {
        let plugin = plugin.into();
        if plugin.trim().is_empty() {
            return Err(ClientError::invalid_argument("plugin must not be empty"));
        }
        self.send(Command::StartNegotiation { plugin, room })
    }

    /// Delivers the local description produced by the media engine.
    pub fn submit_local_description(&self, kind: &str, sdp: impl Into<String>) -> ClientResult<()> {
        let kind =
            SdpType::from_str(kind).map_err(|e| ClientError::invalid_argument(e.to_string()))?;
        let sdp = sdp.into();
        if sdp.trim().is_empty() {
            return Err(ClientError::invalid_argument("sdp must not be empty"));
        }
        self.send(Command::LocalDescription { kind, sdp })
    }

    /// Delivers one local candidate produced by the media engine.
    pub fn submit_candidate(
        &self,
        sdp_mid: impl Into<String>,
        sdp_mline_index: u32,
        candidate: impl Into<String>,
    ) -> ClientResult<()> {
        let candidate = candidate.into();
        if candidate.trim().is_empty() {
            return Err(ClientError::invalid_argument("candidate must not be empty"));
        }
        self.send(Command::Candidate(IceCandidate::new(
            sdp_mid,
            sdp_mline_index,
            candidate,
        )))
    }

    /// Signals that the media engine has gathered every local candidate.
    pub fn candidates_complete(&self) -> ClientResult<()> {
        self.send(Command::CandidatesComplete)
    }

    /// Feeds one inbound text frame from the transport.
    pub fn on_transport_message(&self, text: impl Into<String>) -> ClientResult<()> {
        self.send(Command::TransportMessage(text.into()))
    }

    /// Reports that the transport is gone.
    pub fn on_transport_closed(&self) -> ClientResult<()> {
        self.send(Command::TransportClosed)
    }

    /// Closes the session and stops the task. Always succeeds.
    pub fn close(&self) -> ClientResult<()> {
        if self.command_tx.send(Command::Close).is_err() {
            debug!("Signaling client already stopped");
        }
        Ok(())
    }

    /// Returns a snapshot taken after every command sent so far.
    pub async fn snapshot(&self) -> ClientResult<SessionSnapshot> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(Command::Snapshot(reply_tx))?;
        reply_rx.await.map_err(|_| ClientError::Closed)
    }

    /// Returns true once the task has stopped.
    pub fn is_closed(&self) -> bool {
        self.command_tx.is_closed()
    }

    fn send(&self, command: Command) -> ClientResult<()> {
        self.command_tx.send(command).map_err(|_| ClientError::Closed)
    }
}

//! Signaling client for the gateway plugin protocol.
//!
//! The client negotiates one media session: it creates a gateway session,
//! attaches a plugin handle, joins a room, trades the local description for
//! the gateway's answer and trickles candidates both ways.
//!
//! - [`TransactionRegistry`] correlates replies with requests.
//! - [`MessageRouter`] classifies inbound messages.
//! - [`SignalingSession`] is the state machine.
//! - [`SignalingClient`] runs a session on a task; [`SignalingHandle`] drives it.
//! - [`MediaEngine`] and [`Transport`] are what the caller plugs in.
//!
//! ```no_run
//! # use janus_signal_client::{MediaEngine, MediaError, SignalingClient, ws};
//! # use janus_signal_core::ClientConfig;
//! # use janus_signal_protocol::{IceCandidate, Jsep};
//! # struct Engine;
//! # impl MediaEngine for Engine {
//! #     fn create_local_description(&mut self) -> Result<(), MediaError> { Ok(()) }
//! #     fn apply_remote_description(&mut self, _: &Jsep) -> Result<(), MediaError> { Ok(()) }
//! #     fn add_remote_candidate(&mut self, _: &IceCandidate) -> Result<(), MediaError> { Ok(()) }
//! # }
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ClientConfig::load_from("client.toml")?;
//! let mut client = SignalingClient::new(config.clone());
//! let handle = client.handle();
//! let mut events = client.events();
//! client.spawn(Engine);
//!
//! ws::connect_gateway(&config, handle.clone()).await?;
//! handle.start_negotiation(config.plugin.clone(), config.room.clone())?;
//!
//! while let Some(event) = events.recv().await {
//!     println!("{:?}", event);
//! }
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod facade;
pub mod media;
pub mod registry;
pub mod router;
pub mod session;
pub mod transport;
pub mod ws;

#[cfg(test)]
mod testing;

pub use error::{
    ClientError, ClientResult, MediaError, RegistryError, SignalingError, SignalingResult,
    TransportError,
};
pub use facade::{SignalingClient, SignalingHandle};
pub use media::MediaEngine;
pub use registry::{Outcome, Transaction, TransactionKind, TransactionRegistry};
pub use router::{Anomaly, MessageRouter, RouteOutcome, SessionNotifications};
pub use session::{MAX_QUEUED_CANDIDATES, SessionEvent, SessionSnapshot, SignalingSession, State};
pub use transport::Transport;

//! Media engine seam.

use janus_signal_protocol::{IceCandidate, Jsep};

use crate::error::MediaError;

/// The party that owns the PeerConnection.
///
/// Calls are made from the signaling task and must not block. The local
/// description is produced asynchronously: `create_local_description` only
/// starts the work, the result comes back through
/// [`SignalingHandle::submit_local_description`](crate::SignalingHandle::submit_local_description).
/// Local candidates likewise come back through
/// [`SignalingHandle::submit_candidate`](crate::SignalingHandle::submit_candidate).
pub trait MediaEngine: Send {
    /// Starts producing the local offer.
    fn create_local_description(&mut self) -> Result<(), MediaError>;

    /// Applies the description answered by the gateway.
    fn apply_remote_description(&mut self, jsep: &Jsep) -> Result<(), MediaError>;

    /// Adds one candidate trickled by the gateway.
    fn add_remote_candidate(&mut self, candidate: &IceCandidate) -> Result<(), MediaError>;

    /// The gateway has no more candidates.
    fn end_of_remote_candidates(&mut self) -> Result<(), MediaError> {
        Ok(())
    }

    /// The session is over; release the PeerConnection.
    fn close(&mut self) {}
}

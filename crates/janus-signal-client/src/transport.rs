//! Transport seam.

use tokio::sync::mpsc;

use crate::error::TransportError;

/// Outbound half of the gateway connection.
///
/// Inbound text and disconnects are fed back through
/// [`SignalingHandle::on_transport_message`](crate::SignalingHandle::on_transport_message)
/// and [`SignalingHandle::on_transport_closed`](crate::SignalingHandle::on_transport_closed).
pub trait Transport: Send {
    /// Queues one text frame.
    fn send(&mut self, text: String) -> Result<(), TransportError>;
}

/// Frames pushed into the channel are written by whoever owns the receiver,
/// usually the WebSocket writer in [`ws`](crate::ws).
impl Transport for mpsc::UnboundedSender<String> {
    fn send(&mut self, text: String) -> Result<(), TransportError> {
        mpsc::UnboundedSender::send(self, text)
            .map_err(|_| TransportError::new("connection closed"))
    }
}

//! WebSocket transport to the gateway.
//!
//! [`connect_gateway`] opens the socket, hands its outbound half to the
//! signaling task as a [`Transport`](crate::Transport) and pumps inbound text
//! frames back through the [`SignalingHandle`].

use futures_util::{SinkExt, StreamExt};
use janus_signal_core::ClientConfig;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async_with_config;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::SEC_WEBSOCKET_PROTOCOL;
use tokio_tungstenite::tungstenite::protocol::{Message, WebSocketConfig};
use tracing::{debug, info, trace, warn};

use crate::error::{ClientError, ClientResult};
use crate::facade::SignalingHandle;

/// Reader and writer tasks of an open gateway connection.
#[derive(Debug)]
pub struct GatewayConnection {
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl GatewayConnection {
    /// Waits until both directions have stopped.
    pub async fn closed(self) {
        let _ = self.writer.await;
        let _ = self.reader.await;
    }

    /// Stops both tasks without a closing handshake.
    pub fn abort(&self) {
        self.reader.abort();
        self.writer.abort();
    }
}

/// Connects to `config.gateway_url` and wires the socket to `handle`.
///
/// The socket closes once the session drops its transport (on close) or the
/// gateway goes away, in which case the session is told via
/// [`SignalingHandle::on_transport_closed`].
pub async fn connect_gateway(
    config: &ClientConfig,
    handle: SignalingHandle,
) -> ClientResult<GatewayConnection> {
    let mut request = config.gateway_url.as_str().into_client_request()?;
    let subprotocol = HeaderValue::from_str(&config.subprotocol)
        .map_err(|e| ClientError::invalid_argument(format!("subprotocol: {}", e)))?;
    request
        .headers_mut()
        .insert(SEC_WEBSOCKET_PROTOCOL, subprotocol);

    let mut ws_config = WebSocketConfig::default();
    ws_config.max_message_size = Some(config.max_message_size);
    ws_config.max_frame_size = Some(config.max_message_size);

    let (stream, response) = connect_async_with_config(request, Some(ws_config), true).await?;
    info!(
        gateway = %config.gateway_url,
        status = %response.status(),
        "Connected to gateway"
    );

    let (mut sink, mut source) = stream.split();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<String>();
    handle.connect(outbound_tx)?;

    let writer = tokio::spawn(async move {
        while let Some(text) = outbound_rx.recv().await {
            trace!(len = text.len(), "Sending frame");
            if let Err(e) = sink.send(Message::Text(text.into())).await {
                warn!(error = %e, "Gateway write failed");
                return;
            }
        }
        debug!("Transport released, closing socket");
        let _ = sink.close().await;
    });

    let reader = tokio::spawn(async move {
        while let Some(frame) = source.next().await {
            match frame {
                Ok(Message::Text(text)) => {
                    if handle.on_transport_message(text.to_string()).is_err() {
                        debug!("Signaling client gone, stop reading");
                        return;
                    }
                }
                Ok(Message::Binary(data)) => {
                    warn!(len = data.len(), "Ignoring binary frame from gateway");
                }
                Ok(Message::Close(frame)) => {
                    debug!(frame = ?frame, "Gateway closed the socket");
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(error = %e, "Gateway read failed");
                    break;
                }
            }
        }
        let _ = handle.on_transport_closed();
    });

    Ok(GatewayConnection { reader, writer })
}

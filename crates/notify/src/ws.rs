//! WebSocket connector for the live channel.
//!
//! Bridges a tokio-tungstenite stream onto a `FrameLink`: one task drains
//! outbound text into the socket, another forwards inbound text frames.
//! When the socket ends the inbound sender is dropped, which the channel
//! sees as a disconnect.

use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tracing::debug;

use crate::channel::{ChannelError, Connector, FrameLink};

const OUTBOUND_CAPACITY: usize = 64;
const INBOUND_CAPACITY: usize = 256;

/// Connects over `ws://` or `wss://`. Spring's SockJS endpoint accepts raw
/// WebSocket clients at `<endpoint>/websocket`.
#[derive(Debug, Default, Clone, Copy)]
pub struct WsConnector;

impl Connector for WsConnector {
    async fn connect(&self, url: &str) -> Result<FrameLink, ChannelError> {
        let (stream, _response) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| ChannelError::Connect(e.to_string()))?;
        debug!(
            component = "ws",
            event = "ws.connection.opened",
            url = %url,
        );

        let (mut ws_tx, mut ws_rx) = stream.split();
        let (outbound_tx, mut outbound_rx) = mpsc::channel::<String>(OUTBOUND_CAPACITY);
        let (inbound_tx, inbound_rx) = mpsc::channel::<String>(INBOUND_CAPACITY);

        tokio::spawn(async move {
            while let Some(text) = outbound_rx.recv().await {
                if ws_tx.send(Message::Text(text.into())).await.is_err() {
                    debug!(
                        component = "ws",
                        event = "ws.send.disconnected",
                        "WebSocket send failed, server gone"
                    );
                    break;
                }
            }
            let _ = ws_tx.close().await;
        });

        tokio::spawn(async move {
            while let Some(msg) = ws_rx.next().await {
                let text = match msg {
                    Ok(Message::Text(text)) => text.as_str().to_string(),
                    Ok(Message::Binary(bytes)) => match String::from_utf8(bytes.to_vec()) {
                        Ok(text) => text,
                        Err(_) => continue,
                    },
                    Ok(Message::Close(frame)) => {
                        debug!(
                            component = "ws",
                            event = "ws.connection.closed",
                            reason = ?frame,
                        );
                        break;
                    }
                    Ok(_) => continue,
                    Err(e) => {
                        debug!(
                            component = "ws",
                            event = "ws.recv.failed",
                            error = %e,
                        );
                        break;
                    }
                };
                if inbound_tx.send(text).await.is_err() {
                    break;
                }
            }
        });

        Ok(FrameLink {
            outbound: outbound_tx,
            inbound: inbound_rx,
        })
    }
}

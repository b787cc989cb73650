//! Transport seam for the upstream duplex connection.
//!
//! The client state machine only sees [`Duplex`] channel pairs; the
//! WebSocket plumbing lives behind [`UpstreamTransport`] so tests can swap
//! in a scripted connection.

use crate::error::Result;
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;

/// Close code reported when the peer vanished without a close frame.
pub const ABNORMAL_CLOSE: u16 = 1006;

/// Close code for a clean shutdown.
pub const NORMAL_CLOSE: u16 = 1000;

/// One frame on the upstream wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireFrame {
    Text(String),
    Binary(Vec<u8>),
    Close { code: u16, reason: String },
}

/// Channel pair for one established connection.
pub struct Duplex {
    pub outgoing: mpsc::Sender<WireFrame>,
    pub incoming: mpsc::Receiver<WireFrame>,
}

/// Connects duplex framed streams to the upstream service.
#[async_trait]
pub trait UpstreamTransport: Send + Sync {
    async fn connect(&self, url: &str) -> Result<Duplex>;
}

/// Production transport over `tokio-tungstenite`.
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketTransport;

#[async_trait]
impl UpstreamTransport for WebSocketTransport {
    async fn connect(&self, url: &str) -> Result<Duplex> {
        let (stream, _response) = connect_async(url).await?;
        let (mut sink, mut source) = stream.split();

        let (out_tx, mut out_rx) = mpsc::channel::<WireFrame>(64);
        let (in_tx, in_rx) = mpsc::channel::<WireFrame>(64);

        // Writer pump: wire frames out to the socket.
        tokio::spawn(async move {
            while let Some(frame) = out_rx.recv().await {
                let message = match frame {
                    WireFrame::Text(text) => Message::Text(text.into()),
                    WireFrame::Binary(bytes) => Message::Binary(bytes.into()),
                    WireFrame::Close { code, reason } => Message::Close(Some(CloseFrame {
                        code: code.into(),
                        reason: reason.into(),
                    })),
                };
                if sink.send(message).await.is_err() {
                    break;
                }
            }
        });

        // Reader pump: socket messages in as wire frames.
        tokio::spawn(async move {
            while let Some(message) = source.next().await {
                let frame = match message {
                    Ok(Message::Text(text)) => WireFrame::Text(text.to_string()),
                    Ok(Message::Binary(bytes)) => WireFrame::Binary(bytes.to_vec()),
                    Ok(Message::Close(close)) => {
                        let (code, reason) = close
                            .map(|frame| (u16::from(frame.code), frame.reason.to_string()))
                            .unwrap_or((ABNORMAL_CLOSE, String::new()));
                        let _ = in_tx.send(WireFrame::Close { code, reason }).await;
                        break;
                    }
                    // Ping/pong are answered by tungstenite itself.
                    Ok(_) => continue,
                    Err(err) => {
                        tracing::debug!(error = %err, "upstream socket read failed");
                        break;
                    }
                };
                if in_tx.send(frame).await.is_err() {
                    break;
                }
            }
        });

        Ok(Duplex {
            outgoing: out_tx,
            incoming: in_rx,
        })
    }
}

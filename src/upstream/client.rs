//! Upstream connection state machine with automatic reconnect.
//!
//! The client owns one long-lived duplex framed connection per call. Audio
//! goes out as binary frames; incoming frames are demultiplexed into typed
//! events. Transport failures schedule a reconnect instead of surfacing to
//! the call.

use crate::config::UpstreamConfig;
use crate::defaults::{BACKOFF_MAX_ATTEMPTS, UPSTREAM_CONNECT_TIMEOUT_SECS};
use crate::error::{BridgeError, Result};
use crate::upstream::backoff::Backoff;
use crate::upstream::protocol::{ServerFrame, parse_text_frame};
use crate::upstream::transport::{
    ABNORMAL_CLOSE, Duplex, NORMAL_CLOSE, UpstreamTransport, WebSocketTransport, WireFrame,
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpstreamState {
    /// Initial and terminal state.
    Disconnected,
    Connecting,
    Open,
    /// Waiting out a backoff delay before the next attempt.
    ReconnectPending,
}

/// Events the client delivers to its owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpstreamEvent {
    Connected { connection_id: String },
    Disconnected { code: u16, reason: String },
    /// Binary frame of 16kHz linear PCM.
    Audio(Vec<u8>),
    Transcript(String),
    LlmToken(String),
    LlmDone(String),
    BackoffExhausted { attempts: u32 },
}

/// Handle to a running upstream client task.
#[derive(Clone)]
pub struct UpstreamHandle {
    state: Arc<Mutex<UpstreamState>>,
    out_tx: mpsc::Sender<Vec<u8>>,
    stop_tx: Arc<watch::Sender<bool>>,
    dropped_sends: Arc<AtomicU64>,
}

impl UpstreamHandle {
    /// Current connection state.
    pub fn state(&self) -> UpstreamState {
        *self.state.lock().unwrap()
    }

    /// True when audio may be sent right now.
    pub fn is_open(&self) -> bool {
        self.state() == UpstreamState::Open
    }

    /// Sends one binary audio frame.
    ///
    /// Only permitted while open; otherwise fails without queuing. A full
    /// write queue drops the frame rather than applying backpressure.
    pub fn send(&self, bytes: Vec<u8>) -> Result<()> {
        if !self.is_open() {
            return Err(BridgeError::NotConnected);
        }
        if self.out_tx.try_send(bytes).is_err() {
            self.dropped_sends.fetch_add(1, Ordering::Relaxed);
            tracing::debug!("upstream write queue full, frame dropped");
        }
        Ok(())
    }

    /// Frames dropped because the write queue was full.
    pub fn dropped_sends(&self) -> u64 {
        self.dropped_sends.load(Ordering::Relaxed)
    }

    /// Requests a clean shutdown. Idempotent.
    pub fn stop(&self) {
        let _ = self.stop_tx.send(true);
    }
}

/// Duplex framed connection to the conversation service.
pub struct UpstreamClient {
    config: UpstreamConfig,
    transport: Arc<dyn UpstreamTransport>,
}

impl UpstreamClient {
    /// Creates a client over the production WebSocket transport.
    pub fn new(config: UpstreamConfig) -> Self {
        Self::with_transport(config, Arc::new(WebSocketTransport))
    }

    /// Creates a client over an injected transport.
    pub fn with_transport(config: UpstreamConfig, transport: Arc<dyn UpstreamTransport>) -> Self {
        Self { config, transport }
    }

    /// Spawns the connection task; events arrive on `events`.
    pub fn spawn(self, events: mpsc::Sender<UpstreamEvent>) -> UpstreamHandle {
        let state = Arc::new(Mutex::new(UpstreamState::Disconnected));
        let (out_tx, out_rx) = mpsc::channel(64);
        let (stop_tx, stop_rx) = watch::channel(false);
        let dropped_sends = Arc::new(AtomicU64::new(0));

        let handle = UpstreamHandle {
            state: state.clone(),
            out_tx,
            stop_tx: Arc::new(stop_tx),
            dropped_sends,
        };

        tokio::spawn(run(self.config, self.transport, state, out_rx, events, stop_rx));

        handle
    }
}

fn set_state(state: &Mutex<UpstreamState>, next: UpstreamState) {
    *state.lock().unwrap() = next;
}

async fn run(
    config: UpstreamConfig,
    transport: Arc<dyn UpstreamTransport>,
    state: Arc<Mutex<UpstreamState>>,
    mut out_rx: mpsc::Receiver<Vec<u8>>,
    events: mpsc::Sender<UpstreamEvent>,
    mut stop_rx: watch::Receiver<bool>,
) {
    let url = config.conversation_url();
    let connect_timeout = Duration::from_secs(UPSTREAM_CONNECT_TIMEOUT_SECS);
    let mut backoff = Backoff::new();
    let mut connection_seq: u64 = 0;

    loop {
        if *stop_rx.borrow() {
            break;
        }

        set_state(&state, UpstreamState::Connecting);
        let connected = tokio::select! {
            _ = stop_rx.changed() => break,
            result = tokio::time::timeout(connect_timeout, transport.connect(&url)) => {
                match result {
                    Ok(Ok(duplex)) => Some(duplex),
                    Ok(Err(err)) => {
                        tracing::warn!(error = %err, "upstream connect failed");
                        None
                    }
                    Err(_) => {
                        tracing::warn!(
                            timeout_secs = UPSTREAM_CONNECT_TIMEOUT_SECS,
                            "upstream connect timed out"
                        );
                        None
                    }
                }
            }
        };

        let close_code = match connected {
            Some(mut duplex) => {
                backoff.reset();
                connection_seq += 1;
                // Frames queued while closed are stale; sending them now
                // would violate the no-queuing contract.
                while out_rx.try_recv().is_ok() {}

                set_state(&state, UpstreamState::Open);
                let connection_id = format!("conn-{connection_seq}");
                tracing::info!(%connection_id, "upstream connection open");
                let _ = events
                    .send(UpstreamEvent::Connected { connection_id })
                    .await;

                let (code, reason) = drive_open(&mut duplex, &mut out_rx, &events, &mut stop_rx).await;
                tracing::info!(code, %reason, "upstream connection closed");
                let _ = events.send(UpstreamEvent::Disconnected { code, reason }).await;
                Some(code)
            }
            None => None,
        };

        if *stop_rx.borrow() || close_code == Some(NORMAL_CLOSE) {
            break;
        }

        match backoff.next_delay() {
            Some(delay) => {
                set_state(&state, UpstreamState::ReconnectPending);
                tracing::info!(
                    attempt = backoff.attempt(),
                    delay_ms = delay.as_millis() as u64,
                    "upstream reconnect pending"
                );
                tokio::select! {
                    _ = stop_rx.changed() => break,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            None => {
                tracing::warn!(
                    attempts = BACKOFF_MAX_ATTEMPTS,
                    "upstream reconnect attempts exhausted"
                );
                let _ = events
                    .send(UpstreamEvent::BackoffExhausted {
                        attempts: BACKOFF_MAX_ATTEMPTS,
                    })
                    .await;
                break;
            }
        }
    }

    set_state(&state, UpstreamState::Disconnected);
}

/// Pumps an open connection until it closes; returns the close code and
/// reason.
async fn drive_open(
    duplex: &mut Duplex,
    out_rx: &mut mpsc::Receiver<Vec<u8>>,
    events: &mpsc::Sender<UpstreamEvent>,
    stop_rx: &mut watch::Receiver<bool>,
) -> (u16, String) {
    loop {
        tokio::select! {
            _ = stop_rx.changed() => {
                let _ = duplex
                    .outgoing
                    .send(WireFrame::Close {
                        code: NORMAL_CLOSE,
                        reason: "client stop".to_string(),
                    })
                    .await;
                return (NORMAL_CLOSE, "stopped".to_string());
            }
            outbound = out_rx.recv() => {
                match outbound {
                    Some(bytes) => {
                        if duplex.outgoing.send(WireFrame::Binary(bytes)).await.is_err() {
                            return (ABNORMAL_CLOSE, "write failed".to_string());
                        }
                    }
                    None => return (NORMAL_CLOSE, "handle dropped".to_string()),
                }
            }
            inbound = duplex.incoming.recv() => {
                match inbound {
                    Some(WireFrame::Binary(bytes)) => {
                        let _ = events.send(UpstreamEvent::Audio(bytes)).await;
                    }
                    Some(WireFrame::Text(text)) => match parse_text_frame(&text) {
                        Ok(Some(ServerFrame::Transcript(t))) => {
                            let _ = events.send(UpstreamEvent::Transcript(t)).await;
                        }
                        Ok(Some(ServerFrame::LlmToken(t))) => {
                            let _ = events.send(UpstreamEvent::LlmToken(t)).await;
                        }
                        Ok(Some(ServerFrame::LlmDone(t))) => {
                            let _ = events.send(UpstreamEvent::LlmDone(t)).await;
                        }
                        Ok(None) => {}
                        Err(err) => {
                            tracing::warn!(error = %err, "malformed upstream frame dropped");
                        }
                    },
                    Some(WireFrame::Close { code, reason }) => return (code, reason),
                    None => return (ABNORMAL_CLOSE, "transport closed".to_string()),
                }
            }
        }
    }
}

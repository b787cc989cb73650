//! Scripted transport for exercising the client state machine without a
//! network.

use crate::error::{BridgeError, Result};
use crate::upstream::transport::{Duplex, UpstreamTransport, WireFrame};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// The server-side ends of one mock connection.
pub struct MockServer {
    /// Frames pushed here arrive at the client.
    pub to_client: mpsc::Sender<WireFrame>,
    /// Frames the client sent.
    pub from_client: mpsc::Receiver<WireFrame>,
}

#[derive(Default)]
struct MockState {
    connect_failures: VecDeque<BridgeError>,
    servers: Vec<MockServer>,
    connect_count: usize,
    last_url: Option<String>,
}

/// Transport whose connections are channel pairs owned by the test.
#[derive(Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a failure for the next connect attempt.
    pub fn fail_next_connect(&self) {
        self.state
            .lock()
            .unwrap()
            .connect_failures
            .push_back(BridgeError::UpstreamTransport {
                message: "connection refused".to_string(),
            });
    }

    /// Takes the server side of the most recent connection.
    pub fn take_server(&self) -> Option<MockServer> {
        self.state.lock().unwrap().servers.pop()
    }

    /// Number of connect attempts that produced a connection.
    pub fn connect_count(&self) -> usize {
        self.state.lock().unwrap().connect_count
    }

    /// URL passed to the most recent connect call.
    pub fn last_url(&self) -> Option<String> {
        self.state.lock().unwrap().last_url.clone()
    }
}

#[async_trait]
impl UpstreamTransport for MockTransport {
    async fn connect(&self, url: &str) -> Result<Duplex> {
        let mut state = self.state.lock().unwrap();
        state.last_url = Some(url.to_string());
        if let Some(err) = state.connect_failures.pop_front() {
            return Err(err);
        }

        let (server_tx, client_rx) = mpsc::channel(64);
        let (client_tx, server_rx) = mpsc::channel(64);
        state.servers.push(MockServer {
            to_client: server_tx,
            from_client: server_rx,
        });
        state.connect_count += 1;

        Ok(Duplex {
            outgoing: client_tx,
            incoming: client_rx,
        })
    }
}

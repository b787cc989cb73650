//! Carrier adapter contract and stream handshake tokens.
//!
//! The core consumes and produces raw bytes only. An adapter feeds inbound
//! media through [`CarrierAdapter::on_ingress`], receives companded egress
//! frames through its sink, and signals end-of-stream with
//! [`CarrierAdapter::on_teardown`]. Everything carrier-specific (signaling,
//! base-64 framing, webhook validation) lives outside this crate.

use crate::clock::{Clock, SystemClock};
use crate::defaults::STREAM_TOKEN_TTL_SECS;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// The byte-buffer callback pair between the carrier and the core.
///
/// Implemented by the embedding server; the core calls nothing else on the
/// carrier side.
pub trait CarrierAdapter: Send + Sync {
    /// One carrier media payload, already base-64-decoded.
    fn on_ingress(&self, session_id: &str, frame: &[u8]);

    /// The adapter signals end-of-stream; triggers session teardown exactly
    /// as `stop()`.
    fn on_teardown(&self, session_id: &str, reason: Option<&str>);
}

/// Receives one companded narrow-band payload per playback tick.
pub trait EgressSink: Send + Sync {
    fn emit(&self, session_id: &str, frame: &[u8]);
}

/// One-time tokens authenticating carrier-side stream handshakes.
///
/// A token is valid for five minutes after issuance and is consumed by
/// validation.
pub struct StreamTokenStore {
    clock: Arc<dyn Clock>,
    ttl: Duration,
    next_id: AtomicU64,
    tokens: Mutex<HashMap<String, IssuedToken>>,
}

struct IssuedToken {
    session_id: String,
    issued_at: Instant,
}

impl StreamTokenStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            ttl: Duration::from_secs(STREAM_TOKEN_TTL_SECS),
            next_id: AtomicU64::new(1),
            tokens: Mutex::new(HashMap::new()),
        }
    }

    /// Issues a fresh one-time token bound to a session.
    pub fn issue(&self, session_id: &str) -> String {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let token = format!("st-{id:016x}");
        self.tokens.lock().unwrap().insert(
            token.clone(),
            IssuedToken {
                session_id: session_id.to_string(),
                issued_at: self.clock.now(),
            },
        );
        token
    }

    /// Validates and consumes a token, returning its session id.
    ///
    /// Returns `None` for unknown, already-consumed, or expired tokens.
    pub fn validate(&self, token: &str) -> Option<String> {
        let mut tokens = self.tokens.lock().unwrap();
        let issued = tokens.remove(token)?;
        if self.clock.now().duration_since(issued.issued_at) > self.ttl {
            return None;
        }
        Some(issued.session_id)
    }

    /// Drops expired tokens.
    pub fn prune(&self) {
        let now = self.clock.now();
        self.tokens
            .lock()
            .unwrap()
            .retain(|_, issued| now.duration_since(issued.issued_at) <= self.ttl);
    }

    /// Number of outstanding tokens.
    pub fn outstanding(&self) -> usize {
        self.tokens.lock().unwrap().len()
    }
}

impl Default for StreamTokenStore {
    fn default() -> Self {
        Self::new()
    }
}

//! Call session lifecycle.
//!
//! A session is the root entity for one phone call: it owns the pipeline
//! exclusively, tracks the status lifecycle, and absorbs racing teardown
//! signals so that the first terminal transition wins.

use crate::clock::{Clock, SystemClock};
use crate::config::PipelineConfig;
use crate::error::{BridgeError, Result};
use crate::pipeline::event::{PipelineEvent, PipelineStats};
use crate::pipeline::orchestrator::{Pipeline, PipelineHandle};
use crate::upstream::transport::{UpstreamTransport, WebSocketTransport};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

/// Direction of the call relative to the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallDirection {
    Inbound,
    Outbound,
}

/// Status lifecycle of a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallStatus {
    Queued,
    Ringing,
    InProgress,
    Completed,
    Failed,
}

impl CallStatus {
    /// Status string for API responses.
    pub fn as_str(&self) -> &'static str {
        match self {
            CallStatus::Queued => "queued",
            CallStatus::Ringing => "ringing",
            CallStatus::InProgress => "in-progress",
            CallStatus::Completed => "completed",
            CallStatus::Failed => "failed",
        }
    }

    /// True for states no session ever leaves.
    pub fn is_terminal(&self) -> bool {
        matches!(self, CallStatus::Completed | CallStatus::Failed)
    }
}

/// One phone call and its exclusively-owned pipeline.
pub struct CallSession {
    session_id: String,
    direction: CallDirection,
    config: PipelineConfig,
    clock: Arc<dyn Clock>,
    transport: Arc<dyn UpstreamTransport>,
    status: Mutex<CallStatus>,
    started_at: Mutex<Option<Instant>>,
    ended_at: Mutex<Option<Instant>>,
    metadata: Mutex<HashMap<String, String>>,
    pipeline: Mutex<Option<PipelineHandle>>,
}

impl CallSession {
    /// Creates a session in the queued state; the pipeline starts on
    /// [`CallSession::answer`].
    pub fn new(
        config: PipelineConfig,
        session_id: impl Into<String>,
        direction: CallDirection,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            session_id: session_id.into(),
            direction,
            config,
            clock: Arc::new(SystemClock),
            transport: Arc::new(WebSocketTransport),
            status: Mutex::new(CallStatus::Queued),
            started_at: Mutex::new(None),
            ended_at: Mutex::new(None),
            metadata: Mutex::new(HashMap::new()),
            pipeline: Mutex::new(None),
        })
    }

    /// Sets a custom upstream transport.
    pub fn with_transport(mut self, transport: Arc<dyn UpstreamTransport>) -> Self {
        self.transport = transport;
        self
    }

    /// Sets a custom clock (for deterministic testing).
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn direction(&self) -> CallDirection {
        self.direction
    }

    pub fn status(&self) -> CallStatus {
        *self.status.lock().unwrap()
    }

    /// Marks the call as ringing.
    pub fn ring(&self) -> Result<()> {
        self.transition(CallStatus::Ringing)
    }

    /// Answers the call: starts the pipeline and transitions to
    /// in-progress. Returns the pipeline event stream.
    pub fn answer(&self) -> Result<mpsc::Receiver<PipelineEvent>> {
        self.transition(CallStatus::InProgress)?;

        let (handle, events) = Pipeline::new(self.config.clone(), self.session_id.clone())
            .with_clock(self.clock.clone())
            .with_transport(self.transport.clone())
            .start()?;

        *self.pipeline.lock().unwrap() = Some(handle);
        *self.started_at.lock().unwrap() = Some(self.clock.now());
        Ok(events)
    }

    /// Forwards one carrier media frame into the pipeline.
    pub fn push_ingress(&self, frame: &[u8]) -> Result<()> {
        self.ensure_active()?;
        match self.pipeline.lock().unwrap().as_ref() {
            Some(pipeline) => pipeline.push_ingress(frame),
            None => Err(BridgeError::NotConnected),
        }
    }

    /// Completes the call. Absorbed when already terminal.
    pub fn complete(&self) {
        self.finish(CallStatus::Completed);
    }

    /// Fails the call with a reason. Absorbed when already terminal.
    pub fn fail(&self, reason: impl Into<String>) {
        let reason = reason.into();
        if self.finish(CallStatus::Failed) {
            self.metadata
                .lock()
                .unwrap()
                .insert("failure_reason".to_string(), reason);
        }
    }

    /// Carrier-side end-of-stream; tears down exactly as `stop()`. Racing
    /// teardown signals are absorbed.
    pub fn teardown(&self, reason: Option<&str>) {
        tracing::info!(
            session_id = %self.session_id,
            reason = reason.unwrap_or("carrier close"),
            "session teardown"
        );
        self.finish(CallStatus::Completed);
    }

    /// Pipeline statistics, while the session is active.
    pub fn stats(&self) -> Result<PipelineStats> {
        self.ensure_active()?;
        self.pipeline
            .lock()
            .unwrap()
            .as_ref()
            .map(|pipeline| pipeline.stats())
            .ok_or(BridgeError::NotConnected)
    }

    /// Seconds between answer and teardown (or now, while active).
    pub fn duration(&self) -> Option<Duration> {
        let started = (*self.started_at.lock().unwrap())?;
        let end = self.ended_at.lock().unwrap().unwrap_or_else(|| self.clock.now());
        Some(end.duration_since(started))
    }

    /// Attaches free-form metadata.
    pub fn set_metadata(&self, key: impl Into<String>, value: impl Into<String>) {
        self.metadata
            .lock()
            .unwrap()
            .insert(key.into(), value.into());
    }

    /// Reads a metadata value.
    pub fn metadata(&self, key: &str) -> Option<String> {
        self.metadata.lock().unwrap().get(key).cloned()
    }

    fn ensure_active(&self) -> Result<()> {
        if self.status().is_terminal() {
            return Err(BridgeError::SessionGone {
                session_id: self.session_id.clone(),
            });
        }
        Ok(())
    }

    fn transition(&self, to: CallStatus) -> Result<()> {
        let mut status = self.status.lock().unwrap();
        let allowed = matches!(
            (*status, to),
            (CallStatus::Queued, CallStatus::Ringing)
                | (CallStatus::Queued, CallStatus::InProgress)
                | (CallStatus::Ringing, CallStatus::InProgress)
        );
        if !allowed {
            return Err(BridgeError::InvalidTransition {
                from: status.as_str().to_string(),
                to: to.as_str().to_string(),
            });
        }
        *status = to;
        Ok(())
    }

    /// Moves to a terminal status and releases the pipeline. Returns false
    /// when another terminal signal won the race.
    fn finish(&self, to: CallStatus) -> bool {
        {
            let mut status = self.status.lock().unwrap();
            if status.is_terminal() {
                return false;
            }
            *status = to;
        }
        *self.ended_at.lock().unwrap() = Some(self.clock.now());
        if let Some(pipeline) = self.pipeline.lock().unwrap().take() {
            pipeline.stop();
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upstream::mock::MockTransport;

    fn session(transport: &MockTransport) -> CallSession {
        CallSession::new(PipelineConfig::default(), "call-7", CallDirection::Inbound)
            .unwrap()
            .with_transport(Arc::new(transport.clone()))
    }

    #[test]
    fn test_status_strings() {
        assert_eq!(CallStatus::Queued.as_str(), "queued");
        assert_eq!(CallStatus::InProgress.as_str(), "in-progress");
        assert!(!CallStatus::InProgress.is_terminal());
        assert!(CallStatus::Completed.is_terminal());
        assert!(CallStatus::Failed.is_terminal());
    }

    #[test]
    fn test_invalid_config_rejected_at_construction() {
        let config = PipelineConfig {
            jitter: crate::config::JitterConfig {
                min_ms: 300,
                max_ms: 200,
                target_ms: 300,
            },
            ..Default::default()
        };
        assert!(CallSession::new(config, "bad", CallDirection::Inbound).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_lifecycle_queued_ringing_in_progress() {
        let transport = MockTransport::new();
        let session = session(&transport);

        assert_eq!(session.status(), CallStatus::Queued);
        session.ring().unwrap();
        assert_eq!(session.status(), CallStatus::Ringing);

        let _events = session.answer().unwrap();
        assert_eq!(session.status(), CallStatus::InProgress);

        session.complete();
        assert_eq!(session.status(), CallStatus::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_answer_straight_from_queued() {
        let transport = MockTransport::new();
        let session = session(&transport);
        let _events = session.answer().unwrap();
        assert_eq!(session.status(), CallStatus::InProgress);
        session.teardown(None);
    }

    #[test]
    fn test_invalid_transitions_rejected() {
        let transport = MockTransport::new();
        let session = session(&transport);

        session.complete();
        assert!(matches!(
            session.ring(),
            Err(BridgeError::InvalidTransition { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_push_ingress_requires_answer() {
        let transport = MockTransport::new();
        let session = session(&transport);
        assert!(matches!(
            session.push_ingress(&[0xFF; 160]),
            Err(BridgeError::NotConnected)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_operations_after_terminal_report_session_gone() {
        let transport = MockTransport::new();
        let session = session(&transport);
        let _events = session.answer().unwrap();

        session.complete();
        assert!(matches!(
            session.push_ingress(&[0xFF; 160]),
            Err(BridgeError::SessionGone { .. })
        ));
        assert!(matches!(
            session.stats(),
            Err(BridgeError::SessionGone { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_racing_teardown_signals_first_wins() {
        let transport = MockTransport::new();
        let session = session(&transport);
        let _events = session.answer().unwrap();

        session.fail("upstream unreachable");
        // Carrier closes afterwards; the second signal is absorbed.
        session.teardown(Some("media stream closed"));

        assert_eq!(session.status(), CallStatus::Failed);
        assert_eq!(
            session.metadata("failure_reason").as_deref(),
            Some("upstream unreachable")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_teardown_is_idempotent() {
        let transport = MockTransport::new();
        let session = session(&transport);
        let _events = session.answer().unwrap();

        session.teardown(None);
        session.teardown(Some("again"));
        assert_eq!(session.status(), CallStatus::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_duration_tracks_answer_to_end() {
        let clock = Arc::new(crate::clock::MockClock::new());
        let transport = MockTransport::new();
        let session = CallSession::new(
            PipelineConfig::default(),
            "call-t",
            CallDirection::Outbound,
        )
        .unwrap()
        .with_transport(Arc::new(transport.clone()))
        .with_clock(clock.clone());

        assert!(session.duration().is_none());
        let _events = session.answer().unwrap();
        clock.advance(Duration::from_secs(12));
        session.complete();

        assert_eq!(session.duration().unwrap(), Duration::from_secs(12));
    }

    #[test]
    fn test_metadata_round_trip() {
        let transport = MockTransport::new();
        let session = session(&transport);
        session.set_metadata("campaign", "q3-outreach");
        assert_eq!(
            session.metadata("campaign").as_deref(),
            Some("q3-outreach")
        );
        assert!(session.metadata("missing").is_none());
    }
}

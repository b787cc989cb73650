//! Per-call pipeline orchestration.
//!
//! Owns one instance of every pipeline component, wires the upstream client
//! events into the sequencing/buffering chain, and drives the playback tick
//! that feeds the carrier. Upstream connection failures never terminate the
//! pipeline: egress drains whatever is buffered and falls back to
//! concealment while the client reconnects.

use crate::audio::codec::{pcm_bytes_to_samples, samples_to_pcm_bytes};
use crate::audio::frame::{AudioFrame, FrameFlags, SequencedFrame};
use crate::clock::{Clock, SystemClock};
use crate::config::PipelineConfig;
use crate::defaults::{NOMINAL_FRAME_MS, WIDE_BYTES_PER_MS};
use crate::error::{BridgeError, Result};
use crate::pipeline::breathing::{BreathKind, BreathingGenerator};
use crate::pipeline::chunk_manager::ChunkManager;
use crate::pipeline::event::{PipelineEvent, PipelineStats};
use crate::pipeline::jitter_buffer::JitterBuffer;
use crate::pipeline::pauses::PauseManager;
use crate::pipeline::playback::{PlaybackController, PlaybackState};
use crate::pipeline::sequencer::{FrameClass, Sequencer};
use crate::upstream::client::{UpstreamClient, UpstreamEvent, UpstreamHandle, UpstreamState};
use crate::upstream::transport::{UpstreamTransport, WebSocketTransport};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};

/// Capacity of the event channel toward the pipeline owner.
const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Builder for one per-call pipeline.
pub struct Pipeline {
    config: PipelineConfig,
    session_id: String,
    clock: Arc<dyn Clock>,
    transport: Arc<dyn UpstreamTransport>,
}

impl Pipeline {
    /// Creates a pipeline over the production WebSocket transport.
    pub fn new(config: PipelineConfig, session_id: impl Into<String>) -> Self {
        Self {
            config,
            session_id: session_id.into(),
            clock: Arc::new(SystemClock),
            transport: Arc::new(WebSocketTransport),
        }
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

    /// Validates the configuration, opens the upstream connection, and
    /// starts the playback loop.
    ///
    /// Returns the control handle and the event stream.
    pub fn start(self) -> Result<(PipelineHandle, mpsc::Receiver<PipelineEvent>)> {
        self.config.validate()?;

        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (upstream_events_tx, upstream_events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (stop_tx, stop_rx) = watch::channel(false);

        let upstream = UpstreamClient::with_transport(self.config.upstream.clone(), self.transport)
            .spawn(upstream_events_tx);

        let mut playback = PlaybackController::new(self.config.playback.clone());
        playback.start();

        let shared = Arc::new(Shared {
            session_id: self.session_id.clone(),
            sentence_pause_ms: self.config.pauses.sentence_ms,
            sequencer: Mutex::new(Sequencer::with_clock(self.clock.clone())),
            jitter: Mutex::new(JitterBuffer::with_clock(
                self.config.jitter.clone(),
                self.clock.clone(),
            )),
            playback: Mutex::new(playback),
            breathing: Mutex::new(BreathingGenerator::new(self.config.breathing.clone())),
            pauses: Mutex::new(PauseManager::new(self.config.pauses.clone())),
            chunks: Mutex::new(ChunkManager::new(self.config.chunk.clone())),
            pending_breath: Mutex::new(None),
            pending_pause_ms: AtomicU32::new(0),
            frames_received: AtomicU64::new(0),
            frames_sent: AtomicU64::new(0),
            ingress_forwarded: AtomicU64::new(0),
            ingress_dropped: AtomicU64::new(0),
            codec_errors: AtomicU64::new(0),
            transcripts: AtomicU64::new(0),
            llm_tokens: AtomicU64::new(0),
            primed: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
        });

        let _ = events_tx.try_send(PipelineEvent::Started);
        tracing::info!(session_id = %self.session_id, "pipeline started");

        tokio::spawn(run_receive(
            shared.clone(),
            upstream_events_rx,
            events_tx.clone(),
            stop_rx.clone(),
        ));
        tokio::spawn(run_playback(shared.clone(), events_tx.clone(), stop_rx));

        let handle = PipelineHandle {
            shared,
            upstream,
            stop_tx: Arc::new(stop_tx),
            events_tx,
        };
        Ok((handle, events_rx))
    }
}

/// Handle to a running pipeline.
#[derive(Clone)]
pub struct PipelineHandle {
    shared: Arc<Shared>,
    upstream: UpstreamHandle,
    stop_tx: Arc<watch::Sender<bool>>,
    events_tx: mpsc::Sender<PipelineEvent>,
}

impl PipelineHandle {
    /// Transcodes one carrier frame and forwards it upstream.
    ///
    /// While the upstream is not open the frame is dropped silently and
    /// counted; an empty frame produces an empty send, never an error.
    pub fn push_ingress(&self, frame: &[u8]) -> Result<()> {
        if self.shared.stopped.load(Ordering::SeqCst) {
            return Err(self.shared.gone());
        }

        let wide = AudioFrame::narrow(frame.to_vec()).into_wide();
        match self.upstream.send(wide.payload) {
            Ok(()) => {
                self.shared.ingress_forwarded.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(BridgeError::NotConnected) => {
                self.shared.ingress_dropped.fetch_add(1, Ordering::Relaxed);
                tracing::trace!(session_id = %self.shared.session_id, "ingress dropped while upstream closed");
                Ok(())
            }
            Err(other) => Err(other),
        }
    }

    /// Feeds a pre-stamped frame into the egress chain.
    ///
    /// This is the seam between the sequencer and the jitter buffer: the
    /// upstream receive task pushes every frame it stamps through here, and
    /// sources that carry their own sequencing can inject directly.
    pub fn push_egress_frame(&self, frame: SequencedFrame) -> Result<()> {
        if self.shared.stopped.load(Ordering::SeqCst) {
            return Err(self.shared.gone());
        }
        self.shared.ingest_sequenced(frame);
        Ok(())
    }

    /// Pauses the playback loop.
    pub fn pause(&self) {
        self.shared.playback.lock().unwrap().pause();
    }

    /// Resumes a paused playback loop.
    pub fn resume(&self) {
        self.shared.playback.lock().unwrap().resume();
    }

    /// Stops the pipeline: closes the upstream, halts the playback loop,
    /// and clears buffers. Idempotent and wait-free; no events are emitted
    /// after the first stop.
    pub fn stop(&self) {
        if self.shared.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::info!(session_id = %self.shared.session_id, "pipeline stopping");

        self.upstream.stop();
        let _ = self.stop_tx.send(true);

        self.shared.jitter.lock().unwrap().clear();
        self.shared.playback.lock().unwrap().stop();

        let _ = self.events_tx.try_send(PipelineEvent::Stopped);
    }

    /// True until the first `stop`.
    pub fn is_running(&self) -> bool {
        !self.shared.stopped.load(Ordering::SeqCst)
    }

    /// State of the upstream connection.
    pub fn upstream_state(&self) -> UpstreamState {
        self.upstream.state()
    }

    /// Aggregated statistics snapshot.
    pub fn stats(&self) -> PipelineStats {
        let shared = &self.shared;
        let (playback_state, current_rate) = {
            let playback = shared.playback.lock().unwrap();
            (playback.state(), playback.current_rate())
        };
        PipelineStats {
            frames_received: shared.frames_received.load(Ordering::Relaxed),
            frames_sent: shared.frames_sent.load(Ordering::Relaxed),
            ingress_forwarded: shared.ingress_forwarded.load(Ordering::Relaxed),
            ingress_dropped: shared.ingress_dropped.load(Ordering::Relaxed),
            codec_errors: shared.codec_errors.load(Ordering::Relaxed),
            transcripts: shared.transcripts.load(Ordering::Relaxed),
            llm_tokens: shared.llm_tokens.load(Ordering::Relaxed),
            jitter: shared.jitter.lock().unwrap().stats(),
            sequencer: shared.sequencer.lock().unwrap().stats(),
            playback_state,
            current_rate,
        }
    }
}

/// State shared by the receive and playback tasks.
///
/// Locks guard short, non-suspending critical sections only: the receive
/// task writes through `ingest_sequenced`, the playback task reads one frame
/// per tick, and both nudge the controller's buffer level.
struct Shared {
    session_id: String,
    /// Pause durations above this mark a long pause for breath insertion.
    sentence_pause_ms: u32,
    sequencer: Mutex<Sequencer>,
    jitter: Mutex<JitterBuffer>,
    playback: Mutex<PlaybackController>,
    breathing: Mutex<BreathingGenerator>,
    pauses: Mutex<PauseManager>,
    chunks: Mutex<ChunkManager>,
    pending_breath: Mutex<Option<BreathKind>>,
    pending_pause_ms: AtomicU32,
    frames_received: AtomicU64,
    frames_sent: AtomicU64,
    ingress_forwarded: AtomicU64,
    ingress_dropped: AtomicU64,
    codec_errors: AtomicU64,
    transcripts: AtomicU64,
    llm_tokens: AtomicU64,
    primed: AtomicBool,
    stopped: AtomicBool,
}

impl Shared {
    fn gone(&self) -> BridgeError {
        BridgeError::SessionGone {
            session_id: self.session_id.clone(),
        }
    }

    /// Classifies a stamped frame, updates loss accounting, and buffers it.
    fn ingest_sequenced(&self, frame: SequencedFrame) {
        let report = self.sequencer.lock().unwrap().process(&frame);

        let level = {
            let mut jitter = self.jitter.lock().unwrap();
            if report.class == FrameClass::Gap {
                jitter.record_lost(report.missing_sequences.len() as u64);
            }
            if report.class != FrameClass::Duplicate {
                jitter.enqueue(frame);
            }
            jitter.fill_level()
        };
        self.playback.lock().unwrap().update_buffer_level(level);
    }

    /// Stamps raw upstream PCM, splitting oversized payloads at the chunk
    /// manager's current granularity.
    fn ingest_upstream_audio(&self, pcm: Vec<u8>) {
        let received = self.frames_received.fetch_add(1, Ordering::Relaxed);

        // Feed the arrival jitter back into the chunk size policy.
        let jitter_ms = self.jitter.lock().unwrap().stats().jitter_ms;
        let chunk_bytes = {
            let mut chunks = self.chunks.lock().unwrap();
            chunks.calculate_optimal_chunk_ms(None, Some(jitter_ms)) as usize * WIDE_BYTES_PER_MS
        };

        let pieces: Vec<Vec<u8>> = if pcm.len() > chunk_bytes {
            let chunks = self.chunks.lock().unwrap();
            chunks.split(&pcm).into_iter().map(|c| c.bytes).collect()
        } else {
            vec![pcm]
        };

        for (index, piece) in pieces.into_iter().enumerate() {
            let flags = if received == 0 && index == 0 {
                FrameFlags::first()
            } else {
                FrameFlags::continuation()
            };
            let duration_samples = (piece.len() / 2) as u32;
            let frame = self
                .sequencer
                .lock()
                .unwrap()
                .create(piece, duration_samples, flags);
            self.ingest_sequenced(frame);
        }
    }

    /// Reacts to transcript/generation text: schedules breathing bursts and
    /// sentence pauses for the egress splice.
    fn analyze_text(&self, text: &str) {
        let trimmed = text.trim_end();
        if trimmed.is_empty() {
            return;
        }
        let at_sentence_end = trimmed.ends_with(['.', '?', '!']);
        let words = last_sentence_word_count(trimmed);

        let mut pause_ms = 0;
        if at_sentence_end {
            let points = self.pauses.lock().unwrap().analyze(trimmed);
            if let Some(last) = points.last() {
                pause_ms = last.duration_ms;
            }
        }
        let at_long_pause = pause_ms > self.sentence_pause_ms;

        if let Some(kind) =
            self.breathing
                .lock()
                .unwrap()
                .should_insert(words, at_sentence_end, at_long_pause)
        {
            *self.pending_breath.lock().unwrap() = Some(kind);
        }

        if pause_ms > 0 {
            self.pending_pause_ms.store(pause_ms, Ordering::Relaxed);
        }
    }
}

/// Words in the text's final sentence.
fn last_sentence_word_count(text: &str) -> usize {
    let body = text.trim_end_matches(['.', '?', '!']);
    body.rsplit(['.', '?', '!'])
        .next()
        .map(|sentence| sentence.split_whitespace().count())
        .unwrap_or(0)
}

/// Consumes upstream events: audio into the egress chain, text into
/// breathing/pause scheduling, lifecycle events upward.
async fn run_receive(
    shared: Arc<Shared>,
    mut upstream_events: mpsc::Receiver<UpstreamEvent>,
    events: mpsc::Sender<PipelineEvent>,
    mut stop_rx: watch::Receiver<bool>,
) {
    loop {
        let event = tokio::select! {
            _ = stop_rx.changed() => break,
            event = upstream_events.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };
        if shared.stopped.load(Ordering::SeqCst) {
            break;
        }

        let forward = match event {
            UpstreamEvent::Audio(pcm) => {
                shared.ingest_upstream_audio(pcm);
                None
            }
            UpstreamEvent::Connected { connection_id } => {
                Some(PipelineEvent::Connected { connection_id })
            }
            UpstreamEvent::Disconnected { code, reason } => {
                Some(PipelineEvent::Disconnected { code, reason })
            }
            UpstreamEvent::Transcript(text) => {
                shared.transcripts.fetch_add(1, Ordering::Relaxed);
                shared.analyze_text(&text);
                Some(PipelineEvent::Transcript(text))
            }
            UpstreamEvent::LlmToken(text) => {
                shared.llm_tokens.fetch_add(1, Ordering::Relaxed);
                Some(PipelineEvent::LlmToken(text))
            }
            UpstreamEvent::LlmDone(text) => {
                shared.analyze_text(&text);
                Some(PipelineEvent::LlmDone(text))
            }
            UpstreamEvent::BackoffExhausted { attempts } => Some(PipelineEvent::Error {
                kind: "BACKOFF_EXHAUSTED",
                message: format!("upstream reconnect gave up after {attempts} attempts"),
            }),
        };

        if let Some(event) = forward
            && !shared.stopped.load(Ordering::SeqCst)
        {
            let _ = events.send(event).await;
        }
    }
}

/// The playback timer loop: dequeues, conceals, splices, transcodes, emits.
async fn run_playback(
    shared: Arc<Shared>,
    events: mpsc::Sender<PipelineEvent>,
    mut stop_rx: watch::Receiver<bool>,
) {
    let nominal = Duration::from_millis(NOMINAL_FRAME_MS as u64);
    let mut last_sequence: Option<u64> = None;
    let mut last_sample: i16 = 0;

    loop {
        let period = shared.playback.lock().unwrap().tick_period(nominal);
        tokio::select! {
            _ = stop_rx.changed() => break,
            _ = tokio::time::sleep(period) => {}
        }
        if shared.stopped.load(Ordering::SeqCst) {
            break;
        }

        // One tick: pull at most one frame under short critical sections.
        let playing = matches!(
            shared.playback.lock().unwrap().state(),
            PlaybackState::Playing | PlaybackState::Buffering
        );
        let (frame, level) = {
            let mut jitter = shared.jitter.lock().unwrap();
            let frame = if !playing {
                None
            } else if shared.primed.load(Ordering::Relaxed) {
                jitter.dequeue()
            } else if jitter.is_ready() {
                shared.primed.store(true, Ordering::Relaxed);
                jitter.dequeue()
            } else {
                // Still filling toward the initial target; not an underrun.
                None
            };
            (frame, jitter.fill_level())
        };
        shared.playback.lock().unwrap().update_buffer_level(level);

        if !playing {
            continue;
        }

        let mut samples = match frame {
            Some(frame) => {
                let mut samples = match pcm_bytes_to_samples(&frame.payload) {
                    Ok(samples) => samples,
                    Err(err) => {
                        shared.codec_errors.fetch_add(1, Ordering::Relaxed);
                        tracing::warn!(session_id = %shared.session_id, error = %err, "egress frame aborted");
                        continue;
                    }
                };

                // A sequence jump means lost audio: span it with a
                // fade-to-silence spliced onto the next real frame.
                if let Some(prev) = last_sequence
                    && frame.sequence > prev + 1
                {
                    let gap_ms = (frame.sequence - prev - 1) as u32 * NOMINAL_FRAME_MS;
                    let playback = shared.playback.lock().unwrap();
                    let concealment = playback.conceal(last_sample, gap_ms);
                    samples = playback.crossfade(&concealment, &samples);
                }
                last_sequence = Some(frame.sequence);
                samples
            }
            None => {
                if !shared.primed.load(Ordering::Relaxed) {
                    continue;
                }
                // Underrun after playout began: one tick of concealment so
                // the carrier never starves.
                shared
                    .playback
                    .lock()
                    .unwrap()
                    .conceal(last_sample, NOMINAL_FRAME_MS)
            }
        };

        // Splice one scheduled breathing burst or sentence pause.
        let breath = shared.pending_breath.lock().unwrap().take();
        if let Some(kind) = breath {
            let burst = shared.breathing.lock().unwrap().generate(kind, None);
            samples.extend_from_slice(&burst);
            // The burst already breaks the sentence boundary.
            shared.pending_pause_ms.store(0, Ordering::Relaxed);
        } else {
            let pause_ms = shared.pending_pause_ms.swap(0, Ordering::Relaxed);
            if pause_ms > 0 {
                let silence = shared.pauses.lock().unwrap().generate_pause(pause_ms);
                if let Ok(mut pause_samples) = pcm_bytes_to_samples(&silence) {
                    samples.append(&mut pause_samples);
                }
            }
        }

        if samples.is_empty() {
            continue;
        }
        last_sample = *samples.last().unwrap_or(&0);

        let narrow = match AudioFrame::wide(samples_to_pcm_bytes(&samples)).into_narrow() {
            Ok(frame) => frame.payload,
            Err(err) => {
                shared.codec_errors.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(session_id = %shared.session_id, error = %err, "egress transcode failed");
                continue;
            }
        };

        if shared.stopped.load(Ordering::SeqCst) {
            break;
        }
        shared.frames_sent.fetch_add(1, Ordering::Relaxed);
        let _ = events.send(PipelineEvent::Audio(narrow)).await;
    }
}

//! Events and statistics published by a call pipeline.

use crate::pipeline::jitter_buffer::JitterBufferStats;
use crate::pipeline::playback::PlaybackState;
use crate::pipeline::sequencer::SequencerStats;

/// Everything a pipeline reports upward, as one sum type over one channel.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    Started,
    Stopped,
    Connected {
        connection_id: String,
    },
    Disconnected {
        code: u16,
        reason: String,
    },
    /// Partial transcript of caller speech.
    Transcript(String),
    /// One generation token.
    LlmToken(String),
    /// Generation finished; carries the full text.
    LlmDone(String),
    /// One companded narrow-band frame ready for the carrier.
    Audio(Vec<u8>),
    Error {
        kind: &'static str,
        message: String,
    },
}

/// Aggregated view over the pipeline's components.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineStats {
    /// Audio frames received from the upstream.
    pub frames_received: u64,
    /// Egress frames emitted to the carrier.
    pub frames_sent: u64,
    /// Ingress frames transcoded and forwarded upstream.
    pub ingress_forwarded: u64,
    /// Ingress frames dropped because the upstream was not open.
    pub ingress_dropped: u64,
    /// Frames aborted by a codec precondition failure.
    pub codec_errors: u64,
    pub transcripts: u64,
    pub llm_tokens: u64,
    pub jitter: JitterBufferStats,
    pub sequencer: SequencerStats,
    pub playback_state: PlaybackState,
    pub current_rate: f64,
}

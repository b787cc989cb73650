//! The per-call streaming pipeline.
//!
//! Egress frames flow Sequencer -> Jitter Buffer -> Playback Controller,
//! with breathing and pause splices decided from transcript text. The
//! orchestrator owns one instance of everything and wires it to the
//! upstream client.

pub mod breathing;
pub mod chunk_manager;
pub mod event;
pub mod jitter_buffer;
pub mod orchestrator;
pub mod pauses;
pub mod playback;
pub mod sequencer;

pub use breathing::{BreathKind, BreathingGenerator};
pub use chunk_manager::{ChunkManager, SplitChunk};
pub use event::{PipelineEvent, PipelineStats};
pub use jitter_buffer::{JitterBuffer, JitterBufferStats};
pub use orchestrator::{Pipeline, PipelineHandle};
pub use pauses::{PauseKind, PauseManager, PausePoint};
pub use playback::{PlaybackController, PlaybackState};
pub use sequencer::{FrameClass, SequenceReport, Sequencer, SequencerStats};

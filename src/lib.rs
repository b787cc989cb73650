//! callbridge - per-call media streaming engine.
//!
//! Bridges a telephony carrier's bidirectional media stream (8-bit companded
//! mono at 8kHz) with an upstream conversational speech service (16-bit
//! linear PCM at 16kHz) over a duplex framed connection. Each call runs a
//! soft-real-time pipeline: transcode, adaptive jitter buffering, sequencing
//! with gap concealment, paced playback, and breathing/pause insertion.

pub mod audio;
pub mod carrier;
pub mod clock;
pub mod config;
pub mod defaults;
pub mod error;
pub mod pipeline;
pub mod session;
pub mod upstream;

pub use audio::{AudioFormat, AudioFrame, FrameFlags, SequencedFrame};
pub use carrier::{CarrierAdapter, EgressSink, StreamTokenStore};
pub use clock::{Clock, MockClock, SystemClock};
pub use config::PipelineConfig;
pub use error::{BridgeError, Result};
pub use pipeline::{Pipeline, PipelineEvent, PipelineHandle, PipelineStats};
pub use session::{CallDirection, CallSession, CallStatus};
pub use upstream::{UpstreamClient, UpstreamEvent, UpstreamState};

//! Default configuration constants for callbridge.
//!
//! This module provides shared constants used across the configuration types
//! to ensure consistency and eliminate duplication.

/// Wide-band sample rate in Hz.
///
/// 16kHz linear PCM is the upstream conversation service's wire format and
/// the rate every in-pipeline synthesis helper (breathing, pauses,
/// concealment) produces at.
pub const WIDE_SAMPLE_RATE: u32 = 16_000;

/// Narrow-band sample rate in Hz.
///
/// 8kHz companded mono is the carrier's on-the-wire form.
pub const NARROW_SAMPLE_RATE: u32 = 8_000;

/// Nominal frame duration in milliseconds.
///
/// Carrier media arrives in 20ms frames and the playback loop ticks at this
/// period (scaled by the playback rate). Used as the depth estimate for
/// frames that carry no duration of their own.
pub const NOMINAL_FRAME_MS: u32 = 20;

/// Bytes of wide-band PCM per millisecond (16kHz, 16-bit mono).
pub const WIDE_BYTES_PER_MS: usize = 32;

/// Companded byte value representing ~0 linear amplitude.
pub const COMPANDED_SILENCE: u8 = 0xFF;

/// Default adaptive jitter buffer bounds in milliseconds.
pub const JITTER_MIN_MS: u32 = 40;
pub const JITTER_MAX_MS: u32 = 200;
pub const JITTER_TARGET_MS: u32 = 60;

/// Minimum spacing between jitter target recomputations in milliseconds.
pub const JITTER_ADAPTATION_INTERVAL_MS: u64 = 100;

/// Jitter-to-depth multiplier for target adaptation.
pub const JITTER_MULTIPLIER: f64 = 2.0;

/// Number of inter-arrival deltas kept for jitter estimation.
pub const JITTER_WINDOW: usize = 50;

/// Playback rate adaptation range around the 1.0 base.
pub const PLAYBACK_MIN_RATE: f64 = 0.95;
pub const PLAYBACK_MAX_RATE: f64 = 1.05;

/// Buffer-level watermarks (fractions of the maximum depth) that trigger
/// playback rate nudging.
pub const PLAYBACK_LOW_WATERMARK: f64 = 0.2;
pub const PLAYBACK_HIGH_WATERMARK: f64 = 0.8;

/// Rate nudge applied outside the watermark band.
pub const PLAYBACK_RATE_STEP: f64 = 0.02;

/// Default crossfade window in milliseconds.
pub const CROSSFADE_MS: u32 = 20;

/// Output chunk size policy bounds in milliseconds.
pub const CHUNK_MIN_MS: u32 = 100;
pub const CHUNK_MAX_MS: u32 = 1000;
pub const CHUNK_DEFAULT_MS: u32 = 200;

/// Observations of latency/jitter kept by the chunk manager.
pub const CHUNK_HISTORY: usize = 20;

/// Default base intensity for breathing bursts (0.0 to 1.0).
pub const BREATHING_INTENSITY: f32 = 0.3;

/// Breathing burst duration bounds in milliseconds.
pub const BREATH_MIN_MS: u32 = 100;
pub const BREATH_MAX_MS: u32 = 300;

/// Pause durations per punctuation mark in milliseconds.
pub const PAUSE_COMMA_MS: u32 = 150;
pub const PAUSE_PERIOD_MS: u32 = 500;
pub const PAUSE_QUESTION_MS: u32 = 600;
pub const PAUSE_EXCLAMATION_MS: u32 = 200;
pub const PAUSE_SENTENCE_MS: u32 = 400;

/// Floor below which no pause is inserted.
pub const PAUSE_FLOOR_MS: u32 = 50;

/// Capacity of the sequencer's seen-set before old entries are pruned.
pub const SEQUENCER_SEEN_CAPACITY: usize = 1000;

/// Upstream connection attempt timeout in seconds.
pub const UPSTREAM_CONNECT_TIMEOUT_SECS: u64 = 5;

/// Reconnect backoff: base delay, cap, and attempt ceiling.
pub const BACKOFF_BASE_SECS: u64 = 1;
pub const BACKOFF_CAP_SECS: u64 = 30;
pub const BACKOFF_MAX_ATTEMPTS: u32 = 5;

/// Stream-authentication token lifetime in seconds.
pub const STREAM_TOKEN_TTL_SECS: u64 = 300;

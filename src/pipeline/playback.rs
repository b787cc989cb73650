//! Playback pacing: rate adaptation, crossfade, and gap concealment.
//!
//! Rate changes are applied by varying the output tick period, never by
//! pitch-shifting samples.

use crate::config::PlaybackConfig;
use crate::defaults::{PLAYBACK_RATE_STEP, WIDE_SAMPLE_RATE};
use std::time::Duration;

/// Lifecycle state of the playback loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    Stopped,
    Playing,
    Paused,
    /// Playing, but the buffer level is below the low watermark.
    Buffering,
}

/// Drives the egress tick cadence and smooths frame joins.
pub struct PlaybackController {
    config: PlaybackConfig,
    state: PlaybackState,
    rate: f64,
}

impl PlaybackController {
    const BASE_RATE: f64 = 1.0;

    pub fn new(config: PlaybackConfig) -> Self {
        Self {
            config,
            state: PlaybackState::Stopped,
            rate: Self::BASE_RATE,
        }
    }

    /// Begins playback from the stopped state.
    pub fn start(&mut self) {
        if self.state == PlaybackState::Stopped {
            self.state = PlaybackState::Playing;
            self.rate = Self::BASE_RATE;
        }
    }

    /// Pauses an active playback loop.
    pub fn pause(&mut self) {
        if matches!(self.state, PlaybackState::Playing | PlaybackState::Buffering) {
            self.state = PlaybackState::Paused;
        }
    }

    /// Resumes from a pause.
    pub fn resume(&mut self) {
        if self.state == PlaybackState::Paused {
            self.state = PlaybackState::Playing;
        }
    }

    /// Stops playback and resets the rate.
    pub fn stop(&mut self) {
        self.state = PlaybackState::Stopped;
        self.rate = Self::BASE_RATE;
    }

    /// Applies the watermark policy to a buffer level in `0.0..=1.0`.
    ///
    /// Called after every enqueue and dequeue. Below the low watermark the
    /// rate is nudged down and the state reports Buffering; above the high
    /// watermark the rate is nudged up; in the band the rate returns to base.
    pub fn update_buffer_level(&mut self, level: f64) {
        if matches!(self.state, PlaybackState::Stopped | PlaybackState::Paused) {
            return;
        }

        let raw = if level < self.config.low_watermark {
            self.state = PlaybackState::Buffering;
            Self::BASE_RATE - PLAYBACK_RATE_STEP
        } else if level > self.config.high_watermark {
            self.state = PlaybackState::Playing;
            Self::BASE_RATE + PLAYBACK_RATE_STEP
        } else {
            self.state = PlaybackState::Playing;
            Self::BASE_RATE
        };

        self.rate = raw.clamp(self.config.min_rate, self.config.max_rate);
    }

    /// The effective playback rate, always within `[min_rate, max_rate]`.
    pub fn current_rate(&self) -> f64 {
        self.rate
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    /// Tick period for a nominal frame duration at the current rate.
    ///
    /// A rate above 1.0 shortens the period (drains the buffer faster).
    pub fn tick_period(&self, nominal: Duration) -> Duration {
        nominal.div_f64(self.rate)
    }

    /// Joins two sample buffers with an equal-gain linear crossfade of up to
    /// the configured window.
    ///
    /// When either side is shorter than the ramp the buffers are simply
    /// concatenated.
    pub fn crossfade(&self, a: &[i16], b: &[i16]) -> Vec<i16> {
        let ramp = (self.config.crossfade_ms as usize * WIDE_SAMPLE_RATE as usize) / 1000;
        if ramp == 0 || a.len() < ramp || b.len() < ramp {
            let mut out = a.to_vec();
            out.extend_from_slice(b);
            return out;
        }

        let mut out = Vec::with_capacity(a.len() + b.len() - ramp);
        out.extend_from_slice(&a[..a.len() - ramp]);
        for i in 0..ramp {
            let fade_out = (ramp - i) as f64 / ramp as f64;
            let fade_in = i as f64 / ramp as f64;
            let tail = a[a.len() - ramp + i] as f64 * fade_out;
            let head = b[i] as f64 * fade_in;
            out.push((tail + head).clamp(i16::MIN as f64, i16::MAX as f64) as i16);
        }
        out.extend_from_slice(&b[ramp..]);
        out
    }

    /// Synthesizes a fade-to-silence from the last available sample.
    ///
    /// Used to span a detected gap; no pitch synthesis.
    pub fn conceal(&self, last_sample: i16, duration_ms: u32) -> Vec<i16> {
        let samples = (duration_ms as usize * WIDE_SAMPLE_RATE as usize) / 1000;
        (0..samples)
            .map(|i| {
                let remaining = (samples - i) as f64 / samples.max(1) as f64;
                (last_sample as f64 * remaining) as i16
            })
            .collect()
    }
}

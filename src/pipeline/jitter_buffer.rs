//! Adaptive jitter buffer for egress frames.
//!
//! Order-preserving FIFO keyed by sequence number. The target depth adapts
//! to measured inter-arrival jitter; overflow evicts the oldest frames.

use crate::audio::frame::SequencedFrame;
use crate::clock::{Clock, SystemClock};
use crate::config::JitterConfig;
use crate::defaults::{
    JITTER_ADAPTATION_INTERVAL_MS, JITTER_MULTIPLIER, JITTER_WINDOW, NOMINAL_FRAME_MS,
};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Snapshot of the buffer's arrival statistics and counters.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct JitterBufferStats {
    /// Mean inter-arrival gap over the sliding window, in milliseconds.
    pub mean_gap_ms: f64,
    /// Standard deviation of inter-arrival gaps, in milliseconds.
    pub jitter_ms: f64,
    pub total: u64,
    pub out_of_order: u64,
    pub duplicates: u64,
    pub lost: u64,
    pub underruns: u64,
    pub overruns: u64,
    /// Audio currently buffered, in milliseconds.
    pub depth_ms: u32,
    /// Depth the buffer aims to hold before playback may drain it.
    pub target_ms: u32,
}

/// Order-preserving FIFO with adaptive target depth.
pub struct JitterBuffer {
    config: JitterConfig,
    clock: Arc<dyn Clock>,
    frames: VecDeque<SequencedFrame>,
    deltas: VecDeque<f64>,
    last_arrival: Option<Instant>,
    last_adaptation: Option<Instant>,
    target_ms: f64,
    draining: bool,
    last_dequeued: Option<u64>,
    mean_gap_ms: f64,
    jitter_ms: f64,
    total: u64,
    out_of_order: u64,
    duplicates: u64,
    lost: u64,
    underruns: u64,
    overruns: u64,
}

impl JitterBuffer {
    /// Creates a buffer on the system clock.
    pub fn new(config: JitterConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Creates a buffer with an injected clock.
    pub fn with_clock(config: JitterConfig, clock: Arc<dyn Clock>) -> Self {
        let target_ms = config.target_ms as f64;
        Self {
            config,
            clock,
            frames: VecDeque::new(),
            deltas: VecDeque::with_capacity(JITTER_WINDOW),
            last_arrival: None,
            last_adaptation: None,
            target_ms,
            draining: false,
            last_dequeued: None,
            mean_gap_ms: 0.0,
            jitter_ms: 0.0,
            total: 0,
            out_of_order: 0,
            duplicates: 0,
            lost: 0,
            underruns: 0,
            overruns: 0,
        }
    }

    /// Enqueues a frame; never blocks, may evict the oldest frames.
    ///
    /// Frames are inserted in sequence order regardless of arrival order;
    /// a frame whose sequence is already buffered is dropped. A frame at or
    /// below the highest sequence already dequeued arrives too late to
    /// re-slot and is dropped as well, so egress never goes backward.
    pub fn enqueue(&mut self, frame: SequencedFrame) {
        let now = self.clock.now();
        if let Some(last) = self.last_arrival {
            let delta_ms = now.duration_since(last).as_secs_f64() * 1000.0;
            if self.deltas.len() == JITTER_WINDOW {
                self.deltas.pop_front();
            }
            self.deltas.push_back(delta_ms);
        }
        self.last_arrival = Some(now);
        self.maybe_adapt(now);

        if let Some(floor) = self.last_dequeued
            && frame.sequence <= floor
        {
            self.out_of_order += 1;
            tracing::debug!(
                sequence = frame.sequence,
                floor,
                "frame behind playout dropped"
            );
            return;
        }

        if self
            .frames
            .iter()
            .any(|buffered| buffered.sequence == frame.sequence)
        {
            self.duplicates += 1;
            return;
        }

        self.total += 1;

        // Insert keeping the buffer ordered by sequence, not by arrival.
        let position = self
            .frames
            .iter()
            .rposition(|buffered| buffered.sequence < frame.sequence)
            .map(|i| i + 1)
            .unwrap_or(0);
        if position != self.frames.len() {
            self.out_of_order += 1;
        }
        self.frames.insert(position, frame);

        while self.depth_ms() > self.config.max_ms && self.frames.len() > 1 {
            self.frames.pop_front();
            self.overruns += 1;
            tracing::debug!(depth_ms = self.depth_ms(), "jitter buffer overflow, oldest frame dropped");
        }
    }

    /// Dequeues the lowest-sequence frame.
    ///
    /// The target depth gates the start of playout: until it is reached
    /// once, dequeuing records an underrun and returns nothing. While
    /// draining, frames flow even below target; running completely empty is
    /// the underrun that sends the buffer back to filling.
    pub fn dequeue(&mut self) -> Option<SequencedFrame> {
        if !self.draining {
            if self.is_ready() {
                self.draining = true;
            } else {
                self.underruns += 1;
                return None;
            }
        }
        match self.frames.pop_front() {
            Some(frame) => {
                self.last_dequeued = Some(frame.sequence);
                Some(frame)
            }
            None => {
                self.underruns += 1;
                self.draining = false;
                None
            }
        }
    }

    /// True when the buffered depth has reached the adaptive target.
    pub fn is_ready(&self) -> bool {
        !self.frames.is_empty() && self.depth_ms() as f64 >= self.target_ms
    }

    /// Audio currently buffered, in milliseconds.
    ///
    /// Uses each frame's own duration; frames without one are assumed to be
    /// nominal 20ms frames.
    pub fn depth_ms(&self) -> u32 {
        self.frames
            .iter()
            .map(|frame| {
                let ms = frame.duration_ms();
                if ms == 0 { NOMINAL_FRAME_MS } else { ms }
            })
            .sum()
    }

    /// Buffered depth as a fraction of the maximum depth.
    pub fn fill_level(&self) -> f64 {
        if self.config.max_ms == 0 {
            return 0.0;
        }
        (self.depth_ms() as f64 / self.config.max_ms as f64).min(1.0)
    }

    /// Records sequences lost to gaps, as reported by the sequencer.
    pub fn record_lost(&mut self, count: u64) {
        self.lost += count;
    }

    /// Number of frames currently buffered.
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// True when no frames are buffered.
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Drops all buffered frames without touching the counters.
    pub fn clear(&mut self) {
        self.frames.clear();
        self.draining = false;
    }

    /// Snapshot of the current statistics.
    pub fn stats(&self) -> JitterBufferStats {
        JitterBufferStats {
            mean_gap_ms: self.mean_gap_ms,
            jitter_ms: self.jitter_ms,
            total: self.total,
            out_of_order: self.out_of_order,
            duplicates: self.duplicates,
            lost: self.lost,
            underruns: self.underruns,
            overruns: self.overruns,
            depth_ms: self.depth_ms(),
            target_ms: self.target_ms as u32,
        }
    }

    /// Recomputes jitter and the target depth, at most once per adaptation
    /// interval.
    fn maybe_adapt(&mut self, now: Instant) {
        let interval = Duration::from_millis(JITTER_ADAPTATION_INTERVAL_MS);
        if let Some(last) = self.last_adaptation
            && now.duration_since(last) < interval
        {
            return;
        }
        self.last_adaptation = Some(now);

        if self.deltas.is_empty() {
            return;
        }

        let mean = self.deltas.iter().sum::<f64>() / self.deltas.len() as f64;
        let variance = self
            .deltas
            .iter()
            .map(|delta| (delta - mean).powi(2))
            .sum::<f64>()
            / self.deltas.len() as f64;
        self.mean_gap_ms = mean;
        self.jitter_ms = variance.sqrt();

        let min = self.config.min_ms as f64;
        let max = self.config.max_ms as f64;
        self.target_ms = (min + JITTER_MULTIPLIER * self.jitter_ms).clamp(min, max);
    }
}

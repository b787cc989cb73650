//! Frame sequencing: stamping, duplicate rejection, and gap detection.

use crate::audio::frame::{FrameFlags, SequencedFrame};
use crate::clock::{Clock, SystemClock};
use crate::defaults::SEQUENCER_SEEN_CAPACITY;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;

/// Classification of an incoming stamped frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameClass {
    /// Sequence matched the cursor.
    Normal,
    /// Sequence already seen; the frame carries no new audio.
    Duplicate,
    /// Sequence below the cursor; the caller decides whether to re-slot or
    /// drop.
    OutOfOrder,
    /// Sequence above the cursor; intermediate frames are missing.
    Gap,
}

/// Result of classifying one frame.
#[derive(Debug, Clone)]
pub struct SequenceReport {
    pub class: FrameClass,
    /// Sequences in `[expected, sequence)` when a gap was detected.
    pub missing_sequences: Vec<u64>,
}

impl SequenceReport {
    fn normal() -> Self {
        Self {
            class: FrameClass::Normal,
            missing_sequences: Vec::new(),
        }
    }
}

/// Monotonic counters across a session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SequencerStats {
    pub total: u64,
    pub duplicates: u64,
    pub out_of_order: u64,
    pub gaps: u64,
    /// Total count of sequences reported missing.
    pub lost: u64,
}

/// Assigns outgoing sequence numbers and classifies incoming stamped frames.
pub struct Sequencer {
    clock: Arc<dyn Clock>,
    epoch: Instant,
    next_sequence: u64,
    expected_sequence: u64,
    seen: BTreeSet<u64>,
    first_stamped: bool,
    last_stamped: bool,
    stats: SequencerStats,
}

impl Sequencer {
    /// Creates a sequencer on the system clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Creates a sequencer with an injected clock.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        let epoch = clock.now();
        Self {
            clock,
            epoch,
            next_sequence: 0,
            expected_sequence: 0,
            seen: BTreeSet::new(),
            first_stamped: false,
            last_stamped: false,
            stats: SequencerStats::default(),
        }
    }

    /// Stamps a payload with the next sequence number and a fresh monotonic
    /// timestamp.
    ///
    /// Flags are normalized so that `first` and `last` appear at most once
    /// per stream and `continuation` excludes both.
    pub fn create(
        &mut self,
        payload: Vec<u8>,
        duration_samples: u32,
        mut flags: FrameFlags,
    ) -> SequencedFrame {
        if flags.continuation {
            flags.first = false;
            flags.last = false;
        }
        if flags.first {
            if self.first_stamped {
                flags.first = false;
            } else {
                self.first_stamped = true;
            }
        }
        if flags.last {
            if self.last_stamped {
                flags.last = false;
            } else {
                self.last_stamped = true;
            }
        }

        let sequence = self.next_sequence;
        self.next_sequence += 1;

        let timestamp_us = self.clock.now().duration_since(self.epoch).as_micros() as u64;

        SequencedFrame {
            sequence,
            timestamp_us,
            duration_samples,
            flags,
            payload,
        }
    }

    /// Classifies an incoming stamped frame against the expected cursor.
    ///
    /// Duplicate is tested first and short-circuits, so a single frame is
    /// never reported as both duplicate and gap.
    pub fn process(&mut self, frame: &SequencedFrame) -> SequenceReport {
        self.stats.total += 1;
        let sequence = frame.sequence;

        if self.seen.contains(&sequence) {
            self.stats.duplicates += 1;
            return SequenceReport {
                class: FrameClass::Duplicate,
                missing_sequences: Vec::new(),
            };
        }

        if sequence < self.expected_sequence {
            self.stats.out_of_order += 1;
            self.remember(sequence);
            return SequenceReport {
                class: FrameClass::OutOfOrder,
                missing_sequences: Vec::new(),
            };
        }

        if sequence > self.expected_sequence {
            let missing: Vec<u64> = (self.expected_sequence..sequence).collect();
            self.stats.gaps += 1;
            self.stats.lost += missing.len() as u64;
            self.remember(sequence);
            self.expected_sequence = sequence + 1;
            return SequenceReport {
                class: FrameClass::Gap,
                missing_sequences: missing,
            };
        }

        self.remember(sequence);
        self.expected_sequence += 1;
        SequenceReport::normal()
    }

    /// Current counters.
    pub fn stats(&self) -> SequencerStats {
        self.stats
    }

    /// The sequence the next in-order frame is expected to carry.
    pub fn expected_sequence(&self) -> u64 {
        self.expected_sequence
    }

    fn remember(&mut self, sequence: u64) {
        self.seen.insert(sequence);
        if self.seen.len() > SEQUENCER_SEEN_CAPACITY {
            let cutoff = self
                .expected_sequence
                .saturating_sub(SEQUENCER_SEEN_CAPACITY as u64);
            self.seen = self.seen.split_off(&cutoff);
        }
    }
}

impl Default for Sequencer {
    fn default() -> Self {
        Self::new()
    }
}

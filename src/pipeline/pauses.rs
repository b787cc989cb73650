//! Pause insertion from punctuation signal.
//!
//! Analyzes transcript text for punctuation, maps each mark to a silence
//! duration, and splices the silence into egress audio.

use crate::config::PauseConfig;
use crate::defaults::{PAUSE_FLOOR_MS, WIDE_BYTES_PER_MS};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

/// What triggered a pause.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PauseKind {
    Comma,
    Period,
    Question,
    Exclamation,
    SentenceBoundary,
}

/// One pause decision: where, how long, and why.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PausePoint {
    /// Character index of the triggering mark.
    pub position: usize,
    pub duration_ms: u32,
    pub kind: PauseKind,
}

/// Decides pause insertion points and durations.
pub struct PauseManager {
    config: PauseConfig,
    rng: SmallRng,
}

impl PauseManager {
    pub fn new(config: PauseConfig) -> Self {
        Self {
            config,
            rng: SmallRng::from_os_rng(),
        }
    }

    /// Deterministic construction for tests.
    pub fn with_seed(config: PauseConfig, seed: u64) -> Self {
        Self {
            config,
            rng: SmallRng::seed_from_u64(seed),
        }
    }

    /// Finds pause points in a piece of text.
    ///
    /// Sentence-ending marks followed by more text additionally produce a
    /// sentence-boundary point. Durations are scaled by the speech rate,
    /// optionally perturbed by a uniform +/-20%, and floored at 50ms.
    pub fn analyze(&mut self, text: &str) -> Vec<PausePoint> {
        if !self.config.enabled {
            return Vec::new();
        }

        let chars: Vec<char> = text.chars().collect();
        let mut points = Vec::new();

        for (position, &ch) in chars.iter().enumerate() {
            let (base_ms, kind) = match ch {
                ',' => (self.config.comma_ms, PauseKind::Comma),
                '.' => (self.config.period_ms, PauseKind::Period),
                '?' => (self.config.question_ms, PauseKind::Question),
                '!' => (self.config.exclamation_ms, PauseKind::Exclamation),
                _ => continue,
            };

            points.push(PausePoint {
                position,
                duration_ms: self.scaled(base_ms),
                kind,
            });

            // A sentence-ending mark mid-text also marks a boundary.
            let sentence_end = matches!(ch, '.' | '?' | '!');
            let more_text = chars[position + 1..].iter().any(|c| c.is_alphanumeric());
            if sentence_end && more_text {
                points.push(PausePoint {
                    position,
                    duration_ms: self.scaled(self.config.sentence_ms),
                    kind: PauseKind::SentenceBoundary,
                });
            }
        }

        points
    }

    /// Splices silence into audio chunks at the analyzed positions.
    ///
    /// `samples_per_char` maps a character position to a sample offset in
    /// the concatenated audio.
    pub fn insert_pauses(
        &mut self,
        chunks: Vec<Vec<u8>>,
        points: &[PausePoint],
        samples_per_char: usize,
    ) -> Vec<Vec<u8>> {
        if points.is_empty() || chunks.is_empty() {
            return chunks;
        }

        let mut result = Vec::with_capacity(chunks.len());
        let mut chunk_start_bytes = 0usize;

        for chunk in chunks {
            let chunk_end_bytes = chunk_start_bytes + chunk.len();

            let mut spliced = Vec::with_capacity(chunk.len());
            let mut copied = 0usize;
            for point in points {
                let offset_bytes = point.position * samples_per_char * 2;
                if offset_bytes < chunk_start_bytes || offset_bytes >= chunk_end_bytes {
                    continue;
                }
                let local = (offset_bytes - chunk_start_bytes).min(chunk.len());
                // Keep sample alignment.
                let local = local - (local % 2);
                spliced.extend_from_slice(&chunk[copied..local]);
                spliced.extend_from_slice(&self.generate_pause(point.duration_ms));
                copied = local;
            }
            spliced.extend_from_slice(&chunk[copied..]);

            chunk_start_bytes = chunk_end_bytes;
            result.push(spliced);
        }

        result
    }

    /// Produces silence of the given duration as 16kHz PCM bytes.
    pub fn generate_pause(&self, duration_ms: u32) -> Vec<u8> {
        vec![0u8; duration_ms as usize * WIDE_BYTES_PER_MS]
    }

    fn scaled(&mut self, base_ms: u32) -> u32 {
        let mut ms = base_ms as f64 / self.config.speech_rate;
        if self.config.adaptive {
            ms *= self.rng.random_range(0.8..=1.2);
        }
        (ms as u32).max(PAUSE_FLOOR_MS)
    }
}

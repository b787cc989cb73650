//! Output chunk granularity policy.
//!
//! Picks a chunk size between the configured bounds from observed network
//! latency and jitter, and slices wide-band PCM accordingly.

use crate::config::ChunkConfig;
use crate::defaults::{CHUNK_HISTORY, WIDE_BYTES_PER_MS};
use std::collections::VecDeque;

/// One slice of audio produced by [`ChunkManager::split`].
#[derive(Debug, Clone)]
pub struct SplitChunk {
    pub bytes: Vec<u8>,
    /// Position of this chunk within the split.
    pub index: usize,
    /// Offset of this chunk from the start of the source buffer.
    pub offset_ms: u32,
}

/// Chooses output chunk granularity from observed latency and jitter.
pub struct ChunkManager {
    config: ChunkConfig,
    latency_history: VecDeque<f64>,
    jitter_history: VecDeque<f64>,
    current_ms: u32,
}

impl ChunkManager {
    pub fn new(config: ChunkConfig) -> Self {
        let current_ms = config.default_ms;
        Self {
            config,
            latency_history: VecDeque::with_capacity(CHUNK_HISTORY),
            jitter_history: VecDeque::with_capacity(CHUNK_HISTORY),
            current_ms,
        }
    }

    /// Recomputes the optimal chunk size from fresh observations.
    ///
    /// Missing observations fall back to the mean of the recorded history;
    /// with no history at all the configured default holds.
    pub fn calculate_optimal_chunk_ms(
        &mut self,
        latency_ms: Option<f64>,
        jitter_ms: Option<f64>,
    ) -> u32 {
        if let Some(latency) = latency_ms {
            push_capped(&mut self.latency_history, latency);
        }
        if let Some(jitter) = jitter_ms {
            push_capped(&mut self.jitter_history, jitter);
        }

        let latency = latency_ms.or_else(|| mean(&self.latency_history));
        let jitter = jitter_ms.or_else(|| mean(&self.jitter_history));

        let (latency, jitter) = match (latency, jitter) {
            (None, None) => {
                self.current_ms = self.config.default_ms;
                return self.current_ms;
            }
            (l, j) => (l.unwrap_or(0.0), j.unwrap_or(0.0)),
        };

        let min = self.config.min_ms as f64;
        let max = self.config.max_ms as f64;

        let optimal = if latency > 200.0 || jitter > 100.0 {
            min
        } else if latency < 50.0 && jitter < 20.0 {
            max
        } else {
            let quality = 1.0 - (latency / 200.0 + jitter / 100.0).min(1.0);
            min + (max - min) * quality
        };

        self.current_ms = (optimal.clamp(min, max)) as u32;
        self.current_ms
    }

    /// The chunk size currently in effect, in milliseconds.
    pub fn current_chunk_ms(&self) -> u32 {
        self.current_ms
    }

    /// Slices wide-band PCM into chunks of the current optimal size.
    ///
    /// The final chunk keeps whatever remainder is left.
    pub fn split(&self, audio: &[u8]) -> Vec<SplitChunk> {
        if audio.is_empty() {
            return Vec::new();
        }

        let chunk_bytes = (self.current_ms as usize * WIDE_BYTES_PER_MS).max(WIDE_BYTES_PER_MS);
        audio
            .chunks(chunk_bytes)
            .enumerate()
            .map(|(index, bytes)| SplitChunk {
                bytes: bytes.to_vec(),
                index,
                offset_ms: (index * self.current_ms as usize) as u32,
            })
            .collect()
    }
}

fn push_capped(history: &mut VecDeque<f64>, value: f64) {
    if history.len() == CHUNK_HISTORY {
        history.pop_front();
    }
    history.push_back(value);
}

fn mean(history: &VecDeque<f64>) -> Option<f64> {
    if history.is_empty() {
        None
    } else {
        Some(history.iter().sum::<f64>() / history.len() as f64)
    }
}

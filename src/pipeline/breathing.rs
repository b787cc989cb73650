//! Respiration burst synthesis for natural-sounding egress.
//!
//! Bursts are band-limited noise under a trapezoidal envelope with a faint
//! tonal component at the breath type's characteristic frequency.

use crate::config::BreathingConfig;
use crate::defaults::{BREATH_MAX_MS, BREATH_MIN_MS, WIDE_SAMPLE_RATE};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

/// Kinds of respiration bursts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreathKind {
    /// ~200ms at base intensity, ~100Hz formant.
    Normal,
    /// Longest burst, 1.5x intensity, ~50Hz formant.
    Deep,
    /// Shortest burst, 0.7x intensity, ~150Hz formant.
    Quick,
    /// Extended exhale, 1.2x intensity, ~80Hz formant.
    Sigh,
}

impl BreathKind {
    fn default_duration_ms(&self) -> u32 {
        match self {
            BreathKind::Normal => 200,
            BreathKind::Deep => BREATH_MAX_MS,
            BreathKind::Quick => BREATH_MIN_MS,
            BreathKind::Sigh => BREATH_MAX_MS + BREATH_MAX_MS / 2,
        }
    }

    fn intensity_factor(&self) -> f32 {
        match self {
            BreathKind::Normal => 1.0,
            BreathKind::Deep => 1.5,
            BreathKind::Quick => 0.7,
            BreathKind::Sigh => 1.2,
        }
    }

    fn formant_hz(&self) -> f32 {
        match self {
            BreathKind::Normal => 100.0,
            BreathKind::Deep => 50.0,
            BreathKind::Quick => 150.0,
            BreathKind::Sigh => 80.0,
        }
    }
}

/// Synthesizes respiration bursts and decides where they belong.
pub struct BreathingGenerator {
    config: BreathingConfig,
    rng: SmallRng,
}

impl BreathingGenerator {
    pub fn new(config: BreathingConfig) -> Self {
        Self {
            config,
            rng: SmallRng::from_os_rng(),
        }
    }

    /// Deterministic construction for tests.
    pub fn with_seed(config: BreathingConfig, seed: u64) -> Self {
        Self {
            config,
            rng: SmallRng::seed_from_u64(seed),
        }
    }

    /// Synthesizes one burst as 16kHz linear PCM samples.
    ///
    /// The envelope is trapezoidal: 20% fade-in, 60% hold, 20% fade-out.
    pub fn generate(&mut self, kind: BreathKind, duration_ms: Option<u32>) -> Vec<i16> {
        if !self.config.enabled {
            return Vec::new();
        }

        let duration_ms = duration_ms.unwrap_or_else(|| kind.default_duration_ms());
        let total = (duration_ms as usize * WIDE_SAMPLE_RATE as usize) / 1000;
        if total == 0 {
            return Vec::new();
        }

        let peak = (self.config.intensity * kind.intensity_factor()).clamp(0.0, 1.0)
            * i16::MAX as f32
            * 0.25;
        let formant = kind.formant_hz();

        let fade_in = total / 5;
        let fade_out = total / 5;
        let hold_end = total - fade_out;

        // One-pole low-pass keeps the noise band-limited.
        let alpha = 0.15f32;
        let mut filtered = 0.0f32;

        let mut samples = Vec::with_capacity(total);
        for i in 0..total {
            let white: f32 = self.rng.random_range(-1.0..1.0);
            filtered += alpha * (white - filtered);

            let t = i as f32 / WIDE_SAMPLE_RATE as f32;
            let tone = (2.0 * std::f32::consts::PI * formant * t).sin() * 0.1;

            let envelope = if i < fade_in {
                i as f32 / fade_in.max(1) as f32
            } else if i >= hold_end {
                (total - i) as f32 / fade_out.max(1) as f32
            } else {
                1.0
            };

            let value = (filtered + tone) * peak * envelope;
            samples.push(value.clamp(i16::MIN as f32, i16::MAX as f32) as i16);
        }
        samples
    }

    /// Decides whether a burst belongs at the current text position.
    pub fn should_insert(
        &self,
        sentence_word_count: usize,
        at_sentence_end: bool,
        at_long_pause: bool,
    ) -> Option<BreathKind> {
        if !self.config.enabled {
            return None;
        }
        if at_sentence_end && sentence_word_count > 15 {
            return Some(BreathKind::Normal);
        }
        if !at_sentence_end && sentence_word_count > 25 {
            return Some(BreathKind::Deep);
        }
        if at_long_pause {
            return Some(BreathKind::Normal);
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn generator() -> BreathingGenerator {
        BreathingGenerator::with_seed(BreathingConfig::default(), 7)
    }

    #[test]
    fn test_default_durations() {
        let mut generator = generator();
        // Normal: 200ms -> 3200 samples at 16kHz.
        assert_eq!(generator.generate(BreathKind::Normal, None).len(), 3200);
        // Deep: 300ms, Quick: 100ms, Sigh: 450ms.
        assert_eq!(generator.generate(BreathKind::Deep, None).len(), 4800);
        assert_eq!(generator.generate(BreathKind::Quick, None).len(), 1600);
        assert_eq!(generator.generate(BreathKind::Sigh, None).len(), 7200);
    }

    #[test]
    fn test_explicit_duration_overrides_default() {
        let mut generator = generator();
        let burst = generator.generate(BreathKind::Normal, Some(50));
        assert_eq!(burst.len(), 800);
    }

    #[test]
    fn test_envelope_starts_and_ends_quiet() {
        let mut generator = generator();
        let burst = generator.generate(BreathKind::Normal, None);

        let edge: i64 = burst[..16].iter().map(|&s| (s as i64).abs()).sum();
        let middle: i64 = burst[1400..1800].iter().map(|&s| (s as i64).abs()).sum();
        assert!(
            edge * 10 < middle,
            "edge energy {edge} should be far below hold energy {middle}"
        );

        let tail: i64 = burst[burst.len() - 16..]
            .iter()
            .map(|&s| (s as i64).abs())
            .sum();
        assert!(tail * 10 < middle);
    }

    #[test]
    fn test_deep_is_louder_than_quick() {
        let mut generator = generator();
        let deep = generator.generate(BreathKind::Deep, Some(200));
        let quick = generator.generate(BreathKind::Quick, Some(200));

        let energy = |s: &[i16]| s.iter().map(|&v| (v as i64).pow(2)).sum::<i64>();
        assert!(energy(&deep) > energy(&quick));
    }

    #[test]
    fn test_disabled_generates_nothing() {
        let config = BreathingConfig {
            enabled: false,
            ..Default::default()
        };
        let mut generator = BreathingGenerator::with_seed(config, 7);
        assert!(generator.generate(BreathKind::Normal, None).is_empty());
        assert!(generator.should_insert(30, true, true).is_none());
    }

    #[test]
    fn test_insert_after_long_sentence() {
        let generator = generator();
        assert_eq!(
            generator.should_insert(20, true, false),
            Some(BreathKind::Normal)
        );
    }

    #[test]
    fn test_no_insert_after_short_sentence() {
        let generator = generator();
        assert_eq!(generator.should_insert(8, true, false), None);
    }

    #[test]
    fn test_deep_breath_before_very_long_sentence() {
        let generator = generator();
        assert_eq!(
            generator.should_insert(30, false, false),
            Some(BreathKind::Deep)
        );
    }

    #[test]
    fn test_insert_at_long_pause() {
        let generator = generator();
        assert_eq!(
            generator.should_insert(0, false, true),
            Some(BreathKind::Normal)
        );
    }

    #[test]
    fn test_no_insert_mid_speech() {
        let generator = generator();
        assert_eq!(generator.should_insert(10, false, false), None);
    }
}

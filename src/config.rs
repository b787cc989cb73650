//! Per-call pipeline configuration.
//!
//! Supplied in full at session construction and immutable afterward. The
//! record is closed: unknown keys fail deserialization instead of being
//! ignored.

use crate::defaults;
use crate::error::{BridgeError, Result};
use serde::{Deserialize, Serialize};

/// Root configuration for one call pipeline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    pub jitter: JitterConfig,
    pub playback: PlaybackConfig,
    pub chunk: ChunkConfig,
    pub breathing: BreathingConfig,
    pub pauses: PauseConfig,
    pub upstream: UpstreamConfig,
}

/// Adaptive jitter buffer depth bounds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct JitterConfig {
    /// Lower bound on the target depth in milliseconds.
    pub min_ms: u32,
    /// Upper bound on buffered audio in milliseconds.
    pub max_ms: u32,
    /// Initial target depth in milliseconds.
    pub target_ms: u32,
}

impl Default for JitterConfig {
    fn default() -> Self {
        Self {
            min_ms: defaults::JITTER_MIN_MS,
            max_ms: defaults::JITTER_MAX_MS,
            target_ms: defaults::JITTER_TARGET_MS,
        }
    }
}

/// Playback pacing configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct PlaybackConfig {
    /// Lower clamp on the effective playback rate.
    pub min_rate: f64,
    /// Upper clamp on the effective playback rate.
    pub max_rate: f64,
    /// Buffer level below which the rate is nudged down.
    pub low_watermark: f64,
    /// Buffer level above which the rate is nudged up.
    pub high_watermark: f64,
    /// Linear-ramp crossfade window in milliseconds.
    pub crossfade_ms: u32,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            min_rate: defaults::PLAYBACK_MIN_RATE,
            max_rate: defaults::PLAYBACK_MAX_RATE,
            low_watermark: defaults::PLAYBACK_LOW_WATERMARK,
            high_watermark: defaults::PLAYBACK_HIGH_WATERMARK,
            crossfade_ms: defaults::CROSSFADE_MS,
        }
    }
}

/// Output chunk size policy bounds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct ChunkConfig {
    pub min_ms: u32,
    pub max_ms: u32,
    pub default_ms: u32,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            min_ms: defaults::CHUNK_MIN_MS,
            max_ms: defaults::CHUNK_MAX_MS,
            default_ms: defaults::CHUNK_DEFAULT_MS,
        }
    }
}

/// Breathing burst synthesis configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct BreathingConfig {
    pub enabled: bool,
    /// Base intensity, 0.0 to 1.0.
    pub intensity: f32,
}

impl Default for BreathingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            intensity: defaults::BREATHING_INTENSITY,
        }
    }
}

/// Pause insertion configuration, including the punctuation duration table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct PauseConfig {
    pub enabled: bool,
    /// Pause after a comma in milliseconds.
    pub comma_ms: u32,
    /// Pause after a period in milliseconds.
    pub period_ms: u32,
    /// Pause after a question mark in milliseconds.
    pub question_ms: u32,
    /// Pause after an exclamation mark (emphasis) in milliseconds.
    pub exclamation_ms: u32,
    /// Pause at a sentence boundary in milliseconds.
    pub sentence_ms: u32,
    /// Speech rate divisor applied to every duration.
    pub speech_rate: f64,
    /// Perturb durations by a uniform +/-20% when set.
    pub adaptive: bool,
}

impl Default for PauseConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            comma_ms: defaults::PAUSE_COMMA_MS,
            period_ms: defaults::PAUSE_PERIOD_MS,
            question_ms: defaults::PAUSE_QUESTION_MS,
            exclamation_ms: defaults::PAUSE_EXCLAMATION_MS,
            sentence_ms: defaults::PAUSE_SENTENCE_MS,
            speech_rate: 1.0,
            adaptive: false,
        }
    }
}

/// Upstream conversation service endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct UpstreamConfig {
    /// Scheme and host part of the upstream URL.
    pub base_url: String,
    /// Credential supplied in the URL query.
    pub api_key: String,
    /// Language tag supplied in the URL query.
    pub language: String,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: "wss://localhost:8080".to_string(),
            api_key: String::new(),
            language: "en".to_string(),
        }
    }
}

impl UpstreamConfig {
    /// Builds the full conversation endpoint URL.
    pub fn conversation_url(&self) -> String {
        format!(
            "{}/ws/conversation?api_key={}&language={}",
            self.base_url.trim_end_matches('/'),
            self.api_key,
            self.language
        )
    }
}

impl PipelineConfig {
    /// Checks the cross-field invariants.
    pub fn validate(&self) -> Result<()> {
        if self.jitter.min_ms > self.jitter.target_ms {
            return Err(invalid(
                "jitter.min_ms",
                "must not exceed jitter.target_ms",
            ));
        }
        if self.jitter.target_ms > self.jitter.max_ms {
            return Err(invalid(
                "jitter.target_ms",
                "must not exceed jitter.max_ms",
            ));
        }
        if self.playback.min_rate > 1.0 {
            return Err(invalid("playback.min_rate", "must not exceed 1.0"));
        }
        if self.playback.max_rate < 1.0 {
            return Err(invalid("playback.max_rate", "must be at least 1.0"));
        }
        if self.playback.low_watermark >= self.playback.high_watermark {
            return Err(invalid(
                "playback.low_watermark",
                "must be below playback.high_watermark",
            ));
        }
        if self.chunk.min_ms > self.chunk.default_ms {
            return Err(invalid("chunk.min_ms", "must not exceed chunk.default_ms"));
        }
        if self.chunk.default_ms > self.chunk.max_ms {
            return Err(invalid("chunk.default_ms", "must not exceed chunk.max_ms"));
        }
        if self.pauses.speech_rate <= 0.0 {
            return Err(invalid("pauses.speech_rate", "must be positive"));
        }
        Ok(())
    }
}

fn invalid(key: &str, message: &str) -> BridgeError {
    BridgeError::ConfigInvalidValue {
        key: key.to_string(),
        message: message.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = PipelineConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_config_values() {
        let config = PipelineConfig::default();

        assert_eq!(config.jitter.min_ms, 40);
        assert_eq!(config.jitter.max_ms, 200);
        assert_eq!(config.jitter.target_ms, 60);

        assert_eq!(config.playback.min_rate, 0.95);
        assert_eq!(config.playback.max_rate, 1.05);
        assert_eq!(config.playback.low_watermark, 0.2);
        assert_eq!(config.playback.high_watermark, 0.8);

        assert_eq!(config.chunk.min_ms, 100);
        assert_eq!(config.chunk.max_ms, 1000);

        assert!(config.breathing.enabled);
        assert!((config.breathing.intensity - 0.3).abs() < f32::EPSILON);

        assert_eq!(config.pauses.comma_ms, 150);
        assert_eq!(config.pauses.period_ms, 500);
        assert_eq!(config.pauses.question_ms, 600);
        assert_eq!(config.pauses.exclamation_ms, 200);
    }

    #[test]
    fn test_validate_rejects_inverted_jitter_bounds() {
        let config = PipelineConfig {
            jitter: JitterConfig {
                min_ms: 100,
                max_ms: 200,
                target_ms: 50,
            },
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(BridgeError::ConfigInvalidValue { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_rate_range_excluding_base() {
        let config = PipelineConfig {
            playback: PlaybackConfig {
                min_rate: 1.01,
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = PipelineConfig {
            playback: PlaybackConfig {
                max_rate: 0.99,
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_inverted_watermarks() {
        let config = PipelineConfig {
            playback: PlaybackConfig {
                low_watermark: 0.9,
                high_watermark: 0.3,
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_chunk_default_outside_bounds() {
        let config = PipelineConfig {
            chunk: ChunkConfig {
                min_ms: 100,
                max_ms: 1000,
                default_ms: 2000,
            },
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unknown_keys_are_rejected() {
        let json = r#"{"jitter": {"min_ms": 40, "surprise": 1}}"#;
        let result: std::result::Result<PipelineConfig, _> = serde_json::from_str(json);
        assert!(result.is_err());
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let json = r#"{"jitter": {"min_ms": 30}}"#;
        let config: PipelineConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.jitter.min_ms, 30);
        assert_eq!(config.jitter.max_ms, 200);
        assert_eq!(config.chunk.min_ms, 100);
    }

    #[test]
    fn test_conversation_url() {
        let upstream = UpstreamConfig {
            base_url: "wss://speech.example.com/".to_string(),
            api_key: "k123".to_string(),
            language: "en-US".to_string(),
        };
        assert_eq!(
            upstream.conversation_url(),
            "wss://speech.example.com/ws/conversation?api_key=k123&language=en-US"
        );
    }
}

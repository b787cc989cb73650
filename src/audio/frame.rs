//! Frame types that flow through the per-call pipeline.

use crate::audio::codec;
use crate::defaults::{NARROW_SAMPLE_RATE, WIDE_SAMPLE_RATE};
use crate::error::Result;

/// Interpretation of an audio payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioFormat {
    /// 8-bit companded mono at 8kHz, the carrier's wire form.
    CompandedNarrow,
    /// 16-bit little-endian linear PCM mono at 16kHz, the upstream's wire form.
    LinearWide,
}

impl AudioFormat {
    /// Sample rate of the format in Hz.
    pub fn sample_rate(&self) -> u32 {
        match self {
            AudioFormat::CompandedNarrow => NARROW_SAMPLE_RATE,
            AudioFormat::LinearWide => WIDE_SAMPLE_RATE,
        }
    }

    /// Bytes occupied by one sample.
    pub fn bytes_per_sample(&self) -> usize {
        match self {
            AudioFormat::CompandedNarrow => 1,
            AudioFormat::LinearWide => 2,
        }
    }
}

/// The in-pipeline audio unit: one payload plus its interpretation.
///
/// Created on an ingress or egress edge, consumed once, never shared across
/// call boundaries.
#[derive(Debug, Clone)]
pub struct AudioFrame {
    pub payload: Vec<u8>,
    pub format: AudioFormat,
}

impl AudioFrame {
    /// Creates a frame in the carrier's companded narrow-band format.
    pub fn narrow(payload: Vec<u8>) -> Self {
        Self {
            payload,
            format: AudioFormat::CompandedNarrow,
        }
    }

    /// Creates a frame in the upstream's linear wide-band format.
    pub fn wide(payload: Vec<u8>) -> Self {
        Self {
            payload,
            format: AudioFormat::LinearWide,
        }
    }

    /// Number of samples in this frame.
    pub fn sample_count(&self) -> usize {
        self.payload.len() / self.format.bytes_per_sample()
    }

    /// Duration of this frame in milliseconds.
    pub fn duration_ms(&self) -> u32 {
        (self.sample_count() as u64 * 1000 / self.format.sample_rate() as u64) as u32
    }

    /// Converts to the upstream's linear wide-band format.
    pub fn into_wide(self) -> AudioFrame {
        match self.format {
            AudioFormat::CompandedNarrow => {
                AudioFrame::wide(codec::decode_narrow_to_wide(&self.payload))
            }
            AudioFormat::LinearWide => self,
        }
    }

    /// Converts to the carrier's companded narrow-band format.
    pub fn into_narrow(self) -> Result<AudioFrame> {
        match self.format {
            AudioFormat::LinearWide => Ok(AudioFrame::narrow(codec::encode_wide_to_narrow(
                &self.payload,
            )?)),
            AudioFormat::CompandedNarrow => Ok(self),
        }
    }
}

/// Position markers attached to an egress frame.
///
/// `first` and `last` are each set at most once per stream; `continuation`
/// implies neither.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameFlags {
    pub first: bool,
    pub last: bool,
    pub continuation: bool,
    pub retransmit: bool,
}

impl FrameFlags {
    /// Marker for the first frame of a stream.
    pub fn first() -> Self {
        Self {
            first: true,
            ..Default::default()
        }
    }

    /// Marker for the last frame of a stream.
    pub fn last() -> Self {
        Self {
            last: true,
            ..Default::default()
        }
    }

    /// Marker for an interior frame.
    pub fn continuation() -> Self {
        Self {
            continuation: true,
            ..Default::default()
        }
    }

    /// True when the combination of markers is self-consistent.
    pub fn is_consistent(&self) -> bool {
        !(self.continuation && (self.first || self.last))
    }
}

/// An egress-side audio frame with pipeline metadata.
#[derive(Debug, Clone)]
pub struct SequencedFrame {
    /// Monotonically increasing counter assigned at sequencer input.
    pub sequence: u64,
    /// Microseconds since the session's sequencing epoch; monotonic within a
    /// call.
    pub timestamp_us: u64,
    /// Frame length in samples at its native rate.
    pub duration_samples: u32,
    pub flags: FrameFlags,
    /// Wide-band linear PCM bytes.
    pub payload: Vec<u8>,
}

impl SequencedFrame {
    /// Duration of this frame in milliseconds at the wide-band rate.
    pub fn duration_ms(&self) -> u32 {
        (self.duration_samples as u64 * 1000 / WIDE_SAMPLE_RATE as u64) as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_rates() {
        assert_eq!(AudioFormat::CompandedNarrow.sample_rate(), 8000);
        assert_eq!(AudioFormat::LinearWide.sample_rate(), 16_000);
        assert_eq!(AudioFormat::CompandedNarrow.bytes_per_sample(), 1);
        assert_eq!(AudioFormat::LinearWide.bytes_per_sample(), 2);
    }

    #[test]
    fn test_frame_duration_narrow() {
        // 160 companded bytes = 160 samples at 8kHz = 20ms
        let frame = AudioFrame::narrow(vec![0xFF; 160]);
        assert_eq!(frame.sample_count(), 160);
        assert_eq!(frame.duration_ms(), 20);
    }

    #[test]
    fn test_frame_duration_wide() {
        // 640 PCM bytes = 320 samples at 16kHz = 20ms
        let frame = AudioFrame::wide(vec![0u8; 640]);
        assert_eq!(frame.sample_count(), 320);
        assert_eq!(frame.duration_ms(), 20);
    }

    #[test]
    fn test_flags_consistency() {
        assert!(FrameFlags::first().is_consistent());
        assert!(FrameFlags::last().is_consistent());
        assert!(FrameFlags::continuation().is_consistent());

        let bad = FrameFlags {
            first: true,
            continuation: true,
            ..Default::default()
        };
        assert!(!bad.is_consistent());
    }

    #[test]
    fn test_frame_transcode_round_trip() {
        let narrow = AudioFrame::narrow(vec![0xFF; 160]);
        let wide = narrow.into_wide();
        assert_eq!(wide.format, AudioFormat::LinearWide);
        assert_eq!(wide.payload.len(), 640);

        let back = wide.into_narrow().unwrap();
        assert_eq!(back.format, AudioFormat::CompandedNarrow);
        assert_eq!(back.payload.len(), 160);
    }

    #[test]
    fn test_transcode_is_identity_on_matching_format() {
        let wide = AudioFrame::wide(vec![0u8; 640]);
        assert_eq!(wide.into_wide().payload.len(), 640);

        let narrow = AudioFrame::narrow(vec![0xFF; 160]);
        assert_eq!(narrow.into_narrow().unwrap().payload.len(), 160);
    }

    #[test]
    fn test_sequenced_frame_duration() {
        let frame = SequencedFrame {
            sequence: 0,
            timestamp_us: 0,
            duration_samples: 320,
            flags: FrameFlags::first(),
            payload: vec![0; 640],
        };
        assert_eq!(frame.duration_ms(), 20);
    }
}

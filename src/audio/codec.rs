//! Narrow-band companded <-> linear wide-band PCM conversion.
//!
//! The carrier ships 8-bit logarithmically companded mono at 8kHz; the
//! upstream speaks 16-bit little-endian linear PCM at 16kHz. Decode expands
//! and up-samples by linear interpolation; encode decimates by keeping every
//! second sample and re-compands.

use crate::defaults::COMPANDED_SILENCE;
use crate::error::{BridgeError, Result};

const BIAS: i32 = 0x84;
const CLIP: i32 = 32_635;

/// Expands one companded byte to a linear 16-bit sample.
///
/// Sign from the MSB, 3-bit exponent, 4-bit mantissa; the 14-bit result is
/// shifted into the 16-bit range. The all-ones byte decodes to 0.
pub fn ulaw_to_linear(byte: u8) -> i16 {
    let u = !byte;
    let exponent = ((u >> 4) & 0x07) as i32;
    let mantissa = (u & 0x0F) as i32;

    let magnitude = (((mantissa << 3) + BIAS) << exponent) - BIAS;
    if u & 0x80 != 0 {
        (-magnitude) as i16
    } else {
        magnitude as i16
    }
}

/// Compands one linear 16-bit sample to a companded byte.
///
/// Magnitudes above the clip point saturate rather than wrap.
pub fn linear_to_ulaw(sample: i16) -> u8 {
    let mut value = sample as i32;
    let sign: u8 = if value < 0 {
        value = -value;
        0x80
    } else {
        0
    };
    if value > CLIP {
        value = CLIP;
    }
    value += BIAS;

    let mut exponent = 7u8;
    let mut mask = 0x4000;
    while exponent > 0 && value & mask == 0 {
        exponent -= 1;
        mask >>= 1;
    }

    let mantissa = ((value >> (exponent + 3)) & 0x0F) as u8;
    !(sign | (exponent << 4) | mantissa)
}

/// Decodes companded 8kHz mono into 16-bit LE linear PCM at 16kHz.
///
/// Output byte length is exactly 4x the input length. Up-sampling is linear
/// interpolation between adjacent samples; the last sample is repeated.
pub fn decode_narrow_to_wide(input: &[u8]) -> Vec<u8> {
    if input.is_empty() {
        return Vec::new();
    }

    let narrow: Vec<i16> = input.iter().map(|&b| ulaw_to_linear(b)).collect();

    let mut wide = Vec::with_capacity(narrow.len() * 2);
    for (i, &sample) in narrow.iter().enumerate() {
        wide.push(sample);
        let next = narrow.get(i + 1).copied().unwrap_or(sample);
        wide.push(((sample as i32 + next as i32) / 2) as i16);
    }

    samples_to_pcm_bytes(&wide)
}

/// Encodes 16-bit LE linear PCM at 16kHz into companded 8kHz mono.
///
/// Input byte length must be even; output length is input length / 4 for
/// even sample counts. Decimation keeps every second sample.
pub fn encode_wide_to_narrow(input: &[u8]) -> Result<Vec<u8>> {
    let samples = pcm_bytes_to_samples(input)?;
    Ok(samples
        .iter()
        .step_by(2)
        .map(|&s| linear_to_ulaw(s))
        .collect())
}

/// Reinterprets little-endian PCM bytes as 16-bit samples.
pub fn pcm_bytes_to_samples(bytes: &[u8]) -> Result<Vec<i16>> {
    if bytes.len() % 2 != 0 {
        return Err(BridgeError::InvalidFormat {
            message: format!("PCM byte length {} is not a multiple of 2", bytes.len()),
        });
    }
    Ok(bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect())
}

/// Serializes 16-bit samples as little-endian PCM bytes.
pub fn samples_to_pcm_bytes(samples: &[i16]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        bytes.extend_from_slice(&sample.to_le_bytes());
    }
    bytes
}

/// Returns companded silence of the given byte length.
pub fn companded_silence(len: usize) -> Vec<u8> {
    vec![COMPANDED_SILENCE; len]
}

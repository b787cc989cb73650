//! Audio formats and the narrow/wide transcode chain.

pub mod codec;
pub mod frame;

pub use codec::{decode_narrow_to_wide, encode_wide_to_narrow};
pub use frame::{AudioFormat, AudioFrame, FrameFlags, SequencedFrame};

//! Audio codec utilities: base64 framing of PCM16 audio and conversion
//! between 16-bit signed samples and normalized f32 samples.

use base64::Engine;
use std::time::Duration;

/// Sample rate of microphone audio sent up to the agent.
pub const UPLINK_SAMPLE_RATE: u32 = 16_000;
/// Sample rate of synthesized audio received from the agent.
pub const DOWNLINK_SAMPLE_RATE: u32 = 24_000;
/// Samples per captured microphone frame.
pub const CAPTURE_FRAME_SAMPLES: usize = 4096;

/// A malformed inbound audio payload. Decoding fails closed: a payload that
/// is not valid base64, or not a whole number of frames, is rejected rather
/// than silently truncated.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum DecodeError {
    #[error("malformed base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("PCM16 payload of {len} bytes is not a whole number of {channels}-channel frames")]
    Truncated { len: usize, channels: u16 },
    #[error("channel count must be at least 1")]
    NoChannels,
}

/// A decoded, deinterleaved buffer of normalized samples.
#[derive(Debug, Clone, PartialEq)]
pub struct PcmBuffer {
    pub sample_rate: u32,
    /// One `Vec<f32>` per channel, frame-aligned across channels.
    pub channels: Vec<Vec<f32>>,
}

impl PcmBuffer {
    pub fn frames(&self) -> usize {
        self.channels.first().map(Vec::len).unwrap_or(0)
    }

    /// Wall-clock playback time of this buffer.
    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.frames() as f64 / self.sample_rate as f64)
    }
}

/// Encodes raw bytes as standard base64. Total: no failure mode.
pub fn encode(bytes: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

/// Decodes standard base64 into raw bytes.
pub fn decode(text: &str) -> Result<Vec<u8>, DecodeError> {
    Ok(base64::engine::general_purpose::STANDARD.decode(text)?)
}

/// Deinterleaves little-endian PCM16 bytes into per-channel normalized f32
/// samples. Interleaving is channel-major: frame f's sample for channel c
/// sits at index `f * channels + c`.
pub fn pcm16_to_f32(
    bytes: &[u8],
    sample_rate: u32,
    channels: u16,
) -> Result<PcmBuffer, DecodeError> {
    if channels == 0 {
        return Err(DecodeError::NoChannels);
    }
    let channels_usize = channels as usize;
    if bytes.len() % (2 * channels_usize) != 0 {
        return Err(DecodeError::Truncated {
            len: bytes.len(),
            channels,
        });
    }

    let frames = bytes.len() / (2 * channels_usize);
    let mut out = vec![Vec::with_capacity(frames); channels_usize];
    for (i, chunk) in bytes.chunks_exact(2).enumerate() {
        let sample = i16::from_le_bytes([chunk[0], chunk[1]]);
        out[i % channels_usize].push(sample as f32 / 32768.0);
    }

    Ok(PcmBuffer {
        sample_rate,
        channels: out,
    })
}

/// Quantizes normalized f32 samples back to PCM16.
pub fn f32_to_pcm16(samples: &[f32]) -> Vec<i16> {
    samples
        .iter()
        .map(|&sample| (sample * 32768.0).clamp(i16::MIN as f32, i16::MAX as f32) as i16)
        .collect()
}

/// Quantizes a mono f32 frame and encodes it for the wire.
pub fn encode_f32_frame(samples: &[f32]) -> String {
    let bytes: Vec<u8> = f32_to_pcm16(samples)
        .into_iter()
        .flat_map(i16::to_le_bytes)
        .collect();
    encode(&bytes)
}

/// Decodes a base64 mono PCM16 frame at the downlink rate.
pub fn decode_downlink_frame(text: &str) -> Result<PcmBuffer, DecodeError> {
    pcm16_to_f32(&decode(text)?, DOWNLINK_SAMPLE_RATE, 1)
}

//! PCM16 encoding and decoding.
//!
//! The wire protocol carries 16-bit signed little-endian PCM in both
//! directions: 16 kHz mono outbound (microphone) and 24 kHz mono inbound
//! (synthesized speech).  This module converts between that format and the
//! `f32` sample buffers used everywhere else in the audio pipeline.

/// Sample rate of outbound (microphone) audio in Hz.
pub const INPUT_SAMPLE_RATE: u32 = 16_000;

/// Sample rate of inbound (synthesized) audio in Hz.
pub const OUTPUT_SAMPLE_RATE: u32 = 24_000;

// ---------------------------------------------------------------------------
// AudioChunk
// ---------------------------------------------------------------------------

/// One fixed-size unit of encoded audio.
///
/// An immutable buffer of 16-bit signed little-endian PCM samples tagged
/// with its sample rate and channel count.  Produced by the capture pipeline
/// (one chunk per 4096 accumulated frames) and received from the transport
/// (one chunk per inbound server event).
#[derive(Debug, Clone, PartialEq)]
pub struct AudioChunk {
    /// Raw PCM16 little-endian bytes (`2 * frame count` for mono).
    pub data: Vec<u8>,
    /// Sample rate in Hz (16 000 outbound, 24 000 inbound).
    pub sample_rate: u32,
    /// Number of interleaved channels (always 1 in this protocol).
    pub channels: u16,
}

impl AudioChunk {
    /// MIME type string used on the wire, e.g. `audio/pcm;rate=16000`.
    pub fn mime_type(&self) -> String {
        format!("audio/pcm;rate={}", self.sample_rate)
    }

    /// Number of sample frames in this chunk.
    pub fn frames(&self) -> usize {
        self.data.len() / 2 / self.channels as usize
    }

    /// Playback duration of this chunk in seconds.
    pub fn duration_secs(&self) -> f64 {
        self.frames() as f64 / self.sample_rate as f64
    }
}

// ---------------------------------------------------------------------------
// Conversions
// ---------------------------------------------------------------------------

/// Encode `f32` samples in `[-1.0, 1.0]` as PCM16 little-endian bytes.
///
/// Each sample is scaled by `32768`, rounded to the nearest integer, and
/// saturated to the `i16` range — so `1.0` encodes as `32767` rather than
/// wrapping, and out-of-range input is clamped instead of overflowing.
pub fn encode_pcm16(samples: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for &s in samples {
        let v = (s as f64 * 32_768.0).round();
        let v = v.clamp(i16::MIN as f64, i16::MAX as f64) as i16;
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode PCM16 little-endian bytes back to `f32` samples in `[-1.0, 1.0]`.
///
/// A trailing odd byte (malformed payload) is ignored.
pub fn decode_pcm16(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]) as f32 / 32_768.0)
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

//! Audio pipeline — microphone capture → PCM16 chunking → transport, and
//! transport → playback scheduling → speaker.
//!
//! # Pipeline
//!
//! ```text
//! Microphone → cpal callback → CaptureFrame (mpsc) → Pcm16Chunker
//!            → AudioChunk (audio/pcm;rate=16000) → outbound transport
//!
//! inbound transport → AudioChunk (audio/pcm;rate=24000)
//!            → PlaybackScheduler → CpalSink → speaker
//! ```
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::sync::mpsc;
//! use voicelink::audio::{AudioCapture, CaptureFrame, Pcm16Chunker};
//!
//! let (tx, rx) = mpsc::channel::<CaptureFrame>();
//! let capture = AudioCapture::new().unwrap();
//! let mut chunker = Pcm16Chunker::new(capture.sample_rate(), capture.channels());
//! let _handle = capture.start(tx).unwrap(); // drop handle → stops stream
//!
//! while let Ok(frame) = rx.recv() {
//!     for chunk in chunker.push(&frame.samples) {
//!         println!("chunk of {} frames ready to send", chunk.frames());
//!     }
//! }
//! ```

pub mod backend;
pub mod capture;
pub mod pcm;
pub mod playback;
pub mod resample;

pub use backend::{AudioBackend, CaptureHandle, CpalBackend};
pub use capture::{
    AudioCapture, CaptureError, CaptureFrame, CaptureStream, Pcm16Chunker, StreamHandle,
    CHUNK_FRAMES,
};
pub use pcm::{decode_pcm16, encode_pcm16, AudioChunk, INPUT_SAMPLE_RATE, OUTPUT_SAMPLE_RATE};
pub use playback::{AudioSink, CpalSink, PlaybackBuffer, PlaybackError, PlaybackScheduler};
pub use resample::{resample, stereo_to_mono};

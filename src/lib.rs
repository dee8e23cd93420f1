//! voicelink — realtime bidirectional voice session client.
//!
//! Streams microphone audio to a remote conversational endpoint and plays
//! the synthesized reply back gaplessly, with support for mid-utterance
//! interruption (barge-in).
//!
//! # Data flow
//!
//! ```text
//! Microphone → cpal callback → CaptureFrame (mpsc) → Pcm16Chunker
//!           → AudioChunk (16 kHz PCM16) → Transport (WebSocket, outbound)
//!
//! Transport (inbound) → TransportEvent (mpsc) → SessionController loop
//!           → PlaybackScheduler → CpalSink → Speaker
//! ```
//!
//! The [`session::SessionController`] owns every device and transport handle
//! for the lifetime of one session and is the only component the rest of the
//! application talks to; it is driven by [`session::SessionCommand`]s and
//! exposes progress through [`session::SharedState`].

pub mod audio;
pub mod config;
pub mod session;
pub mod transport;

//! Duplex transport to the remote audio-conversation endpoint.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────┐
//! │                 Transport (trait)                      │
//! │                                                        │
//! │  open(LiveConfig) ──▶ TransportSession                 │
//! │                         ├─ handle: dyn SessionHandle   │
//! │                         │    send_audio() / close()    │
//! │                         └─ events: mpsc::Receiver      │
//! │                              Opened / Audio /          │
//! │                              Interrupted / Error /     │
//! │                              Closed                    │
//! └────────────────────────────────────────────────────────┘
//! ```
//!
//! Inbound traffic is a single typed event stream consumed by one handler
//! loop (the session controller), never scattered callbacks.  An `Error`
//! event is terminal — the transport must be treated as closed once it
//! fires, and no reconnection is attempted at this layer.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::audio::AudioChunk;

pub mod protocol;
pub mod ws;

// ── Public re-exports ──────────────────────────────────────────────────────

pub use protocol::{parse_pcm_rate, MediaFrame, ServerEvent, SetupRequest};
pub use ws::LiveApiTransport;

// ---------------------------------------------------------------------------
// LiveConfig
// ---------------------------------------------------------------------------

/// Voice configuration for one session, taken from the active agent.
#[derive(Debug, Clone)]
pub struct LiveConfig {
    /// Remote model identifier.
    pub model: String,
    /// Synthesized voice name.
    pub voice_name: String,
    /// System instruction for the conversation.
    pub system_instruction: String,
}

// ---------------------------------------------------------------------------
// TransportEvent
// ---------------------------------------------------------------------------

/// Inbound events delivered by an open transport.
#[derive(Debug)]
pub enum TransportEvent {
    /// The connection is established and the setup was accepted.
    Opened,
    /// One synthesized audio chunk (24 kHz PCM16 mono).
    Audio(AudioChunk),
    /// Barge-in: discard all in-flight playback immediately.
    Interrupted,
    /// Terminal failure — the transport is closed after this fires.
    Error(String),
    /// Orderly remote close.
    Closed,
}

// ---------------------------------------------------------------------------
// TransportError
// ---------------------------------------------------------------------------

/// Errors raised while opening a transport.  Mid-session failures arrive as
/// [`TransportEvent::Error`] instead.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to connect to voice endpoint: {0}")]
    Connect(String),

    #[error("failed to send session setup: {0}")]
    Setup(String),
}

// ---------------------------------------------------------------------------
// SessionHandle / TransportSession / Transport
// ---------------------------------------------------------------------------

/// Outbound half of an open session.
///
/// `send_audio` is fire-and-forget with no acknowledgment; chunks are
/// delivered in call order.  `close` is idempotent — safe to call multiple
/// times or on a handle whose connection already died.
pub trait SessionHandle: Send + Sync {
    fn send_audio(&self, chunk: AudioChunk);
    fn close(&self);
}

/// An open duplex session: one outbound handle, one inbound event stream.
pub struct TransportSession {
    pub handle: Arc<dyn SessionHandle>,
    pub events: mpsc::Receiver<TransportEvent>,
}

/// Factory seam for opening sessions, so the session controller can be
/// exercised against a mock without a network.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn open(&self, config: &LiveConfig) -> Result<TransportSession, TransportError>;
}

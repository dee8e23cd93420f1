//! Wire protocol types for the voice endpoint.
//!
//! Everything on the wire is JSON text frames:
//!
//! * client → server, once: [`SetupRequest`] — model, voice and system
//!   instruction for the session.
//! * client → server, repeated: [`MediaFrame`] — one base64 PCM16 chunk
//!   (`audio/pcm;rate=16000`).
//! * server → client: [`ServerEvent`] — at most one of an audio frame
//!   (`audio/pcm;rate=24000`) or an `interrupted` flag.  An event carrying
//!   neither is a valid no-op.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// SetupRequest
// ---------------------------------------------------------------------------

/// Session-opening request, sent once immediately after the socket opens.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SetupRequest {
    /// Remote model identifier.
    pub model: String,
    /// Synthesized voice to use for replies.
    pub voice_name: String,
    /// System instruction applied to the whole conversation.
    pub system_instruction: String,
}

// ---------------------------------------------------------------------------
// MediaFrame
// ---------------------------------------------------------------------------

/// One audio chunk on the wire, in either direction.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MediaFrame {
    /// e.g. `audio/pcm;rate=16000`.
    pub mime_type: String,
    /// Base64-encoded PCM16 little-endian mono samples.
    pub data: String,
}

// ---------------------------------------------------------------------------
// ServerEvent
// ---------------------------------------------------------------------------

/// Inbound server event.
///
/// The server never sets both fields at once; absence of both is a no-op
/// keepalive and must be ignored without error.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ServerEvent {
    /// Synthesized audio to schedule for playback.
    #[serde(default)]
    pub audio: Option<MediaFrame>,
    /// Barge-in: the remote is overriding in-flight playback.
    #[serde(default)]
    pub interrupted: Option<bool>,
}

/// Extract the sample rate from a `audio/pcm;rate=NNNNN` MIME type.
pub fn parse_pcm_rate(mime_type: &str) -> Option<u32> {
    mime_type
        .split(';')
        .find_map(|part| part.trim().strip_prefix("rate="))
        .and_then(|rate| rate.parse().ok())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

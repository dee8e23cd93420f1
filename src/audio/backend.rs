//! Device acquisition seam between the session controller and cpal.
//!
//! The controller only ever touches [`AudioBackend`]; [`CpalBackend`] is the
//! real implementation, and tests substitute a mock so session lifecycle
//! behavior (permission denial, teardown, release-exactly-once) can be
//! verified without hardware.

use std::sync::mpsc;

use super::capture::{CaptureError, CaptureFrame, CaptureStream};
use super::playback::{AudioSink, CpalSink, PlaybackError};

// ---------------------------------------------------------------------------
// CaptureHandle
// ---------------------------------------------------------------------------

/// A held microphone acquisition.  Dropping the handle stops the stream and
/// releases the device; the associated frame channel then ends.
pub trait CaptureHandle: Send {
    /// Native sample rate of the stream in Hz.
    fn sample_rate(&self) -> u32;
    /// Number of interleaved channels per frame.
    fn channels(&self) -> u16;
}

impl CaptureHandle for CaptureStream {
    fn sample_rate(&self) -> u32 {
        CaptureStream::sample_rate(self)
    }

    fn channels(&self) -> u16 {
        CaptureStream::channels(self)
    }
}

// ---------------------------------------------------------------------------
// AudioBackend
// ---------------------------------------------------------------------------

/// Acquires audio devices for one session.
///
/// Both acquisitions are all-or-nothing: on error nothing is retained and
/// the caller may safely stay (or return to) `Idle`.
pub trait AudioBackend: Send + Sync {
    /// Acquire the microphone and start streaming raw frames to `frame_tx`.
    fn open_capture(
        &self,
        frame_tx: mpsc::Sender<CaptureFrame>,
    ) -> Result<Box<dyn CaptureHandle>, CaptureError>;

    /// Acquire the output device and start its stream.
    fn open_playback(&self) -> Result<Box<dyn AudioSink>, PlaybackError>;
}

/// Real backend using the system default cpal devices.
pub struct CpalBackend;

impl AudioBackend for CpalBackend {
    fn open_capture(
        &self,
        frame_tx: mpsc::Sender<CaptureFrame>,
    ) -> Result<Box<dyn CaptureHandle>, CaptureError> {
        Ok(Box::new(CaptureStream::open(frame_tx)?))
    }

    fn open_playback(&self) -> Result<Box<dyn AudioSink>, PlaybackError> {
        Ok(Box::new(CpalSink::new()?))
    }
}

//! Microphone capture via `cpal`.
//!
//! [`AudioCapture`] wraps the cpal host/device/stream lifecycle.  Call
//! [`AudioCapture::start`] to begin streaming [`CaptureFrame`]s over an mpsc
//! channel.  The returned [`StreamHandle`] is a RAII guard — dropping it
//! stops the underlying cpal stream, and a fresh device acquisition is
//! required to capture again.
//!
//! [`Pcm16Chunker`] sits downstream of the channel and turns the raw frame
//! stream into fixed-size encoded [`AudioChunk`]s ready for the transport:
//! downmix to mono, resample to 16 kHz, PCM16-encode, emit one chunk per
//! [`CHUNK_FRAMES`] accumulated frames.  It keeps no state beyond the
//! current partial block.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::sync::mpsc;
use thiserror::Error;

use super::pcm::{encode_pcm16, AudioChunk, INPUT_SAMPLE_RATE};
use super::resample::{resample, stereo_to_mono};

/// Number of 16 kHz frames in one outbound [`AudioChunk`] (≈ 256 ms).
pub const CHUNK_FRAMES: usize = 4096;

// ---------------------------------------------------------------------------
// CaptureFrame
// ---------------------------------------------------------------------------

/// A single buffer of raw audio as delivered by the cpal callback.
///
/// Samples are interleaved `f32` in the range `[-1.0, 1.0]` at the device's
/// native rate.  Feed frames to a [`Pcm16Chunker`] to obtain wire-ready
/// 16 kHz PCM16 chunks.
#[derive(Debug, Clone)]
pub struct CaptureFrame {
    /// Interleaved PCM samples in `[-1.0, 1.0]`.
    pub samples: Vec<f32>,
    /// Sample rate of this frame in Hz (e.g. 44100, 48000, 16000).
    pub sample_rate: u32,
    /// Number of interleaved channels (1 = mono, 2 = stereo, …).
    pub channels: u16,
}

// ---------------------------------------------------------------------------
// StreamHandle
// ---------------------------------------------------------------------------

/// RAII guard that keeps the cpal input stream alive.
///
/// Dropping this value calls `cpal::Stream::drop` which pauses/stops the
/// underlying hardware stream.
pub struct StreamHandle {
    _stream: cpal::Stream,
}

// ---------------------------------------------------------------------------
// CaptureError
// ---------------------------------------------------------------------------

/// Errors that can occur while acquiring or running the microphone.
///
/// Any of these during session start aborts the start — the session stays
/// `Idle` and no partial resource is retained.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("no input device found on the default audio host")]
    NoDevice,

    #[error("failed to query default input config: {0}")]
    DefaultConfig(#[from] cpal::DefaultStreamConfigError),

    #[error("failed to build input stream: {0}")]
    BuildStream(#[from] cpal::BuildStreamError),

    #[error("failed to start audio stream: {0}")]
    PlayStream(#[from] cpal::PlayStreamError),

    #[error("audio capture thread exited before reporting readiness")]
    ThreadStartup,
}

// ---------------------------------------------------------------------------
// AudioCapture
// ---------------------------------------------------------------------------

/// Microphone capture device wrapper built on top of `cpal`.
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::mpsc;
/// use voicelink::audio::{AudioCapture, CaptureFrame};
///
/// let (tx, rx) = mpsc::channel::<CaptureFrame>();
/// let capture = AudioCapture::new().unwrap();
/// let _handle = capture.start(tx).unwrap();
/// // `_handle` keeps the stream alive; drop it to stop capturing.
/// ```
pub struct AudioCapture {
    device: cpal::Device,
    config: cpal::StreamConfig,
    /// Native sample rate reported by the device (Hz).
    sample_rate: u32,
    /// Number of interleaved channels reported by the device.
    channels: u16,
}

impl AudioCapture {
    /// Create a new [`AudioCapture`] using the system default input device.
    ///
    /// Queries the device's preferred stream configuration (sample rate,
    /// channels, buffer size) so no manual configuration is required.
    ///
    /// # Errors
    ///
    /// Returns [`CaptureError::NoDevice`] when no input device is available
    /// (including when the platform denies microphone access), or
    /// [`CaptureError::DefaultConfig`] when the device cannot report a
    /// default stream configuration.
    pub fn new() -> Result<Self, CaptureError> {
        let host = cpal::default_host();
        let device = host.default_input_device().ok_or(CaptureError::NoDevice)?;

        let supported = device.default_input_config()?;

        let channels = supported.channels();
        let sample_rate = supported.sample_rate().0;
        let config: cpal::StreamConfig = supported.into();

        Ok(Self {
            device,
            config,
            sample_rate,
            channels,
        })
    }

    /// Start capturing and send [`CaptureFrame`]s to `tx`.
    ///
    /// The cpal callback runs on a dedicated audio thread; each time the
    /// hardware delivers a buffer the raw `f32` samples are wrapped in a
    /// [`CaptureFrame`] and forwarded over the channel.  Send errors
    /// (receiver dropped) are silently ignored so the audio thread never
    /// panics — the frame sequence simply terminates.
    ///
    /// # Errors
    ///
    /// Returns [`CaptureError::BuildStream`] or [`CaptureError::PlayStream`]
    /// if the platform rejects the stream configuration.
    pub fn start(&self, tx: mpsc::Sender<CaptureFrame>) -> Result<StreamHandle, CaptureError> {
        let sample_rate = self.sample_rate;
        let channels = self.channels;

        let stream = self.device.build_input_stream(
            &self.config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                let frame = CaptureFrame {
                    samples: data.to_vec(),
                    sample_rate,
                    channels,
                };
                // Ignore send errors; the receiver may have been dropped.
                let _ = tx.send(frame);
            },
            |err: cpal::StreamError| {
                log::error!("cpal input stream error: {err}");
            },
            None, // no timeout
        )?;

        stream.play()?;
        Ok(StreamHandle { _stream: stream })
    }

    /// Native sample rate of the capture stream in Hz.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Number of interleaved channels in each [`CaptureFrame`].
    pub fn channels(&self) -> u16 {
        self.channels
    }
}

// ---------------------------------------------------------------------------
// CaptureStream
// ---------------------------------------------------------------------------

/// A running microphone stream that can be held across threads.
///
/// `cpal::Stream` is not `Send`, so the stream lives on a dedicated
/// `audio-capture` thread for its whole life; this handle holds only a
/// shutdown channel and the stream's format.  Dropping it stops the thread,
/// which drops the stream and releases the microphone — ending the frame
/// sequence for good (a new acquisition is required to capture again).
pub struct CaptureStream {
    sample_rate: u32,
    channels: u16,
    shutdown_tx: mpsc::Sender<()>,
}

impl CaptureStream {
    /// Acquire the default microphone and start streaming frames to
    /// `frame_tx`.
    ///
    /// Blocks until the capture thread reports that the stream is running
    /// (or that acquisition failed, in which case nothing is retained).
    pub fn open(frame_tx: mpsc::Sender<CaptureFrame>) -> Result<Self, CaptureError> {
        let (ready_tx, ready_rx) = mpsc::channel::<Result<(u32, u16), CaptureError>>();
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();

        std::thread::Builder::new()
            .name("audio-capture".into())
            .spawn(move || {
                let capture = match AudioCapture::new() {
                    Ok(c) => c,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let format = (capture.sample_rate(), capture.channels());

                let _handle = match capture.start(frame_tx) {
                    Ok(h) => h,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(format));

                // Park until shutdown; the stream stays alive meanwhile.
                let _ = shutdown_rx.recv();
                log::debug!("audio-capture thread released the input stream");
            })
            .map_err(|_| CaptureError::ThreadStartup)?;

        let (sample_rate, channels) = ready_rx.recv().map_err(|_| CaptureError::ThreadStartup)??;

        Ok(Self {
            sample_rate,
            channels,
            shutdown_tx,
        })
    }

    /// Native sample rate of the running stream in Hz.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Number of interleaved channels in each frame.
    pub fn channels(&self) -> u16 {
        self.channels
    }
}

impl Drop for CaptureStream {
    fn drop(&mut self) {
        // Receiver gone means the thread already exited; nothing to do.
        let _ = self.shutdown_tx.send(());
    }
}

// ---------------------------------------------------------------------------
// Pcm16Chunker
// ---------------------------------------------------------------------------

/// Converts raw capture frames into fixed-size outbound [`AudioChunk`]s.
///
/// Stateless apart from the partial block carried between calls, so chunk
/// boundaries never depend on the hardware buffer size.  Chunks come out in
/// strict capture order; the caller must preserve that order when handing
/// them to the transport.
pub struct Pcm16Chunker {
    source_rate: u32,
    channels: u16,
    /// Mono 16 kHz samples not yet filling a complete chunk.
    pending: Vec<f32>,
}

impl Pcm16Chunker {
    /// Create a chunker for a capture stream with the given native format.
    pub fn new(source_rate: u32, channels: u16) -> Self {
        Self {
            source_rate,
            channels,
            pending: Vec::with_capacity(CHUNK_FRAMES * 2),
        }
    }

    /// Feed one hardware buffer of interleaved samples; returns every
    /// complete chunk this buffer filled (usually zero or one).
    pub fn push(&mut self, samples: &[f32]) -> Vec<AudioChunk> {
        let mono = stereo_to_mono(samples, self.channels);
        let resampled = resample(&mono, self.source_rate, INPUT_SAMPLE_RATE);
        self.pending.extend_from_slice(&resampled);

        let mut chunks = Vec::new();
        while self.pending.len() >= CHUNK_FRAMES {
            let block: Vec<f32> = self.pending.drain(..CHUNK_FRAMES).collect();
            chunks.push(AudioChunk {
                data: encode_pcm16(&block),
                sample_rate: INPUT_SAMPLE_RATE,
                channels: 1,
            });
        }
        chunks
    }

    /// Number of 16 kHz samples waiting for the next chunk boundary.
    pub fn pending_frames(&self) -> usize {
        self.pending.len()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

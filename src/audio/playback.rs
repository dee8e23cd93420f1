//! Gapless playback scheduling for inbound synthesized audio.
//!
//! [`PlaybackScheduler`] turns inbound [`AudioChunk`]s into a contiguous
//! audio timeline.  It keeps a single monotonically-advancing cursor — the
//! end of the last scheduled buffer — and schedules each new buffer at
//! `max(cursor, device time)` so buffers play back-to-back with no gap and
//! no overlap.  A remote interrupt (barge-in) flushes everything still
//! queued and resets the cursor, so the next chunk starts fresh at the
//! current device time.
//!
//! The scheduler talks to hardware through the [`AudioSink`] seam.
//! [`CpalSink`] is the real implementation: a cpal output stream whose
//! callback mixes all registered buffers by absolute start frame and
//! deregisters them once fully played.  A frame counter advanced by the
//! callback provides the device clock.
//!
//! All cursor mutation happens on the session controller's event loop (one
//! logical writer); the sink's internal registry is the only state shared
//! with the audio callback and is guarded by its own lock.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{mpsc, Arc, Mutex};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use thiserror::Error;

use super::pcm::{decode_pcm16, AudioChunk};
use super::resample::resample;

// ---------------------------------------------------------------------------
// PlaybackBuffer
// ---------------------------------------------------------------------------

/// Decoded floating-point sample buffer derived from one inbound chunk.
///
/// Exists only inside the playback path — chunks are decoded on arrival and
/// the buffer is handed straight to the sink.
#[derive(Debug, Clone)]
pub struct PlaybackBuffer {
    /// Mono samples in `[-1.0, 1.0]` at `sample_rate`.
    pub samples: Vec<f32>,
    /// Sample rate of the decoded audio in Hz (24 000 for this protocol).
    pub sample_rate: u32,
}

impl PlaybackBuffer {
    /// Playback duration in seconds.
    pub fn duration_secs(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

// ---------------------------------------------------------------------------
// AudioSink
// ---------------------------------------------------------------------------

/// Output-device seam used by [`PlaybackScheduler`].
///
/// Implemented by [`CpalSink`] for real hardware and by a mock in tests so
/// the scheduling invariants can be verified without a sound card.
pub trait AudioSink: Send {
    /// Current device time in seconds (monotonic from stream start).
    fn now(&self) -> f64;

    /// Register `buffer` to start playing at absolute time `start_secs`.
    /// The buffer stays active until fully played, then is deregistered.
    fn schedule(&mut self, buffer: PlaybackBuffer, start_secs: f64);

    /// Stop and deregister every active and not-yet-started buffer.
    fn flush(&mut self);
}

// ---------------------------------------------------------------------------
// PlaybackError
// ---------------------------------------------------------------------------

/// Errors that can occur while acquiring or running the output device.
#[derive(Debug, Error)]
pub enum PlaybackError {
    #[error("no output device found on the default audio host")]
    NoDevice,

    #[error("failed to query default output config: {0}")]
    DefaultConfig(#[from] cpal::DefaultStreamConfigError),

    #[error("failed to build output stream: {0}")]
    BuildStream(#[from] cpal::BuildStreamError),

    #[error("failed to start output stream: {0}")]
    PlayStream(#[from] cpal::PlayStreamError),

    #[error("audio output thread exited before reporting readiness")]
    ThreadStartup,
}

// ---------------------------------------------------------------------------
// PlaybackScheduler
// ---------------------------------------------------------------------------

/// Schedules inbound chunks back-to-back on an [`AudioSink`].
///
/// Invariant: `start(n+1) = start(n) + duration(n)` for consecutive chunks,
/// unless an interrupt resets the cursor or device time has already passed
/// the cursor (network jitter) — in the latter case a small gap is accepted
/// and never shrunk afterwards.
pub struct PlaybackScheduler {
    sink: Box<dyn AudioSink>,
    /// End of the last scheduled buffer, in sink time (seconds).
    cursor: f64,
}

impl PlaybackScheduler {
    /// Create a scheduler driving the given sink, cursor at 0.
    pub fn new(sink: Box<dyn AudioSink>) -> Self {
        Self { sink, cursor: 0.0 }
    }

    /// Decode an inbound chunk and schedule it at the end of the timeline.
    ///
    /// A malformed or empty payload is dropped with a warning; the session
    /// continues (decode failures are local, never fatal).
    pub fn on_chunk(&mut self, chunk: &AudioChunk) {
        let samples = decode_pcm16(&chunk.data);
        if samples.is_empty() {
            log::warn!("playback: dropping empty or malformed audio chunk");
            return;
        }

        let buffer = PlaybackBuffer {
            samples,
            sample_rate: chunk.sample_rate,
        };
        let duration = buffer.duration_secs();

        // Never schedule in the past — if jitter delayed this chunk past the
        // cursor, start it now and accept the gap.
        let start = self.cursor.max(self.sink.now());
        self.sink.schedule(buffer, start);
        self.cursor = start + duration;

        log::trace!("playback: scheduled {duration:.3}s at {start:.3}s, cursor {:.3}s", self.cursor);
    }

    /// Barge-in: stop every active and pending buffer and reset the cursor,
    /// so the next chunk is scheduled relative to current device time.
    pub fn on_interrupt(&mut self) {
        log::debug!("playback: interrupt — flushing queued audio");
        self.sink.flush();
        self.cursor = 0.0;
    }

    /// Discard all queued audio and re-base the timeline.  Same behavior as
    /// an interrupt; called by the session controller on teardown.
    pub fn reset(&mut self) {
        self.sink.flush();
        self.cursor = 0.0;
    }

    /// Current timeline cursor in seconds.
    pub fn cursor(&self) -> f64 {
        self.cursor
    }
}

// ---------------------------------------------------------------------------
// CpalSink
// ---------------------------------------------------------------------------

/// A buffer registered with the output callback.
struct Scheduled {
    /// Absolute device frame at which playback starts.
    start_frame: u64,
    /// Mono samples already resampled to the device rate.
    samples: Vec<f32>,
}

/// Buffers shared between [`CpalSink`] and the output callback.
type Registry = Arc<Mutex<Vec<Scheduled>>>;

/// Real [`AudioSink`] backed by a cpal output stream.
///
/// `cpal::Stream` is not `Send`, so the stream lives on a dedicated
/// `audio-output` thread for its whole life; `CpalSink` itself holds only
/// `Send` handles (the buffer registry, the frame counter, and a shutdown
/// channel).  Dropping the sink stops the thread and releases the device.
pub struct CpalSink {
    registry: Registry,
    frames_played: Arc<AtomicU64>,
    sample_rate: u32,
    shutdown_tx: mpsc::Sender<()>,
}

impl CpalSink {
    /// Acquire the default output device and start its stream.
    ///
    /// Blocks until the output thread reports that the stream is playing (or
    /// failed to start).
    pub fn new() -> Result<Self, PlaybackError> {
        let registry: Registry = Arc::new(Mutex::new(Vec::new()));
        let frames_played = Arc::new(AtomicU64::new(0));
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let (ready_tx, ready_rx) = mpsc::channel::<Result<u32, PlaybackError>>();

        let registry_thread = Arc::clone(&registry);
        let counter_thread = Arc::clone(&frames_played);

        std::thread::Builder::new()
            .name("audio-output".into())
            .spawn(move || {
                let stream = match build_output_stream(registry_thread, counter_thread) {
                    Ok((stream, rate)) => {
                        let _ = ready_tx.send(Ok(rate));
                        stream
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                // Park until shutdown; the stream stays alive meanwhile.
                let _ = shutdown_rx.recv();
                drop(stream);
                log::debug!("audio-output thread released the output stream");
            })
            .map_err(|_| PlaybackError::ThreadStartup)?;

        let sample_rate = ready_rx.recv().map_err(|_| PlaybackError::ThreadStartup)??;

        Ok(Self {
            registry,
            frames_played,
            sample_rate,
            shutdown_tx,
        })
    }

    /// Output device sample rate in Hz.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

impl AudioSink for CpalSink {
    fn now(&self) -> f64 {
        self.frames_played.load(Ordering::Relaxed) as f64 / self.sample_rate as f64
    }

    fn schedule(&mut self, buffer: PlaybackBuffer, start_secs: f64) {
        let samples = resample(&buffer.samples, buffer.sample_rate, self.sample_rate);
        let start_frame = (start_secs * self.sample_rate as f64).round() as u64;

        let mut registry = match self.registry.lock() {
            Ok(r) => r,
            Err(e) => {
                log::error!("playback registry lock poisoned: {e}");
                return;
            }
        };
        registry.push(Scheduled {
            start_frame,
            samples,
        });
    }

    fn flush(&mut self) {
        if let Ok(mut registry) = self.registry.lock() {
            registry.clear();
        }
    }
}

impl Drop for CpalSink {
    fn drop(&mut self) {
        // Receiver gone means the thread already exited; nothing to do.
        let _ = self.shutdown_tx.send(());
    }
}

/// Build and start the output stream.  Must run on the thread that will own
/// the stream.
fn build_output_stream(
    registry: Registry,
    counter: Arc<AtomicU64>,
) -> Result<(cpal::Stream, u32), PlaybackError> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or(PlaybackError::NoDevice)?;

    let supported = device.default_output_config()?;
    let channels = supported.channels() as usize;
    let sample_rate = supported.sample_rate().0;
    let config: cpal::StreamConfig = supported.into();

    let stream = device.build_output_stream(
        &config,
        move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
            let base = counter.load(Ordering::Relaxed);
            let frames = data.len() / channels;

            // try_lock only: on contention with a schedule/flush we output
            // one callback of silence instead of blocking the audio thread.
            match registry.try_lock() {
                Ok(mut bufs) => {
                    for (i, frame) in data.chunks_mut(channels).enumerate() {
                        let t = base + i as u64;
                        let mut acc = 0.0_f32;
                        for buf in bufs.iter() {
                            if buf.start_frame <= t {
                                let off = (t - buf.start_frame) as usize;
                                if off < buf.samples.len() {
                                    acc += buf.samples[off];
                                }
                            }
                        }
                        for sample in frame.iter_mut() {
                            *sample = acc;
                        }
                    }

                    // Deregister buffers that finished inside this callback.
                    let end = base + frames as u64;
                    bufs.retain(|b| b.start_frame + b.samples.len() as u64 > end);
                }
                Err(_) => {
                    for sample in data.iter_mut() {
                        *sample = 0.0;
                    }
                }
            }

            counter.fetch_add(frames as u64, Ordering::Relaxed);
        },
        |err: cpal::StreamError| {
            log::error!("cpal output stream error: {err}");
        },
        None,
    )?;

    stream.play()?;
    Ok((stream, sample_rate))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::pcm::{encode_pcm16, OUTPUT_SAMPLE_RATE};

    // -----------------------------------------------------------------------
    // Test doubles
    // -----------------------------------------------------------------------

    #[derive(Default)]
    struct MockSinkState {
        now: f64,
        /// `(start_secs, duration_secs)` of every scheduled buffer.
        scheduled: Vec<(f64, f64)>,
        flushes: usize,
    }

    /// Mock sink with a manually-advanced clock.  Cloning shares state so a
    /// test can inspect what the scheduler (which owns the sink) did.
    #[derive(Clone, Default)]
    struct MockSink(Arc<Mutex<MockSinkState>>);

    impl MockSink {
        fn set_now(&self, now: f64) {
            self.0.lock().unwrap().now = now;
        }

        fn scheduled(&self) -> Vec<(f64, f64)> {
            self.0.lock().unwrap().scheduled.clone()
        }

        fn flushes(&self) -> usize {
            self.0.lock().unwrap().flushes
        }
    }

    impl AudioSink for MockSink {
        fn now(&self) -> f64 {
            self.0.lock().unwrap().now
        }

        fn schedule(&mut self, buffer: PlaybackBuffer, start_secs: f64) {
            let duration = buffer.duration_secs();
            self.0.lock().unwrap().scheduled.push((start_secs, duration));
        }

        fn flush(&mut self) {
            let mut st = self.0.lock().unwrap();
            st.scheduled.clear();
            st.flushes += 1;
        }
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    /// Inbound chunk of the given duration at the protocol's 24 kHz.
    fn chunk(duration_secs: f64) -> AudioChunk {
        let frames = (duration_secs * OUTPUT_SAMPLE_RATE as f64).round() as usize;
        AudioChunk {
            data: encode_pcm16(&vec![0.1_f32; frames]),
            sample_rate: OUTPUT_SAMPLE_RATE,
            channels: 1,
        }
    }

    fn make_scheduler() -> (PlaybackScheduler, MockSink) {
        let sink = MockSink::default();
        let scheduler = PlaybackScheduler::new(Box::new(sink.clone()));
        (scheduler, sink)
    }

    // -----------------------------------------------------------------------
    // Tests
    // -----------------------------------------------------------------------

    /// Scenario A: three 0.1 s chunks, no interrupt → cursor = 0.3 s and the
    /// start times are strictly increasing and contiguous.
    #[test]
    fn three_chunks_schedule_contiguously() {
        let (mut scheduler, sink) = make_scheduler();

        for _ in 0..3 {
            scheduler.on_chunk(&chunk(0.1));
        }

        assert!((scheduler.cursor() - 0.3).abs() < 1e-9);

        let scheduled = sink.scheduled();
        assert_eq!(scheduled.len(), 3);
        for window in scheduled.windows(2) {
            let (start_a, dur_a) = window[0];
            let (start_b, _) = window[1];
            assert!(start_b > start_a, "start times must be strictly increasing");
            assert!(
                (start_b - (start_a + dur_a)).abs() < 1e-9,
                "buffers must be back-to-back"
            );
        }
    }

    /// Scenario B: two chunks queued (cursor 0.2), interrupt, then a new
    /// chunk → prior buffers flushed and the new chunk starts at device
    /// time, not at the pre-interrupt cursor.
    #[test]
    fn interrupt_flushes_and_rebases_cursor() {
        let (mut scheduler, sink) = make_scheduler();

        scheduler.on_chunk(&chunk(0.1));
        scheduler.on_chunk(&chunk(0.1));
        assert!((scheduler.cursor() - 0.2).abs() < 1e-9);

        scheduler.on_interrupt();
        assert_eq!(sink.flushes(), 1);
        assert_eq!(scheduler.cursor(), 0.0);
        assert!(sink.scheduled().is_empty());

        sink.set_now(0.15);
        scheduler.on_chunk(&chunk(0.1));

        let scheduled = sink.scheduled();
        assert_eq!(scheduled.len(), 1);
        assert!((scheduled[0].0 - 0.15).abs() < 1e-9, "must start at device time");
        assert!((scheduler.cursor() - 0.25).abs() < 1e-9);
    }

    /// A chunk arriving after device time passed the cursor starts at device
    /// time (never in the past), introducing a gap that is kept thereafter.
    #[test]
    fn late_chunk_starts_at_device_time() {
        let (mut scheduler, sink) = make_scheduler();

        scheduler.on_chunk(&chunk(0.1)); // cursor = 0.1
        sink.set_now(0.5); // jitter: device time passed the cursor

        scheduler.on_chunk(&chunk(0.1));
        let scheduled = sink.scheduled();
        assert!((scheduled[1].0 - 0.5).abs() < 1e-9);
        assert!((scheduler.cursor() - 0.6).abs() < 1e-9);

        // Device time falls behind the cursor again: the gap is not shrunk,
        // the next chunk continues from the cursor.
        sink.set_now(0.55);
        scheduler.on_chunk(&chunk(0.1));
        let scheduled = sink.scheduled();
        assert!((scheduled[2].0 - 0.6).abs() < 1e-9);
    }

    /// Malformed (empty) payloads are dropped without touching the timeline.
    #[test]
    fn empty_chunk_is_dropped() {
        let (mut scheduler, sink) = make_scheduler();

        scheduler.on_chunk(&AudioChunk {
            data: Vec::new(),
            sample_rate: OUTPUT_SAMPLE_RATE,
            channels: 1,
        });

        assert!(sink.scheduled().is_empty());
        assert_eq!(scheduler.cursor(), 0.0);

        // A single trailing byte decodes to zero samples — also dropped.
        scheduler.on_chunk(&AudioChunk {
            data: vec![7],
            sample_rate: OUTPUT_SAMPLE_RATE,
            channels: 1,
        });
        assert!(sink.scheduled().is_empty());
    }

    /// `reset` behaves like an interrupt: flush + cursor back to zero.
    #[test]
    fn reset_flushes_and_zeroes_cursor() {
        let (mut scheduler, sink) = make_scheduler();

        scheduler.on_chunk(&chunk(0.1));
        scheduler.reset();

        assert_eq!(sink.flushes(), 1);
        assert_eq!(scheduler.cursor(), 0.0);
    }

    /// PlaybackBuffer duration math.
    #[test]
    fn playback_buffer_duration() {
        let buffer = PlaybackBuffer {
            samples: vec![0.0; 2_400],
            sample_rate: OUTPUT_SAMPLE_RATE,
        };
        assert!((buffer.duration_secs() - 0.1).abs() < 1e-9);
    }
}

//! Session controller — owns the full voice-session lifecycle.
//!
//! [`SessionController`] responds to [`SessionCommand`]s received over a
//! `tokio::sync::mpsc` channel and supervises the four moving parts:
//!
//! ```text
//! SessionCommand::Start
//!   └─▶ Connecting: acquire microphone → acquire output device
//!         → Transport::open → wire capture → transport (bridge thread)
//!         → Active
//!
//! SessionCommand::Stop  /  TransportEvent::{Error, Closed}
//!   └─▶ Closing: close transport handle, stop microphone, release output
//!       device, reset scheduler — all unconditionally — then Idle
//! ```
//!
//! The run loop is the session's single logical execution point: every
//! inbound transport event and every command is handled here, one at a
//! time, so the playback cursor and the session state have exactly one
//! writer.  The capture bridge thread only touches the transport handle
//! (fire-and-forget sends), never shared session state.

use std::sync::{mpsc as std_mpsc, Arc};

use tokio::sync::mpsc;

use crate::audio::{AudioBackend, CaptureHandle, Pcm16Chunker, PlaybackScheduler};
use crate::transport::{LiveConfig, SessionHandle, Transport, TransportEvent};

use super::state::{SessionState, SharedState};

// ---------------------------------------------------------------------------
// SessionCommand
// ---------------------------------------------------------------------------

/// Commands accepted by the controller.  The UI exposes these as a single
/// toggle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionCommand {
    /// Begin a session.  Ignored (logged) while one is already running.
    Start,
    /// Tear the session down.  No-op while `Idle`.
    Stop,
}

// ---------------------------------------------------------------------------
// ActiveSession
// ---------------------------------------------------------------------------

/// Every resource held while a session is `Active`.
///
/// Exclusively owned by the controller; granted to no one else.  Dropping
/// the fields releases the devices (RAII), which is what makes teardown
/// unconditional.
struct ActiveSession {
    /// Microphone acquisition; dropping stops the stream and ends the
    /// capture bridge.
    capture: Box<dyn CaptureHandle>,
    /// Playback timeline; owns the output device sink.
    scheduler: PlaybackScheduler,
    /// Outbound transport handle.
    handle: Arc<dyn SessionHandle>,
    /// Inbound transport event stream.
    events: mpsc::Receiver<TransportEvent>,
}

/// What the select step produced, moved out so `active` can be re-taken.
enum LoopInput {
    Command(Option<SessionCommand>),
    Transport(Option<TransportEvent>),
}

// ---------------------------------------------------------------------------
// SessionController
// ---------------------------------------------------------------------------

/// Drives the complete voice session lifecycle.
///
/// Create with [`SessionController::new`], then call [`run`](Self::run)
/// inside a tokio task.  The rest of the application only ever interacts
/// with the command channel and [`SharedState`].
pub struct SessionController {
    state: SharedState,
    transport: Arc<dyn Transport>,
    audio: Arc<dyn AudioBackend>,
    live_config: LiveConfig,
}

impl SessionController {
    /// Create a new controller.
    ///
    /// # Arguments
    ///
    /// * `state`       — shared state the UI observes.
    /// * `transport`   — transport factory (e.g. `LiveApiTransport`).
    /// * `audio`       — device backend (e.g. `CpalBackend`).
    /// * `live_config` — the active agent's voice configuration.
    pub fn new(
        state: SharedState,
        transport: Arc<dyn Transport>,
        audio: Arc<dyn AudioBackend>,
        live_config: LiveConfig,
    ) -> Self {
        Self {
            state,
            transport,
            audio,
            live_config,
        }
    }

    // -----------------------------------------------------------------------
    // Main async loop
    // -----------------------------------------------------------------------

    /// Run the controller until `command_rx` is closed.
    ///
    /// This is an `async fn` and should be spawned as a tokio task from
    /// `main()`.  Closing the command channel tears down any running
    /// session before returning.
    pub async fn run(self, mut command_rx: mpsc::Receiver<SessionCommand>) {
        let mut active: Option<ActiveSession> = None;

        loop {
            if let Some(session) = active.as_mut() {
                let input = tokio::select! {
                    cmd = command_rx.recv() => LoopInput::Command(cmd),
                    ev = session.events.recv() => LoopInput::Transport(ev),
                };

                match input {
                    LoopInput::Command(Some(SessionCommand::Start)) => {
                        // Exactly one session at a time.
                        log::debug!("session: Start ignored, session already running");
                    }
                    LoopInput::Command(Some(SessionCommand::Stop)) => {
                        if let Some(session) = active.take() {
                            self.teardown(session);
                        }
                    }
                    LoopInput::Command(None) => {
                        if let Some(session) = active.take() {
                            self.teardown(session);
                        }
                        break;
                    }
                    LoopInput::Transport(Some(TransportEvent::Opened)) => {
                        log::debug!("session: transport reported open");
                    }
                    LoopInput::Transport(Some(TransportEvent::Audio(chunk))) => {
                        if let Some(session) = active.as_mut() {
                            session.scheduler.on_chunk(&chunk);
                        }
                    }
                    LoopInput::Transport(Some(TransportEvent::Interrupted)) => {
                        if let Some(session) = active.as_mut() {
                            session.scheduler.on_interrupt();
                        }
                    }
                    LoopInput::Transport(Some(TransportEvent::Error(cause))) => {
                        log::error!("session: transport error: {cause}");
                        // Record the error only; teardown owns the
                        // Closing → Idle transitions.  Setting Idle here
                        // would claim the devices are free while they are
                        // still held.
                        self.record_error(format!("connection failed: {cause}"));
                        if let Some(session) = active.take() {
                            self.teardown(session);
                        }
                    }
                    LoopInput::Transport(Some(TransportEvent::Closed))
                    | LoopInput::Transport(None) => {
                        log::info!("session: transport closed by remote");
                        if let Some(session) = active.take() {
                            self.teardown(session);
                        }
                    }
                }
            } else {
                match command_rx.recv().await {
                    Some(SessionCommand::Start) => match self.start_session().await {
                        Ok(session) => {
                            active = Some(session);
                            self.set_state(SessionState::Active);
                            log::info!("session: active");
                        }
                        Err(message) => {
                            log::error!("session: start failed: {message}");
                            self.set_error(message);
                        }
                    },
                    Some(SessionCommand::Stop) => {
                        // Idempotent: stopping an idle session does nothing.
                        log::debug!("session: Stop ignored, already idle");
                    }
                    None => break,
                }
            }
        }

        log::info!("session: command channel closed, controller shutting down");
    }

    // -----------------------------------------------------------------------
    // Start / teardown
    // -----------------------------------------------------------------------

    /// Acquire devices, open the transport and wire the pipeline.
    ///
    /// On any failure every resource acquired so far is dropped before
    /// returning, so the session observably never holds anything outside
    /// `Connecting`/`Active`.
    async fn start_session(&self) -> Result<ActiveSession, String> {
        {
            let mut st = self.state.lock().unwrap();
            st.session = SessionState::Connecting;
            st.last_error = None;
        }

        // 1. Microphone — denial aborts before anything else is held.
        let (frame_tx, frame_rx) = std_mpsc::channel();
        let capture = self
            .audio
            .open_capture(frame_tx)
            .map_err(|e| format!("microphone unavailable: {e}"))?;
        log::debug!(
            "session: microphone acquired ({} Hz, {} ch)",
            capture.sample_rate(),
            capture.channels()
        );

        // 2. Output device.
        let sink = self
            .audio
            .open_playback()
            .map_err(|e| format!("audio output unavailable: {e}"))?;

        // 3. Transport.
        let session = self
            .transport
            .open(&self.live_config)
            .await
            .map_err(|e| format!("could not open voice connection: {e}"))?;

        // 4. Wire capture → transport.  The bridge thread ends by itself
        //    when the capture stream is dropped and the frame channel dies.
        spawn_capture_bridge(
            frame_rx,
            capture.sample_rate(),
            capture.channels(),
            Arc::clone(&session.handle),
        );

        Ok(ActiveSession {
            capture,
            scheduler: PlaybackScheduler::new(sink),
            handle: session.handle,
            events: session.events,
        })
    }

    /// Release every session resource, unconditionally, then go `Idle`.
    ///
    /// Release failures are logged inside the respective implementations,
    /// never propagated — teardown always completes.
    fn teardown(&self, mut session: ActiveSession) {
        self.set_state(SessionState::Closing);

        session.handle.close();
        drop(session.capture); // stops the mic stream; bridge thread drains out
        session.scheduler.reset(); // discard queued playback
        drop(session.scheduler); // releases the output device
        drop(session.events);

        self.set_state(SessionState::Idle);
        log::info!("session: torn down, all devices released");
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    fn set_state(&self, state: SessionState) {
        self.state.lock().unwrap().session = state;
    }

    /// Store a failure message without touching the session state.
    fn record_error(&self, message: String) {
        self.state.lock().unwrap().last_error = Some(message);
    }

    /// Failed start: nothing is held, so going straight to `Idle` is safe.
    fn set_error(&self, message: String) {
        let mut st = self.state.lock().unwrap();
        st.session = SessionState::Idle;
        st.last_error = Some(message);
    }
}

// ---------------------------------------------------------------------------
// Capture bridge
// ---------------------------------------------------------------------------

/// Drains raw capture frames, chunks them to 16 kHz PCM16 and forwards each
/// chunk to the transport in strict capture order.
///
/// Runs on its own thread because the frame channel is std mpsc (fed by the
/// cpal callback).  The thread exits when the channel closes — i.e. when the
/// capture stream is dropped or the device goes away; no retry.
fn spawn_capture_bridge(
    frame_rx: std_mpsc::Receiver<crate::audio::CaptureFrame>,
    sample_rate: u32,
    channels: u16,
    handle: Arc<dyn SessionHandle>,
) {
    let result = std::thread::Builder::new()
        .name("capture-bridge".into())
        .spawn(move || {
            let mut chunker = Pcm16Chunker::new(sample_rate, channels);
            while let Ok(frame) = frame_rx.recv() {
                for chunk in chunker.push(&frame.samples) {
                    handle.send_audio(chunk);
                }
            }
            log::debug!("capture bridge: frame stream ended");
        });

    if let Err(e) = result {
        log::error!("failed to spawn capture-bridge thread: {e}");
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::backend::AudioBackend;
    use crate::audio::capture::{CaptureError, CaptureFrame, CHUNK_FRAMES};
    use crate::audio::pcm::{encode_pcm16, AudioChunk, OUTPUT_SAMPLE_RATE};
    use crate::audio::playback::{AudioSink, PlaybackBuffer, PlaybackError};
    use crate::session::state::new_shared_state;
    use crate::transport::{TransportError, TransportSession};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    // -----------------------------------------------------------------------
    // Test doubles
    // -----------------------------------------------------------------------

    #[derive(Default)]
    struct SinkLog {
        scheduled: Vec<(f64, f64)>,
        flushes: usize,
    }

    /// Sink that records scheduling activity and counts drops (= device
    /// releases).
    struct TestSink {
        log: Arc<Mutex<SinkLog>>,
        releases: Arc<AtomicUsize>,
    }

    impl AudioSink for TestSink {
        fn now(&self) -> f64 {
            0.0
        }

        fn schedule(&mut self, buffer: PlaybackBuffer, start_secs: f64) {
            self.log
                .lock()
                .unwrap()
                .scheduled
                .push((start_secs, buffer.duration_secs()));
        }

        fn flush(&mut self) {
            self.log.lock().unwrap().flushes += 1;
        }
    }

    impl Drop for TestSink {
        fn drop(&mut self) {
            self.releases.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Capture handle that counts its release and keeps the frame channel
    /// open until dropped.
    struct TestCapture {
        releases: Arc<AtomicUsize>,
        _frame_tx: std_mpsc::Sender<CaptureFrame>,
    }

    impl CaptureHandle for TestCapture {
        fn sample_rate(&self) -> u32 {
            16_000
        }

        fn channels(&self) -> u16 {
            1
        }
    }

    impl Drop for TestCapture {
        fn drop(&mut self) {
            self.releases.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Mock backend with switchable failure modes and release counters.
    struct TestAudio {
        fail_capture: bool,
        capture_opens: Arc<AtomicUsize>,
        capture_releases: Arc<AtomicUsize>,
        playback_opens: Arc<AtomicUsize>,
        playback_releases: Arc<AtomicUsize>,
        sink_log: Arc<Mutex<SinkLog>>,
        /// Clone of the most recent capture frame sender, so tests can push
        /// frames as if the hardware produced them.
        frame_tx: Arc<Mutex<Option<std_mpsc::Sender<CaptureFrame>>>>,
    }

    impl TestAudio {
        fn new(fail_capture: bool) -> Self {
            Self {
                fail_capture,
                capture_opens: Arc::default(),
                capture_releases: Arc::default(),
                playback_opens: Arc::default(),
                playback_releases: Arc::default(),
                sink_log: Arc::default(),
                frame_tx: Arc::default(),
            }
        }
    }

    impl AudioBackend for TestAudio {
        fn open_capture(
            &self,
            frame_tx: std_mpsc::Sender<CaptureFrame>,
        ) -> Result<Box<dyn CaptureHandle>, CaptureError> {
            if self.fail_capture {
                return Err(CaptureError::NoDevice);
            }
            self.capture_opens.fetch_add(1, Ordering::SeqCst);
            *self.frame_tx.lock().unwrap() = Some(frame_tx.clone());
            Ok(Box::new(TestCapture {
                releases: Arc::clone(&self.capture_releases),
                _frame_tx: frame_tx,
            }))
        }

        fn open_playback(&self) -> Result<Box<dyn AudioSink>, PlaybackError> {
            self.playback_opens.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(TestSink {
                log: Arc::clone(&self.sink_log),
                releases: Arc::clone(&self.playback_releases),
            }))
        }
    }

    /// Outbound handle that records chunks and close calls.
    #[derive(Default)]
    struct TestHandle {
        sent: Mutex<Vec<AudioChunk>>,
        closes: AtomicUsize,
    }

    impl SessionHandle for TestHandle {
        fn send_audio(&self, chunk: AudioChunk) {
            self.sent.lock().unwrap().push(chunk);
        }

        fn close(&self) {
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Mock transport: hands out a shared handle and stores the event
    /// sender so tests can inject inbound events.
    struct TestTransport {
        fail: bool,
        opens: Arc<AtomicUsize>,
        handle: Arc<TestHandle>,
        event_tx: Arc<Mutex<Option<mpsc::Sender<TransportEvent>>>>,
    }

    impl TestTransport {
        fn new(fail: bool) -> Self {
            Self {
                fail,
                opens: Arc::default(),
                handle: Arc::new(TestHandle::default()),
                event_tx: Arc::default(),
            }
        }
    }

    #[async_trait]
    impl Transport for TestTransport {
        async fn open(&self, _config: &LiveConfig) -> Result<TransportSession, TransportError> {
            if self.fail {
                return Err(TransportError::Connect("refused".into()));
            }
            self.opens.fetch_add(1, Ordering::SeqCst);
            let (tx, rx) = mpsc::channel(16);
            *self.event_tx.lock().unwrap() = Some(tx);
            Ok(TransportSession {
                handle: Arc::clone(&self.handle) as Arc<dyn SessionHandle>,
                events: rx,
            })
        }
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    fn live_config() -> LiveConfig {
        LiveConfig {
            model: "models/test".into(),
            voice_name: "TestVoice".into(),
            system_instruction: "test".into(),
        }
    }

    fn make_controller(
        audio: Arc<TestAudio>,
        transport: Arc<TestTransport>,
    ) -> (SessionController, SharedState, mpsc::Sender<SessionCommand>, mpsc::Receiver<SessionCommand>)
    {
        let state = new_shared_state();
        let controller = SessionController::new(
            Arc::clone(&state),
            transport as Arc<dyn Transport>,
            audio as Arc<dyn AudioBackend>,
            live_config(),
        );
        let (tx, rx) = mpsc::channel(16);
        (controller, state, tx, rx)
    }

    /// Poll the shared state until `predicate` holds or ~1 s elapses.
    async fn wait_for(state: &SharedState, predicate: impl Fn(&SessionState) -> bool) {
        for _ in 0..100 {
            if predicate(&state.lock().unwrap().session) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("state did not reach the expected value in time");
    }

    fn inbound_chunk(duration_secs: f64) -> AudioChunk {
        let frames = (duration_secs * OUTPUT_SAMPLE_RATE as f64).round() as usize;
        AudioChunk {
            data: encode_pcm16(&vec![0.1_f32; frames]),
            sample_rate: OUTPUT_SAMPLE_RATE,
            channels: 1,
        }
    }

    // -----------------------------------------------------------------------
    // Tests
    // -----------------------------------------------------------------------

    /// Start then stop releases the microphone, the output device and the
    /// transport handle exactly once, ending at `Idle`.
    #[tokio::test]
    async fn start_then_stop_releases_everything_once() {
        let audio = Arc::new(TestAudio::new(false));
        let transport = Arc::new(TestTransport::new(false));
        let (controller, state, tx, rx) = make_controller(Arc::clone(&audio), Arc::clone(&transport));

        tx.send(SessionCommand::Start).await.unwrap();
        tx.send(SessionCommand::Stop).await.unwrap();
        drop(tx);

        controller.run(rx).await;

        assert_eq!(state.lock().unwrap().session, SessionState::Idle);
        assert_eq!(audio.capture_releases.load(Ordering::SeqCst), 1);
        assert_eq!(audio.playback_releases.load(Ordering::SeqCst), 1);
        assert_eq!(transport.handle.closes.load(Ordering::SeqCst), 1);
        // Teardown resets the scheduler, which flushes the sink.
        assert_eq!(audio.sink_log.lock().unwrap().flushes, 1);
    }

    /// `stop` while already idle is a no-op: nothing released twice.
    #[tokio::test]
    async fn stop_is_idempotent() {
        let audio = Arc::new(TestAudio::new(false));
        let transport = Arc::new(TestTransport::new(false));
        let (controller, state, tx, rx) = make_controller(Arc::clone(&audio), Arc::clone(&transport));

        tx.send(SessionCommand::Start).await.unwrap();
        tx.send(SessionCommand::Stop).await.unwrap();
        tx.send(SessionCommand::Stop).await.unwrap();
        drop(tx);

        controller.run(rx).await;

        assert_eq!(state.lock().unwrap().session, SessionState::Idle);
        assert_eq!(audio.capture_releases.load(Ordering::SeqCst), 1);
        assert_eq!(audio.playback_releases.load(Ordering::SeqCst), 1);
        assert_eq!(transport.handle.closes.load(Ordering::SeqCst), 1);
    }

    /// Scenario C: microphone denial aborts the start — the state stays
    /// `Idle`, the transport is never opened and no device handle leaks.
    #[tokio::test]
    async fn mic_denial_leaves_idle_without_opening_transport() {
        let audio = Arc::new(TestAudio::new(true));
        let transport = Arc::new(TestTransport::new(false));
        let (controller, state, tx, rx) = make_controller(Arc::clone(&audio), Arc::clone(&transport));

        tx.send(SessionCommand::Start).await.unwrap();
        drop(tx);

        controller.run(rx).await;

        let st = state.lock().unwrap();
        assert_eq!(st.session, SessionState::Idle);
        assert!(st.last_error.is_some());
        assert_eq!(transport.opens.load(Ordering::SeqCst), 0);
        assert_eq!(audio.playback_opens.load(Ordering::SeqCst), 0);
        assert_eq!(audio.capture_opens.load(Ordering::SeqCst), 0);
    }

    /// A transport open failure releases the devices acquired before it.
    #[tokio::test]
    async fn transport_open_failure_releases_devices() {
        let audio = Arc::new(TestAudio::new(false));
        let transport = Arc::new(TestTransport::new(true));
        let (controller, state, tx, rx) = make_controller(Arc::clone(&audio), Arc::clone(&transport));

        tx.send(SessionCommand::Start).await.unwrap();
        drop(tx);

        controller.run(rx).await;

        let st = state.lock().unwrap();
        assert_eq!(st.session, SessionState::Idle);
        assert!(st.last_error.is_some());
        assert_eq!(audio.capture_opens.load(Ordering::SeqCst), 1);
        assert_eq!(audio.capture_releases.load(Ordering::SeqCst), 1);
        assert_eq!(audio.playback_releases.load(Ordering::SeqCst), 1);
    }

    /// Scenario D: a terminal transport error while `Active` triggers the
    /// full teardown path without an explicit stop.
    #[tokio::test]
    async fn transport_error_triggers_teardown() {
        let audio = Arc::new(TestAudio::new(false));
        let transport = Arc::new(TestTransport::new(false));
        let (controller, state, tx, rx) = make_controller(Arc::clone(&audio), Arc::clone(&transport));

        let task = tokio::spawn(controller.run(rx));

        tx.send(SessionCommand::Start).await.unwrap();
        wait_for(&state, |s| *s == SessionState::Active).await;

        let event_tx = transport.event_tx.lock().unwrap().clone().unwrap();
        event_tx
            .send(TransportEvent::Error("connection reset".into()))
            .await
            .unwrap();

        wait_for(&state, |s| *s == SessionState::Idle).await;

        assert_eq!(audio.capture_releases.load(Ordering::SeqCst), 1);
        assert_eq!(audio.playback_releases.load(Ordering::SeqCst), 1);
        assert_eq!(transport.handle.closes.load(Ordering::SeqCst), 1);
        assert!(state.lock().unwrap().last_error.is_some());

        drop(tx);
        task.await.unwrap();
    }

    /// During an error-driven teardown the observable state sequence is
    /// `Active → Closing → Idle`: an observer polling [`SharedState`] (as
    /// the UI does before sending `Start`) must never read `Idle` while the
    /// devices are still held.
    #[tokio::test]
    async fn error_teardown_never_reports_idle_with_devices_held() {
        let audio = Arc::new(TestAudio::new(false));
        let transport = Arc::new(TestTransport::new(false));
        let (controller, state, tx, rx) = make_controller(Arc::clone(&audio), Arc::clone(&transport));

        let task = tokio::spawn(controller.run(rx));

        tx.send(SessionCommand::Start).await.unwrap();
        wait_for(&state, |s| *s == SessionState::Active).await;

        // Sample (state, releases) continuously, as a UI thread would.
        let violation = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let watcher = {
            let state = Arc::clone(&state);
            let releases = Arc::clone(&audio.capture_releases);
            let violation = Arc::clone(&violation);
            tokio::spawn(async move {
                loop {
                    let session = state.lock().unwrap().session;
                    let released = releases.load(Ordering::SeqCst) >= 1;
                    if session == SessionState::Idle {
                        if !released {
                            violation.store(true, Ordering::SeqCst);
                        }
                        return;
                    }
                    tokio::task::yield_now().await;
                }
            })
        };

        let event_tx = transport.event_tx.lock().unwrap().clone().unwrap();
        event_tx
            .send(TransportEvent::Error("connection reset".into()))
            .await
            .unwrap();

        wait_for(&state, |s| *s == SessionState::Idle).await;
        watcher.await.unwrap();

        assert!(
            !violation.load(Ordering::SeqCst),
            "observed Idle while the microphone was still held"
        );
        assert!(state.lock().unwrap().last_error.is_some());

        drop(tx);
        task.await.unwrap();
    }

    /// Inbound audio events reach the scheduler; an interrupt flushes it.
    #[tokio::test]
    async fn inbound_events_drive_the_scheduler() {
        let audio = Arc::new(TestAudio::new(false));
        let transport = Arc::new(TestTransport::new(false));
        let (controller, state, tx, rx) = make_controller(Arc::clone(&audio), Arc::clone(&transport));

        let task = tokio::spawn(controller.run(rx));

        tx.send(SessionCommand::Start).await.unwrap();
        wait_for(&state, |s| *s == SessionState::Active).await;

        let event_tx = transport.event_tx.lock().unwrap().clone().unwrap();
        event_tx
            .send(TransportEvent::Audio(inbound_chunk(0.1)))
            .await
            .unwrap();
        event_tx
            .send(TransportEvent::Audio(inbound_chunk(0.1)))
            .await
            .unwrap();
        event_tx.send(TransportEvent::Interrupted).await.unwrap();

        // Wait for all three events to be handled.
        for _ in 0..100 {
            if audio.sink_log.lock().unwrap().flushes >= 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        {
            let log = audio.sink_log.lock().unwrap();
            assert_eq!(log.scheduled.len(), 2);
            assert!((log.scheduled[0].0 - 0.0).abs() < 1e-9);
            assert!((log.scheduled[1].0 - 0.1).abs() < 1e-9);
            assert_eq!(log.flushes, 1);
        }

        tx.send(SessionCommand::Stop).await.unwrap();
        drop(tx);
        task.await.unwrap();
    }

    /// Captured frames flow through the chunker to the transport handle in
    /// capture order.
    #[tokio::test]
    async fn captured_audio_is_forwarded_to_transport() {
        let audio = Arc::new(TestAudio::new(false));
        let transport = Arc::new(TestTransport::new(false));
        let (controller, state, tx, rx) = make_controller(Arc::clone(&audio), Arc::clone(&transport));

        let task = tokio::spawn(controller.run(rx));

        tx.send(SessionCommand::Start).await.unwrap();
        wait_for(&state, |s| *s == SessionState::Active).await;

        // Push one chunk's worth of frames as the hardware would.
        let frame_tx = audio.frame_tx.lock().unwrap().clone().unwrap();
        frame_tx
            .send(CaptureFrame {
                samples: vec![0.2_f32; CHUNK_FRAMES],
                sample_rate: 16_000,
                channels: 1,
            })
            .unwrap();

        for _ in 0..100 {
            if !transport.handle.sent.lock().unwrap().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        {
            let sent = transport.handle.sent.lock().unwrap();
            assert_eq!(sent.len(), 1);
            assert_eq!(sent[0].mime_type(), "audio/pcm;rate=16000");
            assert_eq!(sent[0].frames(), CHUNK_FRAMES);
        }

        tx.send(SessionCommand::Stop).await.unwrap();
        drop(tx);
        task.await.unwrap();
    }

    /// Start while already running is rejected — the transport is opened
    /// exactly once.
    #[tokio::test]
    async fn second_start_is_ignored() {
        let audio = Arc::new(TestAudio::new(false));
        let transport = Arc::new(TestTransport::new(false));
        let (controller, state, tx, rx) = make_controller(Arc::clone(&audio), Arc::clone(&transport));

        tx.send(SessionCommand::Start).await.unwrap();
        tx.send(SessionCommand::Start).await.unwrap();
        tx.send(SessionCommand::Stop).await.unwrap();
        drop(tx);

        controller.run(rx).await;

        assert_eq!(transport.opens.load(Ordering::SeqCst), 1);
        assert_eq!(state.lock().unwrap().session, SessionState::Idle);
    }
}

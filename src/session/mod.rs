//! Session lifecycle module — the only surface the rest of the application
//! talks to.
//!
//! # Architecture
//!
//! ```text
//! SessionCommand (mpsc)
//!        │
//!        ▼
//! SessionController::run()  ← async tokio task
//!        │
//!        ├─ Start → Connecting: mic → output device → Transport::open
//!        │          → wire capture → transport, transport → scheduler
//!        │          → Active
//!        │
//!        ├─ Stop / transport Error / remote Close
//!        │          → Closing: close handle, release devices,
//!        │            reset scheduler → Idle
//!        │
//!        └─ inbound TransportEvents → PlaybackScheduler
//!
//! SharedState (Arc<Mutex<AppState>>) ←─── read by the UI
//! ```
//!
//! # Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tokio::sync::mpsc;
//! use voicelink::audio::CpalBackend;
//! use voicelink::session::{new_shared_state, SessionCommand, SessionController};
//! use voicelink::transport::{LiveApiTransport, LiveConfig};
//!
//! #[tokio::main]
//! async fn main() {
//!     let state = new_shared_state();
//!     let transport = Arc::new(LiveApiTransport::new("wss://example.test/voice", None));
//!     let controller = SessionController::new(
//!         Arc::clone(&state),
//!         transport,
//!         Arc::new(CpalBackend),
//!         LiveConfig {
//!             model: "models/voice-live-1".into(),
//!             voice_name: "Aoede".into(),
//!             system_instruction: "Be concise.".into(),
//!         },
//!     );
//!
//!     let (command_tx, command_rx) = mpsc::channel(16);
//!     tokio::spawn(controller.run(command_rx));
//!
//!     command_tx.send(SessionCommand::Start).await.unwrap();
//! }
//! ```

pub mod controller;
pub mod state;

// ---------------------------------------------------------------------------
// Public re-exports
// ---------------------------------------------------------------------------

pub use controller::{SessionCommand, SessionController};
pub use state::{new_shared_state, AppState, SessionState, SharedState};

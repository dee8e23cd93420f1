//! Session state machine and shared application state.
//!
//! [`SessionState`] is the four-state lifecycle the UI observes; the
//! controller is the only writer.  [`SharedState`] is a type alias for
//! `Arc<Mutex<AppState>>` — cheap to clone and safe to share across threads.

use std::sync::{Arc, Mutex};

// ---------------------------------------------------------------------------
// SessionState
// ---------------------------------------------------------------------------

/// Lifecycle states of the voice session.
///
/// ```text
/// Idle ──start──▶ Connecting ──devices ready & transport open──▶ Active
///                     │                                            │
///                     └──acquire/open failed──▶ Idle               │
///                                                                  │
/// Active ──stop / transport error / remote close──▶ Closing
/// Closing ──all releases attempted──▶ Idle
/// ```
///
/// Exactly one session may occupy `Connecting`/`Active` at a time, and
/// transitions are strictly sequential — the controller's event loop is the
/// single writer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No session; all devices released.
    Idle,

    /// Acquiring devices and opening the transport.  Cancelable — failure
    /// returns to `Idle` with nothing retained.
    Connecting,

    /// Audio is flowing in both directions.
    Active,

    /// Teardown in progress; every resource release is attempted
    /// unconditionally before returning to `Idle`.
    Closing,
}

impl SessionState {
    /// Returns `true` while a session occupies the device and transport
    /// resources (i.e. a second `start` must be rejected).
    ///
    /// ```
    /// use voicelink::session::SessionState;
    ///
    /// assert!(!SessionState::Idle.is_running());
    /// assert!(SessionState::Connecting.is_running());
    /// assert!(SessionState::Active.is_running());
    /// assert!(SessionState::Closing.is_running());
    /// ```
    pub fn is_running(&self) -> bool {
        !matches!(self, SessionState::Idle)
    }

    /// A short human-readable label suitable for display in a status line.
    pub fn label(&self) -> &'static str {
        match self {
            SessionState::Idle => "Idle",
            SessionState::Connecting => "Connecting",
            SessionState::Active => "Active",
            SessionState::Closing => "Closing",
        }
    }
}

impl Default for SessionState {
    fn default() -> Self {
        SessionState::Idle
    }
}

// ---------------------------------------------------------------------------
// AppState
// ---------------------------------------------------------------------------

/// Shared application state — everything the UI needs.
///
/// Held behind [`SharedState`].  The session controller mutates it; the UI
/// reads it.  The controller performs no user notification itself — the UI
/// observes the `session` transitions and surfaces messages.
#[derive(Debug, Default)]
pub struct AppState {
    /// Current session lifecycle state.
    pub session: SessionState,

    /// Message describing the most recent session-terminal failure.
    ///
    /// Set when a start attempt fails or the transport dies mid-session;
    /// cleared when the next session starts.
    pub last_error: Option<String>,
}

// ---------------------------------------------------------------------------
// SharedState
// ---------------------------------------------------------------------------

/// Thread-safe handle to [`AppState`].
///
/// Cheap to clone (`Arc` clone).  Lock with `.lock().unwrap()` for a short
/// critical section; do **not** hold the lock across `.await` points.
pub type SharedState = Arc<Mutex<AppState>>;

/// Construct a new [`SharedState`] starting at `Idle`.
pub fn new_shared_state() -> SharedState {
    Arc::new(Mutex::new(AppState::default()))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

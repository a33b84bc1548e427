//! Session lifecycle state and the dispatch admission gate.

use std::{
    fmt,
    sync::atomic::{AtomicU8, Ordering},
};

use tracing::{info, warn};

/// Lifecycle of the underlying messaging session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum SessionState {
    Initializing = 0,
    AwaitingAuth = 1,
    Ready = 2,
    AuthFailed = 3,
    Disconnected = 4,
}

impl SessionState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => Self::AwaitingAuth,
            2 => Self::Ready,
            3 => Self::AuthFailed,
            4 => Self::Disconnected,
            _ => Self::Initializing,
        }
    }

    /// State reached when `event` is observed in this state.
    ///
    /// Every event has a fixed target: the session is the authority on when
    /// it is logged in, so a `Ready` signal after a disconnect re-opens the
    /// gate, and a failure or disconnect closes it from any state.
    #[must_use]
    pub fn on(self, event: LifecycleEvent) -> Self {
        match event {
            LifecycleEvent::LoginChallenge => Self::AwaitingAuth,
            LifecycleEvent::Authenticated => Self::Ready,
            LifecycleEvent::AuthFailure => Self::AuthFailed,
            LifecycleEvent::Disconnected => Self::Disconnected,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Initializing => "initializing",
            Self::AwaitingAuth => "awaiting_auth",
            Self::Ready => "ready",
            Self::AuthFailed => "auth_failed",
            Self::Disconnected => "disconnected",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle signals emitted by the external session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// A login challenge (QR code) was issued.
    LoginChallenge,
    /// The session authenticated and is able to send.
    Authenticated,
    /// Stored or scanned credentials were rejected.
    AuthFailure,
    /// The connection to the network was lost.
    Disconnected,
}

/// Process-wide admission gate for sends.
///
/// Starts in [`SessionState::Initializing`] (closed). The only writer is
/// [`DispatchGate::apply`], called by the session's lifecycle listeners.
/// Readers see a state flip eventually; a request racing a flip may be
/// admitted or rejected on the stale value.
#[derive(Debug)]
pub struct DispatchGate {
    state: AtomicU8,
}

impl Default for DispatchGate {
    fn default() -> Self {
        Self::new()
    }
}

impl DispatchGate {
    pub const fn new() -> Self {
        Self {
            state: AtomicU8::new(SessionState::Initializing as u8),
        }
    }

    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// `true` only while the session is [`SessionState::Ready`].
    pub fn is_ready(&self) -> bool {
        self.state() == SessionState::Ready
    }

    /// Record a lifecycle event and return the new state.
    pub fn apply(&self, event: LifecycleEvent) -> SessionState {
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            let previous = SessionState::from_u8(current);
            let next = previous.on(event);
            match self.state.compare_exchange_weak(
                current,
                next as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    log_transition(previous, next);
                    return next;
                },
                Err(actual) => current = actual,
            }
        }
    }
}

fn log_transition(previous: SessionState, next: SessionState) {
    if previous == next {
        return;
    }
    match next {
        SessionState::Ready => info!(from = %previous, "session ready, dispatch gate open"),
        SessionState::AuthFailed | SessionState::Disconnected => {
            warn!(from = %previous, to = %next, "dispatch gate closed")
        },
        _ => info!(from = %previous, to = %next, "session state changed"),
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, std::sync::Arc};

    #[test]
    fn starts_closed() {
        let gate = DispatchGate::new();
        assert_eq!(gate.state(), SessionState::Initializing);
        assert!(!gate.is_ready());
    }

    #[test]
    fn qr_then_login_opens_gate() {
        let gate = DispatchGate::new();
        assert_eq!(
            gate.apply(LifecycleEvent::LoginChallenge),
            SessionState::AwaitingAuth
        );
        assert!(!gate.is_ready());
        assert_eq!(gate.apply(LifecycleEvent::Authenticated), SessionState::Ready);
        assert!(gate.is_ready());
    }

    #[test]
    fn failure_and_disconnect_close_gate() {
        let gate = DispatchGate::new();
        gate.apply(LifecycleEvent::Authenticated);
        gate.apply(LifecycleEvent::Disconnected);
        assert_eq!(gate.state(), SessionState::Disconnected);
        assert!(!gate.is_ready());

        gate.apply(LifecycleEvent::Authenticated);
        gate.apply(LifecycleEvent::AuthFailure);
        assert_eq!(gate.state(), SessionState::AuthFailed);
        assert!(!gate.is_ready());
    }

    #[test]
    fn closed_states_stay_closed_without_events() {
        let gate = DispatchGate::new();
        gate.apply(LifecycleEvent::AuthFailure);
        for _ in 0..3 {
            assert_eq!(gate.state(), SessionState::AuthFailed);
        }
    }

    #[test]
    fn visible_across_threads() {
        let gate = Arc::new(DispatchGate::new());
        let writer = Arc::clone(&gate);
        std::thread::spawn(move || {
            writer.apply(LifecycleEvent::Authenticated);
        })
        .join()
        .unwrap();
        assert!(gate.is_ready());
    }

    #[test]
    fn state_serializes_snake_case() {
        let json = serde_json::to_string(&SessionState::AwaitingAuth).unwrap();
        assert_eq!(json, "\"awaiting_auth\"");
    }
}

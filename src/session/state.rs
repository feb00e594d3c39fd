//! Session lifecycle state machine.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use tracing::warn;

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Created, but `run_session()` has not started yet.
    Initial,
    /// The handshake exchange is running.
    HandshakeInProgress,
    /// Handshake completed; channel traffic is flowing.
    Active,
    /// Terminated by a regular goodbye exchange.
    CleanShutdown,
    /// The remote side refused the session, or the handshake failed.
    SessionRefusedOrHandshakeError,
    /// Terminated by a fatal error after activation.
    ErrorShutdown,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::CleanShutdown | Self::SessionRefusedOrHandshakeError | Self::ErrorShutdown
        )
    }
}

/// A state change that was actually applied.
#[derive(Debug, Clone, Copy)]
pub struct StateTransition {
    pub old_state: SessionState,
    pub new_state: SessionState,
    /// True exactly once per session: set on the transition that first
    /// reaches a terminal state.
    pub reached_terminal: bool,
}

/// Tracks the session state and enforces the legal transition set. Illegal
/// transitions are logged and ignored rather than panicking, since they can
/// result from benign event races during teardown.
pub struct SessionStateMachine {
    state: Mutex<SessionState>,
    terminal_reported: AtomicBool,
}

impl SessionStateMachine {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SessionState::Initial),
            terminal_reported: AtomicBool::new(false),
        }
    }

    pub fn current(&self) -> SessionState {
        *self.state.lock().expect("session state lock poisoned")
    }

    /// Attempt a transition; returns the applied change, or `None` if the
    /// transition was a no-op or not legal from the current state.
    pub fn transition_to(&self, new_state: SessionState) -> Option<StateTransition> {
        let mut state = self.state.lock().expect("session state lock poisoned");
        let old_state = *state;
        if old_state == new_state {
            return None;
        }
        if old_state.is_terminal() {
            return None;
        }
        if !Self::is_legal(old_state, new_state) {
            warn!(
                "Ignoring illegal session state transition {:?} -> {:?}",
                old_state, new_state
            );
            return None;
        }
        *state = new_state;
        drop(state);

        let reached_terminal =
            new_state.is_terminal() && !self.terminal_reported.swap(true, Ordering::SeqCst);
        Some(StateTransition {
            old_state,
            new_state,
            reached_terminal,
        })
    }

    fn is_legal(old_state: SessionState, new_state: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (old_state, new_state),
            (Initial, HandshakeInProgress)
                | (HandshakeInProgress, Active)
                | (HandshakeInProgress, SessionRefusedOrHandshakeError)
                | (Active, CleanShutdown)
                | (Active, ErrorShutdown)
        )
    }
}

impl Default for SessionStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

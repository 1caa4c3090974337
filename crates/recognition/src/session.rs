//! Session cancellation lifecycle - single source of truth for valid transitions
//!
//! State diagram:
//! ```text
//! Active ──Cancel──> Canceling ──Terminate──> Canceled (terminal)
//!                      │   ▲
//!                      └───┘ Cancel (already canceling, unchanged)
//! ```
//!
//! The Canceling -> Canceled transition is the only point at which the
//! canceled event may be raised.

use std::sync::{Mutex, PoisonError};

use crate::error::RecognitionError;

/// Events that can trigger state transitions
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum SessionEvent {
    /// The engine detected a terminal or error condition
    Cancel,
    /// The canceled event is about to be dispatched
    Terminate,
}

/// Cancellation lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum SessionState {
    /// Recognition is running
    Active,
    /// A cancellation is pending delivery
    Canceling,
    /// The canceled event has been delivered; nothing else will be
    Canceled,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        self == Self::Canceled
    }
}

/// Result of a successful state transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionResult {
    Changed {
        from: SessionState,
        to: SessionState,
    },
    /// Event was valid but state didn't change
    Unchanged,
}

/// Reason a transition was rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("{attempted_event} event rejected in {current_state} state")]
pub struct TransitionRejection {
    pub current_state: SessionState,
    pub attempted_event: SessionEvent,
}

impl From<TransitionRejection> for RecognitionError {
    fn from(rejection: TransitionRejection) -> Self {
        RecognitionError::invalid_state("session transition", rejection.to_string())
    }
}

/// Thread-safe session state manager
#[derive(Debug)]
pub struct SessionStateManager {
    state: Mutex<SessionState>,
}

impl SessionStateManager {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SessionState::Active),
        }
    }

    pub fn current(&self) -> SessionState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Apply `event` to the current state. All state changes go through here.
    pub fn transition(&self, event: SessionEvent) -> Result<TransitionResult, TransitionRejection> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let current = *state;

        match compute_transition(current, event) {
            Some(new_state) if new_state == current => Ok(TransitionResult::Unchanged),
            Some(new_state) => {
                *state = new_state;
                log::debug!("Session state {} -> {} on {}", current, new_state, event);
                Ok(TransitionResult::Changed {
                    from: current,
                    to: new_state,
                })
            }
            None => Err(TransitionRejection {
                current_state: current,
                attempted_event: event,
            }),
        }
    }
}

impl Default for SessionStateManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Pure function: the state `event` leads to, or None if it is invalid
fn compute_transition(current: SessionState, event: SessionEvent) -> Option<SessionState> {
    match (current, event) {
        (SessionState::Active, SessionEvent::Cancel) => Some(SessionState::Canceling),
        (SessionState::Canceling, SessionEvent::Cancel) => Some(SessionState::Canceling),
        (SessionState::Canceling, SessionEvent::Terminate) => Some(SessionState::Canceled),
        // Canceled is terminal
        _ => None,
    }
}

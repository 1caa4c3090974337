use derive_more::From;

use crate::dispatcher::HandlerId;
use crate::handle::RawHandle;

/// Errors raised while resolving handles or building event payloads.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum RecognitionError {
    /// The handle is null, stale, or was already released.
    #[error("Invalid native handle: {handle}")]
    InvalidHandle { handle: RawHandle },

    /// The operation is not allowed for the current result outcome or session state.
    #[error("Invalid state for {operation}: {detail}")]
    InvalidState {
        operation: &'static str,
        detail: String,
    },

    /// The native resource behind the handle has already been released.
    #[error("Native handle {handle} released more than once")]
    DoubleRelease { handle: RawHandle },
}

impl RecognitionError {
    pub(crate) fn invalid_state(operation: &'static str, detail: impl Into<String>) -> Self {
        Self::InvalidState {
            operation,
            detail: detail.into(),
        }
    }
}

/// One handler that failed during a dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerFailure {
    pub handler: HandlerId,
    /// Position of the handler in registration order at dispatch time.
    pub index: usize,
    pub message: String,
    pub panicked: bool,
}

/// Aggregated handler failures, reported once after every handler has run.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error(
    "{} of {} '{}' handler(s) failed: {}",
    .failures.len(),
    .invoked,
    .event,
    summarize(.failures)
)]
pub struct DispatchError {
    pub event: &'static str,
    pub invoked: usize,
    pub failures: Vec<HandlerFailure>,
}

fn summarize(failures: &[HandlerFailure]) -> String {
    failures
        .iter()
        .map(|f| format!("{} ({})", f.handler, f.message))
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Debug, From, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Recognition(RecognitionError),

    #[error(transparent)]
    Dispatch(DispatchError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dispatch_error_message_lists_every_failure() {
        let error = DispatchError {
            event: "canceled",
            invoked: 3,
            failures: vec![
                HandlerFailure {
                    handler: HandlerId::from_raw(1),
                    index: 0,
                    message: "boom".to_string(),
                    panicked: false,
                },
                HandlerFailure {
                    handler: HandlerId::from_raw(3),
                    index: 2,
                    message: "panicked".to_string(),
                    panicked: true,
                },
            ],
        };

        assert_eq!(
            error.to_string(),
            "2 of 3 'canceled' handler(s) failed: handler#1 (boom); handler#3 (panicked)"
        );
    }

    #[test]
    fn test_error_from_conversions() {
        let err: Error = RecognitionError::InvalidHandle {
            handle: RawHandle::NULL,
        }
        .into();
        assert!(matches!(err, Error::Recognition(_)));
        assert_eq!(err.to_string(), "Invalid native handle: 0x0");
    }
}

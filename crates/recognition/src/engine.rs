//! Boundary to the native recognition engine.
//!
//! The engine owns every result behind a [`RawHandle`]. This crate only
//! resolves handles into [`ResultEnvelope`]s, asks the engine how a canceled
//! result should be classified, and hands handles back when it is done.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::error::RecognitionError;
use crate::handle::RawHandle;
use crate::result::ResultEnvelope;

/// Backend view of why a session stopped.
///
/// `code` is whatever identifier the backend reports (an HTTP status, a
/// WebSocket close code, or a symbolic name). It is mapped into
/// [`CancellationErrorCode`](crate::CancellationErrorCode) during derivation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendCancellation {
    /// The audio stream ended without any error signal.
    EndOfStream,
    Error {
        code: Option<String>,
        message: String,
    },
}

impl BackendCancellation {
    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Error {
            code: Some(code.into()),
            message: message.into(),
        }
    }
}

/// Operations this crate consumes from the native engine.
pub trait NativeEngine: Send + Sync {
    /// Resolve a handle into the result it refers to.
    fn result_from_handle(&self, handle: RawHandle) -> Result<ResultEnvelope, RecognitionError>;

    /// Backend classification for a canceled result.
    fn classify_cancellation(&self, result: &ResultEnvelope) -> BackendCancellation;

    /// Give the handle back to the engine. Releasing twice is a caller error.
    fn release_handle(&self, handle: RawHandle) -> Result<(), RecognitionError>;
}

#[derive(Debug, Default)]
struct TableState {
    next_handle: u64,
    live: HashMap<RawHandle, ResultEnvelope>,
    released: HashSet<RawHandle>,
    signals: HashMap<String, BackendCancellation>,
    release_count: u64,
}

/// In-process [`NativeEngine`] backed by a shared handle table.
///
/// Handles are never reused, so a released handle stays recognizable and a
/// second release is reported as [`RecognitionError::DoubleRelease`] instead
/// of touching another entry.
#[derive(Debug, Default)]
pub struct HandleTable {
    state: Mutex<TableState>,
}

impl HandleTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, TableState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a result and return a fresh handle for it.
    pub fn insert(&self, envelope: ResultEnvelope) -> RawHandle {
        let mut state = self.lock();
        state.next_handle += 1;
        let handle = RawHandle::from_raw(state.next_handle);
        log::debug!(
            "Issued handle {} for result {} ({})",
            handle,
            envelope.result_id(),
            envelope.outcome()
        );
        state.live.insert(handle, envelope);
        handle
    }

    /// Register a canceled result together with the backend signal that ended it.
    pub fn insert_canceled(
        &self,
        envelope: ResultEnvelope,
        signal: BackendCancellation,
    ) -> RawHandle {
        self.record_signal(envelope.result_id(), signal);
        self.insert(envelope)
    }

    /// Record (or replace) the backend signal for a result id.
    pub fn record_signal(&self, result_id: &str, signal: BackendCancellation) {
        self.lock().signals.insert(result_id.to_string(), signal);
    }

    pub fn is_live(&self, handle: RawHandle) -> bool {
        self.lock().live.contains_key(&handle)
    }

    pub fn live_count(&self) -> usize {
        self.lock().live.len()
    }

    /// Number of successful releases so far.
    pub fn release_count(&self) -> u64 {
        self.lock().release_count
    }
}

impl NativeEngine for HandleTable {
    fn result_from_handle(&self, handle: RawHandle) -> Result<ResultEnvelope, RecognitionError> {
        self.lock()
            .live
            .get(&handle)
            .cloned()
            .ok_or(RecognitionError::InvalidHandle { handle })
    }

    fn classify_cancellation(&self, result: &ResultEnvelope) -> BackendCancellation {
        match self.lock().signals.get(result.result_id()) {
            Some(signal) => signal.clone(),
            None => {
                log::warn!(
                    "No backend signal recorded for canceled result {}",
                    result.result_id()
                );
                BackendCancellation::Error {
                    code: None,
                    message: format!(
                        "no cancellation signal recorded for result {}",
                        result.result_id()
                    ),
                }
            }
        }
    }

    fn release_handle(&self, handle: RawHandle) -> Result<(), RecognitionError> {
        let mut state = self.lock();

        if let Some(envelope) = state.live.remove(&handle) {
            let result_id = envelope.result_id();
            let still_referenced = state.live.values().any(|live| live.result_id() == result_id);
            if !still_referenced {
                state.signals.remove(result_id);
            }
            state.released.insert(handle);
            state.release_count += 1;
            return Ok(());
        }

        if state.released.contains(&handle) {
            return Err(RecognitionError::DoubleRelease { handle });
        }

        Err(RecognitionError::InvalidHandle { handle })
    }
}

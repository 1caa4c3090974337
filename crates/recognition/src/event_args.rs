//! Event payloads handed to session handlers.
//!
//! Every field a handler can read is copied out of the native result while
//! the handle is still valid. When the payload takes ownership of the handle,
//! the release happens inside the same constructor, strictly after the copy.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::details::{CancellationDetails, CancellationErrorCode, CancellationReason};
use crate::engine::NativeEngine;
use crate::error::RecognitionError;
use crate::handle::{HandleGuard, RawHandle};
use crate::result::ResultEnvelope;

/// Resolve `handle`, derive whatever the payload needs, then release the
/// handle through `owner` if ownership was transferred. A failed derivation
/// still releases an owned handle when the guard goes out of scope.
fn extract<T>(
    engine: &Arc<dyn NativeEngine>,
    handle: RawHandle,
    owner: Option<HandleGuard>,
    derive: impl FnOnce(&ResultEnvelope) -> Result<T, RecognitionError>,
) -> Result<(ResultEnvelope, T), RecognitionError> {
    if handle.is_null() {
        return Err(RecognitionError::InvalidHandle { handle });
    }

    let result = engine.result_from_handle(handle)?;
    let derived = derive(&result)?;

    if let Some(owner) = owner {
        owner.release_or_report();
    }

    Ok((result, derived))
}

/// Guard for `handle` when the payload is asked to take it over.
fn owner_for(
    engine: &Arc<dyn NativeEngine>,
    handle: RawHandle,
    take_ownership: bool,
) -> Result<Option<HandleGuard>, RecognitionError> {
    if take_ownership {
        HandleGuard::adopt(Arc::clone(engine), handle).map(Some)
    } else {
        Ok(None)
    }
}

/// Payload of the canceled event.
///
/// The three cancellation fields never change after construction and stay
/// readable after the native handle is gone.
pub struct CanceledEventArgs {
    result: ResultEnvelope,
    details: CancellationDetails,
    handle: RawHandle,
    owns_handle: bool,
    disposed: AtomicBool,
}

impl CanceledEventArgs {
    /// Build the payload from a native handle.
    ///
    /// With `take_ownership` the handle is released before this returns and
    /// must not be used again by anyone. Without it the caller keeps
    /// ownership and remains responsible for releasing it.
    pub fn new(
        engine: &Arc<dyn NativeEngine>,
        handle: RawHandle,
        take_ownership: bool,
    ) -> Result<Self, RecognitionError> {
        let owner = owner_for(engine, handle, take_ownership)?;
        Self::build(engine, handle, owner)
    }

    /// Build the payload and release the handle through `owner`, which keeps
    /// its double-release policy.
    pub(crate) fn from_guard(
        engine: &Arc<dyn NativeEngine>,
        owner: HandleGuard,
    ) -> Result<Self, RecognitionError> {
        Self::build(engine, owner.handle(), Some(owner))
    }

    fn build(
        engine: &Arc<dyn NativeEngine>,
        handle: RawHandle,
        owner: Option<HandleGuard>,
    ) -> Result<Self, RecognitionError> {
        let take_ownership = owner.is_some();
        let (result, details) = extract(engine, handle, owner, |result| {
            CancellationDetails::from_result(result, engine.as_ref())
        })?;

        log::debug!(
            "Built canceled event args for result {} ({}/{})",
            result.result_id(),
            details.reason(),
            details.error_code()
        );

        Ok(Self {
            result,
            details,
            handle,
            owns_handle: take_ownership,
            disposed: AtomicBool::new(false),
        })
    }

    pub fn reason(&self) -> CancellationReason {
        self.details.reason()
    }

    pub fn error_code(&self) -> CancellationErrorCode {
        self.details.error_code()
    }

    pub fn error_details(&self) -> &str {
        self.details.error_details()
    }

    pub fn details(&self) -> &CancellationDetails {
        &self.details
    }

    pub fn session_id(&self) -> &str {
        self.result.session_id()
    }

    pub fn result(&self) -> &ResultEnvelope {
        &self.result
    }

    /// The native handle, while it is still usable through this payload.
    ///
    /// `None` once the payload has been disposed or if it took ownership
    /// (the handle was released during construction).
    pub fn handle(&self) -> Option<RawHandle> {
        if self.owns_handle || self.is_disposed() {
            None
        } else {
            Some(self.handle)
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    /// Mark the payload disposed. Returns `true` only for the call that did it;
    /// later or concurrent calls are no-ops.
    pub fn dispose(&self) -> bool {
        let first = !self.disposed.swap(true, Ordering::AcqRel);
        if first {
            log::debug!("Disposed canceled event args for {}", self.result.result_id());
        }
        first
    }
}

impl fmt::Display for CanceledEventArgs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SessionId:{} ResultId:{} CancellationReason:{} \
             CancellationErrorCode:{} Error details:<{}",
            self.session_id(),
            self.result.result_id(),
            self.reason(),
            self.error_code(),
            self.error_details()
        )
    }
}

impl fmt::Debug for CanceledEventArgs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CanceledEventArgs")
            .field("result", &self.result)
            .field("details", &self.details)
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

/// Payload of the recognizing and recognized events.
#[derive(Debug)]
pub struct RecognitionEventArgs {
    result: ResultEnvelope,
}

impl RecognitionEventArgs {
    /// Build the payload from a native handle. Canceled results belong to
    /// [`CanceledEventArgs`] and are rejected here.
    pub fn new(
        engine: &Arc<dyn NativeEngine>,
        handle: RawHandle,
        take_ownership: bool,
    ) -> Result<Self, RecognitionError> {
        let owner = owner_for(engine, handle, take_ownership)?;
        Self::build(engine, handle, owner)
    }

    pub(crate) fn from_guard(
        engine: &Arc<dyn NativeEngine>,
        owner: HandleGuard,
    ) -> Result<Self, RecognitionError> {
        Self::build(engine, owner.handle(), Some(owner))
    }

    fn build(
        engine: &Arc<dyn NativeEngine>,
        handle: RawHandle,
        owner: Option<HandleGuard>,
    ) -> Result<Self, RecognitionError> {
        let (result, ()) = extract(engine, handle, owner, |result| {
            if result.is_canceled() {
                return Err(RecognitionError::invalid_state(
                    "recognition event args",
                    format!("result {} is canceled", result.result_id()),
                ));
            }
            Ok(())
        })?;

        Ok(Self { result })
    }

    pub fn session_id(&self) -> &str {
        self.result.session_id()
    }

    pub fn result(&self) -> &ResultEnvelope {
        &self.result
    }
}

impl fmt::Display for RecognitionEventArgs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SessionId:{} ResultId:{} Reason:{} Recognized text:<{}>.",
            self.session_id(),
            self.result.result_id(),
            self.result.outcome(),
            self.result.text()
        )
    }
}

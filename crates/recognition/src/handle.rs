//! Opaque native handles and the scoped ownership token around them.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use crate::engine::NativeEngine;
use crate::error::RecognitionError;

/// Opaque reference to state owned by the native engine. Zero is the null handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, derive_more::Display)]
#[display("0x{_0:x}")]
pub struct RawHandle(u64);

impl RawHandle {
    pub const NULL: Self = Self(0);

    pub const fn from_raw(value: u64) -> Self {
        Self(value)
    }

    pub fn as_raw(self) -> u64 {
        self.0
    }

    pub fn is_null(self) -> bool {
        self.0 == 0
    }
}

/// Exclusive ownership of one native handle.
///
/// The handle is released at most once: either explicitly through
/// [`HandleGuard::release`] or when the guard is dropped. Concurrent
/// `release` calls are serialized; exactly one caller performs the release
/// and the others observe `Ok(false)`.
///
/// Releases that happen on the guard's own initiative (drop, and the
/// crate's internal release-after-use paths) are reported in one place: a
/// double release is logged at `error!` and, for guards built with
/// [`HandleGuard::fatal_on_double_release`], panics in debug builds.
pub struct HandleGuard {
    engine: Arc<dyn NativeEngine>,
    handle: RawHandle,
    released: AtomicBool,
    fatal_double_release: bool,
}

impl HandleGuard {
    /// Take ownership of `handle`. Fails for the null handle.
    pub fn adopt(
        engine: Arc<dyn NativeEngine>,
        handle: RawHandle,
    ) -> Result<Self, RecognitionError> {
        if handle.is_null() {
            return Err(RecognitionError::InvalidHandle { handle });
        }

        Ok(Self {
            engine,
            handle,
            released: AtomicBool::new(false),
            fatal_double_release: false,
        })
    }

    /// Panic (debug builds only) when this guard finds its handle already released.
    pub fn fatal_on_double_release(mut self, fatal: bool) -> Self {
        self.fatal_double_release = fatal;
        self
    }

    pub fn handle(&self) -> RawHandle {
        self.handle
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }

    /// Give up ownership without releasing, e.g. to hand the handle to a
    /// payload that releases it itself.
    pub fn into_raw(self) -> RawHandle {
        self.released.store(true, Ordering::Release);
        self.handle
    }

    /// Release the native resource.
    ///
    /// Returns `Ok(true)` for the caller that released it and `Ok(false)` if
    /// this guard had already been released. Errors come from the engine,
    /// e.g. [`RecognitionError::DoubleRelease`] when someone else freed the
    /// handle behind this guard's back.
    pub fn release(&self) -> Result<bool, RecognitionError> {
        if self.released.swap(true, Ordering::AcqRel) {
            return Ok(false);
        }

        self.engine.release_handle(self.handle)?;
        log::debug!("Released native handle {}", self.handle);
        Ok(true)
    }

    /// Release and report failures instead of returning them.
    pub(crate) fn release_or_report(&self) {
        match self.release() {
            Ok(_) => {}
            Err(RecognitionError::DoubleRelease { handle }) => {
                log::error!("Native handle {} was already released", handle);
                // Never panic while unwinding: that would abort.
                if self.fatal_double_release && cfg!(debug_assertions) && !thread::panicking() {
                    panic!("native handle {} released more than once", handle);
                }
            }
            Err(e) => log::error!("Failed to release native handle {}: {}", self.handle, e),
        }
    }
}

impl Drop for HandleGuard {
    fn drop(&mut self) {
        self.release_or_report();
    }
}

impl std::fmt::Debug for HandleGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandleGuard")
            .field("handle", &self.handle)
            .field("released", &self.is_released())
            .field("fatal_double_release", &self.fatal_double_release)
            .finish()
    }
}

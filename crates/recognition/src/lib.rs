//! Cancellation and result event propagation for streaming speech recognition.
//!
//! A recognition session lives in a native engine that hands results over as
//! opaque handles. This crate turns those handles into typed event payloads,
//! classifies cancellations into a closed set of reasons and error codes, and
//! delivers each event to the session's handlers:
//!
//! - the canceled event is delivered at most once per session, only on the
//!   `Canceling -> Canceled` transition
//! - every handler runs even if an earlier one fails or panics; failures are
//!   reported together once all handlers returned
//! - payload fields are copied out before the native handle is released, so
//!   they stay readable no matter who frees the handle
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use dictara_recognition::{
//!     BackendCancellation, CanceledEventArgs, CancellationErrorCode, DispatchConfig,
//!     EventDispatcher, HandleTable, ResultEnvelope, ResultOutcome,
//! };
//!
//! let engine = Arc::new(HandleTable::new());
//! let dispatcher = EventDispatcher::new("s1", engine.clone(), DispatchConfig::default());
//!
//! dispatcher.canceled().connect(|args: &CanceledEventArgs| {
//!     assert_eq!(args.error_code(), CancellationErrorCode::AuthFailure);
//!     println!("{}", args);
//!     Ok(())
//! });
//!
//! let handle = engine.insert_canceled(
//!     ResultEnvelope::new("s1", "r1", ResultOutcome::Canceled),
//!     BackendCancellation::error("401", "401 invalid key"),
//! );
//!
//! dispatcher.begin_cancel()?;
//! dispatcher.raise_canceled(handle)?;
//! # Ok::<(), dictara_recognition::Error>(())
//! ```

mod config;
mod details;
mod dispatcher;
mod engine;
mod error;
mod event_args;
mod handle;
mod pump;
mod result;
mod session;

pub use config::{ConfigError, ConfigKey, ConfigStore, DispatchConfig, JsonConfigStore};
pub use details::{
    map_backend_code, CancellationDetails, CancellationErrorCode, CancellationReason,
};
pub use dispatcher::{EventDispatcher, EventSignal, HandlerId, HandlerResult};
pub use engine::{BackendCancellation, HandleTable, NativeEngine};
pub use error::{DispatchError, Error, HandlerFailure, RecognitionError};
pub use event_args::{CanceledEventArgs, RecognitionEventArgs};
pub use handle::{HandleGuard, RawHandle};
pub use pump::{EventPump, NativeEvent, NativeEventSender, PumpReport};
pub use result::{new_result_id, ResultEnvelope, ResultOutcome};
pub use session::{
    SessionEvent, SessionState, SessionStateManager, TransitionRejection, TransitionResult,
};

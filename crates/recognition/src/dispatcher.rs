//! Session-level event delivery.
//!
//! [`EventSignal`] fans one payload out to every connected handler, in
//! registration order, and isolates handler failures (errors and panics) so
//! one bad handler never blocks the rest. [`EventDispatcher`] owns the signals
//! for one session and enforces the cancellation lifecycle around them.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::{Duration, Instant};

use crate::config::{ConfigKey, ConfigStore, DispatchConfig};
use crate::engine::NativeEngine;
use crate::error::{DispatchError, Error, HandlerFailure, RecognitionError};
use crate::event_args::{CanceledEventArgs, RecognitionEventArgs};
use crate::handle::{HandleGuard, RawHandle};
use crate::session::{SessionEvent, SessionState, SessionStateManager};

/// Outcome of a single handler invocation.
pub type HandlerResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

type Handler<A> = Arc<dyn Fn(&A) -> HandlerResult + Send + Sync>;

/// Identifies a connected handler; returned by [`EventSignal::connect`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, derive_more::Display)]
#[display("handler#{_0}")]
pub struct HandlerId(u64);

impl HandlerId {
    pub(crate) const fn from_raw(value: u64) -> Self {
        Self(value)
    }
}

/// A named event with zero or more handlers.
pub struct EventSignal<A> {
    name: &'static str,
    handlers: Mutex<Vec<(HandlerId, Handler<A>)>>,
    next_id: AtomicU64,
    slow_handler_threshold: Duration,
}

impl<A> EventSignal<A> {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            handlers: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            slow_handler_threshold: DispatchConfig::default().slow_handler_threshold(),
        }
    }

    pub fn with_slow_handler_threshold(mut self, threshold: Duration) -> Self {
        self.slow_handler_threshold = threshold;
        self
    }

    fn lock(&self) -> MutexGuard<'_, Vec<(HandlerId, Handler<A>)>> {
        self.handlers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub(crate) fn slow_handler_threshold(&self) -> Duration {
        self.slow_handler_threshold
    }

    pub fn connect<F>(&self, handler: F) -> HandlerId
    where
        F: Fn(&A) -> HandlerResult + Send + Sync + 'static,
    {
        let id = HandlerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.lock().push((id, Arc::new(handler)));
        log::debug!("Connected {} to '{}'", id, self.name);
        id
    }

    /// Remove a handler. Returns false if it was not connected.
    pub fn disconnect(&self, id: HandlerId) -> bool {
        let mut handlers = self.lock();
        let before = handlers.len();
        handlers.retain(|(existing, _)| *existing != id);
        before != handlers.len()
    }

    pub fn handler_count(&self) -> usize {
        self.lock().len()
    }

    /// Invoke every handler connected when the dispatch starts.
    ///
    /// Handlers run synchronously on the calling thread. The handler list is
    /// snapshotted first, so handlers may connect or disconnect without
    /// deadlocking; such changes apply from the next dispatch. Returns the
    /// number of handlers invoked, or every failure at once after all ran.
    pub fn dispatch(&self, args: &A) -> Result<usize, DispatchError> {
        let snapshot: Vec<(HandlerId, Handler<A>)> = self.lock().clone();
        let mut failures = Vec::new();

        for (index, (id, handler)) in snapshot.iter().enumerate() {
            let started = Instant::now();
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| handler(args)));

            let elapsed = started.elapsed();
            if elapsed > self.slow_handler_threshold {
                log::warn!(
                    "'{}' {} took {:?}; hand long-running work off the dispatch thread",
                    self.name,
                    id,
                    elapsed
                );
            }

            let failure = match outcome {
                Ok(Ok(())) => None,
                Ok(Err(e)) => Some((e.to_string(), false)),
                Err(payload) => Some((panic_message(payload.as_ref()), true)),
            };

            if let Some((message, panicked)) = failure {
                log::error!("'{}' {} failed: {}", self.name, id, message);
                failures.push(HandlerFailure {
                    handler: *id,
                    index,
                    message,
                    panicked,
                });
            }
        }

        if failures.is_empty() {
            Ok(snapshot.len())
        } else {
            Err(DispatchError {
                event: self.name,
                invoked: snapshot.len(),
                failures,
            })
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    let detail = if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string payload".to_string()
    };
    format!("panicked: {}", detail)
}

/// Event delivery for one recognition session.
pub struct EventDispatcher {
    session_id: String,
    engine: Arc<dyn NativeEngine>,
    config: DispatchConfig,
    state: SessionStateManager,
    /// Serializes canceled-event construction and the Canceling -> Canceled transition.
    raising: Mutex<()>,
    /// Held shared for a whole recognition delivery and exclusively for the
    /// Canceled transition, so no recognition event outlives the cancellation.
    delivery: RwLock<()>,
    recognizing: EventSignal<RecognitionEventArgs>,
    recognized: EventSignal<RecognitionEventArgs>,
    canceled: EventSignal<CanceledEventArgs>,
}

impl EventDispatcher {
    pub fn new(
        session_id: impl Into<String>,
        engine: Arc<dyn NativeEngine>,
        config: DispatchConfig,
    ) -> Self {
        let threshold = config.slow_handler_threshold();
        Self {
            session_id: session_id.into(),
            engine,
            config,
            state: SessionStateManager::new(),
            raising: Mutex::new(()),
            delivery: RwLock::new(()),
            recognizing: EventSignal::new("recognizing").with_slow_handler_threshold(threshold),
            recognized: EventSignal::new("recognized").with_slow_handler_threshold(threshold),
            canceled: EventSignal::new("canceled").with_slow_handler_threshold(threshold),
        }
    }

    /// Build a dispatcher using the stored dispatch config, or defaults.
    pub fn from_store(
        session_id: impl Into<String>,
        engine: Arc<dyn NativeEngine>,
        store: &impl ConfigStore,
    ) -> Self {
        let config = store.get(&ConfigKey::DISPATCH).unwrap_or_default();
        Self::new(session_id, engine, config)
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    pub fn state(&self) -> SessionState {
        self.state.current()
    }

    pub fn recognizing(&self) -> &EventSignal<RecognitionEventArgs> {
        &self.recognizing
    }

    pub fn recognized(&self) -> &EventSignal<RecognitionEventArgs> {
        &self.recognized
    }

    pub fn canceled(&self) -> &EventSignal<CanceledEventArgs> {
        &self.canceled
    }

    /// Record that the engine hit a terminal condition. Idempotent while canceling.
    pub fn begin_cancel(&self) -> Result<(), RecognitionError> {
        self.state.transition(SessionEvent::Cancel)?;
        Ok(())
    }

    /// Deliver the canceled event for `handle` and move the session to `Canceled`.
    ///
    /// The dispatcher takes ownership of `handle`. It is released on every
    /// path: by the payload right after extraction when
    /// `release_after_extraction` is set, otherwise by the dispatcher once the
    /// handlers have returned. Construction failures leave the session in
    /// `Canceling` and reach no handler.
    ///
    /// Waits for recognition deliveries already in progress, so it must not
    /// be called from a recognizing or recognized handler.
    pub fn raise_canceled(&self, handle: RawHandle) -> Result<(), Error> {
        let guard = self.adopt(handle)?;

        let (args, owner) = {
            let _raising = self.raising.lock().unwrap_or_else(PoisonError::into_inner);

            let state = self.state.current();
            if state != SessionState::Canceling {
                log::warn!(
                    "Refusing to raise canceled for session {} in {} state",
                    self.session_id,
                    state
                );
                return Err(RecognitionError::invalid_state(
                    "raise canceled",
                    format!("session {} is {}, expected Canceling", self.session_id, state),
                )
                .into());
            }

            let (args, owner) = if self.config.release_after_extraction {
                (CanceledEventArgs::from_guard(&self.engine, guard)?, None)
            } else {
                (CanceledEventArgs::new(&self.engine, handle, false)?, Some(guard))
            };
            self.check_session(args.session_id(), "raise canceled")?;

            let _delivery = self.delivery.write().unwrap_or_else(PoisonError::into_inner);
            self.state
                .transition(SessionEvent::Terminate)
                .map_err(RecognitionError::from)?;
            (args, owner)
        };

        log::debug!("Dispatching canceled: {}", args);
        let outcome = self.canceled.dispatch(&args);

        if !args.dispose() {
            log::debug!("Canceled event args already disposed by a handler");
        }
        if let Some(owner) = owner {
            owner.release_or_report();
        }

        outcome.map(|_| ()).map_err(Error::from)
    }

    pub fn raise_recognizing(&self, handle: RawHandle) -> Result<(), Error> {
        self.raise_recognition(&self.recognizing, handle)
    }

    pub fn raise_recognized(&self, handle: RawHandle) -> Result<(), Error> {
        self.raise_recognition(&self.recognized, handle)
    }

    fn raise_recognition(
        &self,
        signal: &EventSignal<RecognitionEventArgs>,
        handle: RawHandle,
    ) -> Result<(), Error> {
        let guard = self.adopt(handle)?;
        let _delivery = self.delivery.read().unwrap_or_else(PoisonError::into_inner);

        let state = self.state.current();
        if state.is_terminal() {
            log::warn!(
                "Dropping '{}' event for session {}: already canceled",
                signal.name(),
                self.session_id
            );
            return Err(RecognitionError::invalid_state(
                "raise recognition event",
                format!("session {} is {}", self.session_id, state),
            )
            .into());
        }

        let (args, owner) = if self.config.release_after_extraction {
            (RecognitionEventArgs::from_guard(&self.engine, guard)?, None)
        } else {
            (RecognitionEventArgs::new(&self.engine, handle, false)?, Some(guard))
        };
        self.check_session(args.session_id(), "raise recognition event")?;

        let outcome = signal.dispatch(&args);
        if let Some(owner) = owner {
            owner.release_or_report();
        }

        outcome.map(|_| ()).map_err(Error::from)
    }

    /// Give back a handle that will not be delivered.
    pub(crate) fn discard(&self, handle: RawHandle) {
        match self.adopt(handle) {
            Ok(guard) => guard.release_or_report(),
            Err(e) => log::debug!("Nothing to discard: {}", e),
        }
    }

    /// Every handle this dispatcher owns goes through a guard carrying the
    /// configured double-release policy.
    fn adopt(&self, handle: RawHandle) -> Result<HandleGuard, RecognitionError> {
        HandleGuard::adopt(Arc::clone(&self.engine), handle)
            .map(|guard| guard.fatal_on_double_release(self.config.fatal_double_release))
    }

    fn check_session(
        &self,
        session_id: &str,
        operation: &'static str,
    ) -> Result<(), RecognitionError> {
        if session_id == self.session_id {
            return Ok(());
        }
        Err(RecognitionError::invalid_state(
            operation,
            format!(
                "result belongs to session {}, not {}",
                session_id, self.session_id
            ),
        ))
    }
}

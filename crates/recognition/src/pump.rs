//! Hand-off from the native callback thread to a dedicated dispatch thread.
//!
//! The engine's callback thread only posts [`NativeEvent`]s into a channel and
//! returns immediately; handlers run on the pump thread, one event at a time,
//! in the order the engine posted them.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use crate::dispatcher::EventDispatcher;
use crate::error::Error;
use crate::handle::RawHandle;
use crate::session::SessionState;

/// Notifications posted by the native engine. Each handle is handed over to
/// the pump, which releases it after delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NativeEvent {
    Recognizing(RawHandle),
    Recognized(RawHandle),
    /// A terminal condition was detected; the canceled result follows.
    CancelRequested,
    /// The canceled result for the session.
    Canceled(RawHandle),
}

#[derive(Debug)]
enum PumpMessage {
    Native(NativeEvent),
    Shutdown,
}

impl NativeEvent {
    fn handle(self) -> Option<RawHandle> {
        match self {
            Self::Recognizing(handle) | Self::Recognized(handle) | Self::Canceled(handle) => {
                Some(handle)
            }
            Self::CancelRequested => None,
        }
    }
}

/// Cloneable sender given to the native callback thread.
#[derive(Clone)]
pub struct NativeEventSender {
    tx: UnboundedSender<PumpMessage>,
    dispatcher: Arc<EventDispatcher>,
}

impl NativeEventSender {
    /// Queue an event. Returns false if the pump has already stopped, in
    /// which case the event's handle is released here.
    pub fn post(&self, event: NativeEvent) -> bool {
        match self.tx.send(PumpMessage::Native(event)) {
            Ok(()) => true,
            Err(_) => {
                log::warn!("Event pump stopped; dropping {:?}", event);
                discard(&self.dispatcher, event);
                false
            }
        }
    }
}

/// What the pump thread did before it stopped.
#[derive(Debug, Default)]
pub struct PumpReport {
    /// Events delivered without error.
    pub delivered: usize,
    /// Every error returned while delivering, in order.
    pub errors: Vec<Error>,
}

/// Dispatch thread for one session.
pub struct EventPump {
    sender: NativeEventSender,
    worker: Option<JoinHandle<PumpReport>>,
}

impl EventPump {
    /// Start the dispatch thread. The pump stops on its own once the canceled
    /// event has been delivered, or when [`EventPump::shutdown`] is called.
    pub fn spawn(dispatcher: Arc<EventDispatcher>) -> std::io::Result<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        let worker = thread::Builder::new()
            .name(format!("recognition-events-{}", dispatcher.session_id()))
            .spawn({
                let dispatcher = Arc::clone(&dispatcher);
                move || run(dispatcher, rx)
            })?;

        Ok(Self {
            sender: NativeEventSender { tx, dispatcher },
            worker: Some(worker),
        })
    }

    pub fn sender(&self) -> NativeEventSender {
        self.sender.clone()
    }

    /// Stop after the events already queued and wait for the thread.
    pub fn shutdown(self) -> PumpReport {
        // Fails only when the pump already stopped by itself.
        let _ = self.sender.tx.send(PumpMessage::Shutdown);
        self.join()
    }

    /// Wait for the pump to stop by itself (after the canceled event).
    pub fn join(mut self) -> PumpReport {
        self.join_worker()
    }

    fn join_worker(&mut self) -> PumpReport {
        match self.worker.take().map(JoinHandle::join) {
            Some(Ok(report)) => report,
            Some(Err(_)) => {
                log::error!("Event pump thread panicked");
                PumpReport::default()
            }
            None => PumpReport::default(),
        }
    }
}

impl Drop for EventPump {
    fn drop(&mut self) {
        if self.worker.is_some() {
            let _ = self.sender.tx.send(PumpMessage::Shutdown);
            self.join_worker();
        }
    }
}

/// Main pump loop - consumes the receiver, runs on the pump thread
fn run(dispatcher: Arc<EventDispatcher>, mut rx: UnboundedReceiver<PumpMessage>) -> PumpReport {
    let mut report = PumpReport::default();

    while let Some(message) = rx.blocking_recv() {
        let event = match message {
            PumpMessage::Native(event) => event,
            PumpMessage::Shutdown => {
                log::debug!("Event pump for {} shutting down", dispatcher.session_id());
                break;
            }
        };

        match deliver(&dispatcher, event) {
            Ok(()) => report.delivered += 1,
            Err(e) => {
                log::warn!("Delivering {:?} failed: {}", event, e);
                report.errors.push(e);
            }
        }

        if dispatcher.state() == SessionState::Canceled {
            log::debug!(
                "Session {} canceled; event pump stopping",
                dispatcher.session_id()
            );
            break;
        }
    }

    // Anything still queued is not delivered; give the handles back.
    rx.close();
    while let Ok(message) = rx.try_recv() {
        if let PumpMessage::Native(event) = message {
            log::debug!("Discarding {:?} queued after pump stop", event);
            discard(&dispatcher, event);
        }
    }

    report
}

fn discard(dispatcher: &EventDispatcher, event: NativeEvent) {
    if let Some(handle) = event.handle() {
        dispatcher.discard(handle);
    }
}

fn deliver(dispatcher: &EventDispatcher, event: NativeEvent) -> Result<(), Error> {
    match event {
        NativeEvent::Recognizing(handle) => dispatcher.raise_recognizing(handle),
        NativeEvent::Recognized(handle) => dispatcher.raise_recognized(handle),
        NativeEvent::CancelRequested => Ok(dispatcher.begin_cancel()?),
        NativeEvent::Canceled(handle) => {
            dispatcher.begin_cancel()?;
            dispatcher.raise_canceled(handle)
        }
    }
}

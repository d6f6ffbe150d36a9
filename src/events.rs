//! Event channel between the conversion worker and the interactive consumer.

use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::time::Duration;

use serde::Serialize;

use crate::progress::ProgressSample;

/// Cadence at which the consumer loop is expected to call [`EventPump::tick`].
pub const PUMP_INTERVAL: Duration = Duration::from_millis(100);

/// Detail carried by a terminal `Failed` event.
///
/// The trace is populated only when the request was submitted with the
/// debug flag set.
#[derive(Debug, Clone, Serialize)]
pub struct FailureDetail {
    pub summary: String,
    pub trace: Option<String>,
}

/// Everything the presentation layer can observe from one conversion session.
#[derive(Debug, Clone, Serialize)]
pub enum OrchestrationEvent {
    /// Raw buffered engine output, published once after a successful run.
    Progress(String),
    /// Structured progress derived from the engine's text output.
    RealtimeProgress(ProgressSample),
    Debug(String),
    Complete(PathBuf),
    Failed(FailureDetail),
}

impl OrchestrationEvent {
    /// `Complete` and `Failed` end a session's event sequence.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete(_) | Self::Failed(_))
    }
}

/// Worker-side handle. Publishing never blocks and never drops events.
#[derive(Clone)]
pub struct EventSender {
    tx: mpsc::Sender<OrchestrationEvent>,
}

impl EventSender {
    pub fn publish(&self, event: OrchestrationEvent) {
        // A dropped receiver means the session owner went away; events are
        // meaningless at that point.
        if self.tx.send(event).is_err() {
            log::debug!("event receiver dropped; discarding event");
        }
    }
}

/// One channel exists per orchestration session. The worker is the only
/// writer, the interactive consumer the only reader; FIFO order is kept.
pub struct EventChannel {
    tx: mpsc::Sender<OrchestrationEvent>,
    rx: mpsc::Receiver<OrchestrationEvent>,
}

impl EventChannel {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel();
        Self { tx, rx }
    }

    pub fn sender(&self) -> EventSender {
        EventSender {
            tx: self.tx.clone(),
        }
    }

    /// Returns every event currently queued, without blocking.
    pub fn drain(&self) -> Vec<OrchestrationEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.rx.try_recv() {
            events.push(event);
        }
        events
    }
}

impl Default for EventChannel {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-variant dispatch implemented by the consumer.
pub trait EventHandler {
    fn on_progress(&mut self, text: &str);
    fn on_realtime_progress(&mut self, sample: &ProgressSample);
    fn on_debug(&mut self, text: &str);
    fn on_complete(&mut self, output: &Path);
    fn on_failed(&mut self, failure: &FailureDetail);
}

/// Drains the channel on each tick and dispatches by event tag.
pub struct EventPump<H: EventHandler> {
    channel: EventChannel,
    handler: H,
}

impl<H: EventHandler> EventPump<H> {
    pub fn new(channel: EventChannel, handler: H) -> Self {
        Self { channel, handler }
    }

    /// Fully drains the channel, so bursts cannot starve later events.
    /// Returns `true` once a terminal event has been dispatched; the caller
    /// then tears down session-scoped resources and may submit again.
    pub fn tick(&mut self) -> bool {
        let mut terminal = false;
        for event in self.channel.drain() {
            terminal |= event.is_terminal();
            match &event {
                OrchestrationEvent::Progress(text) => self.handler.on_progress(text),
                OrchestrationEvent::RealtimeProgress(sample) => {
                    self.handler.on_realtime_progress(sample)
                }
                OrchestrationEvent::Debug(text) => self.handler.on_debug(text),
                OrchestrationEvent::Complete(path) => self.handler.on_complete(path),
                OrchestrationEvent::Failed(failure) => self.handler.on_failed(failure),
            }
        }
        terminal
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub fn into_handler(self) -> H {
        self.handler
    }
}

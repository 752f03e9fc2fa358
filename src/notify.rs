//! Notification sinks. Delivery is fire-and-forget from the engine's side:
//! events are handed over once the transaction that produced them committed.

use log::{info, warn};
use std::cell::RefCell;

use crate::domain::EngineEvent;

pub trait NotificationSink {
    fn publish(&self, event: &EngineEvent);
}

/// Writes each event to the log as a JSON line.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl NotificationSink for LogSink {
    fn publish(&self, event: &EngineEvent) {
        match serde_json::to_string(event) {
            Ok(payload) => info!("notify {} -> user {}: {}", event.kind(), event.recipient(), payload),
            Err(e) => warn!("notify {}: failed to encode event: {}", event.kind(), e),
        }
    }
}

/// Keeps published events in memory, e.g. for an outbox flushed by the caller.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: RefCell<Vec<EngineEvent>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn take(&self) -> Vec<EngineEvent> {
        self.events.take()
    }

    pub fn len(&self) -> usize {
        self.events.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.borrow().is_empty()
    }
}

impl NotificationSink for MemorySink {
    fn publish(&self, event: &EngineEvent) {
        self.events.borrow_mut().push(event.clone());
    }
}

impl<T: NotificationSink + ?Sized> NotificationSink for &T {
    fn publish(&self, event: &EngineEvent) {
        (**self).publish(event)
    }
}

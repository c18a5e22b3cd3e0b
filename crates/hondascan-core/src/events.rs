//! Scanner events
//!
//! Consumers (gauges, terminal, DTC view) subscribe to an [`EventBus`] and
//! receive every state mutation as an explicit event, in emission order.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tokio::sync::mpsc;

use crate::datalog::LogEntry;
use crate::dtc::DtcRecord;
use crate::state::{PhysicalState, StatusSnapshot};

/// Severity of a user-visible notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

/// Toast-style message for the operator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub severity: Severity,
    pub title: String,
    pub description: String,
}

impl Notification {
    pub fn info(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self::with(Severity::Info, title, description)
    }

    pub fn warning(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self::with(Severity::Warning, title, description)
    }

    pub fn error(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self::with(Severity::Error, title, description)
    }

    fn with(severity: Severity, title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            severity,
            title: title.into(),
            description: description.into(),
        }
    }
}

/// Everything the core reports to its observers
#[derive(Debug, Clone, PartialEq)]
pub enum ScannerEvent {
    /// Physical values changed
    State(PhysicalState),
    /// The DTC list changed
    Dtcs(Vec<DtcRecord>),
    /// Connection status changed
    Status(StatusSnapshot),
    /// A line was added to the communication log
    Log(LogEntry),
    /// Something the operator should see
    Notify(Notification),
}

/// Handle returned by [`EventBus::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Fan-out of scanner events to any number of subscribers
#[derive(Debug, Default)]
pub struct EventBus {
    next_id: AtomicU64,
    subscribers: Mutex<HashMap<u64, mpsc::UnboundedSender<ScannerEvent>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber; events arrive on the returned receiver
    pub fn subscribe(&self) -> (SubscriptionId, mpsc::UnboundedReceiver<ScannerEvent>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        if let Ok(mut subs) = self.subscribers.lock() {
            subs.insert(id, tx);
        }
        (SubscriptionId(id), rx)
    }

    /// Remove a subscriber; returns false if it was already gone
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.subscribers
            .lock()
            .map(|mut subs| subs.remove(&id.0).is_some())
            .unwrap_or(false)
    }

    /// Number of live subscribers
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().map(|s| s.len()).unwrap_or(0)
    }

    /// Deliver an event to every subscriber, dropping closed ones
    pub fn emit(&self, event: ScannerEvent) {
        if let Ok(mut subs) = self.subscribers.lock() {
            subs.retain(|_, tx| tx.send(event.clone()).is_ok());
        }
    }
}

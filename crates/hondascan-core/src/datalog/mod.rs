//! Communication Log
//!
//! Bounded record of the raw command/response traffic shown in the terminal
//! view. It is for operator visibility only; decoding never reads from it.

mod recorder;

pub use recorder::{CommLog, DEFAULT_LOG_CAPACITY};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which way a log line travelled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Sent to the adapter
    Tx,
    /// Received from the adapter
    Rx,
}

/// A single log entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub direction: Direction,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

impl LogEntry {
    /// Create a new log entry stamped with the current time
    pub fn new(direction: Direction, text: impl Into<String>) -> Self {
        Self {
            direction,
            text: text.into(),
            timestamp: Utc::now(),
        }
    }
}

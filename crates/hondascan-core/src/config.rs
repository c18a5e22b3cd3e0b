//! Scanner configuration
//!
//! Timing and adapter settings, stored as pretty JSON.

use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::Path;
use std::time::Duration;

use crate::datalog::DEFAULT_LOG_CAPACITY;
use crate::protocol::{DEFAULT_BAUD_RATE, DEFAULT_TIMEOUT_MS};

/// Shortest settle time the adapter tolerates after `AT Z`
pub const MIN_RESET_SETTLE_MS: u64 = 500;

/// Shortest settle time after selecting the protocol
pub const MIN_PROTOCOL_SETTLE_MS: u64 = 1000;

/// Tunables for the connection sequence, polling and simulation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScannerConfig {
    /// Delay after the adapter reset
    pub reset_settle_ms: u64,
    /// Delay after protocol selection
    pub protocol_settle_ms: u64,
    /// Time between polling cycles
    pub poll_interval_ms: u64,
    /// Gap between commands inside a polling cycle
    pub poll_command_gap_ms: u64,
    /// Simulated adapter round trip
    pub simulated_latency_ms: u64,
    /// Timeout for awaited requests on a live adapter
    pub command_timeout_ms: u64,
    /// Entries kept in the communication log
    pub log_capacity: usize,
    /// Argument to `AT SP` (5 = ISO 14230-4 KWP fast init)
    pub adapter_protocol: String,
    /// Header bytes for the Honda vendor request (`AT SH ...`)
    pub honda_header: String,
    /// Baud rate for serial transports
    pub baud_rate: u32,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            reset_settle_ms: 1000,
            protocol_settle_ms: MIN_PROTOCOL_SETTLE_MS,
            poll_interval_ms: 1000,
            poll_command_gap_ms: 100,
            simulated_latency_ms: 100,
            command_timeout_ms: DEFAULT_TIMEOUT_MS,
            log_capacity: DEFAULT_LOG_CAPACITY,
            adapter_protocol: "5".to_string(),
            honda_header: "81 10 F1".to_string(),
            baud_rate: DEFAULT_BAUD_RATE,
        }
    }
}

impl ScannerConfig {
    /// Load from a JSON file; a missing file yields defaults
    pub fn load(path: &Path) -> io::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)?;
        serde_json::from_str(&content).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }

    /// Save as pretty JSON
    pub fn save(&self, path: &Path) -> io::Result<()> {
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        fs::write(path, content)
    }

    pub fn reset_settle(&self) -> Duration {
        Duration::from_millis(self.reset_settle_ms.max(MIN_RESET_SETTLE_MS))
    }

    pub fn protocol_settle(&self) -> Duration {
        Duration::from_millis(self.protocol_settle_ms.max(MIN_PROTOCOL_SETTLE_MS))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn poll_command_gap(&self) -> Duration {
        Duration::from_millis(self.poll_command_gap_ms)
    }

    pub fn simulated_latency(&self) -> Duration {
        Duration::from_millis(self.simulated_latency_ms)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }
}

//! Ring buffer for communication log entries

use std::collections::VecDeque;

use super::{Direction, LogEntry};

/// Number of entries kept by default
pub const DEFAULT_LOG_CAPACITY: usize = 50;

/// Append-only log that evicts the oldest entry once full
#[derive(Debug, Clone)]
pub struct CommLog {
    buffer: VecDeque<LogEntry>,
    capacity: usize,
}

impl CommLog {
    /// Create a log holding at most `capacity` entries (minimum 1)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            buffer: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Record a transmitted command
    pub fn tx(&mut self, text: impl Into<String>) {
        self.push(LogEntry::new(Direction::Tx, text));
    }

    /// Record a received response
    pub fn rx(&mut self, text: impl Into<String>) {
        self.push(LogEntry::new(Direction::Rx, text));
    }

    /// Append an entry, evicting the oldest when full
    pub fn push(&mut self, entry: LogEntry) {
        if self.buffer.len() >= self.capacity {
            self.buffer.pop_front();
        }
        self.buffer.push_back(entry);
    }

    /// Get the number of entries
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Entries from oldest to newest
    pub fn entries(&self) -> impl Iterator<Item = &LogEntry> {
        self.buffer.iter()
    }

    /// Owned copy of the entries, oldest first
    pub fn snapshot(&self) -> Vec<LogEntry> {
        self.buffer.iter().cloned().collect()
    }

    /// Clear all entries
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

impl Default for CommLog {
    fn default() -> Self {
        Self::new(DEFAULT_LOG_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_basic() {
        let mut log = CommLog::default();
        assert!(log.is_empty());

        log.tx("01 0C");
        log.rx("41 0C 1A F8");
        assert_eq!(log.len(), 2);

        let dirs: Vec<_> = log.entries().map(|e| e.direction).collect();
        assert_eq!(dirs, vec![Direction::Tx, Direction::Rx]);
    }

    #[test]
    fn test_log_evicts_oldest() {
        let mut log = CommLog::default();
        for i in 0..=DEFAULT_LOG_CAPACITY {
            log.tx(format!("cmd {i}"));
        }
        assert_eq!(log.len(), DEFAULT_LOG_CAPACITY);
        assert_eq!(log.entries().next().unwrap().text, "cmd 1");
        assert_eq!(
            log.entries().last().unwrap().text,
            format!("cmd {DEFAULT_LOG_CAPACITY}")
        );
    }

    #[test]
    fn test_zero_capacity_clamped() {
        let mut log = CommLog::new(0);
        log.rx("OK");
        log.rx("OK");
        assert_eq!(log.len(), 1);
    }
}

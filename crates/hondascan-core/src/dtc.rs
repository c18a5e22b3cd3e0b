//! Diagnostic trouble codes

use serde::{Deserialize, Serialize};

/// Description used for codes missing from the built-in table
pub const UNKNOWN_DESCRIPTION: &str = "Unknown fault code";

/// Well-known powertrain codes reported by small Honda ECUs
const KNOWN_CODES: &[(&str, &str)] = &[
    ("P0113", "Intake air temperature sensor circuit high input"),
    ("P0117", "Engine coolant temperature sensor circuit low input"),
    ("P0118", "Engine coolant temperature sensor circuit high input"),
    ("P0122", "Throttle position sensor circuit low input"),
    ("P0123", "Throttle position sensor circuit high input"),
    ("P0130", "O2 sensor circuit malfunction"),
    ("P0300", "Random/multiple cylinder misfire detected"),
    ("P0335", "Crankshaft position sensor circuit malfunction"),
    ("P0505", "Idle air control system malfunction"),
    ("P0562", "System voltage low"),
    ("P0563", "System voltage high"),
];

/// Code inserted when a simulated ECU reports faults without details
pub const PLACEHOLDER_CODE: &str = "P0300";

/// A fault record reported by the ECU
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DtcRecord {
    pub code: String,
    pub description: String,
}

impl DtcRecord {
    /// Build a record, resolving the description from the built-in table
    pub fn new(code: impl Into<String>) -> Self {
        let code = code.into();
        let description = describe(&code).to_string();
        Self { code, description }
    }

    /// Build a record from the two raw bytes of a mode 03 reply
    ///
    /// The system letter is always `P`; the four hex digits are the bytes as
    /// written.
    pub fn from_bytes(hi: u8, lo: u8) -> Self {
        Self::new(format!("P{:02X}{:02X}", hi, lo))
    }

    /// Check the code has the `[PBCU]XXXX` shape
    pub fn is_well_formed(&self) -> bool {
        let mut chars = self.code.chars();
        matches!(chars.next(), Some('P' | 'B' | 'C' | 'U'))
            && self.code.len() == 5
            && chars.all(|c| c.is_ascii_hexdigit())
    }
}

/// Look up a code description
pub fn describe(code: &str) -> &'static str {
    KNOWN_CODES
        .iter()
        .find(|(known, _)| *known == code)
        .map(|(_, desc)| *desc)
        .unwrap_or(UNKNOWN_DESCRIPTION)
}

/// Change to the DTC set requested by a decoded line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DtcMutation {
    /// Remove every record
    Clear,
    /// Append records as reported (no deduplication)
    Append(Vec<DtcRecord>),
}

/// Accumulated fault records for the current session
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DtcSet {
    records: Vec<DtcRecord>,
}

impl DtcSet {
    /// Create an empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a mutation, returning whether the set changed
    pub fn apply(&mut self, mutation: &DtcMutation) -> bool {
        match mutation {
            DtcMutation::Clear => {
                let changed = !self.records.is_empty();
                self.records.clear();
                changed
            }
            DtcMutation::Append(records) => {
                self.records.extend(records.iter().cloned());
                !records.is_empty()
            }
        }
    }

    pub fn records(&self) -> &[DtcRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }
}

//! Live vehicle state
//!
//! Last-known decoded engine values plus the connection status types that the
//! dashboard renders.

use serde::{Deserialize, Serialize};

/// Model label used until vehicle identification succeeds
pub const UNKNOWN_MODEL: &str = "Unknown";

/// Battery voltage shown before the first reading arrives
pub const DEFAULT_VOLTAGE: f64 = 12.4;

/// Snapshot of the last successfully decoded value for every PID
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhysicalState {
    /// Engine speed in revolutions per minute
    pub rpm: f64,
    /// Vehicle speed in km/h
    pub speed: u16,
    /// Engine oil/coolant temperature in °C
    pub oil_temp: i16,
    /// Battery voltage in volts
    pub voltage: f64,
    /// Throttle position in percent (0-100)
    pub tps: u8,
    /// Manifold absolute pressure in kPa
    pub map: u16,
    /// Oxygen sensor voltage in volts
    pub o2: f64,
    /// Intake air temperature in °C
    pub iat: i16,
}

impl Default for PhysicalState {
    fn default() -> Self {
        Self {
            rpm: 0.0,
            speed: 0,
            oil_temp: 0,
            voltage: DEFAULT_VOLTAGE,
            tps: 0,
            map: 0,
            o2: 0.0,
            iat: 0,
        }
    }
}

/// Partial update produced by the decoder
///
/// `None` fields leave the corresponding value untouched.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StatePatch {
    pub rpm: Option<f64>,
    pub speed: Option<u16>,
    pub oil_temp: Option<i16>,
    pub voltage: Option<f64>,
    pub tps: Option<u8>,
    pub map: Option<u16>,
    pub o2: Option<f64>,
    pub iat: Option<i16>,
}

impl StatePatch {
    /// True when the patch carries no values
    pub fn is_empty(&self) -> bool {
        *self == StatePatch::default()
    }

    /// Apply the patch, returning whether anything was written
    pub fn apply(&self, state: &mut PhysicalState) -> bool {
        if self.is_empty() {
            return false;
        }
        if let Some(v) = self.rpm {
            state.rpm = v;
        }
        if let Some(v) = self.speed {
            state.speed = v;
        }
        if let Some(v) = self.oil_temp {
            state.oil_temp = v;
        }
        if let Some(v) = self.voltage {
            state.voltage = v;
        }
        if let Some(v) = self.tps {
            state.tps = v;
        }
        if let Some(v) = self.map {
            state.map = v;
        }
        if let Some(v) = self.o2 {
            state.o2 = v;
        }
        if let Some(v) = self.iat {
            state.iat = v;
        }
        true
    }
}

/// Phase of the connection state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinkPhase {
    /// No adapter attached
    Disconnected,
    /// Transport being acquired
    AdapterConnecting,
    /// Adapter configured, ECU not (yet) confirmed
    AdapterConnected,
    /// Identification requests in flight
    EcuProbing,
    /// Adapter configured and ECU answering
    AdapterAndEcuConnected,
}

impl LinkPhase {
    /// Collapse the phase into the status the UI shows
    pub fn status(self) -> ConnectionStatus {
        match self {
            LinkPhase::Disconnected | LinkPhase::AdapterConnecting => {
                ConnectionStatus::Disconnected
            }
            LinkPhase::AdapterConnected | LinkPhase::EcuProbing => {
                ConnectionStatus::AdapterConnected
            }
            LinkPhase::AdapterAndEcuConnected => ConnectionStatus::AdapterAndEcuConnected,
        }
    }
}

/// Connection status as seen by consumers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionStatus {
    Disconnected,
    AdapterConnected,
    AdapterAndEcuConnected,
}

impl ConnectionStatus {
    /// "Adapter connected" flag
    pub fn adapter_connected(self) -> bool {
        !matches!(self, ConnectionStatus::Disconnected)
    }

    /// "ECU responding" flag
    pub fn ecu_connected(self) -> bool {
        matches!(self, ConnectionStatus::AdapterAndEcuConnected)
    }
}

/// How the ECU was reached
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EcuProtocol {
    /// Standard OBD-II mode 01 requests answered
    Standard,
    /// Honda K-Line dynamic table answered after the vendor header
    HondaKLine,
    /// No adapter, values are generated
    Simulated,
}

impl EcuProtocol {
    /// Human-readable protocol label stored with scan sessions
    pub fn label(self) -> &'static str {
        match self {
            EcuProtocol::Standard => "ISO 14230-4 KWP",
            EcuProtocol::HondaKLine => "ISO 14230-4 KWP (Honda)",
            EcuProtocol::Simulated => "Simulated",
        }
    }
}

/// Point-in-time view of the connection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub phase: LinkPhase,
    pub status: ConnectionStatus,
    /// Identified vehicle model
    pub model: String,
    /// Name of the attached device
    pub device_name: Option<String>,
    /// Protocol used to reach the ECU, once known
    pub protocol: Option<EcuProtocol>,
    /// Whether values are simulated
    pub simulated: bool,
}

impl Default for StatusSnapshot {
    fn default() -> Self {
        Self {
            phase: LinkPhase::Disconnected,
            status: ConnectionStatus::Disconnected,
            model: UNKNOWN_MODEL.to_string(),
            device_name: None,
            protocol: None,
            simulated: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_state() {
        let state = PhysicalState::default();
        assert_eq!(state.rpm, 0.0);
        assert_eq!(state.voltage, DEFAULT_VOLTAGE);
        assert_eq!(state.tps, 0);
    }

    #[test]
    fn test_empty_patch_is_noop() {
        let mut state = PhysicalState {
            rpm: 3500.0,
            speed: 40,
            ..Default::default()
        };
        let before = state;
        assert!(!StatePatch::default().apply(&mut state));
        assert_eq!(state, before);
    }

    #[test]
    fn test_patch_only_touches_present_fields() {
        let mut state = PhysicalState {
            speed: 40,
            ..Default::default()
        };
        let patch = StatePatch {
            rpm: Some(1726.0),
            ..Default::default()
        };
        assert!(patch.apply(&mut state));
        assert_eq!(state.rpm, 1726.0);
        assert_eq!(state.speed, 40);
    }

    #[test]
    fn test_summary_field_names() {
        let json = serde_json::to_value(PhysicalState::default()).unwrap();
        assert!(json.get("oilTemp").is_some());
        assert!(json.get("o2").is_some());
    }

    #[test]
    fn test_phase_to_status() {
        assert_eq!(
            LinkPhase::AdapterConnecting.status(),
            ConnectionStatus::Disconnected
        );
        assert_eq!(
            LinkPhase::EcuProbing.status(),
            ConnectionStatus::AdapterConnected
        );
        assert!(LinkPhase::AdapterAndEcuConnected.status().ecu_connected());
        assert!(LinkPhase::AdapterConnected.status().adapter_connected());
    }
}

//! Adapter commands
//!
//! AT configuration commands and OBD requests understood by ELM327-class
//! adapters, rendered in the spaced form the adapter echoes back.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Carriage return terminating every command
pub const COMMAND_TERMINATOR: u8 = b'\r';

/// Mode 01 parameters polled by the dashboard
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Pid {
    /// 0x05
    EngineTemp,
    /// 0x0B
    ManifoldPressure,
    /// 0x0C
    EngineRpm,
    /// 0x0D
    VehicleSpeed,
    /// 0x0F
    IntakeAirTemp,
    /// 0x11
    ThrottlePosition,
    /// 0x14
    OxygenSensor,
    /// 0x01
    MonitorStatus,
    /// 0x00
    SupportedPids,
}

impl Pid {
    pub fn code(self) -> u8 {
        match self {
            Pid::SupportedPids => 0x00,
            Pid::MonitorStatus => 0x01,
            Pid::EngineTemp => 0x05,
            Pid::ManifoldPressure => 0x0B,
            Pid::EngineRpm => 0x0C,
            Pid::VehicleSpeed => 0x0D,
            Pid::IntakeAirTemp => 0x0F,
            Pid::ThrottlePosition => 0x11,
            Pid::OxygenSensor => 0x14,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            0x00 => Pid::SupportedPids,
            0x01 => Pid::MonitorStatus,
            0x05 => Pid::EngineTemp,
            0x0B => Pid::ManifoldPressure,
            0x0C => Pid::EngineRpm,
            0x0D => Pid::VehicleSpeed,
            0x0F => Pid::IntakeAirTemp,
            0x11 => Pid::ThrottlePosition,
            0x14 => Pid::OxygenSensor,
            _ => return None,
        })
    }
}

/// Commands sent to the adapter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Command {
    /// `AT Z`
    Reset,
    /// `AT E0`
    EchoOff,
    /// `AT L0`
    LinefeedsOff,
    /// `AT S0`
    SpacesOff,
    /// `AT SP n`
    SelectProtocol(String),
    /// `AT AT 1`
    AdaptiveTiming,
    /// `AT SH xx yy zz`
    SetHeader(String),
    /// `AT RV`
    ReadVoltage,
    /// `01 xx`
    ReadPid(Pid),
    /// `03`
    ReadDtcs,
    /// `04`
    ClearDtcs,
    /// `09 02`
    ReadVin,
    /// `21 01`, Honda dynamic table
    HondaTable,
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Reset => write!(f, "AT Z"),
            Command::EchoOff => write!(f, "AT E0"),
            Command::LinefeedsOff => write!(f, "AT L0"),
            Command::SpacesOff => write!(f, "AT S0"),
            Command::SelectProtocol(p) => write!(f, "AT SP {}", p),
            Command::AdaptiveTiming => write!(f, "AT AT 1"),
            Command::SetHeader(h) => write!(f, "AT SH {}", h),
            Command::ReadVoltage => write!(f, "AT RV"),
            Command::ReadPid(pid) => write!(f, "01 {:02X}", pid.code()),
            Command::ReadDtcs => write!(f, "03"),
            Command::ClearDtcs => write!(f, "04"),
            Command::ReadVin => write!(f, "09 02"),
            Command::HondaTable => write!(f, "21 01"),
        }
    }
}

/// Append the terminator to a command string
pub fn encode(command: &str) -> Vec<u8> {
    let mut bytes = command.as_bytes().to_vec();
    bytes.push(COMMAND_TERMINATOR);
    bytes
}

/// Read commands issued every polling cycle, in order
pub const POLL_CYCLE: [Command; 8] = [
    Command::ReadPid(Pid::EngineRpm),
    Command::ReadPid(Pid::VehicleSpeed),
    Command::ReadPid(Pid::ThrottlePosition),
    Command::ReadPid(Pid::ManifoldPressure),
    Command::ReadPid(Pid::OxygenSensor),
    Command::ReadPid(Pid::IntakeAirTemp),
    Command::ReadPid(Pid::EngineTemp),
    Command::ReadVoltage,
];

/// Whether a reply carries ECU data rather than an adapter refusal
pub fn is_data_reply(reply: &str) -> bool {
    let upper = reply.trim().to_ascii_uppercase();
    if upper.is_empty() {
        return false;
    }
    let compact: String = upper.chars().filter(|c| !c.is_whitespace()).collect();
    !(compact.contains("NODATA")
        || upper.contains("ERROR")
        || upper.contains("UNABLE TO CONNECT")
        || upper.contains('?'))
}

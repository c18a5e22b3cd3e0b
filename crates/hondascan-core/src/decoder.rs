//! PID response decoding
//!
//! Turns one framed adapter line into a [`StatePatch`] and/or a DTC change.
//! Decoding is best-effort: anything that does not match a known response
//! family produces an empty [`Decoded`] and is otherwise ignored.
//!
//! Lines are normalised by removing all whitespace and upper-casing, so
//! `"41 0C 1A F8"` and `"410c1af8"` decode identically. The response family
//! is selected by the first marker found on a byte boundary, so lines carrying
//! a header (`AT H1`) decode like bare ones. An odd-length line starts with a
//! three-digit CAN identifier and is scanned from the second character.
//!
//! | Marker  | Meaning                         | Rule                          |
//! |---------|---------------------------------|-------------------------------|
//! | `41 0C` | engine speed                    | `u16(A,B) / 4`                |
//! | `41 0D` | vehicle speed                   | `A` km/h                      |
//! | `41 11` | throttle position               | `round(A * 100 / 255)` %      |
//! | `41 0B` | manifold pressure               | `A` kPa                       |
//! | `41 14` | O2 sensor                       | `A * 0.005` V, 3 decimals     |
//! | `41 05` | engine temperature              | `A - 40` °C                   |
//! | `41 0F` | intake air temperature          | `A - 40` °C                   |
//! | `41 01` | monitor status / DTC count      | `A & 0x7F`                    |
//! | `43`    | stored DTCs                     | byte pairs, `P` prefix        |
//! | `44`    | clear acknowledgment            | empties the DTC set           |
//! | `49 02` | VIN frame                       | see [`assemble_vin`]          |
//! | `72`    | Honda dynamic table (> 20 hex)  | fixed offsets                 |
//! | `nn.nV` | `AT RV` battery voltage         | volts                         |

use crate::dtc::{DtcMutation, DtcRecord, DtcSet, PLACEHOLDER_CODE};
use crate::protocol::commands::Pid;
use crate::state::StatePatch;

/// Minimum compact length of a Honda dynamic table reply
const HONDA_TABLE_MIN_LEN: usize = 20;

/// Response families, by marker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Family {
    Mode01,
    StoredDtcs,
    ClearAck,
    Vin,
    HondaTable,
}

const MARKERS: &[(&str, Family)] = &[
    ("41", Family::Mode01),
    ("43", Family::StoredDtcs),
    ("44", Family::ClearAck),
    ("4902", Family::Vin),
    ("72", Family::HondaTable),
];

/// Result of decoding one line
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Decoded {
    /// Values to write into the physical state
    pub patch: StatePatch,
    /// Change to the DTC set
    pub dtc: Option<DtcMutation>,
    /// The ECU acknowledged a clear-codes request
    pub codes_cleared: bool,
}

impl Decoded {
    /// True when the line was not recognised
    pub fn is_empty(&self) -> bool {
        self.patch.is_empty() && self.dtc.is_none() && !self.codes_cleared
    }
}

/// Decoder for adapter response lines
#[derive(Debug, Clone, Copy, Default)]
pub struct PidDecoder {
    simulated: bool,
}

impl PidDecoder {
    /// Decoder for a real adapter
    pub fn new() -> Self {
        Self { simulated: false }
    }

    /// Decoder for generated replies
    ///
    /// Only this variant fills in a placeholder code when the ECU reports a
    /// non-zero fault count but no codes have been read yet.
    pub fn simulated() -> Self {
        Self { simulated: true }
    }

    /// Decode one line against the current DTC set
    pub fn decode(&self, line: &str, dtcs: &DtcSet) -> Decoded {
        let compact = normalize(line);
        let mut out = Decoded::default();
        if compact.is_empty() {
            return out;
        }

        if let Some(volts) = parse_voltage(&compact) {
            out.patch.voltage = Some(volts);
            return out;
        }

        let Some((family, body)) = locate(&compact) else {
            return out;
        };
        match family {
            Family::Mode01 => self.decode_mode01(&body[2..], dtcs, &mut out),
            Family::StoredDtcs => {
                let records = parse_dtc_pairs(&body[2..]);
                if !records.is_empty() {
                    out.dtc = Some(DtcMutation::Append(records));
                }
            }
            Family::ClearAck => {
                out.dtc = Some(DtcMutation::Clear);
                out.codes_cleared = true;
            }
            // Frames are joined per reply, see assemble_vin
            Family::Vin => {}
            Family::HondaTable => {
                if body.len() > HONDA_TABLE_MIN_LEN {
                    out.patch = decode_honda_table(body);
                }
            }
        }

        out
    }

    fn decode_mode01(&self, data: &str, dtcs: &DtcSet, out: &mut Decoded) {
        let Some(pid) = byte_at(data, 0).and_then(Pid::from_code) else {
            return;
        };
        let a = byte_at(data, 1);
        let patch = &mut out.patch;

        match pid {
            Pid::EngineRpm => {
                if let (Some(a), Some(b)) = (a, byte_at(data, 2)) {
                    patch.rpm = Some(u16::from_be_bytes([a, b]) as f64 / 4.0);
                }
            }
            Pid::VehicleSpeed => patch.speed = a.map(u16::from),
            Pid::ThrottlePosition => patch.tps = a.map(throttle_percent),
            Pid::ManifoldPressure => patch.map = a.map(u16::from),
            Pid::OxygenSensor => patch.o2 = a.map(|a| round3(a as f64 * 0.005)),
            Pid::EngineTemp => patch.oil_temp = a.map(temperature),
            Pid::IntakeAirTemp => patch.iat = a.map(temperature),
            Pid::MonitorStatus => {
                if let Some(a) = a {
                    let count = a & 0x7F;
                    if count == 0 {
                        out.dtc = Some(DtcMutation::Clear);
                    } else if dtcs.is_empty() && self.simulated {
                        out.dtc = Some(DtcMutation::Append(vec![DtcRecord::new(
                            PLACEHOLDER_CODE,
                        )]));
                    }
                }
            }
            _ => {}
        }
    }
}

/// Strip whitespace and upper-case
pub fn normalize(line: &str) -> String {
    line.chars()
        .filter(|c| !c.is_whitespace())
        .map(|c| c.to_ascii_uppercase())
        .collect()
}

/// First response marker on a byte boundary, with the line from there on
fn locate(compact: &str) -> Option<(Family, &str)> {
    let start = compact.len() % 2;
    (start..compact.len()).step_by(2).find_map(|i| {
        let body = compact.get(i..)?;
        MARKERS
            .iter()
            .find(|(marker, _)| body.starts_with(marker))
            .map(|(_, family)| (*family, body))
    })
}

/// Join the `49 02` frames of a `09 02` reply into one VIN
///
/// K-line ECUs answer with one frame per line (`49 02 01 00 00 00 39`,
/// `49 02 02 43 32 4B 43`, ...), each led by its sequence byte. CAN
/// adapters print indexed continuation lines (`1: 4B 43 ...`) after the
/// first frame. Padding and other non-alphanumeric bytes are dropped.
pub fn assemble_vin(reply: &str) -> Option<String> {
    let mut vin = String::new();
    for line in reply.lines() {
        let compact = normalize(line);
        let (indexed, data) = match compact.split_once(':') {
            Some((index, rest)) if !index.is_empty() && index.len() <= 2 => (true, rest),
            _ => (false, compact.as_str()),
        };
        let payload = match locate(data) {
            // Marker, then the sequence byte
            Some((Family::Vin, body)) => body.get(6..),
            _ if indexed => Some(data),
            _ => None,
        };
        if let Some(payload) = payload {
            vin.extend(ascii_alphanumeric(payload));
        }
    }
    (!vin.is_empty()).then_some(vin)
}

/// Byte `index` of a compact hex string
fn byte_at(hex: &str, index: usize) -> Option<u8> {
    let pair = hex.get(index * 2..index * 2 + 2)?;
    u8::from_str_radix(pair, 16).ok()
}

fn throttle_percent(raw: u8) -> u8 {
    (raw as f64 * 100.0 / 255.0).round() as u8
}

fn temperature(raw: u8) -> i16 {
    raw as i16 - 40
}

fn round3(v: f64) -> f64 {
    (v * 1000.0).round() / 1000.0
}

/// `AT RV` replies look like `13.8V`
fn parse_voltage(compact: &str) -> Option<f64> {
    let number = compact.strip_suffix('V')?;
    if number.is_empty() || !number.chars().all(|c| c.is_ascii_digit() || c == '.') {
        return None;
    }
    number.parse::<f64>().ok().filter(|v| v.is_finite())
}

fn parse_dtc_pairs(data: &str) -> Vec<DtcRecord> {
    let mut records = Vec::new();
    let mut i = 0;
    while let (Some(hi), Some(lo)) = (byte_at(data, i), byte_at(data, i + 1)) {
        // 00 00 pads the frame when fewer than three codes are stored
        if hi != 0 || lo != 0 {
            records.push(DtcRecord::from_bytes(hi, lo));
        }
        i += 2;
    }
    records
}

fn ascii_alphanumeric(hex: &str) -> impl Iterator<Item = char> + '_ {
    (0..hex.len() / 2)
        .filter_map(move |i| byte_at(hex, i))
        .map(char::from)
        .filter(char::is_ascii_alphanumeric)
}

/// Fixed-offset extraction from the Honda dynamic table (byte 0 is `0x72`)
fn decode_honda_table(compact: &str) -> StatePatch {
    StatePatch {
        oil_temp: byte_at(compact, 4).map(temperature),
        rpm: byte_at(compact, 5)
            .zip(byte_at(compact, 6))
            .map(|(a, b)| u16::from_be_bytes([a, b]) as f64 / 4.0),
        voltage: byte_at(compact, 9).map(|v| v as f64 / 10.0),
        tps: byte_at(compact, 12).map(throttle_percent),
        ..Default::default()
    }
}

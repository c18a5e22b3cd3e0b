//! Demo Mode - simulated adapter and engine for use without Bluetooth
//!
//! Two halves: [`DemoSimulator`] walks the physical values around each polling
//! interval, and [`simulated_reply`] answers adapter commands from the current
//! state so the command engine behaves the same with or without hardware.

use rand::rngs::StdRng;
use rand::Rng;
use rand::SeedableRng;

use crate::dtc::DtcSet;
use crate::state::PhysicalState;

/// Adapter identity reported by the simulated `AT Z`
pub const SIMULATED_ADAPTER: &str = "ELM327 v2.1";

/// Device name shown while simulating
pub const SIMULATED_DEVICE_NAME: &str = "ELM327 Simulator";

/// Bounds of the simulated random walk
pub const RPM_RANGE: (f64, f64) = (1200.0, 14000.0);
pub const SPEED_RANGE: (i32, i32) = (0, 299);
pub const OIL_TEMP_RANGE: (i32, i32) = (70, 130);

/// Engine simulator producing bounded random-walk sensor values
pub struct DemoSimulator {
    /// Random number generator
    rng: StdRng,
}

impl Default for DemoSimulator {
    fn default() -> Self {
        Self::new()
    }
}

impl DemoSimulator {
    /// Create a new demo simulator
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }

    /// Deterministic simulator for tests
    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Produce the next state from the previous one
    ///
    /// RPM, speed and oil temperature drift from their previous value and are
    /// clamped to their ranges; the other channels are drawn fresh.
    pub fn step(&mut self, prev: &PhysicalState) -> PhysicalState {
        let rng = &mut self.rng;

        let rpm = (prev.rpm + rng.gen_range(-200.0..300.0))
            .clamp(RPM_RANGE.0, RPM_RANGE.1)
            .floor();
        let speed = (prev.speed as f64 + rng.gen_range(-5.0..10.0))
            .clamp(SPEED_RANGE.0 as f64, SPEED_RANGE.1 as f64)
            .floor() as u16;
        let oil_temp = (prev.oil_temp as f64 + rng.gen_range(-1.0..1.0))
            .clamp(OIL_TEMP_RANGE.0 as f64, OIL_TEMP_RANGE.1 as f64)
            .floor() as i16;

        PhysicalState {
            rpm,
            speed,
            oil_temp,
            voltage: 13.8 + rng.gen_range(-0.2..0.2),
            tps: rng.gen_range(0..100),
            map: 30 + rng.gen_range(0..70),
            o2: 0.1 + rng.gen_range(0.0..0.8),
            iat: 25 + rng.gen_range(0..15),
        }
    }
}

/// Reply a simulated adapter gives to `command`
///
/// Values are re-encoded from `state` so decoding the reply reproduces them.
pub fn simulated_reply(command: &str, state: &PhysicalState, dtcs: &DtcSet) -> String {
    let cmd = command.trim().to_ascii_uppercase();
    match cmd.as_str() {
        "AT Z" | "ATZ" => SIMULATED_ADAPTER.to_string(),
        "AT RV" | "ATRV" => format!("{:.1}V", state.voltage),
        "01 0C" => format!("41 0C {:04X}", (state.rpm * 4.0).floor() as u16),
        "01 0D" => format!("41 0D {:02X}", state.speed.min(255)),
        "01 11" => format!("41 11 {:02X}", (state.tps as u32 * 255 / 100).min(255)),
        "01 0B" => format!("41 0B {:02X}", state.map.min(255)),
        "01 14" => format!("41 14 {:02X}", (state.o2 / 0.005).round().clamp(0.0, 255.0) as u8),
        "01 0F" => format!("41 0F {:02X}", (state.iat + 40).clamp(0, 255)),
        "01 05" => format!("41 05 {:02X}", (state.oil_temp + 40).clamp(0, 255)),
        "01 01" => {
            let count = dtcs.len().min(0x7F) as u8;
            let mil = if count > 0 { 0x80 } else { 0x00 };
            format!("41 01 {:02X} 00 00 00", count | mil)
        }
        "03" => {
            let mut reply = String::from("43");
            for dtc in dtcs.records().iter().filter(|d| d.is_well_formed()) {
                // "P0300" -> " 03 00"
                let digits = &dtc.code[1..];
                reply.push_str(&format!(" {} {}", &digits[..2], &digits[2..]));
            }
            reply
        }
        "04" => "44".to_string(),
        _ if cmd.starts_with("AT") => "OK".to_string(),
        _ => "NO DATA".to_string(),
    }
}

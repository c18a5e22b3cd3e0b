//! Scripted ELM327 emulator
//!
//! [`MockAdapter`] answers AT and OBD commands the way a real adapter would,
//! including echo until `AT E0`, the `>` prompt after every reply and
//! optionally splitting replies into small fragments. The ECU behind it can
//! answer standard requests, only the Honda vendor table, or nothing at all.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;

use super::commands::is_data_reply;
use super::transport::{DeviceFilter, Transport, TransportEvent, TransportLink, TransportProvider};
use super::ProtocolError;
use crate::demo::simulated_reply;
use crate::dtc::{DtcMutation, DtcRecord, DtcSet};
use crate::state::PhysicalState;

/// Reply to `01 00` from an ECU that speaks standard OBD-II
pub const SUPPORTED_PIDS_REPLY: &str = "41 00 BE 1F A8 13";

/// K-line header printed before ECU data once `AT H1` is set
pub const KLINE_HEADER: &str = "48 6B 10";

/// What sits behind the emulated adapter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EcuBehavior {
    /// Answers mode 01 requests
    Standard,
    /// Refuses mode 01, answers `21 01` once the vendor header is set
    HondaOnly,
    /// Ignition off
    Silent,
}

/// Emulator setup
#[derive(Debug, Clone)]
pub struct MockConfig {
    pub device_name: String,
    /// Identity printed on `AT Z`
    pub adapter_name: String,
    pub ecu: EcuBehavior,
    pub vin: Option<String>,
    /// Answer `09 02` with one four-byte frame per line
    pub vin_frames: bool,
    /// Values the ECU reports
    pub state: PhysicalState,
    /// Stored fault codes
    pub codes: Vec<String>,
    /// Split every reply into chunks of this many characters
    pub fragment_size: Option<usize>,
    pub fail_writes: bool,
    /// Accept writes but never answer
    pub unresponsive: bool,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            device_name: "OBDII Mock".to_string(),
            adapter_name: "ELM327 v1.5".to_string(),
            ecu: EcuBehavior::Standard,
            vin: None,
            vin_frames: false,
            state: PhysicalState::default(),
            codes: Vec::new(),
            fragment_size: None,
            fail_writes: false,
            unresponsive: false,
        }
    }
}

#[derive(Debug)]
struct MockInner {
    config: MockConfig,
    codes: DtcSet,
    written: Vec<String>,
    echo: bool,
    header_set: bool,
    headers: bool,
    closed: bool,
}

impl MockInner {
    fn reply_to(&mut self, command: &str) -> String {
        let cmd = command.trim().to_ascii_uppercase();
        let ecu = self.config.ecu;

        match cmd.as_str() {
            "AT Z" | "ATZ" => {
                self.echo = true;
                self.header_set = false;
                self.headers = false;
                return self.config.adapter_name.clone();
            }
            "AT E0" | "ATE0" => {
                self.echo = false;
                return "OK".to_string();
            }
            "AT H1" | "ATH1" | "AT H0" | "ATH0" => {
                self.headers = cmd.ends_with('1');
                return "OK".to_string();
            }
            _ if cmd.starts_with("AT SH") || cmd.starts_with("ATSH") => {
                self.header_set = true;
                return "OK".to_string();
            }
            "AT RV" | "ATRV" => return simulated_reply(&cmd, &self.config.state, &self.codes),
            _ if cmd.starts_with("AT") => return "OK".to_string(),
            _ => {}
        }

        if ecu == EcuBehavior::Silent {
            return "UNABLE TO CONNECT".to_string();
        }

        let reply = match cmd.as_str() {
            "01 00" if ecu == EcuBehavior::Standard => SUPPORTED_PIDS_REPLY.to_string(),
            "21 01" if ecu == EcuBehavior::HondaOnly && self.header_set => {
                honda_table(&self.config.state)
            }
            "09 02" => match &self.config.vin {
                Some(vin) if self.config.vin_frames => vin_frames(vin),
                Some(vin) => {
                    let mut reply = String::from("49 02 01");
                    for b in vin.bytes() {
                        reply.push_str(&format!(" {:02X}", b));
                    }
                    reply
                }
                None => "NO DATA".to_string(),
            },
            "04" => {
                self.codes.clear();
                "44".to_string()
            }
            _ if ecu == EcuBehavior::Standard => {
                simulated_reply(&cmd, &self.config.state, &self.codes)
            }
            _ => "NO DATA".to_string(),
        };

        if self.headers && is_data_reply(&reply) {
            reply
                .split('\r')
                .map(|line| format!("{KLINE_HEADER} {line}"))
                .collect::<Vec<_>>()
                .join("\r")
        } else {
            reply
        }
    }
}

/// VIN split into `49 02 nn` frames, zero-padded at the front
fn vin_frames(vin: &str) -> String {
    let mut bytes = vec![0u8; (4 - vin.len() % 4) % 4];
    bytes.extend(vin.bytes());
    bytes
        .chunks(4)
        .enumerate()
        .map(|(i, chunk)| {
            let mut frame = format!("49 02 {:02X}", i + 1);
            for b in chunk {
                frame.push_str(&format!(" {:02X}", b));
            }
            frame
        })
        .collect::<Vec<_>>()
        .join("\r")
}

/// Dynamic table reply carrying the values the decoder extracts
fn honda_table(state: &PhysicalState) -> String {
    let rpm = ((state.rpm * 4.0).floor() as u16).to_be_bytes();
    let bytes: [u8; 14] = [
        0x72,
        0x11,
        0x01,
        0x00,
        (state.oil_temp + 40).clamp(0, 255) as u8,
        rpm[0],
        rpm[1],
        0x00,
        0x00,
        (state.voltage * 10.0).round().clamp(0.0, 255.0) as u8,
        0x00,
        0x00,
        (state.tps as u32 * 255 / 100).min(255) as u8,
        0x00,
    ];
    bytes
        .iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

fn lock(inner: &Mutex<MockInner>) -> MutexGuard<'_, MockInner> {
    inner.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Emulated adapter
pub struct MockAdapter {
    name: String,
    inner: Arc<Mutex<MockInner>>,
    tx: mpsc::UnboundedSender<TransportEvent>,
}

impl MockAdapter {
    /// Build an opened link plus a handle for driving and inspecting it
    pub fn open(config: MockConfig) -> (TransportLink, MockHandle) {
        let (tx, events) = mpsc::unbounded_channel();
        let mut codes = DtcSet::new();
        codes.apply(&DtcMutation::Append(
            config.codes.iter().map(DtcRecord::new).collect(),
        ));
        let name = config.device_name.clone();
        let inner = Arc::new(Mutex::new(MockInner {
            config,
            codes,
            written: Vec::new(),
            echo: true,
            header_set: false,
            headers: false,
            closed: false,
        }));

        let handle = MockHandle {
            inner: inner.clone(),
            tx: tx.clone(),
        };
        let link = TransportLink {
            transport: Box::new(MockAdapter { name, inner, tx }),
            events,
        };
        (link, handle)
    }
}

#[async_trait]
impl Transport for MockAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn write(&mut self, bytes: &[u8]) -> Result<(), ProtocolError> {
        let mut inner = lock(&self.inner);
        if inner.closed {
            return Err(ProtocolError::NotConnected);
        }
        if inner.config.fail_writes {
            return Err(ProtocolError::WriteFailed("GATT write rejected".into()));
        }

        let text = String::from_utf8_lossy(bytes);
        for command in text.split('\r').map(str::trim).filter(|c| !c.is_empty()) {
            inner.written.push(command.to_string());
            if inner.config.unresponsive {
                continue;
            }

            let echo = inner.echo;
            let reply = inner.reply_to(command);
            let mut out = String::new();
            if echo {
                out.push_str(command);
                out.push('\r');
            }
            out.push_str(&reply);
            out.push_str("\r\r>");

            match inner.config.fragment_size {
                Some(size) if size > 0 => {
                    let chars: Vec<char> = out.chars().collect();
                    for chunk in chars.chunks(size) {
                        let _ = self.tx.send(TransportEvent::Data(chunk.iter().collect()));
                    }
                }
                _ => {
                    let _ = self.tx.send(TransportEvent::Data(out));
                }
            }
        }
        Ok(())
    }

    async fn close(&mut self) {
        lock(&self.inner).closed = true;
    }
}

/// Test-side view of a [`MockAdapter`]
#[derive(Clone)]
pub struct MockHandle {
    inner: Arc<Mutex<MockInner>>,
    tx: mpsc::UnboundedSender<TransportEvent>,
}

impl MockHandle {
    /// Every command written so far, without terminators
    pub fn written(&self) -> Vec<String> {
        lock(&self.inner).written.clone()
    }

    /// How many times `command` was written
    pub fn count(&self, command: &str) -> usize {
        lock(&self.inner)
            .written
            .iter()
            .filter(|c| c.as_str() == command)
            .count()
    }

    /// Change what the ECU reports from now on
    pub fn set_state(&self, state: PhysicalState) {
        lock(&self.inner).config.state = state;
    }

    pub fn set_fail_writes(&self, fail: bool) {
        lock(&self.inner).config.fail_writes = fail;
    }

    pub fn set_unresponsive(&self, unresponsive: bool) {
        lock(&self.inner).config.unresponsive = unresponsive;
    }

    /// Codes the ECU still has stored
    pub fn stored_codes(&self) -> Vec<String> {
        lock(&self.inner)
            .codes
            .records()
            .iter()
            .map(|r| r.code.clone())
            .collect()
    }

    /// Simulate the OS reporting the link gone
    pub fn drop_link(&self) {
        lock(&self.inner).closed = true;
        let _ = self.tx.send(TransportEvent::Disconnected);
    }

    /// Whether the transport was closed by either side
    pub fn is_closed(&self) -> bool {
        lock(&self.inner).closed
    }
}

/// Provider handing out scripted outcomes in order
///
/// Once the queue is empty, `open` reports `NoTransportAvailable`.
#[derive(Default)]
pub struct MockProvider {
    outcomes: Mutex<VecDeque<Result<TransportLink, ProtocolError>>>,
}

impl MockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an emulated adapter and return its handle
    pub fn push_adapter(&self, config: MockConfig) -> MockHandle {
        let (link, handle) = MockAdapter::open(config);
        self.outcomes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(Ok(link));
        handle
    }

    /// Queue a failed device selection
    pub fn push_error(&self, error: ProtocolError) {
        self.outcomes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(Err(error));
    }
}

#[async_trait]
impl TransportProvider for MockProvider {
    async fn open(&self, _filter: &DeviceFilter) -> Result<TransportLink, ProtocolError> {
        self.outcomes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .unwrap_or(Err(ProtocolError::NoTransportAvailable))
    }
}

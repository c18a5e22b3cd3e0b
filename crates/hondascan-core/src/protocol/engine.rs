//! Command/response engine
//!
//! One engine exists per connection. In live mode it owns the transport and
//! writes CR-terminated commands; replies come back through [`pump`], which
//! frames them, logs them and runs them through the decoder. In simulated
//! mode the engine answers commands itself after a short delay.
//!
//! Two ways to send:
//! - [`CommandEngine::send`]: fire-and-forget on a live adapter, the decoded
//!   effect lands whenever the reply arrives. Used by the poller.
//! - [`CommandEngine::request`]: holds the transport until the adapter prints
//!   its prompt and returns the reply lines, bounded by the command timeout.
//!   Used wherever the reply drives a decision.

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use super::commands::encode;
use super::framer::{Frame, ResponseFramer};
use super::transport::{Transport, TransportEvent};
use super::ProtocolError;
use crate::config::ScannerConfig;
use crate::datalog::{CommLog, Direction, LogEntry};
use crate::decoder::{Decoded, PidDecoder};
use crate::demo::simulated_reply;
use crate::dtc::{DtcRecord, DtcSet};
use crate::events::{EventBus, Notification, ScannerEvent};
use crate::session::SessionSummary;
use crate::state::{LinkPhase, PhysicalState, StatusSnapshot};
use crate::vehicle::identify_model;

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

fn lock<T>(lock: &Mutex<T>) -> MutexGuard<'_, T> {
    lock.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Bookkeeping for the session being recorded
#[derive(Debug, Clone, Default)]
pub(crate) struct SessionMeta {
    pub adapter_version: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
}

/// State shared by the scanner, its engine and its background tasks
///
/// Every mutation is followed by the matching [`ScannerEvent`].
pub(crate) struct Shared {
    pub config: ScannerConfig,
    pub events: EventBus,
    state: RwLock<PhysicalState>,
    dtcs: RwLock<DtcSet>,
    log: Mutex<CommLog>,
    status: RwLock<StatusSnapshot>,
    meta: Mutex<SessionMeta>,
}

impl Shared {
    pub fn new(config: ScannerConfig) -> Self {
        let log = CommLog::new(config.log_capacity);
        Self {
            config,
            events: EventBus::new(),
            state: RwLock::new(PhysicalState::default()),
            dtcs: RwLock::new(DtcSet::new()),
            log: Mutex::new(log),
            status: RwLock::new(StatusSnapshot::default()),
            meta: Mutex::new(SessionMeta::default()),
        }
    }

    pub fn state(&self) -> PhysicalState {
        *read(&self.state)
    }

    pub fn dtc_set(&self) -> DtcSet {
        read(&self.dtcs).clone()
    }

    pub fn dtcs(&self) -> Vec<DtcRecord> {
        read(&self.dtcs).records().to_vec()
    }

    pub fn logs(&self) -> Vec<LogEntry> {
        lock(&self.log).snapshot()
    }

    pub fn status(&self) -> StatusSnapshot {
        read(&self.status).clone()
    }

    pub fn meta(&self) -> SessionMeta {
        lock(&self.meta).clone()
    }

    pub fn set_meta(&self, meta: SessionMeta) {
        *lock(&self.meta) = meta;
    }

    pub fn set_adapter_version(&self, version: String) {
        lock(&self.meta).adapter_version = Some(version);
    }

    /// Append to the communication log
    pub fn log(&self, direction: Direction, text: &str) {
        let entry = LogEntry::new(direction, text);
        lock(&self.log).push(entry.clone());
        self.events.emit(ScannerEvent::Log(entry));
    }

    pub fn notify(&self, notification: Notification) {
        self.events.emit(ScannerEvent::Notify(notification));
    }

    /// Update the status and publish the new snapshot
    pub fn update_status(&self, update: impl FnOnce(&mut StatusSnapshot)) {
        let snapshot = {
            let mut status = write(&self.status);
            update(&mut status);
            status.status = status.phase.status();
            status.clone()
        };
        self.events.emit(ScannerEvent::Status(snapshot));
    }

    pub fn set_phase(&self, phase: LinkPhase) {
        tracing::info!("Connection phase: {:?}", phase);
        self.update_status(|s| s.phase = phase);
    }

    /// Commit a decoded line
    pub fn apply(&self, decoded: &Decoded) {
        if !decoded.patch.is_empty() {
            let state = {
                let mut state = write(&self.state);
                decoded.patch.apply(&mut state);
                *state
            };
            self.events.emit(ScannerEvent::State(state));
        }

        if let Some(mutation) = &decoded.dtc {
            let changed = {
                let mut dtcs = write(&self.dtcs);
                dtcs.apply(mutation).then(|| dtcs.records().to_vec())
            };
            if let Some(records) = changed {
                self.events.emit(ScannerEvent::Dtcs(records));
            }
        }
    }

    /// Resolve the model from a complete VIN
    pub fn identify_vehicle(&self, vin: &str) {
        match identify_model(vin) {
            Some(model) => {
                tracing::info!("VIN {} identified as {}", vin, model);
                self.update_status(|s| s.model = model);
            }
            None => tracing::debug!("VIN {} too short to identify", vin),
        }
    }

    /// Replace the whole state (simulation)
    pub fn replace_state(&self, state: PhysicalState) {
        *write(&self.state) = state;
        self.events.emit(ScannerEvent::State(state));
    }

    /// Consistent copy of values and codes
    pub fn summary(&self) -> SessionSummary {
        let state = read(&self.state);
        let dtcs = read(&self.dtcs);
        SessionSummary {
            state: *state,
            dtcs: dtcs.records().to_vec(),
        }
    }

    /// Back to defaults after a disconnect
    pub fn reset_live_data(&self) {
        let state = PhysicalState::default();
        *write(&self.state) = state;
        write(&self.dtcs).clear();
        *lock(&self.meta) = SessionMeta::default();
        self.events.emit(ScannerEvent::State(state));
        self.events.emit(ScannerEvent::Dtcs(Vec::new()));
    }
}

/// Request waiting for the adapter prompt
struct PendingReply {
    lines: Vec<String>,
    done: oneshot::Sender<Vec<String>>,
}

/// Sends commands to a live or simulated adapter
pub(crate) struct CommandEngine {
    shared: Arc<Shared>,
    /// `None` when simulating
    transport: Option<tokio::sync::Mutex<Box<dyn Transport>>>,
    pending: Mutex<Option<PendingReply>>,
    decoder: PidDecoder,
    closed: AtomicBool,
}

impl CommandEngine {
    pub fn live(shared: Arc<Shared>, transport: Box<dyn Transport>) -> Self {
        Self {
            shared,
            transport: Some(tokio::sync::Mutex::new(transport)),
            pending: Mutex::new(None),
            decoder: PidDecoder::new(),
            closed: AtomicBool::new(false),
        }
    }

    pub fn simulated(shared: Arc<Shared>) -> Self {
        Self {
            shared,
            transport: None,
            pending: Mutex::new(None),
            decoder: PidDecoder::simulated(),
            closed: AtomicBool::new(false),
        }
    }

    fn ensure_open(&self) -> Result<(), ProtocolError> {
        if self.closed.load(Ordering::SeqCst) {
            Err(ProtocolError::NotConnected)
        } else {
            Ok(())
        }
    }

    /// Send a command
    ///
    /// Live: returns an empty string as soon as the write completes.
    /// Simulated: returns the generated reply after the simulated latency.
    pub async fn send(&self, command: &str) -> Result<String, ProtocolError> {
        self.ensure_open()?;
        let Some(transport) = &self.transport else {
            return self.simulate(command).await;
        };

        let mut transport = transport.lock().await;
        self.ensure_open()?;
        self.shared.log(Direction::Tx, command);
        tracing::debug!("TX {}", command);
        transport.write(&encode(command)).await?;
        Ok(String::new())
    }

    /// Send a command and wait for the complete reply
    pub async fn request(&self, command: &str) -> Result<String, ProtocolError> {
        self.ensure_open()?;
        let Some(transport) = &self.transport else {
            return self.simulate(command).await;
        };

        let mut transport = transport.lock().await;
        self.ensure_open()?;

        let (done, rx) = oneshot::channel();
        *lock(&self.pending) = Some(PendingReply {
            lines: Vec::new(),
            done,
        });

        self.shared.log(Direction::Tx, command);
        tracing::debug!("TX {} (awaiting reply)", command);
        if let Err(e) = transport.write(&encode(command)).await {
            lock(&self.pending).take();
            return Err(e);
        }

        let timeout = self.shared.config.command_timeout();
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(lines)) => Ok(lines.join("\n")),
            Ok(Err(_)) => Err(ProtocolError::UnexpectedDisconnect),
            Err(_) => {
                lock(&self.pending).take();
                Err(ProtocolError::NoResponse {
                    command: command.to_string(),
                    timeout_ms: timeout.as_millis() as u64,
                })
            }
        }
    }

    async fn simulate(&self, command: &str) -> Result<String, ProtocolError> {
        self.shared.log(Direction::Tx, command);
        tokio::time::sleep(self.shared.config.simulated_latency()).await;
        self.ensure_open()?;

        let reply = simulated_reply(command, &self.shared.state(), &self.shared.dtc_set());
        self.shared.log(Direction::Rx, &reply);
        let decoded = self.decoder.decode(&reply, &self.shared.dtc_set());
        self.shared.apply(&decoded);
        Ok(reply)
    }

    /// Handle one framed item from the adapter
    pub fn on_frame(&self, frame: Frame) {
        match frame {
            Frame::Line(line) => {
                tracing::debug!("RX {}", line);
                self.shared.log(Direction::Rx, &line);
                let decoded = self.decoder.decode(&line, &self.shared.dtc_set());
                self.shared.apply(&decoded);
                if let Some(pending) = lock(&self.pending).as_mut() {
                    pending.lines.push(line);
                }
            }
            Frame::Prompt => {
                if let Some(pending) = lock(&self.pending).take() {
                    let _ = pending.done.send(pending.lines);
                }
            }
        }
    }

    /// Fail any waiting request and refuse further commands
    pub fn abandon(&self) {
        self.closed.store(true, Ordering::SeqCst);
        // Dropping the sender wakes the waiter with an error
        lock(&self.pending).take();
    }

    /// Stop and release the transport
    pub async fn close(&self) {
        self.abandon();
        if let Some(transport) = &self.transport {
            transport.lock().await.close().await;
        }
    }
}

/// Why the notification pump stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PumpExit {
    Cancelled,
    LinkLost,
}

/// Feed transport events through the framer into the engine
pub(crate) async fn pump(
    engine: Arc<CommandEngine>,
    mut events: mpsc::UnboundedReceiver<TransportEvent>,
    cancel: CancellationToken,
) -> PumpExit {
    let mut framer = ResponseFramer::new();
    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => return PumpExit::Cancelled,
            event = events.recv() => event,
        };

        match event {
            Some(TransportEvent::Data(text)) => {
                for frame in framer.push(&text) {
                    engine.on_frame(frame);
                }
            }
            Some(TransportEvent::Disconnected) | None => {
                if cancel.is_cancelled() {
                    return PumpExit::Cancelled;
                }
                tracing::error!("Adapter link lost");
                engine.abandon();
                return PumpExit::LinkLost;
            }
        }
    }
}

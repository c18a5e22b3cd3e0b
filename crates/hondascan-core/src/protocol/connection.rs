//! Connection management
//!
//! [`Scanner`] is the context object the application creates once and hands
//! to every consumer. It sequences adapter initialization and ECU probing,
//! runs the polling loop, owns the live state and fans every change out to
//! subscribers.
//!
//! Phases: `Disconnected -> AdapterConnecting -> AdapterConnected ->
//! EcuProbing -> AdapterAndEcuConnected`, with `Disconnected` reachable from
//! any of them. Without any Bluetooth capability the scanner runs the
//! simulator and reports `AdapterAndEcuConnected` until disconnected.

use chrono::Utc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use super::commands::{is_data_reply, Command, Pid};
use super::engine::{pump, CommandEngine, PumpExit, SessionMeta, Shared};
use super::poller::{poll_live, poll_simulated};
use super::transport::{DeviceFilter, TransportProvider};
use super::ProtocolError;
use crate::config::ScannerConfig;
use crate::datalog::LogEntry;
use crate::decoder::{assemble_vin, PidDecoder};
use crate::demo::{DemoSimulator, SIMULATED_ADAPTER, SIMULATED_DEVICE_NAME};
use crate::dtc::{DtcRecord, DtcSet};
use crate::events::{Notification, ScannerEvent, SubscriptionId};
use crate::session::{default_session_name, NewScanSession, ScanSession, SessionStore};
use crate::state::{
    ConnectionStatus, EcuProtocol, LinkPhase, PhysicalState, StatusSnapshot, UNKNOWN_MODEL,
};

/// Adapter version recorded when the reset reply carried none
pub const DEFAULT_ADAPTER_VERSION: &str = "ELM327";

/// The connection currently held by the scanner
struct ActiveLink {
    id: u64,
    engine: Arc<CommandEngine>,
    cancel: CancellationToken,
    /// Initialization finished; only ready links record a session
    ready: bool,
    /// Set when the link went away underneath the scanner
    lost: Arc<AtomicBool>,
}

struct Inner {
    shared: Arc<Shared>,
    provider: Option<Arc<dyn TransportProvider>>,
    store: Arc<dyn SessionStore>,
    filter: DeviceFilter,
    active: Mutex<Option<ActiveLink>>,
    next_id: AtomicU64,
}

/// Result of tearing a connection down
#[derive(Default)]
struct Closed {
    saved: Option<ScanSession>,
    error: Option<ProtocolError>,
}

/// How a connection ended
enum Teardown {
    /// Operator asked to disconnect
    Requested,
    /// Transport reported the link gone or a write failed
    LinkLost(ProtocolError),
    /// The initialization sequence failed
    Aborted(ProtocolError),
}

/// Diagnostic session with one adapter
///
/// Cheap to clone; clones share the same connection.
#[derive(Clone)]
pub struct Scanner {
    inner: Arc<Inner>,
}

impl Scanner {
    /// Create a scanner
    ///
    /// Without a provider every connect falls back to simulation.
    pub fn new(
        config: ScannerConfig,
        provider: Option<Arc<dyn TransportProvider>>,
        store: Arc<dyn SessionStore>,
    ) -> Self {
        Self::with_filter(config, provider, store, DeviceFilter::default())
    }

    /// Create a scanner with a custom device discovery filter
    pub fn with_filter(
        config: ScannerConfig,
        provider: Option<Arc<dyn TransportProvider>>,
        store: Arc<dyn SessionStore>,
        filter: DeviceFilter,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                shared: Arc::new(Shared::new(config)),
                provider,
                store,
                filter,
                active: Mutex::new(None),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn config(&self) -> &ScannerConfig {
        &self.inner.shared.config
    }

    pub fn store(&self) -> Arc<dyn SessionStore> {
        self.inner.store.clone()
    }

    /// Last decoded values
    pub fn state(&self) -> PhysicalState {
        self.inner.shared.state()
    }

    /// Fault codes collected this session
    pub fn dtcs(&self) -> Vec<DtcRecord> {
        self.inner.shared.dtcs()
    }

    /// Communication log, oldest first
    pub fn logs(&self) -> Vec<LogEntry> {
        self.inner.shared.logs()
    }

    pub fn status(&self) -> StatusSnapshot {
        self.inner.shared.status()
    }

    /// Receive every state, DTC, status, log and notification event
    pub fn subscribe(&self) -> (SubscriptionId, mpsc::UnboundedReceiver<ScannerEvent>) {
        self.inner.shared.events.subscribe()
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.inner.shared.events.unsubscribe(id)
    }

    /// Acquire an adapter, initialize it and start polling
    ///
    /// Failures are also published as notifications. When no Bluetooth
    /// transport exists the scanner enters simulation and returns
    /// `AdapterAndEcuConnected`.
    pub async fn connect(&self) -> Result<ConnectionStatus, ProtocolError> {
        let inner = &self.inner;
        let shared = &inner.shared;

        let mut active = inner.active.lock().await;
        if active.is_some() {
            return Err(ProtocolError::AlreadyConnected);
        }

        shared.set_phase(LinkPhase::AdapterConnecting);
        let opened = match &inner.provider {
            Some(provider) => provider.open(&inner.filter).await,
            None => Err(ProtocolError::NoTransportAvailable),
        };

        let link = match opened {
            Ok(link) => link,
            Err(ProtocolError::NoTransportAvailable) => {
                *active = Some(self.start_simulation());
                return Ok(ConnectionStatus::AdapterAndEcuConnected);
            }
            Err(e) => {
                shared.set_phase(LinkPhase::Disconnected);
                if e.is_informational() {
                    tracing::info!("Connect aborted: {}", e);
                    shared.notify(Notification::info("Connection cancelled", e.to_string()));
                } else {
                    tracing::warn!("Connect failed: {}", e);
                    shared.notify(Notification::error("Connection error", e.to_string()));
                }
                return Err(e);
            }
        };

        let device = link.transport.name().to_string();
        let id = inner.next_id.fetch_add(1, Ordering::Relaxed);
        let cancel = CancellationToken::new();
        let lost = Arc::new(AtomicBool::new(false));
        let engine = Arc::new(CommandEngine::live(shared.clone(), link.transport));

        {
            let engine = engine.clone();
            let cancel = cancel.clone();
            let inner = inner.clone();
            tokio::spawn(async move {
                if pump(engine, link.events, cancel).await == PumpExit::LinkLost {
                    inner
                        .teardown(Some(id), Teardown::LinkLost(ProtocolError::UnexpectedDisconnect))
                        .await;
                }
            });
        }

        *active = Some(ActiveLink {
            id,
            engine: engine.clone(),
            cancel: cancel.clone(),
            ready: false,
            lost: lost.clone(),
        });
        drop(active);

        shared.set_meta(SessionMeta {
            adapter_version: None,
            started_at: Some(Utc::now()),
        });
        shared.update_status(|s| {
            s.phase = LinkPhase::AdapterConnected;
            s.device_name = Some(device.clone());
            s.simulated = false;
        });
        tracing::info!("Adapter {} attached", device);

        let protocol = match self.initialize(&engine, &cancel).await {
            Ok(protocol) => protocol,
            Err(_) if cancel.is_cancelled() => return Err(interrupted(&lost)),
            Err(e) => {
                // The pump closed the engine but has not torn the link down yet
                let e = match e {
                    ProtocolError::NotConnected => ProtocolError::UnexpectedDisconnect,
                    e => e,
                };
                let reason = if e.is_link_loss() {
                    Teardown::LinkLost(e)
                } else {
                    Teardown::Aborted(e)
                };
                let closed = inner.teardown(Some(id), reason).await;
                return Err(closed.error.unwrap_or_else(|| interrupted(&lost)));
            }
        };

        // Held until polling runs so a teardown sees either no link or a ready one
        let mut active = inner.active.lock().await;
        match active.as_mut() {
            Some(link) if link.id == id => link.ready = true,
            _ => return Err(interrupted(&lost)),
        }

        let phase = if protocol.is_some() {
            LinkPhase::AdapterAndEcuConnected
        } else {
            LinkPhase::AdapterConnected
        };
        shared.update_status(|s| {
            s.phase = phase;
            s.protocol = protocol;
        });

        shared.notify(match protocol {
            Some(p) => Notification::info(
                "Honda connected",
                format!("{} active on {}", p.label(), device),
            ),
            None => Notification::warning(
                "Adapter connected",
                format!("Connected to {device}, but the ECU is not responding. Check the ignition."),
            ),
        });

        {
            let shared = shared.clone();
            let inner = inner.clone();
            tokio::spawn(async move {
                if let Err(e) = poll_live(engine, shared, protocol, cancel).await {
                    tracing::warn!("Polling stopped: {}", e);
                    if e.is_link_loss() {
                        inner.teardown(Some(id), Teardown::LinkLost(e)).await;
                    }
                }
            });
        }
        drop(active);

        Ok(phase.status())
    }

    fn start_simulation(&self) -> ActiveLink {
        let inner = &self.inner;
        let shared = &inner.shared;
        let id = inner.next_id.fetch_add(1, Ordering::Relaxed);
        let cancel = CancellationToken::new();
        let engine = Arc::new(CommandEngine::simulated(shared.clone()));

        tracing::info!("No Bluetooth transport, running simulation");
        shared.set_meta(SessionMeta {
            adapter_version: Some(SIMULATED_ADAPTER.to_string()),
            started_at: Some(Utc::now()),
        });
        shared.update_status(|s| {
            s.phase = LinkPhase::AdapterAndEcuConnected;
            s.device_name = Some(SIMULATED_DEVICE_NAME.to_string());
            s.protocol = Some(EcuProtocol::Simulated);
            s.simulated = true;
        });
        shared.notify(Notification::info(
            "Simulation mode",
            "Bluetooth not detected. Using simulated data.",
        ));

        tokio::spawn(poll_simulated(
            shared.clone(),
            DemoSimulator::new(),
            cancel.clone(),
        ));

        ActiveLink {
            id,
            engine,
            cancel,
            ready: true,
            lost: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Reset and configure the adapter, then find the ECU
    async fn initialize(
        &self,
        engine: &CommandEngine,
        cancel: &CancellationToken,
    ) -> Result<Option<EcuProtocol>, ProtocolError> {
        let shared = &self.inner.shared;
        let config = &shared.config;

        let reset = exchange(engine, cancel, &Command::Reset).await?;
        let version = reset
            .lines()
            .rev()
            .find(|l| l.to_ascii_uppercase().contains("ELM"))
            .map(|l| l.trim().to_string())
            .unwrap_or_else(|| DEFAULT_ADAPTER_VERSION.to_string());
        tracing::info!("Adapter identifies as {}", version);
        shared.set_adapter_version(version);
        settle(cancel, config.reset_settle()).await?;

        for command in [
            Command::EchoOff,
            Command::LinefeedsOff,
            Command::SpacesOff,
            Command::SelectProtocol(config.adapter_protocol.clone()),
            Command::AdaptiveTiming,
        ] {
            exchange(engine, cancel, &command).await?;
        }
        settle(cancel, config.protocol_settle()).await?;

        shared.set_phase(LinkPhase::EcuProbing);
        let mut protocol = None;

        let probe = exchange(engine, cancel, &Command::ReadPid(Pid::SupportedPids)).await?;
        if is_data_reply(&probe) {
            protocol = Some(EcuProtocol::Standard);
        } else {
            tracing::info!("Standard probe refused, trying Honda header");
            exchange(engine, cancel, &Command::SetHeader(config.honda_header.clone())).await?;
            let table = exchange(engine, cancel, &Command::HondaTable).await?;
            if is_data_reply(&table) {
                protocol = Some(EcuProtocol::HondaKLine);
            }
        }

        match protocol {
            Some(p) => {
                tracing::info!("ECU reachable via {}", p.label());
                let reply = exchange(engine, cancel, &Command::ReadVin).await?;
                match assemble_vin(&reply) {
                    Some(vin) => shared.identify_vehicle(&vin),
                    None => tracing::info!("ECU did not report a VIN"),
                }
            }
            None => tracing::warn!("ECU not responding"),
        }

        Ok(protocol)
    }

    /// Tear down the connection and persist the session
    ///
    /// Returns the stored session, or `None` when nothing was connected or
    /// the store failed. Never blocks on the store failing.
    pub async fn disconnect(&self) -> Option<ScanSession> {
        self.inner.teardown(None, Teardown::Requested).await.saved
    }

    /// Send operator-typed text
    ///
    /// The text is trimmed and upper-cased. Live adapters answer
    /// asynchronously through the log, so the returned reply is only
    /// populated while simulating.
    pub async fn send_terminal_command(&self, text: &str) -> Result<String, ProtocolError> {
        let command = text.trim().to_ascii_uppercase();
        if command.is_empty() {
            return Err(ProtocolError::EmptyCommand);
        }
        let engine = self.engine().await?;
        let result = engine.send(&command).await;
        self.check(result).await
    }

    /// Read stored fault codes (`03`)
    pub async fn read_codes(&self) -> Result<Vec<DtcRecord>, ProtocolError> {
        let engine = self.engine().await?;
        let result = engine.request(&Command::ReadDtcs.to_string()).await;
        self.check(result).await?;
        Ok(self.dtcs())
    }

    /// Clear fault codes (`04`); true when the ECU acknowledged
    pub async fn clear_codes(&self) -> Result<bool, ProtocolError> {
        let engine = self.engine().await?;
        let result = engine.request(&Command::ClearDtcs.to_string()).await;
        let reply = self.check(result).await?;

        let decoder = PidDecoder::new();
        let empty = DtcSet::new();
        Ok(reply
            .lines()
            .any(|line| decoder.decode(line, &empty).codes_cleared))
    }

    /// Store the current snapshot without disconnecting
    pub async fn save_session(&self, name: Option<String>) -> anyhow::Result<ScanSession> {
        if !self.status().status.adapter_connected() {
            return Err(ProtocolError::NotConnected.into());
        }
        let session = self.inner.new_session(name);
        self.inner.store.create(session).await
    }

    async fn engine(&self) -> Result<Arc<CommandEngine>, ProtocolError> {
        self.inner
            .active
            .lock()
            .await
            .as_ref()
            .map(|link| link.engine.clone())
            .ok_or(ProtocolError::NotConnected)
    }

    /// Route link-loss errors into a disconnect
    async fn check(&self, result: Result<String, ProtocolError>) -> Result<String, ProtocolError> {
        match result {
            Err(e) if e.is_link_loss() => {
                let id = self.inner.active.lock().await.as_ref().map(|l| l.id);
                match id {
                    Some(id) => {
                        let closed = self.inner.teardown(Some(id), Teardown::LinkLost(e)).await;
                        Err(closed.error.unwrap_or(ProtocolError::NotConnected))
                    }
                    None => Err(e),
                }
            }
            other => other,
        }
    }
}

impl Inner {
    fn new_session(&self, name: Option<String>) -> NewScanSession {
        let meta = self.shared.meta();
        let status = self.shared.status();
        let now = Utc::now();
        NewScanSession {
            name: name.unwrap_or_else(|| default_session_name(now)),
            adapter_version: meta.adapter_version,
            protocol: status.protocol.map(|p| p.label().to_string()),
            started_at: meta.started_at.unwrap_or(now),
            ended_at: Some(now),
            summary: self.shared.summary(),
        }
    }

    /// Drop the connection identified by `id` (any when `None`)
    ///
    /// A stale `id` or an already closed scanner is a no-op.
    async fn teardown(&self, id: Option<u64>, reason: Teardown) -> Closed {
        let link = {
            let mut active = self.active.lock().await;
            match (active.as_ref(), id) {
                (Some(link), Some(id)) if link.id != id => None,
                _ => active.take(),
            }
        };
        let Some(link) = link else {
            return Closed::default();
        };

        if matches!(reason, Teardown::LinkLost(_)) {
            link.lost.store(true, Ordering::SeqCst);
        }
        link.cancel.cancel();
        link.engine.close().await;

        // A connection that never finished initializing has nothing to record
        let session = link.ready.then(|| self.new_session(None));

        self.shared.reset_live_data();
        self.shared.update_status(|s| {
            s.phase = LinkPhase::Disconnected;
            s.model = UNKNOWN_MODEL.to_string();
            s.device_name = None;
            s.protocol = None;
            s.simulated = false;
        });

        let error = match reason {
            Teardown::Requested => {
                tracing::info!("Disconnected");
                None
            }
            Teardown::LinkLost(e) => {
                tracing::error!("Connection lost: {}", e);
                self.shared
                    .notify(Notification::error("Connection lost", e.to_string()));
                Some(e)
            }
            Teardown::Aborted(e) => {
                tracing::warn!("Initialization aborted: {}", e);
                self.shared
                    .notify(Notification::error("Connection error", e.to_string()));
                Some(e)
            }
        };

        let saved = match session {
            Some(session) => match self.store.create(session).await {
                Ok(saved) => {
                    tracing::info!("Session {} saved", saved.id);
                    Some(saved)
                }
                Err(e) => {
                    tracing::warn!("Failed to save session: {:#}", e);
                    self.shared
                        .notify(Notification::warning("Session not saved", e.to_string()));
                    None
                }
            },
            None => None,
        };
        Closed { saved, error }
    }
}

/// Awaited request inside the connect sequence
///
/// A missing reply counts as "no data"; only link loss aborts.
async fn exchange(
    engine: &CommandEngine,
    cancel: &CancellationToken,
    command: &Command,
) -> Result<String, ProtocolError> {
    if cancel.is_cancelled() {
        return Err(ProtocolError::NotConnected);
    }
    match engine.request(&command.to_string()).await {
        Ok(reply) => Ok(reply),
        Err(e @ ProtocolError::NoResponse { .. }) => {
            tracing::warn!("{}", e);
            Ok(String::new())
        }
        Err(e) => Err(e),
    }
}

/// Error for a connect attempt whose link was torn down underneath it
fn interrupted(lost: &AtomicBool) -> ProtocolError {
    if lost.load(Ordering::SeqCst) {
        ProtocolError::UnexpectedDisconnect
    } else {
        ProtocolError::NotConnected
    }
}

async fn settle(cancel: &CancellationToken, delay: Duration) -> Result<(), ProtocolError> {
    tokio::select! {
        _ = cancel.cancelled() => Err(ProtocolError::NotConnected),
        _ = tokio::time::sleep(delay) => Ok(()),
    }
}

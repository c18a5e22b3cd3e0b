use async_trait::async_trait;
use hondascan_core::config::ScannerConfig;
use hondascan_core::datalog::Direction;
use hondascan_core::demo::{RPM_RANGE, SIMULATED_ADAPTER};
use hondascan_core::events::{ScannerEvent, Severity};
use hondascan_core::protocol::mock::{EcuBehavior, MockConfig, MockHandle, MockProvider};
use hondascan_core::protocol::{ProtocolError, Scanner, TransportProvider};
use hondascan_core::session::{MemorySessionStore, NewScanSession, ScanSession, SessionStore};
use hondascan_core::state::{ConnectionStatus, EcuProtocol, LinkPhase, PhysicalState};
use pretty_assertions::assert_eq;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::sleep;

/// Session store that counts create calls and can be told to fail
#[derive(Default)]
struct RecordingStore {
    inner: MemorySessionStore,
    creates: AtomicUsize,
    fail: bool,
}

impl RecordingStore {
    fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    fn creates(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SessionStore for RecordingStore {
    async fn create(&self, session: NewScanSession) -> anyhow::Result<ScanSession> {
        self.creates.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            anyhow::bail!("backend unavailable");
        }
        self.inner.create(session).await
    }

    async fn list(&self) -> anyhow::Result<Vec<ScanSession>> {
        self.inner.list().await
    }

    async fn get(&self, id: u64) -> anyhow::Result<Option<ScanSession>> {
        self.inner.get(id).await
    }
}

/// Set RUST_LOG=hondascan_core=debug to see the adapter traffic
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn scanner(provider: Option<Arc<MockProvider>>, store: Arc<RecordingStore>) -> Scanner {
    init_tracing();
    let provider = provider.map(|p| p as Arc<dyn TransportProvider>);
    Scanner::new(ScannerConfig::default(), provider, store)
}

fn adapter(config: MockConfig) -> (Arc<MockProvider>, MockHandle) {
    let provider = Arc::new(MockProvider::new());
    let handle = provider.push_adapter(config);
    (provider, handle)
}

fn notifications(rx: &mut UnboundedReceiver<ScannerEvent>) -> Vec<(Severity, String)> {
    let mut out = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if let ScannerEvent::Notify(n) = event {
            out.push((n.severity, n.title));
        }
    }
    out
}

#[tokio::test(start_paused = true)]
async fn test_no_transport_enters_simulation() {
    let store = Arc::new(RecordingStore::default());
    let scanner = scanner(None, store.clone());
    let (_id, mut events) = scanner.subscribe();

    assert_eq!(
        scanner.connect().await.unwrap(),
        ConnectionStatus::AdapterAndEcuConnected
    );
    let status = scanner.status();
    assert!(status.simulated);
    assert_eq!(status.protocol, Some(EcuProtocol::Simulated));
    assert_eq!(
        notifications(&mut events),
        vec![(Severity::Info, "Simulation mode".to_string())]
    );

    // Synthetic values within one interval
    sleep(Duration::from_millis(1100)).await;
    let state = scanner.state();
    assert!(state.rpm >= RPM_RANGE.0 && state.rpm <= RPM_RANGE.1);
    assert!((70..=130).contains(&state.oil_temp));

    let session = scanner.disconnect().await.unwrap();
    assert_eq!(session.adapter_version.as_deref(), Some(SIMULATED_ADAPTER));
    assert_eq!(session.protocol.as_deref(), Some("Simulated"));
    assert_eq!(store.creates(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_simulated_terminal_and_codes() {
    let scanner = scanner(None, Arc::new(RecordingStore::default()));
    scanner.connect().await.unwrap();

    let reply = scanner.send_terminal_command("at rv").await.unwrap();
    assert!(reply.ends_with('V'), "{reply}");
    assert_eq!(scanner.read_codes().await.unwrap(), vec![]);
    assert!(scanner.clear_codes().await.unwrap());
}

#[tokio::test(start_paused = true)]
async fn test_standard_connect_sequence() {
    let (provider, handle) = adapter(MockConfig {
        vin: Some("9C2KC0810PR000123".into()),
        ..Default::default()
    });
    let scanner = scanner(Some(provider), Arc::new(RecordingStore::default()));
    let (_id, mut events) = scanner.subscribe();

    assert_eq!(
        scanner.connect().await.unwrap(),
        ConnectionStatus::AdapterAndEcuConnected
    );
    assert_eq!(
        handle.written(),
        vec!["AT Z", "AT E0", "AT L0", "AT S0", "AT SP 5", "AT AT 1", "01 00", "09 02"]
    );

    let status = scanner.status();
    assert_eq!(status.phase, LinkPhase::AdapterAndEcuConnected);
    assert_eq!(status.protocol, Some(EcuProtocol::Standard));
    assert_eq!(status.model, "Honda CG 150/160");
    assert_eq!(status.device_name.as_deref(), Some("OBDII Mock"));
    assert_eq!(
        notifications(&mut events),
        vec![(Severity::Info, "Honda connected".to_string())]
    );
}

#[tokio::test(start_paused = true)]
async fn test_connect_walks_through_phases() {
    let (provider, _handle) = adapter(MockConfig::default());
    let scanner = scanner(Some(provider), Arc::new(RecordingStore::default()));
    let (_id, mut events) = scanner.subscribe();
    scanner.connect().await.unwrap();

    let mut phases = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let ScannerEvent::Status(s) = event {
            if phases.last() != Some(&s.phase) {
                phases.push(s.phase);
            }
        }
    }
    assert_eq!(
        phases,
        vec![
            LinkPhase::AdapterConnecting,
            LinkPhase::AdapterConnected,
            LinkPhase::EcuProbing,
            LinkPhase::AdapterAndEcuConnected,
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_honda_fallback_and_polling() {
    let (provider, handle) = adapter(MockConfig {
        ecu: EcuBehavior::HondaOnly,
        state: PhysicalState {
            rpm: 2500.0,
            oil_temp: 88,
            voltage: 13.1,
            tps: 20,
            ..Default::default()
        },
        ..Default::default()
    });
    let scanner = scanner(Some(provider), Arc::new(RecordingStore::default()));

    scanner.connect().await.unwrap();
    assert_eq!(scanner.status().protocol, Some(EcuProtocol::HondaKLine));
    assert_eq!(
        &handle.written()[6..],
        &["01 00", "AT SH 81 10 F1", "21 01", "09 02"]
    );
    assert_eq!(scanner.state().rpm, 2500.0);
    assert_eq!(scanner.state().oil_temp, 88);

    // One full cycle: interval plus eight gaps
    sleep(Duration::from_millis(1000 + 8 * 100 + 50)).await;
    assert_eq!(handle.count("21 01"), 2);
    assert_eq!(handle.written().last().map(String::as_str), Some("21 01"));
}

#[tokio::test(start_paused = true)]
async fn test_silent_ecu_leaves_adapter_connected() {
    let (provider, handle) = adapter(MockConfig {
        ecu: EcuBehavior::Silent,
        ..Default::default()
    });
    let scanner = scanner(Some(provider), Arc::new(RecordingStore::default()));
    let (_id, mut events) = scanner.subscribe();

    assert_eq!(
        scanner.connect().await.unwrap(),
        ConnectionStatus::AdapterConnected
    );
    assert_eq!(handle.count("09 02"), 0);
    assert_eq!(scanner.status().protocol, None);
    assert_eq!(
        notifications(&mut events),
        vec![(Severity::Warning, "Adapter connected".to_string())]
    );

    // Polling still runs while only the adapter answers
    sleep(Duration::from_millis(1050)).await;
    assert_eq!(handle.count("01 0C"), 1);
}

#[tokio::test(start_paused = true)]
async fn test_unresponsive_adapter_times_out_per_command() {
    let (provider, handle) = adapter(MockConfig {
        unresponsive: true,
        ..Default::default()
    });
    let scanner = scanner(Some(provider), Arc::new(RecordingStore::default()));

    assert_eq!(
        scanner.connect().await.unwrap(),
        ConnectionStatus::AdapterConnected
    );
    assert!(handle.written().contains(&"AT SH 81 10 F1".to_string()));
    assert_eq!(
        scanner.status().phase,
        LinkPhase::AdapterConnected
    );
}

#[tokio::test(start_paused = true)]
async fn test_fragmented_adapter_output() {
    let (provider, _handle) = adapter(MockConfig {
        fragment_size: Some(1),
        state: PhysicalState {
            rpm: 1726.0,
            speed: 50,
            ..Default::default()
        },
        ..Default::default()
    });
    let scanner = scanner(Some(provider), Arc::new(RecordingStore::default()));

    scanner.connect().await.unwrap();
    assert_eq!(scanner.status().protocol, Some(EcuProtocol::Standard));

    sleep(Duration::from_millis(2000)).await;
    assert_eq!(scanner.state().rpm, 1726.0);
    assert_eq!(scanner.state().speed, 50);
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_persists_summary_once() {
    let ecu = PhysicalState {
        rpm: 3500.0,
        speed: 40,
        ..Default::default()
    };
    let (provider, handle) = adapter(MockConfig {
        state: ecu,
        codes: vec!["P0300".into(), "P0113".into()],
        ..Default::default()
    });
    let store = Arc::new(RecordingStore::default());
    let scanner = scanner(Some(provider), store.clone());

    scanner.connect().await.unwrap();
    let codes = scanner.read_codes().await.unwrap();
    assert_eq!(codes.len(), 2);

    sleep(Duration::from_secs(2)).await;
    assert_eq!(scanner.state(), ecu);

    let session = scanner.disconnect().await.unwrap();
    assert_eq!(session.summary.state, ecu);
    let saved: Vec<&str> = session
        .summary
        .dtcs
        .iter()
        .map(|d| d.code.as_str())
        .collect();
    assert_eq!(saved, vec!["P0300", "P0113"]);
    assert_eq!(session.adapter_version.as_deref(), Some("ELM327 v1.5"));
    assert_eq!(session.protocol.as_deref(), Some("ISO 14230-4 KWP"));
    assert_eq!(store.creates(), 1);

    // Live data is reset and the adapter released
    assert_eq!(scanner.state(), PhysicalState::default());
    assert!(scanner.dtcs().is_empty());
    assert_eq!(scanner.status().status, ConnectionStatus::Disconnected);
    assert!(handle.is_closed());

    // A second disconnect is a no-op
    assert!(scanner.disconnect().await.is_none());
    assert_eq!(store.creates(), 1);
    assert_eq!(store.list().await.unwrap().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_polling_stops_after_disconnect() {
    let (provider, handle) = adapter(MockConfig::default());
    let scanner = scanner(Some(provider), Arc::new(RecordingStore::default()));
    scanner.connect().await.unwrap();

    sleep(Duration::from_millis(1250)).await;
    scanner.disconnect().await;
    let sent = handle.written().len();

    sleep(Duration::from_secs(5)).await;
    assert_eq!(handle.written().len(), sent);
}

#[tokio::test(start_paused = true)]
async fn test_store_failure_does_not_block_disconnect() {
    let (provider, _handle) = adapter(MockConfig::default());
    let store = Arc::new(RecordingStore::failing());
    let scanner = scanner(Some(provider), store.clone());
    scanner.connect().await.unwrap();
    let (_id, mut events) = scanner.subscribe();

    assert!(scanner.disconnect().await.is_none());
    assert_eq!(store.creates(), 1);
    assert_eq!(scanner.status().status, ConnectionStatus::Disconnected);
    assert_eq!(
        notifications(&mut events),
        vec![(Severity::Warning, "Session not saved".to_string())]
    );
}

#[tokio::test(start_paused = true)]
async fn test_link_loss_forces_disconnect() {
    let (provider, handle) = adapter(MockConfig {
        state: PhysicalState {
            rpm: 3000.0,
            ..Default::default()
        },
        ..Default::default()
    });
    let store = Arc::new(RecordingStore::default());
    let scanner = scanner(Some(provider), store.clone());
    scanner.connect().await.unwrap();
    sleep(Duration::from_millis(1500)).await;
    let (_id, mut events) = scanner.subscribe();

    handle.drop_link();
    sleep(Duration::from_millis(10)).await;

    assert_eq!(scanner.status().status, ConnectionStatus::Disconnected);
    assert_eq!(scanner.state(), PhysicalState::default());
    assert_eq!(
        notifications(&mut events),
        vec![(Severity::Error, "Connection lost".to_string())]
    );
    assert_eq!(store.creates(), 1);
    assert_eq!(store.list().await.unwrap()[0].summary.state.rpm, 3000.0);
}

#[tokio::test(start_paused = true)]
async fn test_write_failure_while_polling() {
    let (provider, handle) = adapter(MockConfig::default());
    let scanner = scanner(Some(provider), Arc::new(RecordingStore::default()));
    scanner.connect().await.unwrap();
    let (_id, mut events) = scanner.subscribe();

    handle.set_fail_writes(true);
    sleep(Duration::from_millis(1100)).await;

    assert_eq!(scanner.status().status, ConnectionStatus::Disconnected);
    assert_eq!(
        notifications(&mut events),
        vec![(Severity::Error, "Connection lost".to_string())]
    );
}

#[tokio::test(start_paused = true)]
async fn test_write_failure_during_connect_saves_nothing() {
    let (provider, handle) = adapter(MockConfig::default());
    handle.set_fail_writes(true);
    let store = Arc::new(RecordingStore::default());
    let scanner = scanner(Some(provider), store.clone());
    let (_id, mut events) = scanner.subscribe();

    assert!(matches!(
        scanner.connect().await,
        Err(ProtocolError::WriteFailed(_))
    ));
    assert_eq!(scanner.status().status, ConnectionStatus::Disconnected);
    assert_eq!(store.creates(), 0);
    assert_eq!(
        notifications(&mut events),
        vec![(Severity::Error, "Connection lost".to_string())]
    );
}

#[tokio::test(start_paused = true)]
async fn test_link_drop_during_connect_saves_nothing() {
    let (provider, handle) = adapter(MockConfig::default());
    let store = Arc::new(RecordingStore::default());
    let scanner = scanner(Some(provider), store.clone());

    let connecting = tokio::spawn({
        let scanner = scanner.clone();
        async move { scanner.connect().await }
    });
    // Inside the post-reset settle delay
    sleep(Duration::from_millis(300)).await;
    handle.drop_link();

    assert!(matches!(
        connecting.await.unwrap(),
        Err(ProtocolError::UnexpectedDisconnect)
    ));
    assert_eq!(scanner.status().status, ConnectionStatus::Disconnected);
    assert_eq!(store.creates(), 0);
    assert!(scanner.disconnect().await.is_none());
    assert_eq!(store.creates(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_vin_spread_over_frames() {
    let (provider, _handle) = adapter(MockConfig {
        vin: Some("9C2KC1670ABCDEFGH".into()),
        vin_frames: true,
        fragment_size: Some(5),
        ..Default::default()
    });
    let scanner = scanner(Some(provider), Arc::new(RecordingStore::default()));

    scanner.connect().await.unwrap();
    assert_eq!(scanner.status().model, "Honda CG 150/160");
}

#[tokio::test(start_paused = true)]
async fn test_header_prefixed_replies_decode() {
    let (provider, _handle) = adapter(MockConfig {
        state: PhysicalState {
            rpm: 1726.0,
            speed: 50,
            ..Default::default()
        },
        ..Default::default()
    });
    let scanner = scanner(Some(provider), Arc::new(RecordingStore::default()));
    scanner.connect().await.unwrap();

    scanner.send_terminal_command("at h1").await.unwrap();
    sleep(Duration::from_millis(1000 + 8 * 100 + 50)).await;

    assert_eq!(scanner.state().rpm, 1726.0);
    assert_eq!(scanner.state().speed, 50);
    assert!(scanner
        .logs()
        .iter()
        .any(|e| e.text.starts_with("48 6B 10 41 0C")));
}

#[tokio::test(start_paused = true)]
async fn test_selection_errors() {
    let provider = Arc::new(MockProvider::new());
    provider.push_error(ProtocolError::UserCancelled);
    provider.push_error(ProtocolError::ConnectionFailed("GATT server not found".into()));
    let scanner = scanner(Some(provider), Arc::new(RecordingStore::default()));
    let (_id, mut events) = scanner.subscribe();

    assert!(matches!(
        scanner.connect().await,
        Err(ProtocolError::UserCancelled)
    ));
    assert!(matches!(
        scanner.connect().await,
        Err(ProtocolError::ConnectionFailed(_))
    ));
    assert_eq!(scanner.status().phase, LinkPhase::Disconnected);
    assert_eq!(
        notifications(&mut events),
        vec![
            (Severity::Info, "Connection cancelled".to_string()),
            (Severity::Error, "Connection error".to_string()),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_already_connected() {
    let scanner = scanner(None, Arc::new(RecordingStore::default()));
    scanner.connect().await.unwrap();
    assert!(matches!(
        scanner.connect().await,
        Err(ProtocolError::AlreadyConnected)
    ));
}

#[tokio::test(start_paused = true)]
async fn test_terminal_commands() {
    let (provider, handle) = adapter(MockConfig::default());
    let scanner = scanner(Some(provider), Arc::new(RecordingStore::default()));

    assert!(matches!(
        scanner.send_terminal_command("   ").await,
        Err(ProtocolError::EmptyCommand)
    ));
    assert!(matches!(
        scanner.send_terminal_command("at rv").await,
        Err(ProtocolError::NotConnected)
    ));

    scanner.connect().await.unwrap();
    assert_eq!(scanner.send_terminal_command("  at rv ").await.unwrap(), "");
    assert_eq!(handle.written().last().map(String::as_str), Some("AT RV"));

    sleep(Duration::from_millis(10)).await;
    let logs = scanner.logs();
    let tx = logs
        .iter()
        .rev()
        .find(|e| e.direction == Direction::Tx)
        .unwrap();
    assert_eq!(tx.text, "AT RV");
    assert_eq!(logs.last().unwrap().text, "12.4V");
}

#[tokio::test(start_paused = true)]
async fn test_clear_codes() {
    let (provider, handle) = adapter(MockConfig {
        codes: vec!["P0300".into(), "P0113".into()],
        ..Default::default()
    });
    let scanner = scanner(Some(provider), Arc::new(RecordingStore::default()));
    scanner.connect().await.unwrap();

    assert_eq!(scanner.read_codes().await.unwrap().len(), 2);
    assert!(scanner.clear_codes().await.unwrap());
    assert!(scanner.dtcs().is_empty());
    assert!(handle.stored_codes().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_manual_save_keeps_connection() {
    let store = Arc::new(RecordingStore::default());
    let scanner = scanner(None, store.clone());
    assert!(scanner.save_session(None).await.is_err());

    scanner.connect().await.unwrap();
    let saved = scanner
        .save_session(Some("Morning ride".into()))
        .await
        .unwrap();
    assert_eq!(saved.name, "Morning ride");
    assert_eq!(
        scanner.status().status,
        ConnectionStatus::AdapterAndEcuConnected
    );
    assert_eq!(store.creates(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_log_stays_bounded() {
    let (provider, _handle) = adapter(MockConfig::default());
    let scanner = scanner(Some(provider), Arc::new(RecordingStore::default()));
    scanner.connect().await.unwrap();

    sleep(Duration::from_secs(10)).await;
    assert_eq!(scanner.logs().len(), 50);
}

#[tokio::test(start_paused = true)]
async fn test_unsubscribe() {
    let scanner = scanner(None, Arc::new(RecordingStore::default()));
    let (id, mut events) = scanner.subscribe();
    assert!(scanner.unsubscribe(id));

    scanner.connect().await.unwrap();
    assert!(events.try_recv().is_err());
}

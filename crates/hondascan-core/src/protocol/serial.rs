//! Serial port handling
//!
//! Classic Bluetooth adapters pair as Serial Port Profile devices and show up
//! as serial ports (`/dev/rfcomm*` on Linux, outgoing `COM` ports on Windows).
//! This module discovers them and wraps them as a [`Transport`].

use async_trait::async_trait;
use serialport::{SerialPortInfo, SerialPortType};
use std::collections::HashMap;
#[cfg(target_os = "linux")]
use std::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_serial::{SerialPortBuilderExt, SerialStream};

use super::transport::{DeviceFilter, Transport, TransportEvent, TransportLink, TransportProvider};
use super::ProtocolError;

/// Information about an available serial port
#[derive(Debug, Clone)]
pub struct PortInfo {
    /// Port name (e.g., "/dev/rfcomm0" or "COM5")
    pub name: String,

    /// Whether the OS reports this port as Bluetooth
    pub bluetooth: bool,

    /// Product name (if available)
    pub product: Option<String>,
}

impl From<SerialPortInfo> for PortInfo {
    fn from(info: SerialPortInfo) -> Self {
        let (bluetooth, product) = match info.port_type {
            SerialPortType::BluetoothPort => (true, None),
            SerialPortType::UsbPort(usb_info) => (false, usb_info.product),
            _ => (false, None),
        };

        Self {
            bluetooth: bluetooth || is_rfcomm(&info.port_name),
            name: info.port_name,
            product,
        }
    }
}

fn is_rfcomm(name: &str) -> bool {
    name.rsplit('/')
        .next()
        .map(|base| base.starts_with("rfcomm"))
        .unwrap_or(false)
}

/// Helper used to sort port names so that:
///  - rfcomm* ports come first (sorted numerically by suffix)
///  - then other Bluetooth ports (sorted by name)
fn port_sort_key(name: &str) -> (u8, usize, String) {
    let basename = name.rsplit('/').next().unwrap_or(name);
    if let Some(rest) = basename.strip_prefix("rfcomm") {
        let num = rest.parse::<usize>().unwrap_or(usize::MAX);
        return (0, num, basename.to_string());
    }
    (1, 0, basename.to_string())
}

/// List Bluetooth serial ports, with /dev fallbacks and deterministic ordering
pub fn list_bluetooth_ports() -> Vec<PortInfo> {
    let mut map: HashMap<String, PortInfo> = HashMap::new();
    for info in serialport::available_ports().unwrap_or_default() {
        let p = PortInfo::from(info);
        if p.bluetooth {
            map.entry(p.name.clone()).or_insert(p);
        }
    }

    // Bound rfcomm devices are not always reported by the enumeration API
    #[cfg(target_os = "linux")]
    if let Ok(entries) = fs::read_dir("/dev") {
        for entry in entries.flatten() {
            if let Some(fname) = entry.file_name().to_str() {
                if fname.starts_with("rfcomm") {
                    let full = format!("/dev/{}", fname);
                    map.entry(full.clone()).or_insert_with(|| PortInfo {
                        name: full,
                        bluetooth: true,
                        product: None,
                    });
                }
            }
        }
    }

    let mut v: Vec<PortInfo> = map.into_values().collect();
    v.sort_by_key(|p| port_sort_key(&p.name));
    v
}

/// Port to open: the fixed one, else the first Bluetooth port found
///
/// Finding none means the adapter is unpaired or powered off, which is a
/// connection failure rather than a missing Bluetooth capability.
fn select_port(fixed: Option<&str>, ports: &[PortInfo]) -> Result<String, ProtocolError> {
    if let Some(name) = fixed {
        return Ok(name.to_string());
    }
    ports.first().map(|p| p.name.clone()).ok_or_else(|| {
        ProtocolError::ConnectionFailed(
            "No paired Bluetooth adapter found. Is it powered on?".to_string(),
        )
    })
}

/// Adapter reached through a serial port
pub struct SerialTransport {
    name: String,
    writer: Option<WriteHalf<SerialStream>>,
    reader_task: Option<JoinHandle<()>>,
}

impl SerialTransport {
    /// Open `port_name` and start forwarding received text
    pub fn open(port_name: &str, baud_rate: u32) -> Result<TransportLink, ProtocolError> {
        let stream = tokio_serial::new(port_name, baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()
            .map_err(|e| ProtocolError::ConnectionFailed(format!("{port_name}: {e}")))?;

        let (reader, writer) = tokio::io::split(stream);
        let (tx, events) = mpsc::unbounded_channel();
        let reader_task = tokio::spawn(read_loop(port_name.to_string(), reader, tx));

        tracing::info!("Opened {} at {} baud", port_name, baud_rate);

        Ok(TransportLink {
            transport: Box::new(SerialTransport {
                name: port_name.to_string(),
                writer: Some(writer),
                reader_task: Some(reader_task),
            }),
            events,
        })
    }
}

async fn read_loop(
    name: String,
    mut reader: ReadHalf<SerialStream>,
    tx: mpsc::UnboundedSender<TransportEvent>,
) {
    let mut buf = [0u8; 512];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => {
                tracing::warn!("{}: end of stream", name);
                break;
            }
            Ok(n) => {
                let text = String::from_utf8_lossy(&buf[..n]).into_owned();
                if tx.send(TransportEvent::Data(text)).is_err() {
                    // Nobody is listening any more
                    return;
                }
            }
            Err(e) => {
                tracing::warn!("{}: read error: {}", name, e);
                break;
            }
        }
    }
    let _ = tx.send(TransportEvent::Disconnected);
}

#[async_trait]
impl Transport for SerialTransport {
    fn name(&self) -> &str {
        &self.name
    }

    async fn write(&mut self, bytes: &[u8]) -> Result<(), ProtocolError> {
        let writer = self.writer.as_mut().ok_or(ProtocolError::NotConnected)?;
        writer
            .write_all(bytes)
            .await
            .map_err(|e| ProtocolError::WriteFailed(e.to_string()))?;
        writer
            .flush()
            .await
            .map_err(|e| ProtocolError::WriteFailed(e.to_string()))
    }

    async fn close(&mut self) {
        if let Some(task) = self.reader_task.take() {
            task.abort();
        }
        if let Some(mut writer) = self.writer.take() {
            let _ = writer.shutdown().await;
        }
        tracing::info!("Closed {}", self.name);
    }
}

/// Discovers Bluetooth serial ports
#[derive(Debug, Clone)]
pub struct SerialProvider {
    /// Fixed port; when unset the first Bluetooth port found is used
    pub port_name: Option<String>,
    pub baud_rate: u32,
}

impl SerialProvider {
    pub fn new(port_name: Option<String>, baud_rate: u32) -> Self {
        Self {
            port_name,
            baud_rate,
        }
    }
}

#[async_trait]
impl TransportProvider for SerialProvider {
    async fn open(&self, _filter: &DeviceFilter) -> Result<TransportLink, ProtocolError> {
        // Service filtering happens at pairing time for SPP devices
        let ports = match self.port_name {
            Some(_) => Vec::new(),
            None => list_bluetooth_ports(),
        };
        let port = select_port(self.port_name.as_deref(), &ports)?;
        SerialTransport::open(&port, self.baud_rate)
    }
}

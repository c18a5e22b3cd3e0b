//! Transport abstraction
//!
//! A transport moves command bytes to the adapter and delivers whatever text
//! the adapter sends back as an ordered stream of [`TransportEvent`]s. No
//! framing is promised: a reply may be split over several `Data` events or
//! several replies may share one.

use async_trait::async_trait;
use tokio::sync::mpsc;
use uuid::Uuid;

use super::ProtocolError;

/// Bluetooth Serial Port Profile service
pub const SPP_SERVICE: Uuid = Uuid::from_u128(0x00001101_0000_1000_8000_00805f9b34fb);

/// Service and characteristics used by BLE OBD dongles
pub const BLE_OBD_SERVICE: u16 = 0xFFF0;
pub const BLE_NOTIFY_CHARACTERISTIC: u16 = 0xFFF1;
pub const BLE_WRITE_CHARACTERISTIC: u16 = 0xFFF2;

/// Expand a 16-bit Bluetooth SIG identifier to a full UUID
pub const fn ble_uuid(short: u16) -> Uuid {
    Uuid::from_u128(((short as u128) << 96) | 0x0000_0000_0000_1000_8000_00805f9b34fb)
}

/// Something the transport observed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Raw text as received
    Data(String),
    /// The link went away without being closed by us
    Disconnected,
}

/// Capability filter for device discovery
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceFilter {
    /// Accept devices exposing any of these services
    pub services: Vec<Uuid>,
    /// Characteristic commands are written to
    pub write_characteristic: Uuid,
    /// Characteristic replies are notified on
    pub notify_characteristic: Uuid,
}

impl Default for DeviceFilter {
    fn default() -> Self {
        Self {
            services: vec![SPP_SERVICE, ble_uuid(BLE_OBD_SERVICE)],
            write_characteristic: ble_uuid(BLE_WRITE_CHARACTERISTIC),
            notify_characteristic: ble_uuid(BLE_NOTIFY_CHARACTERISTIC),
        }
    }
}

/// Byte-level channel to an adapter
#[async_trait]
pub trait Transport: Send {
    /// Name of the attached device
    fn name(&self) -> &str;

    /// Write raw bytes
    ///
    /// Fails with `NotConnected` after [`Transport::close`], and with
    /// `WriteFailed` when the link rejects the write.
    async fn write(&mut self, bytes: &[u8]) -> Result<(), ProtocolError>;

    /// Release the handle
    async fn close(&mut self);
}

/// An opened transport and the stream of events it produces
pub struct TransportLink {
    pub transport: Box<dyn Transport>,
    pub events: mpsc::UnboundedReceiver<TransportEvent>,
}

impl std::fmt::Debug for TransportLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportLink")
            .field("transport", &self.transport.name())
            .finish()
    }
}

/// Device discovery and pairing
#[async_trait]
pub trait TransportProvider: Send + Sync {
    /// Pick a device matching `filter` and open it
    ///
    /// Errors: `NoTransportAvailable` when the platform has no usable
    /// Bluetooth capability, `UserCancelled` when selection was dismissed,
    /// `ConnectionFailed` when the device could not be opened.
    async fn open(&self, filter: &DeviceFilter) -> Result<TransportLink, ProtocolError>;
}

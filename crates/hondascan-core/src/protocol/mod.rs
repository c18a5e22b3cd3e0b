//! Adapter Protocol
//!
//! Talks to ELM327-class adapters over a Bluetooth serial link: transport,
//! response framing, the command engine, the connection state machine and
//! the polling loop.

pub mod commands;
mod connection;
mod engine;
mod error;
pub mod framer;
pub mod mock;
pub mod poller;
pub mod serial;
pub mod transport;

pub use commands::{Command, Pid};
pub use connection::{Scanner, DEFAULT_ADAPTER_VERSION};
pub use error::ProtocolError;
pub use framer::{Frame, ResponseFramer};
pub use serial::{list_bluetooth_ports, PortInfo, SerialProvider};
pub use transport::{DeviceFilter, Transport, TransportEvent, TransportLink, TransportProvider};

/// Default baud rate for Bluetooth serial adapters
pub const DEFAULT_BAUD_RATE: u32 = 38400;

/// Default timeout for awaited replies in milliseconds
pub const DEFAULT_TIMEOUT_MS: u64 = 2000;

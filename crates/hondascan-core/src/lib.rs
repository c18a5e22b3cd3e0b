//! # HondaScan Core Library
//!
//! Adapter communication and response decoding for the HondaScan diagnostic
//! dashboard.

#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

//!
//! This library provides:
//! - ELM327 adapter initialization and ECU probing (standard OBD-II or the
//!   Honda K-Line dynamic table)
//! - Framing of fragmented adapter replies
//! - PID decoding into live engine values and fault codes
//! - Periodic polling, with a simulator when no adapter is present
//! - Scan session summaries handed to a session store
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use hondascan_core::prelude::*;
//!
//! let provider: Arc<dyn TransportProvider> = Arc::new(SerialProvider::new(None, 38400));
//! let scanner = Scanner::new(
//!     ScannerConfig::default(),
//!     Some(provider),
//!     Arc::new(MemorySessionStore::new()),
//! );
//!
//! scanner.connect().await?;
//! let (_id, mut events) = scanner.subscribe();
//! while let Some(event) = events.recv().await {
//!     if let ScannerEvent::State(state) = event {
//!         println!("RPM: {}", state.rpm);
//!     }
//! }
//! ```

pub mod config;
pub mod datalog;
pub mod decoder;
pub mod demo;
pub mod dtc;
pub mod events;
pub mod protocol;
pub mod session;
pub mod state;
pub mod vehicle;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::ScannerConfig;
    pub use crate::datalog::{CommLog, Direction, LogEntry};
    pub use crate::decoder::{Decoded, PidDecoder};
    pub use crate::dtc::{DtcRecord, DtcSet};
    pub use crate::events::{Notification, ScannerEvent, Severity, SubscriptionId};
    pub use crate::protocol::{ProtocolError, Scanner, SerialProvider, TransportProvider};
    pub use crate::session::{MemorySessionStore, ScanSession, SessionStore, SessionSummary};
    pub use crate::state::{ConnectionStatus, EcuProtocol, LinkPhase, PhysicalState};
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

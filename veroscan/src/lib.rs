//! # veroscan
//!
//! Host-side protocol engine for Vero multi-chip fingerprint scanners.
//!
//! ## Features
//!
//! - Packet framing with checksum and resynchronisation
//! - One request in flight per channel, concurrent across channels
//! - Typed per-channel event streams
//! - Root/main mode tracking
//! - Chunked firmware updates with progress and cancellation
//!
//! ## Quick Start
//!
//! ```no_run
//! use veroscan::Scanner;
//!
//! # async fn run(link: tokio::io::DuplexStream) -> veroscan::Result<()> {
//! let scanner = Scanner::new();
//! scanner.connect(link).await?;
//!
//! let battery = scanner.battery_info().await?;
//! println!("{}", battery);
//!
//! scanner.disconnect().await?;
//! # Ok(())
//! # }
//! ```

pub mod bus;
pub mod config;
pub mod correlator;
pub mod error;
pub mod ota;
pub mod scanner;

// Re-exports
pub use bus::{Inbound, MessageBus, MessageKind, Subscription};
pub use config::{OtaConfig, ScannerConfig};
pub use error::{Error, Result};
pub use ota::{OtaEvent, OtaFailure, OtaHandle};
pub use scanner::Scanner;

// Re-export types
pub use veroscan_core::{Channel, DecodeFault, DeviceMode, IncomingMessage, OutgoingMessage};
pub use veroscan_transport::StatsSnapshot;
pub use veroscan_types::{BatteryInfo, Chip, ExtendedVersion, ExtendedVersionInformation, OtaProgress, OtaReport, OtaState};

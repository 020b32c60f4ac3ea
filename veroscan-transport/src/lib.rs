//! Link plumbing for Vero scanners
//!
//! The link itself (serial port, Bluetooth socket, TCP bridge) is supplied
//! by the caller as any `AsyncRead + AsyncWrite` stream. This crate splits
//! it into a packet router on the read side and a serialised writer on the
//! write side.

pub mod error;
pub mod router;
pub mod writer;

pub use error::{Error, Result};
pub use router::{ChannelQueues, PacketRouter, RouterConfig, RouterHandle, RouterStats, StatsSnapshot};
pub use writer::PacketWriter;

use async_trait::async_trait;
use veroscan_core::Packet;

/// Outbound side of the link
#[async_trait]
pub trait PacketSink: Send + Sync {
    /// Write `packets` back to back, with nothing from other callers in
    /// between
    async fn send_packets(&self, packets: Vec<Packet>) -> Result<()>;
}

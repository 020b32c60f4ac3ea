//! # veroscan-core
//!
//! Core protocol implementation for Vero fingerprint scanners.
//!
//! This crate provides the low-level protocol primitives:
//! - Channel tags and packet framing
//! - Packet checksum calculation
//! - Message families (commands, responses, events) and their wire layout
//! - Per-channel message accumulation
//! - Device mode tracking

pub mod accumulator;
pub mod channel;
pub mod checksum;
pub mod constants;
pub mod error;
pub mod message;
pub mod mode;
pub mod packet;

pub use accumulator::Accumulator;
pub use channel::Channel;
pub use error::{DecodeFault, DecodeFaultKind, Error, FrameError, Result};
pub use message::{IncomingMessage, OutgoingMessage, WireMessage};
pub use mode::{DeviceMode, ModeState};
pub use packet::{Decoded, Packet, PacketDecoder, packetize};

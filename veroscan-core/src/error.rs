//! Error types for veroscan-core

use crate::channel::Channel;
use crate::mode::DeviceMode;

/// Result type alias for veroscan operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core protocol errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Packet payload exceeds the frame limit
    #[error("Payload too large: {size} bytes (max: {max} bytes)")]
    PayloadTooLarge {
        size: usize,
        max: usize,
    },

    /// Message data does not fit the family's length field
    #[error("Message data too large: {size} bytes (max: {max} bytes)")]
    MessageTooLarge {
        size: usize,
        max: usize,
    },

    /// Unknown channel tag
    #[error("Unknown channel tag: 0x{0:02X}")]
    UnknownChannel(u8),

    /// Frame could not be decoded
    #[error("Frame error: {0}")]
    Frame(#[from] FrameError),

    /// Message could not be decoded
    #[error("Decode fault: {0}")]
    Decode(#[from] DecodeFault),

    /// Mode change not allowed from the current mode
    #[error("Invalid mode transition: {from} -> {to}")]
    InvalidModeTransition {
        from: DeviceMode,
        to: DeviceMode,
    },

    /// Command not valid in the current mode
    #[error("Command requires {required} mode, device is in {current} mode")]
    WrongMode {
        required: DeviceMode,
        current: DeviceMode,
    },

    /// Domain model error
    #[error("Type error: {0}")]
    Types(#[from] veroscan_types::Error),
}

impl Error {
    /// Check if error is local to one frame or message (the stream can continue)
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Frame(_) | Self::Decode(_))
    }
}

/// Packet framing errors
///
/// These never reach callers individually: the decoder skips the offending
/// bytes and the router counts them.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    /// First byte is not the start marker
    #[error("Expected start marker 0x{expected:02X}, found 0x{found:02X}")]
    BadStartMarker {
        expected: u8,
        found: u8,
    },

    /// Declared payload length above the frame limit
    #[error("Declared length {declared} exceeds maximum payload {max}")]
    LengthTooLarge {
        declared: usize,
        max: usize,
    },

    /// Checksum verification failed
    #[error("Checksum mismatch: expected 0x{expected:02X}, received 0x{received:02X}")]
    ChecksumMismatch {
        expected: u8,
        received: u8,
    },

    /// Intact frame addressed to an unknown channel
    #[error("Unknown channel tag: 0x{0:02X}")]
    UnknownChannel(u8),
}

/// A message on `channel` could not be parsed
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind} (channel {channel})")]
pub struct DecodeFault {
    pub channel: Channel,
    pub kind: DecodeFaultKind,
}

impl DecodeFault {
    pub fn new(channel: Channel, kind: DecodeFaultKind) -> Self {
        Self { channel, kind }
    }
}

/// Why a message failed to parse
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeFaultKind {
    /// Discriminator not part of the family
    #[error("Unknown message type 0x{0:02X}")]
    UnknownMessageType(u8),

    /// Known discriminator, payload does not match its layout
    #[error("Malformed payload for message type 0x{message_type:02X}: {reason}")]
    MalformedPayload {
        message_type: u8,
        reason: String,
    },

    /// Declared message length above the family limit
    #[error("Declared message length {declared} exceeds maximum {max}")]
    Oversized {
        declared: usize,
        max: usize,
    },
}

impl DecodeFaultKind {
    pub(crate) fn malformed(message_type: u8, reason: impl Into<String>) -> Self {
        Self::MalformedPayload {
            message_type,
            reason: reason.into(),
        }
    }
}

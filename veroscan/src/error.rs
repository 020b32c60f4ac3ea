//! High-level error types

use std::time::Duration;

use veroscan_core::Channel;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Core protocol error: {0}")]
    Core(#[from] veroscan_core::Error),

    #[error("Transport error: {0}")]
    Transport(#[from] veroscan_transport::Error),

    #[error("Type error: {0}")]
    Types(#[from] veroscan_types::Error),

    #[error("Scanner not connected")]
    NotConnected,

    #[error("Scanner already connected")]
    AlreadyConnected,

    /// The link went away while waiting on `channel`
    #[error("Disconnected while waiting on {channel}")]
    Disconnected { channel: Channel },

    #[error("No response on {channel} within {timeout:?}")]
    Timeout { channel: Channel, timeout: Duration },

    /// Only one request may be outstanding per channel
    #[error("A request is already pending on {channel}")]
    RequestInFlight { channel: Channel },

    #[error("Message belongs on {expected}, not {actual}")]
    ChannelMismatch { expected: Channel, actual: Channel },

    #[error("Unexpected response from scanner: {0}")]
    UnexpectedResponse(String),

    /// Scanner answered with a non-zero operation status
    #[error("{operation} failed with status 0x{status:02X}")]
    OperationFailed { operation: &'static str, status: u8 },

    #[error("Firmware update already in progress")]
    OtaInProgress,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl Error {
    /// Check if retrying the same request may succeed
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Timeout { .. } | Self::RequestInFlight { .. } => true,
            Self::Core(e) => e.is_recoverable(),
            _ => false,
        }
    }

    /// Check if the link must be re-established before anything else works
    pub fn requires_reconnect(&self) -> bool {
        match self {
            Self::NotConnected | Self::Disconnected { .. } => true,
            Self::Transport(e) => e.is_disconnect(),
            _ => false,
        }
    }
}

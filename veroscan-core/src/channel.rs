//! Logical channels multiplexed over the scanner link

use std::fmt;

use crate::error::{Error, Result};
use crate::mode::DeviceMode;

/// Logical endpoint carried in every packet header
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Channel {
    /// Main controller commands and responses
    VeroServer = 0x10,

    /// Main controller asynchronous events
    VeroEvent = 0x11,

    /// Sensor chip commands and responses
    Un20Server = 0x20,

    /// Bootloader commands and responses
    Root = 0x30,
}

impl Channel {
    /// All channels the host listens on
    pub const ALL: [Channel; 4] = [
        Channel::VeroServer,
        Channel::VeroEvent,
        Channel::Un20Server,
        Channel::Root,
    ];

    /// Channel tag as it appears on the wire
    pub fn tag(self) -> u8 {
        self as u8
    }

    /// Mode the device must be in for traffic on this channel
    pub fn mode(self) -> DeviceMode {
        match self {
            Self::Root => DeviceMode::Root,
            Self::VeroServer | Self::VeroEvent | Self::Un20Server => DeviceMode::Main,
        }
    }

    /// Get channel name
    pub fn name(self) -> &'static str {
        match self {
            Self::VeroServer => "VERO_SERVER",
            Self::VeroEvent => "VERO_EVENT",
            Self::Un20Server => "UN20_SERVER",
            Self::Root => "ROOT",
        }
    }
}

impl From<Channel> for u8 {
    fn from(channel: Channel) -> u8 {
        channel as u8
    }
}

impl TryFrom<u8> for Channel {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0x10 => Ok(Self::VeroServer),
            0x11 => Ok(Self::VeroEvent),
            0x20 => Ok(Self::Un20Server),
            0x30 => Ok(Self::Root),
            _ => Err(Error::UnknownChannel(value)),
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(0x{:02X})", self.name(), self.tag())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_conversion() {
        for channel in Channel::ALL {
            assert_eq!(Channel::try_from(channel.tag()).unwrap(), channel);
        }
    }

    #[test]
    fn test_unknown_channel() {
        assert!(matches!(Channel::try_from(0x42), Err(Error::UnknownChannel(0x42))));
    }

    #[test]
    fn test_channel_mode() {
        assert_eq!(Channel::Root.mode(), DeviceMode::Root);
        assert_eq!(Channel::Un20Server.mode(), DeviceMode::Main);
    }
}

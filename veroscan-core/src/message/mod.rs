//! Message families and their wire layout
//!
//! Every channel carries one family of messages. A message starts with a
//! family-specific header naming its type and data length, followed by the
//! type-specific data:
//!
//! ```text
//! Short (Vero, Root):  [type u8][reserved u8][data length u16 LE][data]
//! Long  (Un20):        [type u8][minor u8   ][data length u32 LE][data]
//! ```
//!
//! Responses reuse the type code of the command they answer.

pub mod root;
pub mod un20;
pub mod vero;

use std::fmt;

use byteorder::{ByteOrder, LittleEndian, ReadBytesExt};
use bytes::{BufMut, Bytes, BytesMut};
use veroscan_types::{Chip, ExtendedVersion};

use crate::channel::Channel;
use crate::constants::{MAX_UN20_MESSAGE_SIZE, status};
use crate::error::{DecodeFaultKind, Error, Result};
use crate::mode::DeviceMode;

pub use root::{RootCommand, RootMessageType, RootResponse};
pub use un20::{Un20Command, Un20MessageType, Un20Response};
pub use vero::{VeroCommand, VeroEvent, VeroMessageType, VeroResponse};

/// Header layout shared by a message family
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderLayout {
    /// 4 bytes, u16 data length
    Short,

    /// 6 bytes, u32 data length
    Long,
}

/// Parsed message header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader {
    pub message_type: u8,
    pub minor_type: u8,
    pub data_len: usize,
}

impl HeaderLayout {
    /// Header size in bytes
    pub const fn size(self) -> usize {
        match self {
            Self::Short => 4,
            Self::Long => 6,
        }
    }

    /// Largest data length a message of this family may declare
    pub const fn max_data_len(self) -> usize {
        match self {
            Self::Short => u16::MAX as usize,
            Self::Long => MAX_UN20_MESSAGE_SIZE - 6,
        }
    }

    /// Largest complete message of this family
    pub const fn max_message_size(self) -> usize {
        self.size() + self.max_data_len()
    }

    /// Parse the header at the start of `buf`, or `None` if it is incomplete
    pub fn parse(self, buf: &[u8]) -> Option<MessageHeader> {
        if buf.len() < self.size() {
            return None;
        }

        let data_len = match self {
            Self::Short => LittleEndian::read_u16(&buf[2..4]) as usize,
            Self::Long => LittleEndian::read_u32(&buf[2..6]) as usize,
        };

        Some(MessageHeader {
            message_type: buf[0],
            minor_type: buf[1],
            data_len,
        })
    }

    fn write(self, header: &MessageHeader, buf: &mut BytesMut) {
        buf.put_u8(header.message_type);
        buf.put_u8(header.minor_type);

        match self {
            Self::Short => buf.put_u16_le(header.data_len as u16),
            Self::Long => buf.put_u32_le(header.data_len as u32),
        }
    }
}

/// A message that can be written to and parsed from its channel
pub trait WireMessage: Sized {
    /// Header layout of the family
    const LAYOUT: HeaderLayout;

    /// Message type code (discriminator)
    fn message_type(&self) -> u8;

    /// Second header byte
    fn minor_type(&self) -> u8 {
        0
    }

    /// Append the type-specific data
    fn encode_data(&self, buf: &mut BytesMut);

    /// Parse the type-specific data of a message with `header`
    fn decode_data(header: &MessageHeader, data: &[u8]) -> std::result::Result<Self, DecodeFaultKind>;

    /// Encode header and data
    ///
    /// # Errors
    ///
    /// Returns [`Error::MessageTooLarge`] when the data does not fit the
    /// family's length field.
    fn encode(&self) -> Result<Bytes> {
        let mut data = BytesMut::new();
        self.encode_data(&mut data);

        if data.len() > Self::LAYOUT.max_data_len() {
            return Err(Error::MessageTooLarge {
                size: data.len(),
                max: Self::LAYOUT.max_data_len(),
            });
        }

        let header = MessageHeader {
            message_type: self.message_type(),
            minor_type: self.minor_type(),
            data_len: data.len(),
        };

        let mut buf = BytesMut::with_capacity(Self::LAYOUT.size() + data.len());
        Self::LAYOUT.write(&header, &mut buf);
        buf.put_slice(&data);

        Ok(buf.freeze())
    }

    /// Decode one complete message (header included)
    fn decode(bytes: &[u8]) -> std::result::Result<Self, DecodeFaultKind> {
        let header = Self::LAYOUT.parse(bytes).ok_or_else(|| {
            DecodeFaultKind::malformed(bytes.first().copied().unwrap_or(0), "truncated header")
        })?;

        let data = &bytes[Self::LAYOUT.size()..];
        if data.len() != header.data_len {
            return Err(DecodeFaultKind::malformed(
                header.message_type,
                format!("declared {} data bytes, got {}", header.data_len, data.len()),
            ));
        }

        Self::decode_data(&header, data)
    }
}

/// Single-byte outcome of a device operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationResult {
    Ok,
    Failed(u8),
}

impl OperationResult {
    pub fn from_u8(value: u8) -> Self {
        match value {
            status::OK => Self::Ok,
            other => Self::Failed(other),
        }
    }

    pub fn to_u8(self) -> u8 {
        match self {
            Self::Ok => status::OK,
            Self::Failed(code) => code,
        }
    }

    pub fn is_ok(self) -> bool {
        matches!(self, Self::Ok)
    }
}

/// Cursor over message data that turns short reads into decode faults
pub(crate) struct DataReader<'a> {
    message_type: u8,
    data: &'a [u8],
}

impl<'a> DataReader<'a> {
    pub(crate) fn new(header: &MessageHeader, data: &'a [u8]) -> Self {
        Self {
            message_type: header.message_type,
            data,
        }
    }

    fn truncated(&self, what: &str) -> DecodeFaultKind {
        DecodeFaultKind::malformed(self.message_type, format!("truncated {}", what))
    }

    pub(crate) fn u8(&mut self) -> std::result::Result<u8, DecodeFaultKind> {
        self.data.read_u8().map_err(|_| self.truncated("u8"))
    }

    pub(crate) fn u16(&mut self) -> std::result::Result<u16, DecodeFaultKind> {
        self.data
            .read_u16::<LittleEndian>()
            .map_err(|_| self.truncated("u16"))
    }

    pub(crate) fn i16(&mut self) -> std::result::Result<i16, DecodeFaultKind> {
        self.data
            .read_i16::<LittleEndian>()
            .map_err(|_| self.truncated("i16"))
    }

    pub(crate) fn u32(&mut self) -> std::result::Result<u32, DecodeFaultKind> {
        self.data
            .read_u32::<LittleEndian>()
            .map_err(|_| self.truncated("u32"))
    }

    pub(crate) fn bool(&mut self) -> std::result::Result<bool, DecodeFaultKind> {
        match self.u8()? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(DecodeFaultKind::malformed(
                self.message_type,
                format!("invalid boolean 0x{:02X}", other),
            )),
        }
    }

    pub(crate) fn chip(&mut self) -> std::result::Result<Chip, DecodeFaultKind> {
        let code = self.u8()?;
        Chip::try_from(code).map_err(|e| DecodeFaultKind::malformed(self.message_type, e.to_string()))
    }

    /// u8 length-prefixed UTF-8 string
    pub(crate) fn version(&mut self) -> std::result::Result<ExtendedVersion, DecodeFaultKind> {
        let len = self.u8()? as usize;
        if self.data.len() < len {
            return Err(self.truncated("version string"));
        }

        let (raw, rest) = self.data.split_at(len);
        self.data = rest;

        let text = std::str::from_utf8(raw).map_err(|_| {
            DecodeFaultKind::malformed(self.message_type, "version string is not UTF-8")
        })?;

        ExtendedVersion::new(text).map_err(|e| DecodeFaultKind::malformed(self.message_type, e.to_string()))
    }

    /// Everything left
    pub(crate) fn rest(&mut self) -> Bytes {
        let rest = Bytes::copy_from_slice(self.data);
        self.data = &[];
        rest
    }

    /// Fail if unread bytes remain
    pub(crate) fn finish(self) -> std::result::Result<(), DecodeFaultKind> {
        if self.data.is_empty() {
            Ok(())
        } else {
            Err(DecodeFaultKind::malformed(
                self.message_type,
                format!("{} unexpected trailing bytes", self.data.len()),
            ))
        }
    }
}

pub(crate) fn put_version(buf: &mut BytesMut, version: &ExtendedVersion) {
    // ExtendedVersion guarantees the length fits the prefix
    buf.put_u8(version.as_str().len() as u8);
    buf.put_slice(version.as_str().as_bytes());
}

/// Any message the host can receive
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IncomingMessage {
    VeroResponse(VeroResponse),
    VeroEvent(VeroEvent),
    Un20Response(Un20Response),
    RootResponse(RootResponse),
}

impl IncomingMessage {
    /// Channel the message arrives on
    pub fn channel(&self) -> Channel {
        match self {
            Self::VeroResponse(_) => Channel::VeroServer,
            Self::VeroEvent(_) => Channel::VeroEvent,
            Self::Un20Response(_) => Channel::Un20Server,
            Self::RootResponse(_) => Channel::Root,
        }
    }

    /// Message type code
    pub fn message_type(&self) -> u8 {
        match self {
            Self::VeroResponse(m) => m.message_type(),
            Self::VeroEvent(m) => m.message_type(),
            Self::Un20Response(m) => m.message_type(),
            Self::RootResponse(m) => m.message_type(),
        }
    }

    /// Encode header and data (device side)
    pub fn encode(&self) -> Result<Bytes> {
        match self {
            Self::VeroResponse(m) => m.encode(),
            Self::VeroEvent(m) => m.encode(),
            Self::Un20Response(m) => m.encode(),
            Self::RootResponse(m) => m.encode(),
        }
    }
}

impl From<VeroResponse> for IncomingMessage {
    fn from(message: VeroResponse) -> Self {
        Self::VeroResponse(message)
    }
}

impl From<VeroEvent> for IncomingMessage {
    fn from(message: VeroEvent) -> Self {
        Self::VeroEvent(message)
    }
}

impl From<Un20Response> for IncomingMessage {
    fn from(message: Un20Response) -> Self {
        Self::Un20Response(message)
    }
}

impl From<RootResponse> for IncomingMessage {
    fn from(message: RootResponse) -> Self {
        Self::RootResponse(message)
    }
}

impl fmt::Display for IncomingMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[0x{:02X}]", self.channel().name(), self.message_type())
    }
}

/// Any command the host can send
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutgoingMessage {
    Vero(VeroCommand),
    Un20(Un20Command),
    Root(RootCommand),
}

impl OutgoingMessage {
    /// Channel the command is sent on
    pub fn channel(&self) -> Channel {
        match self {
            Self::Vero(_) => Channel::VeroServer,
            Self::Un20(_) => Channel::Un20Server,
            Self::Root(_) => Channel::Root,
        }
    }

    /// Message type code
    pub fn message_type(&self) -> u8 {
        match self {
            Self::Vero(m) => m.message_type(),
            Self::Un20(m) => m.message_type(),
            Self::Root(m) => m.message_type(),
        }
    }

    /// Mode the device must be in to understand this command
    pub fn required_mode(&self) -> DeviceMode {
        self.channel().mode()
    }

    /// Encode header and data
    pub fn encode(&self) -> Result<Bytes> {
        match self {
            Self::Vero(m) => m.encode(),
            Self::Un20(m) => m.encode(),
            Self::Root(m) => m.encode(),
        }
    }
}

impl From<VeroCommand> for OutgoingMessage {
    fn from(command: VeroCommand) -> Self {
        Self::Vero(command)
    }
}

impl From<Un20Command> for OutgoingMessage {
    fn from(command: Un20Command) -> Self {
        Self::Un20(command)
    }
}

impl From<RootCommand> for OutgoingMessage {
    fn from(command: RootCommand) -> Self {
        Self::Root(command)
    }
}

impl fmt::Display for OutgoingMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[0x{:02X}]", self.channel().name(), self.message_type())
    }
}

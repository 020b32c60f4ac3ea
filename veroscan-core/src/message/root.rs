//! Bootloader messages (Root channel)

use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};
use veroscan_types::{Chip, ExtendedVersionInformation};

use super::{DataReader, HeaderLayout, MessageHeader, OperationResult, WireMessage, put_version};
use crate::error::DecodeFaultKind;

type DecodeResult<T> = std::result::Result<T, DecodeFaultKind>;

/// Bootloader message type codes
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum RootMessageType {
    EnterMainMode = 0x10,
    GetExtendedVersion = 0x20,
    SetExtendedVersion = 0x21,
    StartOta = 0x30,
    WriteOtaChunk = 0x31,
    VerifyOta = 0x32,
}

impl RootMessageType {
    pub fn name(self) -> &'static str {
        match self {
            Self::EnterMainMode => "ENTER_MAIN_MODE",
            Self::GetExtendedVersion => "GET_EXTENDED_VERSION",
            Self::SetExtendedVersion => "SET_EXTENDED_VERSION",
            Self::StartOta => "START_OTA",
            Self::WriteOtaChunk => "WRITE_OTA_CHUNK",
            Self::VerifyOta => "VERIFY_OTA",
        }
    }
}

impl From<RootMessageType> for u8 {
    fn from(kind: RootMessageType) -> u8 {
        kind as u8
    }
}

impl TryFrom<u8> for RootMessageType {
    type Error = DecodeFaultKind;

    fn try_from(value: u8) -> DecodeResult<Self> {
        match value {
            0x10 => Ok(Self::EnterMainMode),
            0x20 => Ok(Self::GetExtendedVersion),
            0x21 => Ok(Self::SetExtendedVersion),
            0x30 => Ok(Self::StartOta),
            0x31 => Ok(Self::WriteOtaChunk),
            0x32 => Ok(Self::VerifyOta),
            other => Err(DecodeFaultKind::UnknownMessageType(other)),
        }
    }
}

impl fmt::Display for RootMessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(0x{:02X})", self.name(), *self as u8)
    }
}

/// Commands sent to the bootloader
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RootCommand {
    EnterMainMode,
    GetExtendedVersion,
    SetExtendedVersion(ExtendedVersionInformation),

    /// Announce an image of `total_bytes` for `chip`
    StartOta { chip: Chip, total_bytes: u32 },

    /// Image bytes starting at `offset`
    WriteOtaChunk { chip: Chip, offset: u32, data: Bytes },

    /// Ask for the CRC-32 of the received image
    VerifyOta { chip: Chip },
}

impl RootCommand {
    pub fn kind(&self) -> RootMessageType {
        match self {
            Self::EnterMainMode => RootMessageType::EnterMainMode,
            Self::GetExtendedVersion => RootMessageType::GetExtendedVersion,
            Self::SetExtendedVersion(_) => RootMessageType::SetExtendedVersion,
            Self::StartOta { .. } => RootMessageType::StartOta,
            Self::WriteOtaChunk { .. } => RootMessageType::WriteOtaChunk,
            Self::VerifyOta { .. } => RootMessageType::VerifyOta,
        }
    }
}

fn put_version_information(buf: &mut BytesMut, info: &ExtendedVersionInformation) {
    put_version(buf, &info.cypress_firmware);
    put_version(buf, &info.stm_firmware);
    put_version(buf, &info.un20_app);
    put_version(buf, &info.hardware_version);
}

fn read_version_information(reader: &mut DataReader<'_>) -> DecodeResult<ExtendedVersionInformation> {
    Ok(ExtendedVersionInformation {
        cypress_firmware: reader.version()?,
        stm_firmware: reader.version()?,
        un20_app: reader.version()?,
        hardware_version: reader.version()?,
    })
}

impl WireMessage for RootCommand {
    const LAYOUT: HeaderLayout = HeaderLayout::Short;

    fn message_type(&self) -> u8 {
        self.kind().into()
    }

    fn encode_data(&self, buf: &mut BytesMut) {
        match self {
            Self::EnterMainMode | Self::GetExtendedVersion => {}
            Self::SetExtendedVersion(info) => put_version_information(buf, info),
            Self::StartOta { chip, total_bytes } => {
                buf.put_u8((*chip).into());
                buf.put_u32_le(*total_bytes);
            }
            Self::WriteOtaChunk { chip, offset, data } => {
                buf.put_u8((*chip).into());
                buf.put_u32_le(*offset);
                buf.put_slice(data);
            }
            Self::VerifyOta { chip } => buf.put_u8((*chip).into()),
        }
    }

    fn decode_data(header: &MessageHeader, data: &[u8]) -> DecodeResult<Self> {
        let mut reader = DataReader::new(header, data);

        let command = match RootMessageType::try_from(header.message_type)? {
            RootMessageType::EnterMainMode => Self::EnterMainMode,
            RootMessageType::GetExtendedVersion => Self::GetExtendedVersion,
            RootMessageType::SetExtendedVersion => {
                Self::SetExtendedVersion(read_version_information(&mut reader)?)
            }
            RootMessageType::StartOta => Self::StartOta {
                chip: reader.chip()?,
                total_bytes: reader.u32()?,
            },
            RootMessageType::WriteOtaChunk => Self::WriteOtaChunk {
                chip: reader.chip()?,
                offset: reader.u32()?,
                data: reader.rest(),
            },
            RootMessageType::VerifyOta => Self::VerifyOta { chip: reader.chip()? },
        };

        reader.finish()?;
        Ok(command)
    }
}

/// Responses from the bootloader
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RootResponse {
    EnterMainMode,
    GetExtendedVersion(ExtendedVersionInformation),
    SetExtendedVersion,
    StartOta(OperationResult),

    /// `bytes_acknowledged` counts every image byte stored so far
    WriteOtaChunk {
        result: OperationResult,
        bytes_acknowledged: u32,
    },

    VerifyOta { crc32: u32 },
}

impl RootResponse {
    pub fn kind(&self) -> RootMessageType {
        match self {
            Self::EnterMainMode => RootMessageType::EnterMainMode,
            Self::GetExtendedVersion(_) => RootMessageType::GetExtendedVersion,
            Self::SetExtendedVersion => RootMessageType::SetExtendedVersion,
            Self::StartOta(_) => RootMessageType::StartOta,
            Self::WriteOtaChunk { .. } => RootMessageType::WriteOtaChunk,
            Self::VerifyOta { .. } => RootMessageType::VerifyOta,
        }
    }
}

impl WireMessage for RootResponse {
    const LAYOUT: HeaderLayout = HeaderLayout::Short;

    fn message_type(&self) -> u8 {
        self.kind().into()
    }

    fn encode_data(&self, buf: &mut BytesMut) {
        match self {
            Self::EnterMainMode | Self::SetExtendedVersion => {}
            Self::GetExtendedVersion(info) => put_version_information(buf, info),
            Self::StartOta(result) => buf.put_u8(result.to_u8()),
            Self::WriteOtaChunk {
                result,
                bytes_acknowledged,
            } => {
                buf.put_u8(result.to_u8());
                buf.put_u32_le(*bytes_acknowledged);
            }
            Self::VerifyOta { crc32 } => buf.put_u32_le(*crc32),
        }
    }

    fn decode_data(header: &MessageHeader, data: &[u8]) -> DecodeResult<Self> {
        let mut reader = DataReader::new(header, data);

        let response = match RootMessageType::try_from(header.message_type)? {
            RootMessageType::EnterMainMode => Self::EnterMainMode,
            RootMessageType::GetExtendedVersion => {
                Self::GetExtendedVersion(read_version_information(&mut reader)?)
            }
            RootMessageType::SetExtendedVersion => Self::SetExtendedVersion,
            RootMessageType::StartOta => Self::StartOta(OperationResult::from_u8(reader.u8()?)),
            RootMessageType::WriteOtaChunk => Self::WriteOtaChunk {
                result: OperationResult::from_u8(reader.u8()?),
                bytes_acknowledged: reader.u32()?,
            },
            RootMessageType::VerifyOta => Self::VerifyOta { crc32: reader.u32()? },
        };

        reader.finish()?;
        Ok(response)
    }
}

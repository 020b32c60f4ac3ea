//! Sensor chip messages (Un20Server channel)
//!
//! Un20 messages use the long header: images and templates do not fit a u16
//! length. The minor byte selects the template type or image format.

use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};
use veroscan_types::ExtendedVersion;

use super::{DataReader, HeaderLayout, MessageHeader, WireMessage, put_version};
use crate::constants::CaptureResult;
use crate::error::DecodeFaultKind;

type DecodeResult<T> = std::result::Result<T, DecodeFaultKind>;

/// Sensor chip message type codes
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Un20MessageType {
    GetUn20ExtendedAppVersion = 0x01,
    CaptureFingerprint = 0x10,
    GetImageQualityPreview = 0x11,
    GetTemplate = 0x20,
    GetImage = 0x30,
}

impl Un20MessageType {
    pub fn name(self) -> &'static str {
        match self {
            Self::GetUn20ExtendedAppVersion => "GET_UN20_EXTENDED_APP_VERSION",
            Self::CaptureFingerprint => "CAPTURE_FINGERPRINT",
            Self::GetImageQualityPreview => "GET_IMAGE_QUALITY_PREVIEW",
            Self::GetTemplate => "GET_TEMPLATE",
            Self::GetImage => "GET_IMAGE",
        }
    }
}

impl From<Un20MessageType> for u8 {
    fn from(kind: Un20MessageType) -> u8 {
        kind as u8
    }
}

impl TryFrom<u8> for Un20MessageType {
    type Error = DecodeFaultKind;

    fn try_from(value: u8) -> DecodeResult<Self> {
        match value {
            0x01 => Ok(Self::GetUn20ExtendedAppVersion),
            0x10 => Ok(Self::CaptureFingerprint),
            0x11 => Ok(Self::GetImageQualityPreview),
            0x20 => Ok(Self::GetTemplate),
            0x30 => Ok(Self::GetImage),
            other => Err(DecodeFaultKind::UnknownMessageType(other)),
        }
    }
}

impl fmt::Display for Un20MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(0x{:02X})", self.name(), *self as u8)
    }
}

/// Commands sent to the sensor chip
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Un20Command {
    GetUn20ExtendedAppVersion,
    CaptureFingerprint { dpi: u16 },
    GetImageQualityPreview,
    GetTemplate { template_type: u8 },
    GetImage { image_format: u8 },
}

impl Un20Command {
    pub fn kind(&self) -> Un20MessageType {
        match self {
            Self::GetUn20ExtendedAppVersion => Un20MessageType::GetUn20ExtendedAppVersion,
            Self::CaptureFingerprint { .. } => Un20MessageType::CaptureFingerprint,
            Self::GetImageQualityPreview => Un20MessageType::GetImageQualityPreview,
            Self::GetTemplate { .. } => Un20MessageType::GetTemplate,
            Self::GetImage { .. } => Un20MessageType::GetImage,
        }
    }
}

impl WireMessage for Un20Command {
    const LAYOUT: HeaderLayout = HeaderLayout::Long;

    fn message_type(&self) -> u8 {
        self.kind().into()
    }

    fn minor_type(&self) -> u8 {
        match self {
            Self::GetTemplate { template_type } => *template_type,
            Self::GetImage { image_format } => *image_format,
            _ => 0,
        }
    }

    fn encode_data(&self, buf: &mut BytesMut) {
        if let Self::CaptureFingerprint { dpi } = self {
            buf.put_u16_le(*dpi);
        }
    }

    fn decode_data(header: &MessageHeader, data: &[u8]) -> DecodeResult<Self> {
        let mut reader = DataReader::new(header, data);

        let command = match Un20MessageType::try_from(header.message_type)? {
            Un20MessageType::GetUn20ExtendedAppVersion => Self::GetUn20ExtendedAppVersion,
            Un20MessageType::CaptureFingerprint => Self::CaptureFingerprint { dpi: reader.u16()? },
            Un20MessageType::GetImageQualityPreview => Self::GetImageQualityPreview,
            Un20MessageType::GetTemplate => Self::GetTemplate {
                template_type: header.minor_type,
            },
            Un20MessageType::GetImage => Self::GetImage {
                image_format: header.minor_type,
            },
        };

        reader.finish()?;
        Ok(command)
    }
}

/// Responses from the sensor chip
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Un20Response {
    GetUn20ExtendedAppVersion(ExtendedVersion),
    CaptureFingerprint(CaptureResult),

    /// `None` when no capture is available for preview
    GetImageQualityPreview { quality: Option<u8> },

    GetTemplate { template_type: u8, template: Bytes },
    GetImage { image_format: u8, image: Bytes },
}

impl Un20Response {
    pub fn kind(&self) -> Un20MessageType {
        match self {
            Self::GetUn20ExtendedAppVersion(_) => Un20MessageType::GetUn20ExtendedAppVersion,
            Self::CaptureFingerprint(_) => Un20MessageType::CaptureFingerprint,
            Self::GetImageQualityPreview { .. } => Un20MessageType::GetImageQualityPreview,
            Self::GetTemplate { .. } => Un20MessageType::GetTemplate,
            Self::GetImage { .. } => Un20MessageType::GetImage,
        }
    }
}

impl WireMessage for Un20Response {
    const LAYOUT: HeaderLayout = HeaderLayout::Long;

    fn message_type(&self) -> u8 {
        self.kind().into()
    }

    fn minor_type(&self) -> u8 {
        match self {
            Self::GetTemplate { template_type, .. } => *template_type,
            Self::GetImage { image_format, .. } => *image_format,
            _ => 0,
        }
    }

    fn encode_data(&self, buf: &mut BytesMut) {
        match self {
            Self::GetUn20ExtendedAppVersion(version) => put_version(buf, version),
            Self::CaptureFingerprint(result) => buf.put_u8(*result as u8),
            Self::GetImageQualityPreview { quality } => {
                if let Some(quality) = quality {
                    buf.put_u8(*quality);
                }
            }
            Self::GetTemplate { template, .. } => buf.put_slice(template),
            Self::GetImage { image, .. } => buf.put_slice(image),
        }
    }

    fn decode_data(header: &MessageHeader, data: &[u8]) -> DecodeResult<Self> {
        let mut reader = DataReader::new(header, data);

        let response = match Un20MessageType::try_from(header.message_type)? {
            Un20MessageType::GetUn20ExtendedAppVersion => {
                Self::GetUn20ExtendedAppVersion(reader.version()?)
            }
            Un20MessageType::CaptureFingerprint => {
                let code = reader.u8()?;
                let result = CaptureResult::from_u8(code).ok_or_else(|| {
                    DecodeFaultKind::malformed(
                        header.message_type,
                        format!("unknown capture result 0x{:02X}", code),
                    )
                })?;
                Self::CaptureFingerprint(result)
            }
            Un20MessageType::GetImageQualityPreview => {
                let quality = if data.is_empty() { None } else { Some(reader.u8()?) };
                Self::GetImageQualityPreview { quality }
            }
            Un20MessageType::GetTemplate => Self::GetTemplate {
                template_type: header.minor_type,
                template: reader.rest(),
            },
            Un20MessageType::GetImage => Self::GetImage {
                image_format: header.minor_type,
                image: reader.rest(),
            },
        };

        reader.finish()?;
        Ok(response)
    }
}

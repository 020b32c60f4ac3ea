//! Main controller messages (VeroServer and VeroEvent channels)

use std::fmt;

use bytes::{BufMut, BytesMut};
use veroscan_types::ExtendedVersion;

use super::{DataReader, HeaderLayout, MessageHeader, OperationResult, WireMessage, put_version};
use crate::error::DecodeFaultKind;

type DecodeResult<T> = std::result::Result<T, DecodeFaultKind>;

/// Main controller message type codes
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum VeroMessageType {
    GetStmExtendedFirmwareVersion = 0x01,
    EnterRootMode = 0x02,
    GetBatteryVoltage = 0x10,
    GetBatteryPercentCharge = 0x11,
    GetBatteryCurrent = 0x12,
    GetBatteryTemperature = 0x13,
    BatterySnapshot = 0x14,
    GetUn20On = 0x20,
    SetUn20On = 0x21,
    Un20StateChange = 0x22,
    GetTriggerButtonActive = 0x30,
    SetTriggerButtonActive = 0x31,
    TriggerButtonPressed = 0x32,
}

impl VeroMessageType {
    pub fn name(self) -> &'static str {
        match self {
            Self::GetStmExtendedFirmwareVersion => "GET_STM_EXTENDED_FIRMWARE_VERSION",
            Self::EnterRootMode => "ENTER_ROOT_MODE",
            Self::GetBatteryVoltage => "GET_BATTERY_VOLTAGE",
            Self::GetBatteryPercentCharge => "GET_BATTERY_PERCENT_CHARGE",
            Self::GetBatteryCurrent => "GET_BATTERY_CURRENT",
            Self::GetBatteryTemperature => "GET_BATTERY_TEMPERATURE",
            Self::BatterySnapshot => "BATTERY_SNAPSHOT",
            Self::GetUn20On => "GET_UN20_ON",
            Self::SetUn20On => "SET_UN20_ON",
            Self::Un20StateChange => "UN20_STATE_CHANGE",
            Self::GetTriggerButtonActive => "GET_TRIGGER_BUTTON_ACTIVE",
            Self::SetTriggerButtonActive => "SET_TRIGGER_BUTTON_ACTIVE",
            Self::TriggerButtonPressed => "TRIGGER_BUTTON_PRESSED",
        }
    }
}

impl From<VeroMessageType> for u8 {
    fn from(kind: VeroMessageType) -> u8 {
        kind as u8
    }
}

impl TryFrom<u8> for VeroMessageType {
    type Error = DecodeFaultKind;

    fn try_from(value: u8) -> DecodeResult<Self> {
        match value {
            0x01 => Ok(Self::GetStmExtendedFirmwareVersion),
            0x02 => Ok(Self::EnterRootMode),
            0x10 => Ok(Self::GetBatteryVoltage),
            0x11 => Ok(Self::GetBatteryPercentCharge),
            0x12 => Ok(Self::GetBatteryCurrent),
            0x13 => Ok(Self::GetBatteryTemperature),
            0x14 => Ok(Self::BatterySnapshot),
            0x20 => Ok(Self::GetUn20On),
            0x21 => Ok(Self::SetUn20On),
            0x22 => Ok(Self::Un20StateChange),
            0x30 => Ok(Self::GetTriggerButtonActive),
            0x31 => Ok(Self::SetTriggerButtonActive),
            0x32 => Ok(Self::TriggerButtonPressed),
            other => Err(DecodeFaultKind::UnknownMessageType(other)),
        }
    }
}

impl fmt::Display for VeroMessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(0x{:02X})", self.name(), *self as u8)
    }
}

/// Commands sent to the main controller
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VeroCommand {
    GetStmExtendedFirmwareVersion,
    EnterRootMode,
    GetBatteryVoltage,
    GetBatteryPercentCharge,
    GetBatteryCurrent,
    GetBatteryTemperature,
    GetUn20On,
    SetUn20On(bool),
    GetTriggerButtonActive,
    SetTriggerButtonActive(bool),
}

impl VeroCommand {
    pub fn kind(&self) -> VeroMessageType {
        match self {
            Self::GetStmExtendedFirmwareVersion => VeroMessageType::GetStmExtendedFirmwareVersion,
            Self::EnterRootMode => VeroMessageType::EnterRootMode,
            Self::GetBatteryVoltage => VeroMessageType::GetBatteryVoltage,
            Self::GetBatteryPercentCharge => VeroMessageType::GetBatteryPercentCharge,
            Self::GetBatteryCurrent => VeroMessageType::GetBatteryCurrent,
            Self::GetBatteryTemperature => VeroMessageType::GetBatteryTemperature,
            Self::GetUn20On => VeroMessageType::GetUn20On,
            Self::SetUn20On(_) => VeroMessageType::SetUn20On,
            Self::GetTriggerButtonActive => VeroMessageType::GetTriggerButtonActive,
            Self::SetTriggerButtonActive(_) => VeroMessageType::SetTriggerButtonActive,
        }
    }
}

impl WireMessage for VeroCommand {
    const LAYOUT: HeaderLayout = HeaderLayout::Short;

    fn message_type(&self) -> u8 {
        self.kind().into()
    }

    fn encode_data(&self, buf: &mut BytesMut) {
        match self {
            Self::SetUn20On(on) | Self::SetTriggerButtonActive(on) => buf.put_u8(u8::from(*on)),
            _ => {}
        }
    }

    fn decode_data(header: &MessageHeader, data: &[u8]) -> DecodeResult<Self> {
        let mut reader = DataReader::new(header, data);

        let command = match VeroMessageType::try_from(header.message_type)? {
            VeroMessageType::GetStmExtendedFirmwareVersion => Self::GetStmExtendedFirmwareVersion,
            VeroMessageType::EnterRootMode => Self::EnterRootMode,
            VeroMessageType::GetBatteryVoltage => Self::GetBatteryVoltage,
            VeroMessageType::GetBatteryPercentCharge => Self::GetBatteryPercentCharge,
            VeroMessageType::GetBatteryCurrent => Self::GetBatteryCurrent,
            VeroMessageType::GetBatteryTemperature => Self::GetBatteryTemperature,
            VeroMessageType::GetUn20On => Self::GetUn20On,
            VeroMessageType::SetUn20On => Self::SetUn20On(reader.bool()?),
            VeroMessageType::GetTriggerButtonActive => Self::GetTriggerButtonActive,
            VeroMessageType::SetTriggerButtonActive => Self::SetTriggerButtonActive(reader.bool()?),
            VeroMessageType::BatterySnapshot
            | VeroMessageType::Un20StateChange
            | VeroMessageType::TriggerButtonPressed => {
                return Err(DecodeFaultKind::UnknownMessageType(header.message_type));
            }
        };

        reader.finish()?;
        Ok(command)
    }
}

/// Responses from the main controller
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VeroResponse {
    GetStmExtendedFirmwareVersion(ExtendedVersion),
    EnterRootMode,
    GetBatteryVoltage { millivolts: u16 },
    GetBatteryPercentCharge { percent: u8 },
    GetBatteryCurrent { milliamps: i16 },
    GetBatteryTemperature { decikelvin: u16 },
    GetUn20On { on: bool },
    SetUn20On(OperationResult),
    GetTriggerButtonActive { active: bool },
    SetTriggerButtonActive(OperationResult),
}

impl VeroResponse {
    pub fn kind(&self) -> VeroMessageType {
        match self {
            Self::GetStmExtendedFirmwareVersion(_) => VeroMessageType::GetStmExtendedFirmwareVersion,
            Self::EnterRootMode => VeroMessageType::EnterRootMode,
            Self::GetBatteryVoltage { .. } => VeroMessageType::GetBatteryVoltage,
            Self::GetBatteryPercentCharge { .. } => VeroMessageType::GetBatteryPercentCharge,
            Self::GetBatteryCurrent { .. } => VeroMessageType::GetBatteryCurrent,
            Self::GetBatteryTemperature { .. } => VeroMessageType::GetBatteryTemperature,
            Self::GetUn20On { .. } => VeroMessageType::GetUn20On,
            Self::SetUn20On(_) => VeroMessageType::SetUn20On,
            Self::GetTriggerButtonActive { .. } => VeroMessageType::GetTriggerButtonActive,
            Self::SetTriggerButtonActive(_) => VeroMessageType::SetTriggerButtonActive,
        }
    }
}

impl WireMessage for VeroResponse {
    const LAYOUT: HeaderLayout = HeaderLayout::Short;

    fn message_type(&self) -> u8 {
        self.kind().into()
    }

    fn encode_data(&self, buf: &mut BytesMut) {
        match self {
            Self::GetStmExtendedFirmwareVersion(version) => put_version(buf, version),
            Self::EnterRootMode => {}
            Self::GetBatteryVoltage { millivolts } => buf.put_u16_le(*millivolts),
            Self::GetBatteryPercentCharge { percent } => buf.put_u8(*percent),
            Self::GetBatteryCurrent { milliamps } => buf.put_i16_le(*milliamps),
            Self::GetBatteryTemperature { decikelvin } => buf.put_u16_le(*decikelvin),
            Self::GetUn20On { on } => buf.put_u8(u8::from(*on)),
            Self::GetTriggerButtonActive { active } => buf.put_u8(u8::from(*active)),
            Self::SetUn20On(result) | Self::SetTriggerButtonActive(result) => buf.put_u8(result.to_u8()),
        }
    }

    fn decode_data(header: &MessageHeader, data: &[u8]) -> DecodeResult<Self> {
        let mut reader = DataReader::new(header, data);

        let response = match VeroMessageType::try_from(header.message_type)? {
            VeroMessageType::GetStmExtendedFirmwareVersion => {
                Self::GetStmExtendedFirmwareVersion(reader.version()?)
            }
            VeroMessageType::EnterRootMode => Self::EnterRootMode,
            VeroMessageType::GetBatteryVoltage => Self::GetBatteryVoltage {
                millivolts: reader.u16()?,
            },
            VeroMessageType::GetBatteryPercentCharge => Self::GetBatteryPercentCharge {
                percent: reader.u8()?,
            },
            VeroMessageType::GetBatteryCurrent => Self::GetBatteryCurrent {
                milliamps: reader.i16()?,
            },
            VeroMessageType::GetBatteryTemperature => Self::GetBatteryTemperature {
                decikelvin: reader.u16()?,
            },
            VeroMessageType::GetUn20On => Self::GetUn20On { on: reader.bool()? },
            VeroMessageType::SetUn20On => Self::SetUn20On(OperationResult::from_u8(reader.u8()?)),
            VeroMessageType::GetTriggerButtonActive => Self::GetTriggerButtonActive {
                active: reader.bool()?,
            },
            VeroMessageType::SetTriggerButtonActive => {
                Self::SetTriggerButtonActive(OperationResult::from_u8(reader.u8()?))
            }
            VeroMessageType::BatterySnapshot
            | VeroMessageType::Un20StateChange
            | VeroMessageType::TriggerButtonPressed => {
                return Err(DecodeFaultKind::UnknownMessageType(header.message_type));
            }
        };

        reader.finish()?;
        Ok(response)
    }
}

/// Unsolicited events from the main controller
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VeroEvent {
    Un20StateChange { on: bool },
    TriggerButtonPressed,
    BatterySnapshot { percent: u8, millivolts: u16 },
}

impl VeroEvent {
    pub fn kind(&self) -> VeroMessageType {
        match self {
            Self::Un20StateChange { .. } => VeroMessageType::Un20StateChange,
            Self::TriggerButtonPressed => VeroMessageType::TriggerButtonPressed,
            Self::BatterySnapshot { .. } => VeroMessageType::BatterySnapshot,
        }
    }
}

impl WireMessage for VeroEvent {
    const LAYOUT: HeaderLayout = HeaderLayout::Short;

    fn message_type(&self) -> u8 {
        self.kind().into()
    }

    fn encode_data(&self, buf: &mut BytesMut) {
        match self {
            Self::Un20StateChange { on } => buf.put_u8(u8::from(*on)),
            Self::TriggerButtonPressed => {}
            Self::BatterySnapshot { percent, millivolts } => {
                buf.put_u8(*percent);
                buf.put_u16_le(*millivolts);
            }
        }
    }

    fn decode_data(header: &MessageHeader, data: &[u8]) -> DecodeResult<Self> {
        let mut reader = DataReader::new(header, data);

        let event = match VeroMessageType::try_from(header.message_type)? {
            VeroMessageType::Un20StateChange => Self::Un20StateChange { on: reader.bool()? },
            VeroMessageType::TriggerButtonPressed => Self::TriggerButtonPressed,
            VeroMessageType::BatterySnapshot => Self::BatterySnapshot {
                percent: reader.u8()?,
                millivolts: reader.u16()?,
            },
            _ => return Err(DecodeFaultKind::UnknownMessageType(header.message_type)),
        };

        reader.finish()?;
        Ok(event)
    }
}

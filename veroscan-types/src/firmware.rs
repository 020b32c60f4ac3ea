//! Firmware and chip identification

use std::fmt;

use crate::error::{Error, Result};

/// Independently flashable chips inside the scanner
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum Chip {
    /// Bluetooth/bootloader controller
    Cypress = 0x01,

    /// Main controller
    Stm = 0x02,

    /// Fingerprint sensor module
    Un20 = 0x03,
}

impl Chip {
    /// All chips, in the order updates are applied
    pub const ALL: [Chip; 3] = [Chip::Cypress, Chip::Stm, Chip::Un20];

    /// Chip name as used in update reports
    pub fn name(self) -> &'static str {
        match self {
            Self::Cypress => "cypress",
            Self::Stm => "stm",
            Self::Un20 => "un20",
        }
    }
}

impl From<Chip> for u8 {
    fn from(chip: Chip) -> u8 {
        chip as u8
    }
}

impl TryFrom<u8> for Chip {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0x01 => Ok(Self::Cypress),
            0x02 => Ok(Self::Stm),
            0x03 => Ok(Self::Un20),
            _ => Err(Error::UnknownChip(value)),
        }
    }
}

impl fmt::Display for Chip {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Free-form version string reported by one chip (e.g. `"1.E-1.1"`)
///
/// An empty string means the version is unknown.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct ExtendedVersion(String);

impl ExtendedVersion {
    /// Maximum encoded length (u8 length prefix on the wire)
    pub const MAX_LEN: usize = u8::MAX as usize;

    pub fn new(version: impl Into<String>) -> Result<Self> {
        let version = version.into();
        if version.len() > Self::MAX_LEN {
            return Err(Error::Validation(format!(
                "version string is {} bytes (max: {})",
                version.len(),
                Self::MAX_LEN
            )));
        }
        Ok(Self(version))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_unknown(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for ExtendedVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            f.write_str("unknown")
        } else {
            f.write_str(&self.0)
        }
    }
}

/// Versions of every chip plus the hardware revision
///
/// Stored by the bootloader and read back in root mode.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtendedVersionInformation {
    pub cypress_firmware: ExtendedVersion,
    pub stm_firmware: ExtendedVersion,
    pub un20_app: ExtendedVersion,
    pub hardware_version: ExtendedVersion,
}

impl ExtendedVersionInformation {
    /// Installed version of a chip
    pub fn version_of(&self, chip: Chip) -> &ExtendedVersion {
        match chip {
            Chip::Cypress => &self.cypress_firmware,
            Chip::Stm => &self.stm_firmware,
            Chip::Un20 => &self.un20_app,
        }
    }

    /// Chips for which `targets` offers a different, known version
    ///
    /// Unknown (empty) targets are skipped. The result follows [`Chip::ALL`].
    pub fn available_otas(&self, targets: &ExtendedVersionInformation) -> Vec<Chip> {
        Chip::ALL
            .into_iter()
            .filter(|&chip| {
                let target = targets.version_of(chip);
                !target.is_unknown() && target != self.version_of(chip)
            })
            .collect()
    }
}

impl fmt::Display for ExtendedVersionInformation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Scanner[HW: {}, cypress: {}, stm: {}, un20: {}]",
            self.hardware_version, self.cypress_firmware, self.stm_firmware, self.un20_app
        )
    }
}

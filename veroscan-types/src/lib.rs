//! Type definitions for veroscan

pub mod battery;
pub mod error;
pub mod firmware;
pub mod ota;

pub use battery::BatteryInfo;
pub use error::{Error, Result};
pub use firmware::{Chip, ExtendedVersion, ExtendedVersionInformation};
pub use ota::{OtaProgress, OtaReport, OtaState};

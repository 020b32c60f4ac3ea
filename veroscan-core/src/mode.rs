//! Device mode tracking
//!
//! The scanner runs either its bootloader ("root" mode) or its operational
//! firmware ("main" mode). Which one is active decides which message
//! families the device understands:
//! - Unknown until the first successful exchange
//! - Root -> Main after an "enter main mode" exchange
//! - Main -> Root after an "enter root mode" exchange

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use crate::error::{Error, Result};

/// Firmware currently running on the device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceMode {
    /// Not yet determined on this connection
    Unknown,

    /// Bootloader
    Root,

    /// Operational firmware
    Main,
}

impl DeviceMode {
    /// Whether a command requiring `required` may be sent in this mode
    ///
    /// While the mode is unknown every command is allowed; the first
    /// successful exchange settles it.
    pub fn permits(self, required: DeviceMode) -> bool {
        self == DeviceMode::Unknown || required == DeviceMode::Unknown || self == required
    }
}

impl fmt::Display for DeviceMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Unknown => "unknown",
            Self::Root => "root",
            Self::Main => "main",
        };
        f.write_str(name)
    }
}

/// Shared device mode state
///
/// Thread-safe and can be cloned cheaply (Arc internally).
#[derive(Debug, Clone)]
pub struct ModeState {
    inner: Arc<RwLock<DeviceMode>>,
}

impl ModeState {
    /// Create a state in [`DeviceMode::Unknown`]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(DeviceMode::Unknown)),
        }
    }

    /// Get current mode
    pub fn mode(&self) -> DeviceMode {
        *self.inner.read()
    }

    /// Forget the mode (new connection)
    pub fn reset(&self) {
        *self.inner.write() = DeviceMode::Unknown;
    }

    /// Record the mode implied by a successful exchange
    ///
    /// Only has an effect while the mode is unknown.
    pub fn observe(&self, mode: DeviceMode) {
        let mut current = self.inner.write();

        if *current == DeviceMode::Unknown && mode != DeviceMode::Unknown {
            debug!("Device mode determined: {}", mode);
            *current = mode;
        }
    }

    /// Check that a command requiring `required` may be sent
    pub fn ensure(&self, required: DeviceMode) -> Result<()> {
        let current = self.mode();

        if !current.permits(required) {
            return Err(Error::WrongMode { required, current });
        }

        Ok(())
    }

    /// Check that switching to `to` is allowed from the current mode
    pub fn check_transition(&self, to: DeviceMode) -> Result<()> {
        Self::validate(self.mode(), to)
    }

    /// Switch to `to` after the device confirmed the change
    pub fn transition(&self, to: DeviceMode) -> Result<()> {
        let mut current = self.inner.write();

        Self::validate(*current, to)?;

        debug!("Device mode {} -> {}", *current, to);
        *current = to;
        Ok(())
    }

    fn validate(from: DeviceMode, to: DeviceMode) -> Result<()> {
        match (from, to) {
            (DeviceMode::Unknown | DeviceMode::Main, DeviceMode::Root)
            | (DeviceMode::Unknown | DeviceMode::Root, DeviceMode::Main) => Ok(()),
            _ => Err(Error::InvalidModeTransition { from, to }),
        }
    }
}

impl Default for ModeState {
    fn default() -> Self {
        Self::new()
    }
}

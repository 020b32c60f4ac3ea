//! Firmware update progress and reporting

use std::fmt;

use chrono::{DateTime, Utc};

use crate::firmware::Chip;

/// State of an update session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OtaState {
    Idle,
    Transferring,
    Verifying,
    Complete,
    Failed,
}

impl OtaState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Failed)
    }

    /// Whether the state machine permits moving from `self` to `next`
    ///
    /// `Idle -> Transferring -> Verifying -> Complete`, and `Failed` from any
    /// non-terminal state.
    pub fn can_advance_to(self, next: OtaState) -> bool {
        match (self, next) {
            (Self::Idle, Self::Transferring) => true,
            (Self::Transferring, Self::Verifying) => true,
            (Self::Verifying, Self::Complete) => true,
            (from, Self::Failed) => !from.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for OtaState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Transferring => "transferring",
            Self::Verifying => "verifying",
            Self::Complete => "complete",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Progress snapshot emitted after every acknowledged chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OtaProgress {
    pub state: OtaState,
    pub bytes_acknowledged: u32,
    pub total_bytes: u32,
}

impl OtaProgress {
    /// Acknowledged fraction in `0.0..=1.0`
    pub fn fraction(&self) -> f32 {
        if self.total_bytes == 0 {
            return 1.0;
        }
        self.bytes_acknowledged as f32 / self.total_bytes as f32
    }
}

/// Summary of one finished update attempt
#[derive(Debug, Clone, PartialEq)]
pub struct OtaReport {
    pub chip: Chip,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub bytes_acknowledged: u32,
    pub total_bytes: u32,

    /// `None` when the update completed
    pub failure_reason: Option<String>,
}

impl OtaReport {
    pub fn succeeded(&self) -> bool {
        self.failure_reason.is_none()
    }

    pub fn duration(&self) -> chrono::Duration {
        self.finished_at - self.started_at
    }
}

impl fmt::Display for OtaReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "OTA[{}] {}/{} bytes in {}ms",
            self.chip,
            self.bytes_acknowledged,
            self.total_bytes,
            self.duration().num_milliseconds()
        )?;
        if let Some(reason) = &self.failure_reason {
            write!(f, " failed: {}", reason)?;
        }
        Ok(())
    }
}

//! Scanner configuration

use std::time::Duration;

use veroscan_core::constants::{
    DEFAULT_BUS_CAPACITY, DEFAULT_MODE_SWITCH_TIMEOUT_MS, DEFAULT_OTA_CHUNK_SIZE,
    DEFAULT_OTA_CHUNK_TIMEOUT_MS, DEFAULT_OTA_VERIFY_TIMEOUT_MS, DEFAULT_QUEUE_CAPACITY,
    DEFAULT_READ_BUFFER_SIZE, DEFAULT_RESPONSE_TIMEOUT_MS, MAX_RETRIES,
};
use veroscan_core::message::HeaderLayout;
use veroscan_transport::RouterConfig;

use crate::error::{Error, Result};

/// Chip byte + u32 offset in front of every chunk's data
const CHUNK_OVERHEAD: usize = 5;

/// Connection-wide settings
#[derive(Debug, Clone)]
pub struct ScannerConfig {
    /// Default wait for a response
    pub response_timeout: Duration,

    /// Payloads buffered per channel between the reader and accumulators
    pub queue_capacity: usize,

    /// Messages buffered per channel for each subscriber
    pub bus_capacity: usize,

    /// Bytes reserved for each transport read
    pub read_buffer_size: usize,

    pub ota: OtaConfig,
}

impl ScannerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = timeout;
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    pub fn with_bus_capacity(mut self, capacity: usize) -> Self {
        self.bus_capacity = capacity;
        self
    }

    pub fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size;
        self
    }

    pub fn with_ota(mut self, ota: OtaConfig) -> Self {
        self.ota = ota;
        self
    }

    /// Reject settings the scanner cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.response_timeout.is_zero() {
            return Err(Error::InvalidConfig("response_timeout must be non-zero".into()));
        }
        if self.queue_capacity == 0 {
            return Err(Error::InvalidConfig("queue_capacity must be non-zero".into()));
        }
        if self.bus_capacity == 0 {
            return Err(Error::InvalidConfig("bus_capacity must be non-zero".into()));
        }
        if self.read_buffer_size == 0 {
            return Err(Error::InvalidConfig("read_buffer_size must be non-zero".into()));
        }
        self.ota.validate()
    }

    pub(crate) fn router(&self) -> RouterConfig {
        RouterConfig {
            queue_capacity: self.queue_capacity,
            read_buffer_size: self.read_buffer_size,
        }
    }
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            response_timeout: Duration::from_millis(DEFAULT_RESPONSE_TIMEOUT_MS),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            bus_capacity: DEFAULT_BUS_CAPACITY,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            ota: OtaConfig::default(),
        }
    }
}

/// Firmware update settings
#[derive(Debug, Clone)]
pub struct OtaConfig {
    /// Image bytes per chunk (one round trip each)
    pub chunk_size: usize,

    /// Wait for each chunk acknowledgement
    pub chunk_timeout: Duration,

    /// Extra attempts per chunk after a timeout or rejected write
    pub max_chunk_retries: u32,

    /// Wait for the device to checksum the received image
    pub verify_timeout: Duration,

    /// Wait for mode switch acknowledgements
    pub mode_switch_timeout: Duration,
}

impl OtaConfig {
    pub fn with_chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = size;
        self
    }

    pub fn with_chunk_timeout(mut self, timeout: Duration) -> Self {
        self.chunk_timeout = timeout;
        self
    }

    pub fn with_max_chunk_retries(mut self, retries: u32) -> Self {
        self.max_chunk_retries = retries;
        self
    }

    pub fn with_verify_timeout(mut self, timeout: Duration) -> Self {
        self.verify_timeout = timeout;
        self
    }

    pub fn with_mode_switch_timeout(mut self, timeout: Duration) -> Self {
        self.mode_switch_timeout = timeout;
        self
    }

    pub fn validate(&self) -> Result<()> {
        let max_chunk = HeaderLayout::Short.max_data_len() - CHUNK_OVERHEAD;

        if self.chunk_size == 0 || self.chunk_size > max_chunk {
            return Err(Error::InvalidConfig(format!(
                "chunk_size must be between 1 and {} (got {})",
                max_chunk, self.chunk_size
            )));
        }
        if self.chunk_timeout.is_zero() || self.verify_timeout.is_zero() || self.mode_switch_timeout.is_zero() {
            return Err(Error::InvalidConfig("OTA timeouts must be non-zero".into()));
        }
        Ok(())
    }
}

impl Default for OtaConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_OTA_CHUNK_SIZE,
            chunk_timeout: Duration::from_millis(DEFAULT_OTA_CHUNK_TIMEOUT_MS),
            max_chunk_retries: MAX_RETRIES,
            verify_timeout: Duration::from_millis(DEFAULT_OTA_VERIFY_TIMEOUT_MS),
            mode_switch_timeout: Duration::from_millis(DEFAULT_MODE_SWITCH_TIMEOUT_MS),
        }
    }
}

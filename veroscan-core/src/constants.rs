//! Protocol constants

/// First byte of every packet
pub const START_MARKER: u8 = 0xFA;

/// Packet header size: marker + channel + length (LE u16)
pub const PACKET_HEADER_SIZE: usize = 4;

/// Packet trailer size: checksum
pub const PACKET_TRAILER_SIZE: usize = 1;

/// Maximum packet payload
pub const MAX_PAYLOAD_SIZE: usize = 1024;

/// Maximum encoded Un20 message (images span many packets)
pub const MAX_UN20_MESSAGE_SIZE: usize = 1024 * 1024;

/// Default response timeout (milliseconds)
pub const DEFAULT_RESPONSE_TIMEOUT_MS: u64 = 5_000;

/// Default timeout for mode switch commands (milliseconds)
pub const DEFAULT_MODE_SWITCH_TIMEOUT_MS: u64 = 10_000;

/// Default per-chunk timeout during firmware updates (milliseconds)
pub const DEFAULT_OTA_CHUNK_TIMEOUT_MS: u64 = 5_000;

/// Default timeout for the device-side image verification (milliseconds)
pub const DEFAULT_OTA_VERIFY_TIMEOUT_MS: u64 = 30_000;

/// Default firmware chunk size (bytes of image per round trip)
pub const DEFAULT_OTA_CHUNK_SIZE: usize = 512;

/// Maximum retries for a single firmware chunk
pub const MAX_RETRIES: u32 = 3;

/// Capacity of each per-channel byte queue
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// Capacity of each per-channel subscriber stream
pub const DEFAULT_BUS_CAPACITY: usize = 64;

/// Initial capacity of the router's read buffer
pub const DEFAULT_READ_BUFFER_SIZE: usize = 4096;

/// Operation result codes carried in single-byte responses
pub mod status {
    /// Success
    pub const OK: u8 = 0x00;

    /// Generic failure
    pub const FAILED: u8 = 0x01;

    /// Chunk offset does not follow the last acknowledged byte
    pub const BAD_OFFSET: u8 = 0x02;

    /// Device is busy, try again
    pub const BUSY: u8 = 0x03;
}

/// Un20 image formats (minor type of `GetImage`)
pub mod image_format {
    pub const RAW: u8 = 0x00;
    pub const WSQ: u8 = 0x01;
}

/// Un20 template types (minor type of `GetTemplate`)
pub mod template_type {
    pub const ISO_19794_2_2011: u8 = 0x00;
}

/// Un20 capture results
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CaptureResult {
    Ok = 0x00,
    BadScan = 0x01,
    NoFingerDetected = 0x02,
    DeviceError = 0x03,
}

impl CaptureResult {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x00 => Some(Self::Ok),
            0x01 => Some(Self::BadScan),
            0x02 => Some(Self::NoFingerDetected),
            0x03 => Some(Self::DeviceError),
            _ => None,
        }
    }
}

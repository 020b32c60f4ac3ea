//! Packet framing: encoding, streaming decoding and resynchronisation

use bytes::{Buf, BufMut, Bytes, BytesMut};
use byteorder::{ByteOrder, LittleEndian};
use std::fmt;
use tracing::{trace, warn};

use crate::{
    channel::Channel,
    checksum,
    constants::{MAX_PAYLOAD_SIZE, PACKET_HEADER_SIZE, PACKET_TRAILER_SIZE, START_MARKER},
    error::{Error, FrameError, Result},
};

/// Scanner link packet
///
/// # Packet Structure
///
/// ```text
/// ┌─────────────┬─────────────┬─────────────┬─────────────┬─────────────┐
/// │   Marker    │   Channel   │   Length    │   Payload   │  Checksum   │
/// │   1 byte    │   1 byte    │   2 bytes   │   N bytes   │   1 byte    │
/// │   (0xFA)    │    (tag)    │  (LE u16)   │   (bytes)   │ (see below) │
/// └─────────────┴─────────────┴─────────────┴─────────────┴─────────────┘
/// ```
///
/// `Length` is the payload length and never exceeds [`Packet::MAX_PAYLOAD_SIZE`].
/// The checksum covers channel, length and payload (see [`checksum`]).
///
/// # Examples
///
/// ```
/// use veroscan_core::{Channel, Decoded, Packet};
///
/// let packet = Packet::new(Channel::VeroServer, vec![0x10, 0x00, 0x00, 0x00]).unwrap();
/// let encoded = packet.encode();
///
/// match Packet::decode(&encoded) {
///     Decoded::Packet { packet: decoded, consumed } => {
///         assert_eq!(decoded, packet);
///         assert_eq!(consumed, encoded.len());
///     }
///     other => panic!("unexpected {:?}", other),
/// }
/// ```
#[derive(Clone, PartialEq, Eq)]
pub struct Packet {
    /// Logical channel
    pub channel: Channel,

    /// Channel bytes carried by this packet
    pub payload: Bytes,
}

/// Outcome of one decode attempt against a buffer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    /// A complete packet occupying the first `consumed` bytes
    Packet {
        packet: Packet,
        consumed: usize,
    },

    /// The buffer holds a valid prefix; wait for more bytes
    NeedMoreBytes,

    /// The first `skip` bytes cannot start a valid packet and must be dropped
    Malformed {
        error: FrameError,
        skip: usize,
    },
}

impl Packet {
    /// Packet header size in bytes
    pub const HEADER_SIZE: usize = PACKET_HEADER_SIZE;

    /// Maximum payload size
    pub const MAX_PAYLOAD_SIZE: usize = MAX_PAYLOAD_SIZE;

    /// Create a packet
    ///
    /// # Errors
    ///
    /// Returns [`Error::PayloadTooLarge`] if the payload exceeds
    /// [`Packet::MAX_PAYLOAD_SIZE`]. Larger messages go through [`packetize`].
    pub fn new(channel: Channel, payload: impl Into<Bytes>) -> Result<Self> {
        let payload = payload.into();

        if payload.len() > Self::MAX_PAYLOAD_SIZE {
            return Err(Error::PayloadTooLarge {
                size: payload.len(),
                max: Self::MAX_PAYLOAD_SIZE,
            });
        }

        Ok(Self { channel, payload })
    }

    /// Calculate checksum for this packet
    pub fn checksum(&self) -> u8 {
        checksum::calculate(self.channel.tag(), &self.payload)
    }

    /// Encode packet to bytes
    ///
    /// # Examples
    ///
    /// ```
    /// use veroscan_core::{Channel, Packet};
    ///
    /// let packet = Packet::new(Channel::Root, Vec::new()).unwrap();
    /// let bytes = packet.encode();
    /// assert_eq!(bytes.len(), 5); // Header + checksum
    /// ```
    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(self.size());

        buf.put_u8(START_MARKER);
        buf.put_u8(self.channel.tag());
        buf.put_u16_le(self.payload.len() as u16);
        buf.put_slice(&self.payload);
        buf.put_u8(self.checksum());

        buf
    }

    /// Decode the packet at the start of `buf`
    ///
    /// Never consumes anything itself: the caller advances its buffer by
    /// `consumed` or `skip`. On [`Decoded::Malformed`] the skip distance lands
    /// on the next start marker, so a corrupted frame costs at most the bytes
    /// up to the next plausible packet. An intact frame for an unknown channel
    /// is skipped whole.
    pub fn decode(buf: &[u8]) -> Decoded {
        let Some(&marker) = buf.first() else {
            return Decoded::NeedMoreBytes;
        };

        if marker != START_MARKER {
            return Decoded::Malformed {
                error: FrameError::BadStartMarker {
                    expected: START_MARKER,
                    found: marker,
                },
                skip: resync_offset(buf),
            };
        }

        if buf.len() < Self::HEADER_SIZE {
            return Decoded::NeedMoreBytes;
        }

        let tag = buf[1];
        let len = LittleEndian::read_u16(&buf[2..4]) as usize;

        if len > Self::MAX_PAYLOAD_SIZE {
            return Decoded::Malformed {
                error: FrameError::LengthTooLarge {
                    declared: len,
                    max: Self::MAX_PAYLOAD_SIZE,
                },
                skip: resync_offset(buf),
            };
        }

        let frame_len = Self::HEADER_SIZE + len + PACKET_TRAILER_SIZE;
        if buf.len() < frame_len {
            return Decoded::NeedMoreBytes;
        }

        let payload = &buf[Self::HEADER_SIZE..Self::HEADER_SIZE + len];
        let received = buf[Self::HEADER_SIZE + len];
        let expected = checksum::calculate(tag, payload);

        if expected != received {
            return Decoded::Malformed {
                error: FrameError::ChecksumMismatch { expected, received },
                skip: resync_offset(buf),
            };
        }

        let Ok(channel) = Channel::try_from(tag) else {
            return Decoded::Malformed {
                error: FrameError::UnknownChannel(tag),
                skip: frame_len,
            };
        };

        Decoded::Packet {
            packet: Self {
                channel,
                payload: Bytes::copy_from_slice(payload),
            },
            consumed: frame_len,
        }
    }

    /// Get total encoded size
    pub fn size(&self) -> usize {
        Self::HEADER_SIZE + self.payload.len() + PACKET_TRAILER_SIZE
    }
}

/// Encode a single `(channel, payload)` pair
pub fn encode(channel: Channel, payload: &[u8]) -> Result<BytesMut> {
    Ok(Packet::new(channel, Bytes::copy_from_slice(payload))?.encode())
}

/// Split an encoded message into as many packets as needed on `channel`
///
/// An empty message still yields one empty packet.
pub fn packetize(channel: Channel, message: Bytes) -> Vec<Packet> {
    if message.is_empty() {
        return vec![Packet {
            channel,
            payload: message,
        }];
    }

    let mut packets = Vec::with_capacity(message.len().div_ceil(MAX_PAYLOAD_SIZE));
    let mut offset = 0;

    while offset < message.len() {
        let end = (offset + MAX_PAYLOAD_SIZE).min(message.len());
        packets.push(Packet {
            channel,
            payload: message.slice(offset..end),
        });
        offset = end;
    }

    packets
}

/// Offset of the next start marker after position 0, or the whole buffer
fn resync_offset(buf: &[u8]) -> usize {
    buf.iter()
        .skip(1)
        .position(|&b| b == START_MARKER)
        .map_or(buf.len(), |pos| pos + 1)
}

/// Streaming decoder over a rolling buffer
///
/// Bytes may be pushed in chunks of any size; packets come out in order.
///
/// # Examples
///
/// ```
/// use veroscan_core::{Channel, Packet, PacketDecoder};
///
/// let encoded = Packet::new(Channel::VeroEvent, vec![0x32, 0, 0, 0]).unwrap().encode();
/// let mut decoder = PacketDecoder::new();
///
/// decoder.push(&encoded[..3]);
/// assert!(decoder.next_packet().is_none());
///
/// decoder.push(&encoded[3..]);
/// let packet = decoder.next_packet().unwrap().unwrap();
/// assert_eq!(packet.channel, Channel::VeroEvent);
/// ```
#[derive(Debug, Default)]
pub struct PacketDecoder {
    buf: BytesMut,
}

impl PacketDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(capacity),
        }
    }

    /// Append received bytes
    pub fn push(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Mutable access to the rolling buffer, for reading straight into it
    pub fn buffer_mut(&mut self) -> &mut BytesMut {
        &mut self.buf
    }

    /// Next packet, or the frame error that made the decoder skip bytes
    ///
    /// Returns `None` once the buffer holds no complete packet.
    pub fn next_packet(&mut self) -> Option<std::result::Result<Packet, FrameError>> {
        match Packet::decode(&self.buf) {
            Decoded::Packet { packet, consumed } => {
                self.buf.advance(consumed);
                trace!("Decoded: {:?}", packet);
                Some(Ok(packet))
            }
            Decoded::NeedMoreBytes => None,
            Decoded::Malformed { error, skip } => {
                warn!(skip, "Dropping malformed frame bytes: {}", error);
                self.buf.advance(skip);
                Some(Err(error))
            }
        }
    }

    /// Bytes waiting for a complete packet
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }
}

impl fmt::Debug for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let preview = &self.payload[..self.payload.len().min(16)];
        f.debug_struct("Packet")
            .field("channel", &self.channel)
            .field("checksum", &format!("0x{:02X}", self.checksum()))
            .field("payload_len", &self.payload.len())
            .field("payload", &hex::encode(preview))
            .finish()
    }
}

impl fmt::Display for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Packet[{}](len={})", self.channel, self.payload.len())
    }
}

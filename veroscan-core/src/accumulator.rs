//! Per-channel message accumulation
//!
//! Packets split messages at arbitrary byte boundaries. An accumulator
//! collects the payload bytes of one channel and hands out complete
//! messages of that channel's family as soon as they are buffered.

use std::marker::PhantomData;

use bytes::{Buf, BytesMut};
use tracing::{trace, warn};

use crate::channel::Channel;
use crate::error::{DecodeFault, DecodeFaultKind};
use crate::message::WireMessage;

/// Reassembles messages of family `M` from packet payloads
#[derive(Debug)]
pub struct Accumulator<M> {
    channel: Channel,
    buf: BytesMut,
    _message: PhantomData<fn() -> M>,
}

impl<M: WireMessage> Accumulator<M> {
    pub fn new(channel: Channel) -> Self {
        Self {
            channel,
            buf: BytesMut::new(),
            _message: PhantomData,
        }
    }

    /// Channel this accumulator serves
    pub fn channel(&self) -> Channel {
        self.channel
    }

    /// Append packet payload bytes
    pub fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Take the next complete message
    ///
    /// Returns `None` until a whole message is buffered. A message that
    /// fails to parse is consumed and reported as a fault; parsing resumes
    /// at the following message. A message declaring a length beyond the
    /// family limit cannot be skipped reliably, so the buffer is discarded.
    pub fn next_message(&mut self) -> Option<Result<M, DecodeFault>> {
        let layout = M::LAYOUT;
        let header = layout.parse(&self.buf)?;

        let total = layout.size() + header.data_len;
        if total > layout.max_message_size() {
            warn!(
                channel = %self.channel,
                declared = header.data_len,
                discarded = self.buf.len(),
                "Declared message length exceeds limit, discarding buffer"
            );
            self.buf.clear();
            return Some(Err(DecodeFault::new(
                self.channel,
                DecodeFaultKind::Oversized {
                    declared: header.data_len,
                    max: layout.max_data_len(),
                },
            )));
        }

        if self.buf.len() < total {
            trace!(
                channel = %self.channel,
                buffered = self.buf.len(),
                needed = total,
                "Waiting for more message bytes"
            );
            return None;
        }

        let result = M::decode_data(&header, &self.buf[layout.size()..total]);
        self.buf.advance(total);

        Some(result.map_err(|kind| DecodeFault::new(self.channel, kind)))
    }

    /// Bytes held for an incomplete message
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Drop partial data (e.g. after a reconnect)
    pub fn clear(&mut self) {
        self.buf.clear();
    }
}

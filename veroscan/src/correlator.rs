//! Request/response correlation
//!
//! Each channel carries at most one outstanding request. The response to it
//! is the first message on the same channel whose type code matches the one
//! the request expects; anything else is handed back to the caller of
//! [`Correlator::dispatch`] for the message bus.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::{debug, trace, warn};
use veroscan_core::{Channel, IncomingMessage, ModeState, OutgoingMessage, packetize};
use veroscan_transport::PacketSink;

use crate::error::{Error, Result};

struct PendingRequest {
    id: u64,
    expected: u8,
    completion: oneshot::Sender<IncomingMessage>,
}

#[derive(Default)]
struct PendingTable {
    requests: HashMap<Channel, PendingRequest>,
    closed: bool,
}

/// Matches responses to the requests waiting for them
pub struct Correlator {
    sink: Arc<dyn PacketSink>,
    mode: ModeState,
    pending: Mutex<PendingTable>,
    next_id: AtomicU64,
}

impl Correlator {
    pub fn new(sink: Arc<dyn PacketSink>, mode: ModeState) -> Self {
        Self {
            sink,
            mode,
            pending: Mutex::new(PendingTable::default()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Send `message` on `channel` and wait for a response of type `expected`
    ///
    /// Dropping the returned future withdraws the request.
    ///
    /// # Errors
    ///
    /// - [`Error::ChannelMismatch`] if `message` does not belong on `channel`
    /// - [`Error::RequestInFlight`] if `channel` already has a request waiting
    /// - [`Error::Timeout`] if nothing matching arrives within `timeout`
    /// - [`Error::Disconnected`] if the link goes away first
    pub async fn send(
        &self,
        channel: Channel,
        message: OutgoingMessage,
        expected: u8,
        timeout: Duration,
    ) -> Result<IncomingMessage> {
        if message.channel() != channel {
            return Err(Error::ChannelMismatch {
                expected: message.channel(),
                actual: channel,
            });
        }

        self.mode.ensure(message.required_mode())?;
        let encoded = message.encode()?;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock();
            if pending.closed {
                return Err(Error::Disconnected { channel });
            }
            if pending.requests.contains_key(&channel) {
                return Err(Error::RequestInFlight { channel });
            }
            pending.requests.insert(
                channel,
                PendingRequest {
                    id,
                    expected,
                    completion: tx,
                },
            );
        }
        let _guard = PendingGuard {
            pending: &self.pending,
            channel,
            id,
        };

        debug!(id, "Sending {} (expecting 0x{:02X})", message, expected);

        let exchange = async {
            self.sink.send_packets(packetize(channel, encoded)).await?;
            rx.await.map_err(|_| Error::Disconnected { channel })
        };

        let response = match tokio::time::timeout(timeout, exchange).await {
            Ok(result) => result?,
            Err(_) => {
                warn!(id, "No response to {} within {:?}", message, timeout);
                return Err(Error::Timeout { channel, timeout });
            }
        };

        self.mode.observe(channel.mode());
        trace!(id, "Received {}", response);

        Ok(response)
    }

    /// Offer an inbound message to the request waiting on its channel
    ///
    /// Returns the message back if nothing claimed it.
    pub fn dispatch(&self, message: IncomingMessage) -> Option<IncomingMessage> {
        let channel = message.channel();

        let request = {
            let mut pending = self.pending.lock();
            match pending.requests.get(&channel) {
                Some(request) if request.expected == message.message_type() => {}
                _ => return Some(message),
            }
            pending.requests.remove(&channel)?
        };

        // The waiter may have given up in the meantime
        request.completion.send(message).err()
    }

    /// Fail every waiting request with [`Error::Disconnected`] and refuse
    /// new ones
    pub fn fail_all(&self) -> usize {
        let drained: Vec<_> = {
            let mut pending = self.pending.lock();
            pending.closed = true;
            pending.requests.drain().collect()
        };

        if !drained.is_empty() {
            debug!(count = drained.len(), "Failing pending requests");
        }

        // Dropping the completion senders wakes the waiters
        drained.len()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().requests.len()
    }

    pub fn is_closed(&self) -> bool {
        self.pending.lock().closed
    }
}

/// Removes a request's entry when its `send` ends, however it ends
struct PendingGuard<'a> {
    pending: &'a Mutex<PendingTable>,
    channel: Channel,
    id: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        let mut pending = self.pending.lock();

        if pending
            .requests
            .get(&self.channel)
            .is_some_and(|request| request.id == self.id)
        {
            pending.requests.remove(&self.channel);
        }
    }
}

//! Per-channel message streams
//!
//! Everything the correlator does not claim (events, late or unsolicited
//! responses, decode faults) is broadcast to the subscribers of its
//! channel.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, ready};

use tokio::sync::broadcast;
use tokio_stream::Stream;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tracing::{trace, warn};
use veroscan_core::{Channel, DecodeFault, IncomingMessage};

/// Item delivered to subscribers
pub type Inbound = std::result::Result<IncomingMessage, DecodeFault>;

/// Which messages a subscription wants
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    /// Everything on the channel
    Any,

    /// One message type code (decode faults are always delivered)
    Type(u8),
}

impl MessageKind {
    fn matches(self, item: &Inbound) -> bool {
        match (self, item) {
            (Self::Any, _) | (Self::Type(_), Err(_)) => true,
            (Self::Type(kind), Ok(message)) => message.message_type() == kind,
        }
    }
}

/// Broadcast fan-out, one sender per channel
#[derive(Debug, Clone)]
pub struct MessageBus {
    senders: Arc<HashMap<Channel, broadcast::Sender<Inbound>>>,
}

impl MessageBus {
    pub fn new(capacity: usize) -> Self {
        let senders = Channel::ALL
            .into_iter()
            .map(|channel| (channel, broadcast::channel(capacity.max(1)).0))
            .collect();

        Self {
            senders: Arc::new(senders),
        }
    }

    /// Deliver `item` to the subscribers of its channel
    ///
    /// Returns how many subscribers received it.
    pub fn publish(&self, item: Inbound) -> usize {
        let channel = match &item {
            Ok(message) => message.channel(),
            Err(fault) => fault.channel,
        };

        match self.senders.get(&channel).map(|tx| tx.send(item)) {
            Some(Ok(receivers)) => receivers,
            _ => {
                trace!(channel = %channel, "No subscribers, message dropped");
                0
            }
        }
    }

    pub fn subscribe(&self, channel: Channel, kind: MessageKind) -> Subscription {
        // Every channel has a sender, see `new`
        let rx = match self.senders.get(&channel) {
            Some(tx) => tx.subscribe(),
            None => broadcast::channel(1).1,
        };

        Subscription {
            channel,
            kind,
            inner: BroadcastStream::new(rx),
        }
    }

    pub fn subscriber_count(&self, channel: Channel) -> usize {
        self.senders.get(&channel).map_or(0, |tx| tx.receiver_count())
    }
}

/// Stream of one channel's messages
///
/// Survives reconnects. A subscriber that falls behind by more than the bus
/// capacity skips the missed items.
pub struct Subscription {
    channel: Channel,
    kind: MessageKind,
    inner: BroadcastStream<Inbound>,
}

impl Subscription {
    pub fn channel(&self) -> Channel {
        self.channel
    }

    pub fn kind(&self) -> MessageKind {
        self.kind
    }
}

impl Stream for Subscription {
    type Item = Inbound;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        loop {
            match ready!(Pin::new(&mut this.inner).poll_next(cx)) {
                None => return Poll::Ready(None),
                Some(Ok(item)) if this.kind.matches(&item) => return Poll::Ready(Some(item)),
                Some(Ok(_)) => {}
                Some(Err(BroadcastStreamRecvError::Lagged(skipped))) => {
                    warn!(channel = %this.channel, skipped, "Subscriber lagged, messages skipped");
                }
            }
        }
    }
}

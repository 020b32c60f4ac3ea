//! Packet router
//!
//! Owns the read half of the link. A single task reads whatever the
//! transport delivers, decodes packets and appends each payload to the
//! byte queue of its channel. Payloads of one channel leave in the order
//! they arrived.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};
use veroscan_core::constants::{DEFAULT_QUEUE_CAPACITY, DEFAULT_READ_BUFFER_SIZE};
use veroscan_core::{Channel, FrameError, Packet, PacketDecoder};

use crate::error::{Error, Result};

/// Router settings
#[derive(Debug, Clone, Copy)]
pub struct RouterConfig {
    /// Payloads buffered per channel before the reader waits
    pub queue_capacity: usize,

    /// Bytes reserved for each read
    pub read_buffer_size: usize,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
        }
    }
}

/// Counters maintained by the read loop
#[derive(Debug, Default)]
pub struct RouterStats {
    packets: AtomicU64,
    bytes: AtomicU64,
    frame_errors: AtomicU64,
    dropped_packets: AtomicU64,
}

/// Point-in-time copy of [`RouterStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Packets routed to a channel queue
    pub packets: u64,

    /// Raw bytes read from the transport
    pub bytes: u64,

    /// Corrupted frames skipped
    pub frame_errors: u64,

    /// Intact packets with nowhere to go
    pub dropped_packets: u64,
}

impl RouterStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            packets: self.packets.load(Ordering::Relaxed),
            bytes: self.bytes.load(Ordering::Relaxed),
            frame_errors: self.frame_errors.load(Ordering::Relaxed),
            dropped_packets: self.dropped_packets.load(Ordering::Relaxed),
        }
    }

    fn record(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }
}

/// Receiving ends of the per-channel byte queues
#[derive(Debug)]
pub struct ChannelQueues {
    queues: HashMap<Channel, mpsc::Receiver<Bytes>>,
}

impl ChannelQueues {
    /// Take the queue of `channel` (once)
    pub fn take(&mut self, channel: Channel) -> Option<mpsc::Receiver<Bytes>> {
        self.queues.remove(&channel)
    }
}

/// Handle to a running router task
#[derive(Debug)]
pub struct RouterHandle {
    stats: Arc<RouterStats>,
    shutdown: CancellationToken,
    task: JoinHandle<Result<()>>,
}

impl RouterHandle {
    pub fn stats(&self) -> Arc<RouterStats> {
        Arc::clone(&self.stats)
    }

    /// Ask the read loop to stop
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Wait for the read loop to end and return why it ended
    ///
    /// `Ok(())` means it was shut down on request.
    pub async fn join(self) -> Result<()> {
        match self.task.await {
            Ok(result) => result,
            Err(e) if e.is_cancelled() => Ok(()),
            Err(e) => Err(Error::Task(e.to_string())),
        }
    }
}

/// Spawns the read loop
pub struct PacketRouter;

impl PacketRouter {
    /// Start routing packets read from `reader`
    ///
    /// Every known channel gets a bounded queue. The loop stops when
    /// `shutdown` fires, the transport reaches EOF or a read fails; all
    /// queues close with it.
    pub fn spawn<R>(
        reader: R,
        config: RouterConfig,
        shutdown: CancellationToken,
    ) -> (RouterHandle, ChannelQueues)
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let capacity = config.queue_capacity.max(1);
        let mut senders = HashMap::with_capacity(Channel::ALL.len());
        let mut queues = HashMap::with_capacity(Channel::ALL.len());

        for channel in Channel::ALL {
            let (tx, rx) = mpsc::channel(capacity);
            senders.insert(channel, tx);
            queues.insert(channel, rx);
        }

        let stats = Arc::new(RouterStats::default());
        let read_loop = ReadLoop {
            decoder: PacketDecoder::with_capacity(config.read_buffer_size),
            read_buffer_size: config.read_buffer_size.max(1),
            senders,
            stats: Arc::clone(&stats),
        };

        let task = tokio::spawn(read_loop.run(reader, shutdown.clone()));

        (
            RouterHandle {
                stats,
                shutdown,
                task,
            },
            ChannelQueues { queues },
        )
    }
}

struct ReadLoop {
    decoder: PacketDecoder,
    read_buffer_size: usize,
    senders: HashMap<Channel, mpsc::Sender<Bytes>>,
    stats: Arc<RouterStats>,
}

impl ReadLoop {
    async fn run<R>(mut self, mut reader: R, shutdown: CancellationToken) -> Result<()>
    where
        R: AsyncRead + Unpin,
    {
        debug!("Packet router started");

        loop {
            let buf = self.decoder.buffer_mut();
            buf.reserve(self.read_buffer_size);

            let n = tokio::select! {
                _ = shutdown.cancelled() => {
                    debug!("Packet router shut down");
                    return Ok(());
                }
                read = reader.read_buf(buf) => read?,
            };

            if n == 0 {
                debug!("Transport reached EOF");
                return Err(Error::ConnectionClosed);
            }

            RouterStats::record(&self.stats.bytes, n as u64);
            trace!(n, "Read bytes");

            while let Some(result) = self.decoder.next_packet() {
                match result {
                    Ok(packet) => self.route(packet).await,
                    Err(FrameError::UnknownChannel(tag)) => {
                        warn!("Dropping packet for unknown channel 0x{:02X}", tag);
                        RouterStats::record(&self.stats.dropped_packets, 1);
                    }
                    Err(_) => RouterStats::record(&self.stats.frame_errors, 1),
                }
            }
        }
    }

    async fn route(&mut self, packet: Packet) {
        let channel = packet.channel;

        trace!(
            channel = %channel,
            payload = %hex::encode(&packet.payload[..packet.payload.len().min(32)]),
            "Routing packet"
        );

        let delivered = match self.senders.get(&channel) {
            Some(tx) => tx.send(packet.payload).await.is_ok(),
            None => false,
        };

        if delivered {
            RouterStats::record(&self.stats.packets, 1);
        } else {
            // Consumer gone; stop offering this channel anything
            warn!(channel = %channel, "No queue for channel, dropping packet");
            self.senders.remove(&channel);
            RouterStats::record(&self.stats.dropped_packets, 1);
        }
    }
}

//! Serialised packet writer

use std::sync::Arc;

use async_trait::async_trait;
use bytes::BytesMut;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tracing::trace;
use veroscan_core::Packet;

use crate::PacketSink;
use crate::error::{Error, Result};

/// Write half of the link behind a lock
///
/// One call to [`PacketSink::send_packets`] holds the lock from the first
/// byte of the first packet to the flush after the last, so the packets of
/// a message are never interleaved with another message's packets.
///
/// The write itself runs on its own task. A caller that stops waiting
/// (timeout, cancellation) does not cut a frame short; the bytes already
/// handed over are written out before the lock is released.
pub struct PacketWriter<W> {
    writer: Arc<Mutex<W>>,
}

impl<W> PacketWriter<W>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    pub fn new(writer: W) -> Self {
        Self {
            writer: Arc::new(Mutex::new(writer)),
        }
    }
}

#[async_trait]
impl<W> PacketSink for PacketWriter<W>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    async fn send_packets(&self, packets: Vec<Packet>) -> Result<()> {
        let size = packets.iter().map(Packet::size).sum();
        let mut buf = BytesMut::with_capacity(size);
        for packet in &packets {
            buf.extend_from_slice(&packet.encode());
        }

        trace!(
            packets = packets.len(),
            bytes = buf.len(),
            head = %hex::encode(&buf[..buf.len().min(16)]),
            "Writing packets"
        );

        let writer = Arc::clone(&self.writer);
        let write = tokio::spawn(async move {
            let mut writer = writer.lock().await;
            writer.write_all(&buf).await?;
            writer.flush().await?;
            Ok::<_, Error>(())
        });

        write.await.map_err(|e| Error::Task(e.to_string()))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::time::Duration;
    use tokio::io::AsyncReadExt;
    use veroscan_core::{Channel, PacketDecoder, packetize};

    #[tokio::test]
    async fn test_writes_all_packets() {
        let (host, mut device) = tokio::io::duplex(8192);
        let writer = PacketWriter::new(host);

        let message = bytes::Bytes::from(vec![0x11; 2500]);
        writer
            .send_packets(packetize(Channel::Un20Server, message))
            .await
            .unwrap();

        let mut decoder = PacketDecoder::new();
        let mut received = Vec::new();
        while received.len() < 2500 {
            let mut chunk = [0u8; 512];
            let n = device.read(&mut chunk).await.unwrap();
            decoder.push(&chunk[..n]);
            while let Some(packet) = decoder.next_packet() {
                received.extend_from_slice(&packet.unwrap().payload);
            }
        }

        assert_eq!(received, vec![0x11; 2500]);
    }

    #[tokio::test]
    async fn test_concurrent_messages_not_interleaved() {
        let (host, mut device) = tokio::io::duplex(64 * 1024);
        let writer = std::sync::Arc::new(PacketWriter::new(host));

        let a = {
            let writer = writer.clone();
            tokio::spawn(async move {
                let message = bytes::Bytes::from(vec![0xAA; 3000]);
                writer.send_packets(packetize(Channel::VeroServer, message)).await
            })
        };
        let b = {
            let writer = writer.clone();
            tokio::spawn(async move {
                let message = bytes::Bytes::from(vec![0xBB; 3000]);
                writer.send_packets(packetize(Channel::Un20Server, message)).await
            })
        };
        a.await.unwrap().unwrap();
        b.await.unwrap().unwrap();

        let mut decoder = PacketDecoder::new();
        let mut order = Vec::new();
        while order.len() < 6 {
            let mut chunk = [0u8; 4096];
            let n = device.read(&mut chunk).await.unwrap();
            decoder.push(&chunk[..n]);
            while let Some(packet) = decoder.next_packet() {
                order.push(packet.unwrap().channel);
            }
        }

        // Three packets per message, each message contiguous
        assert_eq!(order[0], order[1]);
        assert_eq!(order[1], order[2]);
        assert_eq!(order[3], order[4]);
        assert_eq!(order[4], order[5]);
        assert!(order[2] != order[3]);
    }

    #[tokio::test]
    async fn test_abandoned_send_finishes_its_frame() {
        // Small pipe the device is not reading yet: the first write stalls
        let (host, mut device) = tokio::io::duplex(16);
        let writer = Arc::new(PacketWriter::new(host));

        let first = Packet::new(Channel::Root, vec![0x21; 200]).unwrap();
        let second = Packet::new(Channel::VeroServer, vec![0x10, 0x00, 0x00, 0x00]).unwrap();

        let abandoned =
            tokio::time::timeout(Duration::from_millis(20), writer.send_packets(vec![first.clone()])).await;
        assert!(abandoned.is_err());

        let next = {
            let writer = writer.clone();
            let second = second.clone();
            tokio::spawn(async move { writer.send_packets(vec![second]).await })
        };

        let mut decoder = PacketDecoder::new();
        let mut received = Vec::new();
        while received.len() < 2 {
            let mut chunk = [0u8; 64];
            let n = device.read(&mut chunk).await.unwrap();
            decoder.push(&chunk[..n]);
            while let Some(packet) = decoder.next_packet() {
                received.push(packet.unwrap());
            }
        }
        next.await.unwrap().unwrap();

        assert_eq!(received, vec![first, second]);
        assert_eq!(decoder.buffered(), 0);
    }
}

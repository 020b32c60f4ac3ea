//! In-memory scanner for integration tests
//!
//! Speaks the device side of the protocol over a `tokio::io::duplex` pipe,
//! using the same codec as the host.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream, ReadHalf, WriteHalf};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use veroscan::{IncomingMessage, OutgoingMessage};
use veroscan_core::message::{RootCommand, Un20Command, VeroCommand};
use veroscan_core::{Accumulator, Channel, PacketDecoder, packetize};

pub struct FakeScanner {
    writer: Arc<Mutex<Option<WriteHalf<DuplexStream>>>>,
    commands: mpsc::UnboundedReceiver<OutgoingMessage>,
    reader: JoinHandle<()>,
}

impl FakeScanner {
    /// Returns the simulator and the host end of the link
    pub fn new() -> (Self, DuplexStream) {
        let (host, device) = tokio::io::duplex(64 * 1024);
        let (read_half, write_half) = tokio::io::split(device);
        let (tx, rx) = mpsc::unbounded_channel();

        let reader = tokio::spawn(read_commands(read_half, tx));

        (
            Self {
                writer: Arc::new(Mutex::new(Some(write_half))),
                commands: rx,
                reader,
            },
            host,
        )
    }

    /// Next command the host sent
    pub async fn next_command(&mut self) -> Option<OutgoingMessage> {
        tokio::time::timeout(Duration::from_secs(5), self.commands.recv())
            .await
            .ok()
            .flatten()
    }

    /// Command received within `wait`, if any
    pub async fn try_next_command(&mut self, wait: Duration) -> Option<OutgoingMessage> {
        tokio::time::timeout(wait, self.commands.recv())
            .await
            .ok()
            .flatten()
    }

    /// Encoded packets carrying `message`
    pub fn frames(message: impl Into<IncomingMessage>) -> Vec<Vec<u8>> {
        let message = message.into();
        let encoded = message.encode().expect("encode");
        packetize(message.channel(), encoded)
            .iter()
            .map(|packet| packet.encode().to_vec())
            .collect()
    }

    pub async fn respond(&self, message: impl Into<IncomingMessage>) {
        let bytes: Vec<u8> = Self::frames(message).concat();
        self.write_raw(&bytes).await;
    }

    pub async fn write_raw(&self, bytes: &[u8]) {
        let mut writer = self.writer.lock().await;
        if let Some(writer) = writer.as_mut() {
            writer.write_all(bytes).await.expect("write");
            writer.flush().await.expect("flush");
        }
    }

    /// Send a raw message payload on `channel`, bypassing the message codec
    pub async fn write_payload(&self, channel: Channel, payload: &[u8]) {
        let frames: Vec<u8> = packetize(channel, Bytes::copy_from_slice(payload))
            .iter()
            .flat_map(|packet| packet.encode().to_vec())
            .collect();
        self.write_raw(&frames).await;
    }

    /// Close the link; the host sees EOF
    pub async fn close(self) {
        self.reader.abort();
        let _ = self.reader.await;
        self.writer.lock().await.take();
    }
}

async fn read_commands(mut reader: ReadHalf<DuplexStream>, commands: mpsc::UnboundedSender<OutgoingMessage>) {
    let mut decoder = PacketDecoder::new();
    let mut vero = Accumulator::<VeroCommand>::new(Channel::VeroServer);
    let mut un20 = Accumulator::<Un20Command>::new(Channel::Un20Server);
    let mut root = Accumulator::<RootCommand>::new(Channel::Root);

    let mut buf = vec![0u8; 4096];
    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(n) => n,
        };
        decoder.push(&buf[..n]);

        while let Some(Ok(packet)) = decoder.next_packet() {
            match packet.channel {
                Channel::VeroServer => vero.push(&packet.payload),
                Channel::Un20Server => un20.push(&packet.payload),
                Channel::Root => root.push(&packet.payload),
                Channel::VeroEvent => continue,
            }

            while let Some(Ok(command)) = vero.next_message() {
                let _ = commands.send(command.into());
            }
            while let Some(Ok(command)) = un20.next_message() {
                let _ = commands.send(command.into());
            }
            while let Some(Ok(command)) = root.next_message() {
                let _ = commands.send(command.into());
            }
        }
    }
}

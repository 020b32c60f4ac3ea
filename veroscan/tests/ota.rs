//! Firmware updates against the in-memory scanner

mod common;

use std::time::Duration;

use bytes::Bytes;
use common::FakeScanner;
use pretty_assertions::assert_eq;
use tokio::task::JoinHandle;
use tokio_stream::StreamExt;
use veroscan::{
    Chip, DeviceMode, Error, OtaConfig, OtaEvent, OtaFailure, OtaState, OutgoingMessage, Scanner,
    ScannerConfig,
};
use veroscan_core::message::{OperationResult, RootCommand, RootResponse, VeroCommand, VeroResponse};

const CHUNK_SIZE: usize = 256;

fn image(len: usize) -> Bytes {
    (0..len).map(|i| (i * 7) as u8).collect::<Vec<u8>>().into()
}

fn config() -> ScannerConfig {
    ScannerConfig::new().with_ota(
        OtaConfig::default()
            .with_chunk_size(CHUNK_SIZE)
            .with_chunk_timeout(Duration::from_millis(300))
            .with_mode_switch_timeout(Duration::from_millis(300))
            .with_max_chunk_retries(2),
    )
}

async fn connected() -> (Scanner, FakeScanner) {
    let scanner = Scanner::with_config(config()).unwrap();
    let (fake, link) = FakeScanner::new();
    scanner.connect(link).await.unwrap();
    (scanner, fake)
}

/// How the simulated bootloader treats chunk writes
#[derive(Clone, Copy)]
enum ChunkBehaviour {
    Accept,
    /// Reject the chunk at this offset once
    RejectOnce(u32),
    /// Ignore the chunk at this offset once
    DropOnce(u32),
    /// Report a wrong image checksum
    CorruptVerify,
}

/// Reply the way a healthy bootloader does; `stored` is the image so far
async fn answer(fake: &FakeScanner, command: &OutgoingMessage, stored: &mut Vec<u8>) {
    match command {
        OutgoingMessage::Vero(VeroCommand::EnterRootMode) => {
            fake.respond(VeroResponse::EnterRootMode).await;
        }
        OutgoingMessage::Root(RootCommand::StartOta { .. }) => {
            fake.respond(RootResponse::StartOta(OperationResult::Ok)).await;
        }
        OutgoingMessage::Root(RootCommand::WriteOtaChunk { offset, data, .. }) => {
            stored.truncate(*offset as usize);
            stored.extend_from_slice(data);
            fake.respond(RootResponse::WriteOtaChunk {
                result: OperationResult::Ok,
                bytes_acknowledged: stored.len() as u32,
            })
            .await;
        }
        OutgoingMessage::Root(RootCommand::VerifyOta { .. }) => {
            fake.respond(RootResponse::VerifyOta {
                crc32: crc32fast::hash(stored),
            })
            .await;
        }
        OutgoingMessage::Root(RootCommand::EnterMainMode) => {
            fake.respond(RootResponse::EnterMainMode).await;
        }
        other => panic!("unexpected command {:?}", other),
    }
}

/// Answer every command of a well-behaved update
fn run_device(mut fake: FakeScanner, behaviour: ChunkBehaviour) -> JoinHandle<Vec<OutgoingMessage>> {
    tokio::spawn(async move {
        let mut received = Vec::new();
        let mut stored: Vec<u8> = Vec::new();
        let mut misbehaved = false;

        while let Some(command) = fake.next_command().await {
            received.push(command.clone());

            match (&command, behaviour) {
                (
                    OutgoingMessage::Root(RootCommand::WriteOtaChunk { offset, .. }),
                    ChunkBehaviour::RejectOnce(at),
                ) if *offset == at && !misbehaved => {
                    misbehaved = true;
                    fake.respond(RootResponse::WriteOtaChunk {
                        result: OperationResult::Failed(0x03),
                        bytes_acknowledged: stored.len() as u32,
                    })
                    .await;
                }
                (
                    OutgoingMessage::Root(RootCommand::WriteOtaChunk { offset, .. }),
                    ChunkBehaviour::DropOnce(at),
                ) if *offset == at && !misbehaved => {
                    misbehaved = true;
                }
                (OutgoingMessage::Root(RootCommand::VerifyOta { .. }), ChunkBehaviour::CorruptVerify) => {
                    fake.respond(RootResponse::VerifyOta {
                        crc32: crc32fast::hash(&stored) ^ 1,
                    })
                    .await;
                }
                _ => answer(&fake, &command, &mut stored).await,
            }
        }

        received
    })
}

async fn collect(handle: veroscan::OtaHandle) -> Vec<OtaEvent> {
    tokio::time::timeout(Duration::from_secs(10), handle.collect::<Vec<_>>())
        .await
        .expect("update did not finish")
}

fn assert_progress_monotonic(events: &[OtaEvent]) {
    let mut last = 0;
    for event in events {
        if let OtaEvent::Progress(progress) = event {
            assert!(progress.bytes_acknowledged >= last, "{:?}", events);
            last = progress.bytes_acknowledged;
        }
    }
}

fn assert_single_terminal(events: &[OtaEvent]) {
    let terminals = events.iter().filter(|event| event.is_terminal()).count();
    assert_eq!(terminals, 1, "{:?}", events);
    assert!(events.last().unwrap().is_terminal());
}

#[tokio::test]
async fn test_successful_update() {
    let (scanner, fake) = connected().await;
    let device = run_device(fake, ChunkBehaviour::Accept);
    let firmware = image(1000);

    let handle = scanner.start_ota(firmware.clone(), Chip::Stm).unwrap();
    let events = collect(handle).await;

    assert_progress_monotonic(&events);
    assert_single_terminal(&events);

    match events.last().unwrap() {
        OtaEvent::Complete(report) => {
            assert!(report.succeeded());
            assert_eq!(report.bytes_acknowledged, 1000);
            assert_eq!(report.total_bytes, 1000);
        }
        other => panic!("update failed: {:?}", other),
    }

    let states: Vec<OtaState> = events
        .iter()
        .filter_map(|event| match event {
            OtaEvent::Progress(progress) => Some(progress.state),
            _ => None,
        })
        .collect();
    assert_eq!(states.first(), Some(&OtaState::Transferring));
    assert_eq!(states.last(), Some(&OtaState::Verifying));

    assert_eq!(scanner.mode(), DeviceMode::Main);
    assert!(!scanner.is_ota_in_progress());

    scanner.disconnect().await.unwrap();
    let received = device.await.unwrap();

    // Root mode, start, 4 chunks, verify, main mode
    assert_eq!(received.len(), 8);
    assert_eq!(received[0], OutgoingMessage::Vero(VeroCommand::EnterRootMode));
    assert_eq!(
        received[1],
        OutgoingMessage::Root(RootCommand::StartOta {
            chip: Chip::Stm,
            total_bytes: 1000
        })
    );
    assert_eq!(received[7], OutgoingMessage::Root(RootCommand::EnterMainMode));
}

#[tokio::test]
async fn test_disconnect_during_transfer() {
    let (scanner, mut fake) = connected().await;

    let device = tokio::spawn(async move {
        let mut chunks = 0;
        while let Some(command) = fake.next_command().await {
            match command {
                OutgoingMessage::Vero(VeroCommand::EnterRootMode) => {
                    fake.respond(VeroResponse::EnterRootMode).await;
                }
                OutgoingMessage::Root(RootCommand::StartOta { .. }) => {
                    fake.respond(RootResponse::StartOta(OperationResult::Ok)).await;
                }
                OutgoingMessage::Root(RootCommand::WriteOtaChunk { offset, data, .. }) => {
                    chunks += 1;
                    if chunks == 2 {
                        // Pull the plug mid-transfer
                        fake.close().await;
                        return;
                    }
                    fake.respond(RootResponse::WriteOtaChunk {
                        result: OperationResult::Ok,
                        bytes_acknowledged: offset + data.len() as u32,
                    })
                    .await;
                }
                other => panic!("unexpected command {:?}", other),
            }
        }
    });

    let handle = scanner.start_ota(image(2000), Chip::Un20).unwrap();
    let events = collect(handle).await;

    assert_progress_monotonic(&events);
    assert_single_terminal(&events);

    match events.last().unwrap() {
        OtaEvent::Failed { cause, report } => {
            assert_eq!(*cause, OtaFailure::Disconnected);
            assert_eq!(report.bytes_acknowledged, CHUNK_SIZE as u32);
            assert!(!report.succeeded());
        }
        other => panic!("expected failure, got {:?}", other),
    }

    assert!(events.iter().any(|event| matches!(
        event,
        OtaEvent::Progress(progress) if progress.state == OtaState::Transferring
    )));

    device.await.unwrap();
    assert!(!scanner.is_ota_in_progress());
}

#[tokio::test]
async fn test_rejected_chunk_is_retried() {
    let (scanner, fake) = connected().await;
    let device = run_device(fake, ChunkBehaviour::RejectOnce(CHUNK_SIZE as u32));

    let handle = scanner.start_ota(image(600), Chip::Cypress).unwrap();
    let events = collect(handle).await;

    assert_progress_monotonic(&events);
    assert!(matches!(events.last(), Some(OtaEvent::Complete(_))), "{:?}", events);

    scanner.disconnect().await.unwrap();
    let received = device.await.unwrap();
    let writes = received
        .iter()
        .filter(|command| matches!(command, OutgoingMessage::Root(RootCommand::WriteOtaChunk { .. })))
        .count();
    assert_eq!(writes, 4);
}

#[tokio::test]
async fn test_timed_out_chunk_is_retried() {
    let (scanner, fake) = connected().await;
    let device = run_device(fake, ChunkBehaviour::DropOnce(0));

    let handle = scanner.start_ota(image(300), Chip::Stm).unwrap();
    let events = collect(handle).await;

    assert!(matches!(events.last(), Some(OtaEvent::Complete(_))), "{:?}", events);

    scanner.disconnect().await.unwrap();
    device.await.unwrap();
}

#[tokio::test]
async fn test_checksum_mismatch() {
    let (scanner, fake) = connected().await;
    let device = run_device(fake, ChunkBehaviour::CorruptVerify);
    let firmware = image(512);

    let handle = scanner.start_ota(firmware.clone(), Chip::Stm).unwrap();
    let events = collect(handle).await;

    assert_single_terminal(&events);
    match events.last().unwrap() {
        OtaEvent::Failed { cause, .. } => {
            let expected = crc32fast::hash(&firmware);
            assert_eq!(
                *cause,
                OtaFailure::ChecksumMismatch {
                    expected,
                    actual: expected ^ 1
                }
            );
        }
        other => panic!("expected failure, got {:?}", other),
    }

    // Still in the bootloader
    assert_eq!(scanner.mode(), DeviceMode::Root);

    scanner.disconnect().await.unwrap();
    device.await.unwrap();
}

#[tokio::test]
async fn test_cancel() {
    let (scanner, mut fake) = connected().await;

    let handle = scanner.start_ota(image(4096), Chip::Stm).unwrap();

    // Answer the mode switch, then stall
    assert_eq!(
        fake.next_command().await.unwrap(),
        OutgoingMessage::Vero(VeroCommand::EnterRootMode)
    );
    fake.respond(VeroResponse::EnterRootMode).await;
    fake.next_command().await.unwrap();

    handle.cancel();
    let events = collect(handle).await;

    assert_single_terminal(&events);
    assert!(
        matches!(
            events.last(),
            Some(OtaEvent::Failed {
                cause: OtaFailure::Cancelled,
                ..
            })
        ),
        "{:?}",
        events
    );
    assert!(!scanner.is_ota_in_progress());

    // The stalled start timed out; no chunk followed it
    assert!(fake.try_next_command(Duration::from_millis(100)).await.is_none());
}

#[tokio::test]
async fn test_cancel_lets_chunk_in_flight_finish() {
    let (scanner, mut fake) = connected().await;
    let mut stored = Vec::new();

    let mut handle = scanner.start_ota(image(1000), Chip::Stm).unwrap();

    for _ in 0..2 {
        let command = fake.next_command().await.unwrap();
        answer(&fake, &command, &mut stored).await;
    }

    let chunk = fake.next_command().await.unwrap();
    assert!(matches!(
        chunk,
        OutgoingMessage::Root(RootCommand::WriteOtaChunk { offset: 0, .. })
    ));

    handle.cancel();
    answer(&fake, &chunk, &mut stored).await;

    let mut events = Vec::new();
    while let Some(event) = tokio::time::timeout(Duration::from_secs(5), handle.next())
        .await
        .expect("update did not finish")
    {
        events.push(event);
    }

    assert_progress_monotonic(&events);
    assert_single_terminal(&events);
    assert!(events.iter().any(|event| matches!(
        event,
        OtaEvent::Progress(progress) if progress.bytes_acknowledged == CHUNK_SIZE as u32
    )));

    match events.last().unwrap() {
        OtaEvent::Failed { cause, report } => {
            assert_eq!(*cause, OtaFailure::Cancelled);
            assert_eq!(report.bytes_acknowledged, CHUNK_SIZE as u32);
        }
        other => panic!("expected cancellation, got {:?}", other),
    }

    // Nothing after the terminal event, and no second chunk on the wire
    assert!(handle.next().await.is_none());
    assert!(fake.try_next_command(Duration::from_millis(100)).await.is_none());
    assert!(!scanner.is_ota_in_progress());
}

#[tokio::test]
async fn test_update_does_not_cross_reconnect() {
    let (scanner, mut fake) = connected().await;
    let mut stored = Vec::new();

    // Nobody reads the handle, so the update stalls once its event
    // buffer is full
    let handle = scanner.start_ota(image(100 * CHUNK_SIZE), Chip::Un20).unwrap();
    while let Some(command) = fake.try_next_command(Duration::from_millis(200)).await {
        answer(&fake, &command, &mut stored).await;
    }
    assert!(stored.len() < 100 * CHUNK_SIZE);

    scanner.disconnect().await.unwrap();
    drop(fake);

    let (mut fresh, link) = FakeScanner::new();
    scanner.connect(link).await.unwrap();

    let events = collect(handle).await;
    assert_progress_monotonic(&events);
    assert_single_terminal(&events);
    assert!(
        matches!(
            events.last(),
            Some(OtaEvent::Failed {
                cause: OtaFailure::Disconnected,
                ..
            })
        ),
        "{:?}",
        events
    );

    // The new device never hears from the old update
    assert!(fresh.try_next_command(Duration::from_millis(200)).await.is_none());
    assert_eq!(scanner.mode(), DeviceMode::Unknown);
    assert!(!scanner.is_ota_in_progress());
}

#[tokio::test]
async fn test_one_update_at_a_time() {
    let (scanner, _fake) = connected().await;

    let first = scanner.start_ota(image(100), Chip::Stm).unwrap();
    assert!(matches!(
        scanner.start_ota(image(100), Chip::Un20),
        Err(Error::OtaInProgress)
    ));

    first.cancel();
    let _ = collect(first).await;
    assert!(!scanner.is_ota_in_progress());
}

#[tokio::test]
async fn test_requires_connection() {
    let scanner = Scanner::new();
    assert!(matches!(
        scanner.start_ota(image(10), Chip::Stm),
        Err(Error::NotConnected)
    ));
}

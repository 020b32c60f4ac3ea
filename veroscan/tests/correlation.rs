//! Request/response correlation over an in-memory link

mod common;

use std::time::Duration;

use bytes::Bytes;
use common::FakeScanner;
use pretty_assertions::assert_eq;
use tokio_stream::StreamExt;
use veroscan::{Channel, Error, IncomingMessage, MessageKind, OutgoingMessage, Scanner, ScannerConfig};
use veroscan_core::DecodeFaultKind;
use veroscan_core::constants::image_format;
use veroscan_core::message::{Un20Command, Un20Response, VeroCommand, VeroEvent, VeroResponse};

async fn connected(config: ScannerConfig) -> (Scanner, FakeScanner) {
    let scanner = Scanner::with_config(config).unwrap();
    let (fake, link) = FakeScanner::new();
    scanner.connect(link).await.unwrap();
    (scanner, fake)
}

#[tokio::test]
async fn test_battery_voltage() {
    let (scanner, mut fake) = connected(ScannerConfig::default()).await;

    let request = tokio::spawn({
        let scanner = scanner.clone();
        async move { scanner.get_battery_voltage().await }
    });

    let command = fake.next_command().await.unwrap();
    assert_eq!(command, OutgoingMessage::Vero(VeroCommand::GetBatteryVoltage));

    // Response 0x10 with data A0 0F
    fake.write_payload(Channel::VeroServer, &[0x10, 0x00, 0x02, 0x00, 0xA0, 0x0F])
        .await;

    assert_eq!(request.await.unwrap().unwrap(), 4000);
    assert_eq!(scanner.mode(), veroscan::DeviceMode::Main);
}

#[tokio::test]
async fn test_concurrent_channels_with_interleaved_packets() {
    let (scanner, mut fake) = connected(ScannerConfig::default()).await;

    let image: Bytes = (0..3000u32).map(|i| i as u8).collect::<Vec<u8>>().into();

    let image_request = tokio::spawn({
        let scanner = scanner.clone();
        async move { scanner.get_image(image_format::RAW).await }
    });
    let battery_request = tokio::spawn({
        let scanner = scanner.clone();
        async move { scanner.get_battery_voltage().await }
    });

    let mut seen = vec![fake.next_command().await.unwrap(), fake.next_command().await.unwrap()];
    seen.sort_by_key(|command| command.channel() as u8);
    assert_eq!(
        seen,
        vec![
            OutgoingMessage::Vero(VeroCommand::GetBatteryVoltage),
            OutgoingMessage::Un20(Un20Command::GetImage {
                image_format: image_format::RAW
            }),
        ]
    );

    let image_frames = FakeScanner::frames(Un20Response::GetImage {
        image_format: image_format::RAW,
        image: image.clone(),
    });
    let battery_frames = FakeScanner::frames(VeroResponse::GetBatteryVoltage { millivolts: 3850 });
    assert!(image_frames.len() >= 3);
    assert_eq!(battery_frames.len(), 1);

    // Image packet, battery packet, rest of the image
    fake.write_raw(&image_frames[0]).await;
    fake.write_raw(&battery_frames[0]).await;
    for frame in &image_frames[1..] {
        fake.write_raw(frame).await;
    }

    assert_eq!(battery_request.await.unwrap().unwrap(), 3850);
    assert_eq!(image_request.await.unwrap().unwrap(), image);
}

#[tokio::test]
async fn test_timeout_then_resend() {
    let config = ScannerConfig::new().with_response_timeout(Duration::from_millis(100));
    let (scanner, mut fake) = connected(config).await;

    let first = tokio::spawn({
        let scanner = scanner.clone();
        async move { scanner.get_battery_voltage().await }
    });
    fake.next_command().await.unwrap();

    let result = first.await.unwrap();
    assert!(matches!(
        result,
        Err(Error::Timeout {
            channel: Channel::VeroServer,
            ..
        })
    ));

    // The channel is free again right away
    let second = tokio::spawn({
        let scanner = scanner.clone();
        async move {
            scanner
                .send(
                    Channel::VeroServer,
                    VeroCommand::GetBatteryVoltage,
                    0x10,
                    Duration::from_secs(5),
                )
                .await
        }
    });
    assert_eq!(
        fake.next_command().await.unwrap(),
        OutgoingMessage::Vero(VeroCommand::GetBatteryVoltage)
    );
    fake.respond(VeroResponse::GetBatteryVoltage { millivolts: 4000 }).await;

    assert_eq!(
        second.await.unwrap().unwrap(),
        IncomingMessage::VeroResponse(VeroResponse::GetBatteryVoltage { millivolts: 4000 })
    );
}

#[tokio::test]
async fn test_second_request_on_busy_channel() {
    let (scanner, mut fake) = connected(ScannerConfig::default()).await;

    let first = tokio::spawn({
        let scanner = scanner.clone();
        async move { scanner.get_battery_voltage().await }
    });
    fake.next_command().await.unwrap();

    let second = scanner.get_un20_on().await;
    assert!(matches!(
        second,
        Err(Error::RequestInFlight {
            channel: Channel::VeroServer
        })
    ));

    fake.respond(VeroResponse::GetBatteryVoltage { millivolts: 3700 }).await;
    assert_eq!(first.await.unwrap().unwrap(), 3700);
}

#[tokio::test]
async fn test_events_reach_subscribers() {
    let (scanner, fake) = connected(ScannerConfig::default()).await;
    let mut presses = scanner.subscribe(Channel::VeroEvent, MessageKind::Type(0x32));
    let mut everything = scanner.subscribe(Channel::VeroEvent, MessageKind::Any);

    fake.respond(VeroEvent::Un20StateChange { on: true }).await;
    fake.respond(VeroEvent::TriggerButtonPressed).await;

    assert_eq!(
        presses.next().await.unwrap().unwrap(),
        IncomingMessage::VeroEvent(VeroEvent::TriggerButtonPressed)
    );
    assert_eq!(
        everything.next().await.unwrap().unwrap(),
        IncomingMessage::VeroEvent(VeroEvent::Un20StateChange { on: true })
    );
    assert_eq!(
        everything.next().await.unwrap().unwrap(),
        IncomingMessage::VeroEvent(VeroEvent::TriggerButtonPressed)
    );
}

#[tokio::test]
async fn test_unsolicited_response_goes_to_subscribers() {
    let (scanner, fake) = connected(ScannerConfig::default()).await;
    let mut responses = scanner.subscribe(Channel::VeroServer, MessageKind::Any);

    fake.respond(VeroResponse::GetBatteryPercentCharge { percent: 42 }).await;

    assert_eq!(
        responses.next().await.unwrap().unwrap(),
        IncomingMessage::VeroResponse(VeroResponse::GetBatteryPercentCharge { percent: 42 })
    );
}

#[tokio::test]
async fn test_decode_fault_is_reported_and_stream_continues() {
    let (scanner, fake) = connected(ScannerConfig::default()).await;
    let mut events = scanner.subscribe(Channel::VeroEvent, MessageKind::Any);

    fake.write_payload(Channel::VeroEvent, &[0x7E, 0x00, 0x01, 0x00, 0xFF])
        .await;
    fake.respond(VeroEvent::TriggerButtonPressed).await;

    let fault = events.next().await.unwrap().unwrap_err();
    assert_eq!(fault.channel, Channel::VeroEvent);
    assert_eq!(fault.kind, DecodeFaultKind::UnknownMessageType(0x7E));

    assert_eq!(
        events.next().await.unwrap().unwrap(),
        IncomingMessage::VeroEvent(VeroEvent::TriggerButtonPressed)
    );
}

#[tokio::test]
async fn test_garbage_on_the_link_is_skipped() {
    let (scanner, mut fake) = connected(ScannerConfig::default()).await;

    let request = tokio::spawn({
        let scanner = scanner.clone();
        async move { scanner.get_battery_percent_charge().await }
    });
    fake.next_command().await.unwrap();

    // Noise, a frame with a broken checksum, then the real response
    let mut corrupted = FakeScanner::frames(VeroResponse::GetBatteryPercentCharge { percent: 1 })
        .concat();
    let last = corrupted.len() - 1;
    corrupted[last] ^= 0xFF;
    fake.write_raw(&[0x00, 0x13, 0x37]).await;
    fake.write_raw(&corrupted).await;
    fake.respond(VeroResponse::GetBatteryPercentCharge { percent: 77 }).await;

    assert_eq!(request.await.unwrap().unwrap(), 77);

    let stats = scanner.stats().unwrap();
    assert!(stats.frame_errors >= 2, "{:?}", stats);
}

#[tokio::test]
async fn test_disconnect_fails_pending_request() {
    let (scanner, mut fake) = connected(ScannerConfig::default()).await;

    let request = tokio::spawn({
        let scanner = scanner.clone();
        async move { scanner.get_extended_version().await }
    });
    fake.next_command().await.unwrap();

    scanner.disconnect().await.unwrap();
    assert!(!scanner.is_connected());

    let result = request.await.unwrap();
    assert!(matches!(
        result,
        Err(Error::Disconnected {
            channel: Channel::Root
        })
    ));

    // Idempotent
    scanner.disconnect().await.unwrap();
    assert!(matches!(scanner.get_battery_voltage().await, Err(Error::NotConnected)));
}

#[tokio::test]
async fn test_link_closed_by_device() {
    let (scanner, mut fake) = connected(ScannerConfig::default()).await;

    let request = tokio::spawn({
        let scanner = scanner.clone();
        async move { scanner.get_stm_firmware_version().await }
    });
    fake.next_command().await.unwrap();
    fake.close().await;

    let result = request.await.unwrap();
    assert!(result.as_ref().is_err_and(Error::requires_reconnect), "{:?}", result);

    // The watcher tears the connection down on its own
    for _ in 0..100 {
        if !scanner.is_connected() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(!scanner.is_connected());
}

#[tokio::test]
async fn test_reconnect_keeps_subscriptions() {
    let (scanner, fake) = connected(ScannerConfig::default()).await;
    let mut events = scanner.subscribe(Channel::VeroEvent, MessageKind::Any);

    scanner.disconnect().await.unwrap();
    drop(fake);

    let (fake, link) = FakeScanner::new();
    scanner.connect(link).await.unwrap();
    fake.respond(VeroEvent::TriggerButtonPressed).await;

    assert_eq!(
        events.next().await.unwrap().unwrap(),
        IncomingMessage::VeroEvent(VeroEvent::TriggerButtonPressed)
    );
}

#[tokio::test]
async fn test_connect_twice_rejected() {
    let (scanner, _fake) = connected(ScannerConfig::default()).await;
    let (_other, link) = FakeScanner::new();

    assert!(matches!(scanner.connect(link).await, Err(Error::AlreadyConnected)));
}

#[tokio::test]
async fn test_capture_and_template() {
    let (scanner, mut fake) = connected(ScannerConfig::default()).await;

    let capture = tokio::spawn({
        let scanner = scanner.clone();
        async move { scanner.capture_fingerprint(500).await }
    });
    assert_eq!(
        fake.next_command().await.unwrap(),
        OutgoingMessage::Un20(Un20Command::CaptureFingerprint { dpi: 500 })
    );
    fake.respond(Un20Response::CaptureFingerprint(
        veroscan_core::constants::CaptureResult::Ok,
    ))
    .await;
    assert_eq!(
        capture.await.unwrap().unwrap(),
        veroscan_core::constants::CaptureResult::Ok
    );

    let template = tokio::spawn({
        let scanner = scanner.clone();
        async move { scanner.get_template(0).await }
    });
    fake.next_command().await.unwrap();
    fake.respond(Un20Response::GetTemplate {
        template_type: 0,
        template: Bytes::from_static(b"minutiae"),
    })
    .await;
    assert_eq!(&template.await.unwrap().unwrap()[..], b"minutiae");
}

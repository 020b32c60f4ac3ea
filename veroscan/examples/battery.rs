//! Read battery and firmware information
//!
//! Expects a serial-to-TCP bridge in front of the scanner.

use tokio::net::TcpStream;
use tokio_stream::StreamExt;
use veroscan::{Channel, MessageKind, Scanner};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let addr = std::env::var("SCANNER_ADDR").unwrap_or_else(|_| "127.0.0.1:9000".to_string());

    let link = TcpStream::connect(&addr).await?;
    link.set_nodelay(true)?;

    let scanner = Scanner::new();
    scanner.connect(link).await?;

    println!("Connected to {}", addr);

    let version = scanner.get_stm_firmware_version().await?;
    println!("STM firmware: {}", version);

    let battery = scanner.battery_info().await?;
    println!("Battery: {}", battery);
    if battery.is_low(20) {
        println!("Battery is low, charge the scanner");
    }

    // Print trigger presses for a few seconds
    let mut events = scanner.subscribe(Channel::VeroEvent, MessageKind::Any);
    let deadline = tokio::time::sleep(std::time::Duration::from_secs(5));
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = &mut deadline => break,
            event = events.next() => match event {
                Some(Ok(message)) => println!("Event: {}", message),
                Some(Err(fault)) => println!("Bad event: {}", fault),
                None => break,
            },
        }
    }

    scanner.disconnect().await?;

    Ok(())
}

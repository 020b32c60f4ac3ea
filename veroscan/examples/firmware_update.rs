//! Update one chip's firmware
//!
//! Usage: `firmware_update <stm|cypress|un20> <image file>`

use anyhow::{Context, bail};
use tokio::net::TcpStream;
use tokio_stream::StreamExt;
use veroscan::{Chip, OtaEvent, Scanner};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let mut args = std::env::args().skip(1);
    let chip = match args.next().as_deref() {
        Some("cypress") => Chip::Cypress,
        Some("stm") => Chip::Stm,
        Some("un20") => Chip::Un20,
        _ => bail!("usage: firmware_update <stm|cypress|un20> <image file>"),
    };
    let path = args.next().context("missing image file")?;
    let image = tokio::fs::read(&path)
        .await
        .with_context(|| format!("reading {}", path))?;

    let addr = std::env::var("SCANNER_ADDR").unwrap_or_else(|_| "127.0.0.1:9000".to_string());
    let scanner = Scanner::new();
    scanner.connect(TcpStream::connect(&addr).await?).await?;

    let mut update = scanner.start_ota(image, chip)?;

    // Ctrl-C cancels the update
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut cancelled = false;

    loop {
        let event = tokio::select! {
            event = update.next() => event,
            _ = &mut ctrl_c, if !cancelled => {
                println!("Cancelling...");
                update.cancel();
                cancelled = true;
                continue;
            }
        };

        match event {
            Some(OtaEvent::Progress(progress)) => {
                println!("{:>5.1}% ({})", progress.fraction() * 100.0, progress.state);
            }
            Some(OtaEvent::Complete(report)) => {
                println!("Done: {}", report);
                break;
            }
            Some(OtaEvent::Failed { cause, report }) => {
                println!("Failed ({}): {}", cause, report);
                break;
            }
            None => break,
        }
    }

    scanner.disconnect().await?;
    Ok(())
}

//! Firmware updates
//!
//! An update runs as a background task driven by the host:
//!
//! ```text
//! enter root mode -> StartOta -> WriteOtaChunk x N -> VerifyOta -> enter main mode
//! ```
//!
//! Each chunk is one round trip. Progress and the final outcome are
//! reported on the [`OtaHandle`] stream.
//!
//! Cancellation is checked between round trips: a request already on the
//! wire is answered (or times out) first. The update is tied to the
//! connection it started on and fails with `Disconnected` once that
//! connection ends, even if a new one has been made since.

use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use chrono::Utc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use veroscan_core::DeviceMode;
use veroscan_core::message::{OperationResult, RootCommand, RootResponse};
use veroscan_types::{Chip, OtaProgress, OtaReport, OtaState};

use crate::config::OtaConfig;
use crate::error::Error;
use crate::scanner::{Link, Scanner};

const EVENT_CAPACITY: usize = 64;

/// Update lifecycle notification
#[derive(Debug, Clone, PartialEq)]
pub enum OtaEvent {
    Progress(OtaProgress),
    Complete(OtaReport),
    Failed { cause: OtaFailure, report: OtaReport },
}

impl OtaEvent {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Progress(_))
    }
}

/// Why an update stopped
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OtaFailure {
    #[error("cancelled")]
    Cancelled,

    #[error("scanner disconnected")]
    Disconnected,

    #[error("timed out waiting for the scanner")]
    Timeout,

    #[error("scanner rejected the update (status 0x{status:02X})")]
    Rejected { status: u8 },

    #[error("image checksum mismatch: expected 0x{expected:08X}, scanner computed 0x{actual:08X}")]
    ChecksumMismatch { expected: u32, actual: u32 },

    #[error("protocol error: {0}")]
    Protocol(String),
}

impl OtaFailure {
    /// Worth sending the same chunk again
    fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout | Self::Rejected { .. })
    }
}

impl From<Error> for OtaFailure {
    fn from(error: Error) -> Self {
        match error {
            Error::Timeout { .. } => Self::Timeout,
            Error::OperationFailed { status, .. } => Self::Rejected { status },
            e if e.requires_reconnect() => Self::Disconnected,
            e => Self::Protocol(e.to_string()),
        }
    }
}

/// Running update: a stream of [`OtaEvent`]s ending with exactly one
/// terminal event
///
/// Dropping the handle does not stop the update; call [`OtaHandle::cancel`].
pub struct OtaHandle {
    chip: Chip,
    events: ReceiverStream<OtaEvent>,
    cancel: CancellationToken,
}

impl OtaHandle {
    pub fn chip(&self) -> Chip {
        self.chip
    }

    /// Ask the update to stop; it ends with `Failed { cause: Cancelled }`
    ///
    /// No further request is sent. One already in flight completes first
    /// and its acknowledgment still shows up in the progress.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Skip progress and wait for the terminal event
    pub async fn outcome(mut self) -> Option<OtaEvent> {
        while let Some(event) = self.events.next().await {
            if event.is_terminal() {
                return Some(event);
            }
        }
        None
    }
}

impl Stream for OtaHandle {
    type Item = OtaEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.get_mut().events).poll_next(cx)
    }
}

/// Progress bookkeeping of one update
struct OtaSession {
    chip: Chip,
    state: OtaState,
    total_bytes: u32,
    bytes_acknowledged: u32,
    started_at: chrono::DateTime<Utc>,
    events: mpsc::Sender<OtaEvent>,
}

impl OtaSession {
    fn new(chip: Chip, total_bytes: u32, events: mpsc::Sender<OtaEvent>) -> Self {
        Self {
            chip,
            state: OtaState::Idle,
            total_bytes,
            bytes_acknowledged: 0,
            started_at: Utc::now(),
            events,
        }
    }

    fn progress(&self) -> OtaProgress {
        OtaProgress {
            state: self.state,
            bytes_acknowledged: self.bytes_acknowledged,
            total_bytes: self.total_bytes,
        }
    }

    async fn emit(&self, event: OtaEvent) {
        // Nobody listening is fine
        let _ = self.events.send(event).await;
    }

    async fn advance(&mut self, next: OtaState) -> Result<(), OtaFailure> {
        if !self.state.can_advance_to(next) {
            return Err(OtaFailure::Protocol(format!(
                "invalid update state change {} -> {}",
                self.state, next
            )));
        }

        debug!(chip = %self.chip, "Update {} -> {}", self.state, next);
        self.state = next;
        self.emit(OtaEvent::Progress(self.progress())).await;
        Ok(())
    }

    /// Record the device's running total; never moves backwards
    async fn acknowledge(&mut self, bytes_acknowledged: u32) {
        self.bytes_acknowledged = self
            .bytes_acknowledged
            .max(bytes_acknowledged.min(self.total_bytes));
        self.emit(OtaEvent::Progress(self.progress())).await;
    }

    fn report(&self, failure_reason: Option<String>) -> OtaReport {
        OtaReport {
            chip: self.chip,
            started_at: self.started_at,
            finished_at: Utc::now(),
            bytes_acknowledged: self.bytes_acknowledged,
            total_bytes: self.total_bytes,
            failure_reason,
        }
    }

    async fn finish(mut self, outcome: Result<(), OtaFailure>) {
        let event = match outcome {
            Ok(()) => {
                self.state = OtaState::Complete;
                let report = self.report(None);
                info!("Firmware update finished: {}", report);
                OtaEvent::Complete(report)
            }
            Err(cause) => {
                self.state = OtaState::Failed;
                let report = self.report(Some(cause.to_string()));
                warn!("Firmware update failed: {}", report);
                OtaEvent::Failed { cause, report }
            }
        };

        self.emit(event).await;
    }
}

/// Start the update task; the caller has already claimed the update slot
pub(crate) fn spawn(
    scanner: Scanner,
    link: Link,
    image: Bytes,
    chip: Chip,
    total_bytes: u32,
    config: OtaConfig,
) -> OtaHandle {
    let (tx, rx) = mpsc::channel(EVENT_CAPACITY);
    let cancel = CancellationToken::new();
    let session = OtaSession::new(chip, total_bytes, tx);

    info!(chip = %chip, total_bytes, "Starting firmware update");

    let token = cancel.clone();
    tokio::spawn(async move {
        let mut session = session;
        let transfer = Transfer {
            scanner: &scanner,
            link: &link,
            cancel: &token,
            config: &config,
            chip,
        };

        let outcome = match transfer.run(&image, &mut session).await {
            // A request that was in flight when the caller cancelled may
            // have failed on its own; the cancellation is what ended it
            Err(cause) if token.is_cancelled() && cause != OtaFailure::Disconnected => {
                debug!("Update stopped after cancellation: {}", cause);
                Err(OtaFailure::Cancelled)
            }
            outcome => outcome,
        };

        // Free the slot before the terminal event goes out
        scanner.release_ota();
        session.finish(outcome).await;
    });

    OtaHandle {
        chip,
        events: ReceiverStream::new(rx),
        cancel,
    }
}

/// Everything one update talks through
struct Transfer<'a> {
    scanner: &'a Scanner,
    link: &'a Link,
    cancel: &'a CancellationToken,
    config: &'a OtaConfig,
    chip: Chip,
}

impl Transfer<'_> {
    /// Gate in front of every round trip
    fn checkpoint(&self) -> Result<(), OtaFailure> {
        if self.link.is_closed() {
            return Err(OtaFailure::Disconnected);
        }
        if self.cancel.is_cancelled() {
            return Err(OtaFailure::Cancelled);
        }
        Ok(())
    }

    async fn run(&self, image: &Bytes, session: &mut OtaSession) -> Result<(), OtaFailure> {
        self.checkpoint()?;
        if self.scanner.mode() != DeviceMode::Root {
            self.scanner.enter_root_mode_on(self.link).await?;
        }

        session.advance(OtaState::Transferring).await?;

        self.checkpoint()?;
        let start = RootCommand::StartOta {
            chip: self.chip,
            total_bytes: session.total_bytes,
        };
        match Scanner::root_request_on(self.link, start, self.config.chunk_timeout).await? {
            RootResponse::StartOta(OperationResult::Ok) => {}
            RootResponse::StartOta(OperationResult::Failed(status)) => {
                return Err(OtaFailure::Rejected { status });
            }
            other => return Err(unexpected(&other)),
        }

        let mut offset = 0usize;
        while offset < image.len() {
            let end = (offset + self.config.chunk_size).min(image.len());
            let acknowledged = self.write_chunk(offset, image.slice(offset..end)).await?;

            // Recorded before anything else can stop the update
            session.acknowledge(acknowledged).await;

            if (acknowledged as usize) < end {
                return Err(OtaFailure::Protocol(format!(
                    "scanner acknowledged {} bytes after chunk ending at {}",
                    acknowledged, end
                )));
            }

            offset = end;
        }

        session.advance(OtaState::Verifying).await?;

        self.checkpoint()?;
        let expected = crc32fast::hash(image);
        let verify = RootCommand::VerifyOta { chip: self.chip };
        match Scanner::root_request_on(self.link, verify, self.config.verify_timeout).await? {
            RootResponse::VerifyOta { crc32 } if crc32 == expected => {}
            RootResponse::VerifyOta { crc32 } => {
                return Err(OtaFailure::ChecksumMismatch {
                    expected,
                    actual: crc32,
                });
            }
            other => return Err(unexpected(&other)),
        }

        self.checkpoint()?;
        self.scanner.enter_main_mode_on(self.link).await?;
        Ok(())
    }

    async fn write_chunk(&self, offset: usize, data: Bytes) -> Result<u32, OtaFailure> {
        let mut attempt = 0;

        loop {
            self.checkpoint()?;

            let command = RootCommand::WriteOtaChunk {
                chip: self.chip,
                offset: offset as u32,
                data: data.clone(),
            };

            let failure = match Scanner::root_request_on(self.link, command, self.config.chunk_timeout).await {
                Ok(RootResponse::WriteOtaChunk {
                    result: OperationResult::Ok,
                    bytes_acknowledged,
                }) => return Ok(bytes_acknowledged),
                Ok(RootResponse::WriteOtaChunk {
                    result: OperationResult::Failed(status),
                    ..
                }) => OtaFailure::Rejected { status },
                Ok(other) => return Err(unexpected(&other)),
                Err(e) => OtaFailure::from(e),
            };

            if !failure.is_retryable() || attempt >= self.config.max_chunk_retries {
                return Err(failure);
            }

            attempt += 1;
            warn!(offset, attempt, "Retrying firmware chunk: {}", failure);
        }
    }
}

fn unexpected(response: &RootResponse) -> OtaFailure {
    OtaFailure::Protocol(format!("unexpected response {}", response.kind()))
}

//! High-level scanner interface

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use veroscan_core::constants::CaptureResult;
use veroscan_core::message::{
    OperationResult, RootCommand, RootResponse, Un20Command, Un20Response, VeroCommand, VeroEvent,
    VeroResponse,
};
use veroscan_core::{
    Accumulator, Channel, DeviceMode, IncomingMessage, ModeState, OutgoingMessage, WireMessage,
};
use veroscan_transport::{PacketRouter, PacketSink, PacketWriter, RouterStats, StatsSnapshot};
use veroscan_types::{BatteryInfo, Chip, ExtendedVersion, ExtendedVersionInformation};

use crate::bus::{MessageBus, MessageKind, Subscription};
use crate::config::ScannerConfig;
use crate::correlator::Correlator;
use crate::error::{Error, Result};
use crate::ota::{self, OtaHandle};

/// Vero fingerprint scanner
///
/// Cheap to clone; clones share the connection. The link is any
/// `AsyncRead + AsyncWrite` stream the caller has already opened.
///
/// # Examples
///
/// ```no_run
/// use veroscan::Scanner;
///
/// #[tokio::main]
/// async fn main() -> veroscan::Result<()> {
///     let link = tokio::net::TcpStream::connect("127.0.0.1:9000").await.map_err(veroscan_transport::Error::from)?;
///
///     let scanner = Scanner::new();
///     scanner.connect(link).await?;
///
///     let millivolts = scanner.get_battery_voltage().await?;
///     println!("Battery: {} mV", millivolts);
///
///     scanner.disconnect().await?;
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct Scanner {
    inner: Arc<ScannerInner>,
}

struct ScannerInner {
    config: ScannerConfig,
    mode: ModeState,
    bus: MessageBus,
    connection: Mutex<Option<Connection>>,
    generation: AtomicU64,
    ota_active: AtomicBool,
}

/// One connection's correlator, and the token that fires when the
/// connection ends
///
/// Work bound to a link (a firmware update) keeps talking to that link
/// only; after a reconnect its requests fail with [`Error::Disconnected`]
/// instead of reaching the new device.
#[derive(Clone)]
pub(crate) struct Link {
    correlator: Arc<Correlator>,
    closed: CancellationToken,
}

impl Link {
    pub(crate) fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    async fn exchange(&self, message: OutgoingMessage, timeout: Duration) -> Result<IncomingMessage> {
        let channel = message.channel();
        let expected = message.message_type();

        self.correlator.send(channel, message, expected, timeout).await
    }
}

/// State that lives exactly as long as one link
struct Connection {
    generation: u64,
    correlator: Arc<Correlator>,
    stats: Arc<RouterStats>,
    shutdown: CancellationToken,
}

impl Scanner {
    /// Create a scanner with default settings
    pub fn new() -> Self {
        Self::build(ScannerConfig::default())
    }

    /// Create a scanner with custom settings
    pub fn with_config(config: ScannerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(config))
    }

    fn build(config: ScannerConfig) -> Self {
        let bus = MessageBus::new(config.bus_capacity);

        Self {
            inner: Arc::new(ScannerInner {
                config,
                mode: ModeState::new(),
                bus,
                connection: Mutex::new(None),
                generation: AtomicU64::new(0),
                ota_active: AtomicBool::new(false),
            }),
        }
    }

    pub fn config(&self) -> &ScannerConfig {
        &self.inner.config
    }

    /// Check if connected
    pub fn is_connected(&self) -> bool {
        self.inner.connection.lock().is_some()
    }

    /// Current device mode
    pub fn mode(&self) -> DeviceMode {
        self.inner.mode.mode()
    }

    /// Read-side counters of the current link
    pub fn stats(&self) -> Option<StatsSnapshot> {
        self.inner
            .connection
            .lock()
            .as_ref()
            .map(|connection| connection.stats.snapshot())
    }

    /// Start talking to a scanner over `link`
    ///
    /// The device mode starts out unknown. The connection ends on
    /// [`Scanner::disconnect`] or when the link closes; either way every
    /// pending request fails with [`Error::Disconnected`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::AlreadyConnected`] if a link is already in use.
    pub async fn connect<T>(&self, link: T) -> Result<()>
    where
        T: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let mut slot = self.inner.connection.lock();
        if slot.is_some() {
            return Err(Error::AlreadyConnected);
        }

        info!("Connecting to scanner...");
        self.inner.mode.reset();

        let (reader, writer) = tokio::io::split(link);
        let shutdown = CancellationToken::new();
        let (router, mut queues) =
            PacketRouter::spawn(reader, self.inner.config.router(), shutdown.clone());

        let sink: Arc<dyn PacketSink> = Arc::new(PacketWriter::new(writer));
        let correlator = Arc::new(Correlator::new(sink, self.inner.mode.clone()));
        let generation = self.inner.generation.fetch_add(1, Ordering::Relaxed) + 1;

        for channel in Channel::ALL {
            let Some(queue) = queues.take(channel) else {
                continue;
            };
            let correlator = Arc::clone(&correlator);
            let bus = self.inner.bus.clone();

            match channel {
                Channel::VeroServer => spawn_pump::<VeroResponse>(channel, queue, correlator, bus),
                Channel::VeroEvent => spawn_pump::<VeroEvent>(channel, queue, correlator, bus),
                Channel::Un20Server => spawn_pump::<Un20Response>(channel, queue, correlator, bus),
                Channel::Root => spawn_pump::<RootResponse>(channel, queue, correlator, bus),
            }
        }

        let stats = router.stats();
        let inner = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            match router.join().await {
                Ok(()) => debug!("Packet router stopped"),
                Err(e) => info!("Scanner link closed: {}", e),
            }

            if let Some(inner) = inner.upgrade() {
                inner.teardown(Some(generation));
            }
        });

        *slot = Some(Connection {
            generation,
            correlator,
            stats,
            shutdown,
        });

        info!(generation, "Connected");
        Ok(())
    }

    /// Drop the link
    ///
    /// Pending requests and a running update fail with a disconnection
    /// error. Calling this while disconnected does nothing.
    pub async fn disconnect(&self) -> Result<()> {
        if !self.inner.teardown(None) {
            debug!("Disconnect requested while not connected");
        }
        Ok(())
    }

    pub(crate) fn link(&self) -> Result<Link> {
        self.inner
            .connection
            .lock()
            .as_ref()
            .map(|connection| Link {
                correlator: Arc::clone(&connection.correlator),
                closed: connection.shutdown.clone(),
            })
            .ok_or(Error::NotConnected)
    }

    /// Send `message` on `channel` and wait for the response of type
    /// `expected`
    ///
    /// At most one request may wait per channel; requests on different
    /// channels proceed concurrently.
    pub async fn send(
        &self,
        channel: Channel,
        message: impl Into<OutgoingMessage>,
        expected: u8,
        timeout: Duration,
    ) -> Result<IncomingMessage> {
        let link = self.link()?;
        link.correlator
            .send(channel, message.into(), expected, timeout)
            .await
    }

    /// Send a command and wait for its response, using the configured timeout
    pub async fn request(&self, message: impl Into<OutgoingMessage>) -> Result<IncomingMessage> {
        self.request_with_timeout(message, self.inner.config.response_timeout)
            .await
    }

    /// Send a command and wait for its response
    pub async fn request_with_timeout(
        &self,
        message: impl Into<OutgoingMessage>,
        timeout: Duration,
    ) -> Result<IncomingMessage> {
        self.link()?.exchange(message.into(), timeout).await
    }

    /// Stream of the unsolicited traffic on `channel`
    ///
    /// Subscriptions outlive reconnects.
    pub fn subscribe(&self, channel: Channel, kind: MessageKind) -> Subscription {
        self.inner.bus.subscribe(channel, kind)
    }

    async fn vero(&self, command: VeroCommand, timeout: Duration) -> Result<VeroResponse> {
        match self.request_with_timeout(command, timeout).await? {
            IncomingMessage::VeroResponse(response) => Ok(response),
            other => Err(unexpected(other)),
        }
    }

    async fn un20(&self, command: Un20Command) -> Result<Un20Response> {
        match self.request(command).await? {
            IncomingMessage::Un20Response(response) => Ok(response),
            other => Err(unexpected(other)),
        }
    }

    async fn root_request(&self, command: RootCommand, timeout: Duration) -> Result<RootResponse> {
        let link = self.link()?;
        Self::root_request_on(&link, command, timeout).await
    }

    /// Bootloader request pinned to `link`
    pub(crate) async fn root_request_on(
        link: &Link,
        command: RootCommand,
        timeout: Duration,
    ) -> Result<RootResponse> {
        match link.exchange(command.into(), timeout).await? {
            IncomingMessage::RootResponse(response) => Ok(response),
            other => Err(unexpected(other)),
        }
    }

    // ---- Mode control ----

    /// Switch from the operational firmware to the bootloader
    pub async fn enter_root_mode(&self) -> Result<()> {
        let link = self.link()?;
        self.enter_root_mode_on(&link).await
    }

    pub(crate) async fn enter_root_mode_on(&self, link: &Link) -> Result<()> {
        self.inner.mode.check_transition(DeviceMode::Root)?;

        info!("Entering root mode...");
        let timeout = self.inner.config.ota.mode_switch_timeout;
        match link.exchange(VeroCommand::EnterRootMode.into(), timeout).await? {
            IncomingMessage::VeroResponse(VeroResponse::EnterRootMode) => {}
            other => return Err(unexpected(other)),
        }

        self.inner.mode.transition(DeviceMode::Root)?;
        Ok(())
    }

    /// Switch from the bootloader to the operational firmware
    pub async fn enter_main_mode(&self) -> Result<()> {
        let link = self.link()?;
        self.enter_main_mode_on(&link).await
    }

    pub(crate) async fn enter_main_mode_on(&self, link: &Link) -> Result<()> {
        self.inner.mode.check_transition(DeviceMode::Main)?;

        info!("Entering main mode...");
        let timeout = self.inner.config.ota.mode_switch_timeout;
        match Self::root_request_on(link, RootCommand::EnterMainMode, timeout).await? {
            RootResponse::EnterMainMode => {}
            other => return Err(unexpected(other)),
        }

        self.inner.mode.transition(DeviceMode::Main)?;
        Ok(())
    }

    // ---- Main controller ----

    pub async fn get_stm_firmware_version(&self) -> Result<ExtendedVersion> {
        match self.vero(VeroCommand::GetStmExtendedFirmwareVersion, self.timeout()).await? {
            VeroResponse::GetStmExtendedFirmwareVersion(version) => Ok(version),
            other => Err(unexpected(other)),
        }
    }

    /// Battery voltage in millivolts
    pub async fn get_battery_voltage(&self) -> Result<u16> {
        match self.vero(VeroCommand::GetBatteryVoltage, self.timeout()).await? {
            VeroResponse::GetBatteryVoltage { millivolts } => Ok(millivolts),
            other => Err(unexpected(other)),
        }
    }

    pub async fn get_battery_percent_charge(&self) -> Result<u8> {
        match self.vero(VeroCommand::GetBatteryPercentCharge, self.timeout()).await? {
            VeroResponse::GetBatteryPercentCharge { percent } => Ok(percent),
            other => Err(unexpected(other)),
        }
    }

    /// Battery current in milliamps (negative while discharging)
    pub async fn get_battery_current(&self) -> Result<i16> {
        match self.vero(VeroCommand::GetBatteryCurrent, self.timeout()).await? {
            VeroResponse::GetBatteryCurrent { milliamps } => Ok(milliamps),
            other => Err(unexpected(other)),
        }
    }

    /// Battery temperature in tenths of a kelvin
    pub async fn get_battery_temperature(&self) -> Result<u16> {
        match self.vero(VeroCommand::GetBatteryTemperature, self.timeout()).await? {
            VeroResponse::GetBatteryTemperature { decikelvin } => Ok(decikelvin),
            other => Err(unexpected(other)),
        }
    }

    /// Read all battery values
    pub async fn battery_info(&self) -> Result<BatteryInfo> {
        let info = BatteryInfo {
            charge_percent: self.get_battery_percent_charge().await?,
            voltage_millivolts: self.get_battery_voltage().await?,
            current_milliamps: self.get_battery_current().await?,
            temperature_decikelvin: self.get_battery_temperature().await?,
        };

        debug!("Battery: {}", info);
        Ok(info)
    }

    pub async fn get_un20_on(&self) -> Result<bool> {
        match self.vero(VeroCommand::GetUn20On, self.timeout()).await? {
            VeroResponse::GetUn20On { on } => Ok(on),
            other => Err(unexpected(other)),
        }
    }

    /// Power the sensor chip on or off
    pub async fn set_un20_on(&self, on: bool) -> Result<()> {
        match self.vero(VeroCommand::SetUn20On(on), self.timeout()).await? {
            VeroResponse::SetUn20On(result) => check("SetUn20On", result),
            other => Err(unexpected(other)),
        }
    }

    pub async fn get_trigger_button_active(&self) -> Result<bool> {
        match self.vero(VeroCommand::GetTriggerButtonActive, self.timeout()).await? {
            VeroResponse::GetTriggerButtonActive { active } => Ok(active),
            other => Err(unexpected(other)),
        }
    }

    pub async fn set_trigger_button_active(&self, active: bool) -> Result<()> {
        match self
            .vero(VeroCommand::SetTriggerButtonActive(active), self.timeout())
            .await?
        {
            VeroResponse::SetTriggerButtonActive(result) => check("SetTriggerButtonActive", result),
            other => Err(unexpected(other)),
        }
    }

    // ---- Sensor chip ----

    pub async fn get_un20_app_version(&self) -> Result<ExtendedVersion> {
        match self.un20(Un20Command::GetUn20ExtendedAppVersion).await? {
            Un20Response::GetUn20ExtendedAppVersion(version) => Ok(version),
            other => Err(unexpected(other)),
        }
    }

    pub async fn capture_fingerprint(&self, dpi: u16) -> Result<CaptureResult> {
        match self.un20(Un20Command::CaptureFingerprint { dpi }).await? {
            Un20Response::CaptureFingerprint(result) => Ok(result),
            other => Err(unexpected(other)),
        }
    }

    /// Quality score of the last capture, if there is one
    pub async fn get_image_quality_preview(&self) -> Result<Option<u8>> {
        match self.un20(Un20Command::GetImageQualityPreview).await? {
            Un20Response::GetImageQualityPreview { quality } => Ok(quality),
            other => Err(unexpected(other)),
        }
    }

    pub async fn get_template(&self, template_type: u8) -> Result<Bytes> {
        match self.un20(Un20Command::GetTemplate { template_type }).await? {
            Un20Response::GetTemplate { template, .. } => Ok(template),
            other => Err(unexpected(other)),
        }
    }

    pub async fn get_image(&self, image_format: u8) -> Result<Bytes> {
        match self.un20(Un20Command::GetImage { image_format }).await? {
            Un20Response::GetImage { image, .. } => Ok(image),
            other => Err(unexpected(other)),
        }
    }

    // ---- Bootloader ----

    /// Installed firmware versions of every chip
    pub async fn get_extended_version(&self) -> Result<ExtendedVersionInformation> {
        match self
            .root_request(RootCommand::GetExtendedVersion, self.timeout())
            .await?
        {
            RootResponse::GetExtendedVersion(info) => Ok(info),
            other => Err(unexpected(other)),
        }
    }

    pub async fn set_extended_version(&self, info: ExtendedVersionInformation) -> Result<()> {
        match self
            .root_request(RootCommand::SetExtendedVersion(info), self.timeout())
            .await?
        {
            RootResponse::SetExtendedVersion => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    /// Start uploading `image` to `chip` in the background
    ///
    /// # Errors
    ///
    /// - [`Error::NotConnected`] without a link
    /// - [`Error::OtaInProgress`] while another update runs
    pub fn start_ota(&self, image: impl Into<Bytes>, chip: Chip) -> Result<OtaHandle> {
        let image = image.into();
        let total_bytes = u32::try_from(image.len()).map_err(|_| {
            Error::InvalidConfig(format!("firmware image of {} bytes is too large", image.len()))
        })?;

        let link = self.link()?;

        if self
            .inner
            .ota_active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(Error::OtaInProgress);
        }

        Ok(ota::spawn(
            self.clone(),
            link,
            image,
            chip,
            total_bytes,
            self.inner.config.ota.clone(),
        ))
    }

    pub fn is_ota_in_progress(&self) -> bool {
        self.inner.ota_active.load(Ordering::Acquire)
    }

    pub(crate) fn release_ota(&self) {
        self.inner.ota_active.store(false, Ordering::Release);
    }

    fn timeout(&self) -> Duration {
        self.inner.config.response_timeout
    }
}

impl Default for Scanner {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Scanner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scanner")
            .field("connected", &self.is_connected())
            .field("mode", &self.mode())
            .field("ota_in_progress", &self.is_ota_in_progress())
            .finish()
    }
}

impl ScannerInner {
    /// End the connection of `generation` (or whichever is current)
    ///
    /// Returns `false` if there was nothing to end.
    fn teardown(&self, generation: Option<u64>) -> bool {
        let connection = {
            let mut slot = self.connection.lock();
            match slot.as_ref() {
                Some(current) if generation.is_none_or(|g| g == current.generation) => slot.take(),
                _ => None,
            }
        };

        let Some(connection) = connection else {
            return false;
        };

        connection.shutdown.cancel();
        let failed = connection.correlator.fail_all();

        info!(generation = connection.generation, failed, "Disconnected");
        true
    }
}

impl Drop for ScannerInner {
    fn drop(&mut self) {
        if let Some(connection) = self.connection.get_mut().take() {
            warn!("Scanner dropped while still connected");
            connection.shutdown.cancel();
            connection.correlator.fail_all();
        }
    }
}

/// Reassemble one channel's messages and hand them to the correlator, or
/// to subscribers if no request claims them
fn spawn_pump<M>(
    channel: Channel,
    mut queue: mpsc::Receiver<Bytes>,
    correlator: Arc<Correlator>,
    bus: MessageBus,
) where
    M: WireMessage + Into<IncomingMessage> + Send + 'static,
{
    tokio::spawn(async move {
        let mut accumulator = Accumulator::<M>::new(channel);

        while let Some(payload) = queue.recv().await {
            accumulator.push(&payload);

            while let Some(result) = accumulator.next_message() {
                match result {
                    Ok(message) => {
                        if let Some(unclaimed) = correlator.dispatch(message.into()) {
                            bus.publish(Ok(unclaimed));
                        }
                    }
                    Err(fault) => {
                        warn!("Decode fault: {}", fault);
                        bus.publish(Err(fault));
                    }
                }
            }
        }

        debug!(channel = %channel, "Channel queue closed");
    });
}

fn unexpected(response: impl fmt::Debug) -> Error {
    Error::UnexpectedResponse(format!("{:?}", response))
}

fn check(operation: &'static str, result: OperationResult) -> Result<()> {
    match result {
        OperationResult::Ok => Ok(()),
        OperationResult::Failed(status) => Err(Error::OperationFailed { operation, status }),
    }
}

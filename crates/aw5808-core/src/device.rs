//! AW5808 device handle.
//!
//! A `Device` owns up to one serial channel (framed commands), one hidraw
//! channel (register reports) and the hotplug subscription for its USB
//! identity. It is driven by an external reactor through [`Device::sources`]
//! and [`Device::handle_ready`]; only the `*_sync` calls wait on their own.

use std::os::fd::RawFd;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, instrument, trace, warn};

use crate::dispatch::ObserverRegistry;
use crate::error::{DeviceError, LastError};
use crate::events::{DeviceEvent, DeviceObserver};
use crate::hotplug::{HotplugAction, HotplugManager};
use crate::protocol::constants::{
    ACK_FILLER, DEFAULT_BAUD_RATE, DEFAULT_SYNC_TIMEOUT_MS, QUERY_FILLER, RF_CHANNEL_MAX,
    RF_CHANNEL_MIN, RF_POWER_MAX, RF_POWER_MIN,
};
use crate::protocol::{self, Command, ConnectMode, FrameError, HidReport, I2sMode, Mode};
use crate::reactor::{Interest, Readiness};
use crate::state::{DeviceState, DeviceStatus, HandleResult, handle_frame};
use crate::transport::{
    ChannelLimits, Connector, IoChannel, ReadStatus, TransportError, TransportKind, UsbIdentity,
};

/// How to open a device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenOptions {
    pub serial: Option<PathBuf>,
    pub baud_rate: u32,
    pub usb: Option<UsbIdentity>,
    /// Mode negotiated over serial while opening.
    pub mode: Mode,
    /// Bound on every synchronous wait.
    pub sync_timeout: Duration,
    pub limits: ChannelLimits,
}

impl Default for OpenOptions {
    fn default() -> Self {
        Self {
            serial: None,
            baud_rate: DEFAULT_BAUD_RATE,
            usb: None,
            mode: Mode::I2s,
            sync_timeout: Duration::from_millis(DEFAULT_SYNC_TIMEOUT_MS),
            limits: ChannelLimits::default(),
        }
    }
}

impl OpenOptions {
    pub fn serial(path: impl Into<PathBuf>) -> Self {
        Self {
            serial: Some(path.into()),
            ..Default::default()
        }
    }

    pub fn usb(usb: UsbIdentity) -> Self {
        Self {
            usb: Some(usb),
            ..Default::default()
        }
    }

    pub fn with_usb(mut self, usb: UsbIdentity) -> Self {
        self.usb = Some(usb);
        self
    }

    pub fn with_mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_baud_rate(mut self, baud_rate: u32) -> Self {
        self.baud_rate = baud_rate;
        self
    }

    pub fn with_sync_timeout(mut self, timeout: Duration) -> Self {
        self.sync_timeout = timeout;
        self
    }

    pub fn with_limits(mut self, limits: ChannelLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Identity string built from the configured endpoints. It does not
    /// change when the USB side comes and goes.
    fn ident(&self) -> String {
        let mut parts = Vec::new();
        if let Some(path) = &self.serial {
            parts.push(path.display().to_string());
        }
        if let Some(usb) = &self.usb {
            match &usb.name {
                Some(name) => parts.push(format!("usb:{}/{name}", usb.signature())),
                None => parts.push(format!("usb:{}", usb.signature())),
            }
        }
        parts.join(" ")
    }
}

/// A pollable source owned by a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Source {
    Serial,
    Hid,
    Hotplug,
}

pub struct Device {
    connector: Arc<dyn Connector>,
    state: DeviceState,
    status: DeviceStatus,
    serial: Option<IoChannel>,
    hid: Option<IoChannel>,
    hotplug: Option<HotplugManager>,
    usb: Option<UsbIdentity>,
    limits: ChannelLimits,
    sync_timeout: Duration,
    observers: ObserverRegistry,
    last_error: Option<LastError>,
}

impl Device {
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self {
            connector,
            state: DeviceState::Unopened,
            status: DeviceStatus::default(),
            serial: None,
            hid: None,
            hotplug: None,
            usb: None,
            limits: ChannelLimits::default(),
            sync_timeout: Duration::from_millis(DEFAULT_SYNC_TIMEOUT_MS),
            observers: ObserverRegistry::new(),
            last_error: None,
        }
    }

    pub fn state(&self) -> DeviceState {
        self.state
    }

    pub fn status(&self) -> &DeviceStatus {
        &self.status
    }

    pub fn ident(&self) -> &str {
        &self.status.ident
    }

    pub fn mode(&self) -> Mode {
        self.status.mode
    }

    /// Timeout configured at open, for callers that want the same bound.
    pub fn sync_timeout(&self) -> Duration {
        self.sync_timeout
    }

    pub fn has_transport(&self, kind: TransportKind) -> bool {
        match kind {
            TransportKind::Serial => self.serial.is_some(),
            TransportKind::UsbHid => self.hid.is_some(),
        }
    }

    /// Most recent failure recorded on this device.
    pub fn last_error(&self) -> Option<&LastError> {
        self.last_error.as_ref()
    }

    pub fn register(&mut self, observer: &Arc<dyn DeviceObserver>) -> Result<(), DeviceError> {
        let result = self.observers.register(observer);
        self.record(result)
    }

    pub fn unregister(&mut self, observer: &Arc<dyn DeviceObserver>) -> bool {
        self.observers.unregister(observer)
    }

    fn record<T>(&mut self, result: Result<T, DeviceError>) -> Result<T, DeviceError> {
        if let Err(err) = &result {
            let last = LastError::from(err);
            warn!(device = %self.status.ident, error = %last, "Request failed");
            self.last_error = Some(last);
        }
        result
    }

    fn notify(&mut self, event: DeviceEvent) {
        self.observers.notify(&self.status, &event);
    }

    fn channel_mut(&mut self, kind: TransportKind) -> Option<&mut IoChannel> {
        match kind {
            TransportKind::Serial => self.serial.as_mut(),
            TransportKind::UsbHid => self.hid.as_mut(),
        }
    }

    // ---- lifecycle -------------------------------------------------------

    /// Open the configured transports.
    ///
    /// With a serial path the port is opened and `options.mode` is negotiated
    /// synchronously; any failure there fails the open. With a USB identity
    /// the hotplug stream is subscribed and hidraw opened if present; a
    /// missing HID node is only fatal when there is no serial link either.
    #[instrument(
        skip(self, options),
        fields(
            serial = ?options.serial,
            usb = ?options.usb.as_ref().map(UsbIdentity::signature)
        )
    )]
    pub fn open(&mut self, options: OpenOptions) -> Result<(), DeviceError> {
        let result = self.try_open(options);
        if result.is_err() && !matches!(result, Err(DeviceError::Argument(_))) {
            self.release_all();
            self.state = DeviceState::Closed;
        }
        self.record(result)
    }

    fn try_open(&mut self, options: OpenOptions) -> Result<(), DeviceError> {
        if self.state.is_open() {
            return Err(DeviceError::Argument(format!(
                "Device {} is already open",
                self.status.ident
            )));
        }
        if options.serial.is_none() && options.usb.is_none() {
            return Err(DeviceError::Argument(
                "No serial port or usb device specified".to_string(),
            ));
        }
        if options.mode.to_u8().is_none() {
            return Err(DeviceError::Argument(format!(
                "Invalid start mode: {}",
                options.mode
            )));
        }

        self.status = DeviceStatus::new(options.ident());
        self.limits = options.limits;
        self.sync_timeout = options.sync_timeout;
        self.usb = options.usb.clone();
        self.last_error = None;

        if let Some(path) = &options.serial {
            self.state = DeviceState::OpeningSerial;
            let transport = self
                .connector
                .open_serial(path, options.baud_rate)
                .map_err(|e| {
                    DeviceError::open_with(format!("Opening serial {}", path.display()), e)
                })?;
            self.attach(IoChannel::new(transport, self.limits));
            self.try_set_mode_sync(options.mode, options.sync_timeout)
                .map_err(|e| DeviceError::open(format!("Negotiating start mode: {e}")))?;
        }

        if let Some(usb) = &options.usb {
            self.state = DeviceState::OpeningUsb;
            match self.connector.subscribe_hotplug() {
                Ok(source) => self.hotplug = Some(HotplugManager::new(source, usb)),
                Err(e) => warn!(
                    error = %e,
                    "Hotplug unavailable, usb attach/detach will not be tracked"
                ),
            }
            match self.connector.open_hid(usb) {
                Ok(transport) => {
                    self.attach(IoChannel::new(transport, self.limits));
                    if self.serial.is_none() {
                        self.status.mode = Mode::Usb;
                    }
                }
                Err(e) if self.serial.is_some() => {
                    info!(error = %e, "USB not ready yet, will retry on hotplug");
                }
                Err(e) => {
                    return Err(DeviceError::open_with(
                        "Neither serial nor usb is usable",
                        e,
                    ));
                }
            }
        }

        self.state = DeviceState::Ready;
        info!(device = %self.status.ident, mode = %self.status.mode, "Device ready");
        Ok(())
    }

    fn attach(&mut self, channel: IoChannel) {
        let kind = channel.kind();
        info!(
            device = %self.status.ident,
            transport = %kind,
            ident = %channel.ident(),
            "Transport attached"
        );
        match kind {
            TransportKind::Serial => self.serial = Some(channel),
            TransportKind::UsbHid => self.hid = Some(channel),
        }
        self.notify(DeviceEvent::TransportAttached(kind));
    }

    fn close_transport(&mut self, kind: TransportKind, reason: &str) {
        let channel = match kind {
            TransportKind::Serial => self.serial.take(),
            TransportKind::UsbHid => self.hid.take(),
        };
        if let Some(channel) = channel {
            info!(device = %self.status.ident, transport = %kind, reason, "Closing transport");
            channel.close();
            self.notify(DeviceEvent::TransportDetached(kind));
        }
    }

    fn release_all(&mut self) {
        self.close_transport(TransportKind::UsbHid, "device closed");
        self.close_transport(TransportKind::Serial, "device closed");
        if self.hotplug.take().is_some() {
            debug!(device = %self.status.ident, "Hotplug subscription released");
        }
    }

    /// Release every transport and the hotplug subscription. Observers stay
    /// registered.
    pub fn close(&mut self) -> Result<(), DeviceError> {
        if !self.state.is_open() {
            let result = Err(DeviceError::Close(format!(
                "Device is not open ({})",
                self.state
            )));
            return self.record(result);
        }
        self.release_all();
        self.state = DeviceState::Closed;
        info!(device = %self.status.ident, "Device closed");
        Ok(())
    }

    /// An I/O failure found by the reactor: record it and drop that transport.
    fn transport_failed(&mut self, kind: TransportKind, source: TransportError) {
        let err = DeviceError::Io {
            transport: kind,
            source,
        };
        error!(device = %self.status.ident, error = %err, "Transport failed");
        self.last_error = Some(LastError::from(&err));
        self.close_transport(kind, "i/o failure");
    }

    /// Drop a transport whose error goes back to the caller, which records it.
    fn drop_failed_transport(&mut self, kind: TransportKind, err: &TransportError) {
        error!(device = %self.status.ident, transport = %kind, error = %err, "Transport failed");
        self.close_transport(kind, "i/o failure");
    }

    // ---- reactor integration ---------------------------------------------

    /// Descriptors to poll and what to wait for on each.
    pub fn sources(&self) -> Vec<(Source, RawFd, Interest)> {
        let mut out = Vec::with_capacity(3);
        if let Some(ch) = &self.serial {
            out.push((Source::Serial, ch.raw_fd(), ch.interest()));
        }
        if let Some(ch) = &self.hid {
            out.push((Source::Hid, ch.raw_fd(), ch.interest()));
        }
        if let Some(hp) = &self.hotplug {
            out.push((Source::Hotplug, hp.raw_fd(), Interest::READABLE));
        }
        out
    }

    /// Service one ready source.
    pub fn handle_ready(&mut self, source: Source, readiness: Readiness) {
        match source {
            Source::Serial => self.service_channel(TransportKind::Serial, readiness),
            Source::Hid => self.service_channel(TransportKind::UsbHid, readiness),
            Source::Hotplug => self.service_hotplug(),
        }
    }

    fn service_channel(&mut self, kind: TransportKind, readiness: Readiness) {
        if readiness.writable {
            let Some(channel) = self.channel_mut(kind) else {
                return;
            };
            if let Err(e) = channel.on_writable() {
                self.transport_failed(kind, e);
                return;
            }
        }

        if readiness.readable || readiness.hangup || readiness.error {
            let Some(channel) = self.channel_mut(kind) else {
                return;
            };
            let result = channel.on_readable();
            self.drain_input(kind);
            match result {
                Ok(ReadStatus::Open { read: 0 }) if readiness.hangup || readiness.error => {
                    self.transport_failed(kind, TransportError::Disconnected);
                }
                Ok(ReadStatus::Open { .. }) => {}
                Ok(ReadStatus::Closed { .. }) => {
                    self.transport_failed(kind, TransportError::Disconnected);
                }
                Err(e) => self.transport_failed(kind, e),
            }
        }
    }

    fn drain_input(&mut self, kind: TransportKind) {
        match kind {
            TransportKind::Serial => {
                while let Some((command, payload)) = self.next_serial_frame() {
                    self.on_receive(command, &payload);
                }
            }
            TransportKind::UsbHid => {
                while let Some(report) = self.next_hid_report() {
                    self.on_hid_report(report);
                }
            }
        }
    }

    fn service_hotplug(&mut self) {
        let Some(manager) = self.hotplug.as_mut() else {
            return;
        };
        match manager.poll_actions() {
            Ok(actions) => {
                for action in actions {
                    self.apply_hotplug(action);
                }
            }
            Err(e) => {
                error!(
                    device = %self.status.ident,
                    error = %e,
                    "Hotplug stream failed, unsubscribing"
                );
                self.hotplug = None;
            }
        }
    }

    /// React to a matching USB attach or detach.
    pub fn apply_hotplug(&mut self, action: HotplugAction) {
        match action {
            HotplugAction::Attach => {
                if self.hid.is_none()
                    && let Some(usb) = self.usb.clone()
                {
                    match self.connector.open_hid(&usb) {
                        Ok(transport) => self.attach(IoChannel::new(transport, self.limits)),
                        Err(e) => {
                            warn!(
                                device = %self.status.ident,
                                error = %e,
                                "USB added but hidraw not ready, will retry on next add"
                            );
                        }
                    }
                }
                self.set_mode_from_link(Mode::Usb);
            }
            HotplugAction::Detach => {
                self.close_transport(TransportKind::UsbHid, "usb removed");
                self.set_mode_from_link(Mode::I2s);
            }
        }
    }

    fn set_mode_from_link(&mut self, mode: Mode) {
        if self.status.mode != mode {
            self.status.mode = mode;
            self.notify(DeviceEvent::ModeSet(mode));
        }
    }

    // ---- inbound ---------------------------------------------------------

    /// Next good frame from the serial buffer, skipping garbage and damaged
    /// frames. `None` when more input is needed.
    fn next_serial_frame(&mut self) -> Option<(u8, Vec<u8>)> {
        let channel = self.serial.as_mut()?;
        loop {
            let (consumed, frame) = match protocol::decode(channel.received()) {
                Ok(decoded) if decoded.need_more() => return None,
                Ok(decoded) => {
                    let frame = decoded.frame.map(|f| (f.command, f.payload.to_vec()));
                    if frame.is_none() {
                        trace!(skipped = decoded.consumed, "Resync");
                    }
                    (decoded.consumed, frame)
                }
                Err(FrameError::Checksum {
                    consumed,
                    expected,
                    actual,
                }) => {
                    warn!(
                        expected = %format!("0x{expected:02X}"),
                        actual = %format!("0x{actual:02X}"),
                        "Dropping frame with bad checksum"
                    );
                    (consumed, None)
                }
                Err(e) => {
                    warn!(error = %e, "Undecodable input, discarding buffer");
                    (channel.received().len(), None)
                }
            };
            channel.drain_consumed(consumed);
            if frame.is_some() {
                return frame;
            }
        }
    }

    /// Next well-formed report. Every hidraw read is one report, so a short
    /// or oversized read is dropped on its own without shifting the rest.
    fn next_hid_report(&mut self) -> Option<HidReport> {
        let channel = self.hid.as_mut()?;
        loop {
            let message = channel.next_message()?;
            match HidReport::from_bytes(&message) {
                Some(report) => return Some(report),
                None => warn!(len = message.len(), "Dropping malformed HID report"),
            }
        }
    }

    fn on_hid_report(&mut self, report: HidReport) {
        match report.firmware_version() {
            Some(version) => {
                self.status.firmware_version = Some(version);
                self.notify(DeviceEvent::FirmwareVersion(version));
            }
            None => debug!(
                rw = report.rw,
                reg = report.reg,
                len = report.len,
                "Unhandled HID report"
            ),
        }
    }

    /// Handle one decoded frame: update status, notify observers, and
    /// acknowledge RF-status notifications.
    pub fn on_receive(&mut self, command_id: u8, payload: &[u8]) {
        trace!(command = %format!("0x{command_id:02X}"), len = payload.len(), "Frame received");
        if let HandleResult::Event(event) = handle_frame(&mut self.status, command_id, payload) {
            let is_notify = matches!(event, DeviceEvent::RfStatusNotify(_));
            self.notify(event);
            if is_notify && let Err(e) = self.reply_rfstatus_notify() {
                debug!(error = %e, "Could not acknowledge RF status notification");
            }
        }
    }

    // ---- outbound --------------------------------------------------------

    fn submit(&mut self, kind: TransportKind, message: Vec<u8>) -> Result<(), TransportError> {
        let channel = self
            .channel_mut(kind)
            .ok_or(TransportError::NotOpen(kind))?;
        channel.submit(message);
        // Try right away; whatever is left goes out on the next writable pass.
        let result = channel.on_writable();
        if let Err(e) = result {
            self.drop_failed_transport(kind, &e);
            return Err(e);
        }
        Ok(())
    }

    fn send_command(&mut self, command: Command, value: u8) -> Result<(), TransportError> {
        let frame = protocol::encode(command.request_id(), &[value])?;
        debug!(device = %self.status.ident, %command, value = %format!("0x{value:02X}"), "Sending");
        self.submit(TransportKind::Serial, frame)
    }

    fn query(&mut self, command: Command, value: u8, what: &str) -> Result<(), DeviceError> {
        let result = self
            .send_command(command, value)
            .map_err(|e| DeviceError::query_with(what, e));
        self.record(result)
    }

    pub fn get_config(&mut self) -> Result<(), DeviceError> {
        self.query(Command::GetConfig, QUERY_FILLER, "Getting config")
    }

    pub fn get_rfstatus(&mut self) -> Result<(), DeviceError> {
        self.query(Command::GetRfStatus, QUERY_FILLER, "Getting RF status")
    }

    /// Acknowledge an RF status notification. Sent automatically after every
    /// notification.
    pub fn reply_rfstatus_notify(&mut self) -> Result<(), DeviceError> {
        let result = self
            .submit_reply(Command::NotifyRfStatus)
            .map_err(|e| DeviceError::query_with("Replying RF status notification", e));
        self.record(result)
    }

    fn submit_reply(&mut self, command: Command) -> Result<(), TransportError> {
        let frame = protocol::encode(command.reply_id(), &[ACK_FILLER])?;
        self.submit(TransportKind::Serial, frame)
    }

    pub fn pair(&mut self) -> Result<(), DeviceError> {
        let result = self
            .send_command(Command::Pair, ACK_FILLER)
            .map_err(|e| DeviceError::configure_with("Pairing", e));
        self.record(result)
    }

    /// Switch between I2S and USB audio. Leaving USB closes the HID link
    /// before the request goes out.
    pub fn set_mode(&mut self, mode: Mode) -> Result<(), DeviceError> {
        let result = self.try_set_mode(mode);
        self.record(result)
    }

    fn try_set_mode(&mut self, mode: Mode) -> Result<(), DeviceError> {
        let value = mode
            .to_u8()
            .ok_or_else(|| DeviceError::Argument(format!("Invalid mode: {mode}")))?;
        if mode == self.status.mode {
            self.notify(DeviceEvent::ModeSet(mode));
            return Ok(());
        }
        if self.serial.is_none() {
            return Err(DeviceError::configure_with(
                format!("Setting mode {mode}"),
                TransportError::NotOpen(TransportKind::Serial),
            ));
        }
        if mode == Mode::I2s && self.status.mode == Mode::Usb {
            self.close_transport(TransportKind::UsbHid, "switching to i2s");
        }
        self.send_command(Command::SetMode, value)
            .map_err(|e| DeviceError::configure_with(format!("Setting mode {mode}"), e))
    }

    /// Set the mode and wait for the device to echo it back.
    ///
    /// Frames that arrive while waiting are dispatched as usual. Blocks for at
    /// most `timeout`; observers only ever see `&DeviceStatus`, so this can
    /// not be reached from inside a callback.
    pub fn set_mode_sync(&mut self, mode: Mode, timeout: Duration) -> Result<(), DeviceError> {
        let result = self.try_set_mode_sync(mode, timeout);
        self.record(result)
    }

    fn try_set_mode_sync(&mut self, mode: Mode, timeout: Duration) -> Result<(), DeviceError> {
        let value = mode
            .to_u8()
            .ok_or_else(|| DeviceError::Argument(format!("Invalid mode: {mode}")))?;
        // Only once the device has answered; during open the cached mode is a guess.
        if self.state == DeviceState::Ready && mode == self.status.mode {
            self.notify(DeviceEvent::ModeSet(mode));
            return Ok(());
        }
        if self.serial.is_none() {
            return Err(DeviceError::configure_with(
                format!("Setting mode {mode}"),
                TransportError::NotOpen(TransportKind::Serial),
            ));
        }
        if mode == Mode::I2s && self.status.mode == Mode::Usb {
            self.close_transport(TransportKind::UsbHid, "switching to i2s");
        }

        let deadline = Instant::now() + timeout;
        let frame = protocol::encode(Command::SetMode.request_id(), &[value])
            .map_err(|e| DeviceError::configure_with("Encoding mode request", e.into()))?;
        debug!(
            device = %self.status.ident,
            %mode,
            timeout_ms = timeout.as_millis() as u64,
            "Setting mode (sync)"
        );
        self.blocking_write(TransportKind::Serial, frame, deadline)
            .map_err(|e| DeviceError::configure_with(format!("Writing mode {mode} request"), e))?;

        let ack_id = Command::SetMode.inbound_id();
        loop {
            while let Some((command, payload)) = self.next_serial_frame() {
                if command != ack_id {
                    self.on_receive(command, &payload);
                    continue;
                }
                let echoed = payload.first().copied();
                self.on_receive(command, &payload);
                return match echoed {
                    Some(v) if v == value && payload.len() == 1 => Ok(()),
                    _ => Err(DeviceError::configure(format!(
                        "Mode {mode} not acknowledged, device answered {payload:02X?}"
                    ))),
                };
            }
            self.wait_input(TransportKind::Serial, deadline, timeout)
                .map_err(|e| {
                    DeviceError::configure_with(format!("Waiting for mode {mode} reply"), e)
                })?;
        }
    }

    /// Queue `message` and write it out, waiting until `deadline`.
    fn blocking_write(
        &mut self,
        kind: TransportKind,
        message: Vec<u8>,
        deadline: Instant,
    ) -> Result<(), TransportError> {
        let channel = self
            .channel_mut(kind)
            .ok_or(TransportError::NotOpen(kind))?;
        channel.submit(message);
        let result = channel.flush_blocking(deadline);
        if let Err(e) = &result
            && !matches!(e, TransportError::Timeout { .. })
        {
            self.drop_failed_transport(kind, e);
        }
        result
    }

    /// Wait for more input on `kind`, until `deadline`.
    fn wait_input(
        &mut self,
        kind: TransportKind,
        deadline: Instant,
        timeout: Duration,
    ) -> Result<(), TransportError> {
        let channel = self
            .channel_mut(kind)
            .ok_or(TransportError::NotOpen(kind))?;
        match channel.fill_blocking(deadline) {
            Ok(Some(ReadStatus::Open { .. })) => Ok(()),
            Ok(Some(ReadStatus::Closed { .. })) => {
                // Let whatever arrived before the close be dispatched.
                self.drain_input(kind);
                self.drop_failed_transport(kind, &TransportError::Disconnected);
                Err(TransportError::Disconnected)
            }
            Ok(None) => Err(TransportError::Timeout {
                timeout_ms: timeout.as_millis() as u64,
            }),
            Err(e) => {
                self.drop_failed_transport(kind, &e);
                Err(e)
            }
        }
    }

    pub fn set_i2s_mode(&mut self, mode: I2sMode) -> Result<(), DeviceError> {
        let result = self.try_set_i2s_mode(mode);
        self.record(result)
    }

    fn try_set_i2s_mode(&mut self, mode: I2sMode) -> Result<(), DeviceError> {
        let value = mode
            .to_u8()
            .ok_or_else(|| DeviceError::Argument(format!("Invalid i2s mode: {mode}")))?;
        if self.status.mode != Mode::I2s {
            return Err(DeviceError::configure(format!(
                "Setting i2s mode {mode} while the device is in {} mode",
                self.status.mode
            )));
        }
        if mode == self.status.i2s_mode {
            self.notify(DeviceEvent::I2sModeSet(mode));
            return Ok(());
        }
        self.send_command(Command::SetI2sMode, value)
            .map_err(|e| DeviceError::configure_with(format!("Setting i2s mode {mode}"), e))
    }

    pub fn set_connect_mode(&mut self, mode: ConnectMode) -> Result<(), DeviceError> {
        let result = self.try_set_connect_mode(mode);
        self.record(result)
    }

    fn try_set_connect_mode(&mut self, mode: ConnectMode) -> Result<(), DeviceError> {
        let value = mode
            .to_u8()
            .ok_or_else(|| DeviceError::Argument(format!("Invalid connect mode: {mode}")))?;
        if mode == self.status.connect_mode {
            self.notify(DeviceEvent::ConnectModeSet(mode));
            return Ok(());
        }
        self.send_command(Command::SetConnectMode, value)
            .map_err(|e| DeviceError::configure_with(format!("Setting connect mode {mode}"), e))
    }

    pub fn set_rfchannel(&mut self, channel: u8) -> Result<(), DeviceError> {
        let result = self.try_set_rfchannel(channel);
        self.record(result)
    }

    fn try_set_rfchannel(&mut self, channel: u8) -> Result<(), DeviceError> {
        if !(RF_CHANNEL_MIN..=RF_CHANNEL_MAX).contains(&channel) {
            return Err(DeviceError::Argument(format!(
                "Invalid RF channel {channel} (expected {RF_CHANNEL_MIN}..={RF_CHANNEL_MAX})"
            )));
        }
        if channel == self.status.rf_channel {
            self.notify(DeviceEvent::RfChannelSet(channel));
            return Ok(());
        }
        self.send_command(Command::SetRfChannel, channel)
            .map_err(|e| DeviceError::configure_with(format!("Setting RF channel {channel}"), e))
    }

    pub fn set_rfpower(&mut self, power: u8) -> Result<(), DeviceError> {
        let result = self.try_set_rfpower(power);
        self.record(result)
    }

    fn try_set_rfpower(&mut self, power: u8) -> Result<(), DeviceError> {
        if !(RF_POWER_MIN..=RF_POWER_MAX).contains(&power) {
            return Err(DeviceError::Argument(format!(
                "Invalid RF power {power} (expected {RF_POWER_MIN}..={RF_POWER_MAX})"
            )));
        }
        if power == self.status.rf_power {
            self.notify(DeviceEvent::RfPowerSet(power));
            return Ok(());
        }
        self.send_command(Command::SetRfPower, power)
            .map_err(|e| DeviceError::configure_with(format!("Setting RF power {power}"), e))
    }

    /// Ask for the firmware version over HID; the answer arrives as a
    /// `FirmwareVersion` event.
    pub fn request_firmware_version(&mut self) -> Result<(), DeviceError> {
        let report = HidReport::firmware_version_request().to_bytes().to_vec();
        let result = self
            .submit(TransportKind::UsbHid, report)
            .map_err(|e| DeviceError::query_with("Requesting firmware version", e));
        self.record(result)
    }

    /// Read the firmware version over HID, waiting at most `timeout`.
    pub fn read_firmware_version_sync(&mut self, timeout: Duration) -> Result<u16, DeviceError> {
        let result = self.try_read_firmware_version_sync(timeout);
        self.record(result)
    }

    fn try_read_firmware_version_sync(&mut self, timeout: Duration) -> Result<u16, DeviceError> {
        let deadline = Instant::now() + timeout;
        let report = HidReport::firmware_version_request().to_bytes().to_vec();
        self.blocking_write(TransportKind::UsbHid, report, deadline)
            .map_err(|e| DeviceError::query_with("Requesting firmware version", e))?;
        loop {
            while let Some(report) = self.next_hid_report() {
                let version = report.firmware_version();
                self.on_hid_report(report);
                if let Some(version) = version {
                    return Ok(version);
                }
            }
            self.wait_input(TransportKind::UsbHid, deadline, timeout)
                .map_err(|e| DeviceError::query_with("Waiting for firmware version", e))?;
        }
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        if self.state.is_open() {
            self.release_all();
        }
    }
}

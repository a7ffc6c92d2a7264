//! Device lifecycle state and the cached device settings.

use std::fmt;

use crate::protocol::{ConnectMode, I2sMode, Mode};

/// Lifecycle of a device handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeviceState {
    /// Created, never opened.
    #[default]
    Unopened,
    /// Serial transport is being opened and the start mode negotiated.
    OpeningSerial,
    /// USB side (hidraw + hotplug) is being set up.
    OpeningUsb,
    /// At least one transport is up; requests may be issued.
    Ready,
    /// Closed explicitly or after a failed open.
    Closed,
}

impl fmt::Display for DeviceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceState::Unopened => write!(f, "UNOPENED"),
            DeviceState::OpeningSerial => write!(f, "OPENING_SERIAL"),
            DeviceState::OpeningUsb => write!(f, "OPENING_USB"),
            DeviceState::Ready => write!(f, "READY"),
            DeviceState::Closed => write!(f, "CLOSED"),
        }
    }
}

impl DeviceState {
    pub fn is_opening(&self) -> bool {
        matches!(self, DeviceState::OpeningSerial | DeviceState::OpeningUsb)
    }

    pub fn is_open(&self) -> bool {
        self.is_opening() || *self == DeviceState::Ready
    }
}

/// What the host currently believes about the device.
///
/// Every field is updated only from a device reply (or a hotplug event for
/// `mode`), never from the request that was sent.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DeviceStatus {
    /// Stable identifier, e.g. `/dev/ttyS1 usb:25A7:5804`.
    pub ident: String,
    pub mode: Mode,
    pub i2s_mode: I2sMode,
    pub connect_mode: ConnectMode,
    /// 0 until the device reports it.
    pub rf_channel: u8,
    /// 0 until the device reports it.
    pub rf_power: u8,
    pub firmware_version: Option<u16>,
    pub mcu_version: Option<u8>,
}

impl DeviceStatus {
    pub fn new(ident: impl Into<String>) -> Self {
        Self {
            ident: ident.into(),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_predicates() {
        assert!(!DeviceState::Unopened.is_open());
        assert!(DeviceState::OpeningSerial.is_opening());
        assert!(DeviceState::Ready.is_open());
        assert!(!DeviceState::Closed.is_open());
        assert_eq!(DeviceState::OpeningUsb.to_string(), "OPENING_USB");
    }

    #[test]
    fn test_fresh_status_is_unknown() {
        let status = DeviceStatus::new("/dev/ttyS1");
        assert_eq!(status.mode, Mode::Unknown);
        assert_eq!(status.i2s_mode, I2sMode::Unknown);
        assert_eq!(status.connect_mode, ConnectMode::Unknown);
        assert_eq!(status.rf_channel, 0);
        assert_eq!(status.firmware_version, None);
    }
}

//! Transport layer abstraction.
//!
//! A `Transport` is one non-blocking descriptor (serial tty or hidraw node).
//! The `Connector` hands them out, so the device state machine never touches
//! the platform libraries directly and tests can inject socket pairs.

use std::fmt;
use std::io;
use std::os::fd::RawFd;
use std::path::Path;

use thiserror::Error;

use crate::hotplug::HotplugSource;
use crate::protocol::FrameError;
use crate::protocol::constants::{AW5808_PRODUCT_ID, AW5808_VENDOR_ID};

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Device not found: VID={vid:04X} PID={pid:04X}")]
    DeviceNotFound { vid: u16, pid: u16 },

    #[error("Failed to open device: {0}")]
    OpenFailed(String),

    #[error("{0} transport is not open")]
    NotOpen(TransportKind),

    #[error("Device disconnected")]
    Disconnected,

    #[error("Timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Receive buffer full ({cap} bytes)")]
    BufferFull { cap: usize },

    #[error("Frame error: {0}")]
    Frame(#[from] FrameError),

    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl TransportError {
    /// Underlying OS error code, when there is one.
    pub fn raw_os_error(&self) -> Option<i32> {
        match self {
            TransportError::Io(e) => e.raw_os_error(),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportKind {
    Serial,
    UsbHid,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::Serial => write!(f, "serial"),
            TransportKind::UsbHid => write!(f, "usb-hid"),
        }
    }
}

/// USB side of the device: vendor/product ids and an optional name filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsbIdentity {
    pub vendor_id: u16,
    pub product_id: u16,
    /// Substring matched against the hidraw physical path or HID name.
    pub name: Option<String>,
}

impl UsbIdentity {
    pub fn new(vendor_id: u16, product_id: u16) -> Self {
        Self {
            vendor_id,
            product_id,
            name: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// `VVVV:PPPP`, the form the kernel uses in HID device paths.
    pub fn signature(&self) -> String {
        format!("{:04X}:{:04X}", self.vendor_id, self.product_id)
    }
}

impl Default for UsbIdentity {
    fn default() -> Self {
        Self::new(AW5808_VENDOR_ID, AW5808_PRODUCT_ID)
    }
}

/// One open, non-blocking descriptor.
///
/// `read` and `write` follow `std::io` conventions: `WouldBlock` means "try
/// again on the next readiness notification".
pub trait Transport: Send {
    fn kind(&self) -> TransportKind;

    /// Human readable identifier, e.g. `/dev/ttyS1` or `/dev/hidraw0(usb-...)`.
    fn ident(&self) -> &str;

    fn raw_fd(&self) -> RawFd;

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    fn write(&mut self, data: &[u8]) -> io::Result<usize>;

    /// Whether a zero-length read means the peer went away.
    fn eof_on_empty_read(&self) -> bool {
        true
    }

    /// Whether each read returns exactly one whole message (hidraw reports).
    fn is_message_oriented(&self) -> bool {
        false
    }
}

/// Factory for transports and the hotplug subscription.
pub trait Connector: Send + Sync {
    fn open_serial(&self, path: &Path, baud_rate: u32)
    -> Result<Box<dyn Transport>, TransportError>;

    fn open_hid(&self, usb: &UsbIdentity) -> Result<Box<dyn Transport>, TransportError>;

    fn subscribe_hotplug(&self) -> Result<Box<dyn HotplugSource>, TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_usb_signature_is_uppercase_hex() {
        assert_eq!(UsbIdentity::default().signature(), "25A7:5804");
        assert_eq!(UsbIdentity::new(0x1, 0xabc).signature(), "0001:0ABC");
    }

    #[test]
    fn test_os_error_code() {
        let err = TransportError::Io(io::Error::from_raw_os_error(libc::ENODEV));
        assert_eq!(err.raw_os_error(), Some(libc::ENODEV));
        assert_eq!(TransportError::Disconnected.raw_os_error(), None);
    }
}

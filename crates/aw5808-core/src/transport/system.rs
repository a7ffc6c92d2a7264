//! Connector for real hardware.

use std::path::Path;

use super::hidraw::HidrawTransport;
use super::serial::SerialTransport;
use super::traits::{Connector, Transport, TransportError, UsbIdentity};
use crate::hotplug::HotplugSource;
use crate::hotplug::netlink::{UeventGroup, UeventSocket};

/// Opens real serial ports, hidraw nodes and the uevent socket.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemConnector;

impl Connector for SystemConnector {
    fn open_serial(
        &self,
        path: &Path,
        baud_rate: u32,
    ) -> Result<Box<dyn Transport>, TransportError> {
        Ok(Box::new(SerialTransport::open(path, baud_rate)?))
    }

    fn open_hid(&self, usb: &UsbIdentity) -> Result<Box<dyn Transport>, TransportError> {
        Ok(Box::new(HidrawTransport::open(usb)?))
    }

    fn subscribe_hotplug(&self) -> Result<Box<dyn HotplugSource>, TransportError> {
        Ok(Box::new(UeventSocket::open(UeventGroup::detect())?))
    }
}

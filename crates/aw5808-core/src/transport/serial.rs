//! serialport-backed UART transport.

use std::io::{self, Read, Write};
use std::os::fd::{AsRawFd, RawFd};
use std::path::Path;
use std::time::Duration;

use serialport::{SerialPortType, TTYPort};
use tracing::{info, instrument};

use super::traits::{Transport, TransportError, TransportKind};
use crate::reactor::set_nonblocking;

pub struct SerialTransport {
    port: TTYPort,
    ident: String,
}

impl SerialTransport {
    /// Open `path` at `baud_rate`, 8N1, no flow control, non-blocking.
    #[instrument(level = "info", fields(path = %path.display()))]
    pub fn open(path: &Path, baud_rate: u32) -> Result<Self, TransportError> {
        let ident = path.to_string_lossy().into_owned();
        let port = serialport::new(ident.as_str(), baud_rate)
            .data_bits(serialport::DataBits::Eight)
            .parity(serialport::Parity::None)
            .stop_bits(serialport::StopBits::One)
            .flow_control(serialport::FlowControl::None)
            .timeout(Duration::ZERO)
            .open_native()?;
        set_nonblocking(port.as_raw_fd())?;

        info!(baud = baud_rate, "Serial port opened");
        Ok(Self { port, ident })
    }
}

impl Transport for SerialTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Serial
    }

    fn ident(&self) -> &str {
        &self.ident
    }

    fn raw_fd(&self) -> RawFd {
        self.port.as_raw_fd()
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.port.read(buf)
    }

    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.port.write(data)
    }
}

/// A serial port the OS knows about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialPortEntry {
    pub path: String,
    /// `VVVV:PPPP` for USB-serial adapters.
    pub usb: Option<String>,
    pub product: Option<String>,
}

/// Enumerate serial ports.
pub fn list_serial_ports() -> Result<Vec<SerialPortEntry>, TransportError> {
    let ports = serialport::available_ports()?;
    Ok(ports
        .into_iter()
        .map(|p| match p.port_type {
            SerialPortType::UsbPort(info) => SerialPortEntry {
                path: p.port_name,
                usb: Some(format!("{:04X}:{:04X}", info.vid, info.pid)),
                product: info.product,
            },
            _ => SerialPortEntry {
                path: p.port_name,
                usb: None,
                product: None,
            },
        })
        .collect())
}

//! Socket-pair backed transports for tests.
//!
//! A serial port is modelled by a `UnixStream` pair, a hidraw node by a
//! `UnixDatagram` pair (one report per datagram) and the uevent socket by
//! another datagram pair. The test keeps the peer end and plays the device.

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::net::{UnixDatagram, UnixStream};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::traits::{Connector, Transport, TransportError, TransportKind, UsbIdentity};
use crate::hotplug::HotplugSource;

enum MockIo {
    Stream(UnixStream),
    Datagram(UnixDatagram),
}

impl MockIo {
    fn raw_fd(&self) -> RawFd {
        match self {
            MockIo::Stream(s) => s.as_raw_fd(),
            MockIo::Datagram(d) => d.as_raw_fd(),
        }
    }

    fn set_nonblocking(&self, nonblocking: bool) -> io::Result<()> {
        match self {
            MockIo::Stream(s) => s.set_nonblocking(nonblocking),
            MockIo::Datagram(d) => d.set_nonblocking(nonblocking),
        }
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            MockIo::Stream(s) => s.read(buf),
            MockIo::Datagram(d) => d.recv(buf),
        }
    }

    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        match self {
            MockIo::Stream(s) => s.write(data),
            MockIo::Datagram(d) => d.send(data),
        }
    }
}

/// Device side of a mock link.
pub struct MockTransport {
    kind: TransportKind,
    ident: String,
    io: MockIo,
    closed: Arc<AtomicBool>,
}

impl Transport for MockTransport {
    fn kind(&self) -> TransportKind {
        self.kind
    }

    fn ident(&self) -> &str {
        &self.ident
    }

    fn raw_fd(&self) -> RawFd {
        self.io.raw_fd()
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.io.read(buf)
    }

    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.io.write(data)
    }

    fn eof_on_empty_read(&self) -> bool {
        matches!(self.io, MockIo::Stream(_))
    }

    fn is_message_oriented(&self) -> bool {
        matches!(self.io, MockIo::Datagram(_))
    }
}

impl Drop for MockTransport {
    fn drop(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Test side of a mock link: plays the AW5808.
pub struct MockPeer {
    io: Mutex<MockIo>,
    closed: Arc<AtomicBool>,
}

impl MockPeer {
    pub fn send(&self, data: &[u8]) -> io::Result<()> {
        let mut io = self.lock();
        match &mut *io {
            MockIo::Stream(s) => s.write_all(data),
            MockIo::Datagram(d) => d.send(data).map(|_| ()),
        }
    }

    /// Everything the host has written so far, without waiting.
    pub fn recv_available(&self) -> io::Result<Vec<u8>> {
        let mut io = self.lock();
        io.set_nonblocking(true)?;
        let mut out = Vec::new();
        let mut buf = [0u8; 4096];
        let result = loop {
            match io.read(&mut buf) {
                Ok(0) => break Ok(()),
                Ok(n) => out.extend_from_slice(&buf[..n]),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break Ok(()),
                Err(e) => break Err(e),
            }
        };
        io.set_nonblocking(false)?;
        result.map(|()| out)
    }

    /// One read (one datagram on a HID link), waiting up to `timeout`.
    pub fn recv_timeout(&self, timeout: Duration) -> io::Result<Vec<u8>> {
        let mut io = self.lock();
        match &*io {
            MockIo::Stream(s) => s.set_read_timeout(Some(timeout))?,
            MockIo::Datagram(d) => d.set_read_timeout(Some(timeout))?,
        }
        let mut buf = [0u8; 4096];
        let n = io.read(&mut buf)?;
        Ok(buf[..n].to_vec())
    }

    /// Read exactly `len` bytes from a stream link, waiting up to `timeout`
    /// for each chunk.
    pub fn recv_exact(&self, len: usize, timeout: Duration) -> io::Result<Vec<u8>> {
        let mut out = Vec::with_capacity(len);
        while out.len() < len {
            let chunk = self.recv_timeout(timeout)?;
            if chunk.is_empty() {
                return Err(io::ErrorKind::UnexpectedEof.into());
            }
            out.extend_from_slice(&chunk);
        }
        Ok(out)
    }

    /// Whether the host side has been dropped.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockIo> {
        self.io.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn pair(
    kind: TransportKind,
    ident: &str,
    host: MockIo,
    peer: MockIo,
) -> io::Result<(MockTransport, MockPeer)> {
    host.set_nonblocking(true)?;
    let closed = Arc::new(AtomicBool::new(false));
    Ok((
        MockTransport {
            kind,
            ident: ident.to_string(),
            io: host,
            closed: closed.clone(),
        },
        MockPeer {
            io: Mutex::new(peer),
            closed,
        },
    ))
}

/// Byte-stream link standing in for a serial port.
pub fn serial_pair(ident: &str) -> io::Result<(MockTransport, MockPeer)> {
    let (host, peer) = UnixStream::pair()?;
    pair(TransportKind::Serial, ident, MockIo::Stream(host), MockIo::Stream(peer))
}

/// Datagram link standing in for a hidraw node.
pub fn hid_pair(ident: &str) -> io::Result<(MockTransport, MockPeer)> {
    let (host, peer) = UnixDatagram::pair()?;
    pair(TransportKind::UsbHid, ident, MockIo::Datagram(host), MockIo::Datagram(peer))
}

/// Host side of a fake uevent socket.
pub struct MockHotplug {
    sock: UnixDatagram,
}

impl HotplugSource for MockHotplug {
    fn raw_fd(&self) -> RawFd {
        self.sock.as_raw_fd()
    }

    fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.sock.recv(buf)
    }
}

/// Test side of a fake uevent socket.
pub struct HotplugFeed {
    sock: UnixDatagram,
}

impl HotplugFeed {
    /// Send a kernel-style uevent: `action@devpath` followed by NUL
    /// separated `KEY=value` pairs.
    pub fn send_event(&self, action: &str, devpath: &str, subsystem: &str) -> io::Result<()> {
        let devname = devpath.rsplit('/').next().unwrap_or_default();
        let msg = format!(
            "{action}@{devpath}\0ACTION={action}\0DEVPATH={devpath}\0\
             SUBSYSTEM={subsystem}\0DEVNAME={devname}\0SEQNUM=1\0"
        );
        self.send_raw(msg.as_bytes())
    }

    pub fn send_raw(&self, msg: &[u8]) -> io::Result<()> {
        self.sock.send(msg).map(|_| ())
    }
}

pub fn hotplug_pair() -> io::Result<(MockHotplug, HotplugFeed)> {
    let (host, feed) = UnixDatagram::pair()?;
    host.set_nonblocking(true)?;
    Ok((MockHotplug { sock: host }, HotplugFeed { sock: feed }))
}

/// Connector that hands out pre-built mock transports in FIFO order.
///
/// An empty queue behaves like a missing device.
#[derive(Default)]
pub struct MockConnector {
    serial: Mutex<VecDeque<MockTransport>>,
    hid: Mutex<VecDeque<MockTransport>>,
    hotplug: Mutex<Option<MockHotplug>>,
    hid_attempts: AtomicUsize,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_serial(&self, transport: MockTransport) {
        lock(&self.serial).push_back(transport);
    }

    pub fn push_hid(&self, transport: MockTransport) {
        lock(&self.hid).push_back(transport);
    }

    pub fn set_hotplug(&self, source: MockHotplug) {
        *lock(&self.hotplug) = Some(source);
    }

    /// How many times a HID open was attempted.
    pub fn hid_attempts(&self) -> usize {
        self.hid_attempts.load(Ordering::SeqCst)
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

impl Connector for MockConnector {
    fn open_serial(
        &self,
        path: &Path,
        _baud_rate: u32,
    ) -> Result<Box<dyn Transport>, TransportError> {
        match lock(&self.serial).pop_front() {
            Some(t) => Ok(Box::new(t)),
            None => Err(TransportError::Io(io::Error::new(
                io::ErrorKind::NotFound,
                format!("{}: no such device", path.display()),
            ))),
        }
    }

    fn open_hid(&self, usb: &UsbIdentity) -> Result<Box<dyn Transport>, TransportError> {
        self.hid_attempts.fetch_add(1, Ordering::SeqCst);
        match lock(&self.hid).pop_front() {
            Some(t) => Ok(Box::new(t)),
            None => Err(TransportError::DeviceNotFound {
                vid: usb.vendor_id,
                pid: usb.product_id,
            }),
        }
    }

    fn subscribe_hotplug(&self) -> Result<Box<dyn HotplugSource>, TransportError> {
        match lock(&self.hotplug).take() {
            Some(source) => Ok(Box::new(source)),
            None => Err(TransportError::OpenFailed(
                "no hotplug source configured".to_string(),
            )),
        }
    }
}

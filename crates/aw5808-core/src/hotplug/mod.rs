//! USB hotplug tracking.
//!
//! Uevents arrive as one datagram per event, either raw from the kernel
//! (`action@devpath\0KEY=value\0...`) or re-broadcast by udev after its
//! rules ran (`libudev\0` header followed by the same properties). The
//! manager keeps the ones for the watched subsystem whose device path
//! carries the `VVVV:PPPP` signature and turns them into attach/detach
//! actions.

#[cfg(target_os = "linux")]
pub mod netlink;

use std::fmt;
use std::io;
use std::os::fd::RawFd;

use byteorder::{BigEndian, ByteOrder, NativeEndian};
use tracing::{debug, trace};

use crate::protocol::constants::{
    HIDRAW_SUBSYSTEM, UDEV_MONITOR_HEADER_LEN, UDEV_MONITOR_MAGIC, UDEV_MONITOR_PREFIX,
};
use crate::transport::{TransportError, UsbIdentity};

/// Largest uevent message the kernel sends.
pub const UEVENT_BUFFER_SIZE: usize = 8192;

/// Readable source of raw uevent messages.
pub trait HotplugSource: Send {
    fn raw_fd(&self) -> RawFd;

    /// Receive one message; `WouldBlock` when none is pending.
    fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UeventAction {
    Add,
    Remove,
    Other(String),
}

impl UeventAction {
    fn parse(s: &str) -> Self {
        match s {
            "add" => UeventAction::Add,
            "remove" => UeventAction::Remove,
            other => UeventAction::Other(other.to_string()),
        }
    }
}

impl fmt::Display for UeventAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UeventAction::Add => write!(f, "add"),
            UeventAction::Remove => write!(f, "remove"),
            UeventAction::Other(s) => write!(f, "{s}"),
        }
    }
}

/// A parsed kernel uevent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HotplugEvent {
    pub action: UeventAction,
    pub devpath: String,
    pub subsystem: Option<String>,
    pub devname: Option<String>,
}

impl HotplugEvent {
    /// Parse a kernel or udev uevent. Anything without an action and a
    /// device path yields `None`.
    pub fn parse(msg: &[u8]) -> Option<Self> {
        if msg.starts_with(UDEV_MONITOR_PREFIX) {
            return Self::parse_udev(msg);
        }

        let mut parts = msg.split(|&b| b == 0).filter(|p| !p.is_empty());
        let header = String::from_utf8_lossy(parts.next()?);
        let (action, devpath) = match header.split_once('@') {
            Some((a, p)) => (Some(a.to_string()), Some(p.to_string())),
            None => (None, None),
        };
        Self::from_properties(action, devpath, parts)
    }

    /// `libudev\0` header: big-endian magic at 8, then native-endian header
    /// size, properties offset and properties length.
    fn parse_udev(msg: &[u8]) -> Option<Self> {
        if msg.len() < UDEV_MONITOR_HEADER_LEN {
            return None;
        }
        if BigEndian::read_u32(&msg[8..12]) != UDEV_MONITOR_MAGIC {
            trace!("Bad udev monitor magic");
            return None;
        }
        let offset = NativeEndian::read_u32(&msg[16..20]) as usize;
        let len = NativeEndian::read_u32(&msg[20..24]) as usize;
        let end = offset.checked_add(len)?;
        if offset < UDEV_MONITOR_HEADER_LEN || end > msg.len() {
            return None;
        }
        let parts = msg[offset..end].split(|&b| b == 0).filter(|p| !p.is_empty());
        Self::from_properties(None, None, parts)
    }

    fn from_properties<'a>(
        mut action: Option<String>,
        mut devpath: Option<String>,
        parts: impl Iterator<Item = &'a [u8]>,
    ) -> Option<Self> {
        let mut subsystem = None;
        let mut devname = None;

        for part in parts {
            let part = String::from_utf8_lossy(part);
            let Some((key, value)) = part.split_once('=') else {
                continue;
            };
            match key {
                "ACTION" => action = Some(value.to_string()),
                "DEVPATH" => devpath = Some(value.to_string()),
                "SUBSYSTEM" => subsystem = Some(value.to_string()),
                "DEVNAME" => devname = Some(value.to_string()),
                _ => {}
            }
        }

        Some(Self {
            action: UeventAction::parse(&action?),
            devpath: devpath.filter(|p| !p.is_empty())?,
            subsystem,
            devname,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HotplugAction {
    /// A matching node appeared: (re)open HID, device is in USB mode.
    Attach,
    /// A matching node went away: close HID, device is back in I2S mode.
    Detach,
}

/// Filters uevents down to the ones for one USB identity.
pub struct HotplugManager {
    source: Box<dyn HotplugSource>,
    subsystem: String,
    signature: String,
    buf: Vec<u8>,
}

impl HotplugManager {
    pub fn new(source: Box<dyn HotplugSource>, usb: &UsbIdentity) -> Self {
        Self {
            source,
            subsystem: HIDRAW_SUBSYSTEM.to_string(),
            signature: usb.signature(),
            buf: vec![0u8; UEVENT_BUFFER_SIZE],
        }
    }

    pub fn raw_fd(&self) -> RawFd {
        self.source.raw_fd()
    }

    pub fn signature(&self) -> &str {
        &self.signature
    }

    /// Map one event to an action, if it concerns this device.
    pub fn classify(&self, event: &HotplugEvent) -> Option<HotplugAction> {
        if event.subsystem.as_deref() != Some(self.subsystem.as_str()) {
            return None;
        }
        if !event.devpath.to_ascii_uppercase().contains(&self.signature) {
            return None;
        }
        match event.action {
            UeventAction::Add => Some(HotplugAction::Attach),
            UeventAction::Remove => Some(HotplugAction::Detach),
            UeventAction::Other(_) => None,
        }
    }

    /// Drain every pending message without blocking.
    pub fn poll_actions(&mut self) -> Result<Vec<HotplugAction>, TransportError> {
        let mut actions = Vec::new();
        loop {
            let n = match self.source.recv(&mut self.buf) {
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            };
            if n == 0 {
                break;
            }
            let Some(event) = HotplugEvent::parse(&self.buf[..n]) else {
                trace!(len = n, "Ignoring unparsable uevent");
                continue;
            };
            if let Some(action) = self.classify(&event) {
                debug!(action = %event.action, devpath = %event.devpath, "Hotplug");
                actions.push(action);
            }
        }
        Ok(actions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock;

    const DEVPATH: &str =
        "/devices/pci0000:00/0000:00:14.0/usb1/1-2/1-2:1.3/0003:25A7:5804.0007/hidraw/hidraw2";

    #[test]
    fn test_parse_kernel_uevent() {
        let msg = format!(
            "add@{DEVPATH}\0ACTION=add\0DEVPATH={DEVPATH}\0\
             SUBSYSTEM=hidraw\0DEVNAME=hidraw2\0SEQNUM=4242\0"
        );
        let event = HotplugEvent::parse(msg.as_bytes()).unwrap();
        assert_eq!(event.action, UeventAction::Add);
        assert_eq!(event.devpath, DEVPATH);
        assert_eq!(event.subsystem.as_deref(), Some("hidraw"));
        assert_eq!(event.devname.as_deref(), Some("hidraw2"));
    }

    /// Build a udev monitor message the way udevd lays it out.
    fn udev_message(properties: &str) -> Vec<u8> {
        let mut msg = vec![0u8; UDEV_MONITOR_HEADER_LEN];
        msg[..8].copy_from_slice(UDEV_MONITOR_PREFIX);
        BigEndian::write_u32(&mut msg[8..12], UDEV_MONITOR_MAGIC);
        NativeEndian::write_u32(&mut msg[12..16], UDEV_MONITOR_HEADER_LEN as u32);
        NativeEndian::write_u32(&mut msg[16..20], UDEV_MONITOR_HEADER_LEN as u32);
        NativeEndian::write_u32(&mut msg[20..24], properties.len() as u32);
        msg.extend_from_slice(properties.as_bytes());
        msg
    }

    #[test]
    fn test_parse_udev_monitor_message() {
        let msg = udev_message(&format!(
            "ACTION=remove\0DEVPATH={DEVPATH}\0\
             SUBSYSTEM=hidraw\0DEVNAME=/dev/hidraw2\0SEQNUM=4243\0"
        ));
        let event = HotplugEvent::parse(&msg).unwrap();
        assert_eq!(event.action, UeventAction::Remove);
        assert_eq!(event.devpath, DEVPATH);
        assert_eq!(event.subsystem.as_deref(), Some("hidraw"));
        assert_eq!(event.devname.as_deref(), Some("/dev/hidraw2"));
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(HotplugEvent::parse(b"").is_none());
        assert!(HotplugEvent::parse(b"garbage without separators").is_none());
        assert!(HotplugEvent::parse(b"libudev\0\xfe\xed\xca\xfe").is_none());

        let good = udev_message(&format!("ACTION=add\0DEVPATH={DEVPATH}\0"));
        let mut bad_magic = good.clone();
        bad_magic[8] ^= 0xFF;
        assert!(HotplugEvent::parse(&bad_magic).is_none());

        let mut past_end = good.clone();
        NativeEndian::write_u32(&mut past_end[20..24], 4096);
        assert!(HotplugEvent::parse(&past_end).is_none());
    }

    #[test]
    fn test_manager_accepts_udev_messages() {
        let (source, feed) = mock::hotplug_pair().unwrap();
        let mut manager = HotplugManager::new(Box::new(source), &UsbIdentity::default());

        let add = udev_message(&format!(
            "ACTION=add\0DEVPATH={DEVPATH}\0SUBSYSTEM=hidraw\0"
        ));
        feed.send_raw(&add).unwrap();
        assert_eq!(manager.poll_actions().unwrap(), vec![HotplugAction::Attach]);
    }

    #[test]
    fn test_manager_filters_subsystem_and_signature() {
        let (source, feed) = mock::hotplug_pair().unwrap();
        let mut manager = HotplugManager::new(Box::new(source), &UsbIdentity::default());

        feed.send_event("add", DEVPATH, "hidraw").unwrap();
        feed.send_event("add", "/devices/.../0003:046D:C52B.0001/hidraw/hidraw0", "hidraw")
            .unwrap();
        feed.send_event("add", "/devices/.../1-2:1.3/0003:25A7:5804.0007", "hid")
            .unwrap();
        feed.send_event("change", DEVPATH, "hidraw").unwrap();
        feed.send_raw(b"\0\0\0").unwrap();
        feed.send_event("remove", DEVPATH, "hidraw").unwrap();

        let actions = manager.poll_actions().unwrap();
        assert_eq!(actions, vec![HotplugAction::Attach, HotplugAction::Detach]);
        assert!(manager.poll_actions().unwrap().is_empty());
    }

    #[test]
    fn test_signature_match_ignores_case() {
        let (source, _feed) = mock::hotplug_pair().unwrap();
        let manager = HotplugManager::new(Box::new(source), &UsbIdentity::default());
        let event = HotplugEvent {
            action: UeventAction::Remove,
            devpath: "/devices/x/0003:25a7:5804.0001/hidraw/hidraw0".to_string(),
            subsystem: Some("hidraw".to_string()),
            devname: None,
        };
        assert_eq!(manager.classify(&event), Some(HotplugAction::Detach));
    }
}

//! hidraw transport and USB discovery.
//!
//! nusb finds the USB device and gives us its sysfs directory; the hidraw
//! nodes hang off the HID interfaces below it. Reports are exchanged
//! through `/dev/hidrawN` directly so the kernel HID driver stays bound.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

use nusb::{MaybeFuture, list_devices};
use tracing::{debug, info, instrument};

use super::traits::{Transport, TransportError, TransportKind, UsbIdentity};

/// sysfs nesting between a USB device and its hidraw nodes:
/// `1-2/1-2:1.0/0003:VVVV:PPPP.NNNN/hidraw/hidrawN`.
const HIDRAW_SEARCH_DEPTH: usize = 4;

/// One `/dev/hidrawN` node and what the HID core says about it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HidrawNode {
    pub devnode: PathBuf,
    pub hid_name: Option<String>,
    pub hid_phys: Option<String>,
}

impl HidrawNode {
    fn matches(&self, name: &str) -> bool {
        self.hid_phys.as_deref().is_some_and(|p| p.contains(name))
            || self.hid_name.as_deref().is_some_and(|n| n.contains(name))
    }

    fn label(&self) -> String {
        match &self.hid_phys {
            Some(phys) => format!("{}({phys})", self.devnode.display()),
            None => self.devnode.display().to_string(),
        }
    }
}

/// A USB device matching the requested ids.
#[derive(Debug, Clone)]
pub struct UsbDeviceEntry {
    pub vendor_id: u16,
    pub product_id: u16,
    pub bus_id: String,
    pub manufacturer: Option<String>,
    pub product: Option<String>,
    pub hidraw: Vec<HidrawNode>,
}

/// List USB devices with the given ids, each with its hidraw nodes.
pub fn list_usb_devices(
    vendor_id: u16,
    product_id: u16,
) -> Result<Vec<UsbDeviceEntry>, TransportError> {
    let devices = list_devices()
        .wait()
        .map_err(|e| TransportError::OpenFailed(e.to_string()))?;

    Ok(devices
        .filter(|d| d.vendor_id() == vendor_id && d.product_id() == product_id)
        .map(|d| {
            let sysfs = d.sysfs_path();
            let bus_id = sysfs
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let mut hidraw = Vec::new();
            find_hidraw_nodes(sysfs, HIDRAW_SEARCH_DEPTH, &mut hidraw);
            hidraw.sort_by(|a, b| a.devnode.cmp(&b.devnode));
            UsbDeviceEntry {
                vendor_id,
                product_id,
                bus_id,
                manufacturer: d.manufacturer_string().map(str::to_string),
                product: d.product_string().map(str::to_string),
                hidraw,
            }
        })
        .collect())
}

fn find_hidraw_nodes(dir: &Path, depth: usize, out: &mut Vec<HidrawNode>) {
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        // Symlinks (driver, subsystem, ...) lead out of the device tree.
        let Ok(file_type) = entry.file_type() else {
            continue;
        };
        if !file_type.is_dir() {
            continue;
        }
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if dir.file_name().is_some_and(|d| d == "hidraw") && name.starts_with("hidraw") {
            out.push(describe_node(&name));
        } else if depth > 0 {
            find_hidraw_nodes(&entry.path(), depth - 1, out);
        }
    }
}

fn describe_node(node: &str) -> HidrawNode {
    let uevent = Path::new("/sys/class/hidraw")
        .join(node)
        .join("device/uevent");
    let (hid_name, hid_phys) = fs::read_to_string(uevent)
        .map(|text| parse_hid_uevent(&text))
        .unwrap_or_default();
    HidrawNode {
        devnode: Path::new("/dev").join(node),
        hid_name,
        hid_phys,
    }
}

/// Pull `HID_NAME` and `HID_PHYS` out of a HID device's uevent file.
fn parse_hid_uevent(text: &str) -> (Option<String>, Option<String>) {
    let mut name = None;
    let mut phys = None;
    for line in text.lines() {
        if let Some(v) = line.strip_prefix("HID_NAME=") {
            name = Some(v.to_string());
        } else if let Some(v) = line.strip_prefix("HID_PHYS=") {
            phys = Some(v.to_string());
        }
    }
    (name, phys)
}

pub struct HidrawTransport {
    file: File,
    ident: String,
}

impl HidrawTransport {
    /// Find and open the hidraw node of the first matching USB device.
    #[instrument(level = "info", fields(usb = %usb.signature(), name = ?usb.name))]
    pub fn open(usb: &UsbIdentity) -> Result<Self, TransportError> {
        let not_found = || TransportError::DeviceNotFound {
            vid: usb.vendor_id,
            pid: usb.product_id,
        };
        let devices = list_usb_devices(usb.vendor_id, usb.product_id)?;
        let node = devices
            .iter()
            .flat_map(|d| d.hidraw.iter())
            .find(|n| usb.name.as_deref().is_none_or(|name| n.matches(name)))
            .ok_or_else(not_found)?;
        debug!(devnode = %node.devnode.display(), "Found hidraw node");
        Self::open_path(&node.devnode, node.label())
    }

    /// Open a known `/dev/hidrawN` read/write, non-blocking.
    pub fn open_path(path: &Path, ident: String) -> Result<Self, TransportError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_NONBLOCK)
            .open(path)
            .map_err(|e| TransportError::OpenFailed(format!("{}: {e}", path.display())))?;
        info!(ident = %ident, "hidraw opened");
        Ok(Self { file, ident })
    }
}

impl Transport for HidrawTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::UsbHid
    }

    fn ident(&self) -> &str {
        &self.ident
    }

    fn raw_fd(&self) -> RawFd {
        self.file.as_raw_fd()
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.file.read(buf)
    }

    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.file.write(data)
    }

    fn is_message_oriented(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_hid_uevent() {
        let text = "DRIVER=hid-generic\n\
                    HID_ID=0003:000025A7:00005804\n\
                    HID_NAME=Awinic AW5808\n\
                    HID_PHYS=usb-0000:00:14.0-2/input3\n\
                    HID_UNIQ=\n";
        let (name, phys) = parse_hid_uevent(text);
        assert_eq!(name.as_deref(), Some("Awinic AW5808"));
        assert_eq!(phys.as_deref(), Some("usb-0000:00:14.0-2/input3"));
    }

    #[test]
    fn test_node_name_filter() {
        let node = HidrawNode {
            devnode: PathBuf::from("/dev/hidraw3"),
            hid_name: Some("Awinic AW5808".to_string()),
            hid_phys: Some("usb-0000:00:14.0-2/input3".to_string()),
        };
        assert!(node.matches("usb-0000:00:14.0-2"));
        assert!(node.matches("AW5808"));
        assert!(!node.matches("usb-0000:00:14.0-3"));
        assert_eq!(node.label(), "/dev/hidraw3(usb-0000:00:14.0-2/input3)");
    }

    #[test]
    fn test_find_hidraw_nodes_in_sysfs_layout() {
        let root = std::env::temp_dir().join(format!("aw5808-sysfs-{}", std::process::id()));
        let leaf = root.join("1-2:1.3/0003:25A7:5804.0007/hidraw/hidraw5");
        fs::create_dir_all(&leaf).unwrap();
        fs::create_dir_all(root.join("1-2:1.0/ep_81")).unwrap();

        let mut out = Vec::new();
        find_hidraw_nodes(&root, HIDRAW_SEARCH_DEPTH, &mut out);
        fs::remove_dir_all(&root).unwrap();

        assert_eq!(out.len(), 1);
        assert_eq!(out[0].devnode, PathBuf::from("/dev/hidraw5"));
    }
}

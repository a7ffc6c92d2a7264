//! Uevent socket (`NETLINK_KOBJECT_UEVENT`).
//!
//! The kernel group fires as soon as the hidraw node exists, before udev
//! has applied its rules, so opening the node right then can fail on
//! permissions and no second add follows. When udevd is running we listen
//! on its group instead, which only sees an event once the node is ready.

use std::fmt;
use std::io;
use std::mem;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::path::Path;

use tracing::info;

use super::HotplugSource;
use crate::protocol::constants::{KERNEL_UEVENT_GROUP, UDEV_UEVENT_GROUP};
use crate::transport::TransportError;

/// Socket udevd listens on for control messages; present while it runs.
const UDEV_CONTROL_SOCKET: &str = "/run/udev/control";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UeventGroup {
    /// Raw events straight from the kernel.
    Kernel,
    /// Events re-broadcast by udevd after its rules ran.
    Udev,
}

impl UeventGroup {
    /// udev when udevd is running, the kernel group otherwise.
    pub fn detect() -> Self {
        if Path::new(UDEV_CONTROL_SOCKET).exists() {
            UeventGroup::Udev
        } else {
            UeventGroup::Kernel
        }
    }

    fn mask(self) -> u32 {
        match self {
            UeventGroup::Kernel => KERNEL_UEVENT_GROUP,
            UeventGroup::Udev => UDEV_UEVENT_GROUP,
        }
    }
}

impl fmt::Display for UeventGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UeventGroup::Kernel => write!(f, "kernel"),
            UeventGroup::Udev => write!(f, "udev"),
        }
    }
}

/// Non-blocking netlink socket bound to one uevent group.
#[derive(Debug)]
pub struct UeventSocket {
    fd: OwnedFd,
}

impl UeventSocket {
    pub fn open(group: UeventGroup) -> Result<Self, TransportError> {
        // SAFETY: socket(2) returns a fresh descriptor or -1.
        let raw = unsafe {
            libc::socket(
                libc::AF_NETLINK,
                libc::SOCK_DGRAM | libc::SOCK_NONBLOCK | libc::SOCK_CLOEXEC,
                libc::NETLINK_KOBJECT_UEVENT,
            )
        };
        if raw < 0 {
            return Err(io::Error::last_os_error().into());
        }
        // SAFETY: `raw` is a valid descriptor we exclusively own.
        let fd = unsafe { OwnedFd::from_raw_fd(raw) };

        // SAFETY: sockaddr_nl is plain old data; all-zero is a valid value.
        let mut addr: libc::sockaddr_nl = unsafe { mem::zeroed() };
        addr.nl_family = libc::AF_NETLINK as libc::sa_family_t;
        addr.nl_groups = group.mask();

        // SAFETY: `addr` outlives the call and the length matches its type.
        let ret = unsafe {
            libc::bind(
                fd.as_raw_fd(),
                &addr as *const libc::sockaddr_nl as *const libc::sockaddr,
                mem::size_of::<libc::sockaddr_nl>() as libc::socklen_t,
            )
        };
        if ret < 0 {
            return Err(io::Error::last_os_error().into());
        }

        info!(%group, "Subscribed to uevents");
        Ok(Self { fd })
    }
}

impl HotplugSource for UeventSocket {
    fn raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }

    fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        // SAFETY: `buf` is a valid writable region of `buf.len()` bytes.
        let n = unsafe {
            libc::recv(
                self.fd.as_raw_fd(),
                buf.as_mut_ptr() as *mut libc::c_void,
                buf.len(),
                0,
            )
        };
        if n < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(n as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_group_masks() {
        assert_eq!(UeventGroup::Kernel.mask(), 1);
        assert_eq!(UeventGroup::Udev.mask(), 2);
        assert_eq!(UeventGroup::Udev.to_string(), "udev");
    }
}

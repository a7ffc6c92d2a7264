//! Readiness polling on raw descriptors.
//!
//! Thin layer over `poll(2)`. The registration set is rebuilt by the caller
//! on every turn from whatever transports are alive, so a closed transport
//! can never be polled after its descriptor is gone.

use std::io;
use std::os::fd::RawFd;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Interest {
    pub readable: bool,
    pub writable: bool,
}

impl Interest {
    pub const READABLE: Interest = Interest {
        readable: true,
        writable: false,
    };
    pub const WRITABLE: Interest = Interest {
        readable: false,
        writable: true,
    };
    pub const BOTH: Interest = Interest {
        readable: true,
        writable: true,
    };

    fn events(self) -> libc::c_short {
        let mut events = 0;
        if self.readable {
            events |= libc::POLLIN;
        }
        if self.writable {
            events |= libc::POLLOUT;
        }
        events
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Readiness {
    pub readable: bool,
    pub writable: bool,
    pub hangup: bool,
    pub error: bool,
}

impl Readiness {
    fn from_revents(revents: libc::c_short) -> Self {
        Self {
            readable: revents & (libc::POLLIN | libc::POLLPRI) != 0,
            writable: revents & libc::POLLOUT != 0,
            hangup: revents & libc::POLLHUP != 0,
            error: revents & (libc::POLLERR | libc::POLLNVAL) != 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        !(self.readable || self.writable || self.hangup || self.error)
    }
}

fn timeout_ms(timeout: Option<Duration>) -> libc::c_int {
    match timeout {
        None => -1,
        Some(t) => {
            // Round up so a sub-millisecond wait does not become a busy spin.
            let ms = t.as_micros().div_ceil(1000);
            ms.min(libc::c_int::MAX as u128) as libc::c_int
        }
    }
}

/// Reusable `pollfd` array.
#[derive(Debug, Default)]
pub struct Poller {
    fds: Vec<libc::pollfd>,
}

impl Poller {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait until at least one source is ready or `timeout` elapses.
    ///
    /// Returns the ready sources in the order they were given. An interrupted
    /// wait returns an empty list.
    pub fn poll<T: Copy>(
        &mut self,
        sources: &[(T, RawFd, Interest)],
        timeout: Option<Duration>,
    ) -> io::Result<Vec<(T, Readiness)>> {
        self.fds.clear();
        self.fds
            .extend(sources.iter().map(|&(_, fd, interest)| libc::pollfd {
                fd,
                events: interest.events(),
                revents: 0,
            }));

        // SAFETY: `fds` is a live, correctly sized array of pollfd structs.
        let ret = unsafe {
            libc::poll(
                self.fds.as_mut_ptr(),
                self.fds.len() as libc::nfds_t,
                timeout_ms(timeout),
            )
        };
        if ret < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(Vec::new());
            }
            return Err(err);
        }

        Ok(sources
            .iter()
            .zip(&self.fds)
            .filter_map(|(&(token, _, _), pfd)| {
                let readiness = Readiness::from_revents(pfd.revents);
                (!readiness.is_empty()).then_some((token, readiness))
            })
            .collect())
    }
}

/// Block on a single descriptor for at most `timeout`.
///
/// Returns an empty `Readiness` on timeout.
pub fn wait_fd(fd: RawFd, interest: Interest, timeout: Duration) -> io::Result<Readiness> {
    let deadline = Instant::now() + timeout;
    loop {
        let mut pfd = libc::pollfd {
            fd,
            events: interest.events(),
            revents: 0,
        };
        let remaining = deadline.saturating_duration_since(Instant::now());
        // SAFETY: single pollfd on the stack.
        let ret = unsafe { libc::poll(&mut pfd, 1, timeout_ms(Some(remaining))) };
        if ret < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted && !remaining.is_zero() {
                continue;
            }
            return Err(err);
        }
        return Ok(Readiness::from_revents(pfd.revents));
    }
}

/// Put a descriptor into non-blocking mode.
pub(crate) fn set_nonblocking(fd: RawFd) -> io::Result<()> {
    // SAFETY: plain fcntl calls on a descriptor owned by the caller.
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }
    if flags & libc::O_NONBLOCK != 0 {
        return Ok(());
    }
    // SAFETY: see above.
    if unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

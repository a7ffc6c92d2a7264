//! Single-threaded reactor over every device in a table.
//!
//! Each turn rebuilds the poll set from the devices' live sources, dispatches
//! readiness, then runs tasks posted through a [`LoopHandle`]. Other threads
//! never touch a device directly; they post closures and the loop runs them
//! on its own thread.

use std::io::{self, Read, Write};
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::net::UnixStream;
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, Sender};
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, info, trace};

use crate::device::Source;
use crate::reactor::{Interest, Poller};
use crate::registry::{DeviceId, DeviceTable};

/// Work posted to the loop from another thread.
pub type Task = Box<dyn FnOnce(&mut DeviceTable) + Send + 'static>;

enum Message {
    Run(Task),
    Stop,
}

#[derive(Error, Debug)]
#[error("Event loop is gone")]
pub struct LoopClosed;

/// Thread-safe handle for posting work to an [`EventLoop`].
#[derive(Clone)]
pub struct LoopHandle {
    tx: Sender<Message>,
    waker: Arc<UnixStream>,
}

impl LoopHandle {
    /// Run `task` on the loop thread during its next turn.
    pub fn submit<F>(&self, task: F) -> Result<(), LoopClosed>
    where
        F: FnOnce(&mut DeviceTable) + Send + 'static,
    {
        self.send(Message::Run(Box::new(task)))
    }

    /// Ask the loop to return from [`EventLoop::run`].
    pub fn stop(&self) -> Result<(), LoopClosed> {
        self.send(Message::Stop)
    }

    fn send(&self, message: Message) -> Result<(), LoopClosed> {
        self.tx.send(message).map_err(|_| LoopClosed)?;
        // A full wake pipe already guarantees a wakeup.
        match (&*self.waker).write(&[1]) {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(()),
            Err(_) => Err(LoopClosed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Token {
    Wake,
    Device(DeviceId, Source, RawFd),
}

pub struct EventLoop {
    devices: DeviceTable,
    poller: Poller,
    tx: Sender<Message>,
    rx: Receiver<Message>,
    wake_rx: UnixStream,
    waker: Arc<UnixStream>,
    stopped: bool,
}

impl EventLoop {
    pub fn new(devices: DeviceTable) -> io::Result<Self> {
        let (wake_rx, wake_tx) = UnixStream::pair()?;
        wake_rx.set_nonblocking(true)?;
        wake_tx.set_nonblocking(true)?;
        let (tx, rx) = mpsc::channel();
        Ok(Self {
            devices,
            poller: Poller::new(),
            tx,
            rx,
            wake_rx,
            waker: Arc::new(wake_tx),
            stopped: false,
        })
    }

    pub fn handle(&self) -> LoopHandle {
        LoopHandle {
            tx: self.tx.clone(),
            waker: self.waker.clone(),
        }
    }

    pub fn devices(&self) -> &DeviceTable {
        &self.devices
    }

    pub fn devices_mut(&mut self) -> &mut DeviceTable {
        &mut self.devices
    }

    pub fn into_devices(self) -> DeviceTable {
        self.devices
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    /// One reactor turn. Waits at most `timeout` (forever if `None`) and
    /// returns the number of ready sources serviced.
    pub fn run_once(&mut self, timeout: Option<Duration>) -> io::Result<usize> {
        let mut sources = vec![(Token::Wake, self.wake_rx.as_raw_fd(), Interest::READABLE)];
        for (id, _, device) in self.devices.iter() {
            sources.extend(
                device
                    .sources()
                    .into_iter()
                    .map(|(source, fd, interest)| (Token::Device(id, source, fd), fd, interest)),
            );
        }

        let ready = self.poller.poll(&sources, timeout)?;
        let mut serviced = 0;
        for (token, readiness) in ready {
            match token {
                Token::Wake => self.drain_wakeups(),
                Token::Device(id, source, fd) => {
                    // An earlier source this turn may have closed this one.
                    let Some(device) = self.devices.get_mut(id) else {
                        continue;
                    };
                    let still_live = device
                        .sources()
                        .iter()
                        .any(|&(s, f, _)| s == source && f == fd);
                    if !still_live {
                        trace!(device = %id, ?source, "Source went away this turn");
                        continue;
                    }
                    device.handle_ready(source, readiness);
                    serviced += 1;
                }
            }
        }

        self.run_tasks();
        Ok(serviced)
    }

    fn drain_wakeups(&mut self) {
        let mut buf = [0u8; 64];
        loop {
            match self.wake_rx.read(&mut buf) {
                Ok(0) => break,
                Ok(_) => continue,
                Err(_) => break,
            }
        }
    }

    fn run_tasks(&mut self) {
        while let Ok(message) = self.rx.try_recv() {
            match message {
                Message::Run(task) => task(&mut self.devices),
                Message::Stop => {
                    debug!("Stop requested");
                    self.stopped = true;
                }
            }
        }
    }

    /// Run until [`LoopHandle::stop`] is called.
    pub fn run(&mut self) -> io::Result<()> {
        info!(devices = self.devices.len(), "Event loop running");
        self.stopped = false;
        while !self.stopped {
            self.run_once(None)?;
        }
        info!("Event loop stopped");
        Ok(())
    }

    /// Run until `done` returns true, the loop is stopped, or `timeout`
    /// elapses. Returns whether `done` was satisfied.
    pub fn run_until<F>(&mut self, timeout: Duration, mut done: F) -> io::Result<bool>
    where
        F: FnMut(&DeviceTable) -> bool,
    {
        let deadline = Instant::now() + timeout;
        loop {
            if done(&self.devices) {
                return Ok(true);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() || self.stopped {
                return Ok(false);
            }
            self.run_once(Some(remaining))?;
        }
    }
}

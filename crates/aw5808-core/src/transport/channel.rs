//! Buffered, non-blocking I/O over one transport.
//!
//! The receive side grows in `IO_SIZE` steps up to a hard cap; the send side
//! is a queue of whole messages so datagram transports (hidraw) never see two
//! reports glued together, while stream transports may drain a message over
//! several writes. On datagram transports the length of every read is kept
//! too, so received messages can be taken back out one at a time.

use std::collections::VecDeque;
use std::io;
use std::os::fd::RawFd;
use std::time::Instant;

use tracing::{debug, trace};

use super::traits::{Transport, TransportError, TransportKind};
use crate::protocol::constants::{DEFAULT_MAX_READ_PER_POLL, IO_SIZE, MAX_RECV_BUF_SIZE};
use crate::reactor::{Interest, wait_fd};

/// Buffer limits for one channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelLimits {
    /// Stop reading after this many bytes in one readiness pass.
    pub max_read_per_poll: usize,
    /// Hard cap on buffered, unconsumed input.
    pub max_recv_buffer: usize,
}

impl Default for ChannelLimits {
    fn default() -> Self {
        Self {
            max_read_per_poll: DEFAULT_MAX_READ_PER_POLL,
            max_recv_buffer: MAX_RECV_BUF_SIZE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadStatus {
    /// Transport is still usable; `read` bytes were appended.
    Open { read: usize },
    /// Peer closed; whatever arrived before the close is still buffered.
    Closed { read: usize },
}

impl ReadStatus {
    pub fn bytes_read(self) -> usize {
        match self {
            ReadStatus::Open { read } | ReadStatus::Closed { read } => read,
        }
    }
}

fn map_timeout(e: io::Error) -> io::Error {
    // serialport reports "not ready" on a zero-timeout port as TimedOut.
    if e.kind() == io::ErrorKind::TimedOut {
        io::Error::from(io::ErrorKind::WouldBlock)
    } else {
        e
    }
}

pub struct IoChannel {
    // Buffers are declared before the transport so they are released before
    // the descriptor is closed.
    recv: Vec<u8>,
    /// Length of each message in `recv`, on message-oriented transports.
    messages: VecDeque<usize>,
    send: VecDeque<Vec<u8>>,
    /// Bytes of `send.front()` already written.
    send_offset: usize,
    limits: ChannelLimits,
    message_oriented: bool,
    transport: Box<dyn Transport>,
}

impl IoChannel {
    pub fn new(transport: Box<dyn Transport>, limits: ChannelLimits) -> Self {
        Self {
            recv: Vec::new(),
            messages: VecDeque::new(),
            send: VecDeque::new(),
            send_offset: 0,
            limits,
            message_oriented: transport.is_message_oriented(),
            transport,
        }
    }

    pub fn kind(&self) -> TransportKind {
        self.transport.kind()
    }

    pub fn ident(&self) -> &str {
        self.transport.ident()
    }

    pub fn raw_fd(&self) -> RawFd {
        self.transport.raw_fd()
    }

    pub fn limits(&self) -> ChannelLimits {
        self.limits
    }

    /// Unconsumed input, oldest byte first.
    pub fn received(&self) -> &[u8] {
        &self.recv
    }

    /// Drop `n` bytes from the front of the receive buffer.
    pub fn drain_consumed(&mut self, n: usize) {
        let n = n.min(self.recv.len());
        self.recv.drain(..n);
        let mut left = n;
        while left > 0
            && let Some(front) = self.messages.front_mut()
        {
            let take = left.min(*front);
            *front -= take;
            left -= take;
            if *front == 0 {
                self.messages.pop_front();
            }
        }
    }

    /// Take the oldest whole message off the receive buffer.
    ///
    /// Only meaningful on message-oriented transports; stream transports
    /// never record boundaries and always return `None`.
    pub fn next_message(&mut self) -> Option<Vec<u8>> {
        let len = self.messages.pop_front()?;
        let len = len.min(self.recv.len());
        Some(self.recv.drain(..len).collect())
    }

    pub fn wants_write(&self) -> bool {
        !self.send.is_empty()
    }

    /// Bytes still waiting to be written.
    pub fn pending_write(&self) -> usize {
        self.send.iter().map(Vec::len).sum::<usize>() - self.send_offset
    }

    /// Readiness the reactor should wait for.
    pub fn interest(&self) -> Interest {
        Interest {
            readable: true,
            writable: self.wants_write(),
        }
    }

    /// Queue one message; it goes out on the next writable pass.
    pub fn submit(&mut self, message: Vec<u8>) {
        if message.is_empty() {
            return;
        }
        trace!(transport = %self.kind(), len = message.len(), "Queued");
        self.send.push_back(message);
    }

    /// Room for the next read, growing the buffer when needed.
    fn reserve_recv(&mut self) -> Result<usize, TransportError> {
        let cap = self.limits.max_recv_buffer;
        let room = cap.saturating_sub(self.recv.len());
        if room == 0 {
            return Err(TransportError::BufferFull { cap });
        }
        let step = IO_SIZE.min(room);
        if self.recv.capacity() - self.recv.len() < step {
            self.recv.reserve_exact(step);
        }
        Ok((self.recv.capacity() - self.recv.len()).min(room))
    }

    /// Read until the transport would block, the peer closes, or the per-poll
    /// budget is used up.
    pub fn on_readable(&mut self) -> Result<ReadStatus, TransportError> {
        let mut total = 0;
        while total < self.limits.max_read_per_poll {
            let want = self.reserve_recv()?;
            let start = self.recv.len();
            self.recv.resize(start + want, 0);
            let result = self.transport.read(&mut self.recv[start..]).map_err(map_timeout);
            match result {
                Ok(0) => {
                    self.recv.truncate(start);
                    if self.transport.eof_on_empty_read() {
                        debug!(transport = %self.kind(), "Peer closed");
                        return Ok(ReadStatus::Closed { read: total });
                    }
                    break;
                }
                Ok(n) => {
                    self.recv.truncate(start + n);
                    if self.message_oriented {
                        self.messages.push_back(n);
                    }
                    total += n;
                }
                Err(e) => {
                    self.recv.truncate(start);
                    match e.kind() {
                        io::ErrorKind::WouldBlock => break,
                        io::ErrorKind::Interrupted => continue,
                        _ => return Err(e.into()),
                    }
                }
            }
        }
        if total > 0 {
            trace!(transport = %self.kind(), bytes = total, buffered = self.recv.len(), "Read");
        }
        Ok(ReadStatus::Open { read: total })
    }

    /// Write queued messages until the queue is empty or the transport would
    /// block. Returns the number of bytes written.
    pub fn on_writable(&mut self) -> Result<usize, TransportError> {
        let mut written = 0;
        while let Some(head) = self.send.front() {
            let result = self
                .transport
                .write(&head[self.send_offset..])
                .map_err(map_timeout);
            match result {
                Ok(0) => break,
                Ok(n) => {
                    written += n;
                    self.send_offset += n;
                    if self.send_offset >= head.len() {
                        self.send.pop_front();
                        self.send_offset = 0;
                    }
                }
                Err(e) => match e.kind() {
                    io::ErrorKind::WouldBlock => break,
                    io::ErrorKind::Interrupted => continue,
                    _ => return Err(e.into()),
                },
            }
        }
        if written > 0 {
            trace!(transport = %self.kind(), bytes = written, "Wrote");
        }
        Ok(written)
    }

    /// Write everything queued, waiting on the descriptor until `deadline`.
    pub fn flush_blocking(&mut self, deadline: Instant) -> Result<(), TransportError> {
        let start = Instant::now();
        loop {
            self.on_writable()?;
            if !self.wants_write() {
                return Ok(());
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(TransportError::Timeout {
                    timeout_ms: start.elapsed().as_millis() as u64,
                });
            }
            wait_fd(self.raw_fd(), Interest::WRITABLE, remaining)?;
        }
    }

    /// Wait for input until `deadline` and read what is there.
    ///
    /// `Ok(None)` means the deadline passed with nothing to read.
    pub fn fill_blocking(
        &mut self,
        deadline: Instant,
    ) -> Result<Option<ReadStatus>, TransportError> {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Ok(None);
        }
        let ready = wait_fd(self.raw_fd(), Interest::READABLE, remaining)?;
        if ready.is_empty() {
            return Ok(None);
        }
        let status = self.on_readable()?;
        if ready.hangup && status == (ReadStatus::Open { read: 0 }) {
            return Ok(Some(ReadStatus::Closed { read: 0 }));
        }
        Ok(Some(status))
    }

    /// Release both buffers, then the descriptor.
    pub fn close(mut self) {
        debug!(transport = %self.kind(), ident = %self.ident(), "Closing");
        self.recv = Vec::new();
        self.messages.clear();
        self.send.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock;
    use std::time::Duration;

    #[test]
    fn test_read_into_buffer_and_drain() {
        let (transport, peer) = mock::serial_pair("/dev/ttyMOCK").unwrap();
        let mut channel = IoChannel::new(Box::new(transport), ChannelLimits::default());

        peer.send(&[1, 2, 3, 4]).unwrap();
        assert_eq!(channel.on_readable().unwrap(), ReadStatus::Open { read: 4 });
        assert_eq!(channel.received(), &[1, 2, 3, 4]);

        channel.drain_consumed(3);
        assert_eq!(channel.received(), &[4]);
        channel.drain_consumed(10);
        assert!(channel.received().is_empty());
    }

    #[test]
    fn test_empty_read_would_block() {
        let (transport, _peer) = mock::serial_pair("/dev/ttyMOCK").unwrap();
        let mut channel = IoChannel::new(Box::new(transport), ChannelLimits::default());
        assert_eq!(channel.on_readable().unwrap(), ReadStatus::Open { read: 0 });
    }

    #[test]
    fn test_peer_close_keeps_buffered_bytes() {
        let (transport, peer) = mock::serial_pair("/dev/ttyMOCK").unwrap();
        let mut channel = IoChannel::new(Box::new(transport), ChannelLimits::default());
        peer.send(&[9, 9]).unwrap();
        drop(peer);
        assert_eq!(channel.on_readable().unwrap(), ReadStatus::Closed { read: 2 });
        assert_eq!(channel.received(), &[9, 9]);
    }

    #[test]
    fn test_receive_cap_reports_buffer_full() {
        let (transport, peer) = mock::serial_pair("/dev/ttyMOCK").unwrap();
        let limits = ChannelLimits {
            max_read_per_poll: 64 * 1024,
            max_recv_buffer: 16,
        };
        let mut channel = IoChannel::new(Box::new(transport), limits);
        peer.send(&[0u8; 40]).unwrap();
        assert!(matches!(
            channel.on_readable(),
            Err(TransportError::BufferFull { cap: 16 })
        ));
        assert_eq!(channel.received().len(), 16);
    }

    #[test]
    fn test_read_budget_bounds_one_pass() {
        let (transport, peer) = mock::serial_pair("/dev/ttyMOCK").unwrap();
        let limits = ChannelLimits {
            max_read_per_poll: 1,
            max_recv_buffer: MAX_RECV_BUF_SIZE,
        };
        let mut channel = IoChannel::new(Box::new(transport), limits);
        peer.send(&[0u8; 8]).unwrap();
        let first = channel.on_readable().unwrap().bytes_read();
        assert!(first >= 1);
        // Whatever the first pass left behind is picked up by the next one.
        let mut total = first;
        while total < 8 {
            total += channel.on_readable().unwrap().bytes_read();
        }
        assert_eq!(channel.received().len(), 8);
    }

    #[test]
    fn test_submit_arms_write_interest() {
        let (transport, peer) = mock::serial_pair("/dev/ttyMOCK").unwrap();
        let mut channel = IoChannel::new(Box::new(transport), ChannelLimits::default());
        assert!(!channel.interest().writable);

        channel.submit(vec![0x55, 0xAA]);
        channel.submit(Vec::new());
        assert!(channel.interest().writable);
        assert_eq!(channel.pending_write(), 2);

        assert_eq!(channel.on_writable().unwrap(), 2);
        assert!(!channel.wants_write());
        assert_eq!(peer.recv_available().unwrap(), vec![0x55, 0xAA]);
    }

    #[test]
    fn test_datagram_messages_stay_separate() {
        let (transport, peer) = mock::hid_pair("hidraw-mock").unwrap();
        let mut channel = IoChannel::new(Box::new(transport), ChannelLimits::default());
        channel.submit(vec![1; 64]);
        channel.submit(vec![2; 64]);
        channel.flush_blocking(Instant::now() + Duration::from_millis(100)).unwrap();

        let first = peer.recv_timeout(Duration::from_millis(100)).unwrap();
        let second = peer.recv_timeout(Duration::from_millis(100)).unwrap();
        assert_eq!(first, vec![1; 64]);
        assert_eq!(second, vec![2; 64]);
    }

    #[test]
    fn test_datagram_reads_keep_message_boundaries() {
        let (transport, peer) = mock::hid_pair("hidraw-mock").unwrap();
        let mut channel = IoChannel::new(Box::new(transport), ChannelLimits::default());
        peer.send(&[7; 10]).unwrap();
        peer.send(&[8; 64]).unwrap();

        assert_eq!(channel.on_readable().unwrap(), ReadStatus::Open { read: 74 });
        assert_eq!(channel.next_message(), Some(vec![7; 10]));
        assert_eq!(channel.next_message(), Some(vec![8; 64]));
        assert_eq!(channel.next_message(), None);
        assert!(channel.received().is_empty());
    }

    #[test]
    fn test_drain_consumed_keeps_message_boundaries() {
        let (transport, peer) = mock::hid_pair("hidraw-mock").unwrap();
        let mut channel = IoChannel::new(Box::new(transport), ChannelLimits::default());
        peer.send(&[1, 2, 3]).unwrap();
        peer.send(&[4, 5]).unwrap();
        channel.on_readable().unwrap();

        channel.drain_consumed(4);
        assert_eq!(channel.next_message(), Some(vec![5]));
        assert_eq!(channel.next_message(), None);
    }

    #[test]
    fn test_stream_reads_have_no_message_boundaries() {
        let (transport, peer) = mock::serial_pair("/dev/ttyMOCK").unwrap();
        let mut channel = IoChannel::new(Box::new(transport), ChannelLimits::default());
        peer.send(&[1, 2, 3]).unwrap();
        channel.on_readable().unwrap();
        assert_eq!(channel.next_message(), None);
        assert_eq!(channel.received(), &[1, 2, 3]);
    }

    #[test]
    fn test_fill_blocking_times_out() {
        let (transport, _peer) = mock::serial_pair("/dev/ttyMOCK").unwrap();
        let mut channel = IoChannel::new(Box::new(transport), ChannelLimits::default());
        let status = channel
            .fill_blocking(Instant::now() + Duration::from_millis(10))
            .unwrap();
        assert_eq!(status, None);
    }

    #[test]
    fn test_close_releases_descriptor() {
        let (transport, peer) = mock::serial_pair("/dev/ttyMOCK").unwrap();
        let channel = IoChannel::new(Box::new(transport), ChannelLimits::default());
        assert!(!peer.is_closed());
        channel.close();
        assert!(peer.is_closed());
    }
}

//! In-memory duplex session pair.
//!
//! Each direction is a bounded byte queue, so a full queue surfaces as
//! `WouldBlock` exactly like a socket send buffer would.

use std::collections::VecDeque;
use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};

use super::{IoSession, SessionAttributes, SessionId};

#[derive(Debug, Default)]
struct Pipe {
    buf: VecDeque<u8>,
    /// Writer side has closed; reader sees EOF once drained.
    closed: bool,
}

/// One end of an in-memory duplex connection.
#[derive(Debug)]
pub struct MemorySession {
    id: SessionId,
    inbound: Arc<Mutex<Pipe>>,
    outbound: Arc<Mutex<Pipe>>,
    capacity: usize,
    closed: bool,
    peer_addr: Option<SocketAddr>,
    attributes: SessionAttributes,
}

impl MemorySession {
    /// Create two connected ends, each direction holding at most `capacity` bytes.
    pub fn pair(capacity: usize) -> (MemorySession, MemorySession) {
        let a_to_b = Arc::new(Mutex::new(Pipe::default()));
        let b_to_a = Arc::new(Mutex::new(Pipe::default()));
        let a = MemorySession::new(Arc::clone(&b_to_a), Arc::clone(&a_to_b), capacity);
        let b = MemorySession::new(a_to_b, b_to_a, capacity);
        (a, b)
    }

    fn new(inbound: Arc<Mutex<Pipe>>, outbound: Arc<Mutex<Pipe>>, capacity: usize) -> Self {
        Self {
            id: SessionId::next(),
            inbound,
            outbound,
            capacity: capacity.max(1),
            closed: false,
            peer_addr: None,
            attributes: SessionAttributes::new(),
        }
    }

    /// Set the address reported by [`IoSession::peer_addr`].
    pub fn with_peer_addr(mut self, addr: SocketAddr) -> Self {
        self.peer_addr = Some(addr);
        self
    }

    /// Bytes written by the peer and not yet read.
    pub fn pending_inbound(&self) -> usize {
        lock(&self.inbound).buf.len()
    }

    /// Bytes written by this end and not yet read by the peer.
    pub fn pending_outbound(&self) -> usize {
        lock(&self.outbound).buf.len()
    }
}

fn lock(pipe: &Mutex<Pipe>) -> MutexGuard<'_, Pipe> {
    // A panic while holding the lock cannot leave the queue half-updated.
    pipe.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl IoSession for MemorySession {
    fn id(&self) -> SessionId {
        self.id
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.closed {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "session closed"));
        }
        let mut pipe = lock(&self.inbound);
        if pipe.buf.is_empty() {
            return if pipe.closed {
                Ok(0)
            } else {
                Err(io::ErrorKind::WouldBlock.into())
            };
        }
        let n = buf.len().min(pipe.buf.len());
        for (dst, src) in buf.iter_mut().zip(pipe.buf.drain(..n)) {
            *dst = src;
        }
        Ok(n)
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.closed {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "session closed"));
        }
        let mut pipe = lock(&self.outbound);
        let room = self.capacity.saturating_sub(pipe.buf.len());
        if room == 0 {
            return Err(io::ErrorKind::WouldBlock.into());
        }
        let n = buf.len().min(room);
        pipe.buf.extend(&buf[..n]);
        Ok(n)
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            lock(&self.outbound).closed = true;
        }
    }

    fn is_closed(&self) -> bool {
        self.closed
    }

    fn attributes(&self) -> &SessionAttributes {
        &self.attributes
    }

    fn attributes_mut(&mut self) -> &mut SessionAttributes {
        &mut self.attributes
    }

    fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bytes_flow_between_ends() {
        let (mut a, mut b) = MemorySession::pair(64);
        assert_eq!(a.write(b"ping").unwrap(), 4);
        assert_eq!(b.pending_inbound(), 4);

        let mut buf = [0u8; 16];
        let n = b.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"ping");
    }

    #[test]
    fn empty_read_would_block() {
        let (_a, mut b) = MemorySession::pair(64);
        let mut buf = [0u8; 4];
        let err = b.read(&mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::WouldBlock);
    }

    #[test]
    fn full_pipe_applies_backpressure() {
        let (mut a, _b) = MemorySession::pair(4);
        assert_eq!(a.write(b"abcdef").unwrap(), 4);
        let err = a.write(b"g").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::WouldBlock);
    }

    #[test]
    fn close_is_seen_as_eof_after_drain() {
        let (mut a, mut b) = MemorySession::pair(64);
        a.write(b"x").unwrap();
        a.close();
        assert!(a.is_closed());

        let mut buf = [0u8; 4];
        assert_eq!(b.read(&mut buf).unwrap(), 1);
        assert_eq!(b.read(&mut buf).unwrap(), 0);
    }
}

//! Non-blocking I/O session abstraction.
//!
//! # Data Flow
//! ```text
//! reactor (tokio task / test pump)
//!     → IoSession::read / write (WouldBlock when not ready)
//!     → [tls::SecureSession decorates, same interface]
//!     → net::Connection
//! ```
//!
//! # Design Decisions
//! - Sessions never block; readiness belongs to whoever drives them
//! - Attributes are keyed by type, so a layer looks up exactly the value it stored
//! - Session ids are process-unique and survive decoration

pub mod memory;
pub mod tcp;

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};

pub use memory::MemorySession;
pub use tcp::TcpSession;

static SESSION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(u64);

impl SessionId {
    /// Generate a new unique session ID.
    pub fn next() -> Self {
        Self(SESSION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

/// Typed attribute bag attached to a session.
#[derive(Debug, Default)]
pub struct SessionAttributes {
    inner: http::Extensions,
}

impl SessionAttributes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a value, returning the previous value of the same type.
    pub fn insert<T: Clone + Send + Sync + 'static>(&mut self, value: T) -> Option<T> {
        self.inner.insert(value)
    }

    pub fn get<T: Send + Sync + 'static>(&self) -> Option<&T> {
        self.inner.get::<T>()
    }

    pub fn contains<T: Send + Sync + 'static>(&self) -> bool {
        self.inner.get::<T>().is_some()
    }

    pub fn remove<T: Send + Sync + 'static>(&mut self) -> Option<T> {
        self.inner.remove::<T>()
    }
}

/// One non-blocking transport endpoint.
///
/// `read` and `write` return [`io::ErrorKind::WouldBlock`] when the endpoint
/// is not ready. `read` returning `Ok(0)` means the peer closed its side.
pub trait IoSession: Send {
    fn id(&self) -> SessionId;

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    fn write(&mut self, buf: &[u8]) -> io::Result<usize>;

    fn close(&mut self);

    fn is_closed(&self) -> bool;

    fn attributes(&self) -> &SessionAttributes;

    fn attributes_mut(&mut self) -> &mut SessionAttributes;

    fn peer_addr(&self) -> Option<SocketAddr> {
        None
    }

    /// Whether the session holds outbound bytes waiting for a writable event.
    fn wants_write(&self) -> bool {
        false
    }
}

impl<S: IoSession + ?Sized> IoSession for Box<S> {
    fn id(&self) -> SessionId {
        (**self).id()
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        (**self).read(buf)
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        (**self).write(buf)
    }

    fn close(&mut self) {
        (**self).close()
    }

    fn is_closed(&self) -> bool {
        (**self).is_closed()
    }

    fn attributes(&self) -> &SessionAttributes {
        (**self).attributes()
    }

    fn attributes_mut(&mut self) -> &mut SessionAttributes {
        (**self).attributes_mut()
    }

    fn peer_addr(&self) -> Option<SocketAddr> {
        (**self).peer_addr()
    }

    fn wants_write(&self) -> bool {
        (**self).wants_write()
    }
}

/// Adapts a session to [`io::Read`] for feeding record-layer code.
pub(crate) struct SessionReader<'a, S: IoSession + ?Sized>(pub &'a mut S);

impl<S: IoSession + ?Sized> io::Read for SessionReader<'_, S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.read(buf)
    }
}

/// Adapts a session to [`io::Write`] for draining record-layer output.
pub(crate) struct SessionWriter<'a, S: IoSession + ?Sized>(pub &'a mut S);

impl<S: IoSession + ?Sized> io::Write for SessionWriter<'_, S> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

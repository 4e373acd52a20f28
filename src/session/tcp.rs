//! Tokio `TcpStream` adapter.
//!
//! The stream is registered with the tokio reactor; reads and writes use the
//! non-blocking `try_*` calls and the driving task awaits [`TcpSession::ready`]
//! between attempts.

use std::io;
use std::net::SocketAddr;

use tokio::io::{Interest, Ready};
use tokio::net::TcpStream;

use super::{IoSession, SessionAttributes, SessionId};

#[derive(Debug)]
pub struct TcpSession {
    id: SessionId,
    stream: Option<TcpStream>,
    peer_addr: Option<SocketAddr>,
    attributes: SessionAttributes,
}

impl TcpSession {
    pub fn new(stream: TcpStream) -> Self {
        let peer_addr = stream.peer_addr().ok();
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!(error = %e, "Failed to set TCP_NODELAY");
        }
        Self {
            id: SessionId::next(),
            stream: Some(stream),
            peer_addr,
            attributes: SessionAttributes::new(),
        }
    }

    /// Wait until the socket is ready for the given interest.
    pub async fn ready(&self, interest: Interest) -> io::Result<Ready> {
        match &self.stream {
            Some(stream) => stream.ready(interest).await,
            None => Err(io::Error::new(io::ErrorKind::NotConnected, "session closed")),
        }
    }

    fn stream(&self) -> io::Result<&TcpStream> {
        self.stream
            .as_ref()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "session closed"))
    }
}

impl IoSession for TcpSession {
    fn id(&self) -> SessionId {
        self.id
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream()?.try_read(buf)
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.stream()?.try_write(buf)
    }

    fn close(&mut self) {
        // Dropping the stream closes the socket.
        if self.stream.take().is_some() {
            tracing::trace!(session_id = %self.id, "TCP session closed");
        }
    }

    fn is_closed(&self) -> bool {
        self.stream.is_none()
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

//! Secure session decorator.

use std::io::{self, Read as _, Write as _};
use std::net::SocketAddr;
use std::sync::Arc;

use super::{HandshakeState, HandshakeWatch, TlsContext, TlsDecoration, TlsInfo, TlsRole, TlsSetupHandler};
use crate::error::TransportError;
use crate::observability::metrics;
use crate::session::{IoSession, SessionAttributes, SessionId, SessionReader, SessionWriter};

/// An [`IoSession`] that runs TLS over another session.
///
/// Presents the same non-blocking interface as the wrapped session. Bytes
/// read or written through it are plaintext; the wrapped session only ever
/// carries TLS records.
pub struct SecureSession<S: IoSession> {
    inner: S,
    context: TlsContext,
    setup: Option<Arc<dyn TlsSetupHandler>>,
    role: Option<TlsRole>,
    tls: Option<rustls::Connection>,
    state: HandshakeWatch,
    failure: Option<String>,
    /// The wrapped session reported EOF.
    peer_eof: bool,
}

impl<S: IoSession> SecureSession<S> {
    pub fn new(inner: S, context: TlsContext, setup: Option<Arc<dyn TlsSetupHandler>>) -> Self {
        Self {
            inner,
            context,
            setup,
            role: None,
            tls: None,
            state: HandshakeWatch::new(),
            failure: None,
            peer_eof: false,
        }
    }

    /// Select the handshake role and create the TLS state machine.
    ///
    /// Must be called exactly once, before any application data is exchanged.
    /// Registers a [`TlsDecoration`] on the wrapped session.
    pub fn bind(&mut self, role: TlsRole) -> Result<(), TransportError> {
        if self.role.is_some() {
            return Err(TransportError::config("secure session is already bound"));
        }
        if self.inner.attributes().contains::<TlsDecoration>() {
            return Err(TransportError::config(format!(
                "{} already carries a TLS decoration",
                self.inner.id()
            )));
        }

        let mut conn = self.context.new_connection(role, self.inner.peer_addr())?;
        if let Some(setup) = &self.setup {
            setup.initialize(role, &mut conn)?;
        }

        self.inner.attributes_mut().insert(TlsDecoration {
            role,
            handshake: self.state.clone(),
        });
        self.tls = Some(conn);
        self.role = Some(role);
        self.state.set(HandshakeState::Handshaking);

        tracing::debug!(session_id = %self.inner.id(), %role, "TLS session bound");
        Ok(())
    }

    pub fn role(&self) -> Option<TlsRole> {
        self.role
    }

    pub fn state(&self) -> HandshakeState {
        self.state.get()
    }

    /// Reason the handshake failed, if it did.
    pub fn handshake_failure(&self) -> Option<&str> {
        self.failure.as_deref()
    }

    /// The wrapped (ciphertext) session.
    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Negotiated parameters, once a TLS connection exists.
    pub fn info(&self) -> Option<TlsInfo> {
        let role = self.role?;
        let tls = self.tls.as_ref()?;
        Some(build_info(role, tls))
    }

    /// Move handshake and record bytes without touching application data.
    ///
    /// Returns the state reached. Errors are terminal for this session.
    pub fn drive(&mut self) -> Result<HandshakeState, TransportError> {
        match self.state.get() {
            HandshakeState::NotStarted => {
                return Err(TransportError::config("secure session used before bind"))
            }
            HandshakeState::Closed => {
                return Err(match &self.failure {
                    Some(reason) => TransportError::HandshakeFailure(reason.clone()),
                    None => TransportError::ConnectionClosed,
                })
            }
            HandshakeState::Handshaking | HandshakeState::Established => {}
        }

        self.pump()?;
        Ok(self.state.get())
    }

    fn pump(&mut self) -> Result<(), TransportError> {
        let Some(tls) = self.tls.as_mut() else {
            return Err(TransportError::config("secure session used before bind"));
        };

        flush_tls(tls, &mut self.inner)?;

        let mut rejected = None;
        while tls.wants_read() && !self.peer_eof {
            match tls.read_tls(&mut SessionReader(&mut self.inner)) {
                Ok(0) => self.peer_eof = true,
                Ok(_) => {
                    if let Err(e) = tls.process_new_packets() {
                        // Best effort: the alert explains the failure to the peer.
                        let _ = flush_tls(tls, &mut self.inner);
                        rejected = Some(e.to_string());
                        break;
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => return Err(e.into()),
            }
        }
        if let Some(reason) = rejected {
            return Err(self.fail(reason));
        }

        flush_tls(tls, &mut self.inner)?;

        if self.state.get() == HandshakeState::Handshaking {
            if !tls.is_handshaking() {
                self.state.set(HandshakeState::Established);
                let info = build_info(self.role.unwrap_or(TlsRole::Server), tls);
                tracing::debug!(
                    session_id = %self.inner.id(),
                    version = ?info.protocol_version,
                    "TLS handshake complete"
                );
                if let Some(setup) = self.setup.clone() {
                    if let Err(e) = setup.verify(&info) {
                        return Err(self.fail(e.to_string()));
                    }
                }
            } else if self.peer_eof {
                return Err(self.fail("peer closed the connection during handshake".to_string()));
            }
        }
        Ok(())
    }

    fn fail(&mut self, reason: String) -> TransportError {
        tracing::warn!(session_id = %self.inner.id(), error = %reason, "TLS handshake failed");
        metrics::record_handshake_failure();
        self.state.set(HandshakeState::Closed);
        self.failure = Some(reason.clone());
        TransportError::HandshakeFailure(reason)
    }
}

fn build_info(role: TlsRole, tls: &rustls::Connection) -> TlsInfo {
    let sni_hostname = match tls {
        rustls::Connection::Server(c) => c.server_name().map(|s| s.to_string()),
        rustls::Connection::Client(_) => None,
    };
    TlsInfo {
        role,
        protocol_version: tls.protocol_version(),
        cipher_suite: tls.negotiated_cipher_suite(),
        alpn_protocol: tls.alpn_protocol().map(|p| p.to_vec()),
        sni_hostname,
    }
}

/// Drain pending ciphertext into the wrapped session until it would block.
fn flush_tls<S: IoSession>(tls: &mut rustls::Connection, inner: &mut S) -> io::Result<()> {
    while tls.wants_write() {
        match tls.write_tls(&mut SessionWriter(inner)) {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

fn into_io(e: TransportError) -> io::Error {
    match e {
        TransportError::Io(e) => e,
        TransportError::ConnectionClosed => {
            io::Error::new(io::ErrorKind::NotConnected, "session closed")
        }
        other => io::Error::new(io::ErrorKind::ConnectionAborted, other),
    }
}

impl<S: IoSession> IoSession for SecureSession<S> {
    fn id(&self) -> SessionId {
        self.inner.id()
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.drive().map_err(into_io)? != HandshakeState::Established {
            return Err(io::ErrorKind::WouldBlock.into());
        }
        let Some(tls) = self.tls.as_mut() else {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "secure session not bound"));
        };
        match tls.reader().read(buf) {
            Err(e) if e.kind() == io::ErrorKind::WouldBlock && self.peer_eof => Ok(0),
            other => other,
        }
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.drive().map_err(into_io)? != HandshakeState::Established {
            return Err(io::ErrorKind::WouldBlock.into());
        }
        let Some(tls) = self.tls.as_mut() else {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "secure session not bound"));
        };
        // Refuse new plaintext while earlier records are still queued.
        if tls.wants_write() {
            return Err(io::ErrorKind::WouldBlock.into());
        }
        let n = tls.writer().write(buf)?;
        flush_tls(tls, &mut self.inner)?;
        Ok(n)
    }

    fn close(&mut self) {
        if let Some(tls) = self.tls.as_mut() {
            if self.state.get() == HandshakeState::Established {
                tls.send_close_notify();
                let _ = flush_tls(tls, &mut self.inner);
            }
        }
        self.inner.close();
        self.state.set(HandshakeState::Closed);
    }

    fn is_closed(&self) -> bool {
        self.state.get() == HandshakeState::Closed || self.inner.is_closed()
    }

    fn attributes(&self) -> &SessionAttributes {
        self.inner.attributes()
    }

    fn attributes_mut(&mut self) -> &mut SessionAttributes {
        self.inner.attributes_mut()
    }

    fn peer_addr(&self) -> Option<SocketAddr> {
        self.inner.peer_addr()
    }

    fn wants_write(&self) -> bool {
        self.tls.as_ref().is_some_and(|tls| tls.wants_write()) || self.inner.wants_write()
    }
}

impl<S: IoSession> std::fmt::Debug for SecureSession<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecureSession")
            .field("id", &self.inner.id())
            .field("role", &self.role)
            .field("state", &self.state.get())
            .finish()
    }
}

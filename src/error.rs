//! Error taxonomy for the transport core.

use std::io;

/// Errors produced by sessions, connections, producers and interceptors.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// A required collaborator is missing or the TLS context cannot be resolved.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A required call argument was absent.
    #[error("invalid argument: {0} may not be absent")]
    InvalidArgument(&'static str),

    /// TLS negotiation or peer verification failed.
    #[error("tls handshake failed: {0}")]
    HandshakeFailure(String),

    /// An entity producer failed while generating body bytes.
    #[error("body production failed: {0}")]
    ProductionFailure(String),

    /// Malformed message head, limit violation or lifecycle misuse.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The connection or session has been closed.
    #[error("connection closed")]
    ConnectionClosed,

    /// I/O error from the underlying session.
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

impl TransportError {
    /// Whether this error ends the connection once bytes of a response are on
    /// the wire. Errors raised while a response is being submitted, before its
    /// head is buffered, leave the connection open regardless of variant.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            TransportError::HandshakeFailure(_)
                | TransportError::ConnectionClosed
                | TransportError::Io(_)
                | TransportError::Protocol(_)
        )
    }

    pub(crate) fn protocol(msg: impl Into<String>) -> Self {
        TransportError::Protocol(msg.into())
    }

    pub(crate) fn config(msg: impl Into<String>) -> Self {
        TransportError::Configuration(msg.into())
    }
}

impl From<rustls::Error> for TransportError {
    fn from(e: rustls::Error) -> Self {
        TransportError::HandshakeFailure(e.to_string())
    }
}

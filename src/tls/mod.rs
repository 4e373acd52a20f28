//! TLS decoration of non-blocking sessions.
//!
//! # Data Flow
//! ```text
//! raw IoSession
//!     → SecureSession::new(raw, TlsContext, setup)
//!     → bind(role)          (rustls connection created, TlsDecoration stored on raw session)
//!     → read/write/drive    (handshake pumped: NotStarted → Handshaking → Established)
//!     → plaintext to upper layers only once Established
//! ```
//!
//! # Design Decisions
//! - Record layer and handshake are rustls; this module only moves bytes
//! - Default client context is built once per process, on first use
//! - Handshake failures are per session and never retried

pub mod context;
pub mod session;
pub mod setup;

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

pub use context::{default_client_config, load_server_config, TlsContext};
pub use session::SecureSession;
pub use setup::TlsSetupHandler;

/// Which side of the TLS handshake this endpoint plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TlsRole {
    Client,
    Server,
}

impl std::fmt::Display for TlsRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TlsRole::Client => f.write_str("client"),
            TlsRole::Server => f.write_str("server"),
        }
    }
}

/// Handshake progress of a secure session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum HandshakeState {
    NotStarted = 0,
    Handshaking = 1,
    Established = 2,
    Closed = 3,
}

impl HandshakeState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => HandshakeState::NotStarted,
            1 => HandshakeState::Handshaking,
            2 => HandshakeState::Established,
            _ => HandshakeState::Closed,
        }
    }
}

/// Shared view of a session's handshake state.
///
/// Written only by the owning [`SecureSession`]; any clone observes updates.
#[derive(Debug, Clone)]
pub struct HandshakeWatch {
    cell: Arc<AtomicU8>,
}

impl HandshakeWatch {
    pub(crate) fn new() -> Self {
        Self {
            cell: Arc::new(AtomicU8::new(HandshakeState::NotStarted as u8)),
        }
    }

    pub fn get(&self) -> HandshakeState {
        HandshakeState::from_u8(self.cell.load(Ordering::Acquire))
    }

    pub(crate) fn set(&self, state: HandshakeState) {
        self.cell.store(state as u8, Ordering::Release);
    }
}

/// Attribute stored on a raw session once a [`SecureSession`] is bound over it.
#[derive(Debug, Clone)]
pub struct TlsDecoration {
    pub role: TlsRole,
    pub handshake: HandshakeWatch,
}

/// Information about a negotiated TLS session.
#[derive(Debug, Clone)]
pub struct TlsInfo {
    pub role: TlsRole,
    pub protocol_version: Option<rustls::ProtocolVersion>,
    pub cipher_suite: Option<rustls::SupportedCipherSuite>,
    pub alpn_protocol: Option<Vec<u8>>,
    pub sni_hostname: Option<String>,
}

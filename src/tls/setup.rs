//! Per-session TLS customization hook.

use super::{TlsInfo, TlsRole};
use crate::error::TransportError;

/// Callback invoked around one session's handshake.
///
/// One handler is usually shared by every session a factory creates, so
/// implementations must not keep per-session state.
pub trait TlsSetupHandler: Send + Sync {
    /// Called once when the session is bound, before any handshake bytes move.
    fn initialize(&self, role: TlsRole, conn: &mut rustls::Connection) -> Result<(), TransportError> {
        let _ = (role, conn);
        Ok(())
    }

    /// Called once when the handshake completes. An error aborts the session.
    fn verify(&self, info: &TlsInfo) -> Result<(), TransportError> {
        let _ = info;
        Ok(())
    }
}

//! TLS key material and trust configuration.

use std::fs::File;
use std::io::BufReader;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use once_cell::sync::OnceCell;
use rustls::pki_types::ServerName;
use rustls::{ClientConfig, ClientConnection, RootCertStore, ServerConfig, ServerConnection};

use super::TlsRole;
use crate::error::TransportError;

static DEFAULT_CLIENT_CONFIG: OnceCell<Arc<ClientConfig>> = OnceCell::new();

fn crypto_provider() -> Arc<rustls::crypto::CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}

/// Process-wide client configuration trusting the webpki root set.
///
/// Built on first call and shared afterwards. Used whenever a client-role
/// session is bound without explicit client configuration.
pub fn default_client_config() -> Result<Arc<ClientConfig>, TransportError> {
    DEFAULT_CLIENT_CONFIG
        .get_or_try_init(|| -> Result<Arc<ClientConfig>, TransportError> {
            let mut roots = RootCertStore::empty();
            roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

            let config = ClientConfig::builder_with_provider(crypto_provider())
                .with_safe_default_protocol_versions()
                .map_err(|e| {
                    TransportError::config(format!("failure initializing default TLS context: {e}"))
                })?
                .with_root_certificates(roots)
                .with_no_client_auth();

            tracing::debug!("Default TLS client context initialized");
            Ok(Arc::new(config))
        })
        .cloned()
}

/// Load a server configuration from PEM certificate chain and private key files.
pub fn load_server_config(
    cert_path: &Path,
    key_path: &Path,
) -> Result<Arc<ServerConfig>, TransportError> {
    if !cert_path.exists() {
        return Err(TransportError::config(format!(
            "certificate file not found: {}",
            cert_path.display()
        )));
    }
    if !key_path.exists() {
        return Err(TransportError::config(format!(
            "private key file not found: {}",
            key_path.display()
        )));
    }

    let certs = rustls_pemfile::certs(&mut BufReader::new(File::open(cert_path)?))
        .collect::<Result<Vec<_>, _>>()?;
    if certs.is_empty() {
        return Err(TransportError::config(format!(
            "no certificates in {}",
            cert_path.display()
        )));
    }

    let key = rustls_pemfile::private_key(&mut BufReader::new(File::open(key_path)?))?
        .ok_or_else(|| {
            TransportError::config(format!("no private key in {}", key_path.display()))
        })?;

    let config = ServerConfig::builder_with_provider(crypto_provider())
        .with_safe_default_protocol_versions()
        .map_err(|e| TransportError::config(e.to_string()))?
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| TransportError::config(format!("invalid certificate or key: {e}")))?;

    Ok(Arc::new(config))
}

/// Trust and key material for binding secure sessions.
///
/// Cheap to clone; the rustls configurations are shared.
#[derive(Debug, Clone, Default)]
pub struct TlsContext {
    server: Option<Arc<ServerConfig>>,
    client: Option<Arc<ClientConfig>>,
    server_name: Option<ServerName<'static>>,
}

impl TlsContext {
    /// Context for accepting handshakes as a server.
    pub fn server(config: Arc<ServerConfig>) -> Self {
        Self {
            server: Some(config),
            ..Self::default()
        }
    }

    /// Context for initiating handshakes as a client.
    pub fn client(config: Arc<ClientConfig>) -> Self {
        Self {
            client: Some(config),
            ..Self::default()
        }
    }

    /// Context backed by [`default_client_config`].
    pub fn default_client() -> Result<Self, TransportError> {
        Ok(Self::client(default_client_config()?))
    }

    pub fn with_server_config(mut self, config: Arc<ServerConfig>) -> Self {
        self.server = Some(config);
        self
    }

    pub fn with_client_config(mut self, config: Arc<ClientConfig>) -> Self {
        self.client = Some(config);
        self
    }

    /// Name presented (SNI) and verified when acting as a client.
    pub fn with_server_name(mut self, name: &str) -> Result<Self, TransportError> {
        let name = ServerName::try_from(name.to_string())
            .map_err(|e| TransportError::config(format!("invalid server name {name:?}: {e}")))?;
        self.server_name = Some(name);
        Ok(self)
    }

    pub fn has_server_config(&self) -> bool {
        self.server.is_some()
    }

    pub fn has_client_config(&self) -> bool {
        self.client.is_some()
    }

    /// Create the rustls connection for one session.
    pub(crate) fn new_connection(
        &self,
        role: TlsRole,
        peer_addr: Option<SocketAddr>,
    ) -> Result<rustls::Connection, TransportError> {
        match role {
            TlsRole::Server => {
                let config = self.server.as_ref().ok_or_else(|| {
                    TransportError::config("server role requires a server certificate configuration")
                })?;
                let conn = ServerConnection::new(Arc::clone(config))
                    .map_err(|e| TransportError::config(e.to_string()))?;
                Ok(conn.into())
            }
            TlsRole::Client => {
                let config = match &self.client {
                    Some(config) => Arc::clone(config),
                    None => default_client_config()?,
                };
                let name = match (&self.server_name, peer_addr) {
                    (Some(name), _) => name.clone(),
                    (None, Some(addr)) => ServerName::from(addr.ip()),
                    (None, None) => {
                        return Err(TransportError::config(
                            "client role requires a server name or a peer address",
                        ))
                    }
                };
                let conn = ClientConnection::new(config, name)
                    .map_err(|e| TransportError::config(e.to_string()))?;
                Ok(conn.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_client_config_is_memoized() {
        let a = default_client_config().unwrap();
        let b = default_client_config().unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn server_role_without_certificate_is_a_configuration_error() {
        let ctx = TlsContext::default();
        let err = ctx.new_connection(TlsRole::Server, None).unwrap_err();
        assert!(matches!(err, TransportError::Configuration(_)));
    }

    #[test]
    fn client_role_needs_a_name() {
        let ctx = TlsContext::default();
        let err = ctx.new_connection(TlsRole::Client, None).unwrap_err();
        assert!(matches!(err, TransportError::Configuration(_)));

        let addr: SocketAddr = "127.0.0.1:443".parse().unwrap();
        let conn = ctx.new_connection(TlsRole::Client, Some(addr)).unwrap();
        assert!(conn.is_handshaking());
    }

    #[test]
    fn invalid_server_name_rejected() {
        let err = TlsContext::default().with_server_name("not a host").unwrap_err();
        assert!(matches!(err, TransportError::Configuration(_)));
    }

    #[test]
    fn missing_pem_files_rejected() {
        let err = load_server_config(Path::new("/nonexistent/cert.pem"), Path::new("/nonexistent/key.pem"))
            .unwrap_err();
        assert!(err.to_string().contains("certificate file not found"));
    }
}

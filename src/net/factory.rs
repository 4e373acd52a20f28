//! Builds connections for accepted sessions.
//!
//! # Responsibilities
//! - Validate collaborators once, at startup
//! - Optionally decorate each session with TLS before binding the connection
//! - Refuse sessions that already carry a TLS decoration
//!
//! # Design Decisions
//! - Missing collaborators fail `build()`, never a per-connection call
//! - A server role without certificates fails `build()`; a client role
//!   falls back to the default client context when a session is created

use std::sync::Arc;

use super::buffer::{BufferAllocator, HeapAllocator};
use super::connection::{BoundSession, Connection, ConnectionSettings};
use crate::error::TransportError;
use crate::http::{DefaultRequestFactory, MessageLimits, RequestFactory};
use crate::protocol::HttpProcessor;
use crate::session::IoSession;
use crate::tls::{SecureSession, TlsContext, TlsDecoration, TlsRole, TlsSetupHandler};

/// TLS overlay applied to every session a factory receives.
#[derive(Clone)]
pub struct TlsSettings {
    /// Explicit context; `None` resolves to the default client context.
    pub context: Option<TlsContext>,
    pub role: TlsRole,
    pub setup: Option<Arc<dyn TlsSetupHandler>>,
}

impl TlsSettings {
    /// Accepting side: server role with the given certificates.
    pub fn server(context: TlsContext) -> Self {
        Self {
            context: Some(context),
            role: TlsRole::Server,
            setup: None,
        }
    }

    /// Initiating side: client role, default trust roots unless a context is set.
    pub fn client(context: Option<TlsContext>) -> Self {
        Self {
            context,
            role: TlsRole::Client,
            setup: None,
        }
    }

    pub fn with_setup(mut self, setup: Arc<dyn TlsSetupHandler>) -> Self {
        self.setup = Some(setup);
        self
    }
}

impl std::fmt::Debug for TlsSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsSettings")
            .field("context", &self.context)
            .field("role", &self.role)
            .field("has_setup", &self.setup.is_some())
            .finish()
    }
}

/// Creates one [`Connection`] per accepted session.
#[derive(Clone)]
pub struct ConnectionFactory {
    request_factory: Arc<dyn RequestFactory>,
    allocator: Arc<dyn BufferAllocator>,
    processor: HttpProcessor,
    settings: ConnectionSettings,
    tls: Option<TlsSettings>,
}

impl ConnectionFactory {
    pub fn builder() -> ConnectionFactoryBuilder {
        ConnectionFactoryBuilder::default()
    }

    pub fn is_tls(&self) -> bool {
        self.tls.is_some()
    }

    pub fn settings(&self) -> &ConnectionSettings {
        &self.settings
    }

    /// Bind a connection to `session`, decorating it with TLS when configured.
    pub fn create_connection<S: IoSession>(&self, session: S) -> Result<Connection<S>, TransportError> {
        let bound = match &self.tls {
            None => BoundSession::Plain(session),
            Some(tls) => {
                if session.attributes().contains::<TlsDecoration>() {
                    tracing::warn!(session_id = %session.id(), "Refusing to wrap a TLS-decorated session");
                    return Err(TransportError::config(format!(
                        "{} is already TLS-decorated",
                        session.id()
                    )));
                }
                let context = tls.context.clone().unwrap_or_default();
                let mut secure = SecureSession::new(session, context, tls.setup.clone());
                secure.bind(tls.role)?;
                BoundSession::Secure(secure)
            }
        };

        Ok(Connection::new(
            bound,
            Arc::clone(&self.request_factory),
            Arc::clone(&self.allocator),
            self.processor.clone(),
            self.settings,
        ))
    }
}

impl std::fmt::Debug for ConnectionFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionFactory")
            .field("processor", &self.processor)
            .field("settings", &self.settings)
            .field("tls", &self.tls)
            .finish()
    }
}

/// Builder for [`ConnectionFactory`].
#[derive(Default)]
pub struct ConnectionFactoryBuilder {
    request_factory: Option<Arc<dyn RequestFactory>>,
    allocator: Option<Arc<dyn BufferAllocator>>,
    processor: Option<HttpProcessor>,
    settings: ConnectionSettings,
    tls: Option<TlsSettings>,
}

impl ConnectionFactoryBuilder {
    pub fn request_factory(mut self, factory: Arc<dyn RequestFactory>) -> Self {
        self.request_factory = Some(factory);
        self
    }

    pub fn allocator(mut self, allocator: Arc<dyn BufferAllocator>) -> Self {
        self.allocator = Some(allocator);
        self
    }

    /// Interceptors run on every exchange. Defaults to an empty chain.
    pub fn processor(mut self, processor: HttpProcessor) -> Self {
        self.processor = Some(processor);
        self
    }

    pub fn limits(mut self, limits: MessageLimits) -> Self {
        self.settings.limits = limits;
        self
    }

    pub fn read_chunk_size(mut self, size: usize) -> Self {
        self.settings.read_chunk_size = size;
        self
    }

    pub fn output_buffer_size(mut self, size: usize) -> Self {
        self.settings.output_buffer_size = size;
        self
    }

    pub fn tls(mut self, tls: TlsSettings) -> Self {
        self.tls = Some(tls);
        self
    }

    /// Fill unset collaborators with [`DefaultRequestFactory`] and [`HeapAllocator`].
    pub fn with_defaults(mut self) -> Self {
        if self.request_factory.is_none() {
            self.request_factory = Some(Arc::new(DefaultRequestFactory));
        }
        if self.allocator.is_none() {
            self.allocator = Some(Arc::new(HeapAllocator));
        }
        self
    }

    pub fn build(self) -> Result<ConnectionFactory, TransportError> {
        let request_factory = self
            .request_factory
            .ok_or_else(|| TransportError::config("a request factory is required"))?;
        let allocator = self
            .allocator
            .ok_or_else(|| TransportError::config("a buffer allocator is required"))?;

        if self.settings.read_chunk_size == 0 {
            return Err(TransportError::config("read chunk size must be greater than 0"));
        }
        if self.settings.output_buffer_size < 64 {
            return Err(TransportError::config("output buffer size must be at least 64 bytes"));
        }

        if let Some(tls) = &self.tls {
            let has_server = tls.context.as_ref().is_some_and(TlsContext::has_server_config);
            if tls.role == TlsRole::Server && !has_server {
                return Err(TransportError::config(
                    "server role requires a server certificate configuration",
                ));
            }
        }

        tracing::debug!(
            tls = ?self.tls.as_ref().map(|t| t.role),
            output_buffer_size = self.settings.output_buffer_size,
            "Connection factory built"
        );

        Ok(ConnectionFactory {
            request_factory,
            allocator,
            processor: self.processor.unwrap_or_default(),
            settings: self.settings,
            tls: self.tls,
        })
    }
}

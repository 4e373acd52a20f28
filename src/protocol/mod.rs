//! Interceptor pipeline applied to messages before they reach the wire.
//!
//! # Data Flow
//! ```text
//! Request/Response + Option<EntityDetails>
//!     → HttpProcessor (ordered chain, stops at first error)
//!         → DateHeader → ServerHeader → ContentFraming → RequestIdHeader
//!     → head encoder
//! ```
//!
//! # Design Decisions
//! - Interceptors are immutable and `Send + Sync`; one instance serves every connection
//! - Per-exchange state lives in [`HttpContext`], never in the interceptor
//! - Each interceptor sees the mutations of the ones before it

pub mod content;
pub mod date;
pub mod processor;
pub mod request_id;
pub mod server;

pub use content::ContentFraming;
pub use date::DateHeader;
pub use processor::{HttpProcessor, HttpProcessorBuilder};
pub use request_id::{RequestId, RequestIdHeader, X_REQUEST_ID};
pub use server::ServerHeader;

use crate::error::TransportError;
use crate::http::{EntityDetails, HttpMessage};
use crate::net::ConnectionId;

/// Per-exchange state shared by the interceptors of one message pair.
#[derive(Debug, Default)]
pub struct HttpContext {
    connection_id: Option<ConnectionId>,
    attributes: http::Extensions,
}

impl HttpContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn for_connection(id: ConnectionId) -> Self {
        Self {
            connection_id: Some(id),
            attributes: http::Extensions::new(),
        }
    }

    pub fn connection_id(&self) -> Option<ConnectionId> {
        self.connection_id
    }

    pub fn insert<T: Clone + Send + Sync + 'static>(&mut self, value: T) -> Option<T> {
        self.attributes.insert(value)
    }

    pub fn get<T: Send + Sync + 'static>(&self) -> Option<&T> {
        self.attributes.get::<T>()
    }
}

/// One step of the pipeline.
///
/// `message` is an `Option` so callers handing over nothing get
/// [`TransportError::InvalidArgument`] rather than a silent pass.
pub trait HttpInterceptor: Send + Sync {
    fn process(
        &self,
        message: Option<&mut dyn HttpMessage>,
        entity: Option<&dyn EntityDetails>,
        context: &mut HttpContext,
    ) -> Result<(), TransportError>;
}

/// Unwrap the message argument shared by every interceptor.
pub(crate) fn require_message<'a>(
    message: Option<&'a mut dyn HttpMessage>,
) -> Result<&'a mut dyn HttpMessage, TransportError> {
    message.ok_or(TransportError::InvalidArgument("HTTP message"))
}

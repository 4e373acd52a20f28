//! Ordered interceptor chains for requests and responses.

use std::fmt;
use std::sync::Arc;

use super::{ContentFraming, DateHeader, HttpContext, HttpInterceptor, RequestIdHeader, ServerHeader};
use crate::error::TransportError;
use crate::http::{EntityDetails, HttpMessage};

/// Immutable pair of interceptor chains, shared across connections.
#[derive(Clone)]
pub struct HttpProcessor {
    request: Arc<[Arc<dyn HttpInterceptor>]>,
    response: Arc<[Arc<dyn HttpInterceptor>]>,
}

impl HttpProcessor {
    pub fn builder() -> HttpProcessorBuilder {
        HttpProcessorBuilder::default()
    }

    /// Response chain used by servers: Date, Server, content framing, request id.
    /// The request chain only records or assigns the request id.
    pub fn server_default(product: &str) -> Result<Self, TransportError> {
        Ok(Self::builder()
            .add_request(RequestIdHeader)
            .add_response(DateHeader)
            .add_response(ServerHeader::new(product)?)
            .add_response(ContentFraming::new())
            .add_response(RequestIdHeader)
            .build())
    }

    pub fn process_request(
        &self,
        request: &mut dyn HttpMessage,
        entity: Option<&dyn EntityDetails>,
        context: &mut HttpContext,
    ) -> Result<(), TransportError> {
        run_chain(&self.request, request, entity, context)
    }

    pub fn process_response(
        &self,
        response: &mut dyn HttpMessage,
        entity: Option<&dyn EntityDetails>,
        context: &mut HttpContext,
    ) -> Result<(), TransportError> {
        run_chain(&self.response, response, entity, context)
    }

    pub fn request_len(&self) -> usize {
        self.request.len()
    }

    pub fn response_len(&self) -> usize {
        self.response.len()
    }
}

impl Default for HttpProcessor {
    fn default() -> Self {
        HttpProcessorBuilder::default().build()
    }
}

fn run_chain(
    chain: &[Arc<dyn HttpInterceptor>],
    message: &mut dyn HttpMessage,
    entity: Option<&dyn EntityDetails>,
    context: &mut HttpContext,
) -> Result<(), TransportError> {
    for interceptor in chain {
        interceptor.process(Some(&mut *message), entity, context)?;
    }
    Ok(())
}

impl fmt::Debug for HttpProcessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpProcessor")
            .field("request_interceptors", &self.request.len())
            .field("response_interceptors", &self.response.len())
            .finish()
    }
}

/// Collects interceptors in the order they will run.
#[derive(Default)]
pub struct HttpProcessorBuilder {
    request: Vec<Arc<dyn HttpInterceptor>>,
    response: Vec<Arc<dyn HttpInterceptor>>,
}

impl HttpProcessorBuilder {
    pub fn add_request(mut self, interceptor: impl HttpInterceptor + 'static) -> Self {
        self.request.push(Arc::new(interceptor));
        self
    }

    pub fn add_response(mut self, interceptor: impl HttpInterceptor + 'static) -> Self {
        self.response.push(Arc::new(interceptor));
        self
    }

    pub fn build(self) -> HttpProcessor {
        HttpProcessor {
            request: self.request.into(),
            response: self.response.into(),
        }
    }
}

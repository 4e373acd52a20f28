//! Inbound request heads and the factory that builds them.
//!
//! # Responsibilities
//! - Hold method, target, version and headers of one request
//! - Validate the method and target when the head is parsed
//!
//! # Design Decisions
//! - The factory is shared by every connection and keeps no state
//! - Unknown methods are rejected at the factory, not deeper in the stack

use http::{HeaderMap, Method, Uri, Version};

use super::message::HttpMessage;
use crate::error::TransportError;

#[derive(Debug, Clone)]
pub struct Request {
    method: Method,
    uri: Uri,
    version: Version,
    headers: HeaderMap,
}

impl Request {
    pub fn new(method: Method, uri: Uri) -> Self {
        Self {
            method,
            uri,
            version: Version::HTTP_11,
            headers: HeaderMap::new(),
        }
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    pub fn set_version(&mut self, version: Version) {
        self.version = version;
    }
}

impl HttpMessage for Request {
    fn version(&self) -> Version {
        self.version
    }

    fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }
}

/// Builds request objects from request-line data.
pub trait RequestFactory: Send + Sync {
    fn new_request(&self, method: &str, uri: &str) -> Result<Request, TransportError>;
}

/// Accepts any syntactically valid method and request target.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultRequestFactory;

impl RequestFactory for DefaultRequestFactory {
    fn new_request(&self, method: &str, uri: &str) -> Result<Request, TransportError> {
        let method = Method::from_bytes(method.as_bytes())
            .map_err(|_| TransportError::protocol(format!("{method} method not supported")))?;
        let uri = uri
            .parse::<Uri>()
            .map_err(|e| TransportError::protocol(format!("invalid request target {uri:?}: {e}")))?;
        Ok(Request::new(method, uri))
    }
}

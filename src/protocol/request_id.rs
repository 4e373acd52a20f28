//! `x-request-id` correlation.
//!
//! On the request chain the inbound id is kept (or one is generated) and
//! recorded in the [`HttpContext`]; on the response chain that same id is
//! echoed back, so both halves of an exchange log the same value.

use http::header::{HeaderName, HeaderValue};
use uuid::Uuid;

use super::{require_message, HttpContext, HttpInterceptor};
use crate::error::TransportError;
use crate::http::{EntityDetails, HttpMessage};

pub const X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

/// Correlation id of the current exchange, stored in the context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestId(pub HeaderValue);

impl RequestId {
    pub fn generate() -> Self {
        let mut buf = Uuid::encode_buffer();
        let id = Uuid::new_v4().hyphenated().encode_lower(&mut buf);
        Self(HeaderValue::from_str(id).unwrap_or_else(|_| HeaderValue::from_static("unknown")))
    }

    pub fn as_str(&self) -> &str {
        self.0.to_str().unwrap_or("unknown")
    }
}

/// Ensures every message carries `x-request-id`.
#[derive(Debug, Default, Clone, Copy)]
pub struct RequestIdHeader;

impl HttpInterceptor for RequestIdHeader {
    fn process(
        &self,
        message: Option<&mut dyn HttpMessage>,
        _entity: Option<&dyn EntityDetails>,
        context: &mut HttpContext,
    ) -> Result<(), TransportError> {
        let message = require_message(message)?;

        if let Some(existing) = message.headers().get(&X_REQUEST_ID) {
            if context.get::<RequestId>().is_none() {
                context.insert(RequestId(existing.clone()));
            }
            return Ok(());
        }

        let id = match context.get::<RequestId>() {
            Some(id) => id.clone(),
            None => {
                let id = RequestId::generate();
                context.insert(id.clone());
                id
            }
        };
        tracing::trace!(request_id = %id.as_str(), "Assigned request id");
        message.headers_mut().insert(X_REQUEST_ID, id.0);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use http::StatusCode;

    use super::*;
    use crate::http::request::{DefaultRequestFactory, RequestFactory};
    use crate::http::Response;

    #[test]
    fn generates_uuid_when_absent() {
        let mut response = Response::new(StatusCode::OK);
        RequestIdHeader
            .process(Some(&mut response), None, &mut HttpContext::new())
            .unwrap();

        let id = response.header_str("x-request-id").unwrap();
        assert!(Uuid::parse_str(id).is_ok());
    }

    #[test]
    fn response_echoes_request_id() {
        let mut context = HttpContext::new();
        let mut request = DefaultRequestFactory.new_request("GET", "/").unwrap();
        request
            .headers_mut()
            .insert(X_REQUEST_ID, HeaderValue::from_static("abc-123"));

        RequestIdHeader.process(Some(&mut request), None, &mut context).unwrap();
        let mut response = Response::new(StatusCode::OK);
        RequestIdHeader.process(Some(&mut response), None, &mut context).unwrap();

        assert_eq!(response.header_str("x-request-id"), Some("abc-123"));
    }
}

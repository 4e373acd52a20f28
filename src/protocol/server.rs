//! `Server` header injection.

use http::header::{HeaderValue, SERVER};

use super::{require_message, HttpContext, HttpInterceptor};
use crate::error::TransportError;
use crate::http::{EntityDetails, HttpMessage};

/// Adds `Server: <product>` when the message has none.
#[derive(Debug, Clone)]
pub struct ServerHeader {
    product: HeaderValue,
}

impl ServerHeader {
    pub fn new(product: &str) -> Result<Self, TransportError> {
        let product = HeaderValue::from_str(product)
            .map_err(|_| TransportError::config(format!("invalid server product token {product:?}")))?;
        Ok(Self { product })
    }
}

impl HttpInterceptor for ServerHeader {
    fn process(
        &self,
        message: Option<&mut dyn HttpMessage>,
        _entity: Option<&dyn EntityDetails>,
        _context: &mut HttpContext,
    ) -> Result<(), TransportError> {
        let message = require_message(message)?;
        if !message.contains_header(SERVER.as_str()) {
            message.headers_mut().insert(SERVER, self.product.clone());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use http::StatusCode;

    use super::*;
    use crate::http::Response;

    #[test]
    fn adds_server_unless_present() {
        let interceptor = ServerHeader::new("nio-http/0.1").unwrap();

        let mut plain = Response::new(StatusCode::OK);
        interceptor.process(Some(&mut plain), None, &mut HttpContext::new()).unwrap();
        assert_eq!(plain.header_str("server"), Some("nio-http/0.1"));

        let mut custom = Response::new(StatusCode::OK).with_header(SERVER, HeaderValue::from_static("custom"));
        interceptor.process(Some(&mut custom), None, &mut HttpContext::new()).unwrap();
        assert_eq!(custom.header_str("server"), Some("custom"));
    }

    #[test]
    fn rejects_control_characters() {
        assert!(matches!(
            ServerHeader::new("bad\nproduct"),
            Err(TransportError::Configuration(_))
        ));
    }
}

//! Content framing headers derived from entity details.

use http::header::{
    HeaderValue, CONTENT_ENCODING, CONTENT_LENGTH, CONTENT_TYPE, TRANSFER_ENCODING,
};

use super::{require_message, HttpContext, HttpInterceptor};
use crate::error::TransportError;
use crate::http::{EntityDetails, HttpMessage};

/// Sets `Content-Length` or `Transfer-Encoding: chunked`, plus
/// `Content-Type`/`Content-Encoding` when the entity declares them.
///
/// Framing headers set by the caller are an error unless the interceptor
/// was built with [`ContentFraming::overwrite`].
#[derive(Debug, Default, Clone, Copy)]
pub struct ContentFraming {
    overwrite: bool,
}

impl ContentFraming {
    pub fn new() -> Self {
        Self { overwrite: false }
    }

    /// Replace caller-supplied framing headers instead of rejecting them.
    pub fn overwrite() -> Self {
        Self { overwrite: true }
    }
}

impl HttpInterceptor for ContentFraming {
    fn process(
        &self,
        message: Option<&mut dyn HttpMessage>,
        entity: Option<&dyn EntityDetails>,
        _context: &mut HttpContext,
    ) -> Result<(), TransportError> {
        let message = require_message(message)?;
        let Some(entity) = entity else {
            return Ok(());
        };

        let headers = message.headers_mut();
        if self.overwrite {
            headers.remove(CONTENT_LENGTH);
            headers.remove(TRANSFER_ENCODING);
        } else if headers.contains_key(CONTENT_LENGTH) {
            return Err(TransportError::protocol("Content-Length header already present"));
        } else if headers.contains_key(TRANSFER_ENCODING) {
            return Err(TransportError::protocol("Transfer-Encoding header already present"));
        }

        match entity.content_length() {
            Some(len) if !entity.is_chunked() => {
                headers.insert(CONTENT_LENGTH, HeaderValue::from(len));
            }
            _ => {
                headers.insert(TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
            }
        }

        if let Some(content_type) = entity.content_type() {
            if !headers.contains_key(CONTENT_TYPE) {
                let value = HeaderValue::from_str(&content_type.to_string())
                    .map_err(|_| TransportError::protocol(format!("invalid content type {content_type}")))?;
                headers.insert(CONTENT_TYPE, value);
            }
        }
        if let Some(encoding) = entity.content_encoding() {
            if !headers.contains_key(CONTENT_ENCODING) {
                let value = HeaderValue::from_str(encoding)
                    .map_err(|_| TransportError::protocol(format!("invalid content encoding {encoding:?}")))?;
                headers.insert(CONTENT_ENCODING, value);
            }
        }
        Ok(())
    }
}

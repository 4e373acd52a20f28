//! `Date` header injection.

use chrono::{DateTime, Utc};
use http::header::{HeaderValue, DATE};

use super::{require_message, HttpContext, HttpInterceptor};
use crate::error::TransportError;
use crate::http::{EntityDetails, HttpMessage};

/// RFC 7231 IMF-fixdate, e.g. `Sun, 06 Nov 1994 08:49:37 GMT`.
pub fn format_http_date(at: DateTime<Utc>) -> String {
    at.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

/// Adds `Date` to messages that carry an entity and have none set.
///
/// Stateless; a single instance can be shared by any number of threads.
#[derive(Debug, Default, Clone, Copy)]
pub struct DateHeader;

impl HttpInterceptor for DateHeader {
    fn process(
        &self,
        message: Option<&mut dyn HttpMessage>,
        entity: Option<&dyn EntityDetails>,
        _context: &mut HttpContext,
    ) -> Result<(), TransportError> {
        let message = require_message(message)?;
        if entity.is_none() || message.contains_header(DATE.as_str()) {
            return Ok(());
        }

        let value = HeaderValue::from_str(&format_http_date(Utc::now()))
            .map_err(|e| TransportError::protocol(format!("unencodable date: {e}")))?;
        message.headers_mut().insert(DATE, value);
        Ok(())
    }
}

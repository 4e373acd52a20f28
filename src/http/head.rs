//! HTTP/1.1 message head reading and writing.
//!
//! Only the start line and header block are handled here; body framing is
//! the connection's job and everything else belongs to a full codec.

use bytes::{BufMut, BytesMut};
use http::header::{HeaderName, HeaderValue};
use http::Version;

use super::message::HttpMessage;
use super::request::{Request, RequestFactory};
use super::response::Response;
use crate::error::TransportError;

const CRLF: &[u8] = b"\r\n";

/// Bounds applied while parsing inbound heads.
#[derive(Debug, Clone, Copy)]
pub struct MessageLimits {
    /// Maximum number of header fields per message.
    pub max_header_count: usize,
    /// Maximum length of any single head line, in bytes.
    pub max_line_length: usize,
}

impl MessageLimits {
    /// Largest head these limits can admit, request line included.
    pub fn max_head_size(&self) -> usize {
        (self.max_header_count + 1)
            .saturating_mul(self.max_line_length + CRLF.len())
            .saturating_add(CRLF.len())
    }
}

impl Default for MessageLimits {
    fn default() -> Self {
        Self {
            max_header_count: 100,
            max_line_length: 8192,
        }
    }
}

/// Offset just past the blank line ending the head, if complete.
pub fn find_head_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n").map(|i| i + 4)
}

/// Parse a complete request head (including the terminating blank line).
pub fn parse_request_head(
    head: &[u8],
    factory: &dyn RequestFactory,
    limits: &MessageLimits,
) -> Result<Request, TransportError> {
    let mut lines = head
        .split(|&b| b == b'\n')
        .map(|line| line.strip_suffix(b"\r").unwrap_or(line));

    let request_line = lines
        .next()
        .filter(|line| !line.is_empty())
        .ok_or_else(|| TransportError::protocol("empty request line"))?;
    check_line_length(request_line, limits)?;
    let request_line = std::str::from_utf8(request_line)
        .map_err(|_| TransportError::protocol("request line is not valid text"))?;

    let mut parts = request_line.split(' ');
    let (Some(method), Some(target), Some(version), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(TransportError::protocol(format!(
            "malformed request line: {request_line:?}"
        )));
    };

    let mut request = factory.new_request(method, target)?;
    request.set_version(parse_version(version)?);

    let mut count = 0;
    for line in lines {
        if line.is_empty() {
            break;
        }
        check_line_length(line, limits)?;
        count += 1;
        if count > limits.max_header_count {
            return Err(TransportError::protocol(format!(
                "maximum header count ({}) exceeded",
                limits.max_header_count
            )));
        }

        let colon = line
            .iter()
            .position(|&b| b == b':')
            .ok_or_else(|| TransportError::protocol("header line without colon"))?;
        let name = HeaderName::from_bytes(&line[..colon])
            .map_err(|_| TransportError::protocol("invalid header name"))?;
        let value = HeaderValue::from_bytes(line[colon + 1..].trim_ascii())
            .map_err(|_| TransportError::protocol(format!("invalid value for header {name}")))?;
        request.headers_mut().append(name, value);
    }

    Ok(request)
}

fn check_line_length(line: &[u8], limits: &MessageLimits) -> Result<(), TransportError> {
    if line.len() > limits.max_line_length {
        return Err(TransportError::protocol(format!(
            "maximum line length ({}) exceeded",
            limits.max_line_length
        )));
    }
    Ok(())
}

fn parse_version(version: &str) -> Result<Version, TransportError> {
    match version {
        "HTTP/1.1" => Ok(Version::HTTP_11),
        "HTTP/1.0" => Ok(Version::HTTP_10),
        other => Err(TransportError::protocol(format!("unsupported protocol version {other:?}"))),
    }
}

fn version_str(version: Version) -> &'static str {
    if version == Version::HTTP_10 {
        "HTTP/1.0"
    } else {
        "HTTP/1.1"
    }
}

/// Serialize a response status line and header block.
pub fn encode_response_head(response: &Response, out: &mut BytesMut) {
    let status = response.status();
    out.put_slice(version_str(response.version()).as_bytes());
    out.put_u8(b' ');
    out.put_slice(status.as_str().as_bytes());
    out.put_u8(b' ');
    out.put_slice(status.canonical_reason().unwrap_or("").as_bytes());
    out.put_slice(CRLF);

    for (name, value) in response.headers() {
        out.put_slice(name.as_str().as_bytes());
        out.put_slice(b": ");
        out.put_slice(value.as_bytes());
        out.put_slice(CRLF);
    }
    out.put_slice(CRLF);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::request::DefaultRequestFactory;
    use http::{header, Method, StatusCode};

    fn parse(head: &str) -> Result<Request, TransportError> {
        parse_request_head(head.as_bytes(), &DefaultRequestFactory, &MessageLimits::default())
    }

    #[test]
    fn finds_head_end() {
        assert_eq!(find_head_end(b"GET / HTTP/1.1\r\n\r\nbody"), Some(18));
        assert_eq!(find_head_end(b"GET / HTTP/1.1\r\nHost: a\r\n"), None);
    }

    #[test]
    fn parses_request_with_headers() {
        let req = parse("POST /submit HTTP/1.0\r\nHost: example.com\r\nX-Multi: a\r\nX-Multi: b\r\n\r\n").unwrap();
        assert_eq!(req.method(), Method::POST);
        assert_eq!(req.uri().path(), "/submit");
        assert_eq!(req.version(), Version::HTTP_10);
        assert_eq!(req.header_str("host"), Some("example.com"));
        assert_eq!(req.headers().get_all("x-multi").iter().count(), 2);
    }

    #[test]
    fn rejects_malformed_request_line() {
        assert!(parse("GET /\r\n\r\n").is_err());
        assert!(parse("GET / HTTP/2.0\r\n\r\n").is_err());
        assert!(parse("\r\n\r\n").is_err());
    }

    #[test]
    fn enforces_header_count() {
        let limits = MessageLimits {
            max_header_count: 1,
            max_line_length: 100,
        };
        let head = b"GET / HTTP/1.1\r\nA: 1\r\nB: 2\r\n\r\n";
        let err = parse_request_head(head, &DefaultRequestFactory, &limits).unwrap_err();
        assert!(err.to_string().contains("header count"));
    }

    #[test]
    fn enforces_line_length() {
        let limits = MessageLimits {
            max_header_count: 10,
            max_line_length: 20,
        };
        let head = format!("GET /{} HTTP/1.1\r\n\r\n", "a".repeat(32));
        let err = parse_request_head(head.as_bytes(), &DefaultRequestFactory, &limits).unwrap_err();
        assert!(err.to_string().contains("line length"));
    }

    #[test]
    fn encodes_status_line_and_headers() {
        let response = Response::new(StatusCode::NOT_FOUND)
            .with_header(header::CONTENT_LENGTH, HeaderValue::from_static("0"));
        let mut out = BytesMut::new();
        encode_response_head(&response, &mut out);
        assert_eq!(&out[..], b"HTTP/1.1 404 Not Found\r\ncontent-length: 0\r\n\r\n");
    }
}

//! Common view over requests and responses.

use http::{HeaderMap, Version};

/// A message whose headers interceptors may inspect and mutate.
pub trait HttpMessage: Send {
    fn version(&self) -> Version;

    fn headers(&self) -> &HeaderMap;

    fn headers_mut(&mut self) -> &mut HeaderMap;

    fn contains_header(&self, name: &str) -> bool {
        self.headers().contains_key(name)
    }

    /// First value of `name` as text, if present and visible ASCII.
    fn header_str(&self, name: &str) -> Option<&str> {
        self.headers().get(name).and_then(|v| v.to_str().ok())
    }
}

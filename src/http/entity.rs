//! Entity metadata and the pull-based body production contract.
//!
//! The connection owns the write path and asks a producer for bytes only
//! when it has room for them:
//!
//! ```text
//! stream_start(channel)
//!     → available() > 0 ?  produce(channel)  (writes ≤ channel.capacity())
//!     → ... repeat ...
//!     → channel.end_stream()                  (signalled by the producer)
//!     → release_resources()
//! ```

use std::borrow::Cow;
use std::fmt;

use bytes::Bytes;

use crate::error::TransportError;

/// Media type plus optional charset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentType {
    mime_type: Cow<'static, str>,
    charset: Option<Cow<'static, str>>,
}

impl ContentType {
    pub const TEXT_PLAIN: ContentType = ContentType {
        mime_type: Cow::Borrowed("text/plain"),
        charset: Some(Cow::Borrowed("UTF-8")),
    };
    pub const APPLICATION_JSON: ContentType = ContentType {
        mime_type: Cow::Borrowed("application/json"),
        charset: Some(Cow::Borrowed("UTF-8")),
    };
    pub const APPLICATION_OCTET_STREAM: ContentType = ContentType {
        mime_type: Cow::Borrowed("application/octet-stream"),
        charset: None,
    };

    pub fn new(mime_type: impl Into<Cow<'static, str>>) -> Self {
        Self {
            mime_type: mime_type.into(),
            charset: None,
        }
    }

    pub fn with_charset(mut self, charset: impl Into<Cow<'static, str>>) -> Self {
        self.charset = Some(charset.into());
        self
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    pub fn charset(&self) -> Option<&str> {
        self.charset.as_deref()
    }

    /// Encode `text` in this content type's charset.
    ///
    /// ISO-8859-1 and US-ASCII replace unmappable characters with `?`. Any
    /// other declared charset is replaced by UTF-8 in the returned type, so
    /// the advertised charset always matches the bytes.
    pub fn encode(&self, text: &str) -> (Bytes, ContentType) {
        let limit = match self.charset() {
            Some(cs) if cs.eq_ignore_ascii_case("ISO-8859-1") => 0xFF,
            Some(cs) if cs.eq_ignore_ascii_case("US-ASCII") => 0x7F,
            Some(cs) if !cs.eq_ignore_ascii_case("UTF-8") => {
                tracing::debug!(charset = cs, "Unsupported charset, encoding as UTF-8");
                let utf8 = self.clone().with_charset("UTF-8");
                return (Bytes::copy_from_slice(text.as_bytes()), utf8);
            }
            _ => return (Bytes::copy_from_slice(text.as_bytes()), self.clone()),
        };
        let bytes = text
            .chars()
            .map(|c| if (c as u32) <= limit { c as u8 } else { b'?' })
            .collect::<Vec<u8>>();
        (bytes.into(), self.clone())
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.charset {
            Some(charset) => write!(f, "{}; charset={}", self.mime_type, charset),
            None => f.write_str(&self.mime_type),
        }
    }
}

/// Metadata of a message body.
pub trait EntityDetails {
    /// Body length in bytes, `None` when unknown in advance.
    fn content_length(&self) -> Option<u64>;

    fn content_type(&self) -> Option<&ContentType>;

    fn content_encoding(&self) -> Option<&str> {
        None
    }

    /// The body must be sent with chunked transfer coding.
    fn is_chunked(&self) -> bool;
}

/// Owned snapshot of [`EntityDetails`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BasicEntityDetails {
    pub content_length: Option<u64>,
    pub content_type: Option<ContentType>,
    pub content_encoding: Option<String>,
    pub chunked: bool,
}

impl BasicEntityDetails {
    pub fn of<D: EntityDetails + ?Sized>(details: &D) -> Self {
        Self {
            content_length: details.content_length(),
            content_type: details.content_type().cloned(),
            content_encoding: details.content_encoding().map(str::to_string),
            chunked: details.is_chunked(),
        }
    }
}

impl EntityDetails for BasicEntityDetails {
    fn content_length(&self) -> Option<u64> {
        self.content_length
    }

    fn content_type(&self) -> Option<&ContentType> {
        self.content_type.as_ref()
    }

    fn content_encoding(&self) -> Option<&str> {
        self.content_encoding.as_deref()
    }

    fn is_chunked(&self) -> bool {
        self.chunked
    }
}

/// Write capability handed to a producer for the duration of one call.
pub trait DataStreamChannel {
    /// Bytes the channel accepts right now.
    fn capacity(&self) -> usize;

    /// Write up to `capacity()` bytes of `src`, returning how many were taken.
    fn write(&mut self, src: &[u8]) -> Result<usize, TransportError>;

    /// Ask to be polled again even though `available()` may report 0.
    fn request_output(&mut self);

    /// Signal that the body is complete. No writes may follow.
    fn end_stream(&mut self) -> Result<(), TransportError>;
}

/// Generator of body bytes, driven by the connection's write path.
pub trait AsyncEntityProducer: EntityDetails + Send {
    /// Called once before the first `produce`. Must not block.
    fn stream_start(&mut self, channel: &mut dyn DataStreamChannel) -> Result<(), TransportError> {
        let _ = channel;
        Ok(())
    }

    /// Upper bound on bytes deliverable now, without side effects.
    /// 0 means "not ready yet", never "finished".
    fn available(&self) -> usize;

    /// Write at most `channel.capacity()` bytes, ending the stream when done.
    fn produce(&mut self, channel: &mut dyn DataStreamChannel) -> Result<(), TransportError>;

    /// Notification that production was aborted. Resources are released
    /// separately through `release_resources`.
    fn failed(&mut self, cause: &TransportError) {
        let _ = cause;
    }

    fn release_resources(&mut self);
}

/// Producer for an in-memory body of known length.
#[derive(Debug, Clone)]
pub struct BytesEntityProducer {
    content: Bytes,
    content_type: ContentType,
    position: usize,
    ended: bool,
}

impl BytesEntityProducer {
    pub fn new(content: impl Into<Bytes>, content_type: ContentType) -> Self {
        Self {
            content: content.into(),
            content_type,
            position: 0,
            ended: false,
        }
    }

    /// Body from text, encoded in the content type's charset.
    pub fn text(text: &str, content_type: ContentType) -> Self {
        let (content, content_type) = content_type.encode(text);
        Self::new(content, content_type)
    }

    fn finish(&mut self, channel: &mut dyn DataStreamChannel) -> Result<(), TransportError> {
        self.ended = true;
        channel.end_stream()
    }
}

impl EntityDetails for BytesEntityProducer {
    fn content_length(&self) -> Option<u64> {
        Some(self.content.len() as u64)
    }

    fn content_type(&self) -> Option<&ContentType> {
        Some(&self.content_type)
    }

    fn is_chunked(&self) -> bool {
        false
    }
}

impl AsyncEntityProducer for BytesEntityProducer {
    fn stream_start(&mut self, channel: &mut dyn DataStreamChannel) -> Result<(), TransportError> {
        if self.content.is_empty() {
            return self.finish(channel);
        }
        Ok(())
    }

    fn available(&self) -> usize {
        self.content.len() - self.position
    }

    fn produce(&mut self, channel: &mut dyn DataStreamChannel) -> Result<(), TransportError> {
        if self.ended {
            return Ok(());
        }
        let n = channel.write(&self.content[self.position..])?;
        self.position += n;
        if self.position == self.content.len() {
            self.finish(channel)?;
        }
        Ok(())
    }

    fn release_resources(&mut self) {
        self.position = 0;
        self.ended = false;
    }
}

/// Producer for a body of unknown length, fed by an iterator of chunks.
///
/// The next chunk is fetched as soon as the current one is written, so
/// `available()` is 0 only once the stream has ended.
pub struct ChunkedEntityProducer<I> {
    chunks: I,
    current: Bytes,
    content_type: ContentType,
    ended: bool,
}

impl<I> ChunkedEntityProducer<I>
where
    I: Iterator<Item = Bytes> + Send,
{
    pub fn new(chunks: impl IntoIterator<IntoIter = I>, content_type: ContentType) -> Self {
        Self {
            chunks: chunks.into_iter(),
            current: Bytes::new(),
            content_type,
            ended: false,
        }
    }

    /// Load the next non-empty chunk; end the stream when none is left.
    fn advance(&mut self, channel: &mut dyn DataStreamChannel) -> Result<(), TransportError> {
        match self.chunks.by_ref().find(|chunk| !chunk.is_empty()) {
            Some(chunk) => self.current = chunk,
            None => {
                self.ended = true;
                channel.end_stream()?;
            }
        }
        Ok(())
    }
}

impl<I> EntityDetails for ChunkedEntityProducer<I> {
    fn content_length(&self) -> Option<u64> {
        None
    }

    fn content_type(&self) -> Option<&ContentType> {
        Some(&self.content_type)
    }

    fn is_chunked(&self) -> bool {
        true
    }
}

impl<I> AsyncEntityProducer for ChunkedEntityProducer<I>
where
    I: Iterator<Item = Bytes> + Send,
{
    fn stream_start(&mut self, channel: &mut dyn DataStreamChannel) -> Result<(), TransportError> {
        self.advance(channel)
    }

    fn available(&self) -> usize {
        self.current.len()
    }

    fn produce(&mut self, channel: &mut dyn DataStreamChannel) -> Result<(), TransportError> {
        while !self.ended && channel.capacity() > 0 {
            let n = channel.write(&self.current)?;
            if n == 0 {
                break;
            }
            let _ = self.current.split_to(n);
            if self.current.is_empty() {
                self.advance(channel)?;
            }
        }
        Ok(())
    }

    fn release_resources(&mut self) {
        self.current = Bytes::new();
        self.ended = true;
    }
}

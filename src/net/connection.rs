//! Connection state machine bound to one session.
//!
//! # Responsibilities
//! - Generate unique connection IDs for tracing
//! - Read inbound request heads through the configured request factory
//! - Run interceptors, frame and write responses
//! - Drive the response producer against the outbound buffer
//! - Release the in-flight producer on close, failure and drop
//!
//! # Design Decisions
//! - One `&mut self` owner per connection; no locking inside
//! - Body bytes are pulled only when the outbound buffer has room
//! - Errors raised before a response head is buffered leave the connection usable
//! - Once the head is framed, any failure ends the connection, since a cut-short
//!   message cannot be resynchronized

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::{Buf, BufMut, BytesMut};
use http::header::{HeaderValue, CONTENT_LENGTH, TRANSFER_ENCODING};
use http::StatusCode;

use super::buffer::BufferAllocator;
use crate::error::TransportError;
use crate::http::head::{encode_response_head, find_head_end, parse_request_head};
use crate::http::{
    BasicEntityDetails, DataStreamChannel, EntityDetails, HttpMessage, MessageLimits, Request,
    RequestFactory, Response, ResponseProducer,
};
use crate::observability::metrics;
use crate::protocol::{HttpContext, HttpProcessor};
use crate::session::{IoSession, SessionAttributes, SessionId};
use crate::tls::{HandshakeState, SecureSession};

/// Global atomic counter for connection IDs. Only uniqueness matters.
static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

const LAST_CHUNK: &[u8] = b"0\r\n\r\n";

/// Unique identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Generate a new unique connection ID.
    pub fn new() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Connection state for lifecycle tracking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Connection is active and processing requests.
    Active,
    /// Connection is closed.
    Closed,
}

/// Sizes and limits applied to every connection a factory creates.
#[derive(Debug, Clone, Copy)]
pub struct ConnectionSettings {
    pub limits: MessageLimits,
    /// Bytes requested from the session per read.
    pub read_chunk_size: usize,
    /// Outbound bytes buffered before body production pauses.
    pub output_buffer_size: usize,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            limits: MessageLimits::default(),
            read_chunk_size: 8192,
            output_buffer_size: 16384,
        }
    }
}

/// The session a connection is bound to: raw, or TLS-decorated.
pub enum BoundSession<S: IoSession> {
    Plain(S),
    Secure(SecureSession<S>),
}

impl<S: IoSession> BoundSession<S> {
    pub fn is_secure(&self) -> bool {
        matches!(self, BoundSession::Secure(_))
    }

    /// The undecorated session underneath any TLS layer.
    pub fn raw(&self) -> &S {
        match self {
            BoundSession::Plain(s) => s,
            BoundSession::Secure(s) => s.inner(),
        }
    }

    pub fn secure(&self) -> Option<&SecureSession<S>> {
        match self {
            BoundSession::Plain(_) => None,
            BoundSession::Secure(s) => Some(s),
        }
    }

    pub fn handshake_state(&self) -> Option<HandshakeState> {
        self.secure().map(SecureSession::state)
    }

    /// Map a session I/O error to the failure it represents.
    fn classify(&self, e: io::Error) -> TransportError {
        match self.secure().and_then(SecureSession::handshake_failure) {
            Some(reason) => TransportError::HandshakeFailure(reason.to_string()),
            None => TransportError::Io(e),
        }
    }

    /// Push data buffered below the plaintext layer. `false` if some remains.
    fn flush_pending(&mut self) -> Result<bool, TransportError> {
        if let BoundSession::Secure(s) = self {
            if s.wants_write() {
                s.drive()?;
            }
        }
        Ok(!self.wants_write())
    }
}

impl<S: IoSession> IoSession for BoundSession<S> {
    fn id(&self) -> SessionId {
        match self {
            BoundSession::Plain(s) => s.id(),
            BoundSession::Secure(s) => s.id(),
        }
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            BoundSession::Plain(s) => s.read(buf),
            BoundSession::Secure(s) => s.read(buf),
        }
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            BoundSession::Plain(s) => s.write(buf),
            BoundSession::Secure(s) => s.write(buf),
        }
    }

    fn close(&mut self) {
        match self {
            BoundSession::Plain(s) => s.close(),
            BoundSession::Secure(s) => s.close(),
        }
    }

    fn is_closed(&self) -> bool {
        match self {
            BoundSession::Plain(s) => s.is_closed(),
            BoundSession::Secure(s) => s.is_closed(),
        }
    }

    fn attributes(&self) -> &SessionAttributes {
        match self {
            BoundSession::Plain(s) => s.attributes(),
            BoundSession::Secure(s) => s.attributes(),
        }
    }

    fn attributes_mut(&mut self) -> &mut SessionAttributes {
        match self {
            BoundSession::Plain(s) => s.attributes_mut(),
            BoundSession::Secure(s) => s.attributes_mut(),
        }
    }

    fn peer_addr(&self) -> Option<SocketAddr> {
        self.raw().peer_addr()
    }

    fn wants_write(&self) -> bool {
        match self {
            BoundSession::Plain(s) => s.wants_write(),
            BoundSession::Secure(s) => s.wants_write(),
        }
    }
}

/// Result of [`Connection::read_request`].
#[derive(Debug)]
pub enum Inbound {
    /// A complete request head.
    Message(Request),
    /// No complete head yet; read again when the session is readable.
    NeedMore,
    /// The peer closed its side.
    Closed,
}

/// Result of [`Connection::submit_response`] and [`Connection::poll_output`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Output {
    /// Nothing in flight and everything flushed.
    Idle,
    /// The producer has nothing available yet.
    Waiting,
    /// The session cannot take more bytes; poll again once writable.
    Blocked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Framing {
    Bodiless,
    Length { remaining: u64 },
    Chunked,
}

/// Body framing progress of the current exchange.
#[derive(Debug)]
struct BodyWriter {
    framing: Framing,
    ended: bool,
    written: u64,
    output_requested: bool,
}

struct Exchange {
    producer: Box<dyn ResponseProducer>,
    writer: BodyWriter,
    status: StatusCode,
}

/// An HTTP/1.1 server-side connection over one [`IoSession`].
pub struct Connection<S: IoSession> {
    id: ConnectionId,
    session: BoundSession<S>,
    request_factory: Arc<dyn RequestFactory>,
    allocator: Arc<dyn BufferAllocator>,
    processor: HttpProcessor,
    settings: ConnectionSettings,
    state: ConnectionState,
    inbound: BytesMut,
    outbound: BytesMut,
    exchange: Option<Exchange>,
    /// Context of the last request read, handed to its response.
    context: Option<HttpContext>,
    peer_closed: bool,
}

impl<S: IoSession> Connection<S> {
    pub(crate) fn new(
        session: BoundSession<S>,
        request_factory: Arc<dyn RequestFactory>,
        allocator: Arc<dyn BufferAllocator>,
        processor: HttpProcessor,
        settings: ConnectionSettings,
    ) -> Self {
        let id = ConnectionId::new();
        let inbound = allocator.allocate(settings.read_chunk_size);
        let outbound = allocator.allocate(settings.output_buffer_size);

        metrics::record_connection_opened(session.is_secure());
        tracing::debug!(
            connection_id = %id,
            session_id = %session.id(),
            tls = session.is_secure(),
            "Connection created"
        );

        Self {
            id,
            session,
            request_factory,
            allocator,
            processor,
            settings,
            state: ConnectionState::Active,
            inbound,
            outbound,
            exchange: None,
            context: None,
            peer_closed: false,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state == ConnectionState::Active && !self.session.is_closed()
    }

    /// The session this connection reads and writes, decorated if TLS is on.
    pub fn session(&self) -> &BoundSession<S> {
        &self.session
    }

    /// The session as it was handed to the factory.
    pub fn raw_session(&self) -> &S {
        self.session.raw()
    }

    /// Whether output is pending and a writable event is needed.
    pub fn wants_write(&self) -> bool {
        !self.outbound.is_empty() || self.session.wants_write()
    }

    /// Whether a response is still being produced.
    pub fn exchange_in_progress(&self) -> bool {
        self.exchange.is_some()
    }

    /// Body bytes framed so far for the in-flight response.
    pub fn body_bytes_written(&self) -> Option<u64> {
        self.exchange.as_ref().map(|x| x.writer.written)
    }

    /// Read until a complete request head is buffered or the session would block.
    pub fn read_request(&mut self) -> Result<Inbound, TransportError> {
        self.ensure_open()?;

        loop {
            if let Some(end) = find_head_end(&self.inbound) {
                let head = self.inbound.split_to(end);
                let parsed = parse_request_head(
                    &head,
                    self.request_factory.as_ref(),
                    &self.settings.limits,
                );
                let mut request = match parsed {
                    Ok(request) => request,
                    Err(e) => return Err(self.fail(e)),
                };

                let mut context = HttpContext::for_connection(self.id);
                if let Err(e) = self.processor.process_request(&mut request, None, &mut context) {
                    return Err(self.fail(e));
                }
                tracing::debug!(
                    connection_id = %self.id,
                    method = %request.method(),
                    path = %request.uri().path(),
                    "Request received"
                );
                self.context = Some(context);
                return Ok(Inbound::Message(request));
            }

            if self.inbound.len() > self.settings.limits.max_head_size() {
                let e = TransportError::protocol("request head exceeds configured limits");
                return Err(self.fail(e));
            }

            if self.peer_closed {
                if !self.inbound.is_empty() {
                    tracing::debug!(
                        connection_id = %self.id,
                        pending = self.inbound.len(),
                        "Peer closed with a partial request head"
                    );
                }
                if self.exchange.is_none() && self.outbound.is_empty() {
                    self.close();
                }
                return Ok(Inbound::Closed);
            }

            if !self.fill_inbound()? {
                return Ok(Inbound::NeedMore);
            }
        }
    }

    /// Start sending a response. Only one response may be in flight.
    ///
    /// Errors raised before any byte of the response is buffered leave the
    /// connection usable whatever their variant, including the `Protocol`
    /// errors of interceptors and framing. A failure in `data_start` also
    /// counts, as the head is discarded. The producer is released either way.
    pub fn submit_response<P>(&mut self, producer: P) -> Result<Output, TransportError>
    where
        P: ResponseProducer + 'static,
    {
        let mut producer: Box<dyn ResponseProducer> = Box::new(producer);

        if self.state == ConnectionState::Closed {
            producer.failed(&TransportError::ConnectionClosed);
            return Err(TransportError::ConnectionClosed);
        }
        if self.exchange.is_some() {
            let e = TransportError::protocol("a response is already in progress");
            producer.failed(&e);
            return Err(e);
        }

        let mut response = producer.produce_response();
        let details = producer.entity_details();
        let mut context = self
            .context
            .take()
            .unwrap_or_else(|| HttpContext::for_connection(self.id));

        let prepared = self
            .processor
            .process_response(
                &mut response,
                details.as_ref().map(|d| d as &dyn EntityDetails),
                &mut context,
            )
            .and_then(|()| resolve_framing(&mut response, details.as_ref()));
        let framing = match prepared {
            Ok(framing) => framing,
            Err(e) => {
                producer.failed(&e);
                return Err(e);
            }
        };

        let head_start = self.outbound.len();
        encode_response_head(&response, &mut self.outbound);

        let mut exchange = Exchange {
            producer,
            writer: BodyWriter {
                framing,
                ended: framing == Framing::Bodiless,
                written: 0,
                output_requested: false,
            },
            status: response.status(),
        };

        let started = {
            let Exchange { producer, writer, .. } = &mut exchange;
            producer.data_start(&mut OutboundChannel {
                buf: &mut self.outbound,
                limit: self.settings.output_buffer_size,
                writer,
            })
        };
        if let Err(e) = started {
            self.outbound.truncate(head_start);
            if matches!(e, TransportError::ProductionFailure(_)) {
                metrics::record_production_failure();
            }
            exchange.producer.failed(&e);
            return Err(e);
        }

        metrics::record_response(exchange.status.as_u16());
        tracing::debug!(
            connection_id = %self.id,
            status = exchange.status.as_u16(),
            framing = ?framing,
            "Response submitted"
        );

        self.exchange = Some(exchange);
        self.poll_output()
    }

    /// Flush buffered output and pull more body bytes while there is room.
    pub fn poll_output(&mut self) -> Result<Output, TransportError> {
        self.ensure_open()?;

        loop {
            if !self.flush()? {
                return Ok(Output::Blocked);
            }

            let Some(exchange) = self.exchange.as_mut() else {
                return Ok(Output::Idle);
            };
            if exchange.writer.ended {
                self.finish_exchange();
                continue;
            }
            if exchange.producer.available() == 0 && !exchange.writer.output_requested {
                return Ok(Output::Waiting);
            }
            exchange.writer.output_requested = false;

            let before = self.outbound.len();
            let produced = {
                let Exchange { producer, writer, .. } = exchange;
                producer.produce(&mut OutboundChannel {
                    buf: &mut self.outbound,
                    limit: self.settings.output_buffer_size,
                    writer,
                })
            };
            if let Err(e) = produced {
                return Err(self.abort_exchange(e));
            }

            let ended = self.exchange.as_ref().is_some_and(|x| x.writer.ended);
            if self.outbound.len() == before && !ended {
                return Ok(Output::Waiting);
            }
        }
    }

    /// Close the connection, aborting any in-flight response.
    pub fn close(&mut self) {
        if self.state == ConnectionState::Closed {
            return;
        }
        if let Some(mut exchange) = self.exchange.take() {
            exchange.producer.failed(&TransportError::ConnectionClosed);
        }
        // Best effort: whatever is already framed may still reach the peer.
        let _ = self.flush();
        self.shutdown();
    }

    fn ensure_open(&self) -> Result<(), TransportError> {
        match self.state {
            ConnectionState::Active => Ok(()),
            ConnectionState::Closed => Err(TransportError::ConnectionClosed),
        }
    }

    /// Read one chunk into the inbound buffer. `false` if the session would block.
    fn fill_inbound(&mut self) -> Result<bool, TransportError> {
        let mut chunk = self.allocator.allocate(self.settings.read_chunk_size);
        chunk.resize(self.settings.read_chunk_size, 0);

        match self.session.read(&mut chunk) {
            Ok(0) => {
                tracing::trace!(connection_id = %self.id, "Peer closed");
                self.peer_closed = true;
                Ok(true)
            }
            Ok(n) => {
                self.inbound.extend_from_slice(&chunk[..n]);
                Ok(true)
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(false),
            Err(e) => {
                let e = self.session.classify(e);
                Err(self.fail(e))
            }
        }
    }

    /// Write buffered output. `false` if the session would block.
    fn flush(&mut self) -> Result<bool, TransportError> {
        while !self.outbound.is_empty() {
            match self.session.write(&self.outbound) {
                Ok(0) => return Err(self.fail(TransportError::ConnectionClosed)),
                Ok(n) => self.outbound.advance(n),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(false),
                Err(e) => {
                    let e = self.session.classify(e);
                    return Err(self.fail(e));
                }
            }
        }
        match self.session.flush_pending() {
            Ok(done) => Ok(done),
            Err(e) => Err(self.fail(e)),
        }
    }

    fn finish_exchange(&mut self) {
        if let Some(mut exchange) = self.exchange.take() {
            exchange.producer.release_resources();
            metrics::record_body_bytes(exchange.writer.written as usize);
            tracing::trace!(
                connection_id = %self.id,
                status = exchange.status.as_u16(),
                body_bytes = exchange.writer.written,
                "Response complete"
            );
        }
    }

    /// Fail the in-flight exchange after its head was framed. The wire can no
    /// longer carry another message, so the connection is shut down.
    fn abort_exchange(&mut self, e: TransportError) -> TransportError {
        if let Some(mut exchange) = self.exchange.take() {
            if matches!(e, TransportError::ProductionFailure(_)) {
                metrics::record_production_failure();
            }
            tracing::debug!(
                connection_id = %self.id,
                status = exchange.status.as_u16(),
                body_bytes = exchange.writer.written,
                error = %e,
                "Response aborted"
            );
            exchange.producer.failed(&e);
        }
        self.shutdown();
        e
    }

    /// Record `e`; fatal errors end the connection.
    fn fail(&mut self, e: TransportError) -> TransportError {
        if e.is_fatal() {
            tracing::debug!(connection_id = %self.id, error = %e, "Connection failed");
            if let Some(mut exchange) = self.exchange.take() {
                exchange.producer.failed(&e);
            }
            self.shutdown();
        }
        e
    }

    fn shutdown(&mut self) {
        if self.state == ConnectionState::Closed {
            return;
        }
        self.session.close();
        self.state = ConnectionState::Closed;
        metrics::record_connection_closed();
        tracing::debug!(connection_id = %self.id, "Connection closed");
    }
}

impl<S: IoSession> Drop for Connection<S> {
    fn drop(&mut self) {
        self.close();
    }
}

impl<S: IoSession> std::fmt::Debug for Connection<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("session_id", &self.session.id())
            .field("tls", &self.session.is_secure())
            .field("state", &self.state)
            .field("exchange_in_progress", &self.exchange.is_some())
            .finish()
    }
}

/// Pick the wire framing for a response, filling in headers the chain left unset.
fn resolve_framing(
    response: &mut Response,
    details: Option<&BasicEntityDetails>,
) -> Result<Framing, TransportError> {
    let Some(details) = details else {
        return Ok(Framing::Bodiless);
    };
    let headers = response.headers_mut();

    if let Some(te) = headers.get(TRANSFER_ENCODING) {
        if !te.as_bytes().eq_ignore_ascii_case(b"chunked") {
            return Err(TransportError::protocol(format!(
                "unsupported transfer encoding {te:?}"
            )));
        }
        if headers.contains_key(CONTENT_LENGTH) {
            return Err(TransportError::protocol(
                "both Content-Length and Transfer-Encoding are set",
            ));
        }
        return Ok(Framing::Chunked);
    }

    if let Some(value) = headers.get(CONTENT_LENGTH) {
        let declared = value
            .to_str()
            .ok()
            .and_then(|v| v.trim().parse::<u64>().ok())
            .ok_or_else(|| TransportError::protocol("invalid Content-Length header"))?;
        if let Some(len) = details.content_length {
            if len != declared {
                return Err(TransportError::protocol(format!(
                    "Content-Length {declared} does not match entity length {len}"
                )));
            }
        }
        return Ok(Framing::Length { remaining: declared });
    }

    match details.content_length {
        Some(len) if !details.chunked => {
            headers.insert(CONTENT_LENGTH, HeaderValue::from(len));
            Ok(Framing::Length { remaining: len })
        }
        _ => {
            headers.insert(TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
            Ok(Framing::Chunked)
        }
    }
}

fn hex_digits(n: usize) -> usize {
    ((usize::BITS - n.leading_zeros()) as usize).div_ceil(4).max(1)
}

/// Channel handed to producers: applies framing and enforces the buffer limit.
struct OutboundChannel<'a> {
    buf: &'a mut BytesMut,
    limit: usize,
    writer: &'a mut BodyWriter,
}

impl DataStreamChannel for OutboundChannel<'_> {
    fn capacity(&self) -> usize {
        if self.writer.ended {
            return 0;
        }
        let space = self.limit.saturating_sub(self.buf.len());
        match self.writer.framing {
            Framing::Bodiless => 0,
            Framing::Length { remaining } => {
                space.min(usize::try_from(remaining).unwrap_or(usize::MAX))
            }
            Framing::Chunked => space.saturating_sub(hex_digits(space) + 4 + LAST_CHUNK.len()),
        }
    }

    fn write(&mut self, src: &[u8]) -> Result<usize, TransportError> {
        if self.writer.ended {
            return Err(TransportError::protocol("write after end of stream"));
        }
        let n = src.len().min(self.capacity());

        match &mut self.writer.framing {
            Framing::Bodiless => {
                return Err(TransportError::protocol("response has no body"));
            }
            Framing::Length { remaining } => {
                if src.len() as u64 > *remaining {
                    return Err(TransportError::protocol(format!(
                        "body exceeds Content-Length by {} bytes",
                        src.len() as u64 - *remaining
                    )));
                }
                self.buf.put_slice(&src[..n]);
                *remaining -= n as u64;
            }
            Framing::Chunked => {
                if n > 0 {
                    self.buf.put_slice(format!("{n:x}\r\n").as_bytes());
                    self.buf.put_slice(&src[..n]);
                    self.buf.put_slice(b"\r\n");
                }
            }
        }

        self.writer.written += n as u64;
        Ok(n)
    }

    fn request_output(&mut self) {
        self.writer.output_requested = true;
    }

    fn end_stream(&mut self) -> Result<(), TransportError> {
        if self.writer.ended {
            return Ok(());
        }
        match self.writer.framing {
            Framing::Length { remaining } if remaining > 0 => {
                return Err(TransportError::protocol(format!(
                    "body ended {remaining} bytes short of Content-Length"
                )));
            }
            Framing::Chunked => self.buf.put_slice(LAST_CHUNK),
            Framing::Length { .. } | Framing::Bodiless => {}
        }
        self.writer.ended = true;
        Ok(())
    }
}

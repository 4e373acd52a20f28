//! Request/response exchanges driven over in-memory sessions.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use common::{
    client_config, dechunk, header, localhost_cert, read_available, server_config, split_response,
    tls_client, write_all, PIPE_CAPACITY,
};
use http::header::CONTENT_LENGTH;
use http::{HeaderValue, StatusCode};
use nio_http::http::{
    AsyncEntityProducer, BasicResponseProducer, BytesEntityProducer, ContentType, DataStreamChannel,
    EntityDetails, HttpMessage, MessageLimits, Response,
};
use nio_http::net::{ConnectionState, Inbound, Output};
use nio_http::protocol::HttpProcessor;
use nio_http::server::{EchoHandler, RequestHandler};
use nio_http::session::{IoSession, MemorySession};
use nio_http::tls::{HandshakeState, TlsContext, TlsDecoration};
use nio_http::{Connection, ConnectionFactory, TlsSettings, TransportError};

fn plain_factory() -> ConnectionFactory {
    ConnectionFactory::builder()
        .with_defaults()
        .processor(HttpProcessor::server_default("nio-test/1.0").unwrap())
        .build()
        .unwrap()
}

fn expect_request<S: IoSession>(connection: &mut Connection<S>) -> nio_http::http::Request {
    match connection.read_request().unwrap() {
        Inbound::Message(request) => request,
        other => panic!("expected a request, got {other:?}"),
    }
}

/// Where a [`CountingEntity`] fails, if anywhere.
#[derive(Clone, Copy, PartialEq, Eq)]
enum FailAt {
    Never,
    Start,
    /// Declares five bytes, writes two, then fails.
    MidBody,
}

/// Entity whose calls are counted; optionally fails or never becomes ready.
struct CountingEntity {
    fail_at: FailAt,
    ready: bool,
    failed: Arc<AtomicUsize>,
    released: Arc<AtomicUsize>,
}

impl CountingEntity {
    fn new(fail_at: FailAt, ready: bool) -> (Self, Arc<AtomicUsize>, Arc<AtomicUsize>) {
        let failed = Arc::new(AtomicUsize::new(0));
        let released = Arc::new(AtomicUsize::new(0));
        let entity = CountingEntity {
            fail_at,
            ready,
            failed: Arc::clone(&failed),
            released: Arc::clone(&released),
        };
        (entity, failed, released)
    }
}

impl EntityDetails for CountingEntity {
    fn content_length(&self) -> Option<u64> {
        (self.fail_at == FailAt::MidBody).then_some(5)
    }

    fn content_type(&self) -> Option<&ContentType> {
        None
    }

    fn is_chunked(&self) -> bool {
        self.fail_at != FailAt::MidBody
    }
}

impl AsyncEntityProducer for CountingEntity {
    fn stream_start(&mut self, _channel: &mut dyn DataStreamChannel) -> Result<(), TransportError> {
        if self.fail_at == FailAt::Start {
            return Err(TransportError::ProductionFailure("backend unavailable".into()));
        }
        Ok(())
    }

    fn available(&self) -> usize {
        usize::from(self.ready)
    }

    fn produce(&mut self, channel: &mut dyn DataStreamChannel) -> Result<(), TransportError> {
        if self.fail_at == FailAt::MidBody {
            channel.write(b"ab")?;
            return Err(TransportError::ProductionFailure("backend went away".into()));
        }
        channel.write(b"x")?;
        channel.end_stream()
    }

    fn failed(&mut self, _cause: &TransportError) {
        self.failed.fetch_add(1, Ordering::SeqCst);
    }

    fn release_resources(&mut self) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }
}

/// The connection accepts and completes a follow-up exchange.
fn assert_serves_next<S: IoSession>(connection: &mut Connection<S>, client: &mut MemorySession) {
    assert!(connection.is_open());
    assert!(!connection.exchange_in_progress());
    write_all(client, b"GET /next HTTP/1.1\r\n\r\n");
    expect_request(connection);
    connection
        .submit_response(BasicResponseProducer::text(StatusCode::OK, "second"))
        .unwrap();
    let (head, body) = split_response(&read_available(client));
    assert!(head.starts_with("HTTP/1.1 200 OK"));
    assert_eq!(body, b"second");
}

#[test]
fn plain_exchange_writes_framed_response() {
    let factory = plain_factory();
    let (server_raw, mut client) = MemorySession::pair(PIPE_CAPACITY);
    let mut connection = factory.create_connection(server_raw).unwrap();

    assert!(matches!(connection.read_request().unwrap(), Inbound::NeedMore));

    write_all(
        &mut client,
        b"GET /hello?name=nio HTTP/1.1\r\nHost: localhost\r\nX-Request-Id: req-42\r\n\r\n",
    );
    let request = expect_request(&mut connection);
    assert_eq!(request.method(), "GET");
    assert_eq!(request.uri().path(), "/hello");
    assert_eq!(request.header_str("host"), Some("localhost"));

    let output = connection
        .submit_response(BasicResponseProducer::text(StatusCode::OK, "hello"))
        .unwrap();
    assert_eq!(output, Output::Idle);
    assert!(!connection.exchange_in_progress());

    let (head, body) = split_response(&read_available(&mut client));
    assert!(head.starts_with("HTTP/1.1 200 OK"), "{head}");
    assert_eq!(header(&head, "content-length"), Some("5"));
    assert!(header(&head, "content-type").is_some_and(|v| v.starts_with("text/plain")));
    assert!(header(&head, "date").is_some_and(|v| v.ends_with("GMT")));
    assert_eq!(header(&head, "server"), Some("nio-test/1.0"));
    assert_eq!(header(&head, "x-request-id"), Some("req-42"));
    assert!(header(&head, "transfer-encoding").is_none());
    assert_eq!(body, b"hello");
}

#[test]
fn request_id_is_generated_when_absent() {
    let factory = plain_factory();
    let (server_raw, mut client) = MemorySession::pair(PIPE_CAPACITY);
    let mut connection = factory.create_connection(server_raw).unwrap();

    write_all(&mut client, b"GET / HTTP/1.1\r\nHost: localhost\r\n\r\n");
    let request = expect_request(&mut connection);
    let assigned = request.header_str("x-request-id").unwrap().to_string();
    assert_eq!(assigned.len(), 36);

    connection
        .submit_response(BasicResponseProducer::empty(StatusCode::NO_CONTENT))
        .unwrap();
    let (head, body) = split_response(&read_available(&mut client));
    assert!(head.starts_with("HTTP/1.1 204 No Content"));
    assert_eq!(header(&head, "x-request-id"), Some(assigned.as_str()));
    assert!(header(&head, "content-length").is_none());
    assert!(header(&head, "date").is_none());
    assert!(body.is_empty());
}

#[test]
fn stream_path_is_sent_chunked() {
    let factory = plain_factory();
    let (server_raw, mut client) = MemorySession::pair(PIPE_CAPACITY);
    let mut connection = factory.create_connection(server_raw).unwrap();

    write_all(&mut client, b"GET /stream HTTP/1.1\r\nHost: localhost\r\n\r\n");
    let request = expect_request(&mut connection);
    let output = connection.submit_response(EchoHandler.handle(&request)).unwrap();
    assert_eq!(output, Output::Idle);

    let (head, body) = split_response(&read_available(&mut client));
    assert_eq!(header(&head, "transfer-encoding"), Some("chunked"));
    assert!(header(&head, "content-length").is_none());
    assert_eq!(dechunk(&body), b"chunk 1\nchunk 2\nchunk 3\n");
}

#[test]
fn keep_alive_serves_sequential_requests() {
    let factory = plain_factory();
    let (server_raw, mut client) = MemorySession::pair(PIPE_CAPACITY);
    let mut connection = factory.create_connection(server_raw).unwrap();

    write_all(
        &mut client,
        b"GET /a HTTP/1.1\r\nHost: x\r\n\r\nGET /b HTTP/1.1\r\nHost: x\r\n\r\n",
    );
    for path in ["/a", "/b"] {
        let request = expect_request(&mut connection);
        assert_eq!(request.uri().path(), path);
        connection.submit_response(EchoHandler.handle(&request)).unwrap();
        let (_, body) = split_response(&read_available(&mut client));
        assert_eq!(body, format!("GET {path}\n").as_bytes());
    }
    assert!(matches!(connection.read_request().unwrap(), Inbound::NeedMore));
}

#[test]
fn slow_reader_applies_backpressure() {
    let factory = ConnectionFactory::builder()
        .with_defaults()
        .output_buffer_size(64)
        .build()
        .unwrap();
    let (server_raw, mut client) = MemorySession::pair(64);
    let mut connection = factory.create_connection(server_raw).unwrap();

    write_all(&mut client, b"GET /big HTTP/1.1\r\n\r\n");
    expect_request(&mut connection);

    let payload = vec![b'x'; 1000];
    let producer = BasicResponseProducer::ok(BytesEntityProducer::new(
        payload.clone(),
        ContentType::APPLICATION_OCTET_STREAM,
    ));
    let mut output = connection.submit_response(producer).unwrap();
    assert_eq!(output, Output::Blocked);
    assert!(connection.wants_write());

    let mut received = Vec::new();
    for _ in 0..1000 {
        if output == Output::Idle {
            break;
        }
        received.extend(read_available(&mut client));
        output = connection.poll_output().unwrap();
    }
    assert_eq!(output, Output::Idle);
    received.extend(read_available(&mut client));

    let (head, body) = split_response(&received);
    assert_eq!(header(&head, "content-length"), Some("1000"));
    assert_eq!(body, payload);
}

#[test]
fn tls_exchange_end_to_end() {
    let cert = localhost_cert();
    let factory = ConnectionFactory::builder()
        .with_defaults()
        .processor(HttpProcessor::server_default("nio-test/1.0").unwrap())
        .tls(TlsSettings::server(TlsContext::server(server_config(&cert))))
        .build()
        .unwrap();
    assert!(factory.is_tls());

    let (server_raw, client_raw) = MemorySession::pair(PIPE_CAPACITY);
    let raw_id = server_raw.id();
    let mut client = tls_client(client_raw, client_config(&[&cert]));
    let mut connection = factory.create_connection(server_raw).unwrap();

    assert!(connection.session().is_secure());
    assert_eq!(connection.session().id(), raw_id);
    let decoration = connection.raw_session().attributes().get::<TlsDecoration>().unwrap();
    assert_eq!(decoration.handshake.get(), HandshakeState::Handshaking);

    let mut sent = false;
    let mut request = None;
    for _ in 0..50 {
        let _ = client.drive().unwrap();
        if !sent && client.state() == HandshakeState::Established {
            write_all(&mut client, b"GET /secure HTTP/1.1\r\nHost: localhost\r\n\r\n");
            sent = true;
        }
        match connection.read_request().unwrap() {
            Inbound::Message(r) => {
                request = Some(r);
                break;
            }
            Inbound::NeedMore => {}
            Inbound::Closed => panic!("peer closed during handshake"),
        }
    }
    let request = request.expect("request over TLS");
    assert_eq!(connection.session().handshake_state(), Some(HandshakeState::Established));

    let output = connection.submit_response(EchoHandler.handle(&request)).unwrap();
    assert_eq!(output, Output::Idle);

    let (head, body) = split_response(&read_available(&mut client));
    assert!(head.starts_with("HTTP/1.1 200 OK"));
    assert_eq!(body, b"GET /secure\n");
}

#[test]
fn tls_factory_refuses_decorated_session() {
    let cert = localhost_cert();
    let factory = ConnectionFactory::builder()
        .with_defaults()
        .tls(TlsSettings::server(TlsContext::server(server_config(&cert))))
        .build()
        .unwrap();

    let (raw, _peer) = MemorySession::pair(PIPE_CAPACITY);
    let already_secure = tls_client(raw, client_config(&[&cert]));
    let err = factory.create_connection(already_secure).unwrap_err();
    assert!(matches!(err, TransportError::Configuration(_)));
}

#[test]
fn client_role_factory_uses_default_context() {
    let factory = ConnectionFactory::builder()
        .with_defaults()
        .tls(TlsSettings::client(None))
        .build()
        .unwrap();

    let (raw, _peer) = MemorySession::pair(PIPE_CAPACITY);
    let raw = raw.with_peer_addr("127.0.0.1:443".parse().unwrap());
    let connection = factory.create_connection(raw).unwrap();
    let decoration = connection.raw_session().attributes().get::<TlsDecoration>().unwrap();
    assert_eq!(decoration.role, nio_http::tls::TlsRole::Client);
}

#[test]
fn production_failure_after_head_closes_connection() {
    let factory = plain_factory();
    let (server_raw, mut client) = MemorySession::pair(PIPE_CAPACITY);
    let mut connection = factory.create_connection(server_raw).unwrap();

    write_all(&mut client, b"GET /broken HTTP/1.1\r\n\r\n");
    expect_request(&mut connection);

    let (entity, failed, released) = CountingEntity::new(FailAt::MidBody, true);
    let err = connection
        .submit_response(BasicResponseProducer::ok(entity))
        .unwrap_err();
    assert!(matches!(err, TransportError::ProductionFailure(_)));
    assert!(!connection.is_open());
    assert_eq!(connection.state(), ConnectionState::Closed);
    assert!(!connection.exchange_in_progress());
    assert_eq!(failed.load(Ordering::SeqCst), 1);
    assert_eq!(released.load(Ordering::SeqCst), 1);

    let err = connection
        .submit_response(BasicResponseProducer::text(StatusCode::OK, "second"))
        .unwrap_err();
    assert!(matches!(err, TransportError::ConnectionClosed));
    assert!(matches!(connection.poll_output(), Err(TransportError::ConnectionClosed)));
}

#[test]
fn failure_at_stream_start_discards_head_and_keeps_connection() {
    let factory = plain_factory();
    let (server_raw, mut client) = MemorySession::pair(PIPE_CAPACITY);
    let mut connection = factory.create_connection(server_raw).unwrap();

    write_all(&mut client, b"GET /unavailable HTTP/1.1\r\n\r\n");
    expect_request(&mut connection);

    let (entity, failed, released) = CountingEntity::new(FailAt::Start, true);
    let err = connection
        .submit_response(BasicResponseProducer::ok(entity))
        .unwrap_err();
    assert!(matches!(err, TransportError::ProductionFailure(_)));
    assert_eq!(failed.load(Ordering::SeqCst), 1);
    assert_eq!(released.load(Ordering::SeqCst), 1);
    assert!(read_available(&mut client).is_empty());

    assert_serves_next(&mut connection, &mut client);
}

#[test]
fn rejected_response_head_keeps_connection() {
    let factory = plain_factory();
    let (server_raw, mut client) = MemorySession::pair(PIPE_CAPACITY);
    let mut connection = factory.create_connection(server_raw).unwrap();

    write_all(&mut client, b"GET /preset HTTP/1.1\r\n\r\n");
    expect_request(&mut connection);

    // Framing headers are owned by the connection; a preset one is refused.
    let response = Response::new(StatusCode::OK)
        .with_header(CONTENT_LENGTH, HeaderValue::from_static("3"));
    let entity = BytesEntityProducer::text("abc", ContentType::TEXT_PLAIN);
    let err = connection
        .submit_response(BasicResponseProducer::new(response, Some(Box::new(entity))))
        .unwrap_err();
    assert!(matches!(err, TransportError::Protocol(_)));
    assert!(err.is_fatal());
    assert!(read_available(&mut client).is_empty());

    assert_serves_next(&mut connection, &mut client);
}

#[test]
fn handshake_failure_releases_pending_response() {
    let cert = localhost_cert();
    let factory = ConnectionFactory::builder()
        .with_defaults()
        .tls(TlsSettings::server(TlsContext::server(server_config(&cert))))
        .build()
        .unwrap();
    let (server_raw, mut client) = MemorySession::pair(PIPE_CAPACITY);
    let mut connection = factory.create_connection(server_raw).unwrap();

    let (entity, failed, released) = CountingEntity::new(FailAt::Never, true);
    let output = connection.submit_response(BasicResponseProducer::ok(entity)).unwrap();
    assert_eq!(output, Output::Blocked);
    assert!(connection.exchange_in_progress());

    // Plaintext where a ClientHello belongs.
    write_all(&mut client, b"GET / HTTP/1.1\r\n\r\n");
    let err = connection.poll_output().unwrap_err();
    assert!(matches!(err, TransportError::HandshakeFailure(_)));
    assert!(!connection.is_open());
    assert!(!connection.exchange_in_progress());
    assert_eq!(failed.load(Ordering::SeqCst), 1);
    assert_eq!(released.load(Ordering::SeqCst), 1);

    drop(connection);
    assert_eq!(released.load(Ordering::SeqCst), 1);
}

#[test]
fn close_aborts_in_flight_response_once() {
    let factory = plain_factory();
    let (server_raw, mut client) = MemorySession::pair(PIPE_CAPACITY);
    let mut connection = factory.create_connection(server_raw).unwrap();

    write_all(&mut client, b"GET /slow HTTP/1.1\r\n\r\n");
    expect_request(&mut connection);

    let (entity, failed, released) = CountingEntity::new(FailAt::Never, false);
    let output = connection.submit_response(BasicResponseProducer::ok(entity)).unwrap();
    assert_eq!(output, Output::Waiting);
    assert!(connection.exchange_in_progress());

    // A second response cannot start while the first is in flight.
    let (other, other_failed, _) = CountingEntity::new(FailAt::Never, true);
    let err = connection.submit_response(BasicResponseProducer::ok(other)).unwrap_err();
    assert!(matches!(err, TransportError::Protocol(_)));
    assert_eq!(other_failed.load(Ordering::SeqCst), 1);
    assert!(connection.is_open());

    connection.close();
    connection.close();
    assert_eq!(connection.state(), ConnectionState::Closed);
    assert_eq!(failed.load(Ordering::SeqCst), 1);
    assert_eq!(released.load(Ordering::SeqCst), 1);

    let err = connection
        .submit_response(BasicResponseProducer::empty(StatusCode::OK))
        .unwrap_err();
    assert!(matches!(err, TransportError::ConnectionClosed));
    drop(connection);
    assert_eq!(released.load(Ordering::SeqCst), 1);

    // The head was flushed before close; then the peer sees EOF.
    let (head, _) = split_response(&read_available(&mut client));
    assert_eq!(header(&head, "transfer-encoding"), Some("chunked"));
}

#[test]
fn header_limits_close_the_connection() {
    let factory = ConnectionFactory::builder()
        .with_defaults()
        .limits(MessageLimits {
            max_header_count: 2,
            max_line_length: 64,
        })
        .build()
        .unwrap();
    let (server_raw, mut client) = MemorySession::pair(PIPE_CAPACITY);
    let mut connection = factory.create_connection(server_raw).unwrap();

    write_all(
        &mut client,
        b"GET / HTTP/1.1\r\nA: 1\r\nB: 2\r\nC: 3\r\nD: 4\r\n\r\n",
    );
    let err = connection.read_request().unwrap_err();
    assert!(matches!(err, TransportError::Protocol(_)));
    assert!(!connection.is_open());
    assert!(matches!(connection.read_request(), Err(TransportError::ConnectionClosed)));
}

#[test]
fn unterminated_head_over_limit_is_rejected() {
    let factory = ConnectionFactory::builder()
        .with_defaults()
        .limits(MessageLimits {
            max_header_count: 1,
            max_line_length: 32,
        })
        .build()
        .unwrap();
    let (server_raw, mut client) = MemorySession::pair(PIPE_CAPACITY);
    let mut connection = factory.create_connection(server_raw).unwrap();

    write_all(&mut client, &[b'a'; 200]);
    let err = connection.read_request().unwrap_err();
    assert!(matches!(err, TransportError::Protocol(_)));
    assert_eq!(connection.state(), ConnectionState::Closed);
}

#[test]
fn peer_close_ends_idle_connection() {
    let factory = plain_factory();
    let (server_raw, mut client) = MemorySession::pair(PIPE_CAPACITY);
    let mut connection = factory.create_connection(server_raw).unwrap();

    client.close();
    assert!(matches!(connection.read_request().unwrap(), Inbound::Closed));
    assert_eq!(connection.state(), ConnectionState::Closed);
}

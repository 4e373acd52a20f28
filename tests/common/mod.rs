//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use nio_http::session::{IoSession, MemorySession};
use nio_http::tls::{SecureSession, TlsContext, TlsRole};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use rustls::{ClientConfig, RootCertStore, ServerConfig};

/// Pipe capacity large enough for a full TLS flight.
pub const PIPE_CAPACITY: usize = 64 * 1024;

/// Self-signed certificate for `localhost`.
pub struct TestCert {
    pub cert: CertificateDer<'static>,
    pub cert_pem: String,
    pub key_der: Vec<u8>,
    pub key_pem: String,
}

pub fn localhost_cert() -> TestCert {
    let certified = rcgen::generate_simple_self_signed(vec!["localhost".to_string()])
        .expect("generate certificate");
    TestCert {
        cert: certified.cert.der().clone(),
        cert_pem: certified.cert.pem(),
        key_der: certified.key_pair.serialize_der(),
        key_pem: certified.key_pair.serialize_pem(),
    }
}

fn provider() -> Arc<rustls::crypto::CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}

pub fn server_config(cert: &TestCert) -> Arc<ServerConfig> {
    let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(cert.key_der.clone()));
    let config = ServerConfig::builder_with_provider(provider())
        .with_safe_default_protocol_versions()
        .expect("protocol versions")
        .with_no_client_auth()
        .with_single_cert(vec![cert.cert.clone()], key)
        .expect("server certificate");
    Arc::new(config)
}

/// Client configuration trusting exactly `trusted`.
pub fn client_config(trusted: &[&TestCert]) -> Arc<ClientConfig> {
    let mut roots = RootCertStore::empty();
    for cert in trusted {
        roots.add(cert.cert.clone()).expect("trust anchor");
    }
    let config = ClientConfig::builder_with_provider(provider())
        .with_safe_default_protocol_versions()
        .expect("protocol versions")
        .with_root_certificates(roots)
        .with_no_client_auth();
    Arc::new(config)
}

/// Client-role secure session over `raw`, verifying the name `localhost`.
pub fn tls_client(raw: MemorySession, config: Arc<ClientConfig>) -> SecureSession<MemorySession> {
    let context = TlsContext::client(config)
        .with_server_name("localhost")
        .expect("server name");
    let mut session = SecureSession::new(raw, context, None);
    session.bind(TlsRole::Client).expect("bind client");
    session
}

/// Write PEM files for `cert` into `dir`.
pub fn write_pem_files(dir: &Path, cert: &TestCert) -> (PathBuf, PathBuf) {
    let cert_path = dir.join("cert.pem");
    let key_path = dir.join("key.pem");
    std::fs::write(&cert_path, &cert.cert_pem).expect("write cert");
    std::fs::write(&key_path, &cert.key_pem).expect("write key");
    (cert_path, key_path)
}

/// Write all of `data`, failing if the session would block.
pub fn write_all<S: IoSession + ?Sized>(session: &mut S, mut data: &[u8]) {
    while !data.is_empty() {
        let n = session.write(data).expect("write");
        data = &data[n..];
    }
}

/// Read whatever is available right now.
pub fn read_available<S: IoSession + ?Sized>(session: &mut S) -> Vec<u8> {
    let mut out = Vec::new();
    let mut buf = [0u8; 4096];
    loop {
        match session.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => out.extend_from_slice(&buf[..n]),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
            Err(e) => panic!("read failed: {e}"),
        }
    }
    out
}

/// Split a raw response into its head text and body bytes.
pub fn split_response(raw: &[u8]) -> (String, Vec<u8>) {
    let end = raw
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .expect("complete response head");
    let head = String::from_utf8(raw[..end].to_vec()).expect("ascii head");
    (head, raw[end + 4..].to_vec())
}

/// Case-insensitive header lookup in a raw head.
pub fn header<'a>(head: &'a str, name: &str) -> Option<&'a str> {
    head.lines().skip(1).find_map(|line| {
        let (n, v) = line.split_once(':')?;
        n.eq_ignore_ascii_case(name).then(|| v.trim())
    })
}

/// Decode a chunked body, returning the payload.
pub fn dechunk(mut body: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    loop {
        let line_end = body.windows(2).position(|w| w == b"\r\n").expect("chunk size line");
        let size_text = std::str::from_utf8(&body[..line_end]).expect("hex size");
        let size = usize::from_str_radix(size_text.trim(), 16).expect("chunk size");
        body = &body[line_end + 2..];
        if size == 0 {
            assert_eq!(body, b"\r\n", "terminating CRLF");
            return out;
        }
        out.extend_from_slice(&body[..size]);
        assert_eq!(&body[size..size + 2], b"\r\n");
        body = &body[size + 2..];
    }
}

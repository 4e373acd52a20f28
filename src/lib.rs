//! Non-blocking HTTP/1.1 transport core.
//!
//! Sessions (plain or TLS-decorated) are bound to connections by a
//! [`ConnectionFactory`]; responses are streamed from pull-based producers and
//! decorated by an ordered interceptor pipeline.

pub mod config;
pub mod error;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod protocol;
pub mod server;
pub mod session;
pub mod tls;

pub use config::NioConfig;
pub use error::TransportError;
pub use lifecycle::Shutdown;
pub use net::{Connection, ConnectionFactory, TlsSettings};
pub use server::HttpServer;

//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (accept loop, connection limits)
//!     → factory.rs (optional TLS decoration, collaborators)
//!     → connection.rs (request heads in, framed responses out)
//!
//! Connection States:
//!     Active → Closed
//! ```
//!
//! # Design Decisions
//! - Bounded accept queue prevents resource exhaustion
//! - Each connection tracked for graceful shutdown
//! - TLS is optional and handled transparently below the connection

pub mod buffer;
pub mod connection;
pub mod factory;
pub mod listener;

pub use buffer::{BufferAllocator, HeapAllocator};
pub use connection::{
    BoundSession, Connection, ConnectionId, ConnectionSettings, ConnectionState, Inbound, Output,
};
pub use factory::{ConnectionFactory, ConnectionFactoryBuilder, TlsSettings};
pub use listener::{ConnectionPermit, ConnectionTracker, Listener, ListenerError};

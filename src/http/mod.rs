//! HTTP message model and body streaming.
//!
//! # Data Flow
//! ```text
//! session bytes
//!     → head.rs (request line + header block, bounded by MessageLimits)
//!     → request.rs (RequestFactory builds the Request)
//!     → [application picks a ResponseProducer]
//!     → producer.rs (response head + optional entity)
//!     → entity.rs (pull-based body production against a DataStreamChannel)
//!     → head.rs (status line + headers onto the wire)
//! ```

pub mod entity;
pub mod head;
pub mod message;
pub mod producer;
pub mod request;
pub mod response;

pub use entity::{
    AsyncEntityProducer, BasicEntityDetails, BytesEntityProducer, ChunkedEntityProducer,
    ContentType, DataStreamChannel, EntityDetails,
};
pub use head::MessageLimits;
pub use message::HttpMessage;
pub use producer::{BasicResponseProducer, ResponseProducer, StreamPhase};
pub use request::{DefaultRequestFactory, Request, RequestFactory};
pub use response::Response;

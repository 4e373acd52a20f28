//! Response producers: a response head plus an optional body source.
//!
//! # Responsibilities
//! - Hand the response head to the connection
//! - Adapt an entity producer's lifecycle to the connection's write path
//! - Release the entity producer exactly once, on every exit path
//!
//! # Design Decisions
//! - A response without a producer is bodiless; that case is handled once,
//!   in [`BasicResponseProducer::step`], not at each call site
//! - `produce` after `release_resources` is rejected, never forwarded

use http::StatusCode;

use super::entity::{
    AsyncEntityProducer, BasicEntityDetails, BytesEntityProducer, ContentType, DataStreamChannel,
};
use super::response::Response;
use crate::error::TransportError;

/// Source of one response, driven by the connection.
pub trait ResponseProducer: Send {
    /// The response head to transmit.
    fn produce_response(&mut self) -> Response;

    /// Details of the body, or `None` for a bodiless response.
    fn entity_details(&self) -> Option<BasicEntityDetails>;

    /// Called once when the connection is ready to stream the body.
    fn data_start(&mut self, channel: &mut dyn DataStreamChannel) -> Result<(), TransportError>;

    /// Bytes that could be produced right now; 0 means "not ready yet".
    fn available(&self) -> usize;

    fn produce(&mut self, channel: &mut dyn DataStreamChannel) -> Result<(), TransportError>;

    /// Abort production. Always releases resources.
    fn failed(&mut self, cause: &TransportError);

    /// Release the body source. Safe to call more than once.
    fn release_resources(&mut self);
}

/// Lifecycle of one production cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamPhase {
    /// `data_start` not yet called.
    Idle,
    Producing,
    /// End of stream was signalled.
    Completed,
    /// Production raised an error or was aborted.
    Failed,
    /// Resources released; no further production allowed.
    Released,
}

/// Response head paired with an optional [`AsyncEntityProducer`].
pub struct BasicResponseProducer {
    response: Response,
    entity: Option<Box<dyn AsyncEntityProducer>>,
    phase: StreamPhase,
}

impl BasicResponseProducer {
    pub fn new(response: Response, entity: Option<Box<dyn AsyncEntityProducer>>) -> Self {
        Self {
            response,
            entity,
            phase: StreamPhase::Idle,
        }
    }

    pub fn with_status(status: StatusCode, entity: impl AsyncEntityProducer + 'static) -> Self {
        Self::new(Response::new(status), Some(Box::new(entity)))
    }

    /// `200 OK` with the given body.
    pub fn ok(entity: impl AsyncEntityProducer + 'static) -> Self {
        Self::with_status(StatusCode::OK, entity)
    }

    /// Plain-text body, `text/plain; charset=UTF-8`.
    pub fn text(status: StatusCode, text: &str) -> Self {
        Self::with_status(status, BytesEntityProducer::text(text, ContentType::TEXT_PLAIN))
    }

    /// Response with no body at all.
    pub fn empty(status: StatusCode) -> Self {
        Self::new(Response::new(status), None)
    }

    pub fn phase(&self) -> StreamPhase {
        self.phase
    }

    /// Run one step against the entity producer, tracking end of stream.
    fn step<F>(&mut self, channel: &mut dyn DataStreamChannel, step: F) -> Result<(), TransportError>
    where
        F: FnOnce(&mut dyn AsyncEntityProducer, &mut dyn DataStreamChannel) -> Result<(), TransportError>,
    {
        let Some(entity) = self.entity.as_deref_mut() else {
            return Ok(());
        };

        let mut tracked = TrackingChannel {
            inner: channel,
            ended: false,
        };
        match step(entity, &mut tracked) {
            Ok(()) => {
                if tracked.ended {
                    self.phase = StreamPhase::Completed;
                }
                Ok(())
            }
            Err(e) => {
                self.phase = StreamPhase::Failed;
                Err(match e {
                    TransportError::ProductionFailure(_) => e,
                    other => TransportError::ProductionFailure(other.to_string()),
                })
            }
        }
    }

    fn ensure_not_released(&self, call: &str) -> Result<(), TransportError> {
        if self.phase == StreamPhase::Released {
            return Err(TransportError::protocol(format!("{call} called after release_resources")));
        }
        Ok(())
    }
}

impl ResponseProducer for BasicResponseProducer {
    fn produce_response(&mut self) -> Response {
        self.response.clone()
    }

    fn entity_details(&self) -> Option<BasicEntityDetails> {
        self.entity.as_deref().map(BasicEntityDetails::of)
    }

    fn data_start(&mut self, channel: &mut dyn DataStreamChannel) -> Result<(), TransportError> {
        self.ensure_not_released("data_start")?;
        if self.phase != StreamPhase::Idle {
            return Err(TransportError::protocol("data stream already started"));
        }
        self.phase = StreamPhase::Producing;
        self.step(channel, |entity, ch| entity.stream_start(ch))
    }

    fn available(&self) -> usize {
        match self.phase {
            StreamPhase::Idle | StreamPhase::Producing => {
                self.entity.as_ref().map_or(0, |entity| entity.available())
            }
            StreamPhase::Completed | StreamPhase::Failed | StreamPhase::Released => 0,
        }
    }

    fn produce(&mut self, channel: &mut dyn DataStreamChannel) -> Result<(), TransportError> {
        self.ensure_not_released("produce")?;
        match self.phase {
            StreamPhase::Completed | StreamPhase::Failed => Ok(()),
            _ => {
                self.phase = StreamPhase::Producing;
                self.step(channel, |entity, ch| entity.produce(ch))
            }
        }
    }

    fn failed(&mut self, cause: &TransportError) {
        tracing::debug!(error = %cause, phase = ?self.phase, "Response production aborted");
        if self.phase != StreamPhase::Released {
            if let Some(entity) = self.entity.as_mut() {
                entity.failed(cause);
            }
            self.phase = StreamPhase::Failed;
        }
        self.release_resources();
    }

    fn release_resources(&mut self) {
        if self.phase == StreamPhase::Released {
            return;
        }
        if let Some(entity) = self.entity.as_mut() {
            entity.release_resources();
        }
        self.phase = StreamPhase::Released;
    }
}

impl std::fmt::Debug for BasicResponseProducer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BasicResponseProducer")
            .field("status", &self.response.status())
            .field("has_entity", &self.entity.is_some())
            .field("phase", &self.phase)
            .finish()
    }
}

/// Pass-through channel that remembers whether the stream was ended.
struct TrackingChannel<'a> {
    inner: &'a mut dyn DataStreamChannel,
    ended: bool,
}

impl DataStreamChannel for TrackingChannel<'_> {
    fn capacity(&self) -> usize {
        if self.ended {
            0
        } else {
            self.inner.capacity()
        }
    }

    fn write(&mut self, src: &[u8]) -> Result<usize, TransportError> {
        if self.ended {
            return Err(TransportError::protocol("write after end of stream"));
        }
        self.inner.write(src)
    }

    fn request_output(&mut self) {
        self.inner.request_output();
    }

    fn end_stream(&mut self) -> Result<(), TransportError> {
        if self.ended {
            return Ok(());
        }
        self.inner.end_stream()?;
        self.ended = true;
        Ok(())
    }
}

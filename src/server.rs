//! HTTP server: accept loop plus one driving task per connection.
//!
//! # Responsibilities
//! - Accept sessions and hand them to the connection factory
//! - Drive each connection: await readiness, read heads, pump responses
//! - Close idle connections and drain on shutdown

use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use http::StatusCode;
use tokio::io::Interest;
use tokio::sync::broadcast;

use crate::error::TransportError;
use crate::http::{BasicResponseProducer, ChunkedEntityProducer, ContentType, Request};
use crate::lifecycle::Shutdown;
use crate::net::{Connection, ConnectionFactory, ConnectionId, Inbound, Listener, ListenerError, Output};
use crate::session::TcpSession;

/// How long a response whose producer has nothing ready sleeps between polls.
const PRODUCER_POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Maps a request head to the response that answers it.
pub trait RequestHandler: Send + Sync + 'static {
    fn handle(&self, request: &Request) -> BasicResponseProducer;
}

/// Describes each request back to the client.
///
/// `GET /stream` answers with a chunked body; everything else gets a
/// fixed-length text body.
#[derive(Debug, Default, Clone, Copy)]
pub struct EchoHandler;

impl RequestHandler for EchoHandler {
    fn handle(&self, request: &Request) -> BasicResponseProducer {
        if request.uri().path() == "/stream" {
            let chunks = (1..=3).map(|i| Bytes::from(format!("chunk {i}\n")));
            return BasicResponseProducer::ok(ChunkedEntityProducer::new(chunks, ContentType::TEXT_PLAIN));
        }
        BasicResponseProducer::text(
            StatusCode::OK,
            &format!("{} {}\n", request.method(), request.uri()),
        )
    }
}

/// Listener, factory and handler wired together.
pub struct HttpServer {
    listener: Listener,
    factory: Arc<ConnectionFactory>,
    handler: Arc<dyn RequestHandler>,
    idle_timeout: Duration,
}

impl HttpServer {
    pub fn new(
        listener: Listener,
        factory: ConnectionFactory,
        handler: Arc<dyn RequestHandler>,
        idle_timeout: Duration,
    ) -> Self {
        Self {
            listener,
            factory: Arc::new(factory),
            handler,
            idle_timeout,
        }
    }

    pub fn listener(&self) -> &Listener {
        &self.listener
    }

    /// Run the server, accepting connections until shutdown is triggered.
    pub async fn run(self, shutdown: &Shutdown) -> Result<(), ListenerError> {
        let mut stop = shutdown.subscribe();
        tracing::info!(tls = self.factory.is_tls(), "HTTP server starting");

        loop {
            tokio::select! {
                _ = stop.recv() => {
                    tracing::info!("Shutdown signal received, no longer accepting");
                    break;
                }
                accepted = self.listener.accept() => {
                    let (session, permit) = match accepted {
                        Ok(accepted) => accepted,
                        Err(ListenerError::Accept(e)) => {
                            tracing::warn!(error = %e, "Accept failed");
                            continue;
                        }
                        Err(e) => return Err(e),
                    };

                    let connection = match self.factory.create_connection(session) {
                        Ok(connection) => connection,
                        Err(e) => {
                            tracing::warn!(error = %e, "Failed to create connection");
                            continue;
                        }
                    };

                    let handler = Arc::clone(&self.handler);
                    let idle_timeout = self.idle_timeout;
                    let stop = shutdown.subscribe();
                    tokio::spawn(async move {
                        let _permit = permit;
                        let id = connection.id();
                        if let Err(e) = serve_connection(connection, handler, idle_timeout, stop).await {
                            tracing::debug!(connection_id = %id, error = %e, "Connection ended with error");
                        }
                    });
                }
            }
        }

        let tracker = self.listener.tracker().clone();
        if tokio::time::timeout(self.idle_timeout, tracker.wait_idle()).await.is_err() {
            tracing::warn!(remaining = tracker.active_count(), "Drain timed out");
        }
        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

/// Drive one connection until the peer leaves, it idles out or shutdown.
pub async fn serve_connection(
    mut connection: Connection<TcpSession>,
    handler: Arc<dyn RequestHandler>,
    idle_timeout: Duration,
    mut stop: broadcast::Receiver<()>,
) -> Result<(), TransportError> {
    loop {
        match connection.read_request()? {
            Inbound::Message(request) => {
                let mut output = connection.submit_response(handler.handle(&request))?;
                // Start of the current stall and the body length when it began.
                let mut stalled: Option<(Instant, Option<u64>)> = None;
                while output != Output::Idle {
                    match output {
                        Output::Blocked => {
                            stalled = None;
                            let session = connection.raw_session();
                            if !wait_ready(session, connection.id(), Interest::WRITABLE, idle_timeout, &mut stop)
                                .await?
                            {
                                connection.close();
                                return Ok(());
                            }
                        }
                        Output::Waiting => {
                            let written = connection.body_bytes_written();
                            let since = match stalled {
                                Some((since, at)) if at == written => since,
                                _ => {
                                    let now = Instant::now();
                                    stalled = Some((now, written));
                                    now
                                }
                            };
                            if since.elapsed() >= idle_timeout {
                                tracing::debug!(connection_id = %connection.id(), "Response producer stalled");
                                connection.close();
                                return Ok(());
                            }
                            if !pause(PRODUCER_POLL_INTERVAL, &mut stop).await {
                                connection.close();
                                return Ok(());
                            }
                        }
                        Output::Idle => {}
                    }
                    output = connection.poll_output()?;
                }
            }
            Inbound::NeedMore => {
                let interest = if connection.wants_write() {
                    Interest::READABLE | Interest::WRITABLE
                } else {
                    Interest::READABLE
                };
                let session = connection.raw_session();
                if !wait_ready(session, connection.id(), interest, idle_timeout, &mut stop).await? {
                    connection.close();
                    return Ok(());
                }
            }
            Inbound::Closed => {
                connection.close();
                return Ok(());
            }
        }
    }
}

/// `false` when the connection idled out or shutdown began.
async fn wait_ready(
    session: &TcpSession,
    connection_id: ConnectionId,
    interest: Interest,
    idle_timeout: Duration,
    stop: &mut broadcast::Receiver<()>,
) -> Result<bool, TransportError> {
    tokio::select! {
        ready = tokio::time::timeout(idle_timeout, session.ready(interest)) => match ready {
            Ok(Ok(_)) => Ok(true),
            Ok(Err(e)) => Err(e.into()),
            Err(_) => {
                tracing::debug!(connection_id = %connection_id, "Idle timeout");
                Ok(false)
            }
        },
        _ = stop.recv() => Ok(false),
    }
}

/// Sleep for `interval`; `false` if shutdown began first.
async fn pause(interval: Duration, stop: &mut broadcast::Receiver<()>) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(interval) => true,
        _ = stop.recv() => false,
    }
}

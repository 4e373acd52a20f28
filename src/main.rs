//! nio-http demo server.
//!
//! # Architecture Overview
//!
//! ```text
//!     Client                ┌──────────────────────────────────────────────┐
//!     ──────────────────────┼─▶ net::listener ─▶ net::factory ─┐           │
//!                           │                    (tls decorate) │           │
//!                           │                                   ▼           │
//!                           │   protocol (interceptors) ◀── net::connection │
//!                           │                                   │           │
//!     ◀─────────────────────┼──── framed response ◀── http::producer       │
//!                           │                                               │
//!                           │   config · observability · lifecycle          │
//!                           └──────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;

use nio_http::config::{load_config, NioConfig};
use nio_http::lifecycle::{shutdown_on_signal, Shutdown};
use nio_http::net::{ConnectionFactory, Listener, TlsSettings};
use nio_http::observability::{logging, metrics};
use nio_http::protocol::HttpProcessor;
use nio_http::server::{EchoHandler, HttpServer};
use nio_http::tls::{load_server_config, TlsContext, TlsRole};

#[derive(Parser)]
#[command(name = "nio-http")]
#[command(about = "Non-blocking HTTP/1.1 server with optional TLS", long_about = None)]
struct Cli {
    /// Path to a TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the listener bind address.
    #[arg(short, long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => NioConfig::default(),
    };
    if let Some(bind) = cli.bind {
        config.listener.bind_address = bind;
    }

    logging::init(&config.observability.log_level);
    tracing::info!("nio-http v{} starting", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        bind_address = %config.listener.bind_address,
        max_connections = config.listener.max_connections,
        idle_timeout_secs = config.listener.idle_timeout_secs,
        tls = config.tls.is_some(),
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let factory = build_factory(&config)?;
    let listener = Listener::bind(&config.listener).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let shutdown = Shutdown::new();
    let server = HttpServer::new(
        listener,
        factory,
        Arc::new(EchoHandler),
        Duration::from_secs(config.listener.idle_timeout_secs),
    );

    let signals = shutdown.clone();
    tokio::spawn(async move { shutdown_on_signal(&signals).await });

    server.run(&shutdown).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}

fn build_factory(config: &NioConfig) -> Result<ConnectionFactory, Box<dyn std::error::Error>> {
    let processor = HttpProcessor::server_default(concat!("nio-http/", env!("CARGO_PKG_VERSION")))?;
    let mut builder = ConnectionFactory::builder()
        .with_defaults()
        .processor(processor)
        .limits(config.limits.message_limits())
        .read_chunk_size(config.limits.socket_buffer_size)
        .output_buffer_size(config.limits.output_buffer_size);

    if let Some(tls) = &config.tls {
        let settings = match tls.role {
            TlsRole::Server => {
                let server_config = load_server_config(&tls.cert_path, &tls.key_path)?;
                TlsSettings::server(TlsContext::server(server_config))
            }
            TlsRole::Client => TlsSettings::client(None),
        };
        builder = builder.tls(settings);
    }

    Ok(builder.build()?)
}

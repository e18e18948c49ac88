//! ESI Cache - Edge Side Includes processor in front of an origin server

use anyhow::{Context, Result};
use clap::Parser;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::fs::OpenOptions;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

mod config;

use config::{Config, LogFormat, LoggingConfig};
use esi_api::{AppState, create_router};
use esi_core::{EsiProcessor, ProcessOptions, TracingSink, WriterSink};
use esi_proxy::{DEFAULT_USER_AGENT, HttpClient, HttpClientConfig, ReqwestClient};

/// ESI Cache - resolves Edge Side Includes in pages served by an origin
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "config/default.toml")]
    config: String,

    /// Bind address
    #[arg(long, env = "ESI_CACHE_BIND")]
    bind: Option<String>,

    /// Port
    #[arg(short, long, env = "ESI_CACHE_PORT")]
    port: Option<u16>,

    /// Origin URL
    #[arg(long, env = "ESI_CACHE_ORIGIN")]
    origin: Option<String>,

    /// Process this file once, print the result and exit
    #[arg(long, value_name = "FILE")]
    render: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    // Load configuration
    let mut config = Config::load(&args.config)?;
    if let Some(origin) = args.origin {
        config.origin.url = origin;
    }
    config.validate()?;

    // Initialize logging
    init_logging(&config.logging);

    info!("Starting ESI Cache v{}", env!("CARGO_PKG_VERSION"));

    let user_agent = config
        .http
        .user_agent
        .clone()
        .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string());

    // Initialize upstream client
    let client: Arc<dyn HttpClient> = Arc::new(ReqwestClient::new(HttpClientConfig {
        timeout: config.timeout(),
        user_agent: user_agent.clone(),
        skip_tls_verify: config.http.skip_tls_verify,
    })?);

    let processor = build_processor(&config, client.clone(), user_agent)?;

    if let Some(path) = args.render {
        let html = tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let output = processor.process(&html, &ProcessOptions::new()).await;
        println!("{}", output);
        return Ok(());
    }

    // Initialize metrics
    let metrics_handle = PrometheusBuilder::new()
        .install_recorder()
        .context("Failed to install Prometheus recorder")?;

    // Create application state
    let state = AppState::new(
        processor,
        client,
        &config.origin.url,
        &config.esi.forward_headers,
    );

    // Create router
    let app = create_router(state, Some(Arc::new(metrics_handle)))
        .layer(TraceLayer::new_for_http());

    // Determine bind address
    let bind_addr = args.bind.unwrap_or(config.server.bind_address.clone());
    let port = args.port.unwrap_or(config.server.port);
    let addr: SocketAddr = format!("{}:{}", bind_addr, port).parse()?;

    info!("Listening on {}", addr);
    info!("Origin: {}", config.origin.url);

    // Start server
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped");
    Ok(())
}

/// Build the include processor from configuration
fn build_processor(
    config: &Config,
    client: Arc<dyn HttpClient>,
    user_agent: String,
) -> Result<EsiProcessor> {
    let mut builder = EsiProcessor::builder()
        .base_url(config.base_url())
        .max_depth(config.esi.max_depth)
        .http_client(client)
        .user_agent(user_agent);

    if let Some(hosts) = &config.esi.allowed_hosts {
        builder = builder.allowed_host_entries(hosts.iter().cloned());
    }

    if !config.esi.cache_enabled {
        builder = builder.disable_cache();
    }

    builder = match &config.logging.log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file: {}", path))?;
            builder.log_to(Arc::new(WriterSink::new(file)))
        }
        None => builder.log_to(Arc::new(TracingSink)),
    };

    builder.build().context("Failed to create ESI processor")
}

/// Initialize logging
///
/// Output goes to stderr so that `--render` keeps stdout for the page.
fn init_logging(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.level));

    match config.format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .with(filter)
            .init(),
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(fmt::layer().with_writer(std::io::stderr))
            .with(filter)
            .init(),
    }
}

/// Wait for shutdown signal
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

//! Crystal Gateway - filter layer host
//!
//! Runs the filter layer for one tier in front of an upstream object-store
//! endpoint. Filters run in a remote sandbox; chains and definitions are read
//! from the metadata store.

mod sandbox;
mod settings;
mod upstream;

use anyhow::Result;
use axum::{
    Router,
    extract::DefaultBodyLimit,
    http::{StatusCode, header},
    middleware,
    response::IntoResponse,
    routing::get,
};
use clap::Parser;
use crystal_common::Tier;
use crystal_meta_store::RedisMetadataStore;
use crystal_middleware::{FilterLayer, filter_layer, filter_metrics};
use sandbox::HttpFilterGateway;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use upstream::{METADATA_ENDPOINT, Upstream, UpstreamMetadataWriter};

/// Prometheus metrics endpoint handler
async fn metrics_handler() -> impl IntoResponse {
    let metrics = filter_metrics().export_prometheus();
    (
        StatusCode::OK,
        [(
            header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        metrics,
    )
}

async fn health_check() -> &'static str {
    "OK"
}

#[derive(Parser, Debug)]
#[command(name = "crystal-gateway")]
#[command(about = "Crystal filter layer gateway")]
#[command(version)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "/etc/crystal/gateway.toml")]
    config: String,

    /// Listen address
    #[arg(short, long, default_value = "0.0.0.0:8080")]
    listen: String,

    /// Upstream object-store endpoint
    #[arg(long, env = "CRYSTAL_UPSTREAM", default_value = "http://localhost:6000")]
    upstream: String,

    /// Execution tier, overrides the config file
    #[arg(long)]
    tier: Option<Tier>,

    /// Filter gateway settings file (flat or `[DEFAULT]` section)
    #[arg(long)]
    gateway_config: Option<String>,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| args.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load config, CLI takes precedence
    let mut config = settings::load_config(&args.config)?;
    if let Some(tier) = args.tier {
        config.execution_tier = tier;
    }
    if let Some(path) = &args.gateway_config {
        config.merge_gateway(settings::load_gateway_settings(path)?);
    }

    info!("Starting Crystal Gateway");
    info!("Config file: {}", args.config);
    info!("Execution tier: {}", config.execution_tier);
    info!("Upstream endpoint: {}", args.upstream);

    let store = RedisMetadataStore::connect(&config.metadata_store)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to connect to metadata store: {}", e))?;
    let gateway = HttpFilterGateway::from_config(&config)?;
    info!("Filter sandbox: {}", gateway.url());

    let http_client = reqwest::Client::new();
    let metadata_endpoint = config
        .gateway
        .get(METADATA_ENDPOINT)
        .cloned()
        .unwrap_or_else(|| args.upstream.clone());
    info!("Metadata endpoint: {}", metadata_endpoint);
    let writer = UpstreamMetadataWriter::new(http_client.clone(), &metadata_endpoint);
    let upstream = Arc::new(Upstream::new(
        http_client,
        &args.upstream,
        config.max_body_bytes,
    ));

    let body_limit = DefaultBodyLimit::max(config.max_body_bytes);
    let layer = Arc::new(FilterLayer::new(
        config,
        Arc::new(store),
        Arc::new(gateway),
        Arc::new(writer),
    ));

    // Build router
    let app = Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/health", get(health_check))
        .fallback(upstream::forward)
        .layer(body_limit)
        .layer(middleware::from_fn_with_state(layer, filter_layer))
        .layer(TraceLayer::new_for_http())
        .with_state(upstream);

    let addr: SocketAddr = args
        .listen
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid listen address {}: {}", args.listen, e))?;
    info!("Starting filter layer on {}", addr);

    // Start server
    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            info!("Shutting down");
        })
        .await?;

    Ok(())
}

//! safesendd: grant broker for end-to-end encrypted file sharing
//!
//! Usage:
//!   safesendd [--config /etc/safesend/config.toml] [--log info] [--log-format json|text]
//!
//! The broker hands out five-minute presigned S3 URLs and fresh server
//! secrets to allow-listed origins. It never sees plaintext, the client
//! secret, or the derived key.

mod broker;
mod metrics;
mod origin;
mod response;
mod routes;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use prometheus_client::registry::Registry;
use safesend_core::config::SafesendConfig;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::broker::ObjectBroker;
use crate::metrics::{BrokerMetrics, HealthState};
use crate::origin::OriginGuard;

#[derive(Parser, Debug)]
#[command(name = "safesendd", version, about = "SafeSend grant broker")]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(
        long,
        short = 'c',
        env = "SAFESEND_CONFIG",
        default_value = "/etc/safesend/config.toml"
    )]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error); overrides broker.log_level
    #[arg(long, env = "SAFESEND_LOG")]
    log: Option<String>,

    /// Log format; overrides broker.log_format
    #[arg(long, env = "SAFESEND_LOG_FORMAT")]
    log_format: Option<LogFormat>,
}

#[derive(Clone, Debug, ValueEnum)]
enum LogFormat {
    Json,
    Text,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_found = cli.config.exists();
    let config = SafesendConfig::load(&cli.config)?;

    let level = cli.log.clone().unwrap_or_else(|| config.broker.log_level.clone());
    let format = cli.log_format.clone().unwrap_or(match config.broker.log_format.as_str() {
        "text" => LogFormat::Text,
        _ => LogFormat::Json,
    });
    init_logging(&level, &format);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %cli.config.display(),
        "safesendd starting"
    );
    if !config_found {
        warn!(
            "config file not found: {}  (using defaults)",
            cli.config.display()
        );
    }

    if let Err(e) = config.validate_broker() {
        error!("{e}");
        return Err(e).context("refusing to start");
    }

    run(config).await
}

async fn run(config: SafesendConfig) -> Result<()> {
    let op = safesend_storage::build_operator_from_env(&config.storage)
        .context("storage destination is misconfigured")?;

    // Presigning is local, so an unreachable bucket is not fatal here
    match safesend_storage::probe_bucket(&op).await {
        Ok(()) => info!(
            endpoint = %config.storage.endpoint,
            bucket = %config.storage.bucket,
            "storage: connected"
        ),
        Err(e) => warn!(endpoint = %config.storage.endpoint, "storage: {e}"),
    }

    let mut registry = Registry::default();
    let metrics = BrokerMetrics::new(&mut registry);

    if let Some(addr) = config.broker.metrics_addr.clone() {
        let state = HealthState {
            registry: Arc::new(registry),
            operator: Some(op.clone()),
        };
        tokio::spawn(async move {
            if let Err(e) = crate::metrics::serve(addr, state).await {
                error!("metrics server failed: {e}");
            }
        });
    }

    let broker = Arc::new(ObjectBroker::new(
        Arc::new(op),
        OriginGuard::new(config.broker.allowed_origins.clone()),
        &config.storage.object_prefix,
        config.storage.max_payload_bytes,
        config.crypto.segment_size,
        metrics,
    ));

    let listener = tokio::net::TcpListener::bind(&config.broker.listen)
        .await
        .with_context(|| format!("binding {}", config.broker.listen))?;

    info!(
        addr = %config.broker.listen,
        origins = config.broker.allowed_origins.len(),
        max_payload_bytes = config.storage.max_payload_bytes,
        retention_days = config.storage.retention_days,
        "broker: listening on /generate-upload-url, /generate-download-url"
    );

    axum::serve(listener, routes::router(broker))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("broker server")?;

    info!("safesendd stopped");
    Ok(())
}

async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            warn!("registering SIGTERM handler: {e}");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
    info!("shutdown signal received, draining");
}

fn init_logging(level: &str, format: &LogFormat) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    match format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json())
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer())
                .init();
        }
    }
}

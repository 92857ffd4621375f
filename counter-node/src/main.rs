use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};

use counter_node::config::{split_csv, CounterConfig};
use counter_node::telemetry;
use counter_node::{api, HttpPeerClient, Node};

/// Grow-only distributed counter node
#[derive(Parser, Debug)]
#[command(name = "counterd", version, about, long_about = None)]
struct Cli {
    /// Configuration file, with or without extension
    #[arg(short, long, default_value = "config/counterd")]
    config: String,

    /// Listen address, e.g. `:8081`, `localhost:8081` or `127.0.0.1:8081`
    #[arg(long)]
    addr: Option<String>,

    /// Comma-separated seed nodes
    #[arg(long)]
    peers: Option<String>,

    /// Node identifier
    #[arg(long)]
    id: Option<String>,

    /// URL other nodes use to reach this one
    #[arg(long)]
    public_url: Option<String>,

    /// Print the effective configuration and exit
    #[arg(long)]
    print_config: bool,
}

impl Cli {
    fn apply_to(&self, config: &mut CounterConfig) {
        if let Some(addr) = &self.addr {
            config.node.listen_addr = addr.clone();
        }
        if let Some(peers) = &self.peers {
            config.node.seeds = split_csv(peers);
        }
        if let Some(id) = &self.id {
            config.node.id = Some(id.clone());
        }
        if let Some(url) = &self.public_url {
            config.node.public_url = Some(url.clone());
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = CounterConfig::from_file(&cli.config)
        .with_context(|| format!("Failed to load configuration from {}", cli.config))?;
    let overrides = config
        .apply_env_overrides()
        .context("Invalid environment override")?;
    cli.apply_to(&mut config);
    config.validate().context("Invalid configuration")?;

    if cli.print_config {
        print!("{}", config.to_toml_string()?);
        return Ok(());
    }

    telemetry::init_tracing(&config.logging);
    info!("Starting counterd v{}", env!("CARGO_PKG_VERSION"));
    if !overrides.is_empty() {
        info!(variables = ?overrides, "Applied environment variable overrides");
    }

    if config.metrics.enabled {
        telemetry::install_prometheus(config.metrics_addr()?)?;
    }

    let identity = config.identity()?;
    let listen_addr = config.listen_addr()?;

    // Bind before bootstrap so seeds can reach us as soon as we join
    let listener = TcpListener::bind(listen_addr.as_str())
        .await
        .with_context(|| format!("Failed to bind {}", listen_addr))?;
    info!(
        node_id = %identity.id,
        public_url = %identity.addr,
        listen_addr = %listen_addr,
        "Listening"
    );

    let client = HttpPeerClient::new(config.request_timeout())?;
    let node = Arc::new(Node::new(identity, client, config.gossip_settings()));

    let report = node.bootstrap(&config.node.seeds).await;
    if !report.failed.is_empty() {
        warn!(failed = ?report.failed, "Some seeds were unreachable");
    }

    node.start().await;

    axum::serve(listener, api::router(Arc::clone(&node)))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server error")?;

    node.stop().await;
    info!("counterd stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}

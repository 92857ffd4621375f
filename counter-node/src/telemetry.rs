use metrics::{describe_counter, describe_gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;
use crate::error::{CounterError, Result};

/// Install the global tracing subscriber.
///
/// `RUST_LOG` wins over the configured level when set.
pub fn init_tracing(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true)
        .with_line_number(true);

    // A second init (tests, embedding) keeps the first subscriber
    let _ = if logging.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
}

/// Register descriptions for every metric the node emits
pub fn describe_metrics() {
    describe_counter!(
        "counter_local_increments_total",
        "Total number of local increments"
    );
    describe_counter!(
        "counter_updates_applied_total",
        "Total number of remote updates applied"
    );
    describe_counter!(
        "counter_updates_duplicate_total",
        "Total number of remote updates discarded as duplicates"
    );
    describe_counter!(
        "counter_snapshot_merges_total",
        "Total number of full-state merges"
    );
    describe_counter!(
        "gossip_updates_coalesced_total",
        "Total number of queued updates superseded before delivery"
    );
    describe_counter!(
        "gossip_deliveries_total",
        "Total number of updates delivered to peers"
    );
    describe_counter!(
        "gossip_delivery_retries_total",
        "Total number of delivery retries"
    );
    describe_counter!(
        "gossip_delivery_failures_total",
        "Total number of updates dropped after exhausting retries"
    );
    describe_counter!(
        "gossip_heartbeats_sent_total",
        "Total number of successful heartbeats"
    );
    describe_counter!(
        "gossip_heartbeat_failures_total",
        "Total number of failed heartbeats"
    );
    describe_counter!(
        "membership_peers_joined_total",
        "Total number of join requests accepted"
    );
    describe_counter!(
        "membership_peers_pruned_total",
        "Total number of peers evicted for staleness"
    );
    describe_gauge!(
        "counter_global_value",
        "Current global counter value as seen by this node"
    );
    describe_gauge!(
        "membership_known_peers",
        "Current number of known remote peers, excluding this node"
    );
}

/// Start the Prometheus exporter on `addr`
pub fn install_prometheus(addr: SocketAddr) -> Result<()> {
    info!(metrics_addr = %addr, "Starting Prometheus metrics exporter");

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| CounterError::Config(format!("Failed to install Prometheus exporter: {}", e)))?;

    describe_metrics();
    Ok(())
}

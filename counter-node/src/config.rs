use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

use crate::distributed::{BackoffPolicy, GossipSettings};
use crate::error::{CounterError, Result};
use crate::types::PeerInfo;

/// Environment prefix for configuration overrides
pub const ENV_PREFIX: &str = "COUNTERD";

/// Main configuration for a counter node
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CounterConfig {
    /// Identity, listener and seeds
    pub node: NodeSection,
    /// Gossip timing
    pub gossip: GossipConfig,
    /// Delivery retry policy
    pub retry: RetryConfig,
    /// Metrics and monitoring
    pub metrics: MetricsConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Node identity and bootstrap configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeSection {
    /// Node identifier; defaults to `<hostname>:<port>`
    pub id: Option<String>,
    /// Listen address; `:8081` is accepted as shorthand for all interfaces
    pub listen_addr: String,
    /// URL other nodes use to reach us; defaults to `http://localhost:<port>`
    pub public_url: Option<String>,
    /// Seed nodes contacted once at startup
    pub seeds: Vec<String>,
}

/// Gossip timing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GossipConfig {
    /// Outbound queue flush period in milliseconds
    pub flush_interval_ms: u64,
    /// Heartbeat period in milliseconds
    pub heartbeat_interval_ms: u64,
    /// Stale-peer sweep period in milliseconds
    pub prune_interval_ms: u64,
    /// Silence after which a peer is evicted, in milliseconds
    pub stale_after_ms: u64,
    /// Per-request timeout for peer calls in milliseconds
    pub request_timeout_ms: u64,
}

/// Delivery retry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub base_delay_ms: u64,
    pub factor: f64,
    pub max_delay_ms: u64,
    /// Retries after the first failure; 0 retries forever
    pub max_attempts: u32,
}

/// Metrics configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Enable the Prometheus exporter
    pub enabled: bool,
    /// Exporter listen address
    pub listen_addr: String,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter when RUST_LOG is unset
    pub level: String,
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

impl Default for NodeSection {
    fn default() -> Self {
        Self {
            id: None,
            listen_addr: "0.0.0.0:8081".to_string(),
            public_url: None,
            seeds: Vec::new(),
        }
    }
}

impl Default for GossipConfig {
    fn default() -> Self {
        Self {
            flush_interval_ms: 300,
            heartbeat_interval_ms: 2_000,
            prune_interval_ms: 3_000,
            stale_after_ms: 6_000,
            request_timeout_ms: 2_000,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 100,
            factor: 2.0,
            max_delay_ms: 2_000,
            max_attempts: 5,
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen_addr: "127.0.0.1:9464".to_string(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "counter_node=info,counterd=info".to_string(),
            json: false,
        }
    }
}

impl CounterConfig {
    /// Load configuration from an optional file plus `COUNTERD_*` environment
    pub fn from_file(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?;

        Ok(settings.try_deserialize()?)
    }

    /// Render the effective configuration as TOML
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| CounterError::Serialization(e.to_string()))
    }

    /// Apply flat environment overrides that the layered loader cannot express.
    ///
    /// Returns the names of the variables that were applied, so the caller
    /// can log them once tracing is up.
    pub fn apply_env_overrides(&mut self) -> Result<Vec<String>> {
        let mut applied = Vec::new();

        if let Some((name, seeds)) = env_override("SEEDS") {
            self.node.seeds = split_csv(&seeds);
            applied.push(name);
        }

        if let Some((name, addr)) = env_override("ADDR") {
            self.node.listen_addr = addr;
            applied.push(name);
        }

        if let Some((name, level)) = env_override("LOG") {
            self.logging.level = level;
            applied.push(name);
        }

        if let Some((name, attempts)) = env_override("MAX_ATTEMPTS") {
            self.retry.max_attempts = attempts
                .parse()
                .map_err(|e| CounterError::Config(format!("Invalid {}: {}", name, e)))?;
            applied.push(name);
        }

        Ok(applied)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        self.listen_addr()?;

        let gossip = &self.gossip;
        if gossip.flush_interval_ms == 0
            || gossip.heartbeat_interval_ms == 0
            || gossip.prune_interval_ms == 0
        {
            return Err(CounterError::Config(
                "Gossip intervals must be greater than 0".to_string(),
            ));
        }

        if gossip.stale_after_ms <= gossip.heartbeat_interval_ms {
            return Err(CounterError::Config(format!(
                "stale_after_ms ({}) must exceed heartbeat_interval_ms ({})",
                gossip.stale_after_ms, gossip.heartbeat_interval_ms
            )));
        }

        if gossip.request_timeout_ms == 0 {
            return Err(CounterError::Config(
                "request_timeout_ms must be greater than 0".to_string(),
            ));
        }

        if !(self.retry.factor >= 1.0 && self.retry.factor.is_finite()) {
            return Err(CounterError::Config(format!(
                "Retry factor must be a finite number >= 1.0, got {}",
                self.retry.factor
            )));
        }

        if self.retry.max_delay_ms < self.retry.base_delay_ms {
            return Err(CounterError::Config(
                "max_delay_ms cannot be smaller than base_delay_ms".to_string(),
            ));
        }

        if self.metrics.enabled {
            self.metrics_addr()?;
        }

        Ok(())
    }

    /// Listen address as `host:port`, ready for `TcpListener::bind`.
    ///
    /// The host may be an IP or a name resolved at bind time; `:8081` binds
    /// all interfaces.
    pub fn listen_addr(&self) -> Result<String> {
        let raw = self.node.listen_addr.trim();
        let invalid = |reason: &str| {
            CounterError::Config(format!("Invalid listen address '{}': {}", raw, reason))
        };

        let (host, port) = raw
            .rsplit_once(':')
            .ok_or_else(|| invalid("expected host:port"))?;
        port.parse::<u16>().map_err(|e| invalid(&e.to_string()))?;

        if host.is_empty() {
            Ok(format!("0.0.0.0:{}", port))
        } else {
            Ok(raw.to_string())
        }
    }

    /// Port part of the listen address
    pub fn listen_port(&self) -> Result<u16> {
        let addr = self.listen_addr()?;
        let (_, port) = addr
            .rsplit_once(':')
            .ok_or_else(|| CounterError::Config(format!("Invalid listen address '{}'", addr)))?;
        port.parse()
            .map_err(|e| CounterError::Config(format!("Invalid listen port '{}': {}", port, e)))
    }

    pub fn metrics_addr(&self) -> Result<SocketAddr> {
        self.metrics.listen_addr.parse().map_err(|e| {
            CounterError::Config(format!(
                "Invalid metrics address '{}': {}",
                self.metrics.listen_addr, e
            ))
        })
    }

    /// This node's id and public URL, filling in defaults
    pub fn identity(&self) -> Result<PeerInfo> {
        let port = self.listen_port()?;

        let id = match &self.node.id {
            Some(id) if !id.trim().is_empty() => id.trim().to_string(),
            _ => format!("{}:{}", local_hostname(), port),
        };

        let addr = match &self.node.public_url {
            Some(url) if !url.trim().is_empty() => with_scheme(url.trim()),
            _ => format!("http://localhost:{}", port),
        };

        Ok(PeerInfo::new(id, addr))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.gossip.request_timeout_ms)
    }

    /// Timing and retry settings for the dissemination engine
    pub fn gossip_settings(&self) -> GossipSettings {
        GossipSettings {
            flush_interval: Duration::from_millis(self.gossip.flush_interval_ms),
            heartbeat_interval: Duration::from_millis(self.gossip.heartbeat_interval_ms),
            prune_interval: Duration::from_millis(self.gossip.prune_interval_ms),
            stale_after: Duration::from_millis(self.gossip.stale_after_ms),
            retry: BackoffPolicy {
                base: Duration::from_millis(self.retry.base_delay_ms),
                factor: self.retry.factor,
                max_delay: Duration::from_millis(self.retry.max_delay_ms),
                max_attempts: self.retry.max_attempts,
            },
        }
    }
}

/// Split a comma-separated list, dropping blanks
pub fn split_csv(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Prefix `http://` when an address has no scheme
pub fn with_scheme(addr: &str) -> String {
    if addr.starts_with("http://") || addr.starts_with("https://") {
        addr.to_string()
    } else {
        format!("http://{}", addr)
    }
}

fn env_override(key: &str) -> Option<(String, String)> {
    let name = format!("{}_{}", ENV_PREFIX, key);
    std::env::var(&name).ok().map(|value| (name, value))
}

/// Hostname as reported by the OS; random only when the OS cannot say
fn local_hostname() -> String {
    if let Some(host) = hostname::get().ok().and_then(|h| h.into_string().ok()) {
        if !host.trim().is_empty() {
            return host.trim().to_string();
        }
    }

    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("node-{}", &suffix[..8])
}

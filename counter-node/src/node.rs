//! Node coordinator: wires the replicated counter, peer directory and
//! dissemination engine together behind the operations the HTTP layer serves.

use metrics::counter;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use crate::config::with_scheme;
use crate::distributed::{
    ApplyOutcome, DisseminationEngine, GossipSettings, PeerDirectory, ReplicatedCounter,
};
use crate::error::{CounterError, Result};
use crate::transport::{HttpPeerClient, PeerClient};
use crate::types::{Counts, FullState, HeartbeatRequest, JoinRequest, PeerInfo, UpdateRecord};

/// Seeds contacted during bootstrap, split by outcome
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BootstrapReport {
    pub joined: Vec<String>,
    pub failed: Vec<String>,
}

/// One replica of the distributed counter
pub struct Node<C: PeerClient = HttpPeerClient> {
    identity: PeerInfo,
    counter: ReplicatedCounter,
    peers: Arc<PeerDirectory>,
    engine: Arc<DisseminationEngine<C>>,
    client: Arc<C>,
}

impl<C: PeerClient> Node<C> {
    pub fn new(identity: PeerInfo, client: C, settings: GossipSettings) -> Self {
        let client = Arc::new(client);
        let peers = Arc::new(PeerDirectory::new(identity.clone()));
        let engine = Arc::new(DisseminationEngine::new(
            Arc::clone(&peers),
            Arc::clone(&client),
            settings,
        ));

        Self {
            counter: ReplicatedCounter::new(identity.id.clone()),
            identity,
            peers,
            engine,
            client,
        }
    }

    pub fn identity(&self) -> &PeerInfo {
        &self.identity
    }

    pub fn counter(&self) -> &ReplicatedCounter {
        &self.counter
    }

    pub fn peers(&self) -> &Arc<PeerDirectory> {
        &self.peers
    }

    pub fn engine(&self) -> &Arc<DisseminationEngine<C>> {
        &self.engine
    }

    /// Start gossiping
    pub async fn start(&self) {
        self.engine.start().await;
    }

    /// Stop gossiping; no peer calls are made afterwards
    pub async fn stop(&self) {
        self.engine.stop().await;
    }

    /// Register the caller and return the full membership view
    #[instrument(skip(self), fields(node_id = %request.node_id))]
    pub async fn join(&self, request: JoinRequest) -> Result<Vec<PeerInfo>> {
        let node_id = require_field("node_id", &request.node_id)?;
        let addr = require_field("addr", &request.addr)?;

        if self.peers.upsert(node_id, addr).await {
            counter!("membership_peers_joined_total", 1);
            info!(peer_id = %node_id, addr = %addr, "Peer joined");
        } else {
            debug!(peer_id = %node_id, "Known peer rejoined");
        }

        Ok(self.peers.list().await)
    }

    /// Refresh a known peer's liveness; unknown ids are ignored
    pub async fn heartbeat(&self, request: HeartbeatRequest) -> Result<()> {
        let node_id = require_field("node_id", &request.node_id)?;
        if !self.peers.heartbeat(node_id).await {
            debug!(peer_id = %node_id, "Heartbeat from unknown peer ignored");
        }
        Ok(())
    }

    pub async fn list_peers(&self) -> Vec<PeerInfo> {
        self.peers.list().await
    }

    /// Count locally and queue the new value for every known peer
    pub async fn increment(&self) -> Counts {
        let (update, counts) = self.counter.increment().await;
        self.engine.enqueue(update).await;
        counts
    }

    pub async fn counts(&self) -> Counts {
        self.counter.counts().await
    }

    /// Merge an update pushed by another node
    pub async fn apply(&self, update: UpdateRecord) -> Result<ApplyOutcome> {
        require_field("node_id", &update.node_id)?;
        Ok(self.counter.apply(&update).await)
    }

    pub async fn state(&self) -> FullState {
        self.counter.snapshot().await
    }

    /// Join every seed, adopt its membership view and merge its state.
    ///
    /// Unreachable seeds are logged and reported; they never abort the run.
    #[instrument(skip(self, seeds))]
    pub async fn bootstrap(&self, seeds: &[String]) -> BootstrapReport {
        let mut report = BootstrapReport::default();

        for seed in normalize_seeds(seeds, &self.identity.addr) {
            match self.bootstrap_from(&seed).await {
                Ok(learned) => {
                    info!(seed = %seed, learned, "Bootstrapped from seed");
                    report.joined.push(seed);
                }
                Err(e) => {
                    warn!(seed = %seed, error = %e, "Failed to bootstrap from seed");
                    report.failed.push(seed);
                }
            }
        }

        info!(
            joined = report.joined.len(),
            failed = report.failed.len(),
            "Bootstrap complete"
        );
        report
    }

    async fn bootstrap_from(&self, seed: &str) -> Result<usize> {
        let request = JoinRequest {
            node_id: self.identity.id.clone(),
            addr: self.identity.addr.clone(),
        };

        let mut learned = 0;
        for peer in self.client.join(seed, &request).await? {
            if self.peers.upsert(&peer.id, &peer.addr).await {
                learned += 1;
            }
        }

        let snapshot = self.client.fetch_state(seed).await?;
        self.counter.merge_full_state(&snapshot).await;
        Ok(learned)
    }
}

/// Trim, add a scheme, sort and dedupe seeds; drop blanks and our own address
pub fn normalize_seeds(seeds: &[String], own_addr: &str) -> Vec<String> {
    let own = own_addr.trim_end_matches('/');
    let mut normalized: Vec<String> = seeds
        .iter()
        .map(|seed| seed.trim())
        .filter(|seed| !seed.is_empty())
        .map(|seed| with_scheme(seed).trim_end_matches('/').to_string())
        .filter(|seed| seed != own)
        .collect();

    normalized.sort();
    normalized.dedup();
    normalized
}

fn require_field<'a>(name: &str, value: &'a str) -> Result<&'a str> {
    if value.trim().is_empty() {
        return Err(CounterError::InvalidRequest(format!("{} must not be empty", name)));
    }
    Ok(value)
}

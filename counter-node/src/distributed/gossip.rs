// Gossip dissemination engine
//
// Pushes locally generated updates to every known peer and keeps the
// membership view fresh:
// - Flush loop: drain each peer's outbound list, deliver only the newest
//   update (coalescing), retry with bounded backoff
// - Heartbeat loop: ping every peer, no retry
// - Prune loop: evict peers that stopped heartbeating
//
// Every network call runs in its own task, outside of any lock, so one
// slow peer never holds up another.

use dashmap::DashMap;
use metrics::counter;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::backoff::BackoffPolicy;
use super::membership::PeerDirectory;
use crate::transport::PeerClient;
use crate::types::{HeartbeatRequest, PeerInfo, UpdateRecord};

/// Timing for the engine's periodic tasks
#[derive(Debug, Clone)]
pub struct GossipSettings {
    pub flush_interval: Duration,
    pub heartbeat_interval: Duration,
    pub prune_interval: Duration,
    /// Peers silent for longer than this are evicted
    pub stale_after: Duration,
    pub retry: BackoffPolicy,
}

impl Default for GossipSettings {
    fn default() -> Self {
        Self {
            flush_interval: Duration::from_millis(300),
            heartbeat_interval: Duration::from_secs(2),
            prune_interval: Duration::from_secs(3),
            stale_after: Duration::from_secs(6),
            retry: BackoffPolicy::default(),
        }
    }
}

/// How a single coalesced delivery ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered { attempts: u32 },
    /// Retry budget spent; the update was dropped
    Dropped { attempts: u32 },
    /// Engine stopped while the delivery was in flight
    Abandoned,
}

/// Gossip engine for one node
pub struct DisseminationEngine<C: PeerClient> {
    self_id: String,
    peers: Arc<PeerDirectory>,
    client: Arc<C>,
    settings: GossipSettings,
    /// peer id → updates waiting for the next flush
    outbound: DashMap<String, Vec<UpdateRecord>>,
    shutdown: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl<C: PeerClient> DisseminationEngine<C> {
    pub fn new(peers: Arc<PeerDirectory>, client: Arc<C>, settings: GossipSettings) -> Self {
        Self {
            self_id: peers.self_info().id.clone(),
            peers,
            client,
            settings,
            outbound: DashMap::new(),
            shutdown: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn settings(&self) -> &GossipSettings {
        &self.settings
    }

    /// Queue an update for every peer known right now.
    ///
    /// Peers that join later get current state from their bootstrap pull.
    /// Nothing is queued once the engine is stopped.
    pub async fn enqueue(&self, update: UpdateRecord) {
        if self.shutdown.is_cancelled() {
            return;
        }

        let peers = self.peers.remote_peers().await;
        for peer in peers {
            self.outbound.entry(peer.id).or_default().push(update.clone());
        }
    }

    /// Copy of the updates waiting for one peer
    pub fn pending(&self, peer_id: &str) -> Vec<UpdateRecord> {
        self.outbound
            .get(peer_id)
            .map(|queue| queue.clone())
            .unwrap_or_default()
    }

    /// Start the flush, heartbeat and prune loops
    pub async fn start(self: &Arc<Self>) {
        let mut tasks = self.tasks.lock().await;
        if !tasks.is_empty() {
            warn!("Dissemination engine already running");
            return;
        }
        if self.shutdown.is_cancelled() {
            warn!("Dissemination engine was stopped and cannot be restarted");
            return;
        }

        let engine = Arc::clone(self);
        tasks.push(tokio::spawn(async move { engine.flush_loop().await }));

        let engine = Arc::clone(self);
        tasks.push(tokio::spawn(async move { engine.heartbeat_loop().await }));

        let engine = Arc::clone(self);
        tasks.push(tokio::spawn(async move { engine.prune_loop().await }));

        info!(
            flush_ms = self.settings.flush_interval.as_millis() as u64,
            heartbeat_ms = self.settings.heartbeat_interval.as_millis() as u64,
            prune_ms = self.settings.prune_interval.as_millis() as u64,
            "Dissemination engine started"
        );
    }

    /// Stop all loops. In-flight deliveries and heartbeats are abandoned.
    pub async fn stop(&self) {
        self.shutdown.cancel();
        let handles = std::mem::take(&mut *self.tasks.lock().await);
        if handles.is_empty() {
            return;
        }

        for result in futures::future::join_all(handles).await {
            if let Err(e) = result {
                warn!(error = %e, "Dissemination task ended abnormally");
            }
        }
        info!("Dissemination engine stopped");
    }

    fn ticker(period: Duration) -> time::Interval {
        let mut interval = time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval
    }

    async fn flush_loop(&self) {
        let mut interval = Self::ticker(self.settings.flush_interval);
        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                _ = interval.tick() => {
                    self.flush_once().await;
                }
            }
        }
    }

    async fn heartbeat_loop(&self) {
        let mut interval = Self::ticker(self.settings.heartbeat_interval);
        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                _ = interval.tick() => {
                    self.heartbeat_once().await;
                }
            }
        }
    }

    async fn prune_loop(&self) {
        let mut interval = Self::ticker(self.settings.prune_interval);
        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                _ = interval.tick() => {
                    self.prune_once().await;
                }
            }
        }
    }

    /// One flush cycle. Spawns a delivery task per peer with pending
    /// updates and returns their handles without waiting on them.
    pub async fn flush_once(&self) -> Vec<JoinHandle<DeliveryOutcome>> {
        let mut deliveries = Vec::new();
        if self.shutdown.is_cancelled() {
            return deliveries;
        }

        for peer in self.peers.remote_peers().await {
            let drained = match self.outbound.get_mut(&peer.id) {
                Some(mut queue) => std::mem::take(&mut *queue),
                None => continue,
            };
            let Some(latest) = drained.last().cloned() else {
                continue;
            };

            let coalesced = drained.len() - 1;
            if coalesced > 0 {
                counter!("gossip_updates_coalesced_total", coalesced as u64);
                debug!(peer_id = %peer.id, coalesced, seq = latest.seq, "Coalesced pending updates");
            }

            deliveries.push(tokio::spawn(deliver_with_retry(
                Arc::clone(&self.client),
                peer,
                latest,
                self.settings.retry,
                self.shutdown.clone(),
            )));
        }

        deliveries
    }

    /// Ping every known peer once, each in its own task
    pub async fn heartbeat_once(&self) -> usize {
        if self.shutdown.is_cancelled() {
            return 0;
        }

        let peers = self.peers.remote_peers().await;
        let sent = peers.len();
        for peer in peers {
            let client = Arc::clone(&self.client);
            let shutdown = self.shutdown.clone();
            let request = HeartbeatRequest {
                node_id: self.self_id.clone(),
            };

            tokio::spawn(async move {
                let result = tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => return,
                    result = client.heartbeat(&peer.addr, &request) => result,
                };
                match result {
                    Ok(()) => {
                        counter!("gossip_heartbeats_sent_total", 1);
                    }
                    Err(e) => {
                        counter!("gossip_heartbeat_failures_total", 1);
                        debug!(peer_id = %peer.id, error = %e, "Heartbeat failed");
                    }
                }
            });
        }
        sent
    }

    /// Evict stale peers and drop their backlog; returns evicted ids
    pub async fn prune_once(&self) -> Vec<String> {
        let removed = self.peers.remove_stale(self.settings.stale_after).await;
        for peer_id in &removed {
            self.outbound.remove(peer_id);
        }

        if !removed.is_empty() {
            counter!("membership_peers_pruned_total", removed.len() as u64);
            info!(peers = ?removed, "Pruned stale peers");
        }
        removed
    }
}

/// Deliver one update to one peer, retrying per `policy`
async fn deliver_with_retry<C: PeerClient>(
    client: Arc<C>,
    peer: PeerInfo,
    update: UpdateRecord,
    policy: BackoffPolicy,
    shutdown: CancellationToken,
) -> DeliveryOutcome {
    let mut backoff = policy.start();
    let mut attempts = 0;

    loop {
        attempts += 1;
        let result = tokio::select! {
            biased;
            _ = shutdown.cancelled() => return DeliveryOutcome::Abandoned,
            result = client.deliver(&peer.addr, &update) => result,
        };

        let error = match result {
            Ok(()) => {
                counter!("gossip_deliveries_total", 1);
                return DeliveryOutcome::Delivered { attempts };
            }
            Err(e) => e,
        };

        let Some(delay) = backoff.next_delay() else {
            counter!("gossip_delivery_failures_total", 1);
            warn!(
                peer_id = %peer.id,
                seq = update.seq,
                attempts,
                error = %error,
                "Delivery failed permanently, dropping update"
            );
            return DeliveryOutcome::Dropped { attempts };
        };

        counter!("gossip_delivery_retries_total", 1);
        debug!(
            peer_id = %peer.id,
            attempt = attempts,
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "Delivery failed, retrying"
        );

        tokio::select! {
            biased;
            _ = shutdown.cancelled() => return DeliveryOutcome::Abandoned,
            _ = time::sleep(delay) => {}
        }
    }
}

// Peer directory: known replicas and their last contact time
//
// Populated by join requests and bootstrap, refreshed by heartbeats,
// pruned by the gossip engine. The local node is held separately and is
// never stored, refreshed or evicted.

use std::collections::HashMap;
use std::time::Duration;

use metrics::gauge;
use tokio::sync::RwLock;
use tokio::time::Instant;

use crate::types::PeerInfo;

/// A remote replica as tracked by the directory
#[derive(Debug, Clone)]
pub struct PeerEntry {
    pub info: PeerInfo,
    /// Refreshed on insertion and on every heartbeat
    pub last_seen: Instant,
}

#[derive(Debug)]
pub struct PeerDirectory {
    self_info: PeerInfo,
    peers: RwLock<HashMap<String, PeerEntry>>,
}

impl PeerDirectory {
    pub fn new(self_info: PeerInfo) -> Self {
        Self {
            self_info,
            peers: RwLock::new(HashMap::new()),
        }
    }

    pub fn self_info(&self) -> &PeerInfo {
        &self.self_info
    }

    /// All known peers plus self, sorted by id
    pub async fn list(&self) -> Vec<PeerInfo> {
        let peers = self.peers.read().await;
        let mut list: Vec<PeerInfo> = peers.values().map(|entry| entry.info.clone()).collect();
        list.push(self.self_info.clone());
        list.sort_by(|a, b| a.id.cmp(&b.id));
        list
    }

    /// Known peers without self, sorted by id
    pub async fn remote_peers(&self) -> Vec<PeerInfo> {
        let mut list = self.list().await;
        list.retain(|peer| peer.id != self.self_info.id);
        list
    }

    /// Insert or refresh a peer. Returns true if the peer was not known.
    pub async fn upsert(&self, id: &str, addr: &str) -> bool {
        if id == self.self_info.id {
            return false;
        }

        let mut peers = self.peers.write().await;
        let previous = peers.insert(
            id.to_string(),
            PeerEntry {
                info: PeerInfo::new(id, addr),
                last_seen: Instant::now(),
            },
        );
        gauge!("membership_known_peers", peers.len() as f64);

        previous.is_none()
    }

    /// Refresh an already-known peer. Heartbeats never add peers.
    ///
    /// Returns true if a record was refreshed.
    pub async fn heartbeat(&self, id: &str) -> bool {
        if id == self.self_info.id {
            return false;
        }

        let mut peers = self.peers.write().await;
        match peers.get_mut(id) {
            Some(entry) => {
                entry.last_seen = Instant::now();
                true
            }
            None => false,
        }
    }

    /// Evict every peer silent for longer than `window`; returns their ids
    pub async fn remove_stale(&self, window: Duration) -> Vec<String> {
        let now = Instant::now();
        let mut peers = self.peers.write().await;

        let mut removed: Vec<String> = peers
            .iter()
            .filter(|(_, entry)| now.saturating_duration_since(entry.last_seen) > window)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &removed {
            peers.remove(id);
        }
        gauge!("membership_known_peers", peers.len() as f64);

        removed.sort();
        removed
    }

    /// Copy of one peer's record
    pub async fn get(&self, id: &str) -> Option<PeerEntry> {
        self.peers.read().await.get(id).cloned()
    }

    /// Number of known peers, self excluded
    pub async fn len(&self) -> usize {
        self.peers.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.peers.read().await.is_empty()
    }
}

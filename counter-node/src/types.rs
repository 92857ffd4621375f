//! Wire types exchanged between counter nodes

use serde::{Deserialize, Serialize};

use crate::distributed::crdt::GCounter;

/// Identity of a replica as advertised to other replicas
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeerInfo {
    /// Globally unique node identifier
    pub id: String,
    /// Base URL other nodes use to reach this node
    pub addr: String,
}

impl PeerInfo {
    pub fn new(id: impl Into<String>, addr: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            addr: addr.into(),
        }
    }
}

/// Join request sent by a bootstrapping node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinRequest {
    pub node_id: String,
    pub addr: String,
}

/// Membership view returned by join and peers queries
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeersResponse {
    pub peers: Vec<PeerInfo>,
}

/// Liveness ping
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatRequest {
    pub node_id: String,
}

/// Local and global counter values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counts {
    pub local: u64,
    pub global: u64,
}

/// "Node `node_id` reached `value` as of its `seq`-th local increment."
///
/// Unit of point-to-point delivery and of deduplication.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateRecord {
    pub node_id: String,
    pub seq: u64,
    pub value: u64,
}

/// Full contribution vector, used for bootstrap merge
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FullState {
    pub components: GCounter,
}

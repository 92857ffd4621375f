// Distributed replication core
//
// This module provides the pieces that keep replicas of the counter
// converging without coordination:
// - CRDT state and merge rules
// - Peer membership with staleness tracking
// - Gossip dissemination with coalescing and bounded retry

pub mod backoff;
pub mod counter;
pub mod crdt;
pub mod gossip;
pub mod membership;

pub use backoff::{Backoff, BackoffPolicy};
pub use counter::ReplicatedCounter;
pub use crdt::{ApplyOutcome, CounterState, GCounter, NodeId};
pub use gossip::{DeliveryOutcome, DisseminationEngine, GossipSettings};
pub use membership::{PeerDirectory, PeerEntry};

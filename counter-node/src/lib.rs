//! Counter Node Library
//!
//! A grow-only distributed counter: every node counts locally, pushes its
//! running total to peers over HTTP gossip, and merges what it receives by
//! taking per-node maxima.

pub mod api;
pub mod config;
pub mod distributed;
pub mod error;
pub mod node;
pub mod telemetry;
pub mod transport;
pub mod types;

// Re-export commonly used types
pub use config::CounterConfig;
pub use distributed::{BackoffPolicy, DisseminationEngine, GCounter, GossipSettings, PeerDirectory, ReplicatedCounter};
pub use error::{CounterError, Result};
pub use node::{BootstrapReport, Node};
pub use transport::{HttpPeerClient, PeerClient};
pub use types::{Counts, FullState, PeerInfo, UpdateRecord};

// Replicated counter shared between request handlers
//
// Wraps CounterState behind a single read/write lock. Reads (counts,
// snapshot) run concurrently; increments and merges are serialized.

use metrics::{counter, gauge};
use tokio::sync::RwLock;
use tracing::debug;

use super::crdt::{ApplyOutcome, CounterState};
use crate::types::{Counts, FullState, UpdateRecord};

/// This node's replica of the grow-only counter
#[derive(Debug)]
pub struct ReplicatedCounter {
    local_id: String,
    state: RwLock<CounterState>,
}

impl ReplicatedCounter {
    pub fn new(local_id: impl Into<String>) -> Self {
        let local_id = local_id.into();
        Self {
            state: RwLock::new(CounterState::new(local_id.clone())),
            local_id,
        }
    }

    pub fn local_id(&self) -> &str {
        &self.local_id
    }

    /// Count one local increment.
    ///
    /// Returns the update to disseminate and the counts right after it.
    pub async fn increment(&self) -> (UpdateRecord, Counts) {
        let (update, counts) = self.state.write().await.increment();

        counter!("counter_local_increments_total", 1);
        gauge!("counter_global_value", counts.global as f64);

        (update, counts)
    }

    /// Apply a point-to-point update received from a peer
    pub async fn apply(&self, update: &UpdateRecord) -> ApplyOutcome {
        let (outcome, counts) = {
            let mut state = self.state.write().await;
            let outcome = state.apply(update);
            (outcome, state.counts())
        };

        match outcome {
            ApplyOutcome::Applied => {
                counter!("counter_updates_applied_total", 1);
                gauge!("counter_global_value", counts.global as f64);
                debug!(
                    node_id = %update.node_id,
                    seq = update.seq,
                    value = update.value,
                    global = counts.global,
                    "Applied remote update"
                );
            }
            ApplyOutcome::Duplicate => {
                counter!("counter_updates_duplicate_total", 1);
                debug!(
                    node_id = %update.node_id,
                    seq = update.seq,
                    "Discarded already-seen update"
                );
            }
        }

        outcome
    }

    /// Merge a full snapshot pulled from a peer
    pub async fn merge_full_state(&self, snapshot: &FullState) {
        let counts = {
            let mut state = self.state.write().await;
            state.merge_full_state(&snapshot.components);
            state.counts()
        };

        counter!("counter_snapshot_merges_total", 1);
        gauge!("counter_global_value", counts.global as f64);
        debug!(
            nodes = snapshot.components.node_count(),
            global = counts.global,
            "Merged full-state snapshot"
        );
    }

    /// Copy of the contribution vector
    pub async fn snapshot(&self) -> FullState {
        FullState {
            components: self.state.read().await.contributions().clone(),
        }
    }

    pub async fn counts(&self) -> Counts {
        self.state.read().await.counts()
    }
}

// CRDT (Conflict-free Replicated Data Type) Implementation
//
// This module implements the G-Counter (Grow-only Counter) replicated
// across counter nodes, plus the per-node sequence bookkeeping used to
// deduplicate redelivered point-to-point updates.
//
// G-Counter Properties:
// - Commutative: merge(A, B) = merge(B, A)
// - Associative: merge(merge(A, B), C) = merge(A, merge(B, C))
// - Idempotent: merge(A, A) = A
// - Convergent: All nodes eventually converge to same state

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::types::{Counts, UpdateRecord};

/// Node identifier for CRDT operations
pub type NodeId = String;

/// G-Counter: Grow-only Counter (State-based CRDT)
///
/// A distributed counter that can only increment. Each node owns one entry,
/// and the global value is the sum of all entries.
///
/// # Theory
///
/// - State S = {counts: Map<NodeId, u64>}
/// - Raise: counts[k] = max(counts[k], v)
/// - Merge: counts[k] = max(local[k], remote[k]) for all k
/// - Value: sum(counts.values())
///
/// # Example
///
/// ```text
/// Node A: {A: 10, B: 0,  C: 0} → value = 10
/// Node B: {A: 5,  B: 20, C: 0} → value = 25
/// merge(A, B) = {A: 10, B: 20, C: 0} → value = 30
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct GCounter {
    counts: HashMap<NodeId, u64>,
}

impl GCounter {
    /// Create a new empty G-Counter
    pub fn new() -> Self {
        Self {
            counts: HashMap::new(),
        }
    }

    /// Get the count for a specific node
    pub fn get(&self, node_id: &str) -> u64 {
        self.counts.get(node_id).copied().unwrap_or(0)
    }

    /// Whether the node has an entry at all (a zero entry counts)
    pub fn contains(&self, node_id: &str) -> bool {
        self.counts.contains_key(node_id)
    }

    /// Raise a node's entry to at least `value`.
    ///
    /// Returns true if the entry changed. Entries never decrease.
    pub fn raise(&mut self, node_id: &str, value: u64) -> bool {
        match self.counts.get_mut(node_id) {
            Some(current) if *current >= value => false,
            Some(current) => {
                *current = value;
                true
            }
            None => {
                self.counts.insert(node_id.to_string(), value);
                true
            }
        }
    }

    /// Merge another G-Counter into this one
    ///
    /// ```text
    /// local[k] = max(local[k], remote[k]) for all k
    /// ```
    ///
    /// # Example
    /// ```
    /// use counter_node::distributed::GCounter;
    ///
    /// let mut a: GCounter = [("node-a", 10)].into_iter().collect();
    /// let b: GCounter = [("node-b", 20)].into_iter().collect();
    ///
    /// a.merge(&b);
    /// assert_eq!(a.value(), 30);
    /// ```
    pub fn merge(&mut self, other: &GCounter) {
        for (node_id, &remote_count) in &other.counts {
            self.raise(node_id, remote_count);
        }
    }

    /// Get the global value (sum of all node counters)
    pub fn value(&self) -> u64 {
        self.counts.values().sum()
    }

    /// Get the number of nodes in this counter
    pub fn node_count(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, u64)> {
        self.counts.iter().map(|(id, &count)| (id.as_str(), count))
    }
}

impl<K: Into<NodeId>> FromIterator<(K, u64)> for GCounter {
    fn from_iter<I: IntoIterator<Item = (K, u64)>>(iter: I) -> Self {
        let mut counter = GCounter::new();
        for (node_id, value) in iter {
            counter.raise(&node_id.into(), value);
        }
        counter
    }
}

/// Result of applying a point-to-point update
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The update was newer than anything seen from its node
    Applied,
    /// Sequence already seen; the update was discarded
    Duplicate,
}

/// Unsynchronized replica state.
///
/// Holds the contribution vector, the sequence table used for dedup and
/// this node's own sequence counter. Callers serialize access.
#[derive(Debug, Clone)]
pub struct CounterState {
    local_id: NodeId,
    contributions: GCounter,
    last_seq: HashMap<NodeId, u64>,
    local_seq: u64,
}

impl CounterState {
    pub fn new(local_id: impl Into<NodeId>) -> Self {
        let local_id = local_id.into();
        let mut contributions = GCounter::new();
        contributions.raise(&local_id, 0);
        let mut last_seq = HashMap::new();
        last_seq.insert(local_id.clone(), 0);

        Self {
            local_id,
            contributions,
            last_seq,
            local_seq: 0,
        }
    }

    pub fn local_id(&self) -> &str {
        &self.local_id
    }

    /// Count one local increment and stamp the update that announces it
    pub fn increment(&mut self) -> (UpdateRecord, Counts) {
        self.local_seq += 1;
        self.contributions.raise(&self.local_id, self.local_seq);

        let update = UpdateRecord {
            node_id: self.local_id.clone(),
            seq: self.local_seq,
            value: self.local_seq,
        };
        (update, self.counts())
    }

    /// Apply a point-to-point update from a peer.
    ///
    /// Updates whose sequence is not above the last one seen for their node
    /// are discarded. Otherwise the node's entry is raised to `value`.
    pub fn apply(&mut self, update: &UpdateRecord) -> ApplyOutcome {
        if let Some(&last) = self.last_seq.get(&update.node_id) {
            if update.seq <= last {
                return ApplyOutcome::Duplicate;
            }
        }

        self.contributions.raise(&update.node_id, update.value);
        let seq = self.last_seq.entry(update.node_id.clone()).or_insert(0);
        *seq = (*seq).max(update.seq);

        self.catch_up_local();
        ApplyOutcome::Applied
    }

    /// Merge a full snapshot of another replica's contribution vector.
    ///
    /// The sequence table is raised to each merged value as well, so a
    /// redelivered update at or below that value is treated as seen.
    pub fn merge_full_state(&mut self, snapshot: &GCounter) {
        self.contributions.merge(snapshot);
        for (node_id, value) in snapshot.iter() {
            let seq = self.last_seq.entry(node_id.to_string()).or_insert(0);
            *seq = (*seq).max(value);
        }
        self.catch_up_local();
    }

    /// Peers may know a larger value for us than our own sequence (we were
    /// restarted); continue counting from there.
    fn catch_up_local(&mut self) {
        let known = self.contributions.get(&self.local_id);
        if known > self.local_seq {
            self.local_seq = known;
        }
    }

    pub fn counts(&self) -> Counts {
        Counts {
            local: self.contributions.get(&self.local_id),
            global: self.contributions.value(),
        }
    }

    pub fn contributions(&self) -> &GCounter {
        &self.contributions
    }

    /// Highest sequence applied for a node
    pub fn last_seq(&self, node_id: &str) -> Option<u64> {
        self.last_seq.get(node_id).copied()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn update(node_id: &str, seq: u64, value: u64) -> UpdateRecord {
        UpdateRecord {
            node_id: node_id.to_string(),
            seq,
            value,
        }
    }

    #[test]
    fn test_gcounter_raise_never_decreases() {
        let mut counter = GCounter::new();

        assert!(counter.raise("a", 10));
        assert!(!counter.raise("a", 4));
        assert!(!counter.raise("a", 10));
        assert_eq!(counter.get("a"), 10);

        assert!(counter.raise("a", 11));
        assert_eq!(counter.value(), 11);
    }

    #[test]
    fn test_gcounter_zero_entry_is_tracked() {
        let counter: GCounter = [("a", 0)].into_iter().collect();
        assert!(counter.contains("a"));
        assert!(!counter.contains("b"));
        assert_eq!(counter.node_count(), 1);
        assert_eq!(counter.value(), 0);
    }

    #[test]
    fn test_gcounter_merge_overlapping() {
        let mut counter_a: GCounter = [("a", 10), ("b", 5)].into_iter().collect();
        let counter_b: GCounter = [("a", 8), ("b", 15)].into_iter().collect();

        counter_a.merge(&counter_b);

        // Should take max for each node
        assert_eq!(counter_a.get("a"), 10);
        assert_eq!(counter_a.get("b"), 15);
        assert_eq!(counter_a.value(), 25);
    }

    #[test]
    fn test_gcounter_merge_commutative() {
        let a: GCounter = [("a", 10), ("c", 1)].into_iter().collect();
        let b: GCounter = [("b", 20), ("c", 3)].into_iter().collect();

        let mut ab = a.clone();
        ab.merge(&b);
        let mut ba = b.clone();
        ba.merge(&a);

        assert_eq!(ab, ba);
    }

    #[test]
    fn test_gcounter_merge_associative() {
        let a: GCounter = [("a", 10)].into_iter().collect();
        let b: GCounter = [("b", 20)].into_iter().collect();
        let c: GCounter = [("c", 30)].into_iter().collect();

        let mut left = a.clone();
        left.merge(&b);
        left.merge(&c);

        let mut bc = b.clone();
        bc.merge(&c);
        let mut right = a.clone();
        right.merge(&bc);

        assert_eq!(left, right);
        assert_eq!(left.value(), 60);
    }

    #[test]
    fn test_gcounter_merge_idempotent() {
        let mut counter: GCounter = [("a", 10), ("b", 20)].into_iter().collect();
        let copy = counter.clone();

        counter.merge(&copy);

        assert_eq!(counter, copy);
        assert_eq!(counter.value(), 30);
    }

    #[test]
    fn test_state_starts_with_zero_local_entry() {
        let state = CounterState::new("self");
        assert!(state.contributions().contains("self"));
        assert_eq!(state.last_seq("self"), Some(0));
        assert_eq!(state.counts(), Counts { local: 0, global: 0 });
    }

    #[test]
    fn test_increment_stamps_sequence() {
        let mut state = CounterState::new("self");

        let (first, _) = state.increment();
        let (second, counts) = state.increment();

        assert_eq!(first, update("self", 1, 1));
        assert_eq!(second, update("self", 2, 2));
        assert_eq!(counts, Counts { local: 2, global: 2 });
    }

    #[test]
    fn test_apply_dedup_and_max_merge() {
        let mut state = CounterState::new("self");
        state.increment();
        let base = state.counts().global;

        let msg = update("peerA", 1, 1);
        assert_eq!(state.apply(&msg), ApplyOutcome::Applied);
        assert_eq!(state.apply(&msg), ApplyOutcome::Duplicate);
        assert_eq!(state.counts().global, base + 1);

        assert_eq!(state.apply(&update("peerA", 2, 5)), ApplyOutcome::Applied);
        assert_eq!(state.counts().global, base + 5);
        assert_eq!(state.last_seq("peerA"), Some(2));
    }

    #[test]
    fn test_apply_out_of_order_is_discarded() {
        let mut state = CounterState::new("self");

        state.apply(&update("peerA", 7, 7));
        // Coalescing skipped 2..6; a late seq 4 must not be applied
        assert_eq!(state.apply(&update("peerA", 4, 4)), ApplyOutcome::Duplicate);
        assert_eq!(state.contributions().get("peerA"), 7);
    }

    #[test]
    fn test_merge_full_state() {
        let mut state = CounterState::new("self");
        for _ in 0..3 {
            state.increment();
        }

        let snapshot: GCounter = [("self", 3), ("peer1", 7), ("peer2", 0)]
            .into_iter()
            .collect();
        state.merge_full_state(&snapshot);

        assert_eq!(state.counts(), Counts { local: 3, global: 10 });
        assert!(state.contributions().contains("peer2"));
    }

    #[test]
    fn test_merge_full_state_raises_sequence_to_value() {
        let mut state = CounterState::new("self");

        let snapshot: GCounter = [("peer1", 7)].into_iter().collect();
        state.merge_full_state(&snapshot);

        assert_eq!(state.last_seq("peer1"), Some(7));
        assert_eq!(state.apply(&update("peer1", 6, 6)), ApplyOutcome::Duplicate);
        assert_eq!(state.apply(&update("peer1", 8, 8)), ApplyOutcome::Applied);
        assert_eq!(state.contributions().get("peer1"), 8);
    }

    #[test]
    fn test_restarted_node_continues_from_known_value() {
        let mut state = CounterState::new("self");

        let snapshot: GCounter = [("self", 41), ("peer1", 2)].into_iter().collect();
        state.merge_full_state(&snapshot);

        let (record, counts) = state.increment();
        assert_eq!(record, update("self", 42, 42));
        assert_eq!(counts, Counts { local: 42, global: 44 });
    }

    fn arb_updates() -> impl Strategy<Value = Vec<UpdateRecord>> {
        // Value follows sequence for a given node, as produced by increment()
        prop::collection::vec((0..4usize, 1..40u64), 0..60).prop_map(|raw| {
            raw.into_iter()
                .map(|(node, seq)| update(&format!("node-{}", node), seq, seq))
                .collect()
        })
    }

    fn replay(updates: &[UpdateRecord]) -> CounterState {
        let mut state = CounterState::new("self");
        for u in updates {
            state.apply(u);
        }
        state
    }

    proptest! {
        #[test]
        fn prop_apply_order_independent(
            (updates, shuffled) in arb_updates()
                .prop_flat_map(|u| (Just(u.clone()), Just(u).prop_shuffle()))
        ) {
            let a = replay(&updates);
            let b = replay(&shuffled);
            prop_assert_eq!(a.contributions(), b.contributions());
            prop_assert_eq!(a.counts(), b.counts());
        }

        #[test]
        fn prop_apply_idempotent(updates in arb_updates()) {
            let once = replay(&updates);
            let doubled: Vec<UpdateRecord> =
                updates.iter().chain(updates.iter()).cloned().collect();
            let twice = replay(&doubled);
            prop_assert_eq!(once.contributions(), twice.contributions());
        }

        #[test]
        fn prop_global_sum_monotonic(updates in arb_updates(), increments in 0..10usize) {
            let mut state = CounterState::new("self");
            let mut last = state.counts().global;
            for (i, u) in updates.iter().enumerate() {
                if i % 3 == 0 && i / 3 < increments {
                    state.increment();
                }
                state.apply(u);
                if i % 5 == 0 {
                    let snapshot = state.contributions().clone();
                    state.merge_full_state(&snapshot);
                }
                let now = state.counts().global;
                prop_assert!(now >= last);
                last = now;
            }
        }

        #[test]
        fn prop_snapshot_merge_converges(
            (updates, shuffled) in arb_updates()
                .prop_flat_map(|u| (Just(u.clone()), Just(u).prop_shuffle()))
        ) {
            // Two replicas that saw the same updates in different orders
            // agree after exchanging snapshots
            let mut a = replay(&updates);
            let mut b = replay(&shuffled);
            let snap_a = a.contributions().clone();
            let snap_b = b.contributions().clone();
            a.merge_full_state(&snap_b);
            b.merge_full_state(&snap_a);
            prop_assert_eq!(a.contributions(), b.contributions());
        }
    }
}

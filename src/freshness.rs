//! Live `lastHeard` tracking.
//!
//! The freshness cache remembers the last `lastHeard` value seen for every
//! node during this process lifetime and classifies each new observation.
//! It drives live "just reported" highlighting only; it never touches the
//! durable log and is independent of the persisted uptime baselines.

use std::collections::HashMap;

use crate::meshtastic::Snapshot;

/// Outcome of observing a node's `lastHeard`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    /// No previous observation for this node.
    FirstSeen,
    /// `lastHeard` differs from the cached value.
    Advanced,
    /// Same `lastHeard` as last time.
    Unchanged,
}

/// Node id → last observed `lastHeard` epoch seconds.
#[derive(Debug, Default, Clone)]
pub struct FreshnessCache {
    last_heard: HashMap<String, i64>,
}

impl FreshnessCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Classify `last_heard` against the cached value and store it.
    pub fn observe(&mut self, node_id: &str, last_heard: i64) -> Freshness {
        match self.last_heard.get_mut(node_id) {
            Some(prev) if *prev == last_heard => Freshness::Unchanged,
            Some(prev) => {
                *prev = last_heard;
                Freshness::Advanced
            }
            None => {
                self.last_heard.insert(node_id.to_string(), last_heard);
                Freshness::FirstSeen
            }
        }
    }

    /// Observe every node of a snapshot, in snapshot order.
    ///
    /// Nodes without device metrics are observed too: they can still be
    /// flagged live even though they are never persisted.
    pub fn observe_snapshot(&mut self, snapshot: &Snapshot) -> Vec<(String, Freshness)> {
        snapshot
            .iter()
            .map(|(id, node)| (id.clone(), self.observe(id, node.last_heard())))
            .collect()
    }

    pub fn last_heard(&self, node_id: &str) -> Option<i64> {
        self.last_heard.get(node_id).copied()
    }

    /// Nodes whose last observed `lastHeard` is older than `max_age_secs` at `now_epoch`.
    pub fn stale_nodes(&self, now_epoch: i64, max_age_secs: i64) -> Vec<&str> {
        let mut stale: Vec<&str> = self
            .last_heard
            .iter()
            .filter(|(_, heard)| now_epoch.saturating_sub(**heard) > max_age_secs)
            .map(|(id, _)| id.as_str())
            .collect();
        stale.sort_unstable();
        stale
    }

    pub fn len(&self) -> usize {
        self.last_heard.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last_heard.is_empty()
    }
}

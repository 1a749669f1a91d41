//! Per-node change detection on reported uptime.
//!
//! A node that has not sent a fresh telemetry packet since the last poll
//! reports exactly the same `uptimeSeconds`, so "uptime did not move" is the
//! signal for "nothing new to persist". The baseline is the last *persisted*
//! uptime; deciding and committing are separate calls so a failed write never
//! advances it.

use std::collections::HashMap;

use super::sample::NodeSample;

/// Minimum uptime movement, in hours, that counts as new telemetry (36 s).
pub const DEFAULT_UPTIME_EPSILON_HOURS: f64 = 0.01;

#[derive(Debug, Clone)]
pub struct ChangeDetector {
    baselines: HashMap<String, f64>,
    epsilon_hours: f64,
}

impl Default for ChangeDetector {
    fn default() -> Self {
        Self::new(DEFAULT_UPTIME_EPSILON_HOURS)
    }
}

impl ChangeDetector {
    pub fn new(epsilon_hours: f64) -> Self {
        Self {
            baselines: HashMap::new(),
            epsilon_hours,
        }
    }

    /// Hydrate from persisted rows in log order; the last row per node wins.
    pub fn from_samples<'a, I>(samples: I, epsilon_hours: f64) -> Self
    where
        I: IntoIterator<Item = &'a NodeSample>,
    {
        let mut detector = Self::new(epsilon_hours);
        for s in samples {
            detector.record(&s.node_id, s.uptime_hours);
        }
        detector
    }

    /// True when `candidate_uptime_hours` moved at least epsilon away from
    /// the persisted baseline (0 for a node never persisted).
    pub fn should_persist(&self, node_id: &str, candidate_uptime_hours: f64) -> bool {
        let previous = self.baselines.get(node_id).copied().unwrap_or(0.0);
        (candidate_uptime_hours - previous).abs() >= self.epsilon_hours
    }

    /// Commit a persisted uptime as the node's new baseline.
    pub fn record(&mut self, node_id: &str, uptime_hours: f64) {
        self.baselines.insert(node_id.to_string(), uptime_hours);
    }

    pub fn baseline(&self, node_id: &str) -> Option<f64> {
        self.baselines.get(node_id).copied()
    }

    pub fn epsilon_hours(&self) -> f64 {
        self.epsilon_hours
    }

    pub fn len(&self) -> usize {
        self.baselines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.baselines.is_empty()
    }
}

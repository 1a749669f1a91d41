//! Windowed history, latest batch and summary views over the durable log.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::{HashMap, HashSet};

use super::sample::{BatchRecord, NodeSample};
use super::TelemetryStore;
use crate::errors::StoreResult;

/// First and last sample instants covered by a summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// Aggregate view over a history window.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DataSummary {
    pub record_count: usize,
    pub unique_node_count: usize,
    pub time_range: Option<TimeRange>,
    pub latest_timestamp: Option<DateTime<Utc>>,
}

/// Oldest instant a window of `hours` ending at `now` still covers.
///
/// `None` means unbounded (infinite or out-of-range windows). Negative and
/// NaN windows collapse to zero length.
pub fn window_cutoff(now: DateTime<Utc>, hours: f64) -> Option<DateTime<Utc>> {
    if hours.is_nan() || hours <= 0.0 {
        return Some(now);
    }
    if hours.is_infinite() {
        return None;
    }
    let millis = (hours * 3_600_000.0).round() as i64;
    Duration::try_milliseconds(millis).and_then(|d| now.checked_sub_signed(d))
}

impl TelemetryStore {
    /// Samples from the last `window_hours` before `now`, ascending by time.
    ///
    /// With a `node_id` filter, repeated timestamps for that node collapse to
    /// the row written last. Without one, rows sharing a timestamp keep log
    /// order.
    pub async fn history_at(
        &self,
        window_hours: f64,
        node_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> StoreResult<Vec<NodeSample>> {
        let scan = self.read_table().await?;
        let cutoff = window_cutoff(now, window_hours);
        let in_window = scan
            .rows
            .into_iter()
            .filter(|r| cutoff.map_or(true, |c| r.timestamp >= c));

        let mut rows: Vec<NodeSample> = match node_id {
            None => in_window.collect(),
            Some(id) => {
                let mut out: Vec<NodeSample> = Vec::new();
                let mut by_ts: HashMap<DateTime<Utc>, usize> = HashMap::new();
                for row in in_window.filter(|r| r.node_id == id) {
                    match by_ts.get(&row.timestamp) {
                        Some(&idx) => out[idx] = row,
                        None => {
                            by_ts.insert(row.timestamp, out.len());
                            out.push(row);
                        }
                    }
                }
                out
            }
        };
        rows.sort_by_key(|r| r.timestamp);
        Ok(rows)
    }

    /// [`history_at`](Self::history_at) ending at the current time.
    pub async fn history(
        &self,
        window_hours: f64,
        node_id: Option<&str>,
    ) -> StoreResult<Vec<NodeSample>> {
        self.history_at(window_hours, node_id, Utc::now()).await
    }

    /// One node's deduplicated series over the last `window_hours`.
    pub async fn node_history(&self, node_id: &str, window_hours: f64) -> StoreResult<Vec<NodeSample>> {
        self.history(window_hours, Some(node_id)).await
    }

    /// Most recently appended batch record, if any parses.
    pub async fn latest(&self) -> StoreResult<Option<BatchRecord>> {
        let scan = self.read_stream().await?;
        Ok(scan.records.into_iter().last())
    }

    pub async fn summary_at(&self, window_hours: f64, now: DateTime<Utc>) -> StoreResult<DataSummary> {
        let rows = self.history_at(window_hours, None, now).await?;
        Ok(summarize(&rows))
    }

    pub async fn summary(&self, window_hours: f64) -> StoreResult<DataSummary> {
        self.summary_at(window_hours, Utc::now()).await
    }
}

/// Summary of rows already sorted ascending by timestamp.
fn summarize(rows: &[NodeSample]) -> DataSummary {
    let (Some(first), Some(last)) = (rows.first(), rows.last()) else {
        return DataSummary::default();
    };
    let nodes: HashSet<&str> = rows.iter().map(|r| r.node_id.as_str()).collect();
    DataSummary {
        record_count: rows.len(),
        unique_node_count: nodes.len(),
        time_range: Some(TimeRange {
            start: first.timestamp,
            end: last.timestamp,
        }),
        latest_timestamp: Some(last.timestamp),
    }
}

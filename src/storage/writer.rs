//! Batch writer: throttle, change detection, dual-form append.

use chrono::{DateTime, Duration, Utc};
use log::{debug, info};

use super::detector::{ChangeDetector, DEFAULT_UPTIME_EPSILON_HOURS};
use super::sample::{format_timestamp, truncate_to_second, AcceptedBatch, NodeSample};
use super::TelemetryStore;
use crate::errors::StoreResult;
use crate::logutil::node_label;
use crate::meshtastic::Snapshot;
use crate::metrics;

/// Minimum gap between the newest persisted row and a new batch.
pub const DEFAULT_THROTTLE_SECS: i64 = 240;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WriterSettings {
    pub throttle_secs: i64,
    pub uptime_epsilon_hours: f64,
}

impl Default for WriterSettings {
    fn default() -> Self {
        Self {
            throttle_secs: DEFAULT_THROTTLE_SECS,
            uptime_epsilon_hours: DEFAULT_UPTIME_EPSILON_HOURS,
        }
    }
}

/// What one `save` call did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SaveReport {
    /// Rows appended to the table (and nodes in the stream record).
    pub written: usize,
    /// The whole call was skipped by the global throttle.
    pub throttled: bool,
    /// Nodes with metrics whose uptime did not move.
    pub unchanged: usize,
    /// Nodes skipped for lacking a metrics block.
    pub without_metrics: usize,
}

/// The single writer of a [`TelemetryStore`]; owns the change detector.
#[derive(Debug)]
pub struct TelemetryWriter {
    store: TelemetryStore,
    detector: ChangeDetector,
    settings: WriterSettings,
    /// Timestamp of the newest persisted row; the throttle reference.
    latest_persisted: Option<DateTime<Utc>>,
}

impl TelemetryWriter {
    /// Open a writer, hydrating uptime baselines and the throttle reference
    /// from the existing table.
    pub async fn open(store: TelemetryStore, settings: WriterSettings) -> StoreResult<Self> {
        let scan = store.read_table().await?;
        let detector = ChangeDetector::from_samples(&scan.rows, settings.uptime_epsilon_hours);
        debug!(
            "Hydrated uptime baselines for {} node(s) from {} row(s)",
            detector.len(),
            scan.rows.len()
        );
        Ok(Self {
            store,
            detector,
            settings,
            latest_persisted: scan.rows.iter().map(|r| r.timestamp).max(),
        })
    }

    pub fn store(&self) -> &TelemetryStore {
        &self.store
    }

    pub fn detector(&self) -> &ChangeDetector {
        &self.detector
    }

    pub fn settings(&self) -> WriterSettings {
        self.settings
    }

    pub fn latest_persisted(&self) -> Option<DateTime<Utc>> {
        self.latest_persisted
    }

    /// Persist the nodes of `snapshot` that carry new telemetry, tagged `now`.
    ///
    /// Writes nothing when the newest persisted row is younger than the
    /// throttle, or when no node's uptime moved. On error nothing on disk
    /// changed and no baseline advanced.
    pub async fn save(&mut self, snapshot: &Snapshot, now: DateTime<Utc>) -> StoreResult<SaveReport> {
        let now = truncate_to_second(now);
        let mut report = SaveReport::default();

        if let Some(latest) = self.latest_persisted {
            let gap = now.signed_duration_since(latest);
            if gap < Duration::seconds(self.settings.throttle_secs) {
                info!(
                    "Batch at {} is {}s after previous ({}), skipping save",
                    format_timestamp(&now),
                    gap.num_seconds(),
                    format_timestamp(&latest)
                );
                metrics::inc_throttled_cycles();
                report.throttled = true;
                return Ok(report);
            }
        }

        let mut batch = AcceptedBatch::new(now);
        for (node_id, node) in snapshot {
            let Some(device_metrics) = node.device_metrics.as_ref() else {
                report.without_metrics += 1;
                continue;
            };
            let uptime_hours = device_metrics.uptime_hours();
            if !self.detector.should_persist(node_id, uptime_hours) {
                debug!(
                    "Uptime unchanged for {} ({:.4}h), not persisting",
                    node_label(node_id, node.long_name()),
                    uptime_hours
                );
                metrics::inc_unchanged_nodes();
                report.unchanged += 1;
                continue;
            }
            debug!(
                "Persisting {} (uptime {:.4}h, baseline {:?})",
                node_label(node_id, node.long_name()),
                uptime_hours,
                self.detector.baseline(node_id)
            );
            batch
                .samples
                .push(NodeSample::from_node(node_id, node, device_metrics, now));
        }

        if batch.is_empty() {
            debug!("No node carried new telemetry at {}", format_timestamp(&now));
            return Ok(report);
        }

        self.store.append_batch(&batch).await?;

        self.latest_persisted = Some(self.latest_persisted.map_or(now, |prev| prev.max(now)));
        for sample in &batch.samples {
            self.detector.record(&sample.node_id, sample.uptime_hours);
        }
        report.written = batch.len();
        metrics::add_rows_written(report.written);
        info!(
            "Saved data for {} node(s) at {}",
            report.written,
            format_timestamp(&now)
        );
        Ok(report)
    }
}

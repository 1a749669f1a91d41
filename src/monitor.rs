//! Ingestion loop.
//!
//! One [`Monitor`] drives the whole pipeline on a fixed period: pull a
//! snapshot, update the live freshness cache, hand the snapshot to the
//! writer, and every so often trim the log. The writer sits behind an async
//! mutex so that retention and any manually triggered cycle serialize with
//! the scheduled ones; a cycle that finds the writer busy is skipped rather
//! than queued.

use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use tokio::sync::Mutex;
use tokio::time::{Duration, MissedTickBehavior};

use crate::config::Config;
use crate::errors::{ProviderError, StoreResult};
use crate::freshness::{Freshness, FreshnessCache};
use crate::logutil::node_label;
use crate::meshtastic::NodeSnapshotProvider;
use crate::metrics;
use crate::storage::{SaveReport, TelemetryStore, TelemetryWriter, TrimReport};

/// Scheduling knobs for [`Monitor::run`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorSettings {
    pub poll_interval: Duration,
    /// `None` disables periodic trimming.
    pub retention_interval: Option<Duration>,
    pub retain_days: u32,
}

impl MonitorSettings {
    pub fn from_config(config: &Config) -> Self {
        let retention_interval = match config.storage.retention_check_minutes {
            0 => None,
            m => Some(Duration::from_secs(m * 60)),
        };
        Self {
            poll_interval: Duration::from_secs(config.monitor.poll_interval_seconds),
            retention_interval,
            retain_days: config.storage.retention_days,
        }
    }
}

/// Result of one ingestion cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    Completed {
        save: SaveReport,
        /// Nodes whose `lastHeard` moved since the previous cycle.
        advanced: Vec<String>,
        first_seen: usize,
    },
    /// No snapshot could be obtained; retried next period.
    ProviderUnavailable,
    /// A previous save is still in flight.
    WriterBusy,
    /// The log could not be read or written; nothing changed on disk.
    PersistenceFailed,
}

pub struct Monitor {
    store: TelemetryStore,
    writer: Arc<Mutex<TelemetryWriter>>,
    freshness: FreshnessCache,
    settings: MonitorSettings,
}

impl Monitor {
    pub fn new(writer: TelemetryWriter, settings: MonitorSettings) -> Self {
        Self {
            store: writer.store().clone(),
            writer: Arc::new(Mutex::new(writer)),
            freshness: FreshnessCache::new(),
            settings,
        }
    }

    /// Open the store and writer described by `config`.
    pub async fn from_config(config: &Config) -> StoreResult<Self> {
        let store = TelemetryStore::open(&config.storage.data_dir).await?;
        let writer = TelemetryWriter::open(store, config.storage.writer_settings()).await?;
        Ok(Self::new(writer, MonitorSettings::from_config(config)))
    }

    pub fn store(&self) -> &TelemetryStore {
        &self.store
    }

    pub fn freshness(&self) -> &FreshnessCache {
        &self.freshness
    }

    /// Shared handle for callers that need to serialize with the loop.
    pub fn writer(&self) -> Arc<Mutex<TelemetryWriter>> {
        Arc::clone(&self.writer)
    }

    /// Run one poll → freshness → persist cycle at `now`.
    pub async fn run_cycle(
        &mut self,
        provider: &mut dyn NodeSnapshotProvider,
        now: DateTime<Utc>,
    ) -> CycleOutcome {
        metrics::inc_polls();
        let snapshot = match provider.snapshot() {
            Ok(s) => s,
            Err(e) => {
                metrics::inc_provider_failures();
                match e {
                    ProviderError::Unavailable(_) => info!("{}: {}", provider.description(), e),
                    _ => warn!("{}: {}", provider.description(), e),
                }
                return CycleOutcome::ProviderUnavailable;
            }
        };

        let mut advanced = Vec::new();
        let mut first_seen = 0;
        for (node_id, freshness) in self.freshness.observe_snapshot(&snapshot) {
            match freshness {
                Freshness::Advanced => {
                    if let Some(node) = snapshot.get(&node_id) {
                        debug!("Heard from {}", node_label(&node_id, node.long_name()));
                    }
                    advanced.push(node_id);
                }
                Freshness::FirstSeen => first_seen += 1,
                Freshness::Unchanged => {}
            }
        }

        let Ok(mut writer) = self.writer.try_lock() else {
            warn!("Previous save still in flight, skipping this cycle");
            return CycleOutcome::WriterBusy;
        };
        match writer.save(&snapshot, now).await {
            Ok(save) => {
                debug!(
                    "Cycle: {} node(s), {} advanced, {} new, {} written",
                    snapshot.len(),
                    advanced.len(),
                    first_seen,
                    save.written
                );
                CycleOutcome::Completed {
                    save,
                    advanced,
                    first_seen,
                }
            }
            Err(e) => {
                metrics::inc_io_failures();
                error!("Failed to persist telemetry, skipping cycle: {}", e);
                CycleOutcome::PersistenceFailed
            }
        }
    }

    /// Trim the log to the configured horizon, serialized with the writer.
    pub async fn run_retention(&self, now: DateTime<Utc>) -> StoreResult<TrimReport> {
        let _writer = self.writer.lock().await;
        self.store.trim_at(self.settings.retain_days, now).await
    }

    /// Poll until Ctrl-C.
    pub async fn run(&mut self, mut provider: Box<dyn NodeSnapshotProvider>) -> Result<()> {
        info!(
            "Monitoring {} every {}s (data in {})",
            provider.description(),
            self.settings.poll_interval.as_secs(),
            self.store.data_dir().display()
        );

        let mut poll = tokio::time::interval(self.settings.poll_interval);
        poll.set_missed_tick_behavior(MissedTickBehavior::Skip);

        // Never fires when retention is disabled
        let retention_period = self
            .settings
            .retention_interval
            .unwrap_or(Duration::from_secs(86_400 * 365));
        let mut retention = tokio::time::interval(retention_period);
        retention.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // First tick completes immediately; the startup cycle does not need a trim
        retention.tick().await;

        loop {
            tokio::select! {
                _ = poll.tick() => {
                    self.run_cycle(provider.as_mut(), Utc::now()).await;
                }
                _ = retention.tick(), if self.settings.retention_interval.is_some() => {
                    if let Err(e) = self.run_retention(Utc::now()).await {
                        metrics::inc_io_failures();
                        warn!("Retention pass failed: {}", e);
                    }
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("Received shutdown signal");
                    break;
                }
            }
        }

        info!("Monitor stopped");
        Ok(())
    }
}

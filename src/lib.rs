//! # MeshViewer - Telemetry History for Meshtastic Networks
//!
//! MeshViewer samples the node database of a Meshtastic mesh on a fixed
//! period and keeps a durable history of every node's battery level,
//! voltage, uptime and channel utilization for charting.
//!
//! ## Features
//!
//! - **Change Detection**: only nodes whose reported uptime moved since the
//!   last persisted sample are written, so stale re-reads never pile up.
//! - **Global Throttle**: bursty polling cannot write two batches closer
//!   than the configured gap (240 s by default).
//! - **Dual-Form Log**: a CSV table for charting tools and a JSON-lines batch
//!   stream, both derived from the same accepted batch and appended
//!   together under one lock.
//! - **Windowed Queries**: fractional-hour history windows, per-node series
//!   with duplicate timestamps collapsed, latest batch and summary views.
//! - **Retention**: periodic trimming of both forms to a day horizon.
//! - **Live Freshness**: per-node `lastHeard` tracking for "just reported"
//!   highlighting.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use meshviewer::config::Config;
//! use meshviewer::meshtastic::JsonFileProvider;
//! use meshviewer::monitor::Monitor;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.toml").await?;
//!     let mut monitor = Monitor::from_config(&config).await?;
//!     let provider = JsonFileProvider::new(&config.monitor.snapshot_file);
//!     monitor.run(Box::new(provider)).await
//! }
//! ```
//!
//! ## Module Organization
//!
//! - [`meshtastic`] - node snapshot model, providers and display helpers
//! - [`freshness`] - live `lastHeard` tracking
//! - [`storage`] - durable log, change detector, writer, queries, retention
//! - [`monitor`] - the periodic ingestion loop
//! - [`config`] - configuration loading and validation
//! - [`metrics`] - process-wide ingestion counters
//! - [`validation`] - node id normalisation
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │ Snapshot source │ ← node db dump / transport
//! └─────────────────┘
//!          │
//! ┌─────────────────┐   ┌─────────────────┐
//! │    Monitor      │ → │ Freshness cache │ ← live signal only
//! └─────────────────┘   └─────────────────┘
//!          │
//! ┌─────────────────┐
//! │ Writer +        │ ← throttle, uptime change detection
//! │ ChangeDetector  │
//! └─────────────────┘
//!          │
//! ┌─────────────────┐
//! │  Telemetry log  │ ← history / latest / summary / trim
//! └─────────────────┘
//! ```

pub mod config;
pub mod errors;
pub mod freshness;
pub mod logutil;
pub mod meshtastic;
pub mod metrics;
pub mod monitor;
pub mod storage;
pub mod validation;

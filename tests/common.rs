//! Test utilities & fixtures.
//! Snapshot builders and a scratch telemetry store under a temp dir.

use chrono::{DateTime, TimeZone, Utc};
use meshviewer::meshtastic::{DeviceMetrics, NodeRecord, Snapshot, User};
use meshviewer::storage::{TelemetryStore, TelemetryWriter, WriterSettings};

/// Fixed base instant so timestamps in assertions are readable.
#[allow(dead_code)]
pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
}

/// `t0() + secs`.
#[allow(dead_code)]
pub fn at(secs: i64) -> DateTime<Utc> {
    t0() + chrono::Duration::seconds(secs)
}

/// A node with a metrics block.
#[allow(dead_code)]
pub fn node(name: &str, battery: u32, voltage: f64, uptime_hours: f64) -> NodeRecord {
    NodeRecord {
        num: None,
        user: Some(User {
            id: None,
            long_name: Some(name.to_string()),
            short_name: Some(name.chars().take(4).collect()),
            hw_model: Some("TBEAM".to_string()),
        }),
        device_metrics: Some(DeviceMetrics {
            battery_level: Some(battery),
            voltage: Some(voltage),
            channel_utilization: Some(4.5),
            air_util_tx: None,
            uptime_seconds: Some((uptime_hours * 3600.0).round() as u64),
        }),
        last_heard: Some(1_714_564_800),
        is_favorite: None,
    }
}

/// A node that has announced itself but never sent telemetry.
#[allow(dead_code)]
pub fn silent_node(name: &str) -> NodeRecord {
    NodeRecord {
        device_metrics: None,
        ..node(name, 0, 0.0, 0.0)
    }
}

#[allow(dead_code)]
pub fn snapshot(nodes: Vec<(&str, NodeRecord)>) -> Snapshot {
    nodes
        .into_iter()
        .map(|(id, n)| (id.to_string(), n))
        .collect()
}

/// Fresh store plus writer with default settings in a temp dir.
#[allow(dead_code)]
pub async fn scratch_writer() -> (tempfile::TempDir, TelemetryWriter) {
    let tmp = tempfile::tempdir().expect("tempdir");
    let store = TelemetryStore::open(tmp.path()).await.expect("open store");
    let writer = TelemetryWriter::open(store, WriterSettings::default())
        .await
        .expect("open writer");
    (tmp, writer)
}

/// Write a raw table file (header included by the caller) into `dir`.
#[allow(dead_code)]
pub fn write_table(dir: &std::path::Path, content: &str) {
    std::fs::write(dir.join("node_data.csv"), content).expect("write table");
}

#[allow(dead_code)]
pub const HEADER: &str = "timestamp,node_id,short_name,long_name,hw_model,battery_level,voltage,is_charging,uptime_hours,channel_utilization,last_heard,is_favorite\n";

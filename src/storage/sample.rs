//! Persisted sample types and their two on-disk shapes.
//!
//! An [`AcceptedBatch`] is the single value a poll produces; the table rows
//! and the stream record are both derived from it, so the two forms always
//! carry the same samples under the same timestamp.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;

use crate::errors::{StoreError, StoreResult};
use crate::meshtastic::{DeviceMetrics, NodeRecord};

/// Text form of the `timestamp` column; sorts lexically in time order.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// Column order of the table form.
pub const TABLE_HEADER: [&str; 12] = [
    "timestamp",
    "node_id",
    "short_name",
    "long_name",
    "hw_model",
    "battery_level",
    "voltage",
    "is_charging",
    "uptime_hours",
    "channel_utilization",
    "last_heard",
    "is_favorite",
];

/// One accepted observation of one node; one row of the table form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSample {
    #[serde(
        serialize_with = "serialize_timestamp",
        deserialize_with = "deserialize_timestamp"
    )]
    pub timestamp: DateTime<Utc>,
    pub node_id: String,
    pub short_name: String,
    pub long_name: String,
    pub hw_model: String,
    pub battery_level: u32,
    pub voltage: f64,
    #[serde(deserialize_with = "deserialize_bool_text")]
    pub is_charging: bool,
    pub uptime_hours: f64,
    pub channel_utilization: f64,
    pub last_heard: i64,
    #[serde(deserialize_with = "deserialize_bool_text")]
    pub is_favorite: bool,
}

impl NodeSample {
    /// Derive the persisted sample for a node that has a metrics block.
    pub fn from_node(
        node_id: &str,
        node: &NodeRecord,
        metrics: &DeviceMetrics,
        timestamp: DateTime<Utc>,
    ) -> Self {
        NodeSample {
            timestamp,
            node_id: node_id.to_string(),
            short_name: node.short_name().to_string(),
            long_name: node.long_name().to_string(),
            hw_model: node.hw_model().to_string(),
            battery_level: metrics.battery_level(),
            voltage: metrics.voltage(),
            is_charging: metrics.is_charging(),
            uptime_hours: metrics.uptime_hours(),
            channel_utilization: metrics.channel_utilization(),
            last_heard: node.last_heard(),
            is_favorite: node.is_favorite(),
        }
    }
}

/// Identity block inside a stream record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordUser {
    pub short_name: String,
    pub long_name: String,
    pub hw_model: String,
}

/// Metrics block inside a stream record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordMetrics {
    pub battery_level: u32,
    pub voltage: f64,
    pub is_charging: bool,
    pub uptime_hours: f64,
    pub channel_utilization: f64,
}

/// Per-node entry of a stream record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordNode {
    pub user: RecordUser,
    pub device_metrics: RecordMetrics,
    pub last_heard: i64,
    pub is_favorite: bool,
}

/// One line of the record stream: everything accepted in one poll.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchRecord {
    /// Epoch seconds.
    pub timestamp: i64,
    #[serde(alias = "timestamp_str")]
    pub timestamp_text: String,
    pub nodes: BTreeMap<String, RecordNode>,
}

impl BatchRecord {
    /// Expand back into table rows, in node id order.
    pub fn samples(&self) -> Vec<NodeSample> {
        let Some(timestamp) = Utc.timestamp_opt(self.timestamp, 0).single() else {
            return Vec::new();
        };
        self.nodes
            .iter()
            .map(|(id, n)| NodeSample {
                timestamp,
                node_id: id.clone(),
                short_name: n.user.short_name.clone(),
                long_name: n.user.long_name.clone(),
                hw_model: n.user.hw_model.clone(),
                battery_level: n.device_metrics.battery_level,
                voltage: n.device_metrics.voltage,
                is_charging: n.device_metrics.is_charging,
                uptime_hours: n.device_metrics.uptime_hours,
                channel_utilization: n.device_metrics.channel_utilization,
                last_heard: n.last_heard,
                is_favorite: n.is_favorite,
            })
            .collect()
    }
}

/// Samples accepted in one poll, all tagged with the poll instant.
#[derive(Debug, Clone, PartialEq)]
pub struct AcceptedBatch {
    pub timestamp: DateTime<Utc>,
    pub samples: Vec<NodeSample>,
}

impl AcceptedBatch {
    pub fn new(timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            samples: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Stream form of this batch.
    pub fn to_record(&self) -> BatchRecord {
        let nodes = self
            .samples
            .iter()
            .map(|s| {
                (
                    s.node_id.clone(),
                    RecordNode {
                        user: RecordUser {
                            short_name: s.short_name.clone(),
                            long_name: s.long_name.clone(),
                            hw_model: s.hw_model.clone(),
                        },
                        device_metrics: RecordMetrics {
                            battery_level: s.battery_level,
                            voltage: s.voltage,
                            is_charging: s.is_charging,
                            uptime_hours: s.uptime_hours,
                            channel_utilization: s.channel_utilization,
                        },
                        last_heard: s.last_heard,
                        is_favorite: s.is_favorite,
                    },
                )
            })
            .collect();
        BatchRecord {
            timestamp: self.timestamp.timestamp(),
            timestamp_text: format_timestamp(&self.timestamp),
            nodes,
        }
    }

    /// Table rows of this batch, without header.
    pub fn table_rows(&self) -> StoreResult<String> {
        encode_rows(&self.samples, false)
    }

    /// Stream line of this batch, newline terminated.
    pub fn record_line(&self) -> StoreResult<String> {
        Ok(serde_json::to_string(&self.to_record())? + "\n")
    }
}

/// Encode rows as CSV text, optionally preceded by the header line.
pub fn encode_rows(rows: &[NodeSample], with_header: bool) -> StoreResult<String> {
    let mut wtr = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(Vec::new());
    if with_header {
        wtr.write_record(TABLE_HEADER)?;
    }
    for row in rows {
        wtr.serialize(row)?;
    }
    let bytes = wtr.into_inner().map_err(|e| StoreError::Io(e.into_error()))?;
    String::from_utf8(bytes)
        .map_err(|e| StoreError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))
}

/// Drop sub-second precision; the log has second resolution.
pub fn truncate_to_second(ts: DateTime<Utc>) -> DateTime<Utc> {
    Utc.timestamp_opt(ts.timestamp(), 0).single().unwrap_or(ts)
}

pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

/// Parse a `timestamp` cell.
///
/// Accepts RFC 3339 and naive ISO-8601 with either `T` or a space separator
/// and optional fractional seconds; naive values are taken as UTC.
pub fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(text, fmt).ok())
        .map(|naive| Utc.from_utc_datetime(&naive))
}

fn serialize_timestamp<S: Serializer>(ts: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&format_timestamp(ts))
}

fn deserialize_timestamp<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
    let raw = String::deserialize(d)?;
    parse_timestamp(&raw)
        .ok_or_else(|| serde::de::Error::custom(format!("unparseable timestamp '{}'", raw)))
}

fn deserialize_bool_text<'de, D: Deserializer<'de>>(d: D) -> Result<bool, D::Error> {
    let raw = String::deserialize(d)?;
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" => Ok(true),
        "false" | "0" => Ok(false),
        other => Err(serde::de::Error::custom(format!("not a boolean: '{}'", other))),
    }
}

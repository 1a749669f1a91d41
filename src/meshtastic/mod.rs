//! # Meshtastic Node Snapshot Module
//!
//! This module models the node database a Meshtastic client keeps for the
//! mesh: one record per heard node carrying the user identity block, the
//! latest `deviceMetrics` telemetry and the `lastHeard` epoch. The radio link
//! itself (serial, TCP, packet decoding) lives outside this crate; the monitor
//! only consumes whole snapshots through [`NodeSnapshotProvider`].
//!
//! ## Snapshot Format
//!
//! Snapshots use the same camelCase shape the Meshtastic Python client dumps:
//!
//! ```json
//! {
//!   "!a1b2c3d4": {
//!     "num": 2712847316,
//!     "user": { "id": "!a1b2c3d4", "longName": "Base Camp", "shortName": "BC", "hwModel": "TBEAM" },
//!     "deviceMetrics": { "batteryLevel": 85, "voltage": 3.7, "channelUtilization": 4.2, "uptimeSeconds": 3600 },
//!     "lastHeard": 1700000000,
//!     "isFavorite": true
//!   }
//! }
//! ```
//!
//! Fields the monitor does not use (position, snr, hopsAway, ...) are ignored.
//!
//! ## Display Helpers
//!
//! The battery and uptime formatters reproduce the compact one-line node
//! listing used by the `nodes` command:
//!
//! ```text
//! !a1b2c3d4  Base Camp                 - TBEAM                 :  85%, 3.700V  : up     1.0 hrs
//! ```

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;

use crate::errors::ProviderError;

pub mod provider;

pub use provider::{JsonFileProvider, StaticProvider};

/// Battery level value the firmware reports while on external power.
pub const CHARGING_BATTERY_LEVEL: u32 = 101;

/// Placeholder for identity fields a node has not announced yet.
pub const UNKNOWN: &str = "Unknown";

/// Full node map keyed by node address, ordered for stable output.
pub type Snapshot = BTreeMap<String, NodeRecord>;

/// Identity block announced by a node (NODEINFO).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub long_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub short_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hw_model: Option<String>,
}

/// Device telemetry block (TELEMETRY_APP device metrics).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceMetrics {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub battery_level: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voltage: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_utilization: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub air_util_tx: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uptime_seconds: Option<u64>,
}

impl DeviceMetrics {
    pub fn battery_level(&self) -> u32 {
        self.battery_level.unwrap_or(0)
    }

    pub fn voltage(&self) -> f64 {
        self.voltage.unwrap_or(0.0)
    }

    pub fn channel_utilization(&self) -> f64 {
        self.channel_utilization.unwrap_or(0.0)
    }

    /// Uptime since boot in fractional hours.
    pub fn uptime_hours(&self) -> f64 {
        self.uptime_seconds.unwrap_or(0) as f64 / 3600.0
    }

    /// Level 101 is a charging flag, not a percentage.
    pub fn is_charging(&self) -> bool {
        self.battery_level() == CHARGING_BATTERY_LEVEL
    }
}

/// One entry of the node database.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<User>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_metrics: Option<DeviceMetrics>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_heard: Option<i64>,
    /// The client only ever writes this key for favorites; presence is the
    /// marker, whatever the value (`null` included).
    #[serde(
        default,
        deserialize_with = "deserialize_marker",
        skip_serializing_if = "Option::is_none"
    )]
    pub is_favorite: Option<bool>,
}

impl NodeRecord {
    pub fn short_name(&self) -> &str {
        self.user
            .as_ref()
            .and_then(|u| u.short_name.as_deref())
            .unwrap_or(UNKNOWN)
    }

    pub fn long_name(&self) -> &str {
        self.user
            .as_ref()
            .and_then(|u| u.long_name.as_deref())
            .unwrap_or(UNKNOWN)
    }

    pub fn hw_model(&self) -> &str {
        self.user
            .as_ref()
            .and_then(|u| u.hw_model.as_deref())
            .unwrap_or(UNKNOWN)
    }

    pub fn last_heard(&self) -> i64 {
        self.last_heard.unwrap_or(0)
    }

    pub fn is_favorite(&self) -> bool {
        self.is_favorite.is_some()
    }
}

/// `Some(_)` for any present value; only an absent key stays `None`.
fn deserialize_marker<'de, D: Deserializer<'de>>(d: D) -> Result<Option<bool>, D::Error> {
    let value = serde_json::Value::deserialize(d)?;
    Ok(Some(value.as_bool().unwrap_or(true)))
}

/// Source of whole-mesh node snapshots.
///
/// Implementations wrap whatever transport keeps the node database current.
/// A failed call is never fatal: the caller skips the cycle.
pub trait NodeSnapshotProvider: Send {
    /// Return the current node map.
    fn snapshot(&mut self) -> Result<Snapshot, ProviderError>;

    /// Human-readable description for log lines.
    fn description(&self) -> &str;
}

/// `" Chg, 4.120V "` while charging, `" 85%, 3.700V "` otherwise.
pub fn battery_display(metrics: &DeviceMetrics) -> String {
    let mut out = if metrics.is_charging() {
        " Chg".to_string()
    } else {
        format!("{:3}%", metrics.battery_level())
    };
    out.push_str(&format!(", {:.3}V ", metrics.voltage()));
    out
}

/// `"up    12.5 hrs"`
pub fn uptime_display(metrics: &DeviceMetrics) -> String {
    format!("up {:7.1} hrs", metrics.uptime_hours())
}

/// One listing line for a node, or `None` when it has no telemetry to show.
pub fn summary_line(node_id: &str, node: &NodeRecord) -> Option<String> {
    let metrics = node.device_metrics.as_ref()?;
    Some(format!(
        "{}  {:25} - {:21} : {} : {}",
        node_id,
        node.long_name(),
        node.hw_model(),
        battery_display(metrics),
        uptime_display(metrics)
    ))
}

/// Listing for the whole mesh, or favorites only.
pub fn listing(snapshot: &Snapshot, whole_mesh: bool) -> Vec<String> {
    snapshot
        .iter()
        .filter(|(_, node)| whole_mesh || node.is_favorite())
        .filter_map(|(id, node)| summary_line(id, node))
        .collect()
}

/// Split node ids into `(favorites, others)`.
pub fn partition_favorites(snapshot: &Snapshot) -> (Vec<&str>, Vec<&str>) {
    let mut favorites = Vec::new();
    let mut others = Vec::new();
    for (id, node) in snapshot {
        if node.is_favorite() {
            favorites.push(id.as_str());
        } else {
            others.push(id.as_str());
        }
    }
    (favorites, others)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(json: &str) -> NodeRecord {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn parses_client_dump_shape() {
        let n = node(
            r#"{"num": 1, "user": {"longName": "Base Camp", "shortName": "BC", "hwModel": "TBEAM"},
                "deviceMetrics": {"batteryLevel": 85, "voltage": 3.7, "uptimeSeconds": 7200, "airUtilTx": 0.3},
                "lastHeard": 1700000000, "snr": 6.5, "isFavorite": true}"#,
        );
        assert_eq!(n.long_name(), "Base Camp");
        assert_eq!(n.last_heard(), 1_700_000_000);
        assert!(n.is_favorite());
        let m = n.device_metrics.unwrap();
        assert_eq!(m.battery_level(), 85);
        assert!((m.uptime_hours() - 2.0).abs() < f64::EPSILON);
        assert_eq!(m.channel_utilization(), 0.0);
    }

    #[test]
    fn missing_user_fields_default_to_unknown() {
        let n = node(r#"{"user": {"longName": "Only Long"}}"#);
        assert_eq!(n.short_name(), UNKNOWN);
        assert_eq!(n.hw_model(), UNKNOWN);
        let bare = NodeRecord::default();
        assert_eq!(bare.long_name(), UNKNOWN);
        assert!(!bare.is_favorite());
    }

    #[test]
    fn favorite_marker_is_key_presence() {
        assert!(node(r#"{"isFavorite": null}"#).is_favorite());
        assert!(node(r#"{"isFavorite": false}"#).is_favorite());
        assert!(node(r#"{"isFavorite": true}"#).is_favorite());
        assert!(!node(r#"{"lastHeard": 1}"#).is_favorite());
    }

    #[test]
    fn battery_display_flags_charging() {
        let charging = DeviceMetrics {
            battery_level: Some(101),
            voltage: Some(4.12),
            ..Default::default()
        };
        assert_eq!(battery_display(&charging), " Chg, 4.120V ");
        let normal = DeviceMetrics {
            battery_level: Some(85),
            voltage: Some(3.7),
            ..Default::default()
        };
        assert_eq!(battery_display(&normal), " 85%, 3.700V ");
    }

    #[test]
    fn uptime_display_is_fixed_width() {
        let m = DeviceMetrics {
            uptime_seconds: Some(45_000),
            ..Default::default()
        };
        assert_eq!(uptime_display(&m), "up    12.5 hrs");
    }

    #[test]
    fn listing_respects_favorites_and_metrics() {
        let mut snap = Snapshot::new();
        snap.insert(
            "!00000001".into(),
            node(r#"{"deviceMetrics": {"batteryLevel": 50}, "isFavorite": true}"#),
        );
        snap.insert(
            "!00000002".into(),
            node(r#"{"deviceMetrics": {"batteryLevel": 60}}"#),
        );
        snap.insert("!00000003".into(), node(r#"{"isFavorite": true}"#));

        let favs = listing(&snap, false);
        assert_eq!(favs.len(), 1);
        assert!(favs[0].starts_with("!00000001"));
        assert_eq!(listing(&snap, true).len(), 2);

        let (f, o) = partition_favorites(&snap);
        assert_eq!(f, vec!["!00000001", "!00000003"]);
        assert_eq!(o, vec!["!00000002"]);
    }
}

//! Retention: drop everything older than the horizon from both log forms.
//!
//! The table and the record stream are trimmed with the same cutoff in one
//! locked pass, so a sample survives in one form exactly when it survives in
//! the other. Malformed rows and lines are dropped by the rewrite.

use chrono::{DateTime, Duration, Utc};
use log::{debug, info};

use super::sample::{encode_rows, format_timestamp};
use super::TelemetryStore;
use crate::errors::StoreResult;
use crate::metrics;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrimReport {
    pub rows_kept: usize,
    pub rows_removed: usize,
    pub records_kept: usize,
    pub records_removed: usize,
    pub malformed_dropped: usize,
}

impl TrimReport {
    pub fn changed(&self) -> bool {
        self.rows_removed > 0 || self.records_removed > 0 || self.malformed_dropped > 0
    }
}

impl TelemetryStore {
    /// Keep only data with `timestamp >= now - retain_days`.
    ///
    /// A horizon reaching past the representable range keeps everything.
    pub async fn trim_at(&self, retain_days: u32, now: DateTime<Utc>) -> StoreResult<TrimReport> {
        let Some(cutoff) = Duration::try_days(i64::from(retain_days))
            .and_then(|d| now.checked_sub_signed(d))
        else {
            debug!("Retention horizon of {} days reaches past the epoch range, nothing to trim", retain_days);
            return Ok(TrimReport::default());
        };

        let _lock = self.lock().await?;

        let table = Self::parse_table(&Self::read_locked(self.table_path())?);
        let stream = Self::parse_stream(&Self::read_locked(self.stream_path())?);

        let rows_total = table.rows.len();
        let records_total = stream.records.len();
        let kept_rows: Vec<_> = table
            .rows
            .into_iter()
            .filter(|r| r.timestamp >= cutoff)
            .collect();
        let cutoff_epoch = cutoff.timestamp();
        let kept_records: Vec<_> = stream
            .records
            .into_iter()
            .filter(|r| r.timestamp >= cutoff_epoch)
            .collect();

        let report = TrimReport {
            rows_kept: kept_rows.len(),
            rows_removed: rows_total - kept_rows.len(),
            records_kept: kept_records.len(),
            records_removed: records_total - kept_records.len(),
            malformed_dropped: table.malformed + stream.malformed,
        };
        if !report.changed() {
            debug!("Nothing older than {} to trim", format_timestamp(&cutoff));
            return Ok(report);
        }

        let table_text = encode_rows(&kept_rows, true)?;
        let mut stream_text = String::new();
        for record in &kept_records {
            stream_text.push_str(&serde_json::to_string(record)?);
            stream_text.push('\n');
        }
        self.replace_both(&table_text, &stream_text)?;

        metrics::add_rows_trimmed(report.rows_removed);
        info!(
            "Trimmed {} row(s) and {} batch record(s) older than {} ({} malformed dropped)",
            report.rows_removed,
            report.records_removed,
            format_timestamp(&cutoff),
            report.malformed_dropped
        );
        Ok(report)
    }

    /// [`trim_at`](Self::trim_at) relative to the current time.
    pub async fn trim(&self, retain_days: u32) -> StoreResult<TrimReport> {
        self.trim_at(retain_days, Utc::now()).await
    }
}

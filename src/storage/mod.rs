//! # Storage Module - Telemetry Log
//!
//! This module owns the durable telemetry log and everything that reads or
//! writes it: change detection, the batch writer, windowed queries and
//! retention.
//!
//! ## Layout
//!
//! ```text
//! data/
//! ├── node_data.csv     ← table form: header + one row per accepted sample
//! ├── node_data.jsonl   ← record stream: one JSON line per accepted poll
//! └── .telemetry.lock   ← exclusive lock shared by every writer
//! ```
//!
//! Both forms are derived from the same [`AcceptedBatch`] and appended
//! together under one lock: the stream line first, then the table rows, each
//! with a single write and fsync. If the table append fails the stream is
//! truncated back, so the table (which drives the throttle and baseline
//! hydration) never lags behind a failed save. Retention rewrites whole files
//! through a temp file and rename instead.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use meshviewer::storage::{TelemetryStore, TelemetryWriter, WriterSettings};
//! use meshviewer::meshtastic::Snapshot;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let store = TelemetryStore::open("./data").await?;
//!     let mut writer = TelemetryWriter::open(store.clone(), WriterSettings::default()).await?;
//!
//!     let snapshot = Snapshot::new();
//!     let report = writer.save(&snapshot, chrono::Utc::now()).await?;
//!     println!("wrote {} rows", report.written);
//!
//!     let last_day = store.history(24.0, None).await?;
//!     println!("{} samples in the last 24h", last_day.len());
//!     Ok(())
//! }
//! ```
//!
//! ## Error Handling
//!
//! - File system failures surface as [`StoreError`]; the caller skips the
//!   cycle and nothing already on disk is modified.
//! - Rows or records that fail to parse are skipped with a warning and
//!   counted in [`crate::metrics`]; they never fail a read.

use log::{debug, warn};
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use fs2::FileExt;
use tokio::fs as tfs;

use crate::errors::{StoreError, StoreResult};
use crate::metrics;

pub mod detector;
pub mod query;
pub mod retention;
pub mod sample;
pub mod writer;

pub use detector::{ChangeDetector, DEFAULT_UPTIME_EPSILON_HOURS};
pub use query::{DataSummary, TimeRange};
pub use retention::TrimReport;
pub use sample::{format_timestamp, parse_timestamp, AcceptedBatch, BatchRecord, NodeSample, TABLE_HEADER};
pub use writer::{SaveReport, TelemetryWriter, WriterSettings, DEFAULT_THROTTLE_SECS};

pub const TABLE_FILE: &str = "node_data.csv";
pub const STREAM_FILE: &str = "node_data.jsonl";
const LOCK_FILE: &str = ".telemetry.lock";

/// Lock acquisition gives up after `LOCK_ATTEMPTS * LOCK_RETRY_DELAY`.
const LOCK_ATTEMPTS: u32 = 20;
const LOCK_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Parsed table form plus the number of rows that had to be skipped.
#[derive(Debug, Default)]
pub(crate) struct TableScan {
    pub rows: Vec<NodeSample>,
    pub malformed: usize,
}

/// Parsed record stream plus the number of lines that had to be skipped.
#[derive(Debug, Default)]
pub(crate) struct StreamScan {
    pub records: Vec<BatchRecord>,
    pub malformed: usize,
}

/// Handle on the durable log in one data directory.
///
/// Cheap to clone; reads take no lock and may run concurrently with each
/// other and with a writer.
#[derive(Debug, Clone)]
pub struct TelemetryStore {
    data_dir: PathBuf,
    table_path: PathBuf,
    stream_path: PathBuf,
    lock_path: PathBuf,
}

impl TelemetryStore {
    /// Open (creating if needed) the log in `data_dir`.
    pub async fn open<P: AsRef<Path>>(data_dir: P) -> StoreResult<Self> {
        let data_dir = data_dir.as_ref().to_path_buf();
        tfs::create_dir_all(&data_dir).await?;
        let store = TelemetryStore {
            table_path: data_dir.join(TABLE_FILE),
            stream_path: data_dir.join(STREAM_FILE),
            lock_path: data_dir.join(LOCK_FILE),
            data_dir,
        };
        if !store.table_path.exists() {
            let _lock = store.lock().await?;
            // Re-check under the lock: another process may have won the race
            if !store.table_path.exists() {
                let header = sample::encode_rows(&[], true)?;
                Self::write_file_atomic(&store.table_path, &header)?;
            }
        }
        Ok(store)
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn table_path(&self) -> &Path {
        &self.table_path
    }

    pub fn stream_path(&self) -> &Path {
        &self.stream_path
    }

    /// Take the exclusive writer lock; released when the returned file drops.
    ///
    /// Retries a contended lock for a bounded time, then fails with
    /// [`StoreError::Lock`].
    pub(crate) async fn lock(&self) -> StoreResult<File> {
        let lock_file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(&self.lock_path)?;
        let contended = fs2::lock_contended_error().kind();
        let mut attempt = 1;
        loop {
            match lock_file.try_lock_exclusive() {
                Ok(()) => return Ok(lock_file),
                Err(e) if e.kind() == contended && attempt < LOCK_ATTEMPTS => {
                    if attempt == 1 {
                        debug!("{} is held by another writer, waiting", self.lock_path.display());
                    }
                    attempt += 1;
                    tokio::time::sleep(LOCK_RETRY_DELAY).await;
                }
                Err(source) => {
                    return Err(StoreError::Lock {
                        path: self.lock_path.display().to_string(),
                        source,
                    })
                }
            }
        }
    }

    /// Read the table form without locking.
    pub(crate) async fn read_table(&self) -> StoreResult<TableScan> {
        match tfs::read_to_string(&self.table_path).await {
            Ok(content) => Ok(Self::parse_table(&content)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(TableScan::default()),
            Err(e) => Err(e.into()),
        }
    }

    /// Read the record stream without locking.
    pub(crate) async fn read_stream(&self) -> StoreResult<StreamScan> {
        match tfs::read_to_string(&self.stream_path).await {
            Ok(content) => Ok(Self::parse_stream(&content)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(StreamScan::default()),
            Err(e) => Err(e.into()),
        }
    }

    /// Blocking read of a file that may not exist yet; caller holds the lock.
    pub(crate) fn read_locked(path: &Path) -> StoreResult<String> {
        match fs::read_to_string(path) {
            Ok(content) => Ok(content),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(String::new()),
            Err(e) => Err(e.into()),
        }
    }

    pub(crate) fn parse_table(content: &str) -> TableScan {
        // Guard against leading NULs from a partial write on an older version
        let cleaned = content.trim_start_matches('\0');
        let mut rdr = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(cleaned.as_bytes());
        let mut scan = TableScan::default();
        for (idx, result) in rdr.deserialize::<NodeSample>().enumerate() {
            match result {
                Ok(row) => scan.rows.push(row),
                Err(e) => {
                    // +2: one for the header, one for 1-based line numbers
                    warn!("Skipping malformed telemetry row {}: {}", idx + 2, e);
                    scan.malformed += 1;
                }
            }
        }
        if scan.malformed > 0 {
            metrics::add_malformed_skipped(scan.malformed);
        }
        scan
    }

    pub(crate) fn parse_stream(content: &str) -> StreamScan {
        let cleaned = content.trim_start_matches('\0');
        let mut scan = StreamScan::default();
        for (idx, line) in cleaned.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<BatchRecord>(line) {
                Ok(record) => scan.records.push(record),
                Err(e) => {
                    warn!("Skipping malformed batch record on line {}: {}", idx + 1, e);
                    scan.malformed += 1;
                }
            }
        }
        if scan.malformed > 0 {
            metrics::add_malformed_skipped(scan.malformed);
        }
        scan
    }

    /// Append one batch to both forms.
    ///
    /// On error neither file keeps any part of the batch.
    pub(crate) async fn append_batch(&self, batch: &AcceptedBatch) -> StoreResult<()> {
        let rows = batch.table_rows()?;
        let line = batch.record_line()?;

        let _lock = self.lock().await?;

        let stream_len = Self::append_file(&self.stream_path, "", &line)?;
        let header = sample::encode_rows(&[], true)?;
        if let Err(e) = Self::append_file(&self.table_path, &header, &rows) {
            if let Err(rollback) = Self::truncate_to(&self.stream_path, stream_len) {
                warn!(
                    "Failed to roll back {} after table append error: {}",
                    self.stream_path.display(),
                    rollback
                );
            }
            return Err(e);
        }
        Ok(())
    }

    /// Append `content` with one write and fsync, returning the length the
    /// file had before. An empty file gets `preamble` first, and a missing
    /// final newline is restored.
    fn append_file(path: &Path, preamble: &str, content: &str) -> StoreResult<u64> {
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(path)?;
        let original_len = file.metadata()?.len();

        let mut chunk = String::with_capacity(preamble.len() + content.len() + 1);
        if original_len == 0 {
            chunk.push_str(preamble);
        } else {
            let mut last = [0u8; 1];
            file.seek(SeekFrom::Start(original_len - 1))?;
            file.read_exact(&mut last)?;
            if last[0] != b'\n' {
                chunk.push('\n');
            }
        }
        chunk.push_str(content);

        let written = file
            .write_all(chunk.as_bytes())
            .and_then(|_| file.sync_all());
        if let Err(e) = written {
            let _ = file.set_len(original_len);
            return Err(e.into());
        }
        Ok(original_len)
    }

    fn truncate_to(path: &Path, len: u64) -> StoreResult<()> {
        let file = OpenOptions::new().write(true).open(path)?;
        file.set_len(len)?;
        file.sync_all()?;
        Ok(())
    }

    /// Stage both files, then swap them in, stream first. Caller holds the
    /// lock.
    pub(crate) fn replace_both(&self, table: &str, stream: &str) -> StoreResult<()> {
        let stream_tmp = Self::stage(&self.stream_path, stream)?;
        let table_tmp = match Self::stage(&self.table_path, table) {
            Ok(p) => p,
            Err(e) => {
                let _ = fs::remove_file(&stream_tmp);
                return Err(e);
            }
        };
        if let Err(e) = fs::rename(&stream_tmp, &self.stream_path) {
            let _ = fs::remove_file(&stream_tmp);
            let _ = fs::remove_file(&table_tmp);
            return Err(e.into());
        }
        if let Err(e) = fs::rename(&table_tmp, &self.table_path) {
            let _ = fs::remove_file(&table_tmp);
            return Err(e.into());
        }
        Self::sync_dir(&self.data_dir);
        Ok(())
    }

    /// Atomically replace a single file.
    fn write_file_atomic(path: &Path, content: &str) -> StoreResult<()> {
        let tmp = Self::stage(path, content)?;
        fs::rename(&tmp, path)?;
        if let Some(dir) = path.parent() {
            Self::sync_dir(dir);
        }
        Ok(())
    }

    /// Write `content` to a fresh temp file next to `path` and fsync it.
    fn stage(path: &Path, content: &str) -> StoreResult<PathBuf> {
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        let base = path
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or("telemetry");
        let mut counter = 0u32;
        loop {
            let candidate = dir.join(format!(".{}.tmp-{}-{}", base, std::process::id(), counter));
            match OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&candidate)
            {
                Ok(mut tmp) => {
                    let written = tmp
                        .write_all(content.as_bytes())
                        .and_then(|_| tmp.flush())
                        .and_then(|_| tmp.sync_all());
                    if let Err(e) = written {
                        let _ = fs::remove_file(&candidate);
                        return Err(e.into());
                    }
                    return Ok(candidate);
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    counter = counter.saturating_add(1);
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    // Best-effort: persists the rename on filesystems that need it
    fn sync_dir(dir: &Path) {
        if let Ok(dir_file) = File::open(dir) {
            let _ = dir_file.sync_all();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meshtastic::{DeviceMetrics, NodeRecord};
    use chrono::{TimeZone, Utc};
    use tokio_test::{assert_err, assert_ok};

    fn one_node_batch(secs: i64) -> AcceptedBatch {
        let ts = Utc.timestamp_opt(secs, 0).unwrap();
        let metrics = DeviceMetrics {
            uptime_seconds: Some(3600),
            ..DeviceMetrics::default()
        };
        let mut batch = AcceptedBatch::new(ts);
        batch
            .samples
            .push(NodeSample::from_node("!a", &NodeRecord::default(), &metrics, ts));
        batch
    }

    #[tokio::test]
    async fn open_writes_header_once() {
        let tmp = tempfile::tempdir().unwrap();
        let store = TelemetryStore::open(tmp.path()).await.unwrap();
        let first = fs::read_to_string(store.table_path()).unwrap();
        assert_eq!(first, format!("{}\n", TABLE_HEADER.join(",")));

        fs::write(store.table_path(), format!("{}extra\n", first)).unwrap();
        let _again = TelemetryStore::open(tmp.path()).await.unwrap();
        assert!(fs::read_to_string(store.table_path())
            .unwrap()
            .ends_with("extra\n"));
    }

    #[test]
    fn table_parse_skips_bad_rows() {
        let content = format!(
            "{}\n\
             2024-01-01T00:00:00Z,!a,A,Alpha,TBEAM,80,3.9,False,1.0,2.0,100,True\n\
             not-a-date,!a,A,Alpha,TBEAM,80,3.9,false,1.0,2.0,100,true\n\
             2024-01-01T00:05:00Z,!a,A\n\
             2024-01-01 00:10:00,!b,B,Bravo,RAK4631,101,4.1,true,2.0,3.0,200,false\n",
            TABLE_HEADER.join(",")
        );
        let scan = TelemetryStore::parse_table(&content);
        assert_eq!(scan.rows.len(), 2);
        assert_eq!(scan.malformed, 2);
        assert!(scan.rows[0].is_favorite);
        assert!(!scan.rows[0].is_charging);
        assert_eq!(scan.rows[1].node_id, "!b");
    }

    #[test]
    fn stream_parse_skips_bad_lines() {
        let content = "{\"timestamp\":1,\"timestamp_text\":\"x\",\"nodes\":{}}\n{oops\n\n";
        let scan = TelemetryStore::parse_stream(content);
        assert_eq!(scan.records.len(), 1);
        assert_eq!(scan.malformed, 1);
    }

    #[test]
    fn staged_temp_files_do_not_linger() {
        let tmp = tempfile::tempdir().unwrap();
        let target = tmp.path().join("file.txt");
        TelemetryStore::write_file_atomic(&target, "hello").unwrap();
        assert_eq!(fs::read_to_string(&target).unwrap(), "hello");
        let leftovers: Vec<_> = fs::read_dir(tmp.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().contains(".tmp-"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn append_writes_both_forms_and_repairs_missing_newline() {
        let tmp = tempfile::tempdir().unwrap();
        let store = assert_ok!(TelemetryStore::open(tmp.path()).await);
        let header = fs::read_to_string(store.table_path()).unwrap();
        fs::write(store.table_path(), header.trim_end()).unwrap();

        assert_ok!(store.append_batch(&one_node_batch(1_700_000_000)).await);
        assert_ok!(store.append_batch(&one_node_batch(1_700_000_300)).await);

        let table = assert_ok!(store.read_table().await);
        assert_eq!(table.rows.len(), 2);
        assert_eq!(table.malformed, 0);
        let stream = assert_ok!(store.read_stream().await);
        assert_eq!(stream.records.len(), 2);
        assert_eq!(stream.records[1].timestamp, 1_700_000_300);
    }

    #[tokio::test]
    async fn failed_table_append_rolls_back_stream() {
        let tmp = tempfile::tempdir().unwrap();
        let store = assert_ok!(TelemetryStore::open(tmp.path()).await);
        assert_ok!(store.append_batch(&one_node_batch(1_700_000_000)).await);
        let stream_before = fs::read_to_string(store.stream_path()).unwrap();

        fs::remove_file(store.table_path()).unwrap();
        fs::create_dir(store.table_path()).unwrap();
        assert_err!(store.append_batch(&one_node_batch(1_700_000_300)).await);

        assert_eq!(fs::read_to_string(store.stream_path()).unwrap(), stream_before);
    }

    #[tokio::test]
    async fn contended_lock_gives_up_instead_of_blocking() {
        let tmp = tempfile::tempdir().unwrap();
        let store = assert_ok!(TelemetryStore::open(tmp.path()).await);
        let holder = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(tmp.path().join(LOCK_FILE))
            .unwrap();
        holder.lock_exclusive().unwrap();

        let err = store.lock().await.unwrap_err();
        assert!(matches!(err, StoreError::Lock { .. }));
        assert_err!(store.append_batch(&one_node_batch(1_700_000_000)).await);
        assert_eq!(assert_ok!(store.read_table().await).rows.len(), 0);

        drop(holder);
        assert_ok!(store.lock().await);
    }
}

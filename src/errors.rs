use thiserror::Error;

/// Errors that can arise while reading or writing the durable telemetry log.
///
/// Malformed rows and records are not represented here: readers skip them
/// and count them in [`crate::metrics`] instead of failing the whole read.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Wrapper around IO errors (open, rename, fsync, directory creation).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Wrapper around csv encoding errors for the table form.
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    /// Wrapper around serde_json errors for the record stream.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Returned when the exclusive lock on a log file cannot be taken.
    #[error("could not lock {path}: {source}")]
    Lock {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Errors raised by a [`crate::meshtastic::NodeSnapshotProvider`].
///
/// None of these are fatal: the monitor loop skips the cycle and retries on
/// the next tick.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// No snapshot is obtainable right now (device offline, dump missing).
    #[error("snapshot provider unavailable: {0}")]
    Unavailable(String),

    /// Wrapper around IO errors while reading a snapshot source.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The snapshot source produced data that is not a node map.
    #[error("snapshot parse error: {0}")]
    Parse(#[from] serde_json::Error),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

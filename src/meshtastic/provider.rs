//! Snapshot providers.
//!
//! [`JsonFileProvider`] reads a node-db dump that an external bridge (the
//! Python client, a serial logger, ...) rewrites periodically. [`StaticProvider`]
//! serves an in-memory map and is what embedding code and tests use.

use serde::Deserialize;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use super::{NodeSnapshotProvider, Snapshot};
use crate::errors::ProviderError;

/// Dumps come either as the bare node map or wrapped as `{"nodes": {...}}`.
#[derive(Deserialize)]
#[serde(untagged)]
enum SnapshotFile {
    Wrapped { nodes: Snapshot },
    Bare(Snapshot),
}

/// Reads node snapshots from a JSON file on every call.
#[derive(Debug)]
pub struct JsonFileProvider {
    path: PathBuf,
    description: String,
}

impl JsonFileProvider {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref().to_path_buf();
        let description = format!("file: {}", path.display());
        Self { path, description }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl NodeSnapshotProvider for JsonFileProvider {
    fn snapshot(&mut self) -> Result<Snapshot, ProviderError> {
        let content = match fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(ProviderError::Unavailable(format!(
                    "{} does not exist yet",
                    self.path.display()
                )))
            }
            Err(e) => return Err(ProviderError::Io(e)),
        };
        // Guard against leading NULs left by a bridge that truncates in place
        let cleaned = content.trim_start_matches('\0');
        if cleaned.trim().is_empty() {
            return Err(ProviderError::Unavailable(format!(
                "{} is empty",
                self.path.display()
            )));
        }
        let parsed: SnapshotFile = serde_json::from_str(cleaned)?;
        Ok(match parsed {
            SnapshotFile::Wrapped { nodes } => nodes,
            SnapshotFile::Bare(nodes) => nodes,
        })
    }

    fn description(&self) -> &str {
        &self.description
    }
}

/// In-memory provider; `None` simulates a transport with nothing to offer.
#[derive(Debug, Default)]
pub struct StaticProvider {
    current: Option<Snapshot>,
}

impl StaticProvider {
    pub fn new(snapshot: Snapshot) -> Self {
        Self {
            current: Some(snapshot),
        }
    }

    pub fn set(&mut self, snapshot: Snapshot) {
        self.current = Some(snapshot);
    }

    pub fn clear(&mut self) {
        self.current = None;
    }
}

impl NodeSnapshotProvider for StaticProvider {
    fn snapshot(&mut self) -> Result<Snapshot, ProviderError> {
        self.current
            .clone()
            .ok_or_else(|| ProviderError::Unavailable("no snapshot loaded".to_string()))
    }

    fn description(&self) -> &str {
        "static"
    }
}

//! Snapshot-directory data source.
//!
//! Provider output is exported ahead of the run (one JSON document per
//! source, `<dir>/<source>.json`, shaped like the provider API responses)
//! and read back here.

use super::{DataSource, QueryContext};
use crate::error::SourceError;
use crate::models::Source;
use async_trait::async_trait;
use serde_json::Value;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Reads provider output from a directory of JSON files.
#[derive(Debug, Clone)]
pub struct SnapshotSource {
    dir: PathBuf,
}

impl SnapshotSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Path of the snapshot file for a source.
    pub fn path_for(&self, source: Source) -> PathBuf {
        self.dir.join(format!("{}.json", source.as_str()))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[async_trait]
impl DataSource for SnapshotSource {
    async fn fetch(&self, source: Source, _query: &QueryContext) -> Result<Value, SourceError> {
        let path = self.path_for(source);
        debug!("Reading {} snapshot from {}", source, path.display());

        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(SourceError::NotConfigured(format!(
                    "no snapshot at {}",
                    path.display()
                )));
            }
            Err(e) => {
                return Err(SourceError::Unreachable(format!(
                    "cannot read {}: {}",
                    path.display(),
                    e
                )));
            }
        };

        serde_json::from_str(&content)
            .map_err(|e| SourceError::Malformed(format!("{}: {}", path.display(), e)))
    }
}

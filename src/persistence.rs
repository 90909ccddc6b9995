//! Snapshot persistence for registry and metrics state
//!
//! The engine never holds a map lock across disk I/O: it takes a
//! point-in-time copy ([`EngineSnapshot`]), releases every lock, and only
//! then hands the copy to a [`SnapshotStore`].
//!
//! `JsonFileStore` writes to a sibling temp file and renames it over the
//! target, so a crash mid-write leaves the previous snapshot intact.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::experiment::{Experiment, MetricObservation};
use crate::{Error, Result};

/// Snapshot file format version.
pub const SNAPSHOT_VERSION: u32 = 1;

/// Whole-engine state: every experiment and every current observation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EngineSnapshot {
    /// Format version, see [`SNAPSHOT_VERSION`].
    pub version: u32,
    /// All experiments.
    pub experiments: Vec<Experiment>,
    /// All current observations.
    pub metrics: Vec<MetricObservation>,
}

impl EngineSnapshot {
    /// Wrap experiments and metrics in a current-version snapshot.
    #[must_use]
    pub const fn new(experiments: Vec<Experiment>, metrics: Vec<MetricObservation>) -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            experiments,
            metrics,
        }
    }

    /// Reject snapshots written by an unknown format version.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on a version mismatch.
    pub fn check_version(&self) -> Result<()> {
        if self.version == SNAPSHOT_VERSION {
            Ok(())
        } else {
            Err(Error::StorageError(format!(
                "unsupported snapshot version {} (expected {SNAPSHOT_VERSION})",
                self.version
            )))
        }
    }
}

/// Self-contained export of a single experiment and its observations.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExperimentSnapshot {
    /// The experiment definition and lifecycle state.
    pub experiment: Experiment,
    /// Its current observations.
    pub metrics: Vec<MetricObservation>,
}

impl ExperimentSnapshot {
    /// Serialize to pretty JSON.
    ///
    /// # Errors
    ///
    /// Returns `Serialization` if encoding fails.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parse from JSON.
    ///
    /// # Errors
    ///
    /// Returns `Serialization` on malformed input.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Durable load/save contract for engine state.
pub trait SnapshotStore: Send + Sync {
    /// Load the last saved snapshot, or `None` if nothing was saved yet.
    ///
    /// # Errors
    ///
    /// Returns an error if saved state exists but cannot be read.
    fn load(&self) -> Result<Option<EngineSnapshot>>;

    /// Durably replace the saved snapshot.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot could not be written.
    fn save(&self, snapshot: &EngineSnapshot) -> Result<()>;
}

/// JSON snapshot file on the local filesystem.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    /// Store snapshots at `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Snapshot file location.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(std::ffi::OsStr::to_os_string)
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl SnapshotStore for JsonFileStore {
    fn load(&self) -> Result<Option<EngineSnapshot>> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no snapshot on disk");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        let snapshot: EngineSnapshot = serde_json::from_slice(&bytes).map_err(|e| {
            Error::StorageError(format!(
                "Failed to parse snapshot {}: {e}",
                self.path.display()
            ))
        })?;
        snapshot.check_version()?;

        info!(
            path = %self.path.display(),
            experiments = snapshot.experiments.len(),
            metrics = snapshot.metrics.len(),
            "loaded snapshot"
        );
        Ok(Some(snapshot))
    }

    fn save(&self, snapshot: &EngineSnapshot) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let tmp = self.temp_path();
        {
            let mut file = fs::File::create(&tmp)?;
            serde_json::to_writer(&mut file, snapshot)?;
            file.flush()?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;

        debug!(
            path = %self.path.display(),
            experiments = snapshot.experiments.len(),
            metrics = snapshot.metrics.len(),
            "saved snapshot"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::experiment::Variant;
    use tempfile::TempDir;

    fn snapshot() -> EngineSnapshot {
        let experiment = Experiment::builder("exp-1", "Persisted")
            .variant(Variant::new("control", "Control", 50.0))
            .variant(Variant::new("treatment", "Treatment", 50.0))
            .primary_metric("conversion")
            .build();
        let metric = MetricObservation::new("exp-1", "control", "u1", "conversion", 1.0);
        EngineSnapshot::new(vec![experiment], vec![metric])
    }

    #[test]
    fn test_load_missing_file_is_none() {
        let dir = TempDir::new().unwrap();
        let store = JsonFileStore::new(dir.path().join("state.json"));
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn test_save_then_load() {
        let dir = TempDir::new().unwrap();
        let store = JsonFileStore::new(dir.path().join("nested/state.json"));
        let original = snapshot();

        store.save(&original).unwrap();
        assert!(!store.temp_path().exists());

        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded, original);
    }

    #[test]
    fn test_rejects_unknown_version() {
        let dir = TempDir::new().unwrap();
        let store = JsonFileStore::new(dir.path().join("state.json"));
        let mut future = snapshot();
        future.version = 99;
        store.save(&future).unwrap();
        assert!(matches!(store.load(), Err(Error::StorageError(_))));
    }

    #[test]
    fn test_rejects_corrupt_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        fs::write(&path, b"{not json").unwrap();
        assert!(matches!(
            JsonFileStore::new(path).load(),
            Err(Error::StorageError(_))
        ));
    }
}

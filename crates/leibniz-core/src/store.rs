//! Durable single-record storage for the calculation snapshot.
//!
//! [`SnapshotStore`] is the seam between the engine and the storage medium.
//! Reads never fail: a missing, unreadable, or invalid record is replaced
//! by the default snapshot through an explicit recovery path. Writes
//! report failure to the caller, which treats it as a warning.
//!
//! - [`FileSnapshotStore`] -- pretty-printed JSON file with atomic
//!   replace-on-write.
//! - [`MemorySnapshotStore`] -- in-process record for tests and embedding.

use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use tracing::{debug, warn};

use crate::series::is_valid_pi_text;
use crate::snapshot::CalculationSnapshot;

/// Errors that can occur reading or writing the persisted record.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The medium could not be read or written.
    #[error("storage I/O error on {path}: {source}")]
    Io {
        /// Path of the record file.
        path: PathBuf,
        /// The underlying I/O error.
        source: io::Error,
    },

    /// The record is not valid JSON of the expected shape.
    #[error("malformed snapshot record: {0}")]
    Malformed(#[from] serde_json::Error),

    /// The record's pi text is not a finite decimal numeral.
    #[error("invalid pi text in snapshot record: {0:?}")]
    InvalidPiText(String),

    /// Writes are switched off (in-memory store only).
    #[error("snapshot writes are disabled")]
    WriteDisabled,
}

/// Storage for exactly one [`CalculationSnapshot`].
pub trait SnapshotStore: Send + Sync {
    /// Read the persisted record.
    ///
    /// Always yields a usable snapshot. When no valid record exists the
    /// default snapshot is written to the medium and returned.
    fn load(&self) -> CalculationSnapshot;

    /// Overwrite the persisted record with `snapshot` in full.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the record could not be written.
    fn save(&self, snapshot: &CalculationSnapshot) -> Result<(), StoreError>;
}

fn validate(snapshot: CalculationSnapshot) -> Result<CalculationSnapshot, StoreError> {
    if is_valid_pi_text(&snapshot.pi_text) {
        Ok(snapshot)
    } else {
        Err(StoreError::InvalidPiText(snapshot.pi_text))
    }
}

// ---------------------------------------------------------------------------
// File store
// ---------------------------------------------------------------------------

/// A JSON file holding the snapshot.
///
/// Writes go to a sibling `.tmp` file that is synced to disk and then
/// renamed over the record, so a crash mid-write leaves the previous
/// record intact.
#[derive(Debug, Clone)]
pub struct FileSnapshotStore {
    path: PathBuf,
}

impl FileSnapshotStore {
    /// Create a store for the record at `path`. Nothing is touched on disk.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the record file.
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

    fn io_error(&self, source: io::Error) -> StoreError {
        StoreError::Io {
            path: self.path.clone(),
            source,
        }
    }

    /// Strict read of the record, classifying every failure.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] if the file is missing or unreadable,
    /// [`StoreError::Malformed`] if the JSON does not match the record
    /// shape, or [`StoreError::InvalidPiText`] if the pi text is not a
    /// finite number.
    pub fn read_record(&self) -> Result<CalculationSnapshot, StoreError> {
        let raw = std::fs::read_to_string(&self.path).map_err(|e| self.io_error(e))?;
        let snapshot: CalculationSnapshot = serde_json::from_str(&raw)?;
        validate(snapshot)
    }

    /// Replace an unusable record with the default snapshot.
    ///
    /// A failure to write the default is logged; the default is returned
    /// either way.
    pub fn recover(&self, cause: &StoreError) -> CalculationSnapshot {
        warn!(
            path = %self.path.display(),
            error = %cause,
            "snapshot record unusable, restoring defaults"
        );
        let snapshot = CalculationSnapshot::default();
        if let Err(e) = self.save(&snapshot) {
            warn!(error = %e, "failed to write default snapshot record");
        }
        snapshot
    }
}

impl SnapshotStore for FileSnapshotStore {
    fn load(&self) -> CalculationSnapshot {
        match self.read_record() {
            Ok(snapshot) => {
                debug!(
                    path = %self.path.display(),
                    status = %snapshot.status,
                    iteration = snapshot.iteration,
                    "snapshot record loaded"
                );
                snapshot
            }
            Err(e) => self.recover(&e),
        }
    }

    fn save(&self, snapshot: &CalculationSnapshot) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| self.io_error(e))?;
        }

        let json = serde_json::to_string_pretty(snapshot)?;
        let tmp_path = self.temp_path();
        let mut file = std::fs::File::create(&tmp_path).map_err(|e| self.io_error(e))?;
        file.write_all(json.as_bytes())
            .and_then(|()| file.sync_all())
            .map_err(|e| self.io_error(e))?;
        drop(file);

        // The record is only replaced once the new bytes are on disk.
        if let Err(e) = std::fs::rename(&tmp_path, &self.path) {
            let _ = std::fs::remove_file(&tmp_path);
            return Err(self.io_error(e));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// In-memory store
// ---------------------------------------------------------------------------

/// An in-process record with a write counter and a failure switch.
///
/// `load` on an empty store writes and returns the default snapshot, the
/// same as the file store does for a missing file.
#[derive(Debug, Default)]
pub struct MemorySnapshotStore {
    record: Mutex<Option<CalculationSnapshot>>,
    writes: AtomicU64,
    fail_writes: AtomicBool,
}

impl MemorySnapshotStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store already holding `snapshot`.
    pub fn with_snapshot(snapshot: CalculationSnapshot) -> Self {
        Self {
            record: Mutex::new(Some(snapshot)),
            ..Self::default()
        }
    }

    /// The currently stored record, if any.
    pub fn record(&self) -> Option<CalculationSnapshot> {
        self.record
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of successful writes so far.
    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::Acquire)
    }

    /// Make subsequent writes fail (or succeed again).
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::Release);
    }
}

impl SnapshotStore for MemorySnapshotStore {
    fn load(&self) -> CalculationSnapshot {
        let mut guard = self.record.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(snapshot) = guard.as_ref().filter(|s| is_valid_pi_text(&s.pi_text)) {
            return snapshot.clone();
        }
        let snapshot = CalculationSnapshot::default();
        *guard = Some(snapshot.clone());
        snapshot
    }

    fn save(&self, snapshot: &CalculationSnapshot) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::Acquire) {
            return Err(StoreError::WriteDisabled);
        }
        let mut guard = self.record.lock().unwrap_or_else(PoisonError::into_inner);
        *guard = Some(snapshot.clone());
        self.writes.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::snapshot::CalculationStatus;

    fn store_in(dir: &tempfile::TempDir) -> FileSnapshotStore {
        FileSnapshotStore::new(dir.path().join("state").join("state.json"))
    }

    fn running_at(iteration: u64, pi_text: &str) -> CalculationSnapshot {
        CalculationSnapshot {
            pi_text: pi_text.to_owned(),
            status: CalculationStatus::Running,
            iteration,
        }
    }

    #[test]
    fn missing_file_loads_default_and_writes_it() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);

        let snapshot = store.load();
        assert_eq!(snapshot, CalculationSnapshot::default());
        assert_eq!(store.read_record().unwrap(), CalculationSnapshot::default());
    }

    #[test]
    fn save_then_load_returns_record() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        let snapshot = running_at(10, "3.0418396189294032");

        store.save(&snapshot).unwrap();
        assert_eq!(store.load(), snapshot);
    }

    #[test]
    fn saved_record_is_pretty_json_with_three_fields() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        store.save(&running_at(1, "4.0")).unwrap();

        let raw = std::fs::read_to_string(store.path()).unwrap();
        assert!(raw.contains("\n  \"piText\": \"4.0\""));
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value.as_object().unwrap().len(), 3);
        assert_eq!(value["status"], "running");
        assert_eq!(value["iteration"], 1);
        assert!(!store.temp_path().exists());
    }

    #[test]
    fn bogus_status_recovers_to_default() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        std::fs::create_dir_all(store.path().parent().unwrap()).unwrap();
        std::fs::write(
            store.path(),
            r#"{ "piText": "3.1", "status": "bogus", "iteration": 5 }"#,
        )
        .unwrap();

        assert!(matches!(store.read_record(), Err(StoreError::Malformed(_))));
        assert_eq!(store.load(), CalculationSnapshot::default());
        assert_eq!(store.read_record().unwrap(), CalculationSnapshot::default());
    }

    #[test]
    fn missing_iteration_recovers_to_default() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        std::fs::create_dir_all(store.path().parent().unwrap()).unwrap();
        std::fs::write(store.path(), r#"{ "piText": "3.1", "status": "paused" }"#).unwrap();

        assert_eq!(store.load(), CalculationSnapshot::default());
        assert_eq!(store.read_record().unwrap(), CalculationSnapshot::default());
    }

    #[test]
    fn non_numeric_iteration_recovers_to_default() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        std::fs::create_dir_all(store.path().parent().unwrap()).unwrap();
        std::fs::write(
            store.path(),
            r#"{ "piText": "3.1", "status": "paused", "iteration": "seven" }"#,
        )
        .unwrap();

        assert_eq!(store.load(), CalculationSnapshot::default());
    }

    #[test]
    fn invalid_pi_text_recovers_to_default() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        std::fs::create_dir_all(store.path().parent().unwrap()).unwrap();
        std::fs::write(
            store.path(),
            r#"{ "piText": "NaN", "status": "paused", "iteration": 3 }"#,
        )
        .unwrap();

        assert!(matches!(
            store.read_record(),
            Err(StoreError::InvalidPiText(_))
        ));
        assert_eq!(store.load(), CalculationSnapshot::default());
    }

    #[test]
    fn exponent_pi_text_recovers_to_default() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        std::fs::create_dir_all(store.path().parent().unwrap()).unwrap();
        std::fs::write(
            store.path(),
            r#"{ "piText": "1e300", "status": "paused", "iteration": 3 }"#,
        )
        .unwrap();

        assert!(matches!(
            store.read_record(),
            Err(StoreError::InvalidPiText(_))
        ));
        assert_eq!(store.load(), CalculationSnapshot::default());
    }

    #[test]
    fn garbage_file_recovers_to_default() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        std::fs::create_dir_all(store.path().parent().unwrap()).unwrap();
        std::fs::write(store.path(), "not json at all").unwrap();

        assert_eq!(store.load(), CalculationSnapshot::default());
    }

    #[test]
    fn legacy_record_is_rewritten_with_pi_text_key() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        std::fs::create_dir_all(store.path().parent().unwrap()).unwrap();
        std::fs::write(
            store.path(),
            r#"{ "pi": "3.5", "status": "paused", "iteration": 2 }"#,
        )
        .unwrap();

        let snapshot = store.load();
        assert_eq!(snapshot.pi_text, "3.5");
        store.save(&snapshot).unwrap();
        let raw = std::fs::read_to_string(store.path()).unwrap();
        assert!(raw.contains("piText"));
    }

    #[test]
    fn loaded_value_is_independent_of_store() {
        let store = MemorySnapshotStore::with_snapshot(running_at(3, "3.4"));
        let mut loaded = store.load();
        loaded.iteration = 99;
        assert_eq!(store.load().iteration, 3);
    }

    #[test]
    fn unwritable_location_reports_io_error() {
        let dir = tempfile::tempdir().unwrap();
        // A regular file where the parent directory should be.
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, "").unwrap();
        let store = FileSnapshotStore::new(blocker.join("state.json"));

        let result = store.save(&CalculationSnapshot::default());
        assert!(matches!(result, Err(StoreError::Io { .. })));
        // Reads still yield a usable snapshot.
        assert_eq!(store.load(), CalculationSnapshot::default());
    }

    #[test]
    fn failed_replace_removes_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        // A non-empty directory where the record should be.
        std::fs::create_dir_all(store.path().join("occupied")).unwrap();

        let result = store.save(&running_at(1, "4.0"));
        assert!(matches!(result, Err(StoreError::Io { .. })));
        assert!(!store.temp_path().exists());
        assert!(store.path().is_dir());
    }

    #[test]
    fn memory_store_counts_writes_and_can_fail() {
        let store = MemorySnapshotStore::new();
        assert_eq!(store.load(), CalculationSnapshot::default());
        store.save(&running_at(1, "4.0")).unwrap();
        assert_eq!(store.writes(), 1);

        store.set_fail_writes(true);
        assert!(matches!(
            store.save(&CalculationSnapshot::default()),
            Err(StoreError::WriteDisabled)
        ));
        assert_eq!(store.writes(), 1);
        assert_eq!(store.record().unwrap().iteration, 1);
    }
}

//! Persistence sinks for progress checkpoints.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::manager::PersistenceCallback;
use super::schema::MigrationProgress;
use crate::error::Result;

/// Writes checkpoints to a JSON file.
///
/// Each write goes to a sibling temp file first and is renamed over the
/// target, so readers never see a torn file.
#[derive(Debug, Clone)]
pub struct JsonFileProgressSink {
    path: PathBuf,
}

impl JsonFileProgressSink {
    /// Sink writing to `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Target file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write one snapshot.
    pub fn write(&self, progress: &MigrationProgress) -> Result<()> {
        let json = progress.to_json_pretty()?;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let mut temp = self.path.clone().into_os_string();
        temp.push(".tmp");
        let temp = PathBuf::from(temp);
        fs::write(&temp, json)?;
        fs::rename(&temp, &self.path)?;
        Ok(())
    }

    /// Read the last snapshot, if the file exists.
    pub fn read(&self) -> Result<Option<MigrationProgress>> {
        if !self.path.exists() {
            return Ok(None);
        }
        MigrationProgress::load_json_file(&self.path).map(Some)
    }

    /// Wrap as a persistence callback.
    pub fn into_callback(self) -> PersistenceCallback {
        Arc::new(move |progress: &MigrationProgress| self.write(progress))
    }
}

/// Tree holding progress snapshots.
const PROGRESS_TREE: &str = "ferry:progress";

/// Keeps progress snapshots in a sled tree, keyed by run name.
pub struct ProgressStateStore {
    tree: sled::Tree,
}

impl ProgressStateStore {
    /// Open the store on a database.
    pub fn open(db: &sled::Db) -> Result<Self> {
        let tree = db.open_tree(PROGRESS_TREE)?;
        Ok(Self { tree })
    }

    /// Save a snapshot under `key`.
    pub fn save(&self, key: &str, progress: &MigrationProgress) -> Result<()> {
        let bytes = serde_json::to_vec(progress)?;
        self.tree.insert(key.as_bytes(), bytes)?;
        Ok(())
    }

    /// Load the snapshot saved under `key`.
    pub fn load(&self, key: &str) -> Result<Option<MigrationProgress>> {
        match self.tree.get(key.as_bytes())? {
            Some(bytes) => {
                let mut progress: MigrationProgress = serde_json::from_slice(&bytes)?;
                progress.normalize();
                Ok(Some(progress))
            }
            None => Ok(None),
        }
    }

    /// Delete the snapshot saved under `key`.
    pub fn delete(&self, key: &str) -> Result<bool> {
        Ok(self.tree.remove(key.as_bytes())?.is_some())
    }

    /// Keys with a saved snapshot.
    pub fn keys(&self) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        for entry in self.tree.iter() {
            let (key, _) = entry?;
            keys.push(String::from_utf8_lossy(&key).into_owned());
        }
        Ok(keys)
    }

    /// Flush pending writes to disk.
    pub fn flush(&self) -> Result<()> {
        self.tree.flush()?;
        Ok(())
    }

    /// Wrap as a persistence callback saving and flushing under `key`.
    pub fn into_callback(self: Arc<Self>, key: impl Into<String>) -> PersistenceCallback {
        let key = key.into();
        Arc::new(move |progress: &MigrationProgress| {
            self.save(&key, progress)?;
            self.flush()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::RecordId;
    use crate::progress::MigrationProgressManager;

    fn sample() -> MigrationProgress {
        let mut progress = MigrationProgress::new();
        progress
            .migration_mut("stations")
            .migrated_record_ids
            .insert(RecordId::Int(1));
        progress.fatal_errors.push("regions: source unreachable".into());
        progress
    }

    #[test]
    fn test_json_file_sink_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let sink = JsonFileProgressSink::new(dir.path().join("nested").join("progress.json"));
        assert!(sink.read().unwrap().is_none());

        let progress = sample();
        sink.write(&progress).unwrap();
        assert_eq!(sink.read().unwrap().unwrap(), progress);

        let mut temp = sink.path().to_path_buf().into_os_string();
        temp.push(".tmp");
        assert!(!PathBuf::from(temp).exists());
    }

    #[test]
    fn test_json_file_sink_as_callback() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("progress.json");
        let manager = MigrationProgressManager::default();
        manager.add_persistence_callback(JsonFileProgressSink::new(&path).into_callback());

        manager.report_successful_records("stations", [RecordId::Int(5)]);
        assert_eq!(manager.checkpoint(), 1);

        let loaded = MigrationProgress::load_json_file(&path).unwrap();
        assert!(loaded
            .migration("stations")
            .unwrap()
            .migrated_record_ids
            .contains(&RecordId::Int(5)));
    }

    #[test]
    fn test_state_store() {
        let db = sled::Config::new().temporary(true).open().unwrap();
        let store = Arc::new(ProgressStateStore::open(&db).unwrap());

        assert!(store.load("nightly").unwrap().is_none());
        let progress = sample();
        store.save("nightly", &progress).unwrap();
        assert_eq!(store.load("nightly").unwrap().unwrap(), progress);
        assert_eq!(store.keys().unwrap(), vec!["nightly".to_string()]);

        let manager = MigrationProgressManager::default();
        manager.add_persistence_callback(Arc::clone(&store).into_callback("hourly"));
        manager.report_fatal_error("boom");
        manager.checkpoint();
        assert_eq!(store.load("hourly").unwrap().unwrap().fatal_errors, vec!["boom".to_string()]);

        assert!(store.delete("nightly").unwrap());
        assert!(!store.delete("nightly").unwrap());
        assert_eq!(store.keys().unwrap(), vec!["hourly".to_string()]);
    }
}

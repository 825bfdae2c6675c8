use crate::{KeyValueStore, Result, SyncError};
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

/// Configuration for the file-backed data store.
#[derive(Clone, Debug)]
pub struct FileConfig {
	/// Path of the JSON file holding the store contents. Created on the
	/// first write if it does not exist; parent directories must exist.
	pub path: PathBuf,
}

/// A key-value store persisted to a single JSON file.
///
/// The full contents are loaded when the store is opened and rewritten on
/// every mutation, so this is intended for small preference-sized data sets,
/// not bulk storage. Writes go to a sibling `.tmp` file first and are moved
/// into place, so a crash mid-write leaves the previous contents intact.
///
/// # Examples
/// ```no_run
/// use mirrorkv::{FileConfig, FileStore, KeyValueStore};
///
/// let mut store = FileStore::new(FileConfig {
/// 	path: "prefs.json".into(),
/// }).unwrap();
///
/// store.set("volume", "0.8").unwrap();
/// assert_eq!(store.get("volume").as_deref(), Some("0.8"));
/// ```
#[derive(Debug)]
pub struct FileStore {
	config: FileConfig,
	entries: HashMap<String, String>,
	/// Keys in first-insertion order, backing `key_at`.
	order: Vec<String>,
}

impl FileStore {
	/// Opens the store, loading any previously persisted contents.
	///
	/// # Errors
	/// Returns [`SyncError::Storage`] if the file exists but cannot be read,
	/// and [`SyncError::Serialization`] if its contents are not valid JSON.
	pub fn new(config: FileConfig) -> Result<Self> {
		let mut store = Self {
			config,
			entries: HashMap::new(),
			order: Vec::new(),
		};

		if store.config.path.exists() {
			let raw = fs::read_to_string(&store.config.path)
				.map_err(|e| SyncError::Storage(e.to_string()))?;
			let pairs: Vec<(String, String)> = serde_json::from_str(&raw)
				.map_err(|e| SyncError::Serialization(e.to_string()))?;
			for (key, value) in pairs {
				if store.entries.insert(key.clone(), value).is_none() {
					store.order.push(key);
				}
			}
		}

		Ok(store)
	}

	/// Rewrites the backing file from the in-memory contents.
	fn persist(&self) -> Result<()> {
		let pairs: Vec<(&String, &String)> = self
			.order
			.iter()
			.filter_map(|k| self.entries.get(k).map(|v| (k, v)))
			.collect();
		let raw = serde_json::to_string(&pairs)
			.map_err(|e| SyncError::Serialization(e.to_string()))?;

		let tmp = self.config.path.with_extension("tmp");
		fs::write(&tmp, raw).map_err(|e| SyncError::Storage(e.to_string()))?;
		fs::rename(&tmp, &self.config.path).map_err(|e| SyncError::Storage(e.to_string()))
	}
}

impl KeyValueStore for FileStore {
	fn len(&self) -> usize {
		self.entries.len()
	}

	fn key_at(&self, index: usize) -> Option<String> {
		self.order.get(index).cloned()
	}

	fn get(&self, key: &str) -> Option<String> {
		self.entries.get(key).cloned()
	}

	fn set(&mut self, key: &str, value: &str) -> Result<()> {
		if self.entries.insert(key.to_string(), value.to_string()).is_none() {
			self.order.push(key.to_string());
		}
		self.persist()
	}

	fn remove(&mut self, key: &str) {
		if self.entries.remove(key).is_some() {
			self.order.retain(|k| k != key);
			// Deletes are best-effort, like the rest of the sync layer.
			if let Err(e) = self.persist() {
				tracing::warn!("failed to persist remove: {e}");
			}
		}
	}

	fn clear(&mut self) {
		self.entries.clear();
		self.order.clear();
		if let Err(e) = self.persist() {
			tracing::warn!("failed to persist clear: {e}");
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use tempfile::tempdir;

	fn config(dir: &tempfile::TempDir) -> FileConfig {
		FileConfig {
			path: dir.path().join("store.json"),
		}
	}

	#[test]
	fn contents_survive_reopen() {
		let dir = tempdir().unwrap();

		{
			let mut store = FileStore::new(config(&dir)).unwrap();
			store.set("a", "1").unwrap();
			store.set("b", "2").unwrap();
			store.remove("a");
		}

		let store = FileStore::new(config(&dir)).unwrap();
		assert_eq!(store.len(), 1);
		assert_eq!(store.get("b").as_deref(), Some("2"));
		assert_eq!(store.get("a"), None);
	}

	#[test]
	fn opens_fresh_when_file_absent() {
		let dir = tempdir().unwrap();
		let store = FileStore::new(config(&dir)).unwrap();
		assert!(store.is_empty());
	}

	#[test]
	fn enumeration_order_survives_reopen() {
		let dir = tempdir().unwrap();

		{
			let mut store = FileStore::new(config(&dir)).unwrap();
			store.set("first", "1").unwrap();
			store.set("second", "2").unwrap();
		}

		let store = FileStore::new(config(&dir)).unwrap();
		assert_eq!(store.key_at(0).as_deref(), Some("first"));
		assert_eq!(store.key_at(1).as_deref(), Some("second"));
	}

	#[test]
	fn rejects_malformed_file() {
		let dir = tempdir().unwrap();
		let cfg = config(&dir);
		fs::write(&cfg.path, "not json").unwrap();

		assert!(matches!(
			FileStore::new(cfg),
			Err(SyncError::Serialization(_))
		));
	}

	#[test]
	fn clear_persists() {
		let dir = tempdir().unwrap();

		{
			let mut store = FileStore::new(config(&dir)).unwrap();
			store.set("a", "1").unwrap();
			store.clear();
		}

		let store = FileStore::new(config(&dir)).unwrap();
		assert!(store.is_empty());
	}
}

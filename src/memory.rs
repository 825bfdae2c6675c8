use crate::{KeyValueStore, Result};
use std::collections::HashMap;

/// An in-memory key-value store with insertion-ordered key enumeration.
///
/// This is the simplest [`KeyValueStore`] backend: nothing persists beyond
/// the process. It serves as the default inner store for [`SyncCache`]
/// (where the remote document provides the durability) and as the store of
/// choice in tests.
///
/// [`SyncCache`]: crate::SyncCache
///
/// # Examples
/// ```
/// use mirrorkv::{KeyValueStore, MemoryStore};
///
/// let mut store = MemoryStore::new();
/// store.set("score", "42").unwrap();
///
/// assert_eq!(store.get("score").as_deref(), Some("42"));
/// assert_eq!(store.len(), 1);
/// assert_eq!(store.key_at(0).as_deref(), Some("score"));
/// ```
#[derive(Debug, Default)]
pub struct MemoryStore {
	entries: HashMap<String, String>,
	/// Keys in first-insertion order, backing `key_at`.
	order: Vec<String>,
}

impl MemoryStore {
	/// Creates a new, empty store.
	pub fn new() -> Self {
		Self::default()
	}
}

impl KeyValueStore for MemoryStore {
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
		Ok(())
	}

	fn remove(&mut self, key: &str) {
		if self.entries.remove(key).is_some() {
			self.order.retain(|k| k != key);
		}
	}

	fn clear(&mut self) {
		self.entries.clear();
		self.order.clear();
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn set_get_roundtrip() {
		let mut store = MemoryStore::new();
		store.set("a", "1").unwrap();
		store.set("b", "2").unwrap();

		assert_eq!(store.get("a").as_deref(), Some("1"));
		assert_eq!(store.get("b").as_deref(), Some("2"));
		assert_eq!(store.get("missing"), None);
	}

	#[test]
	fn overwrite_keeps_single_key() {
		let mut store = MemoryStore::new();
		store.set("a", "1").unwrap();
		store.set("a", "2").unwrap();

		assert_eq!(store.len(), 1);
		assert_eq!(store.get("a").as_deref(), Some("2"));
	}

	#[test]
	fn key_enumeration_follows_insertion_order() {
		let mut store = MemoryStore::new();
		store.set("first", "1").unwrap();
		store.set("second", "2").unwrap();
		store.set("third", "3").unwrap();
		store.remove("second");

		assert_eq!(store.key_at(0).as_deref(), Some("first"));
		assert_eq!(store.key_at(1).as_deref(), Some("third"));
		assert_eq!(store.key_at(2), None);
	}

	#[test]
	fn clear_empties_everything() {
		let mut store = MemoryStore::new();
		store.set("a", "1").unwrap();
		store.set("b", "2").unwrap();

		store.clear();
		assert!(store.is_empty());
		assert_eq!(store.key_at(0), None);
	}

	#[test]
	fn remove_absent_key_is_noop() {
		let mut store = MemoryStore::new();
		store.set("a", "1").unwrap();
		store.remove("missing");

		assert_eq!(store.len(), 1);
	}
}

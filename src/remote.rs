//! Remote document store interface.
//!
//! The remote side of the mirror is a single per-user document: a flat map
//! of string fields under `data`, plus bookkeeping under `meta`. A
//! [`RemoteStore`] exposes exactly three operations - fetch the document,
//! apply a field patch, and subscribe to change notifications - which is
//! enough for [`SyncCache`](crate::SyncCache) to bootstrap, flush and
//! reconcile. [`MemoryRemote`] is an in-process implementation used in tests
//! and as the reference for patch application semantics.

use crate::{Result, SyncError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::broadcast;

/// Bookkeeping stored alongside the document data.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct DocumentMeta {
	/// When the document was first created.
	pub created_at: DateTime<Utc>,
	/// When the document was last written.
	pub updated_at: DateTime<Utc>,
	/// Monotonic write counter, bumped on every applied patch.
	pub version: u64,
}

impl DocumentMeta {
	fn new() -> Self {
		let now = Utc::now();
		Self {
			created_at: now,
			updated_at: now,
			version: 0,
		}
	}
}

/// The per-user remote document: a flat key-value map plus metadata.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Document {
	/// Mirrored key-value data.
	pub data: HashMap<String, String>,
	/// Server-side bookkeeping.
	pub meta: DocumentMeta,
}

/// Result of fetching the remote document.
///
/// `exists` distinguishes "no document yet" (a fresh identity, which
/// triggers the local-wins bootstrap) from an existing, possibly empty,
/// document (remote-wins bootstrap).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DocumentSnapshot {
	/// Whether a document exists for this identity.
	pub exists: bool,
	/// The document data; empty when `exists` is false.
	pub data: HashMap<String, String>,
}

/// A single field mutation within a [`Patch`].
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum FieldPatch {
	/// Overwrite the field with the given value.
	Set(String),
	/// Delete the field (a tombstone).
	Delete,
}

/// A batched field update applied to the remote document in one round trip.
///
/// Fields are applied independently: a patch never replaces the whole
/// document when merged, only the named fields. At most one mutation per
/// field can be present, so staging a `Set` after a `Delete` for the same
/// field replaces the tombstone.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Patch {
	/// Field name to mutation.
	pub fields: HashMap<String, FieldPatch>,
}

impl Patch {
	/// Creates an empty patch.
	pub fn new() -> Self {
		Self::default()
	}

	/// Stages an overwrite of `key` with `value`.
	pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
		self.fields.insert(key.into(), FieldPatch::Set(value.into()));
	}

	/// Stages a tombstone for `key`.
	pub fn delete(&mut self, key: impl Into<String>) {
		self.fields.insert(key.into(), FieldPatch::Delete);
	}

	/// Returns `true` if the patch stages no mutations.
	pub fn is_empty(&self) -> bool {
		self.fields.is_empty()
	}

	/// Returns the number of staged mutations.
	pub fn len(&self) -> usize {
		self.fields.len()
	}
}

/// A change notification carrying the full post-write document data.
#[derive(Clone, Debug)]
pub struct RemoteEvent {
	/// The document's `data` map after the change.
	pub data: HashMap<String, String>,
}

/// The remote per-user document store.
///
/// Implementations wrap whatever managed database the application talks to.
/// Dropping the receiver returned by [`subscribe`](Self::subscribe) is the
/// unsubscribe handle.
#[async_trait]
pub trait RemoteStore: Send + Sync {
	/// Fetches the current document for this identity.
	async fn get_document(&self) -> Result<DocumentSnapshot>;

	/// Applies `patch` to the document.
	///
	/// With `merge` set, only the named fields change and the document is
	/// created if absent. Without it, the document is replaced by the
	/// patch's `Set` fields (used once, for the initial local export).
	async fn set_document(&self, patch: Patch, merge: bool) -> Result<()>;

	/// Subscribes to change notifications.
	fn subscribe(&self) -> broadcast::Receiver<RemoteEvent>;
}

/// Yields the stable user identifier keying the remote document.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
	/// Resolves the user id, performing whatever credential exchange the
	/// application requires.
	///
	/// # Errors
	/// A failure here rejects [`SyncCache::ready`](crate::SyncCache::ready);
	/// there is no automatic retry.
	async fn user_id(&self) -> Result<String>;
}

/// An identity provider that always resolves to a fixed id.
///
/// Real credential exchanges live with the application; this covers tests
/// and deployments where the id is known up front.
#[derive(Clone, Debug)]
pub struct FixedIdentity(String);

impl FixedIdentity {
	/// Creates a provider resolving to `user_id`.
	pub fn new(user_id: impl Into<String>) -> Self {
		Self(user_id.into())
	}
}

#[async_trait]
impl IdentityProvider for FixedIdentity {
	async fn user_id(&self) -> Result<String> {
		Ok(self.0.clone())
	}
}

/// An in-process [`RemoteStore`] holding a single document.
///
/// Intended for tests, examples and offline operation. Applied patches are
/// kept in a log so tests can assert on exactly what was sent over the
/// "wire", and [`publish`](Self::publish) injects a change as if another
/// client had written the document. This process's own patches are not
/// echoed back to subscribers; only `publish` notifies.
pub struct MemoryRemote {
	document: Mutex<Option<Document>>,
	applied: Mutex<Vec<Patch>>,
	events: broadcast::Sender<RemoteEvent>,
}

impl MemoryRemote {
	/// Creates a remote with no document, as seen by a fresh identity.
	pub fn new() -> Self {
		let (events, _) = broadcast::channel(64);
		Self {
			document: Mutex::new(None),
			applied: Mutex::new(Vec::new()),
			events,
		}
	}

	/// Creates a remote whose document already holds `data`.
	pub fn with_document(data: HashMap<String, String>) -> Self {
		let remote = Self::new();
		*remote.document.lock().unwrap() = Some(Document {
			data,
			meta: DocumentMeta::new(),
		});
		remote
	}

	/// Overwrites the document data as an external writer would, notifying
	/// subscribers.
	pub fn publish(&self, data: HashMap<String, String>) {
		{
			let mut doc = self.document.lock().unwrap();
			match doc.as_mut() {
				Some(doc) => {
					doc.data = data.clone();
					doc.meta.updated_at = Utc::now();
					doc.meta.version += 1;
				}
				None => {
					*doc = Some(Document {
						data: data.clone(),
						meta: DocumentMeta::new(),
					});
				}
			}
		}
		let _ = self.events.send(RemoteEvent { data });
	}

	/// Returns a copy of the current document, if one exists.
	pub fn document(&self) -> Option<Document> {
		self.document.lock().unwrap().clone()
	}

	/// Returns how many patches have been applied.
	pub fn patch_count(&self) -> usize {
		self.applied.lock().unwrap().len()
	}

	/// Returns a copy of the most recently applied patch.
	pub fn last_patch(&self) -> Option<Patch> {
		self.applied.lock().unwrap().last().cloned()
	}
}

impl Default for MemoryRemote {
	fn default() -> Self {
		Self::new()
	}
}

#[async_trait]
impl RemoteStore for MemoryRemote {
	async fn get_document(&self) -> Result<DocumentSnapshot> {
		let doc = self.document.lock().unwrap();
		Ok(match doc.as_ref() {
			Some(doc) => DocumentSnapshot {
				exists: true,
				data: doc.data.clone(),
			},
			None => DocumentSnapshot {
				exists: false,
				data: HashMap::new(),
			},
		})
	}

	async fn set_document(&self, patch: Patch, merge: bool) -> Result<()> {
		{
			let mut doc = self.document.lock().unwrap();

			if !merge || doc.is_none() {
				let existing_meta = doc.as_ref().map(|d| d.meta.clone());
				*doc = Some(Document {
					data: HashMap::new(),
					meta: existing_meta.unwrap_or_else(DocumentMeta::new),
				});
			}

			let doc = doc.as_mut().ok_or_else(|| {
				SyncError::Remote("document vanished during write".to_string())
			})?;

			for (key, field) in &patch.fields {
				match field {
					FieldPatch::Set(value) => {
						doc.data.insert(key.clone(), value.clone());
					}
					FieldPatch::Delete => {
						doc.data.remove(key);
					}
				}
			}
			doc.meta.updated_at = Utc::now();
			doc.meta.version += 1;
		}

		self.applied.lock().unwrap().push(patch);
		Ok(())
	}

	fn subscribe(&self) -> broadcast::Receiver<RemoteEvent> {
		self.events.subscribe()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn missing_document_reports_not_exists() {
		let remote = MemoryRemote::new();
		let snapshot = remote.get_document().await.unwrap();
		assert!(!snapshot.exists);
		assert!(snapshot.data.is_empty());
	}

	#[tokio::test]
	async fn merge_patch_touches_only_named_fields() {
		let remote = MemoryRemote::with_document(HashMap::from([
			("keep".to_string(), "1".to_string()),
			("drop".to_string(), "2".to_string()),
		]));

		let mut patch = Patch::new();
		patch.set("new", "3");
		patch.delete("drop");
		remote.set_document(patch, true).await.unwrap();

		let doc = remote.document().unwrap();
		assert_eq!(doc.data.get("keep").map(String::as_str), Some("1"));
		assert_eq!(doc.data.get("new").map(String::as_str), Some("3"));
		assert_eq!(doc.data.get("drop"), None);
		assert_eq!(doc.meta.version, 1);
	}

	#[tokio::test]
	async fn non_merge_write_replaces_document() {
		let remote = MemoryRemote::with_document(HashMap::from([(
			"old".to_string(),
			"1".to_string(),
		)]));

		let mut patch = Patch::new();
		patch.set("new", "2");
		remote.set_document(patch, false).await.unwrap();

		let doc = remote.document().unwrap();
		assert_eq!(doc.data.get("old"), None);
		assert_eq!(doc.data.get("new").map(String::as_str), Some("2"));
	}

	#[tokio::test]
	async fn own_writes_are_not_echoed() {
		let remote = MemoryRemote::new();
		let mut events = remote.subscribe();

		let mut patch = Patch::new();
		patch.set("a", "1");
		remote.set_document(patch, true).await.unwrap();

		assert!(matches!(
			events.try_recv(),
			Err(broadcast::error::TryRecvError::Empty)
		));
	}

	#[tokio::test]
	async fn publish_notifies_and_overwrites() {
		let remote = MemoryRemote::with_document(HashMap::new());
		let mut events = remote.subscribe();

		remote.publish(HashMap::from([("gold".to_string(), "100".to_string())]));

		let event = events.recv().await.unwrap();
		assert_eq!(event.data.get("gold").map(String::as_str), Some("100"));
		assert_eq!(
			remote.document().unwrap().data.get("gold").map(String::as_str),
			Some("100")
		);
	}
}

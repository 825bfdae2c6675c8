//! WebStorage - a [`KeyValueStore`] adapter over the browser's Storage API.
//!
//! `localStorage` and `sessionStorage` already have exactly the shape of
//! [`KeyValueStore`] - `length`, `key(n)`, `getItem`, `setItem`,
//! `removeItem`, `clear` - so the adapter is a thin translation layer. Wrap
//! it in a [`SyncCache`](crate::SyncCache) to mirror the browser store to a
//! remote document.
//!
//! The `Storage` handle is not `Send`, which is why [`KeyValueStore`] bounds
//! on `MaybeSend` rather than `Send`: on WASM targets (the only place this
//! type is usable) the bound is vacuous.

use crate::{KeyValueStore, Result, SyncError};
use web_sys::Storage;

/// A key-value store backed by `window.localStorage` or
/// `window.sessionStorage`.
pub struct WebStorage {
	storage: Storage,
}

impl WebStorage {
	/// Wraps an existing `Storage` handle.
	pub fn new(storage: Storage) -> Self {
		Self { storage }
	}

	/// Opens `window.localStorage`.
	///
	/// # Errors
	/// Returns [`SyncError::Storage`] when there is no window object or the
	/// browser blocks storage access (private browsing, third-party
	/// context, storage policy).
	pub fn local() -> Result<Self> {
		let window =
			web_sys::window().ok_or_else(|| SyncError::Storage("no window object".into()))?;
		let storage = window
			.local_storage()
			.map_err(|e| SyncError::Storage(format!("localStorage blocked: {e:?}")))?
			.ok_or_else(|| SyncError::Storage("localStorage unavailable".into()))?;
		Ok(Self { storage })
	}

	/// Opens `window.sessionStorage`.
	///
	/// # Errors
	/// Same conditions as [`local`](Self::local).
	pub fn session() -> Result<Self> {
		let window =
			web_sys::window().ok_or_else(|| SyncError::Storage("no window object".into()))?;
		let storage = window
			.session_storage()
			.map_err(|e| SyncError::Storage(format!("sessionStorage blocked: {e:?}")))?
			.ok_or_else(|| SyncError::Storage("sessionStorage unavailable".into()))?;
		Ok(Self { storage })
	}
}

impl KeyValueStore for WebStorage {
	fn len(&self) -> usize {
		self.storage.length().unwrap_or(0) as usize
	}

	fn key_at(&self, index: usize) -> Option<String> {
		self.storage.key(index as u32).ok().flatten()
	}

	fn get(&self, key: &str) -> Option<String> {
		self.storage.get_item(key).ok().flatten()
	}

	fn set(&mut self, key: &str, value: &str) -> Result<()> {
		self.storage
			.set_item(key, value)
			.map_err(|e| SyncError::Storage(format!("setItem failed (quota?): {e:?}")))
	}

	fn remove(&mut self, key: &str) {
		let _ = self.storage.remove_item(key);
	}

	fn clear(&mut self) {
		let _ = self.storage.clear();
	}
}

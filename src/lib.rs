mod error;
mod file;
mod memory;
mod remote;
mod sync;

#[cfg(feature = "web")]
mod web;

pub use error::{Result, SyncError};
pub use file::{FileConfig, FileStore};
pub use memory::MemoryStore;
pub use remote::{
	Document, DocumentMeta, DocumentSnapshot, FieldPatch, FixedIdentity, IdentityProvider,
	MemoryRemote, Patch, RemoteEvent, RemoteStore,
};
pub use sync::{SyncCache, SyncConfig};

#[cfg(feature = "web")]
pub use web::WebStorage;

// MaybeSend trait - allows Send bound on native, but is a no-op on WASM
// since WASM is single-threaded and doesn't need Send.
//
// This enables WebStorage (which wraps a non-Send web_sys::Storage handle)
// to implement KeyValueStore on WASM targets while still requiring Send on
// native targets where a store crosses into the sync worker task.

/// A trait that requires `Send` on native targets but is automatically
/// implemented for all types on WASM targets.
///
/// This allows types like `WebStorage` (which contain a `web_sys::Storage`
/// handle) to implement [`KeyValueStore`] on WASM, where the `Send` bound is
/// meaningless since there are no threads.
#[cfg(not(target_arch = "wasm32"))]
pub trait MaybeSend: Send {}
#[cfg(not(target_arch = "wasm32"))]
impl<T: Send> MaybeSend for T {}

#[cfg(target_arch = "wasm32")]
pub trait MaybeSend {}
#[cfg(target_arch = "wasm32")]
impl<T> MaybeSend for T {}

/// A synchronous string key-value storage interface, shaped after the Web
/// Storage API: indexed key enumeration, read, write, delete and clear.
///
/// Implementations are plain stores with no sync behavior of their own.
/// [`SyncCache`] wraps any implementation and mirrors it to a remote
/// document; since the wrapper implements this trait as well, it composes
/// anywhere a store is expected.
///
/// This trait requires `MaybeSend`, which means:
/// - On native targets: implementations must be `Send` (thread-safe)
/// - On WASM targets: no restrictions (single-threaded environment)
pub trait KeyValueStore: MaybeSend {
	/// Returns the number of keys currently stored.
	fn len(&self) -> usize;

	/// Returns `true` if the store holds no keys.
	fn is_empty(&self) -> bool {
		self.len() == 0
	}

	/// Returns the key at the given enumeration index, or `None` if the
	/// index is out of range.
	///
	/// Enumeration order is stable between mutations but otherwise
	/// unspecified, matching `Storage.key(n)` semantics.
	fn key_at(&self, index: usize) -> Option<String>;

	/// Returns the value stored under `key`, or `None` if absent.
	fn get(&self, key: &str) -> Option<String>;

	/// Stores `value` under `key`, replacing any previous value.
	///
	/// # Errors
	/// Returns an error if the backing medium rejects the write (disk I/O
	/// failure, storage quota, etc).
	fn set(&mut self, key: &str, value: &str) -> Result<()>;

	/// Removes `key` from the store. Removing an absent key is a no-op.
	fn remove(&mut self, key: &str);

	/// Removes every key from the store.
	fn clear(&mut self);
}

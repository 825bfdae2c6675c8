//! SyncCache - write-coalescing mirror of a local key-value store to a
//! remote per-user document.
//!
//! Local reads and writes stay synchronous against an in-memory cache and
//! the wrapped store; mutations are staged into a pending map and flushed to
//! the remote as one batched patch per debounce window. Remote change
//! notifications flow back through the same worker task and overwrite the
//! cache and the wrapped store (last-notification-wins).
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │                        SyncCache                           │
//! │                                                            │
//! │  set()/remove() ──► cache + pending ──► Dirty ─┐           │
//! │  get()          ◄── cache (read-through)       │           │
//! │                                                ▼           │
//! │              worker task: select! ── debounce ──► Patch ──►│ remote
//! │                          ▲                                 │
//! │  cache + store ◄── reconcile ◄── change notifications ◄────│ remote
//! └────────────────────────────────────────────────────────────┘
//! ```
//!
//! One worker task owns the debounce deadline and all network I/O; the
//! local command channel and the remote subscription are its only two event
//! sources, so the ordering between a flush and a notification is the
//! arrival order on that queue.

use crate::remote::Patch;
use crate::{IdentityProvider, KeyValueStore, RemoteStore, Result, SyncError};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::Instant;
use tracing::{debug, warn};

/// Configuration for a [`SyncCache`].
#[derive(Clone, Debug)]
pub struct SyncConfig {
	/// How long a flush stays armed after the first staged mutation.
	/// Further mutations inside the window coalesce into the same batch;
	/// the window is not extended by them. Defaults to 400ms.
	pub debounce: Duration,
}

impl Default for SyncConfig {
	fn default() -> Self {
		Self {
			debounce: Duration::from_millis(400),
		}
	}
}

/// State shared between the cache handle and its worker task.
struct Shared<S> {
	inner: S,
	/// Authoritative in-process view; reads hit this before the inner store.
	cache: HashMap<String, String>,
	/// Mutations staged since the last flush. `None` is a tombstone.
	pending: HashMap<String, Option<String>>,
	/// Set when the store was cleared locally since the last flush.
	pending_clear: bool,
	/// Every key ever observed locally or remotely.
	known: HashSet<String>,
}

enum Command {
	/// A local mutation was staged; arm the debounce timer if idle.
	Dirty,
	/// Flush immediately and acknowledge once the attempt settles.
	Flush(oneshot::Sender<()>),
	Shutdown,
}

/// The resolved readiness outcome, fanned out over a watch channel.
type Readiness = Option<Result<String>>;

/// A key-value store decorator that mirrors all mutations to a remote
/// per-user document, coalescing write bursts into one batched patch per
/// debounce window.
///
/// The wrapped store is composed at construction, so wrapping is explicit
/// and wrapping twice is a type error rather than a runtime concern. The
/// decorator implements [`KeyValueStore`] itself and preserves synchronous
/// read-your-own-writes: a `get` immediately after a `set` returns the
/// written value regardless of flush state.
///
/// Consistency is last-writer-wins per key, with no cross-key atomicity: a
/// remote value observed in a notification always overwrites a differing
/// cache value, even if a local write is in flight.
///
/// Requires a tokio runtime; the constructor spawns the sync worker task.
/// Dropping the cache (or calling [`close`](Self::close)) stops the worker,
/// after which the cache degrades to local-only operation.
///
/// # Examples
/// ```
/// use mirrorkv::{FixedIdentity, MemoryRemote, MemoryStore, SyncCache};
/// use std::sync::Arc;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let cache = SyncCache::new(
/// 	MemoryStore::new(),
/// 	Arc::new(MemoryRemote::new()),
/// 	Arc::new(FixedIdentity::new("user-1")),
/// );
///
/// let user = cache.ready().await.unwrap();
/// assert_eq!(user, "user-1");
///
/// cache.set("score", "10").unwrap();
/// assert_eq!(cache.get("score").as_deref(), Some("10"));
///
/// cache.flush().await.unwrap();
/// # }
/// ```
pub struct SyncCache<S: KeyValueStore> {
	shared: Arc<Mutex<Shared<S>>>,
	commands: mpsc::UnboundedSender<Command>,
	ready: watch::Receiver<Readiness>,
}

impl<S: KeyValueStore + 'static> SyncCache<S> {
	/// Wraps `store` with the default [`SyncConfig`].
	///
	/// Must be called within a tokio runtime.
	pub fn new(
		store: S,
		remote: Arc<dyn RemoteStore>,
		identity: Arc<dyn IdentityProvider>,
	) -> Self {
		Self::with_config(store, remote, identity, SyncConfig::default())
	}

	/// Wraps `store` and spawns the sync worker.
	///
	/// The worker resolves the identity, fetches the remote document,
	/// bootstraps (remote-wins when the document exists, local-export
	/// otherwise) and then serves flushes and notifications until shutdown.
	/// Mutations staged before the handshake completes simply queue; no
	/// network write happens before a document reference exists.
	pub fn with_config(
		store: S,
		remote: Arc<dyn RemoteStore>,
		identity: Arc<dyn IdentityProvider>,
		config: SyncConfig,
	) -> Self {
		let shared = Arc::new(Mutex::new(Shared {
			inner: store,
			cache: HashMap::new(),
			pending: HashMap::new(),
			pending_clear: false,
			known: HashSet::new(),
		}));
		let (commands_tx, commands_rx) = mpsc::unbounded_channel();
		let (ready_tx, ready_rx) = watch::channel(None);

		let worker = Worker {
			shared: shared.clone(),
			remote,
			identity,
			commands: commands_rx,
			ready: ready_tx,
			debounce: config.debounce,
		};
		tokio::spawn(worker.run());

		Self {
			shared,
			commands: commands_tx,
			ready: ready_rx,
		}
	}

	/// Resolves once the handshake and initial bootstrap complete, yielding
	/// the user identifier keying the remote document.
	///
	/// Any number of tasks may await this; they all observe the same
	/// outcome. An identity or connection failure rejects every awaiter and
	/// leaves the cache in local-only operation.
	pub async fn ready(&self) -> Result<String> {
		let mut ready = self.ready.clone();
		loop {
			if let Some(outcome) = ready.borrow_and_update().clone() {
				return outcome;
			}
			if ready.changed().await.is_err() {
				return Err(SyncError::Closed);
			}
		}
	}

	/// Returns the resolved user identifier, or `None` before readiness or
	/// after an initialization failure.
	pub fn user_id(&self) -> Option<String> {
		match &*self.ready.borrow() {
			Some(Ok(id)) => Some(id.clone()),
			_ => None,
		}
	}

	/// Returns the value for `key`.
	///
	/// Cache hits do not touch the wrapped store. On a miss the value is
	/// read through, cached and the key marked known. There is no remote
	/// freshness guarantee for keys not yet reconciled.
	pub fn get(&self, key: &str) -> Option<String> {
		let mut shared = self.shared.lock().unwrap();
		if let Some(value) = shared.cache.get(key) {
			return Some(value.clone());
		}
		let value = shared.inner.get(key)?;
		shared.cache.insert(key.to_string(), value.clone());
		shared.known.insert(key.to_string());
		Some(value)
	}

	/// Stores `value` under `key` and schedules a flush.
	///
	/// The cache and pending map are updated before the wrapped store is
	/// written, so the mutation reaches the remote on the next flush even
	/// if the local write fails.
	pub fn set(&self, key: &str, value: &str) -> Result<()> {
		let result = {
			let mut shared = self.shared.lock().unwrap();
			shared.cache.insert(key.to_string(), value.to_string());
			shared.known.insert(key.to_string());
			shared
				.pending
				.insert(key.to_string(), Some(value.to_string()));
			shared.inner.set(key, value)
		};
		self.schedule_flush();
		result
	}

	/// Removes `key`, staging a tombstone for the remote document.
	pub fn remove(&self, key: &str) {
		{
			let mut shared = self.shared.lock().unwrap();
			shared.cache.remove(key);
			shared.pending.insert(key.to_string(), None);
			shared.inner.remove(key);
		}
		self.schedule_flush();
	}

	/// Clears the store, staging a tombstone for every known key.
	///
	/// A write staged after the clear but before the flush overwrites that
	/// key's tombstone in the pending map, so the key survives the clear in
	/// the flushed patch. This follows from per-field patch semantics and
	/// is kept deliberately.
	pub fn clear(&self) {
		{
			let mut shared = self.shared.lock().unwrap();
			shared.pending_clear = true;
			shared.cache.clear();
			shared.pending.clear();
			let known: Vec<String> = shared.known.drain().collect();
			for key in known {
				shared.pending.insert(key, None);
			}
			shared.inner.clear();
		}
		self.schedule_flush();
	}

	/// Returns the key at `index` in the wrapped store's enumeration order.
	pub fn key_at(&self, index: usize) -> Option<String> {
		self.shared.lock().unwrap().inner.key_at(index)
	}

	/// Returns the number of keys in the wrapped store.
	pub fn len(&self) -> usize {
		self.shared.lock().unwrap().inner.len()
	}

	/// Returns `true` if the wrapped store holds no keys.
	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	/// Flushes any pending mutations now, without waiting for the debounce
	/// window.
	///
	/// Resolves once the flush attempt settles. A failed remote write is
	/// logged and dropped, so this still resolves `Ok`; [`SyncError::Closed`]
	/// means the worker has shut down.
	pub async fn flush(&self) -> Result<()> {
		let (ack_tx, ack_rx) = oneshot::channel();
		self.commands
			.send(Command::Flush(ack_tx))
			.map_err(|_| SyncError::Closed)?;
		ack_rx.await.map_err(|_| SyncError::Closed)
	}

	/// Returns a snapshot of the wrapped store's full contents.
	pub fn export(&self) -> HashMap<String, String> {
		let shared = self.shared.lock().unwrap();
		let mut snapshot = HashMap::new();
		for index in 0..shared.inner.len() {
			let Some(key) = shared.inner.key_at(index) else {
				continue;
			};
			if let Some(value) = shared.inner.get(&key) {
				snapshot.insert(key, value);
			}
		}
		snapshot
	}

	/// Returns a read-only copy of the current cache contents.
	pub fn cache(&self) -> HashMap<String, String> {
		self.shared.lock().unwrap().cache.clone()
	}

	/// Stores a non-string value by serializing it to JSON.
	pub fn set_json<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
		let raw = serde_json::to_string(value)
			.map_err(|e| SyncError::Serialization(e.to_string()))?;
		self.set(key, &raw)
	}

	/// Reads a value stored with [`set_json`](Self::set_json).
	///
	/// Returns `None` when the key is absent or its value does not parse.
	pub fn get_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
		serde_json::from_str(&self.get(key)?).ok()
	}

	/// Stops the sync worker. Local operations keep working against the
	/// cache and the wrapped store; flushes return [`SyncError::Closed`].
	pub fn close(&self) {
		let _ = self.commands.send(Command::Shutdown);
	}

	fn schedule_flush(&self) {
		// If the worker is gone the mutation stays local, per the
		// degrade-to-local-only error model.
		let _ = self.commands.send(Command::Dirty);
	}
}

impl<S: KeyValueStore + 'static> KeyValueStore for SyncCache<S> {
	fn len(&self) -> usize {
		SyncCache::len(self)
	}

	fn key_at(&self, index: usize) -> Option<String> {
		SyncCache::key_at(self, index)
	}

	fn get(&self, key: &str) -> Option<String> {
		SyncCache::get(self, key)
	}

	fn set(&mut self, key: &str, value: &str) -> Result<()> {
		SyncCache::set(self, key, value)
	}

	fn remove(&mut self, key: &str) {
		SyncCache::remove(self, key)
	}

	fn clear(&mut self) {
		SyncCache::clear(self)
	}
}

impl<S: KeyValueStore> Drop for SyncCache<S> {
	fn drop(&mut self) {
		let _ = self.commands.send(Command::Shutdown);
	}
}

/// The single consumer task behind a [`SyncCache`].
///
/// Two event sources feed it - the local command channel and the remote
/// subscription - and it owns the debounce deadline, so flushes and
/// reconciliations are serialized in arrival order.
struct Worker<S> {
	shared: Arc<Mutex<Shared<S>>>,
	remote: Arc<dyn RemoteStore>,
	identity: Arc<dyn IdentityProvider>,
	commands: mpsc::UnboundedReceiver<Command>,
	ready: watch::Sender<Readiness>,
	debounce: Duration,
}

impl<S: KeyValueStore> Worker<S> {
	async fn run(mut self) {
		let user_id = match self.identity.user_id().await {
			Ok(id) => id,
			Err(e) => {
				warn!("identity exchange failed: {e}");
				let _ = self.ready.send(Some(Err(SyncError::Identity(e.to_string()))));
				return;
			}
		};

		let snapshot = match self.remote.get_document().await {
			Ok(snapshot) => snapshot,
			Err(e) => {
				warn!("initial document fetch failed: {e}");
				let _ = self
					.ready
					.send(Some(Err(SyncError::Connection(e.to_string()))));
				return;
			}
		};

		// Subscribe before bootstrapping so no notification is missed
		// between the initial fetch and the steady-state loop.
		let mut events = self.remote.subscribe();

		if snapshot.exists {
			debug!(keys = snapshot.data.len(), "adopting existing remote document");
			self.adopt_remote(snapshot.data);
		} else if let Err(e) = self.export_local().await {
			warn!("initial document export failed: {e}");
			let _ = self
				.ready
				.send(Some(Err(SyncError::Connection(e.to_string()))));
			return;
		}

		let _ = self.ready.send(Some(Ok(user_id.clone())));
		debug!(user = %user_id, "sync ready");

		let mut deadline: Option<Instant> = None;
		let mut events_open = true;
		loop {
			tokio::select! {
				command = self.commands.recv() => match command {
					Some(Command::Dirty) => {
						if deadline.is_none() {
							deadline = Some(Instant::now() + self.debounce);
						}
					}
					Some(Command::Flush(ack)) => {
						deadline = None;
						self.flush().await;
						let _ = ack.send(());
					}
					Some(Command::Shutdown) | None => break,
				},
				event = events.recv(), if events_open => match event {
					Ok(event) => self.reconcile(event.data),
					Err(broadcast::error::RecvError::Lagged(skipped)) => {
						warn!(skipped, "remote notifications lagged");
					}
					Err(broadcast::error::RecvError::Closed) => {
						warn!("remote notification stream closed");
						events_open = false;
					}
				},
				_ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)),
					if deadline.is_some() =>
				{
					deadline = None;
					self.flush().await;
				}
			}
		}

		debug!("sync worker stopped");
	}

	/// Remote-wins bootstrap: the remote document replaces the cache and
	/// the wrapped store wholesale.
	fn adopt_remote(&self, data: HashMap<String, String>) {
		let mut shared = self.shared.lock().unwrap();
		shared.inner.clear();
		for (key, value) in &data {
			if let Err(e) = shared.inner.set(key, value) {
				warn!(key = %key, "failed to mirror remote value locally: {e}");
			}
		}
		shared.known = data.keys().cloned().collect();
		shared.cache = data;
	}

	/// Local-wins bootstrap for a fresh identity: export the wrapped
	/// store's contents as the initial remote document.
	async fn export_local(&self) -> Result<()> {
		let patch = {
			let mut shared = self.shared.lock().unwrap();
			let mut patch = Patch::new();
			let mut snapshot = HashMap::new();
			for index in 0..shared.inner.len() {
				let Some(key) = shared.inner.key_at(index) else {
					continue;
				};
				let Some(value) = shared.inner.get(&key) else {
					continue;
				};
				patch.set(key.clone(), value.clone());
				snapshot.insert(key, value);
			}
			shared.known = snapshot.keys().cloned().collect();
			shared.cache = snapshot;
			patch
		};

		debug!(keys = patch.len(), "exporting local store as initial document");
		self.remote.set_document(patch, false).await
	}

	/// Sends everything pending as one merge patch.
	///
	/// The pending map is snapshotted and cleared before the request is
	/// sent; a failed write is logged and the batch dropped, though a key
	/// still in the cache may reach the remote through a later flush.
	async fn flush(&self) {
		let patch = {
			let mut shared = self.shared.lock().unwrap();
			if shared.pending.is_empty() && !shared.pending_clear {
				return;
			}
			shared.pending_clear = false;
			let pending = std::mem::take(&mut shared.pending);

			let mut patch = Patch::new();
			for (key, value) in pending {
				match value {
					Some(value) => patch.set(key, value),
					None => patch.delete(key),
				}
			}
			patch
		};

		let fields = patch.len();
		match self.remote.set_document(patch, true).await {
			Ok(()) => debug!(fields, "flushed batch"),
			Err(e) => warn!(fields, "dropping failed batch: {e}"),
		}
	}

	/// Applies a remote notification: differing values overwrite the cache
	/// and the wrapped store, equal values are skipped, and every payload
	/// key is marked known.
	fn reconcile(&self, data: HashMap<String, String>) {
		let mut shared = self.shared.lock().unwrap();
		for (key, value) in data {
			if shared.cache.get(&key) != Some(&value) {
				debug!(key = %key, "adopting remote value");
				if let Err(e) = shared.inner.set(&key, &value) {
					warn!(key = %key, "failed to mirror remote value locally: {e}");
				}
				shared.cache.insert(key.clone(), value);
			}
			shared.known.insert(key);
		}
	}
}

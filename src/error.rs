use thiserror::Error;

/// Errors produced by stores and the sync layer.
///
/// All variants carry plain strings and the enum is `Clone`, so a single
/// initialization failure can be fanned out to every task awaiting
/// [`SyncCache::ready`](crate::SyncCache::ready).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
	/// The identity exchange failed; no user id could be resolved.
	#[error("identity exchange failed: {0}")]
	Identity(String),

	/// The initial remote connection or document fetch failed.
	#[error("remote connection failed: {0}")]
	Connection(String),

	/// A remote write or read failed after the connection was established.
	#[error("remote operation failed: {0}")]
	Remote(String),

	/// The backing local store rejected an operation.
	#[error("local storage failed: {0}")]
	Storage(String),

	/// A value could not be serialized or deserialized.
	#[error("serialization failed: {0}")]
	Serialization(String),

	/// The sync worker has shut down; the cache is local-only.
	#[error("sync worker is closed")]
	Closed,
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, SyncError>;

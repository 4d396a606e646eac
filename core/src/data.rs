use serde::{de::DeserializeOwned, Serialize};
use std::time::Duration;

use crate::{
	request_id::UpstreamId,
	types::{Fingerprint, Frame},
};
use color_eyre::Result;

mod keys;
use keys::*;

mod mem_db;
pub use mem_db::*;

#[cfg(feature = "rocksdb")]
mod rocks_db;
#[cfg(feature = "rocksdb")]
pub use rocks_db::*;

#[cfg(not(feature = "rocksdb"))]
pub type DB = mem_db::MemoryDB;
#[cfg(feature = "rocksdb")]
pub type DB = rocks_db::RocksDB;

/// Type of the database key which we can get from the custom key.
pub trait RecordKey {
	type Type: Serialize + DeserializeOwned;

	fn key(&self) -> String;
}

/// Key-value store backing the gateway state.
///
/// Entries written with a TTL are treated as absent once expired, regardless of whether
/// the backend has already reclaimed them.
pub trait Database {
	/// Puts value for given key into database, without expiry.
	fn put<T: RecordKey>(&self, key: T, value: T::Type) -> Result<()>;

	/// Puts value for given key into database, expiring after given TTL.
	fn put_with_ttl<T: RecordKey>(&self, key: T, value: T::Type, ttl: Duration) -> Result<()>;

	/// Atomically puts value with TTL, only if there is no live value for the key.
	/// Returns `true` if the value was written.
	fn put_if_absent<T: RecordKey>(&self, key: T, value: T::Type, ttl: Duration) -> Result<bool>;

	/// Gets value for given key.
	fn get<T: RecordKey>(&self, key: T) -> Result<Option<T::Type>>;

	/// Deletes value from the database for the given key.
	fn delete<T: RecordKey>(&self, key: T) -> Result<()>;

	/// Puts value into the field of a hash stored under the given key.
	fn hash_put<T: RecordKey>(&self, key: T, field: &str, value: T::Type) -> Result<()>;

	/// Gets value from the field of a hash stored under the given key.
	fn hash_get<T: RecordKey>(&self, key: T, field: &str) -> Result<Option<T::Type>>;

	/// Removes expired entries, returns number of removed entries.
	fn prune_expired(&self) -> Result<usize>;
}

/// Upstream response to a forwarded request, keyed by its upstream ID
#[derive(Clone)]
pub struct ResponseKey(pub UpstreamId);

impl RecordKey for ResponseKey {
	type Type = Frame;

	fn key(&self) -> String {
		let ResponseKey(upstream_id) = self;
		format!("{RESPONSE_PREFIX}:{upstream_id}")
	}
}

/// Last response for a normalized call
#[derive(Clone)]
pub struct ResponseCacheKey(pub Fingerprint);

impl RecordKey for ResponseCacheKey {
	type Type = Frame;

	fn key(&self) -> String {
		let ResponseCacheKey(fingerprint) = self;
		format!("{RESPONSE_CACHE_PREFIX}:{fingerprint}")
	}
}

/// Fingerprint of the request pending under an upstream ID
#[derive(Clone)]
pub struct PendingFingerprintKey(pub UpstreamId);

impl RecordKey for PendingFingerprintKey {
	type Type = Fingerprint;

	fn key(&self) -> String {
		let PendingFingerprintKey(upstream_id) = self;
		format!("{PENDING_FINGERPRINT_PREFIX}:{upstream_id}")
	}
}

/// Upstream ID of the single request in flight for a normalized call
#[derive(Clone)]
pub struct InFlightKey(pub Fingerprint);

impl RecordKey for InFlightKey {
	type Type = UpstreamId;

	fn key(&self) -> String {
		let InFlightKey(fingerprint) = self;
		format!("{IN_FLIGHT_PREFIX}:{fingerprint}")
	}
}

/// Upstream subscription IDs of standing subscriptions, hashed by topic
#[derive(Clone)]
pub struct SubscriptionIdsKey;

impl RecordKey for SubscriptionIdsKey {
	type Type = serde_json::Value;

	fn key(&self) -> String {
		SUBSCRIPTION_IDS_KEY.into()
	}
}

/// Latest notification frames, hashed by topic
#[derive(Clone)]
pub struct LatestNotificationsKey;

impl RecordKey for LatestNotificationsKey {
	type Type = Frame;

	fn key(&self) -> String {
		LATEST_NOTIFICATIONS_KEY.into()
	}
}

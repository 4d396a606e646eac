use crate::{data::Database, types::TimeToLive};
use color_eyre::{eyre::eyre, Result};
use std::{
	collections::HashMap,
	sync::{Arc, RwLock},
	time::{Duration, Instant},
};

use super::RecordKey;

#[derive(Clone)]
pub struct MemoryDB {
	map: Arc<RwLock<HashMap<HashMapKey, Entry>>>,
	hashes: Arc<RwLock<HashMap<HashMapKey, HashMap<String, String>>>>,
}

#[derive(Eq, Hash, PartialEq)]
pub struct HashMapKey(pub String);

struct Entry {
	value: String,
	expires: Option<Instant>,
}

impl Entry {
	fn is_live(&self, now: Instant) -> bool {
		self.expires.map_or(true, |expires| expires > now)
	}
}

impl Default for MemoryDB {
	fn default() -> Self {
		MemoryDB {
			map: Arc::new(RwLock::new(HashMap::new())),
			hashes: Arc::new(RwLock::new(HashMap::new())),
		}
	}
}

impl<T: RecordKey> From<T> for HashMapKey {
	fn from(value: T) -> Self {
		HashMapKey(value.key())
	}
}

fn poisoned<E>(_: E) -> color_eyre::Report {
	eyre!("MemoryDB lock is poisoned")
}

impl MemoryDB {
	fn insert<T: RecordKey>(&self, key: T, value: T::Type, expires: Option<Instant>) -> Result<()> {
		let value = serde_json::to_string(&value)?;
		let mut map = self.map.write().map_err(poisoned)?;
		map.insert(key.into(), Entry { value, expires });
		Ok(())
	}
}

impl Database for MemoryDB {
	fn put<T: RecordKey>(&self, key: T, value: T::Type) -> Result<()> {
		self.insert(key, value, None)
	}

	fn put_with_ttl<T: RecordKey>(&self, key: T, value: T::Type, ttl: Duration) -> Result<()> {
		self.insert(key, value, TimeToLive(ttl).expires())
	}

	fn put_if_absent<T: RecordKey>(&self, key: T, value: T::Type, ttl: Duration) -> Result<bool> {
		let value = serde_json::to_string(&value)?;
		let now = Instant::now();
		let mut map = self.map.write().map_err(poisoned)?;
		let key = key.into();
		if map.get(&key).is_some_and(|entry| entry.is_live(now)) {
			return Ok(false);
		}
		let expires = TimeToLive(ttl).expires();
		map.insert(key, Entry { value, expires });
		Ok(true)
	}

	fn get<T: RecordKey>(&self, key: T) -> Result<Option<T::Type>> {
		let map = self.map.read().map_err(poisoned)?;
		map.get(&key.into())
			.filter(|entry| entry.is_live(Instant::now()))
			.map(|entry| serde_json::from_str(&entry.value))
			.transpose()
			.map_err(Into::into)
	}

	fn delete<T: RecordKey>(&self, key: T) -> Result<()> {
		let mut map = self.map.write().map_err(poisoned)?;
		map.remove(&key.into());
		Ok(())
	}

	fn hash_put<T: RecordKey>(&self, key: T, field: &str, value: T::Type) -> Result<()> {
		let value = serde_json::to_string(&value)?;
		let mut hashes = self.hashes.write().map_err(poisoned)?;
		hashes
			.entry(key.into())
			.or_default()
			.insert(field.to_string(), value);
		Ok(())
	}

	fn hash_get<T: RecordKey>(&self, key: T, field: &str) -> Result<Option<T::Type>> {
		let hashes = self.hashes.read().map_err(poisoned)?;
		hashes
			.get(&key.into())
			.and_then(|hash| hash.get(field))
			.map(|value| serde_json::from_str(value))
			.transpose()
			.map_err(Into::into)
	}

	fn prune_expired(&self) -> Result<usize> {
		let now = Instant::now();
		let mut map = self.map.write().map_err(poisoned)?;
		let before = map.len();
		map.retain(|_, entry| entry.is_live(now));
		Ok(before - map.len())
	}
}

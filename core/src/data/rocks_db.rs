use super::*;
use codec::{Decode, Encode};
use color_eyre::eyre::{eyre, Result};
use rocksdb::{ColumnFamilyDescriptor, IteratorMode, Options};
use std::{
	sync::{Arc, Mutex},
	time::{SystemTime, UNIX_EPOCH},
};

/// Column family for plain gateway entries
pub const STATE_CF: &str = "hyperws_state_cf";
/// Column family for hash fields, keyed by `key::field`
pub const HASHES_CF: &str = "hyperws_hashes_cf";

#[derive(Clone)]
pub struct RocksDB {
	db: Arc<rocksdb::DB>,
	// serializes conditional writes
	write_lock: Arc<Mutex<()>>,
}

/// Stored value, with optional expiry in milliseconds since UNIX epoch
#[derive(Encode, Decode)]
struct Envelope {
	expires_at: Option<u64>,
	json: String,
}

impl Envelope {
	fn new<T: RecordKey>(value: &T::Type, ttl: Option<Duration>) -> Result<Self> {
		let expires_at = ttl
			.map(|ttl| now_millis().map(|now| now.saturating_add(ttl.as_millis() as u64)))
			.transpose()?;
		let json = serde_json::to_string(value)?;
		Ok(Envelope { expires_at, json })
	}

	fn is_live(&self, now: u64) -> bool {
		self.expires_at.map_or(true, |expires_at| expires_at > now)
	}
}

fn now_millis() -> Result<u64> {
	Ok(SystemTime::now().duration_since(UNIX_EPOCH)?.as_millis() as u64)
}

fn hash_field_key(key: &str, field: &str) -> String {
	format!("{key}::{field}")
}

impl RocksDB {
	pub fn open(path: &str) -> Result<RocksDB> {
		let cf_opts = vec![
			ColumnFamilyDescriptor::new(STATE_CF, Options::default()),
			ColumnFamilyDescriptor::new(HASHES_CF, Options::default()),
		];

		let mut db_opts = Options::default();
		db_opts.create_if_missing(true);
		db_opts.create_missing_column_families(true);

		let db = Arc::new(rocksdb::DB::open_cf_descriptors(&db_opts, path, cf_opts)?);
		Ok(RocksDB {
			db,
			write_lock: Arc::new(Mutex::new(())),
		})
	}

	fn write(&self, cf: &str, key: &str, envelope: Envelope) -> Result<()> {
		let cf_handle = self
			.db
			.cf_handle(cf)
			.ok_or_else(|| eyre!("Couldn't get Column Family handle {cf} from RocksDB"))?;
		self.db.put_cf(&cf_handle, key, envelope.encode())?;
		Ok(())
	}

	fn read(&self, cf: &str, key: &str) -> Result<Option<Envelope>> {
		let cf_handle = self
			.db
			.cf_handle(cf)
			.ok_or_else(|| eyre!("Couldn't get Column Family handle {cf} from RocksDB"))?;
		let Some(value) = self.db.get_cf(&cf_handle, key)? else {
			return Ok(None);
		};
		let envelope = Envelope::decode(&mut &value[..])?;
		Ok(Some(envelope).filter(|envelope| envelope.is_live(now_millis().unwrap_or_default())))
	}

	fn read_value<T: RecordKey>(&self, cf: &str, key: &str) -> Result<Option<T::Type>> {
		self.read(cf, key)?
			.map(|Envelope { json, .. }| serde_json::from_str(&json))
			.transpose()
			.map_err(Into::into)
	}
}

impl Database for RocksDB {
	fn put<T: RecordKey>(&self, key: T, value: T::Type) -> Result<()> {
		self.write(STATE_CF, &key.key(), Envelope::new::<T>(&value, None)?)
	}

	fn put_with_ttl<T: RecordKey>(&self, key: T, value: T::Type, ttl: Duration) -> Result<()> {
		self.write(STATE_CF, &key.key(), Envelope::new::<T>(&value, Some(ttl))?)
	}

	fn put_if_absent<T: RecordKey>(&self, key: T, value: T::Type, ttl: Duration) -> Result<bool> {
		let _guard = self
			.write_lock
			.lock()
			.map_err(|_| eyre!("RocksDB write lock is poisoned"))?;
		let key = key.key();
		if self.read(STATE_CF, &key)?.is_some() {
			return Ok(false);
		}
		self.write(STATE_CF, &key, Envelope::new::<T>(&value, Some(ttl))?)?;
		Ok(true)
	}

	fn get<T: RecordKey>(&self, key: T) -> Result<Option<T::Type>> {
		self.read_value::<T>(STATE_CF, &key.key())
	}

	fn delete<T: RecordKey>(&self, key: T) -> Result<()> {
		let cf_handle = self
			.db
			.cf_handle(STATE_CF)
			.ok_or_else(|| eyre!("Couldn't get Column Family handle {STATE_CF} from RocksDB"))?;
		self.db.delete_cf(&cf_handle, key.key())?;
		Ok(())
	}

	fn hash_put<T: RecordKey>(&self, key: T, field: &str, value: T::Type) -> Result<()> {
		let key = hash_field_key(&key.key(), field);
		self.write(HASHES_CF, &key, Envelope::new::<T>(&value, None)?)
	}

	fn hash_get<T: RecordKey>(&self, key: T, field: &str) -> Result<Option<T::Type>> {
		self.read_value::<T>(HASHES_CF, &hash_field_key(&key.key(), field))
	}

	fn prune_expired(&self) -> Result<usize> {
		let cf_handle = self
			.db
			.cf_handle(STATE_CF)
			.ok_or_else(|| eyre!("Couldn't get Column Family handle {STATE_CF} from RocksDB"))?;
		let now = now_millis()?;
		let mut pruned = 0;
		for entry in self.db.iterator_cf(&cf_handle, IteratorMode::Start) {
			let (key, value) = entry?;
			let Ok(envelope) = Envelope::decode(&mut &value[..]) else {
				continue;
			};
			if !envelope.is_live(now) {
				self.db.delete_cf(&cf_handle, key)?;
				pruned += 1;
			}
		}
		Ok(pruned)
	}
}

//! Gateway state shared by the cache, the upstream dispatcher and client sessions.
//!
//! Store access is retried a few times before failing with [`Error::StoreUnavailable`].
//! Every successful write wakes up the tasks waiting for that key, see [`ResponseStore::wait_for`].

use std::{
	collections::HashMap,
	sync::{Arc, Mutex, MutexGuard, PoisonError},
	time::Duration,
};
use tokio::{sync::oneshot, time::Instant};
use tokio_retry::{strategy::FixedInterval, Retry};
use tracing::{debug, trace};

use crate::{
	data::{Database, RecordKey},
	error::Error,
};

const STORE_ATTEMPTS: usize = 3;
const STORE_RETRY_INTERVAL_MS: u64 = 10;
/// Fallback polling interval, for values that expire or are written without a notification
const WAIT_POLL_INTERVAL: Duration = Duration::from_secs(1);

type Watchers = HashMap<String, Vec<oneshot::Sender<()>>>;

#[derive(Clone)]
pub struct ResponseStore<T: Database> {
	db: T,
	ttl: Duration,
	watchers: Arc<Mutex<Watchers>>,
}

impl<T: Database> ResponseStore<T> {
	pub fn new(db: T, ttl: Duration) -> Self {
		ResponseStore {
			db,
			ttl,
			watchers: Arc::new(Mutex::new(HashMap::new())),
		}
	}

	pub fn ttl(&self) -> Duration {
		self.ttl
	}

	fn watchers(&self) -> MutexGuard<'_, Watchers> {
		self.watchers.lock().unwrap_or_else(PoisonError::into_inner)
	}

	async fn retry<R>(&self, operation: impl Fn() -> color_eyre::Result<R>) -> Result<R, Error> {
		let operation = &operation;
		let strategy = FixedInterval::from_millis(STORE_RETRY_INTERVAL_MS).take(STORE_ATTEMPTS - 1);
		Retry::start(strategy, move || async move { operation() })
			.await
			.map_err(Error::store)
	}

	fn notify(&self, key: &str) {
		let Some(senders) = self.watchers().remove(key) else {
			return;
		};
		trace!(key, watchers = senders.len(), "Notifying watchers");
		for sender in senders {
			// Receiver is gone if the wait was abandoned
			let _ = sender.send(());
		}
	}

	fn watch(&self, key: &str) -> oneshot::Receiver<()> {
		let (sender, receiver) = oneshot::channel();
		self.watchers()
			.entry(key.to_string())
			.or_default()
			.push(sender);
		receiver
	}

	/// Drops watchers of abandoned waits
	fn prune_watchers(&self) -> usize {
		let mut watchers = self.watchers();
		let before = watchers.values().map(Vec::len).sum::<usize>();
		watchers.retain(|_, senders| {
			senders.retain(|sender| !sender.is_closed());
			!senders.is_empty()
		});
		before - watchers.values().map(Vec::len).sum::<usize>()
	}

	/// Stores value with configured TTL and wakes up waiters of the key
	pub async fn put<K>(&self, key: K, value: K::Type) -> Result<(), Error>
	where
		K: RecordKey + Clone,
		K::Type: Clone,
	{
		let name = key.key();
		self.retry(|| self.db.put_with_ttl(key.clone(), value.clone(), self.ttl))
			.await?;
		self.notify(&name);
		Ok(())
	}

	/// Stores value with configured TTL if there is no live value for the key.
	/// Returns `true` if the value was stored.
	pub async fn put_if_absent<K>(&self, key: K, value: K::Type) -> Result<bool, Error>
	where
		K: RecordKey + Clone,
		K::Type: Clone,
	{
		let name = key.key();
		let is_stored = self
			.retry(|| {
				self.db
					.put_if_absent(key.clone(), value.clone(), self.ttl)
			})
			.await?;
		if is_stored {
			self.notify(&name);
		}
		Ok(is_stored)
	}

	pub async fn get<K: RecordKey + Clone>(&self, key: K) -> Result<Option<K::Type>, Error> {
		self.retry(|| self.db.get(key.clone())).await
	}

	pub async fn delete<K: RecordKey + Clone>(&self, key: K) -> Result<(), Error> {
		self.retry(|| self.db.delete(key.clone())).await
	}

	pub async fn hash_put<K>(&self, key: K, field: &str, value: K::Type) -> Result<(), Error>
	where
		K: RecordKey + Clone,
		K::Type: Clone,
	{
		self.retry(|| self.db.hash_put(key.clone(), field, value.clone()))
			.await
	}

	pub async fn hash_get<K: RecordKey + Clone>(
		&self,
		key: K,
		field: &str,
	) -> Result<Option<K::Type>, Error> {
		self.retry(|| self.db.hash_get(key.clone(), field)).await
	}

	/// Waits until a value is stored under the key, for at most the given timeout.
	///
	/// Watcher is registered before the store is checked, so a value written between
	/// the check and the wait still wakes the waiter up.
	pub async fn wait_for<K: RecordKey + Clone>(
		&self,
		key: K,
		timeout: Duration,
	) -> Result<K::Type, Error> {
		let name = key.key();
		let deadline = Instant::now() + timeout;

		loop {
			let watcher = self.watch(&name);
			if let Some(value) = self.get(key.clone()).await? {
				return Ok(value);
			}

			let now = Instant::now();
			if now >= deadline {
				break;
			}
			let wake_up = deadline.min(now + WAIT_POLL_INTERVAL);
			// Either notified, polling again, or past the deadline on the next check
			let _ = tokio::time::timeout_at(wake_up, watcher).await;
		}

		let pruned = self.prune_watchers();
		debug!(key = %name, pruned, "Wait for key timed out");
		Err(Error::Timeout(timeout))
	}

	/// Removes expired entries and abandoned watchers
	pub async fn prune_expired(&self) -> Result<usize, Error> {
		let pruned = self.retry(|| self.db.prune_expired()).await?;
		let watchers = self.prune_watchers();
		trace!(watchers, "Pruned abandoned watchers");
		Ok(pruned)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::{
		data::{MemoryDB, ResponseKey, ResponseCacheKey},
		request_id::{self, ClientId, SessionId},
		types::{Fingerprint, Frame},
	};
	use color_eyre::eyre::eyre;
	use serde_json::json;
	use std::sync::atomic::{AtomicUsize, Ordering};

	fn store() -> ResponseStore<MemoryDB> {
		ResponseStore::new(MemoryDB::default(), Duration::from_secs(20))
	}

	fn response_key() -> ResponseKey {
		ResponseKey(request_id::encode(&SessionId::generate(), &ClientId::from(1)))
	}

	#[tokio::test]
	async fn wait_for_existing_value() {
		let store = store();
		let key = response_key();
		let frame = Frame::response(&ClientId::from(1), json!("0x01"));
		store.put(key.clone(), frame.clone()).await.unwrap();

		let value = store.wait_for(key, Duration::from_secs(1)).await.unwrap();
		assert_eq!(value, frame);
	}

	#[tokio::test]
	async fn wait_for_is_woken_up_by_write() {
		let store = store();
		let key = response_key();
		let frame = Frame::response(&ClientId::from(1), json!("0x02"));

		let waiter = tokio::spawn({
			let store = store.clone();
			let key = key.clone();
			async move { store.wait_for(key, Duration::from_secs(30)).await }
		});
		tokio::time::sleep(Duration::from_millis(10)).await;
		let started = std::time::Instant::now();
		store.put(key, frame.clone()).await.unwrap();

		assert_eq!(waiter.await.unwrap().unwrap(), frame);
		// woken up by the notification, well before the fallback poll
		assert!(started.elapsed() < WAIT_POLL_INTERVAL);
	}

	#[tokio::test(start_paused = true)]
	async fn wait_for_times_out() {
		let store = store();
		let timeout = Duration::from_secs(5);
		let result = store.wait_for(response_key(), timeout).await;
		assert_eq!(result, Err(Error::Timeout(timeout)));
		assert!(store.watchers().is_empty());
	}

	#[tokio::test]
	async fn abandoned_watchers_are_pruned() {
		let store = store();
		let wait = store.wait_for(response_key(), Duration::from_secs(30));
		let _ = tokio::time::timeout(Duration::from_millis(10), wait).await;
		assert_eq!(store.watchers().len(), 1);

		store.prune_expired().await.unwrap();
		assert!(store.watchers().is_empty());
	}

	#[tokio::test]
	async fn put_if_absent_notifies_only_when_stored() {
		let store = store();
		let fingerprint = Fingerprint::new("chain_getBlock", Some(&json!([]))).unwrap();
		let key = ResponseCacheKey(fingerprint);
		let first = Frame::response(&ClientId::from(1), json!("first"));
		let second = Frame::response(&ClientId::from(2), json!("second"));

		assert!(store.put_if_absent(key.clone(), first.clone()).await.unwrap());
		assert!(!store.put_if_absent(key.clone(), second).await.unwrap());
		assert_eq!(store.get(key).await.unwrap(), Some(first));
	}

	#[tokio::test(start_paused = true)]
	async fn retries_failing_operations() {
		let store = store();
		let attempts = AtomicUsize::new(0);

		let result = store
			.retry(|| {
				attempts.fetch_add(1, Ordering::SeqCst);
				Err::<(), _>(eyre!("connection refused"))
			})
			.await;
		assert_eq!(attempts.load(Ordering::SeqCst), STORE_ATTEMPTS);
		assert!(matches!(result, Err(Error::StoreUnavailable(_))));

		attempts.store(0, Ordering::SeqCst);
		let result = store
			.retry(|| match attempts.fetch_add(1, Ordering::SeqCst) {
				0 => Err(eyre!("connection refused")),
				_ => Ok(42),
			})
			.await;
		assert_eq!(result, Ok(42));
	}
}

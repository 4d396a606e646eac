use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info};

use crate::{data::Database, store::ResponseStore};

/// Periodically prunes expired entries from the store. Runs until dropped.
pub async fn run<T: Database>(store: ResponseStore<T>, pruning_interval: Duration) {
	info!(?pruning_interval, "Starting maintenance...");
	let mut pruning = interval(pruning_interval);
	pruning.set_missed_tick_behavior(MissedTickBehavior::Delay);
	// first tick completes immediately
	pruning.tick().await;

	loop {
		pruning.tick().await;
		debug!("Pruning...");
		match store.prune_expired().await {
			Ok(pruned) => debug!(pruned, "Pruning finished"),
			Err(error) => error!(event_type = "MAINTENANCE", "Pruning failed: {error:#}"),
		}
	}
}

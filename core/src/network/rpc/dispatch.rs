use std::collections::HashMap;
use tokio::sync::broadcast;
use tracing::{debug, trace, warn};

use crate::{
	data::{
		Database, InFlightKey, LatestNotificationsKey, PendingFingerprintKey, ResponseCacheKey,
		ResponseKey, SubscriptionIdsKey,
	},
	error::Error,
	request_id::UpstreamId,
	store::ResponseStore,
	types::{Frame, Notification, Topic},
};

/// Reserved request IDs of the standing subscriptions on the current connection
pub type SubscriptionIds = HashMap<String, Topic>;

/// Routes inbound upstream frames into the store or to the notification fanout
#[derive(Clone)]
pub struct Dispatcher<T: Database> {
	store: ResponseStore<T>,
	notifications: broadcast::Sender<Notification>,
}

impl<T: Database> Dispatcher<T> {
	pub fn new(store: ResponseStore<T>, notifications: broadcast::Sender<Notification>) -> Self {
		Dispatcher {
			store,
			notifications,
		}
	}

	pub async fn handle_frame(&self, text: &str, subscription_ids: &SubscriptionIds) {
		let frame = match Frame::try_from(text) {
			Ok(frame) => frame,
			Err(error) => {
				debug!(%error, "Dropping malformed upstream frame");
				return;
			},
		};
		if let Err(error) = self.dispatch(frame, subscription_ids).await {
			match error {
				Error::MalformedId(id) => debug!(%id, "Dropping upstream frame with unknown id"),
				error => warn!(%error, "Failed to dispatch upstream frame"),
			}
		}
	}

	async fn dispatch(&self, frame: Frame, subscription_ids: &SubscriptionIds) -> Result<(), Error> {
		let id = frame.id().cloned();

		if let Some(topic) = id
			.as_ref()
			.and_then(|id| id.as_str())
			.and_then(|id| subscription_ids.get(id))
		{
			let subscription_id = frame.result();
			debug!(%topic, %subscription_id, "Standing subscription acknowledged");
			return self
				.store
				.hash_put(SubscriptionIdsKey, topic.name(), subscription_id)
				.await;
		}

		if let Some(topic) = frame.method().and_then(Topic::from_notification_method) {
			if !frame.has_params() {
				trace!(%topic, "Dropping notification without params");
				return Ok(());
			}
			self.store
				.hash_put(LatestNotificationsKey, topic.name(), frame.clone())
				.await?;
			// No receivers means there are no connected clients
			let _ = self.notifications.send(Notification { topic, frame });
			return Ok(());
		}

		let Some(id) = id else {
			trace!(method = ?frame.method(), "Discarding upstream frame without id");
			return Ok(());
		};
		let Some(id) = id.as_str() else {
			return Err(Error::MalformedId(id.to_string()));
		};
		let upstream_id: UpstreamId = id.parse()?;

		trace!(%upstream_id, "Storing upstream response");
		self.store
			.put(ResponseKey(upstream_id.clone()), frame.clone())
			.await?;

		let pending = self
			.store
			.get(PendingFingerprintKey(upstream_id))
			.await?;
		if let Some(fingerprint) = pending {
			self.store
				.put(ResponseCacheKey(fingerprint.clone()), frame)
				.await?;
			self.store.delete(InFlightKey(fingerprint)).await?;
		}
		Ok(())
	}
}

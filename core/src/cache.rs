//! Answers client requests from the shared store, forwarding each distinct call upstream at most once.
//!
//! A call is identified by its [`Fingerprint`]. The first caller creates the in-flight marker with
//! an atomic set-if-absent and is the only one to send the request upstream, while concurrent
//! callers of the same call wait for the response cache to be populated by the upstream dispatcher.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{sync::Arc, time::Duration};
use tracing::{debug, trace, warn};

use crate::{
	data::{
		Database, InFlightKey, LatestNotificationsKey, PendingFingerprintKey, ResponseCacheKey, ResponseKey,
		SubscriptionIdsKey,
	},
	error::Error,
	network::Upstream,
	request_id::{self, SessionId, UpstreamId},
	store::ResponseStore,
	types::{duration_seconds_format, Fingerprint, Frame, Request, Topic},
};

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
#[serde(default)]
pub struct CacheConfig {
	/// Time to live of cached responses and in-flight markers, in seconds (default: 20).
	#[serde(with = "duration_seconds_format")]
	pub cache_ttl: Duration,
	/// Time in seconds a client request waits for the upstream response (default: 30).
	#[serde(with = "duration_seconds_format")]
	pub request_timeout: Duration,
	/// Interval in seconds between pruning of expired entries (default: 60).
	#[serde(with = "duration_seconds_format")]
	pub pruning_interval: Duration,
}

impl Default for CacheConfig {
	fn default() -> Self {
		Self {
			cache_ttl: Duration::from_secs(20),
			request_timeout: Duration::from_secs(30),
			pruning_interval: Duration::from_secs(60),
		}
	}
}

pub struct Cache<T: Database, U: Upstream> {
	store: ResponseStore<T>,
	upstream: Arc<U>,
	request_timeout: Duration,
}

impl<T: Database + Clone, U: Upstream> Clone for Cache<T, U> {
	fn clone(&self) -> Self {
		Self {
			store: self.store.clone(),
			upstream: self.upstream.clone(),
			request_timeout: self.request_timeout,
		}
	}
}

impl<T: Database, U: Upstream> Cache<T, U> {
	pub fn new(store: ResponseStore<T>, upstream: U, request_timeout: Duration) -> Self {
		Self {
			store,
			upstream: Arc::new(upstream),
			request_timeout,
		}
	}

	/// Last notification published on the topic
	pub async fn latest_notification(&self, topic: Topic) -> Result<Option<Frame>, Error> {
		self.store
			.hash_get(LatestNotificationsKey, topic.name())
			.await
	}

	/// Returns the response for the session's request, or `None` if there is nothing to reply.
	pub async fn handle(&self, session_id: &SessionId, request: Request) -> Result<Option<Frame>, Error> {
		if let Some(topic) = Topic::from_subscribe_method(&request.method) {
			let Some(client_id) = &request.id else {
				return Ok(None);
			};
			let subscription_id = self
				.store
				.hash_get(SubscriptionIdsKey, topic.name())
				.await?
				.unwrap_or(Value::Null);
			return Ok(Some(Frame::response(client_id, subscription_id)));
		}

		let Some(client_id) = request.id.clone() else {
			trace!(method = %request.method, "Forwarding notification");
			let frame = serde_json::to_string(&request)
				.map_err(|error| Error::MalformedRequest(error.to_string()))?;
			self.upstream.send(frame)?;
			return Ok(None);
		};

		let upstream_id = request_id::encode(session_id, &client_id);
		if let Some(frame) = self.store.get(ResponseKey(upstream_id.clone())).await? {
			trace!(%upstream_id, "Request already answered");
			return Ok(Some(frame.with_id(&client_id)));
		}

		let fingerprint = request.fingerprint()?;
		if let Some(frame) = self.store.get(ResponseCacheKey(fingerprint.clone())).await? {
			debug!(%upstream_id, method = %request.method, "Response cache hit");
			return Ok(Some(frame.with_id(&client_id)));
		}

		let is_leader = self
			.store
			.put_if_absent(InFlightKey(fingerprint.clone()), upstream_id.clone())
			.await?;
		let frame = if is_leader {
			self.forward(&request, upstream_id, fingerprint).await?
		} else {
			debug!(%upstream_id, method = %request.method, "Waiting for in-flight duplicate");
			self.store
				.wait_for(ResponseCacheKey(fingerprint), self.request_timeout)
				.await?
		};
		Ok(Some(frame.with_id(&client_id)))
	}

	async fn forward(
		&self,
		request: &Request,
		upstream_id: UpstreamId,
		fingerprint: Fingerprint,
	) -> Result<Frame, Error> {
		// response of the previous in-flight request may have landed after the lookup
		if let Some(frame) = self.store.get(ResponseCacheKey(fingerprint.clone())).await? {
			self.release(&fingerprint, &upstream_id).await?;
			return Ok(frame);
		}

		self.store
			.put(PendingFingerprintKey(upstream_id.clone()), fingerprint.clone())
			.await?;
		trace!(%upstream_id, method = %request.method, "Forwarding request upstream");
		let sent = request
			.to_upstream(upstream_id.as_str())
			.and_then(|frame| self.upstream.send(frame));
		let response = match sent {
			Ok(()) => {
				self.store
					.wait_for(ResponseKey(upstream_id.clone()), self.request_timeout)
					.await
			},
			Err(error) => Err(error),
		};

		if let Err(error) = &response {
			warn!(%upstream_id, %error, "Forwarded request failed");
			if let Err(error) = self.release(&fingerprint, &upstream_id).await {
				warn!(%upstream_id, %error, "Failed to release in-flight marker");
			}
		}
		response
	}

	/// Removes the in-flight marker if it is still owned by the given request
	async fn release(&self, fingerprint: &Fingerprint, upstream_id: &UpstreamId) -> Result<(), Error> {
		let owner = self.store.get(InFlightKey(fingerprint.clone())).await?;
		if owner.as_ref() == Some(upstream_id) {
			self.store.delete(InFlightKey(fingerprint.clone())).await?;
		}
		Ok(())
	}
}

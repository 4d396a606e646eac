use color_eyre::{eyre::WrapErr, Result};
use std::{
	collections::{HashMap, HashSet},
	future::Future,
	sync::Arc,
};
use tokio::sync::{mpsc::UnboundedSender, RwLock};
use warp::ws;

use crate::{
	request_id::SessionId,
	types::{Frame, Topic},
};

pub type Sender = UnboundedSender<Result<ws::Message, warp::Error>>;

/// Serializes the frame and queues it for the client connection
pub fn send(sender: &Sender, frame: &Frame) -> Result<()> {
	let message = frame
		.to_text()
		.map(ws::Message::text)
		.wrap_err("Failed to serialize message")?;
	sender.send(Ok(message)).wrap_err("Failed to send message")
}

pub struct WsClient {
	pub topics: HashSet<Topic>,
	pub sender: Sender,
}

impl WsClient {
	fn is_subscribed(&self, topic: &Topic) -> bool {
		self.topics.contains(topic)
	}
}

/// Registry of connected client sessions and their topic memberships
#[derive(Clone)]
pub struct WsClients(pub Arc<RwLock<HashMap<SessionId, WsClient>>>);

impl WsClients {
	/// Registers a new session, subscribed to all topics
	pub async fn open(&self, sender: Sender) -> SessionId {
		let mut clients = self.0.write().await;
		let session_id = loop {
			let session_id = SessionId::generate();
			if !clients.contains_key(&session_id) {
				break session_id;
			}
		};
		let client = WsClient {
			topics: Topic::ALL.into_iter().collect(),
			sender,
		};
		clients.insert(session_id.clone(), client);
		session_id
	}

	/// Releases the session, returns `false` if it was not registered
	pub async fn close(&self, session_id: &SessionId) -> bool {
		self.0.write().await.remove(session_id).is_some()
	}

	pub async fn topics_of(&self, session_id: &SessionId) -> Option<HashSet<Topic>> {
		let clients = self.0.read().await;
		clients.get(session_id).map(|client| client.topics.clone())
	}

	/// Adds the topic to the session's memberships, returns `false` if nothing changed.
	///
	/// A session that wasn't subscribed yet is first sent the frame resolved by `replay`,
	/// ahead of any notification published to the topic afterwards.
	pub async fn subscribe<F>(&self, session_id: &SessionId, topic: Topic, replay: F) -> Result<bool>
	where
		F: Future<Output = Option<Frame>>,
	{
		let mut clients = self.0.write().await;
		let Some(client) = clients.get_mut(session_id) else {
			return Ok(false);
		};
		if client.is_subscribed(&topic) {
			return Ok(false);
		}
		if let Some(frame) = replay.await {
			send(&client.sender, &frame)?;
		}
		client.topics.insert(topic);
		Ok(true)
	}

	pub async fn unsubscribe(&self, session_id: &SessionId, topic: Topic) -> bool {
		let mut clients = self.0.write().await;
		let Some(client) = clients.get_mut(session_id) else {
			return false;
		};
		client.topics.remove(&topic);
		true
	}

	/// Sends the frame to every session subscribed to the topic.
	/// Failed sends are returned and don't affect delivery to other sessions.
	pub async fn publish(&self, topic: &Topic, frame: &Frame) -> Result<Vec<Result<()>>> {
		let message = frame
			.to_text()
			.map(ws::Message::text)
			.wrap_err("Cannot serialize publish message")?;
		let clients = self.0.read().await;
		Ok(clients
			.values()
			.filter(|client| client.is_subscribed(topic))
			.map(|client| {
				client
					.sender
					.send(Ok(message.clone()))
					.wrap_err("Send failed")
			})
			.collect::<Vec<_>>())
	}
}

impl Default for WsClients {
	fn default() -> Self {
		Self(Arc::new(RwLock::new(HashMap::new())))
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::types::JUSTIFICATION_NOTIFICATION;
	use serde_json::json;
	use std::time::Duration;
	use tokio::sync::{mpsc, oneshot};

	fn justification(round: u64) -> Frame {
		let text = json!({
			"jsonrpc": "2.0",
			"method": JUSTIFICATION_NOTIFICATION,
			"params": { "subscription": "0x1", "result": round },
		})
		.to_string();
		Frame::try_from(text.as_str()).unwrap()
	}

	#[tokio::test]
	async fn sessions_lifecycle() {
		let clients = WsClients::default();
		let (sender, _receiver) = mpsc::unbounded_channel();
		let session_id = clients.open(sender).await;

		let all_topics = Topic::ALL.into_iter().collect::<HashSet<_>>();
		assert_eq!(clients.topics_of(&session_id).await, Some(all_topics));

		assert!(clients.unsubscribe(&session_id, Topic::FinalizedHeadStream).await);
		assert_eq!(
			clients.topics_of(&session_id).await,
			Some(HashSet::from([Topic::JustificationStream]))
		);
		assert!(clients
			.subscribe(&session_id, Topic::FinalizedHeadStream, async { None })
			.await
			.unwrap());
		assert!(!clients
			.subscribe(&session_id, Topic::FinalizedHeadStream, async { None })
			.await
			.unwrap());

		assert!(clients.close(&session_id).await);
		assert!(!clients.close(&session_id).await);
		assert_eq!(clients.topics_of(&session_id).await, None);
		assert!(!clients
			.subscribe(&session_id, Topic::FinalizedHeadStream, async { None })
			.await
			.unwrap());
	}

	#[tokio::test]
	async fn clients_publish() {
		let clients = WsClients::default();
		let (sender_1, mut receiver_1) = mpsc::unbounded_channel();
		let (sender_2, mut receiver_2) = mpsc::unbounded_channel();
		let (sender_3, receiver_3) = mpsc::unbounded_channel();
		let _session_1 = clients.open(sender_1).await;
		let session_2 = clients.open(sender_2).await;
		let _session_3 = clients.open(sender_3).await;
		clients
			.unsubscribe(&session_2, Topic::JustificationStream)
			.await;
		drop(receiver_3);

		let results = clients
			.publish(&Topic::JustificationStream, &justification(1))
			.await
			.unwrap();
		assert_eq!(results.iter().filter(|result| result.is_ok()).count(), 1);
		assert_eq!(results.iter().filter(|result| result.is_err()).count(), 1);

		tokio::select! {
			Some(message) = receiver_1.recv() => {
				let frame = Frame::try_from(message.unwrap().to_str().unwrap()).unwrap();
				assert_eq!(frame, justification(1));
				assert_eq!(frame.id(), None);
			},
			_ = tokio::time::sleep(Duration::from_millis(100)) => panic!("Message isn't received"),
		};
		assert!(receiver_2.try_recv().is_err());
	}

	#[tokio::test]
	async fn delivery_order_is_preserved() {
		let clients = WsClients::default();
		let (sender, mut receiver) = mpsc::unbounded_channel();
		clients.open(sender).await;

		for round in 1..=5 {
			clients
				.publish(&Topic::JustificationStream, &justification(round))
				.await
				.unwrap();
		}
		for round in 1..=5 {
			let message = receiver.recv().await.unwrap().unwrap();
			let frame = Frame::try_from(message.to_str().unwrap()).unwrap();
			assert_eq!(frame.0["params"]["result"], json!(round));
		}
	}

	#[tokio::test]
	async fn replay_is_delivered_before_published_notifications() {
		let clients = WsClients::default();
		let (sender, mut receiver) = mpsc::unbounded_channel();
		let session_id = clients.open(sender).await;
		clients
			.unsubscribe(&session_id, Topic::JustificationStream)
			.await;

		let (started_sender, started) = oneshot::channel();
		let (release, released) = oneshot::channel::<()>();
		let subscribing = tokio::spawn({
			let clients = clients.clone();
			async move {
				let replay = async move {
					started_sender.send(()).unwrap();
					released.await.unwrap();
					Some(justification(1))
				};
				clients
					.subscribe(&session_id, Topic::JustificationStream, replay)
					.await
					.unwrap()
			}
		});
		started.await.unwrap();

		let publishing = tokio::spawn({
			let clients = clients.clone();
			async move {
				clients
					.publish(&Topic::JustificationStream, &justification(2))
					.await
					.unwrap()
			}
		});
		tokio::time::sleep(Duration::from_millis(50)).await;
		assert!(receiver.try_recv().is_err());

		release.send(()).unwrap();
		assert!(subscribing.await.unwrap());
		assert_eq!(publishing.await.unwrap().len(), 1);
		for round in 1..=2 {
			let message = receiver.recv().await.unwrap().unwrap();
			let frame = Frame::try_from(message.to_str().unwrap()).unwrap();
			assert_eq!(frame.0["params"]["result"], json!(round));
		}
	}

	#[tokio::test]
	async fn subscribed_session_is_not_replayed() {
		let clients = WsClients::default();
		let (sender, mut receiver) = mpsc::unbounded_channel();
		let session_id = clients.open(sender).await;

		let subscribed = clients
			.subscribe(&session_id, Topic::JustificationStream, async {
				Some(justification(1))
			})
			.await
			.unwrap();
		assert!(!subscribed);
		assert!(receiver.try_recv().is_err());
	}
}

use futures::{SinkExt, StreamExt};
use serde_json::Value;
use std::time::Duration;
use tokio::{
	sync::mpsc,
	task::JoinSet,
	time::{sleep, Instant},
};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, error, info, warn, Instrument};
use warp::ws::WebSocket;

use crate::{
	api::types::{send, Sender, WsClients},
	cache::Cache,
	data::Database,
	network::Upstream,
	request_id::SessionId,
	types::{Frame, Request, Topic},
};

/// Serves one client connection until it is closed or stays idle for the idle timeout.
///
/// Both inbound requests and outbound deliveries count as activity, so a session that only
/// listens to notifications is kept open. Pending requests are aborted when the connection closes.
pub async fn connect<T, U>(
	web_socket: WebSocket,
	clients: WsClients,
	cache: Cache<T, U>,
	idle_timeout: Duration,
) where
	T: Database + Clone + Send + Sync + 'static,
	U: Upstream + Send + Sync + 'static,
{
	let (mut web_socket_sender, mut web_socket_receiver) = web_socket.split();
	let (sender, receiver) = mpsc::unbounded_channel();
	let mut outbound = UnboundedReceiverStream::new(receiver);

	let session_id = clients.open(sender.clone()).await;
	info!(%session_id, event_type = "WS_CONNECT", "Client connected");

	let mut requests = JoinSet::new();
	let idle = sleep(idle_timeout);
	tokio::pin!(idle);

	loop {
		tokio::select! {
			Some(_) = requests.join_next() => {},
			_ = &mut idle => {
				info!(%session_id, event_type = "WS_CONNECT", "Closing idle client connection");
				break;
			},
			Some(message) = outbound.next() => {
				idle.as_mut().reset(Instant::now() + idle_timeout);
				let sent = match message {
					Ok(message) => web_socket_sender.send(message).await,
					Err(error) => Err(error),
				};
				if let Err(error) = sent {
					error!(%session_id, %error, event_type = "WS_CONNECT", "Error sending web socket message");
					break;
				}
			},
			result = web_socket_receiver.next() => {
				idle.as_mut().reset(Instant::now() + idle_timeout);
				let message = match result {
					None => break,
					Some(Err(error)) => {
						error!(%error, event_type = "WS_CONNECT", "Error receiving client message");
						break;
					},
					Some(Ok(message)) if message.is_close() => break,
					Some(Ok(message)) => message,
				};
				let Ok(text) = message.to_str() else {
					continue;
				};
				let request = match Request::try_from(text) {
					Ok(request) => request,
					Err(error) => {
						debug!(%session_id, %error, "Dropping client message");
						continue;
					},
				};
				let handler = handle_request(
					session_id.clone(),
					request,
					clients.clone(),
					cache.clone(),
					sender.clone(),
				);
				requests.spawn(handler.in_current_span());
			},
		}
	}

	clients.close(&session_id).await;
	requests.shutdown().await;
	if let Err(error) = web_socket_sender.close().await {
		debug!(%session_id, %error, "Error closing web socket");
	}
	info!(%session_id, event_type = "WS_CONNECT", "Client disconnected");
}

async fn handle_request<T, U>(
	session_id: SessionId,
	request: Request,
	clients: WsClients,
	cache: Cache<T, U>,
	sender: Sender,
) where
	T: Database + Clone,
	U: Upstream,
{
	if let Some(topic) = Topic::from_unsubscribe_method(&request.method) {
		clients.unsubscribe(&session_id, topic).await;
		if let Some(client_id) = &request.id {
			reply(&sender, &Frame::response(client_id, Value::Bool(true)));
		}
		return;
	}

	let subscribed = Topic::from_subscribe_method(&request.method);
	let client_id = request.id.clone();

	match (cache.handle(&session_id, request).await, client_id) {
		(Ok(Some(frame)), _) => reply(&sender, &frame),
		(Ok(None), _) => {},
		(Err(error), Some(client_id)) => {
			warn!(%session_id, %client_id, %error, "Failed to handle request");
			reply(&sender, &Frame::error(&client_id, &error));
		},
		(Err(error), None) => warn!(%session_id, %error, "Failed to forward notification"),
	}

	let Some(topic) = subscribed else {
		return;
	};
	// last notification is replayed so the session doesn't wait for the next one
	let replay = async {
		match cache.latest_notification(topic).await {
			Ok(frame) => frame,
			Err(error) => {
				warn!(%session_id, %topic, %error, "Failed to load latest notification");
				None
			},
		}
	};
	if let Err(error) = clients.subscribe(&session_id, topic, replay).await {
		warn!(%session_id, %topic, "Failed to subscribe: {error:#}");
	}
}

fn reply(sender: &Sender, frame: &Frame) {
	if let Err(error) = send(sender, frame) {
		warn!("Error sending message: {error:#}");
	}
}

use color_eyre::Result;
use futures::{Sink, SinkExt, StreamExt};
use std::time::Duration;
use tokio::{
	net::TcpStream,
	sync::{broadcast, mpsc, watch},
	time::{sleep, Instant},
};
use tokio_tungstenite::{
	connect_async,
	tungstenite::{self, Message},
	MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use super::{
	configuration::RetryConfig, ConnectionState, Dispatcher, Node, Nodes, OutputEvent,
	SubscriptionIds,
};
use crate::{
	data::Database,
	types::{Request, Topic},
};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connection open for at least this long resets the reconnect backoff
const STABLE_CONNECTION: Duration = Duration::from_secs(30);

/// Single owner of the upstream websocket.
///
/// Frames queued by [`super::Client`] handles are written to the socket while the
/// connection is open, inbound frames are handed to the [`Dispatcher`].
pub struct EventLoop<T: Database> {
	nodes: Nodes,
	retry: RetryConfig,
	receiver: mpsc::Receiver<String>,
	state: watch::Sender<ConnectionState>,
	dispatcher: Dispatcher<T>,
	event_sender: broadcast::Sender<OutputEvent>,
}

impl<T: Database + Clone> EventLoop<T> {
	pub fn new(
		nodes: Nodes,
		retry: RetryConfig,
		receiver: mpsc::Receiver<String>,
		state: watch::Sender<ConnectionState>,
		dispatcher: Dispatcher<T>,
		event_sender: broadcast::Sender<OutputEvent>,
	) -> Self {
		Self {
			nodes,
			retry,
			receiver,
			state,
			dispatcher,
			event_sender,
		}
	}

	/// Keeps the upstream connection alive, reconnecting whenever it is closed.
	/// Runs until dropped.
	///
	/// Reconnects are delayed by the configured backoff, which is reset only after
	/// a connection stayed open for [`STABLE_CONNECTION`].
	pub async fn run(mut self) {
		let mut backoff = self.retry.backoff();
		let mut current_host: Option<String> = None;
		loop {
			let (stream, host) = self.connect(current_host.as_deref(), &mut backoff).await;
			info!(%host, "Connected to upstream node");
			let _ = self.event_sender.send(OutputEvent::Connected(host.clone()));

			let opened_at = Instant::now();
			match self.run_connection(stream).await {
				Ok(()) => info!(%host, "Upstream connection closed"),
				Err(error) => warn!(%host, "Upstream connection failed: {error:#}"),
			}

			self.state.send_replace(ConnectionState::Closed);
			let dropped = self.drain();
			if dropped > 0 {
				warn!(dropped, "Dropped frames queued for closed upstream connection");
			}
			let _ = self
				.event_sender
				.send(OutputEvent::Disconnected(host.clone()));
			current_host = Some(host);

			if opened_at.elapsed() >= STABLE_CONNECTION {
				backoff = self.retry.backoff();
			} else {
				self.delay(&mut backoff).await;
			}
		}
	}

	async fn connect(
		&self,
		current_host: Option<&str>,
		backoff: &mut impl Iterator<Item = Duration>,
	) -> (WsStream, String) {
		self.state.send_replace(ConnectionState::Connecting);
		loop {
			for Node { host } in self.nodes.candidates(current_host) {
				debug!(%host, "Connecting to upstream node");
				match connect_async(host.as_str()).await {
					Ok((stream, _)) => return (stream, host),
					Err(error) => warn!(%host, "Connection to upstream node failed: {error}"),
				}
			}
			self.delay(backoff).await;
		}
	}

	async fn delay(&self, backoff: &mut impl Iterator<Item = Duration>) {
		let delay = backoff.next().unwrap_or_else(|| self.retry.max_delay());
		info!("Reconnecting to upstream in {delay:?}");
		sleep(delay).await;
	}

	async fn run_connection(&mut self, stream: WsStream) -> Result<()> {
		let (mut sink, mut stream) = stream.split();
		let subscription_ids = subscribe(&mut sink).await?;
		self.state.send_replace(ConnectionState::Open);

		loop {
			tokio::select! {
				Some(frame) = self.receiver.recv() => {
					trace!("Sending frame upstream");
					sink.send(Message::Text(frame)).await?;
				},
				message = stream.next() => match message {
					Some(Ok(Message::Text(text))) => {
						self.dispatcher.handle_frame(text.as_str(), &subscription_ids).await;
					},
					Some(Ok(Message::Binary(data))) => match std::str::from_utf8(&data) {
						Ok(text) => self.dispatcher.handle_frame(text, &subscription_ids).await,
						Err(error) => debug!(%error, "Dropping non UTF-8 upstream frame"),
					},
					Some(Ok(Message::Close(frame))) => {
						debug!(?frame, "Upstream node closed the connection");
						return Ok(());
					},
					Some(Ok(_)) => {},
					Some(Err(error)) => return Err(error.into()),
					None => return Ok(()),
				},
			}
		}
	}

	/// Discards frames queued for the closed connection, their waiters time out
	fn drain(&mut self) -> usize {
		let mut dropped = 0;
		while self.receiver.try_recv().is_ok() {
			dropped += 1;
		}
		dropped
	}
}

/// Requests the standing subscriptions, tagged with fresh reserved IDs
async fn subscribe<S>(sink: &mut S) -> Result<SubscriptionIds>
where
	S: Sink<Message, Error = tungstenite::Error> + Unpin,
{
	let mut subscription_ids = SubscriptionIds::new();
	for topic in Topic::ALL {
		let id = format!("sub-{topic}-{}", Uuid::new_v4().simple());
		let request = Request::new(None, topic.subscribe_method(), None).to_upstream(&id)?;
		sink.send(Message::Text(request)).await?;
		debug!(%topic, %id, "Standing subscription requested");
		subscription_ids.insert(id, topic);
	}
	Ok(subscription_ids)
}

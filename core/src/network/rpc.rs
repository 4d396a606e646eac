use rand::{seq::SliceRandom, thread_rng};
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use tokio::sync::{broadcast, mpsc, watch};

mod client;
pub mod configuration;
mod dispatch;
mod event_loop;

use crate::{data::Database, store::ResponseStore, types::Notification};
pub use client::Client;
use configuration::RPCConfig;
pub use dispatch::{Dispatcher, SubscriptionIds};
pub use event_loop::EventLoop;

/// State of the shared upstream connection
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
	Connecting,
	Open,
	Closed,
}

#[derive(Clone, Debug, PartialEq)]
pub enum OutputEvent {
	Connected(String),
	Disconnected(String),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Node {
	pub host: String,
}

impl Display for Node {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}", self.host)
	}
}

#[derive(Clone)]
pub struct Nodes {
	list: Vec<Node>,
}

impl Nodes {
	pub fn new(nodes: &[String]) -> Self {
		Self {
			list: nodes
				.iter()
				.map(|host| Node {
					host: host.to_string(),
				})
				.collect(),
		}
	}

	/// Shuffles the list of available Nodes, partitioning out the host of the dropped connection.
	///
	/// The first list holds the shuffled Nodes other than the current host, the second one the current host.
	/// The purpose of this partitioning is to prevent accidentally reconnecting to the same host in case of errors.
	fn shuffle(&self, current_host: &str) -> (Vec<Node>, Vec<Node>) {
		let nodes = self.list.clone();

		if nodes.len() <= 1 {
			return (nodes, vec![]);
		}

		let (mut first, second): (Vec<_>, Vec<_>) = nodes
			.into_iter()
			.partition(|Node { host }| host != current_host);
		first.shuffle(&mut thread_rng());
		(first, second)
	}

	/// Candidates for the next connection attempt: configured order on the first connection,
	/// other hosts first when reconnecting.
	pub fn candidates(&self, current_host: Option<&str>) -> Vec<Node> {
		match current_host {
			None => self.list.clone(),
			Some(current_host) => {
				let (first, second) = self.shuffle(current_host);
				first.into_iter().chain(second).collect()
			},
		}
	}
}

/// Creates the upstream client handle and the event loop owning the connection
pub fn init<T: Database + Clone>(
	store: ResponseStore<T>,
	rpc: &RPCConfig,
	notifications: broadcast::Sender<Notification>,
	event_sender: broadcast::Sender<OutputEvent>,
) -> (Client, EventLoop<T>) {
	let (sender, receiver) = mpsc::channel(rpc.send_queue_size);
	let (state_sender, state_receiver) = watch::channel(ConnectionState::Connecting);
	let event_loop = EventLoop::new(
		Nodes::new(&rpc.full_node_ws),
		rpc.retry.clone(),
		receiver,
		state_sender,
		Dispatcher::new(store, notifications),
		event_sender,
	);
	(Client::new(sender, state_receiver), event_loop)
}

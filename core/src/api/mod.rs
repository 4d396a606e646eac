use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, error, info, warn};

use crate::{api::types::WsClients, types::Notification};

pub mod configuration;
mod routes;
pub mod server;
pub mod types;
mod ws;

/// Fans out upstream notifications to the sessions subscribed to their topic
pub async fn publish(mut receiver: broadcast::Receiver<Notification>, clients: WsClients) {
	loop {
		let Notification { topic, frame } = match receiver.recv().await {
			Ok(notification) => notification,
			Err(RecvError::Lagged(skipped)) => {
				warn!(skipped, "Publisher is lagging behind, notifications skipped");
				continue;
			},
			Err(RecvError::Closed) => {
				info!("Receiver is closed, stopping publisher...");
				return;
			},
		};

		match clients.publish(&topic, &frame).await {
			Ok(results) => {
				let published = results.iter().filter(|&result| result.is_ok()).count();
				let failed = results.iter().filter(|&result| result.is_err()).count();
				debug!(%topic, published, failed, "Notification published to clients");
				for error in results.into_iter().filter_map(Result::err) {
					debug!(%topic, "Cannot publish notification to client: {error}")
				}
			},
			Err(error) => error!(%topic, "Cannot publish notification: {error:#}"),
		}
	}
}

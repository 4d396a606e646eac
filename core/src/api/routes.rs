use std::{convert::Infallible, time::Duration};
use warp::{Filter, Rejection, Reply};

use crate::{api::types::WsClients, cache::Cache, data::Database, network::Upstream};

use super::ws;

fn with_ws_clients(
	clients: WsClients,
) -> impl Filter<Extract = (WsClients,), Error = Infallible> + Clone {
	warp::any().map(move || clients.clone())
}

pub fn health_route() -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
	warp::head()
		.or(warp::get())
		.and(warp::path("health"))
		.map(|_| warp::reply::with_status("", warp::http::StatusCode::OK))
}

/// Upgrades connections on any path to the gateway websocket
pub fn ws_route<T, U>(
	clients: WsClients,
	cache: Cache<T, U>,
	idle_timeout: Duration,
	max_payload_size: usize,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone
where
	T: Database + Clone + Send + Sync + 'static,
	U: Upstream + Send + Sync + 'static,
{
	warp::ws()
		.and(with_ws_clients(clients))
		.and(warp::any().map(move || cache.clone()))
		.map(move |ws: warp::ws::Ws, clients, cache| {
			ws.max_message_size(max_payload_size)
				.on_upgrade(move |web_socket| ws::connect(web_socket, clients, cache, idle_timeout))
		})
}

//! Websocket server for gateway clients.
//!
//! # Endpoints
//!
//! * `/health` - returns `200 OK` while the server is running
//! * any other path - JSON-RPC 2.0 over websocket, multiplexed onto the upstream node connection

use color_eyre::{eyre::WrapErr, Result};
use futures::{Future, FutureExt};
use tracing::info;
use warp::Filter;

use super::{
	configuration::APIConfig,
	routes::{health_route, ws_route},
	types::WsClients,
};
use crate::{cache::Cache, data::Database, network::Upstream, shutdown::Controller};

pub struct Server<T: Database, U: Upstream> {
	pub cache: Cache<T, U>,
	pub ws_clients: WsClients,
	pub shutdown: Controller<String>,
}

impl<T, U> Server<T, U>
where
	T: Database + Clone + Send + Sync + 'static,
	U: Upstream + Send + Sync + 'static,
{
	/// Creates a websocket server that needs to be spawned into a runtime
	pub fn bind(self, cfg: APIConfig) -> Result<impl Future<Output = ()>> {
		let routes = ws_route(
			self.ws_clients,
			self.cache,
			cfg.idle_timeout,
			cfg.max_payload_size,
		)
		.or(health_route());

		let addr = cfg
			.socket_addr()
			.wrap_err("Unable to parse host address from config")?;
		info!("Gateway running on ws://{addr}");
		// warp graceful shutdown expects a signal that is [`Future<Output = ()>`]
		let shutdown_signal = self.shutdown.triggered_shutdown().map(|_| ());
		let (_, server) = warp::serve(routes)
			.try_bind_with_graceful_shutdown(addr, shutdown_signal)
			.wrap_err("Unable to bind websocket server")?;

		Ok(server)
	}
}

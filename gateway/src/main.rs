#![doc = include_str!("../README.md")]

use crate::cli::CliOpts;
use clap::Parser;
use color_eyre::{
	eyre::{eyre, WrapErr},
	Result,
};
#[cfg(not(feature = "rocksdb"))]
use hyperws_core::data::MemoryDB;
#[cfg(feature = "rocksdb")]
use hyperws_core::data::RocksDB;
use hyperws_core::{
	api::{self, server::Server, types::WsClients},
	cache::Cache,
	data::Database,
	maintenance,
	network::rpc::{self, OutputEvent},
	shutdown::Controller,
	store::ResponseStore,
	types::Notification,
	utils::{default_subscriber, install_panic_hooks, json_subscriber, spawn_in_span},
};
use std::{fs, path::Path};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{error, info, warn};

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

mod cli;
mod config;

use config::{load_runtime_config, RuntimeConfig};

/// Starts the gateway tasks, they run until shutdown is triggered
async fn run(
	cfg: RuntimeConfig,
	db: impl Database + Clone + Send + Sync + 'static,
	shutdown: Controller<String>,
) -> Result<()> {
	let version = clap::crate_version!();
	info!("Running hyperws version: {version}");

	let store = ResponseStore::new(db, cfg.cache.cache_ttl);

	let (notification_sender, notification_receiver) = broadcast::channel::<Notification>(1 << 7);
	let (rpc_event_sender, rpc_event_receiver) = broadcast::channel::<OutputEvent>(1 << 4);

	let (rpc_client, rpc_event_loop) = rpc::init(
		store.clone(),
		&cfg.rpc,
		notification_sender,
		rpc_event_sender,
	);

	// upstream connection is kept alive until shutdown, reconnecting as needed
	spawn_in_span(shutdown.with_cancel(rpc_event_loop.run()));
	spawn_in_span(shutdown.with_cancel(log_rpc_events(rpc_event_receiver)));

	let ws_clients = WsClients::default();
	let server = Server {
		cache: Cache::new(store.clone(), rpc_client, cfg.cache.request_timeout),
		ws_clients: ws_clients.clone(),
		shutdown: shutdown.clone(),
	};
	spawn_in_span(shutdown.with_cancel(server.bind(cfg.api.clone())?));

	spawn_in_span(shutdown.with_cancel(api::publish(notification_receiver, ws_clients)));
	spawn_in_span(shutdown.with_cancel(maintenance::run(store, cfg.cache.pruning_interval)));

	Ok(())
}

async fn log_rpc_events(mut receiver: broadcast::Receiver<OutputEvent>) {
	loop {
		match receiver.recv().await {
			Ok(OutputEvent::Connected(host)) => info!(%host, "Connected to upstream node"),
			Ok(OutputEvent::Disconnected(host)) => warn!(%host, "Disconnected from upstream node"),
			Err(RecvError::Lagged(skipped)) => warn!(skipped, "Upstream events skipped"),
			Err(RecvError::Closed) => return,
		}
	}
}

#[tokio::main]
pub async fn main() -> Result<()> {
	let shutdown = Controller::new();
	let opts = CliOpts::parse();
	let cfg = load_runtime_config(&opts)?;

	if cfg.log_format_json {
		tracing::subscriber::set_global_default(json_subscriber(cfg.log_level))?;
	} else {
		tracing::subscriber::set_global_default(default_subscriber(cfg.log_level))?;
	};

	install_panic_hooks(shutdown.clone())?;

	if opts.clean && Path::new(&cfg.db_path).exists() {
		info!("Cleaning up local state directory");
		fs::remove_dir_all(&cfg.db_path).wrap_err("Failed to remove local state directory")?;
	}

	#[cfg(feature = "rocksdb")]
	let db = RocksDB::open(&cfg.db_path).wrap_err("Gateway could not initialize database")?;

	#[cfg(not(feature = "rocksdb"))]
	let db = MemoryDB::default();

	spawn_in_span(
		shutdown
			.clone()
			.on_user_signal("User signaled shutdown".to_string()),
	);

	if let Err(error) = run(cfg, db, shutdown.clone()).await {
		error!("{error:#}");
		return Err(error.wrap_err("Starting gateway failed"));
	};

	let reason = shutdown.completed_shutdown().await;

	// terminating condition is logged by whoever triggered the shutdown
	Err(eyre!(reason).wrap_err("Running gateway encountered an error"))
}

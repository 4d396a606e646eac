use color_eyre::{
	eyre::{eyre, WrapErr},
	Result,
};
use hyperws_core::{
	api::configuration::APIConfig, cache::CacheConfig, network::rpc::configuration::RPCConfig,
	types::tracing_level_format,
};
use serde::{Deserialize, Serialize};
use std::fs;
use tracing::Level;

use crate::cli::CliOpts;

/// Representation of a configuration used by this project.
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(default)]
pub struct RuntimeConfig {
	#[serde(flatten)]
	pub api: APIConfig,
	#[serde(flatten)]
	pub rpc: RPCConfig,
	#[serde(flatten)]
	pub cache: CacheConfig,
	/// File system path where RocksDB used by the gateway stores its data.
	pub db_path: String,
	/// Log level, default is `INFO`. See `<https://docs.rs/log/0.4.14/log/enum.LevelFilter.html>` for possible log level values. (default: `INFO`).
	#[serde(with = "tracing_level_format")]
	pub log_level: Level,
	/// If set to true, logs are displayed in JSON format, which is used for structured logging. Otherwise, plain text format is used (default: false).
	pub log_format_json: bool,
}

impl Default for RuntimeConfig {
	fn default() -> Self {
		RuntimeConfig {
			api: Default::default(),
			rpc: Default::default(),
			cache: Default::default(),
			db_path: "hyperws_db".to_owned(),
			log_level: Level::INFO,
			log_format_json: false,
		}
	}
}

pub fn load_runtime_config(opts: &CliOpts) -> Result<RuntimeConfig> {
	let cfg = if let Some(config_path) = &opts.config {
		fs::metadata(config_path).map_err(|_| eyre!("Provided config file doesn't exist."))?;
		confy::load_path(config_path)
			.wrap_err(format!("Failed to load configuration from {}", config_path))?
	} else {
		RuntimeConfig::default()
	};

	apply_overrides(cfg, opts)
}

fn apply_overrides(mut cfg: RuntimeConfig, opts: &CliOpts) -> Result<RuntimeConfig> {
	cfg.log_format_json = opts.logs_json || cfg.log_format_json;
	cfg.log_level = opts.verbosity.unwrap_or(cfg.log_level);

	// Flags override the config parameters
	if let Some(port) = opts.port {
		cfg.api.ws_server_port = port;
	}
	if let Some(host) = &opts.host {
		cfg.api.ws_server_host = host.to_string();
	}
	if !opts.upstreams.is_empty() {
		cfg.rpc.full_node_ws = opts.upstreams.clone();
	}
	if let Some(db_path) = &opts.db_path {
		cfg.db_path = db_path.to_string();
	}

	cfg.api.socket_addr()?;
	if cfg.rpc.full_node_ws.is_empty() {
		return Err(eyre!("At least one upstream node endpoint must be configured"));
	}
	if cfg.cache.cache_ttl.is_zero() {
		return Err(eyre!("Cache TTL must be greater than zero"));
	}
	if cfg.cache.pruning_interval.is_zero() {
		return Err(eyre!("Pruning interval must be greater than zero"));
	}
	if cfg.rpc.send_queue_size == 0 {
		return Err(eyre!("Send queue size must be greater than zero"));
	}

	Ok(cfg)
}

#[cfg(test)]
mod tests {
	use super::*;
	use clap::Parser;
	use hyperws_core::network::rpc::configuration::{FALLBACK_WS_ENDPOINT, PRIMARY_WS_ENDPOINT};
	use std::time::Duration;
	use test_case::test_case;

	fn load(args: &[&str]) -> Result<RuntimeConfig> {
		let opts = CliOpts::try_parse_from(std::iter::once("hyperws").chain(args.iter().copied()))?;
		apply_overrides(RuntimeConfig::default(), &opts)
	}

	#[test]
	fn defaults() {
		let cfg = load(&[]).unwrap();
		assert_eq!(cfg.api.ws_server_host, "127.0.0.1");
		assert_eq!(cfg.api.ws_server_port, 3000);
		assert_eq!(cfg.api.max_payload_size, 1024 * 1024);
		assert_eq!(cfg.cache.cache_ttl.as_secs(), 20);
		assert_eq!(cfg.rpc.full_node_ws, [PRIMARY_WS_ENDPOINT, FALLBACK_WS_ENDPOINT]);
		assert_eq!(cfg.log_level, Level::INFO);
		assert!(!cfg.log_format_json);
	}

	#[test_case(&["--port", "4000"], "127.0.0.1", 4000 ; "Port")]
	#[test_case(&["--host", "0.0.0.0"], "0.0.0.0", 3000 ; "Host")]
	#[test_case(&["-p", "4001", "--host", "::1"], "::1", 4001 ; "Host and port")]
	fn server_overrides(args: &[&str], host: &str, port: u16) {
		let cfg = load(args).unwrap();
		assert_eq!(cfg.api.ws_server_host, host);
		assert_eq!(cfg.api.ws_server_port, port);
	}

	#[test]
	fn upstreams_replace_configured_endpoints() {
		let cfg = load(&["--upstream", "ws://a:9944", "-u", "ws://b:9944"]).unwrap();
		assert_eq!(cfg.rpc.full_node_ws, ["ws://a:9944", "ws://b:9944"]);
	}

	#[test]
	fn logging_overrides() {
		let cfg = load(&["--verbosity", "debug", "--logs-json"]).unwrap();
		assert_eq!(cfg.log_level, Level::DEBUG);
		assert!(cfg.log_format_json);
	}

	#[test_case(|cfg: &mut RuntimeConfig| cfg.rpc.full_node_ws.clear() ; "No upstreams")]
	#[test_case(|cfg: &mut RuntimeConfig| cfg.cache.cache_ttl = Duration::ZERO ; "Zero cache TTL")]
	#[test_case(|cfg: &mut RuntimeConfig| cfg.cache.pruning_interval = Duration::ZERO ; "Zero pruning interval")]
	#[test_case(|cfg: &mut RuntimeConfig| cfg.rpc.send_queue_size = 0 ; "Zero send queue size")]
	#[test_case(|cfg: &mut RuntimeConfig| cfg.api.ws_server_host = "localhost".into() ; "Host name")]
	fn invalid_config_is_rejected(invalidate: fn(&mut RuntimeConfig)) {
		let mut cfg = RuntimeConfig::default();
		invalidate(&mut cfg);
		let opts = CliOpts::try_parse_from(["hyperws"]).unwrap();
		assert!(apply_overrides(cfg, &opts).is_err());
	}

	#[test]
	fn flat_yaml_keys() {
		let cfg: RuntimeConfig = serde_json::from_value(serde_json::json!({
			"ws_server_port": 8080,
			"cache_ttl": 5,
			"full_node_ws": ["ws://localhost:9944"],
			"log_level": "warn",
		}))
		.unwrap();
		assert_eq!(cfg.api.ws_server_port, 8080);
		assert_eq!(cfg.cache.cache_ttl.as_secs(), 5);
		assert_eq!(cfg.rpc.full_node_ws, ["ws://localhost:9944"]);
		assert_eq!(cfg.log_level, Level::WARN);
		assert_eq!(cfg.db_path, "hyperws_db");
	}
}

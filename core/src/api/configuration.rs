use color_eyre::{eyre::WrapErr, Result};
use serde::{Deserialize, Serialize};
use std::{
	net::{IpAddr, SocketAddr},
	time::Duration,
};

use crate::types::duration_seconds_format;

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
#[serde(default)]
pub struct APIConfig {
	/// Gateway websocket server host name (default: 127.0.0.1).
	pub ws_server_host: String,
	/// Gateway websocket server port (default: 3000).
	pub ws_server_port: u16,
	/// Seconds after which a silent client connection is closed (default: 60).
	#[serde(with = "duration_seconds_format")]
	pub idle_timeout: Duration,
	/// Maximum size of a client frame in bytes (default: 1048576).
	pub max_payload_size: usize,
}

impl Default for APIConfig {
	fn default() -> Self {
		Self {
			ws_server_host: "127.0.0.1".to_owned(),
			ws_server_port: 3000,
			idle_timeout: Duration::from_secs(60),
			max_payload_size: 1024 * 1024,
		}
	}
}

impl APIConfig {
	/// Websocket server address, IPv4 or IPv6 host
	pub fn socket_addr(&self) -> Result<SocketAddr> {
		let ip = self
			.ws_server_host
			.parse::<IpAddr>()
			.wrap_err_with(|| format!("Invalid websocket server host {:?}", self.ws_server_host))?;
		Ok(SocketAddr::new(ip, self.ws_server_port))
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use test_case::test_case;

	#[test_case("127.0.0.1", 3000 => Some("127.0.0.1:3000".to_string()) ; "IPv4")]
	#[test_case("0.0.0.0", 80 => Some("0.0.0.0:80".to_string()) ; "Any IPv4")]
	#[test_case("::1", 3000 => Some("[::1]:3000".to_string()) ; "IPv6")]
	#[test_case("localhost", 3000 => None ; "Host name")]
	#[test_case("[::1]", 3000 => None ; "Bracketed IPv6")]
	fn socket_addr(host: &str, port: u16) -> Option<String> {
		let cfg = APIConfig {
			ws_server_host: host.to_string(),
			ws_server_port: port,
			..Default::default()
		};
		cfg.socket_addr().ok().map(|addr| addr.to_string())
	}
}

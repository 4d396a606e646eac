use crate::types::duration_millis_format;
use serde::{Deserialize, Serialize};
use std::{iter, time::Duration};
use tokio_retry::strategy::{jitter, ExponentialBackoff, FibonacciBackoff};

pub const PRIMARY_WS_ENDPOINT: &str = "wss://avail-turing.public.blastapi.io";
pub const FALLBACK_WS_ENDPOINT: &str = "wss://turing-testnet.avail-rpc.com";

#[derive(Clone, Serialize, Deserialize, Debug)]
#[serde(default)]
pub struct RPCConfig {
	/// WebSocket endpoints of the upstream node, in order of preference
	/// (default: [wss://avail-turing.public.blastapi.io, wss://turing-testnet.avail-rpc.com]).
	pub full_node_ws: Vec<String>,
	/// Set the configuration based on which the reconnects will be delayed, max duration [in milliseconds] between retries and number of tries.
	/// After given number of tries, reconnects are delayed by max duration until shutdown.
	/// (default:
	/// exponential:
	///     base: 2,
	///     max_delay: 10000,
	///     retries: 8,
	/// )
	pub retry: RetryConfig,
	/// Number of client frames queued for the upstream connection (default: 1024).
	pub send_queue_size: usize,
}

impl Default for RPCConfig {
	fn default() -> Self {
		Self {
			full_node_ws: vec![PRIMARY_WS_ENDPOINT.into(), FALLBACK_WS_ENDPOINT.into()],
			retry: RetryConfig::Exponential(BackoffConfig {
				base: 2,
				max_delay: Duration::from_millis(10000),
				retries: 8,
			}),
			send_queue_size: 1024,
		}
	}
}

/// Reconnect delay strategy, delays are multiples of a second
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum RetryConfig {
	Exponential(BackoffConfig),
	Fibonacci(BackoffConfig),
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct BackoffConfig {
	pub base: u64,
	#[serde(with = "duration_millis_format")]
	pub max_delay: Duration,
	pub retries: usize,
}

impl RetryConfig {
	fn config(&self) -> &BackoffConfig {
		match self {
			RetryConfig::Exponential(config) | RetryConfig::Fibonacci(config) => config,
		}
	}

	pub fn max_delay(&self) -> Duration {
		self.config().max_delay
	}

	/// Jittered delays of the configured retries
	pub fn delays(&self) -> Vec<Duration> {
		let BackoffConfig {
			base,
			max_delay,
			retries,
		} = *self.config();
		let strategy: Box<dyn Iterator<Item = Duration>> = match self {
			RetryConfig::Exponential(_) => Box::new(
				ExponentialBackoff::from_millis(base)
					.factor(1000)
					.max_delay(max_delay),
			),
			RetryConfig::Fibonacci(_) => Box::new(
				FibonacciBackoff::from_millis(base)
					.factor(1000)
					.max_delay(max_delay),
			),
		};
		strategy.map(jitter).take(retries).collect()
	}

	/// Endless sequence of delays, repeating max delay once configured retries are used up
	pub fn backoff(&self) -> impl Iterator<Item = Duration> {
		let max_delay = self.max_delay();
		self.delays().into_iter().chain(iter::repeat(max_delay))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn backoff_is_endless_and_capped() {
		let retry = RetryConfig::Fibonacci(BackoffConfig {
			base: 1,
			max_delay: Duration::from_millis(3000),
			retries: 3,
		});
		let delays = retry.backoff().take(10).collect::<Vec<_>>();
		assert_eq!(delays.len(), 10);
		assert!(delays.iter().all(|delay| *delay <= Duration::from_millis(3000)));
		assert_eq!(delays[3..], [Duration::from_millis(3000); 7]);
	}

	#[test]
	fn deserialize_retry_config() {
		let retry: RetryConfig =
			serde_json::from_str(r#"{"type":"fibonacci","base":1,"max_delay":5000,"retries":4}"#)
				.unwrap();
		assert_eq!(retry.max_delay(), Duration::from_millis(5000));
		assert_eq!(retry.delays().len(), 4);
	}
}

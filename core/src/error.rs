use color_eyre::Report;
use std::time::Duration;
use thiserror::Error;

/// Errors that can be reported back to a waiting client, or that cause an inbound frame to be dropped.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum Error {
	#[error("Malformed request: {0}")]
	MalformedRequest(String),
	#[error("Malformed upstream id: {0}")]
	MalformedId(String),
	#[error("Upstream node is unavailable")]
	UpstreamUnavailable,
	#[error("Request timed out after {}ms", .0.as_millis())]
	Timeout(Duration),
	#[error("Store is unavailable: {0}")]
	StoreUnavailable(String),
}

impl Error {
	pub fn store(report: Report) -> Self {
		Error::StoreUnavailable(format!("{report:#}"))
	}

	/// JSON-RPC error code sent to the client
	pub fn code(&self) -> i64 {
		match self {
			Error::Timeout(_) => -32000,
			Error::UpstreamUnavailable => -32001,
			Error::StoreUnavailable(_) => -32002,
			Error::MalformedRequest(_) => -32600,
			Error::MalformedId(_) => -32603,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::Error;
	use color_eyre::eyre::eyre;
	use std::time::Duration;
	use test_case::test_case;

	#[test_case(Error::Timeout(Duration::from_secs(1)) => -32000)]
	#[test_case(Error::UpstreamUnavailable => -32001)]
	#[test_case(Error::StoreUnavailable("down".into()) => -32002)]
	#[test_case(Error::MalformedRequest("bad".into()) => -32600)]
	fn error_codes(error: Error) -> i64 {
		error.code()
	}

	#[test]
	fn store_error_keeps_cause() {
		let error = Error::store(eyre!("connection refused").wrap_err("Get failed"));
		assert_eq!(
			error.to_string(),
			"Store is unavailable: Get failed: connection refused"
		);
	}
}

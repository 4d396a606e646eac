use mockall::automock;

use crate::error::Error;

pub mod rpc;

/// Outbound side of the shared upstream connection.
#[automock]
pub trait Upstream {
	/// Queues a serialized JSON-RPC frame for the upstream node.
	/// Fails with [`Error::UpstreamUnavailable`] while the connection is not open.
	fn send(&self, frame: String) -> Result<(), Error>;
}

use tokio::sync::{
	mpsc::{self, error::TrySendError},
	watch,
};
use tracing::warn;

use super::ConnectionState;
use crate::{error::Error, network::Upstream};

/// Cloneable handle to the upstream connection, owned by the [`super::EventLoop`]
#[derive(Clone)]
pub struct Client {
	sender: mpsc::Sender<String>,
	state: watch::Receiver<ConnectionState>,
}

impl Client {
	pub fn new(sender: mpsc::Sender<String>, state: watch::Receiver<ConnectionState>) -> Self {
		Client { sender, state }
	}

	pub fn state(&self) -> ConnectionState {
		*self.state.borrow()
	}

	/// Waits until the upstream connection is open
	pub async fn wait_open(&self) -> Result<(), Error> {
		let mut state = self.state.clone();
		state
			.wait_for(|state| *state == ConnectionState::Open)
			.await
			.map(|_| ())
			.map_err(|_| Error::UpstreamUnavailable)
	}
}

impl Upstream for Client {
	fn send(&self, frame: String) -> Result<(), Error> {
		if self.state() != ConnectionState::Open {
			return Err(Error::UpstreamUnavailable);
		}
		self.sender.try_send(frame).map_err(|error| match error {
			TrySendError::Full(_) => {
				warn!("Upstream send queue is full");
				Error::UpstreamUnavailable
			},
			TrySendError::Closed(_) => Error::UpstreamUnavailable,
		})
	}
}

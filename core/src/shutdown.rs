//! Graceful shutdown of the gateway tasks.
//!
//! Shutdown is triggered once, with a reason. Futures wrapped with [`Controller::with_cancel`]
//! stop at that point, and [`Controller::completed_shutdown`] resolves once every future
//! wrapped with [`Controller::with_delay`] has finished.

use std::{fmt, future::Future, sync::Arc};
use tokio::sync::watch;
use tokio_util::task::TaskTracker;

mod utils;
pub use utils::user_signal;

#[derive(Clone)]
pub struct Controller<T: Clone> {
	reason: Arc<watch::Sender<Option<T>>>,
	delays: TaskTracker,
}

impl<T: Clone + Send + Sync + 'static> Controller<T> {
	pub fn new() -> Self {
		let (reason, _) = watch::channel(None);
		Self {
			reason: Arc::new(reason),
			delays: TaskTracker::new(),
		}
	}

	pub fn is_shutdown_triggered(&self) -> bool {
		self.reason.borrow().is_some()
	}

	pub fn shutdown_reason(&self) -> Option<T> {
		self.reason.borrow().clone()
	}

	/// Triggers the shutdown. Only the first reason is kept.
	pub fn trigger_shutdown(&self, reason: T) -> Result<(), ShutdownHasStarted<T>> {
		let mut ignored = None;
		self.reason.send_if_modified(|current| match current {
			Some(_) => {
				ignored = Some(reason.clone());
				false
			},
			None => {
				*current = Some(reason.clone());
				true
			},
		});
		match (ignored, self.shutdown_reason()) {
			(Some(ignored), Some(reason)) => Err(ShutdownHasStarted::new(reason, ignored)),
			_ => Ok(()),
		}
	}

	/// Resolves with the reason once shutdown is triggered.
	pub fn triggered_shutdown(&self) -> impl Future<Output = T> + Send + 'static {
		let mut receiver = self.reason.subscribe();
		async move {
			loop {
				if let Some(reason) = receiver.borrow_and_update().clone() {
					return reason;
				}
				// sender lives in the controller, which is kept by the caller
				if receiver.changed().await.is_err() {
					std::future::pending::<()>().await;
				}
			}
		}
	}

	/// Resolves with the reason once shutdown is triggered and all delaying futures are done.
	pub fn completed_shutdown(&self) -> impl Future<Output = T> + Send + 'static {
		let triggered = self.triggered_shutdown();
		let delays = self.delays.clone();
		async move {
			let reason = triggered.await;
			delays.close();
			delays.wait().await;
			reason
		}
	}

	/// Runs the future until it completes, or until shutdown is triggered,
	/// in which case the future is dropped and the shutdown reason is returned.
	pub fn with_cancel<F: Future>(&self, future: F) -> impl Future<Output = Result<F::Output, T>> {
		let triggered = self.triggered_shutdown();
		async move {
			tokio::select! {
				biased;
				reason = triggered => Err(reason),
				value = future => Ok(value),
			}
		}
	}

	/// Triggers shutdown with given reason when the future completes.
	pub fn with_trigger<F: Future>(&self, reason: T, future: F) -> impl Future<Output = F::Output> {
		let controller = self.clone();
		async move {
			let value = future.await;
			let _ = controller.trigger_shutdown(reason);
			value
		}
	}

	/// Delays shutdown completion until the future completes.
	pub fn with_delay<F: Future>(&self, future: F) -> impl Future<Output = F::Output> {
		self.delays.track_future(future)
	}

	/// Triggers shutdown with given reason on Ctrl-C or SIGTERM.
	pub async fn on_user_signal(self, reason: T) {
		user_signal().await;
		let _ = self.trigger_shutdown(reason);
	}
}

impl<T: Clone + Send + Sync + 'static> Default for Controller<T> {
	fn default() -> Self {
		Self::new()
	}
}

/// Error returned when [`Controller`] instance tries to trigger the shutdown
/// multiple times on the same controller instance.
#[derive(Debug, Clone, PartialEq)]
pub struct ShutdownHasStarted<T> {
	/// The shutdown reason of the already started shutdown.
	pub reason: T,

	/// The provided reason that was ignored because the shutdown was already started.
	pub ignored: T,
}

impl<T> ShutdownHasStarted<T> {
	pub const fn new(reason: T, ignored: T) -> Self {
		Self { reason, ignored }
	}
}

impl<T: fmt::Debug> std::error::Error for ShutdownHasStarted<T> {}

impl<T> fmt::Display for ShutdownHasStarted<T> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "shutdown has already commenced")
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::{
		sync::atomic::{AtomicBool, Ordering},
		time::Duration,
	};
	use tokio::time::{sleep, timeout};

	#[tokio::test]
	async fn with_cancel_stops_pending_futures() {
		let shutdown = Controller::<String>::new();
		let task = tokio::spawn(shutdown.with_cancel(std::future::pending::<()>()));

		shutdown.trigger_shutdown("stop".into()).unwrap();
		assert_eq!(task.await.unwrap(), Err("stop".to_string()));
	}

	#[tokio::test]
	async fn with_cancel_returns_value() {
		let shutdown = Controller::<String>::new();
		assert_eq!(shutdown.with_cancel(async { 7 }).await, Ok(7));
	}

	#[tokio::test]
	async fn first_reason_wins() {
		let shutdown = Controller::<String>::new();
		assert!(!shutdown.is_shutdown_triggered());
		shutdown.trigger_shutdown("first".into()).unwrap();
		assert_eq!(
			shutdown.trigger_shutdown("second".into()),
			Err(ShutdownHasStarted::new("first".into(), "second".into()))
		);
		assert_eq!(shutdown.triggered_shutdown().await, "first");
	}

	#[tokio::test]
	async fn with_trigger_triggers_shutdown() {
		let shutdown = Controller::<String>::new();
		shutdown
			.with_trigger("done".into(), async {})
			.await;
		assert_eq!(shutdown.shutdown_reason(), Some("done".to_string()));
	}

	#[tokio::test]
	async fn completed_waits_for_delays() {
		let shutdown = Controller::<String>::new();
		let done = Arc::new(AtomicBool::new(false));
		tokio::spawn(shutdown.with_delay({
			let done = done.clone();
			async move {
				sleep(Duration::from_millis(50)).await;
				done.store(true, Ordering::SeqCst);
			}
		}));

		let completed = shutdown.completed_shutdown();
		shutdown.trigger_shutdown("stop".into()).unwrap();
		assert_eq!(
			timeout(Duration::from_secs(1), completed).await,
			Ok("stop".to_string())
		);
		assert!(done.load(Ordering::SeqCst));
	}

	#[tokio::test]
	async fn signal_watcher_shares_controller_state() {
		let shutdown = Controller::<String>::new();
		let watcher = tokio::spawn(shutdown.clone().on_user_signal("signal".into()));

		shutdown.trigger_shutdown("stop".into()).unwrap();
		assert_eq!(
			timeout(Duration::from_secs(1), shutdown.completed_shutdown()).await,
			Ok("stop".to_string())
		);
		watcher.abort();
	}
}

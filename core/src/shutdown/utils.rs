use tracing::warn;

/// Completes on Ctrl-C, or on SIGTERM on Unix systems.
pub async fn user_signal() {
	#[cfg(unix)]
	{
		use tokio::signal::unix::{signal, SignalKind};

		match signal(SignalKind::terminate()) {
			Ok(mut terminate) => {
				tokio::select! {
					_ = tokio::signal::ctrl_c() => {},
					_ = terminate.recv() => {},
				}
				return;
			},
			Err(error) => warn!(%error, "Cannot listen for SIGTERM"),
		}
	}

	if let Err(error) = tokio::signal::ctrl_c().await {
		warn!(%error, "Cannot listen for Ctrl-C");
		std::future::pending::<()>().await;
	}
}

use color_eyre::{config::HookBuilder, Result};
use std::{future::Future, panic};
use tokio::task::JoinHandle;
use tracing::{error, Instrument, Level, Subscriber};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
	fmt::format::FmtSpan, layer::SubscriberExt, registry::LookupSpan, EnvFilter, Registry,
};

use crate::shutdown::Controller;

/// Spawns the future as a task that inherits the current span
pub fn spawn_in_span<F>(future: F) -> JoinHandle<F::Output>
where
	F: Future + Send + 'static,
	F::Output: Send + 'static,
{
	tokio::spawn(future.in_current_span())
}

/// Installs color-eyre report hooks and a panic hook that logs the panic and shuts the gateway down.
pub fn install_panic_hooks(shutdown: Controller<String>) -> Result<()> {
	let (panic_hook, eyre_hook) = HookBuilder::default()
		.display_location_section(true)
		.display_env_section(true)
		.into_hooks();
	eyre_hook.install()?;

	panic::set_hook(Box::new(move |panic_info| {
		if let Err(error) = shutdown.trigger_shutdown("Gateway panicked".to_string()) {
			error!("Panic during shutdown: {error}");
		}

		let report = panic_hook.panic_report(panic_info).to_string();
		error!("Panic: {}", strip_ansi_escapes::strip_str(report));

		// readable backtraces in debug builds
		#[cfg(debug_assertions)]
		better_panic::Settings::auto()
			.most_recent_first(false)
			.lineno_suffix(true)
			.verbosity(better_panic::Verbosity::Medium)
			.create_panic_handler()(panic_info);
	}));
	Ok(())
}

fn registry(log_level: Level) -> impl Subscriber + Send + Sync + for<'a> LookupSpan<'a> {
	Registry::default()
		.with(EnvFilter::new(format!("hyperws={log_level},warn")))
		.with(ErrorLayer::default())
}

pub fn json_subscriber(log_level: Level) -> impl Subscriber + Send + Sync {
	registry(log_level).with(
		tracing_subscriber::fmt::layer()
			.json()
			.with_span_events(FmtSpan::CLOSE),
	)
}

pub fn default_subscriber(log_level: Level) -> impl Subscriber + Send + Sync {
	registry(log_level).with(tracing_subscriber::fmt::layer().with_span_events(FmtSpan::CLOSE))
}

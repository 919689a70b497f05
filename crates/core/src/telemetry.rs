use std::env;
use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

/// Install the global tracing subscriber.
///
/// The filter is taken from `RUST_LOG` when set, otherwise from the supplied
/// level (typically the `LOG_LEVEL` env override or the config file). When a
/// log file is given, output goes through a non-blocking appender; the
/// returned guard must be held for the lifetime of the process or buffered
/// lines are lost on exit.
pub fn setup_logging(level: Option<&str>, file: Option<&Path>) -> Option<WorkerGuard> {
	let filter = match env::var(EnvFilter::DEFAULT_ENV) {
		Ok(_) => EnvFilter::from_default_env(),
		Err(_) => EnvFilter::new(level.unwrap_or("info")),
	};

	match file {
		Some(path) => {
			let dir = path.parent().unwrap_or(Path::new("."));
			let name = path.file_name().map(|f| f.to_owned()).unwrap_or_default();
			let appender = tracing_appender::rolling::never(dir, name);
			let (writer, guard) = tracing_appender::non_blocking(appender);
			tracing_subscriber::registry()
				.with(filter)
				.with(
					tracing_subscriber::fmt::layer()
						.with_writer(writer)
						.with_ansi(false),
				)
				.init();
			Some(guard)
		},
		None => {
			tracing_subscriber::registry()
				.with(filter)
				.with(tracing_subscriber::fmt::layer())
				.init();
			None
		},
	}
}

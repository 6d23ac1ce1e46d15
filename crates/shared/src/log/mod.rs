// Logging module
// Console + optional rolling file output on top of the tracing crate
//
// Every navkit binary funnels its diagnostics through `tracing`:
// - build stages report progress at INFO, per-stage detail at DEBUG
// - stage failures are reported at ERROR with the stage name
// - filtering can be overridden with RUST_LOG

use std::path::Path;

use tracing_appender::rolling;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Map the numeric CLI log level to an EnvFilter directive
/// (0=Minimum, 1=Error, 2=Detail, 3=Full/Debug, 4=Trace)
pub fn map_log_level(level: i32) -> &'static str {
    match level {
        i32::MIN..=0 => "warn",
        1 => "error",
        2 => "info",
        3 => "debug",
        _ => "trace",
    }
}

/// Initialize the logging system
///
/// `log_dir` enables a daily-rolling file named `file_name` next to the
/// console output. Calling this twice is harmless; the second call is ignored.
pub fn initialize_logging(log_dir: Option<&str>, file_name: &str, log_level: &str) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let console = fmt::layer()
        .with_ansi(true)
        .with_target(false)
        .with_thread_ids(false);

    if let Some(dir) = log_dir {
        let path = Path::new(dir);
        if !path.exists() {
            let _ = std::fs::create_dir_all(path);
        }

        let file_appender = rolling::daily(dir, file_name);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        // The guard flushes on drop; it has to live for the whole process.
        std::mem::forget(guard);

        let _ = tracing_subscriber::registry()
            .with(env_filter)
            .with(console)
            .with(
                fmt::layer()
                    .with_writer(non_blocking)
                    .with_ansi(false)
                    .with_target(true),
            )
            .try_init();
    } else {
        let _ = tracing_subscriber::registry()
            .with(env_filter)
            .with(console)
            .try_init();
    }
}

//! Logging initialization using the `tracing` ecosystem.
//!
//! Provides:
//! - Console output (colored human-readable, or JSON lines)
//! - File output (daily rotation via `tracing-appender`)
//! - Configurable log level via env var `RUST_LOG` or explicit parameter

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Options for [`init_logging`].
#[derive(Debug, Clone)]
pub struct LogOptions<'a> {
    /// Default level if `RUST_LOG` is not set (e.g. `"info"`).
    pub level: &'a str,
    /// Optional directory for daily-rotating log files.
    pub dir: Option<&'a str>,
    /// Log file prefix (e.g. `"mdb-runner"`).
    pub file_prefix: &'a str,
    /// Emit console output as JSON lines instead of the pretty format.
    pub json: bool,
}

/// Initialize the global tracing subscriber.
///
/// Should be called once at program start. Calling it twice is harmless: the
/// second registration fails silently and the first subscriber stays active.
pub fn init_logging(opts: &LogOptions<'_>) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(opts.level));

    let file_layer = opts.dir.map(|dir| {
        let appender = tracing_appender::rolling::daily(dir, opts.file_prefix);
        fmt::layer()
            .with_writer(appender)
            .with_ansi(false)
            .with_target(true)
            .with_thread_ids(true)
    });

    let (pretty, json) = if opts.json {
        let layer = fmt::layer().json().with_target(true).with_thread_ids(true);
        (None, Some(layer))
    } else {
        let layer = fmt::layer()
            .with_target(true)
            .with_thread_ids(true)
            .with_ansi(true);
        (Some(layer), None)
    };

    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(pretty)
        .with(json)
        .with(file_layer)
        .try_init();
}

//! Process-wide `tracing` setup for the price cache binary.
//!
//! Sync passes, hub reconnects and HTTP failures all log through `tracing`
//! macros tagged with a `[component]` prefix. This module installs the one
//! subscriber they write to: a colored console layer and, when the service
//! is given a log directory, a plain-text file rolled over every day.

use tracing_appender::rolling;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Install the global subscriber. Call once, before the first exchange is
/// opened.
///
/// `RUST_LOG` wins over `log_level` when set. With `log_dir`, records are
/// also written to `{log_dir}/{module_name}.YYYY-MM-DD` with thread ids, so
/// interleaved sync workers can be told apart.
pub fn init_logging(log_level: &str, log_dir: Option<&str>, module_name: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let daily_file = log_dir.map(|dir| {
        fmt::layer()
            .with_writer(rolling::daily(dir, module_name))
            .with_ansi(false)
            .with_thread_ids(true)
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true))
        .with(daily_file)
        .init();
}

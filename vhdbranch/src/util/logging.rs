//! Tracing subscriber setup shared by front ends.

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

const LOG_FILE: &str = "vhdbranch.log";

/// Install a stderr subscriber filtered by `env_filter`, plus an optional
/// extra writer (typically a non-blocking file appender).
///
/// Silently keeps an already installed global subscriber.
pub fn register_to_tracing<W>(writer: Option<W>, env_filter: EnvFilter)
where
    W: for<'a> fmt::MakeWriter<'a> + Send + Sync + 'static,
{
    let file_layer = writer.map(|w| fmt::layer().with_ansi(false).with_writer(w));

    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .try_init();
}

/// Initialize logging for a front end.
///
/// `level` is used when `RUST_LOG` is not set. When `logs_dir` is given,
/// logs are also written to `{logs_dir}/vhdbranch.log` with daily rotation;
/// the returned guard must stay alive to flush that writer.
pub fn init_logging(logs_dir: Option<&Path>, level: &str) -> Option<WorkerGuard> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let Some(logs_dir) = logs_dir.filter(|dir| std::fs::create_dir_all(dir).is_ok()) else {
        register_to_tracing::<fn() -> std::io::Stderr>(None, env_filter);
        return None;
    };

    let file_appender = tracing_appender::rolling::daily(logs_dir, LOG_FILE);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    register_to_tracing(Some(non_blocking), env_filter);
    Some(guard)
}

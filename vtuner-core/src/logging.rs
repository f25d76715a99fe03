use std::sync::Arc;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::config::LoggingConfig;

/// Install the global tracing subscriber.
///
/// `logging.format` picks between line-delimited JSON (for log shippers) and
/// a human-readable console layout. The filter honors `RUST_LOG` when set,
/// falling back to `logging.level`; `logging.file_path` mirrors output into a
/// file instead of stderr.
pub fn init_logging(config: &LoggingConfig) -> anyhow::Result<()> {
    let directive = filter_directive(&config.level)?;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directive));
    let registry = tracing_subscriber::registry().with(filter);

    let layer: Box<dyn Layer<_> + Send + Sync> =
        match (config.format.as_str(), config.file_path.as_deref()) {
            ("json", Some(path)) => fmt::layer()
                .json()
                .with_target(true)
                .with_writer(log_file(path)?)
                .boxed(),
            ("json", None) => fmt::layer().json().with_target(true).boxed(),
            (_, Some(path)) => fmt::layer()
                .with_ansi(false)
                .with_writer(log_file(path)?)
                .boxed(),
            (_, None) => fmt::layer().pretty().with_target(true).boxed(),
        };

    registry.with(layer).init();
    Ok(())
}

fn log_file(path: &str) -> anyhow::Result<Arc<std::fs::File>> {
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    Ok(Arc::new(file))
}

/// Normalize a configured level into an `EnvFilter` directive.
fn filter_directive(level: &str) -> anyhow::Result<String> {
    let level = level.to_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(level),
        "warning" => Ok("warn".to_string()),
        other => Err(anyhow::anyhow!("unknown log level: {other:?}")),
    }
}

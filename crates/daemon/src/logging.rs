//! Tracing subscriber setup

use crate::settings::{LogFormat, LogSettings};
use anyhow::Result;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_FILTER: &str = "courier=info";
const LOG_FILE_PREFIX: &str = "courier.log";

/// Install the global subscriber
///
/// `RUST_LOG` wins over the configured filter. The returned guard flushes the
/// file writer and must live until the process exits.
pub fn init(settings: &LogSettings) -> Result<Option<WorkerGuard>> {
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(settings.filter.as_deref().unwrap_or(DEFAULT_FILTER))?,
    };

    let (file_layer, guard) = match &settings.directory {
        Some(directory) => {
            let directory = shellexpand::tilde(directory).into_owned();
            let appender = tracing_appender::rolling::daily(directory, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().json().with_ansi(false).with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let registry = tracing_subscriber::registry().with(env_filter).with(file_layer);

    match settings.format {
        LogFormat::Json => registry.with(fmt::layer().json()).try_init()?,
        LogFormat::Pretty => registry.with(fmt::layer().pretty()).try_init()?,
    }

    Ok(guard)
}

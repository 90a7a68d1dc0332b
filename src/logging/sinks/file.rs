use tracing_appender::{non_blocking, non_blocking::WorkerGuard, rolling};
use tracing_subscriber::{fmt, layer::Layer, registry::LookupSpan};

use crate::logging::config::{LogFormat, LoggingConfig};

/// Файловый слой с суточной ротацией. Запись идёт через фоновый поток;
/// `WorkerGuard` нужно держать живым до конца работы.
pub fn layer<S>(
    config: &LoggingConfig
) -> std::io::Result<(Box<dyn Layer<S> + Send + Sync>, WorkerGuard)>
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
{
    std::fs::create_dir_all(&config.log_dir)?;

    let appender = rolling::daily(&config.log_dir, &config.file.filename);
    let (writer, guard) = non_blocking(appender);

    let base = fmt::layer().with_ansi(false).with_writer(writer);
    let layer: Box<dyn Layer<S> + Send + Sync> = match config.file.format {
        LogFormat::Json => Box::new(base.json()),
        LogFormat::Pretty => Box::new(base.pretty()),
        LogFormat::Compact => Box::new(base.compact()),
    };

    Ok((layer, guard))
}

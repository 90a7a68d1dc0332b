//! Логирование на `tracing`: фильтр уровней, консоль и файл с ротацией.

pub mod config;
mod filters;
pub mod handle;
pub mod sinks;

pub use config::{ConsoleConfig, FileConfig, LogFormat, LoggingConfig};
pub use handle::LoggingHandle;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Устанавливает глобальный subscriber.
///
/// Переопределения из окружения применяются до проверки конфигурации.
/// Повторный вызов в одном процессе вернёт ошибку.
pub fn init_logging(
    mut config: LoggingConfig
) -> Result<LoggingHandle, Box<dyn std::error::Error + Send + Sync>> {
    config.apply_env_overrides();
    config.validate()?;
    config.ensure_log_dir()?;

    let env_filter = filters::build_filter(&config);
    let mut layers = Vec::new();

    if config.console.enabled {
        layers.push(sinks::console::layer(&config.console));
    }

    let file_guard = if config.file.enabled {
        let (file_layer, guard) = sinks::file::layer(&config)?;
        layers.push(file_layer);
        Some(guard)
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(layers)
        .try_init()?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        log_level = %config.level,
        log_dir = %config.log_dir.display(),
        console = config.console.enabled,
        file = config.file.enabled,
        "Logging system initialized"
    );

    Ok(LoggingHandle::new(file_guard))
}

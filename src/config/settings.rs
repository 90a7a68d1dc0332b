use std::{path::Path, time::Duration};

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use zvon_error::ConfigError;

use crate::{logging::LoggingConfig, network::ConnectionConfig, network::ServerConfig};

/// Настройки сервера.
///
/// Источники по возрастанию приоритета: значения по умолчанию, файл
/// `zvon.toml` в рабочем каталоге (если есть), явно указанный файл,
/// переменные окружения с префиксом `ZVON_` (`ZVON_LISTEN_ADDRESS`,
/// `ZVON_PONG_WAIT_MS`, ...).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Settings {
    pub listen_address: String,
    pub max_connections: usize,
    pub outbound_queue_capacity: usize,
    pub write_wait_ms: u64,
    pub pong_wait_ms: u64,
    /// Период ping; по умолчанию 9/10 от `pong_wait_ms`
    pub ping_period_ms: u64,
    pub logging: LoggingConfig,
}

impl Settings {
    pub fn load() -> Result<Self, config::ConfigError> {
        Self::load_from(None)
    }

    pub fn load_from(path: Option<&Path>) -> Result<Self, config::ConfigError> {
        let defaults = Settings::default();

        let mut builder = Config::builder()
            // Значения по умолчанию
            .set_default("listen_address", defaults.listen_address)?
            .set_default("max_connections", defaults.max_connections as u64)?
            .set_default(
                "outbound_queue_capacity",
                defaults.outbound_queue_capacity as u64,
            )?
            .set_default("write_wait_ms", defaults.write_wait_ms)?
            .set_default("pong_wait_ms", defaults.pong_wait_ms)?
            .set_default("ping_period_ms", defaults.ping_period_ms)?
            .add_source(File::with_name("zvon").required(false));

        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(true));
        }

        // Переменные окружения с префиксом ZVON_
        builder
            .add_source(Environment::with_prefix("ZVON").try_parsing(true))
            .build()?
            .try_deserialize()
    }

    /// Проверяет согласованность значений.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.listen_address.trim().is_empty() {
            return Err(invalid("listen_address", "must not be empty"));
        }
        if self.max_connections == 0 {
            return Err(invalid("max_connections", "must be greater than zero"));
        }
        if self.outbound_queue_capacity == 0 {
            return Err(invalid(
                "outbound_queue_capacity",
                "must be greater than zero",
            ));
        }
        if self.write_wait_ms == 0 {
            return Err(invalid("write_wait_ms", "must be greater than zero"));
        }
        if self.ping_period_ms == 0 || self.ping_period_ms >= self.pong_wait_ms {
            return Err(invalid(
                "ping_period_ms",
                &format!(
                    "must be positive and less than pong_wait_ms ({})",
                    self.pong_wait_ms
                ),
            ));
        }

        self.logging.validate()
    }

    pub fn connection_config(&self) -> ConnectionConfig {
        ConnectionConfig {
            outbound_capacity: self.outbound_queue_capacity,
            write_wait: Duration::from_millis(self.write_wait_ms),
            pong_wait: Duration::from_millis(self.pong_wait_ms),
            ping_period: Duration::from_millis(self.ping_period_ms),
        }
    }

    pub fn server_config(&self) -> ServerConfig {
        ServerConfig {
            max_connections: self.max_connections,
            connection: self.connection_config(),
        }
    }
}

fn invalid(
    key: &str,
    reason: &str,
) -> ConfigError {
    ConfigError::InvalidSetting {
        key: key.to_string(),
        reason: reason.to_string(),
    }
}

impl Default for Settings {
    fn default() -> Self {
        let pong_wait_ms = 60_000;
        Self {
            listen_address: "127.0.0.1:8080".to_string(),
            max_connections: 1024,
            outbound_queue_capacity: 256,
            write_wait_ms: 10_000,
            pong_wait_ms,
            ping_period_ms: pong_wait_ms * 9 / 10,
            logging: LoggingConfig::default(),
        }
    }
}

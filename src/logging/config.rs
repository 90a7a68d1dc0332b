use std::{collections::BTreeMap, path::PathBuf, str::FromStr};

use serde::{Deserialize, Serialize};
use zvon_error::ConfigError;

const LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Формат вывода событий.
#[derive(Debug, Default, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    #[default]
    Compact,
    Json,
}

/// Настройки консольного вывода.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct ConsoleConfig {
    pub enabled: bool,
    pub format: LogFormat,
    pub with_ansi: bool,
    pub with_target: bool,
    pub with_thread_ids: bool,
    pub with_line_numbers: bool,
}

/// Настройки файлового вывода (ротация раз в сутки).
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct FileConfig {
    pub enabled: bool,
    /// Префикс имени файла; к нему добавляется дата
    pub filename: String,
    pub format: LogFormat,
}

/// Конфигурация логирования.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Базовый уровень: trace, debug, info, warn, error
    pub level: String,
    /// Каталог для файловых логов
    pub log_dir: PathBuf,
    /// Уровни для отдельных модулей (`tokio_tungstenite = "warn"`)
    pub module_levels: BTreeMap<String, String>,
    pub console: ConsoleConfig,
    pub file: FileConfig,
}

impl LoggingConfig {
    /// Переопределения из окружения: `ZVON_LOG_LEVEL`, `ZVON_LOG_DIR`,
    /// `ZVON_LOG_FORMAT`.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// То же, что [`LoggingConfig::apply_env_overrides`], но с
    /// произвольным источником значений.
    pub fn apply_overrides<F>(
        &mut self,
        lookup: F,
    ) where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(level) = lookup("ZVON_LOG_LEVEL") {
            self.level = level.to_lowercase();
        }
        if let Some(dir) = lookup("ZVON_LOG_DIR") {
            self.log_dir = PathBuf::from(dir);
            self.file.enabled = true;
        }
        if let Some(format) = lookup("ZVON_LOG_FORMAT") {
            match format.parse() {
                Ok(format) => self.console.format = format,
                Err(e) => eprintln!("Ignoring ZVON_LOG_FORMAT: {e}"),
            }
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !LEVELS.contains(&self.level.as_str()) {
            return Err(invalid("logging.level", &self.level));
        }

        for (module, level) in &self.module_levels {
            if !LEVELS.contains(&level.as_str()) {
                return Err(invalid(&format!("logging.module_levels.{module}"), level));
            }
        }

        if self.file.enabled && self.file.filename.is_empty() {
            return Err(ConfigError::InvalidSetting {
                key: "logging.file.filename".to_string(),
                reason: "must not be empty".to_string(),
            });
        }

        Ok(())
    }

    pub fn ensure_log_dir(&self) -> std::io::Result<()> {
        if self.file.enabled {
            std::fs::create_dir_all(&self.log_dir)?;
        }
        Ok(())
    }

    /// Директива для `EnvFilter`: базовый уровень плюс уровни модулей.
    pub fn build_filter_directive(&self) -> String {
        std::iter::once(self.level.clone())
            .chain(
                self.module_levels
                    .iter()
                    .map(|(module, level)| format!("{module}={level}")),
            )
            .collect::<Vec<_>>()
            .join(",")
    }
}

fn invalid(
    key: &str,
    level: &str,
) -> ConfigError {
    ConfigError::InvalidSetting {
        key: key.to_string(),
        reason: format!("unknown level '{level}', expected one of {LEVELS:?}"),
    }
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pretty" => Ok(Self::Pretty),
            "compact" => Ok(Self::Compact),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown log format '{other}'")),
        }
    }
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            format: LogFormat::Compact,
            with_ansi: true,
            with_target: true,
            with_thread_ids: false,
            with_line_numbers: false,
        }
    }
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            filename: "zvon.log".to_string(),
            format: LogFormat::Json,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            log_dir: PathBuf::from("logs"),
            module_levels: BTreeMap::from([("tungstenite".to_string(), "warn".to_string())]),
            console: ConsoleConfig::default(),
            file: FileConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn test_default_is_valid() {
        let cfg = LoggingConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.build_filter_directive(), "info,tungstenite=warn");
    }

    #[test]
    fn test_unknown_level_is_rejected() {
        let cfg = LoggingConfig {
            level: "loud".into(),
            ..Default::default()
        };
        let err = cfg.validate().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidSetting { ref key, .. } if key == "logging.level"));

        let mut cfg = LoggingConfig::default();
        cfg.module_levels.insert("zvon".into(), "verbose".into());
        assert!(cfg.validate().is_err());
    }

    /// Тест проверяет переопределения без обращения к настоящему
    /// окружению процесса.
    #[test]
    fn test_overrides() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("ZVON_LOG_LEVEL", "DEBUG"),
            ("ZVON_LOG_DIR", "/tmp/zvon-logs"),
            ("ZVON_LOG_FORMAT", "json"),
        ]);

        let mut cfg = LoggingConfig::default();
        cfg.apply_overrides(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(cfg.level, "debug");
        assert_eq!(cfg.log_dir, PathBuf::from("/tmp/zvon-logs"));
        assert!(cfg.file.enabled);
        assert_eq!(cfg.console.format, LogFormat::Json);
    }

    #[test]
    fn test_bad_format_override_is_ignored() {
        let mut cfg = LoggingConfig::default();
        cfg.apply_overrides(|key| (key == "ZVON_LOG_FORMAT").then(|| "xml".to_string()));
        assert_eq!(cfg.console.format, LogFormat::Compact);
    }
}

use std::any::Any;

use thiserror::Error;

use crate::{ErrorExt, StatusCode};

/// Ошибки конфигурации: шаблоны каналов, таблицы обработчиков, настройки.
///
/// Возникают только на этапе сборки сервера; процесс не должен переходить к
/// обслуживанию трафика с такой ошибкой.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("Channel pattern must not be empty")]
    EmptyPattern,

    #[error("Pattern '{pattern}' has an empty segment at position {index}")]
    EmptySegment { pattern: String, index: usize },

    #[error("Pattern '{pattern}' has a malformed placeholder '{segment}'")]
    InvalidPlaceholder { pattern: String, segment: String },

    #[error("Pattern '{pattern}' declares parameter '{name}' more than once")]
    DuplicateParam { pattern: String, name: String },

    #[error("Pattern '{pattern}' failed to compile: {reason}")]
    InvalidRegex { pattern: String, reason: String },

    #[error("Event name must not be empty (channel '{pattern}')")]
    EmptyEvent { pattern: String },

    #[error("Multiple handlers for event '{event}' on channel '{pattern}'")]
    DuplicateHandler { pattern: String, event: String },

    #[error("Invalid setting '{key}': {reason}")]
    InvalidSetting { key: String, reason: String },
}

impl ErrorExt for ConfigError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::EmptyPattern
            | Self::EmptySegment { .. }
            | Self::InvalidPlaceholder { .. }
            | Self::DuplicateParam { .. }
            | Self::InvalidRegex { .. } => StatusCode::InvalidPattern,
            Self::EmptyEvent { .. } => StatusCode::InvalidEvent,
            Self::DuplicateHandler { .. } => StatusCode::DuplicateHandler,
            Self::InvalidSetting { .. } => StatusCode::InvalidConfig,
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_variant_is_config_error() {
        let errors = [
            ConfigError::EmptyPattern,
            ConfigError::EmptyEvent {
                pattern: "a".into(),
            },
            ConfigError::DuplicateHandler {
                pattern: "a".into(),
                event: "e".into(),
            },
            ConfigError::InvalidSetting {
                key: "k".into(),
                reason: "r".into(),
            },
        ];
        for err in errors {
            assert!(err.status_code().is_config_error(), "{err}");
        }
    }

    #[test]
    fn test_duplicate_handler_display() {
        let err = ConfigError::DuplicateHandler {
            pattern: "room.{id}".into(),
            event: "msg".into(),
        };
        assert_eq!(
            err.to_string(),
            "Multiple handlers for event 'msg' on channel 'room.{id}'"
        );
    }
}

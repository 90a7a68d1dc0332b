use std::any::Any;

use crate::{ErrorExt, StatusCode};

/// Протокольные ошибки маршрутизации и диспетчеризации.
///
/// Не фатальны: доставляются инициатору как сообщение `ServerError`,
/// соединение остаётся открытым.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelError {
    /// Канал не открыт (или не существует)
    ChannelNotFound { channel: String },
    /// Ни один зарегистрированный шаблон не подходит к имени канала
    NoMatchingFactory { channel: String },
    /// Для события не зарегистрирован обработчик
    HandlerNotFound { channel: String, event: String },
    /// Канал уже закрыт и не может принимать подписчиков
    Closed { channel: String },
    /// Входящий кадр не удалось разобрать в сообщение
    MalformedMessage { reason: String },
    /// Полезную нагрузку события не удалось декодировать
    Decode { event: String, reason: String },
}

impl ChannelError {
    /// Структурированные поля для `ServerError.data`.
    pub fn fields(&self) -> Vec<(&'static str, String)> {
        match self {
            Self::ChannelNotFound { channel }
            | Self::NoMatchingFactory { channel }
            | Self::Closed { channel } => vec![("channel", channel.clone())],
            Self::HandlerNotFound { channel, event } => {
                vec![("channel", channel.clone()), ("event", event.clone())]
            }
            Self::MalformedMessage { reason } => vec![("reason", reason.clone())],
            Self::Decode { event, reason } => {
                vec![("event", event.clone()), ("reason", reason.clone())]
            }
        }
    }
}

impl std::fmt::Display for ChannelError {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        match self {
            Self::ChannelNotFound { channel } => write!(f, "Channel not found: {channel}"),
            Self::NoMatchingFactory { channel } => {
                write!(f, "No channel factory matches '{channel}'")
            }
            Self::HandlerNotFound { channel, event } => {
                write!(f, "Handler '{event}' not available for channel {channel}")
            }
            Self::Closed { channel } => write!(f, "Channel {channel} is closed"),
            Self::MalformedMessage { reason } => write!(f, "Malformed message: {reason}"),
            Self::Decode { event, reason } => {
                write!(f, "Unable to decode payload of event '{event}': {reason}")
            }
        }
    }
}

impl std::error::Error for ChannelError {}

impl ErrorExt for ChannelError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::ChannelNotFound { .. } => StatusCode::ChannelNotFound,
            Self::NoMatchingFactory { .. } => StatusCode::NoMatchingFactory,
            Self::HandlerNotFound { .. } => StatusCode::HandlerNotFound,
            Self::Closed { .. } => StatusCode::ChannelClosed,
            Self::MalformedMessage { .. } => StatusCode::MalformedMessage,
            Self::Decode { .. } => StatusCode::DecodingError,
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    /// Клиент видит короткий текст, детали уходят в `fields`.
    fn client_message(&self) -> String {
        match self {
            Self::ChannelNotFound { .. } | Self::NoMatchingFactory { .. } => {
                "Channel not found".to_string()
            }
            Self::HandlerNotFound { .. } => "Handler not available for channel".to_string(),
            Self::Closed { .. } => "Channel closed".to_string(),
            Self::MalformedMessage { .. } => "Malformed message".to_string(),
            Self::Decode { .. } => "Invalid event payload".to_string(),
        }
    }

    fn metrics_tags(&self) -> Vec<(&'static str, String)> {
        let mut tags = vec![
            ("error_type", "channel".to_string()),
            ("status_code", self.status_code().to_string()),
        ];
        tags.extend(self.fields());
        tags
    }
}

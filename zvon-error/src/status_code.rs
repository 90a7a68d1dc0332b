use std::fmt;

use num_enum::TryFromPrimitive;

/// Коды статуса для категоризации ошибок.
///
/// # Диапазоны:
/// - 0xxx: Успех
/// - 1xxx: Общие ошибки
/// - 2xxx: Каналы и маршрутизация
/// - 3xxx: Конфигурация
/// - 4xxx: Ограничения (очереди, лимиты соединений)
/// - 6xxx: Транспорт / IO
/// - 8xxx: Протокольные ошибки
///
/// `num_enum::TryFromPrimitive` даёт нативную реализацию `TryFrom<u32>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u32)]
#[non_exhaustive]
pub enum StatusCode {
    // === 0xxx: Успех ===
    Success = 0,

    // === 1xxx: Общие ошибки ===
    Unknown = 1000,
    Unexpected = 1001,
    Internal = 1002,
    InvalidArgs = 1003,

    // === 2xxx: Каналы ===
    ChannelNotFound = 2000,
    NoMatchingFactory = 2001,
    HandlerNotFound = 2002,
    ChannelClosed = 2003,
    JoinRejected = 2004,

    // === 3xxx: Конфигурация ===
    InvalidPattern = 3000,
    InvalidEvent = 3001,
    DuplicateHandler = 3002,
    InvalidConfig = 3003,

    // === 4xxx: Ограничения ===
    QueueFull = 4000,
    TooManyConnections = 4001,

    // === 6xxx: Транспорт/IO ===
    Io = 6000,
    ConnectionClosed = 6001,
    ReadTimeout = 6002,
    WriteTimeout = 6003,
    TransportError = 6004,

    // === 8xxx: Протокол ===
    MalformedMessage = 8000,
    EncodingError = 8001,
    DecodingError = 8002,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl StatusCode {
    /// Числовое представление кода статуса.
    pub const fn code(self) -> u32 {
        self as u32
    }

    /// Пытается получить вариант `StatusCode` из `u32`.
    pub fn from_u32(v: u32) -> Option<Self> {
        Self::try_from(v).ok()
    }

    /// Ошибка вызвана запросом клиента (диапазон `2xxx`, а также
    /// `InvalidArgs` и `MalformedMessage`).
    pub fn is_client_error(&self) -> bool {
        if (2000..=2999).contains(&self.code()) {
            return true;
        }
        matches!(self, Self::InvalidArgs | Self::MalformedMessage)
    }

    /// Ошибка конфигурации сервера (диапазон `3xxx`). Такие ошибки не должны
    /// доживать до обслуживания трафика.
    pub fn is_config_error(&self) -> bool {
        (3000..=3999).contains(&self.code())
    }

    /// Ошибка транспорта: фатальна для одного соединения.
    pub fn is_transport_error(&self) -> bool {
        (6000..=6999).contains(&self.code())
    }

    /// Рекомендуемый уровень логирования для данного кода.
    pub fn log_level(&self) -> LogLevel {
        match self {
            Self::Success => LogLevel::Trace,
            Self::ChannelNotFound
            | Self::NoMatchingFactory
            | Self::HandlerNotFound
            | Self::ConnectionClosed
            | Self::QueueFull => LogLevel::Debug,
            Self::JoinRejected | Self::MalformedMessage | Self::ChannelClosed => LogLevel::Info,
            Self::Internal
            | Self::InvalidPattern
            | Self::InvalidEvent
            | Self::DuplicateHandler
            | Self::InvalidConfig => LogLevel::Error,
            _ => LogLevel::Warn,
        }
    }
}

////////////////////////////////////////////////////////////////////////////////
// Общие реализации трейтов для StatusCode
////////////////////////////////////////////////////////////////////////////////

impl From<StatusCode> for u32 {
    fn from(c: StatusCode) -> Self {
        c.code()
    }
}

impl fmt::Display for StatusCode {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "{:?} ({})", self, self.code())
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////

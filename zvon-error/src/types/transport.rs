use std::any::Any;

use thiserror::Error;

use crate::{ErrorExt, StatusCode};

/// Ошибки транспорта. Фатальны для одного соединения и запускают его
/// завершение; на другие соединения и каналы не влияют.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("Connection closed")]
    ConnectionClosed,

    #[error("No inbound traffic within {after_ms} ms")]
    ReadDeadline { after_ms: u64 },

    #[error("Write did not complete within {after_ms} ms")]
    WriteTimeout { after_ms: u64 },

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Transport protocol error: {reason}")]
    Protocol { reason: String },
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl ErrorExt for TransportError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::ConnectionClosed => StatusCode::ConnectionClosed,
            Self::ReadDeadline { .. } => StatusCode::ReadTimeout,
            Self::WriteTimeout { .. } => StatusCode::WriteTimeout,
            Self::Io(_) => StatusCode::Io,
            Self::Protocol { .. } => StatusCode::TransportError,
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Сообщение не удалось сериализовать; доставка отбрасывается.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Failed to encode message for event '{event}': {reason}")]
pub struct EncodeError {
    pub event: String,
    pub reason: String,
}

impl ErrorExt for EncodeError {
    fn status_code(&self) -> StatusCode {
        StatusCode::EncodingError
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe closed");
        let err = TransportError::from(io);
        assert_eq!(err.status_code(), StatusCode::Io);
        assert!(err.to_string().contains("pipe closed"));
    }

    #[test]
    fn test_transport_codes() {
        assert!(TransportError::ReadDeadline { after_ms: 10 }
            .status_code()
            .is_transport_error());
        assert!(TransportError::ConnectionClosed
            .status_code()
            .is_transport_error());
    }
}

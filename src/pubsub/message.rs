use bytes::Bytes;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{value::RawValue, Map, Value};
use zvon_error::{ChannelError, EncodeError, ErrorExt};

/// Тип сообщения на проводе (поле `type`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageType {
    Subscribe,
    Unsubscribe,
    ClientEvent,
    ServerEvent,
    ServerError,
}

/// Входящее сообщение клиента.
///
/// `data` хранится в сыром виде и декодируется обработчиком по запросу.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientMessage {
    #[serde(rename = "type")]
    pub kind: MessageType,
    pub channel: String,
    #[serde(default)]
    pub event: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Box<RawValue>>,
}

/// Исходящее событие сервера. Сериализуется один раз на рассылку.
#[derive(Debug, Serialize)]
pub struct ServerMessage<'a, T: Serialize + ?Sized> {
    #[serde(rename = "type")]
    kind: MessageType,
    channel: &'a str,
    event: &'a str,
    data: &'a T,
}

/// Протокольная ошибка, отправляемая клиенту.
///
/// Реализует `std::error::Error`, поэтому обработчик может вернуть её через
/// `anyhow::Error`: при отказе `before-join` клиент получит её без изменений.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[error("{error}")]
pub struct ServerError {
    #[serde(rename = "type")]
    kind: MessageType,
    pub error: String,
    #[serde(default)]
    pub data: Map<String, Value>,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl ClientMessage {
    /// Разбирает входящий кадр.
    ///
    /// Серверные типы (`ServerEvent`, `ServerError`) от клиента не
    /// принимаются.
    pub fn decode(frame: &[u8]) -> Result<Self, ChannelError> {
        let msg: ClientMessage =
            serde_json::from_slice(frame).map_err(|e| ChannelError::MalformedMessage {
                reason: e.to_string(),
            })?;

        match msg.kind {
            MessageType::Subscribe | MessageType::Unsubscribe | MessageType::ClientEvent => {
                Ok(msg)
            }
            other => Err(ChannelError::MalformedMessage {
                reason: format!("{other:?} is not a client message type"),
            }),
        }
    }

    pub fn subscribe(channel: impl Into<String>) -> Self {
        Self::bare(MessageType::Subscribe, channel)
    }

    pub fn unsubscribe(channel: impl Into<String>) -> Self {
        Self::bare(MessageType::Unsubscribe, channel)
    }

    /// Клиентское событие с произвольной полезной нагрузкой.
    pub fn event<T: Serialize + ?Sized>(
        channel: impl Into<String>,
        event: impl Into<String>,
        data: &T,
    ) -> Result<Self, serde_json::Error> {
        let raw = serde_json::value::to_raw_value(data)?;
        Ok(Self {
            kind: MessageType::ClientEvent,
            channel: channel.into(),
            event: event.into(),
            data: Some(raw),
        })
    }

    fn bare(
        kind: MessageType,
        channel: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            channel: channel.into(),
            event: String::new(),
            data: None,
        }
    }

    /// Декодирует `data` в тип приложения. Отсутствующее поле читается как
    /// `null`.
    pub fn data<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        match &self.data {
            Some(raw) => serde_json::from_str(raw.get()),
            None => serde_json::from_str("null"),
        }
    }

    /// Сырой текст полезной нагрузки.
    pub fn raw_data(&self) -> Option<&str> {
        self.data.as_deref().map(RawValue::get)
    }
}

impl<'a, T: Serialize + ?Sized> ServerMessage<'a, T> {
    pub fn new(
        channel: &'a str,
        event: &'a str,
        data: &'a T,
    ) -> Self {
        Self {
            kind: MessageType::ServerEvent,
            channel,
            event,
            data,
        }
    }

    pub fn encode(&self) -> Result<Bytes, EncodeError> {
        serde_json::to_vec(self)
            .map(Bytes::from)
            .map_err(|e| EncodeError {
                event: self.event.to_string(),
                reason: e.to_string(),
            })
    }
}

impl ServerError {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            kind: MessageType::ServerError,
            error: error.into(),
            data: Map::new(),
        }
    }

    /// Добавляет структурированное поле в `data`.
    pub fn with_field(
        mut self,
        key: impl Into<String>,
        value: impl Into<Value>,
    ) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    /// Ошибка, которую вернул обработчик или хук.
    ///
    /// `ServerError` и `ChannelError` внутри `anyhow::Error` сохраняют свою
    /// форму; остальные ошибки превращаются в текст.
    pub fn from_handler_error(err: &anyhow::Error) -> Self {
        if let Some(server_err) = err.downcast_ref::<ServerError>() {
            return server_err.clone();
        }
        if let Some(channel_err) = err.downcast_ref::<ChannelError>() {
            return Self::from(channel_err);
        }
        Self::new(err.to_string())
    }

    pub fn field(
        &self,
        key: &str,
    ) -> Option<&str> {
        self.data.get(key).and_then(Value::as_str)
    }

    pub fn encode(&self) -> Result<Bytes, EncodeError> {
        serde_json::to_vec(self)
            .map(Bytes::from)
            .map_err(|e| EncodeError {
                event: "ServerError".to_string(),
                reason: e.to_string(),
            })
    }
}

////////////////////////////////////////////////////////////////////////////////
// Общие реализации трейтов
////////////////////////////////////////////////////////////////////////////////

impl From<&ChannelError> for ServerError {
    fn from(err: &ChannelError) -> Self {
        err.fields()
            .into_iter()
            .fold(Self::new(err.client_message()), |acc, (k, v)| {
                acc.with_field(k, v)
            })
    }
}

impl From<ChannelError> for ServerError {
    fn from(err: ChannelError) -> Self {
        Self::from(&err)
    }
}

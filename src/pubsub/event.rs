use std::{
    any::{Any, TypeId},
    collections::HashMap,
    fmt,
    sync::Arc,
};

use parking_lot::Mutex;
use serde::{de::DeserializeOwned, Serialize};
use tracing::warn;
use zvon_error::ChannelError;

use super::{Channel, ClientMessage, MessageType, Params, ServerError, ServerMessage};
use crate::network::Connection;

/// Событие подтверждения, которое отправляет [`Event::ack`].
pub const ACK: &str = "__CHANNEL_ACK__";

type DecodeCache = HashMap<TypeId, Arc<dyn Any + Send + Sync>>;

/// Контекст одного вызова обработчика: канал, соединение и исходное
/// сообщение.
///
/// Клонирование дешёвое; клоны разделяют кэш декодированных данных.
#[derive(Clone)]
pub struct Event {
    inner: Arc<EventInner>,
}

struct EventInner {
    channel: Arc<Channel>,
    conn: Arc<Connection>,
    msg: Arc<ClientMessage>,
    decoded: Mutex<DecodeCache>,
}

impl Event {
    pub(crate) fn new(
        channel: Arc<Channel>,
        conn: Arc<Connection>,
        msg: Arc<ClientMessage>,
    ) -> Self {
        Self {
            inner: Arc::new(EventInner {
                channel,
                conn,
                msg,
                decoded: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn channel(&self) -> &Arc<Channel> {
        &self.inner.channel
    }

    pub fn connection(&self) -> &Arc<Connection> {
        &self.inner.conn
    }

    pub fn message(&self) -> &ClientMessage {
        &self.inner.msg
    }

    /// Параметр имени канала; пустая строка, если такого нет.
    pub fn param(
        &self,
        name: &str,
    ) -> &str {
        self.inner.channel.params().param(name)
    }

    pub fn params(&self) -> &Params {
        self.inner.channel.params()
    }

    pub fn event_name(&self) -> &str {
        &self.inner.msg.event
    }

    pub fn kind(&self) -> MessageType {
        self.inner.msg.kind
    }

    /// Полезная нагрузка, декодированная в `T`.
    ///
    /// Результат кэшируется по типу: повторный вызов с тем же `T`
    /// возвращает тот же `Arc` без повторного разбора. Неудачный разбор не
    /// кэшируется.
    pub fn data<T>(&self) -> Result<Arc<T>, ChannelError>
    where
        T: DeserializeOwned + Send + Sync + 'static,
    {
        let key = TypeId::of::<T>();

        if let Some(cached) = self.inner.decoded.lock().get(&key).cloned() {
            if let Ok(value) = cached.downcast::<T>() {
                return Ok(value);
            }
        }

        let decoded = self
            .inner
            .msg
            .data::<T>()
            .map_err(|e| ChannelError::Decode {
                event: self.inner.msg.event.clone(),
                reason: e.to_string(),
            })?;
        let value = Arc::new(decoded);

        self.inner
            .decoded
            .lock()
            .insert(key, Arc::clone(&value) as Arc<dyn Any + Send + Sync>);

        Ok(value)
    }

    /// Событие всем подписчикам канала, включая своё соединение.
    pub fn emit<T: Serialize + ?Sized>(
        &self,
        event: &str,
        data: &T,
    ) -> usize {
        self.inner.channel.emit(event, data)
    }

    /// Событие всем подписчикам, кроме своего соединения.
    pub fn broadcast<T: Serialize + ?Sized>(
        &self,
        event: &str,
        data: &T,
    ) -> usize {
        self.inner
            .channel
            .broadcast(event, data, &self.inner.conn.id())
    }

    /// Событие только своему соединению.
    pub fn send<T: Serialize + ?Sized>(
        &self,
        event: &str,
        data: &T,
    ) -> bool {
        match ServerMessage::new(self.inner.channel.name(), event, data).encode() {
            Ok(bytes) => self.inner.conn.push(bytes),
            Err(err) => {
                warn!(channel = %self.inner.channel.name(), error = %err, "Dropping message");
                false
            }
        }
    }

    pub fn ack<T: Serialize + ?Sized>(
        &self,
        data: &T,
    ) -> bool {
        self.send(ACK, data)
    }

    pub fn error(
        &self,
        err: ServerError,
    ) -> bool {
        self.inner.conn.send_error(err)
    }
}

impl fmt::Debug for Event {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("Event")
            .field("channel", &self.inner.channel.name())
            .field("connection", &self.inner.conn.id())
            .field("kind", &self.inner.msg.kind)
            .field("event", &self.inner.msg.event)
            .finish()
    }
}

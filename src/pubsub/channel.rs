use std::{
    collections::HashMap,
    fmt,
    sync::{Arc, Weak},
};

use bytes::Bytes;
use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, info, trace, warn};
use zvon_error::ChannelError;

use super::{
    factory::{is_lifecycle_event, BEFORE_JOIN, BEFORE_LEAVE, JOIN, LEAVE},
    ChannelFactory, ClientMessage, Event, HandlerResult, Hub, Params, ServerError, ServerMessage,
};
use crate::network::{Connection, ConnectionId};

/// Почему подписка не состоялась.
#[derive(Debug, Clone, PartialEq)]
pub enum JoinError {
    /// Хук `before-join` вернул ошибку; она уходит клиенту.
    Rejected(ServerError),
    /// Канал закрылся между поиском в хабе и подпиской. Имя нужно разрешить
    /// заново: хаб создаст новый экземпляр.
    Closed,
    /// Соединение уже завершается.
    ConnectionClosed,
}

/// Живой экземпляр канала для конкретного имени.
///
/// Состояния: только что открыт (без подписчиков), занят (есть
/// подписчики), закрыт (удалён из хаба). Закрытый канал больше не
/// принимает подписчиков.
pub struct Channel {
    name: String,
    params: Params,
    factory: Arc<ChannelFactory>,
    subscribers: RwLock<Subscribers>,
    hub: Weak<Hub>,
}

#[derive(Default)]
struct Subscribers {
    members: HashMap<ConnectionId, Arc<Connection>>,
    closed: bool,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl Channel {
    pub(crate) fn new(
        name: &str,
        params: Params,
        factory: Arc<ChannelFactory>,
        hub: Weak<Hub>,
    ) -> Self {
        Self {
            name: name.to_string(),
            params,
            factory,
            subscribers: RwLock::new(Subscribers::default()),
            hub,
        }
    }

    /// Конкретное имя канала (`room.42.chat`).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Шаблон фабрики (`room.{id}.chat`).
    pub fn path(&self) -> &str {
        self.factory.path()
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    pub fn factory(&self) -> &Arc<ChannelFactory> {
        &self.factory
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().members.len()
    }

    pub fn is_subscribed(
        &self,
        id: &ConnectionId,
    ) -> bool {
        self.subscribers.read().members.contains_key(id)
    }

    pub fn is_closed(&self) -> bool {
        self.subscribers.read().closed
    }

    /// Подписывает соединение.
    ///
    /// Порядок: `before-join` (ошибка отменяет подписку без изменений
    /// состояния), вставка под эксклюзивной блокировкой и регистрация канала
    /// в соединении, затем `join` (ошибка только логируется). Повторная
    /// подписка уже подписанного соединения ничего не делает.
    pub async fn join(
        self: &Arc<Self>,
        conn: &Arc<Connection>,
        msg: ClientMessage,
    ) -> Result<(), JoinError> {
        if self.is_subscribed(&conn.id()) {
            debug!(channel = %self.name, connection = %conn.id(), "Already subscribed");
            return Ok(());
        }

        let msg = Arc::new(msg);

        if let Some(Err(err)) = self.run_hook(BEFORE_JOIN, conn, &msg).await {
            info!(channel = %self.name, connection = %conn.id(), error = %err, "Join rejected");
            self.close_if_empty(&mut self.subscribers.write());
            return Err(JoinError::Rejected(ServerError::from_handler_error(&err)));
        }

        {
            let mut subs = self.subscribers.write();
            if subs.closed {
                return Err(JoinError::Closed);
            }
            if !conn.add_channel(Arc::clone(self)) {
                self.close_if_empty(&mut subs);
                return Err(JoinError::ConnectionClosed);
            }
            subs.members.insert(conn.id(), Arc::clone(conn));
        }

        debug!(channel = %self.name, connection = %conn.id(), "Connection joined channel");

        if let Some(Err(err)) = self.run_hook(JOIN, conn, &msg).await {
            warn!(channel = %self.name, connection = %conn.id(), error = %err, "Join hook failed");
        }

        Ok(())
    }

    /// Отписывает соединение. Для не-подписчика ничего не делает.
    ///
    /// Если после удаления подписчиков не осталось, канал закрывается и
    /// удаляет себя из хаба. Ошибки хуков логируются и не мешают удалению.
    ///
    /// # Возвращает
    /// - `true`, если соединение было подписчиком и удалено этим вызовом.
    pub async fn leave(
        self: &Arc<Self>,
        conn: &Arc<Connection>,
        msg: ClientMessage,
    ) -> bool {
        if !self.is_subscribed(&conn.id()) {
            trace!(channel = %self.name, connection = %conn.id(), "Leave ignored, not a member");
            return false;
        }

        let msg = Arc::new(msg);

        if let Some(Err(err)) = self.run_hook(BEFORE_LEAVE, conn, &msg).await {
            warn!(channel = %self.name, connection = %conn.id(), error = %err, "Before-leave hook failed");
        }

        {
            let mut subs = self.subscribers.write();
            if subs.members.remove(&conn.id()).is_none() {
                return false;
            }
            self.close_if_empty(&mut subs);
        }

        debug!(channel = %self.name, connection = %conn.id(), "Connection left channel");

        if let Some(Err(err)) = self.run_hook(LEAVE, conn, &msg).await {
            warn!(channel = %self.name, connection = %conn.id(), error = %err, "Leave hook failed");
        }

        conn.remove_channel(self);
        true
    }

    /// Передаёт клиентское событие обработчику фабрики.
    ///
    /// Имена хуков жизненного цикла с провода не принимаются. Ошибка
    /// обработчика логируется; ответ клиенту остаётся на совести
    /// обработчика.
    pub async fn dispatch(
        self: &Arc<Self>,
        conn: &Arc<Connection>,
        msg: ClientMessage,
    ) -> Result<(), ChannelError> {
        let handler = if is_lifecycle_event(&msg.event) {
            None
        } else {
            self.factory.handler(&msg.event)
        };

        let Some(handler) = handler else {
            debug!(channel = %self.name, event = %msg.event, "Handler not available");
            return Err(ChannelError::HandlerNotFound {
                channel: self.name.clone(),
                event: msg.event,
            });
        };

        trace!(channel = %self.name, event = %msg.event, "Handling event");

        let event_name = msg.event.clone();
        let event = Event::new(Arc::clone(self), Arc::clone(conn), Arc::new(msg));
        if let Err(err) = handler.call(event).await {
            warn!(
                channel = %self.name,
                connection = %conn.id(),
                event = %event_name,
                error = %err,
                "Event handler failed"
            );
        }

        Ok(())
    }

    /// Отправляет событие всем подписчикам, включая отправителя.
    ///
    /// # Возвращает
    /// - число подписчиков, в чьи очереди сообщение попало.
    pub fn emit<T: Serialize + ?Sized>(
        &self,
        event: &str,
        data: &T,
    ) -> usize {
        match ServerMessage::new(&self.name, event, data).encode() {
            Ok(bytes) => self.deliver(bytes, None),
            Err(err) => {
                warn!(channel = %self.name, error = %err, "Dropping message");
                0
            }
        }
    }

    /// Как [`Channel::emit`], но без соединения `exclude`.
    pub fn broadcast<T: Serialize + ?Sized>(
        &self,
        event: &str,
        data: &T,
        exclude: &ConnectionId,
    ) -> usize {
        match ServerMessage::new(&self.name, event, data).encode() {
            Ok(bytes) => self.deliver(bytes, Some(exclude)),
            Err(err) => {
                warn!(channel = %self.name, error = %err, "Dropping message");
                0
            }
        }
    }

    /// Неблокирующая раздача уже сериализованного сообщения. Полная очередь
    /// подписчика означает потерю сообщения только для него.
    fn deliver(
        &self,
        bytes: Bytes,
        exclude: Option<&ConnectionId>,
    ) -> usize {
        let targets: Vec<Arc<Connection>> = self
            .subscribers
            .read()
            .members
            .iter()
            .filter(|(id, _)| Some(*id) != exclude)
            .map(|(_, conn)| Arc::clone(conn))
            .collect();

        targets
            .iter()
            .filter(|conn| conn.push(bytes.clone()))
            .count()
    }

    async fn run_hook(
        self: &Arc<Self>,
        hook: &str,
        conn: &Arc<Connection>,
        msg: &Arc<ClientMessage>,
    ) -> Option<HandlerResult> {
        let handler = self.factory.handler(hook)?;
        let event = Event::new(Arc::clone(self), Arc::clone(conn), Arc::clone(msg));
        Some(handler.call(event).await)
    }

    /// Закрывает канал без подписчиков и убирает его из хаба. Вызывается
    /// под блокировкой подписчиков: порядок блокировок канал, затем хаб.
    fn close_if_empty(
        &self,
        subs: &mut Subscribers,
    ) {
        if subs.closed || !subs.members.is_empty() {
            return;
        }

        subs.closed = true;
        debug!(channel = %self.name, "Closing channel");
        if let Some(hub) = self.hub.upgrade() {
            hub.close_channel(self);
        }
    }
}

impl fmt::Debug for Channel {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("Channel")
            .field("name", &self.name)
            .field("path", &self.path())
            .field("params", &self.params)
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

impl fmt::Display for Channel {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "chan:{}", self.name)
    }
}

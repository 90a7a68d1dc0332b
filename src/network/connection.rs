use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use bytes::Bytes;
use futures::{Sink, SinkExt, Stream, StreamExt};
use parking_lot::Mutex;
use tokio::{
    select,
    sync::{
        mpsc::{self, error::TrySendError},
        watch,
    },
    time::{interval_at, timeout, timeout_at, Instant, MissedTickBehavior},
};
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;
use zvon_error::{ChannelError, TransportError};

use super::Frame;
use crate::pubsub::{Channel, ClientMessage, Hub, JoinError, MessageType, ServerError};

/// Идентификатор соединения.
pub type ConnectionId = Uuid;

/// Сколько раз подписка пытается заново разрешить имя, если канал успел
/// закрыться между поиском и вставкой.
const MAX_JOIN_ATTEMPTS: usize = 8;

/// Тайминги и размер очереди одного соединения.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Ёмкость исходящей очереди; при переполнении сообщения отбрасываются
    pub outbound_capacity: usize,
    /// Таймаут записи одного кадра
    pub write_wait: Duration,
    /// Сколько ждать любого входящего кадра
    pub pong_wait: Duration,
    /// Период ping; должен быть меньше `pong_wait`
    pub ping_period: Duration,
}

/// Снимок счётчиков соединения.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectionStats {
    pub frames_received: u64,
    pub messages_queued: u64,
    pub messages_dropped: u64,
    pub frames_written: u64,
}

/// Одно клиентское соединение (сессия).
///
/// Владеет исходящей очередью и набором каналов, на которые подписано.
/// Два контекста: приём (разбор кадров, подписки по порядку, диспетчеризация
/// событий в отдельных задачах) и отправка (очередь, ping, таймауты записи).
/// Завершение выполняется ровно один раз, кто бы его ни инициировал.
pub struct Connection {
    id: ConnectionId,
    hub: Arc<Hub>,
    config: ConnectionConfig,
    outbound: mpsc::Sender<Bytes>,
    pending_outbound: Mutex<Option<mpsc::Receiver<Bytes>>>,
    membership: Mutex<Membership>,
    queue_closed: AtomicBool,
    torn_down: AtomicBool,
    shutdown: watch::Sender<bool>,
    counters: Counters,
}

#[derive(Default)]
struct Membership {
    channels: Vec<Arc<Channel>>,
    closed: bool,
}

#[derive(Default)]
struct Counters {
    frames_received: AtomicU64,
    messages_queued: AtomicU64,
    messages_dropped: AtomicU64,
    frames_written: AtomicU64,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl Connection {
    pub fn new(
        hub: Arc<Hub>,
        config: ConnectionConfig,
    ) -> Arc<Self> {
        let (conn, rx) = Self::build(hub, config);
        *conn.pending_outbound.lock() = Some(rx);
        Arc::new(conn)
    }

    /// Соединение без транспорта: исходящая очередь отдаётся вызывающему.
    /// Сообщения подаются через [`Connection::handle_message`].
    pub fn detached(
        hub: Arc<Hub>,
        config: ConnectionConfig,
    ) -> (Arc<Self>, mpsc::Receiver<Bytes>) {
        let (conn, rx) = Self::build(hub, config);
        (Arc::new(conn), rx)
    }

    fn build(
        hub: Arc<Hub>,
        config: ConnectionConfig,
    ) -> (Self, mpsc::Receiver<Bytes>) {
        let (outbound, rx) = mpsc::channel(config.outbound_capacity.max(1));
        let (shutdown, _) = watch::channel(false);

        let conn = Self {
            id: Uuid::new_v4(),
            hub,
            config,
            outbound,
            pending_outbound: Mutex::new(None),
            membership: Mutex::new(Membership::default()),
            queue_closed: AtomicBool::new(false),
            torn_down: AtomicBool::new(false),
            shutdown,
            counters: Counters::default(),
        };
        (conn, rx)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    pub fn is_closed(&self) -> bool {
        self.torn_down.load(Ordering::Acquire)
    }

    /// Имена каналов, на которые соединение подписано сейчас.
    pub fn channels(&self) -> Vec<String> {
        self.membership
            .lock()
            .channels
            .iter()
            .map(|c| c.name().to_string())
            .collect()
    }

    pub fn channel_count(&self) -> usize {
        self.membership.lock().channels.len()
    }

    pub fn stats(&self) -> ConnectionStats {
        ConnectionStats {
            frames_received: self.counters.frames_received.load(Ordering::Relaxed),
            messages_queued: self.counters.messages_queued.load(Ordering::Relaxed),
            messages_dropped: self.counters.messages_dropped.load(Ordering::Relaxed),
            frames_written: self.counters.frames_written.load(Ordering::Relaxed),
        }
    }

    /// Кладёт готовое сообщение в исходящую очередь, не блокируясь.
    ///
    /// # Возвращает
    /// - `false`, если очередь полна или уже закрыта: сообщение потеряно.
    pub fn push(
        &self,
        frame: Bytes,
    ) -> bool {
        if self.queue_closed.load(Ordering::Acquire) {
            trace!(connection = %self.id, "Outbound queue closed, discarding");
            return false;
        }

        match self.outbound.try_send(frame) {
            Ok(()) => {
                self.counters.messages_queued.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(TrySendError::Full(_)) => {
                self.counters.messages_dropped.fetch_add(1, Ordering::Relaxed);
                debug!(connection = %self.id, "Outbound queue full, dropping message");
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    /// Отправляет протокольную ошибку этому соединению.
    pub fn send_error(
        &self,
        err: ServerError,
    ) -> bool {
        match err.encode() {
            Ok(bytes) => self.push(bytes),
            Err(e) => {
                warn!(connection = %self.id, error = %e, "Dropping error message");
                false
            }
        }
    }

    /// Запоминает подписку. `false`, если соединение уже завершается.
    pub(crate) fn add_channel(
        &self,
        channel: Arc<Channel>,
    ) -> bool {
        let mut membership = self.membership.lock();
        if membership.closed {
            return false;
        }
        membership.channels.push(channel);
        true
    }

    pub(crate) fn remove_channel(
        &self,
        channel: &Channel,
    ) {
        self.membership
            .lock()
            .channels
            .retain(|c| !std::ptr::eq(Arc::as_ptr(c), channel));
    }

    /// Обрабатывает одно клиентское сообщение до конца, включая событие.
    pub async fn handle_message(
        self: &Arc<Self>,
        msg: ClientMessage,
    ) {
        match msg.kind {
            MessageType::Subscribe => self.subscribe(msg).await,
            MessageType::Unsubscribe => self.unsubscribe(msg).await,
            MessageType::ClientEvent => self.client_event(msg).await,
            MessageType::ServerEvent | MessageType::ServerError => {
                debug!(connection = %self.id, kind = ?msg.kind, "Ignoring server message type");
            }
        }
    }

    async fn subscribe(
        self: &Arc<Self>,
        msg: ClientMessage,
    ) {
        for _ in 0..MAX_JOIN_ATTEMPTS {
            let channel = match self.hub.find_or_open_channel(&msg.channel) {
                Ok(channel) => channel,
                Err(err) => {
                    debug!(connection = %self.id, error = %err, "Subscribe failed");
                    self.send_error(ServerError::from(&err));
                    return;
                }
            };

            match channel.join(self, msg.clone()).await {
                Ok(()) => return,
                Err(JoinError::Rejected(err)) => {
                    self.send_error(err);
                    return;
                }
                Err(JoinError::Closed) => {
                    trace!(connection = %self.id, channel = %msg.channel, "Channel closed during join, resolving again");
                }
                Err(JoinError::ConnectionClosed) => return,
            }
        }

        warn!(connection = %self.id, channel = %msg.channel, "Giving up on join after repeated channel closes");
        self.send_error(ServerError::from(ChannelError::Closed {
            channel: msg.channel,
        }));
    }

    async fn unsubscribe(
        self: &Arc<Self>,
        msg: ClientMessage,
    ) {
        match self.hub.find_channel(&msg.channel) {
            Some(channel) => {
                channel.leave(self, msg).await;
            }
            None => {
                self.send_error(ServerError::from(ChannelError::ChannelNotFound {
                    channel: msg.channel,
                }));
            }
        }
    }

    async fn client_event(
        self: &Arc<Self>,
        msg: ClientMessage,
    ) {
        let Some(channel) = self.hub.find_channel(&msg.channel) else {
            self.send_error(ServerError::from(ChannelError::ChannelNotFound {
                channel: msg.channel,
            }));
            return;
        };

        if let Err(err) = channel.dispatch(self, msg).await {
            self.send_error(ServerError::from(&err));
        }
    }

    /// Обслуживает соединение поверх транспорта до его закрытия.
    ///
    /// Возвращается после завершения обоих контекстов и отписки от всех
    /// каналов. Ошибка означает, что соединение оборвал транспорт
    /// (дедлайн чтения, ошибка записи), а не клиент.
    pub async fn serve<R, W>(
        self: Arc<Self>,
        reader: R,
        writer: W,
    ) -> Result<(), TransportError>
    where
        R: Stream<Item = Result<Frame, TransportError>> + Unpin + Send + 'static,
        W: Sink<Frame, Error = TransportError> + Unpin + Send + 'static,
    {
        let Some(outbound) = self.pending_outbound.lock().take() else {
            return Err(TransportError::Protocol {
                reason: "connection is already being served".to_string(),
            });
        };

        info!(connection = %self.id, "Connection established");

        let write_shutdown = self.shutdown.subscribe();
        let read_shutdown = self.shutdown.subscribe();

        let write_task =
            tokio::spawn(Arc::clone(&self).write_loop(writer, outbound, write_shutdown));
        let read_result = self.read_loop(reader, read_shutdown).await;

        self.close().await;

        let write_result = match write_task.await {
            Ok(result) => result,
            Err(e) => {
                error!(connection = %self.id, "Write task failed: {e}");
                Ok(())
            }
        };

        let result = read_result.and(write_result);
        match &result {
            Ok(()) => info!(connection = %self.id, "Connection closed"),
            Err(e) => info!(connection = %self.id, error = %e, "Connection closed by transport error"),
        }
        result
    }

    /// Контекст приёма.
    async fn read_loop<R>(
        self: &Arc<Self>,
        mut reader: R,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), TransportError>
    where
        R: Stream<Item = Result<Frame, TransportError>> + Unpin,
    {
        let mut deadline = Instant::now() + self.config.pong_wait;

        loop {
            let next = select! {
                _ = stopped(&mut shutdown) => return Ok(()),
                next = timeout_at(deadline, reader.next()) => next,
            };

            let frame = match next {
                Err(_) => {
                    warn!(connection = %self.id, "Read deadline exceeded");
                    return Err(TransportError::ReadDeadline {
                        after_ms: self.config.pong_wait.as_millis() as u64,
                    });
                }
                Ok(None) => {
                    debug!(connection = %self.id, "Client closed connection");
                    return Ok(());
                }
                Ok(Some(Err(TransportError::ConnectionClosed))) => return Ok(()),
                Ok(Some(Err(e))) => {
                    debug!(connection = %self.id, error = %e, "Read failed");
                    return Err(e);
                }
                Ok(Some(Ok(frame))) => frame,
            };

            deadline = Instant::now() + self.config.pong_wait;
            self.counters.frames_received.fetch_add(1, Ordering::Relaxed);

            match frame {
                Frame::Text(payload) | Frame::Binary(payload) => self.handle_frame(&payload).await,
                Frame::Ping(_) | Frame::Pong(_) => trace!(connection = %self.id, "Keepalive"),
                Frame::Close => {
                    debug!(connection = %self.id, "Close frame received");
                    return Ok(());
                }
            }
        }
    }

    /// Подписки выполняются на месте и по порядку; события уходят в
    /// отдельные задачи.
    async fn handle_frame(
        self: &Arc<Self>,
        payload: &[u8],
    ) {
        let msg = match ClientMessage::decode(payload) {
            Ok(msg) => msg,
            Err(err) => {
                debug!(connection = %self.id, error = %err, "Malformed message");
                self.send_error(ServerError::from(&err));
                return;
            }
        };

        trace!(connection = %self.id, kind = ?msg.kind, channel = %msg.channel, "Received message");

        if msg.kind == MessageType::ClientEvent {
            let this = Arc::clone(self);
            tokio::spawn(async move { this.client_event(msg).await });
        } else {
            self.handle_message(msg).await;
        }
    }

    /// Контекст отправки.
    async fn write_loop<W>(
        self: Arc<Self>,
        mut writer: W,
        mut outbound: mpsc::Receiver<Bytes>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), TransportError>
    where
        W: Sink<Frame, Error = TransportError> + Unpin,
    {
        let mut ticker = interval_at(
            Instant::now() + self.config.ping_period,
            self.config.ping_period,
        );
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let result = loop {
            select! {
                _ = stopped(&mut shutdown) => break Ok(()),
                next = outbound.recv() => {
                    let Some(bytes) = next else { break Ok(()) };
                    if let Err(e) = self.write_frame(&mut writer, Frame::Text(bytes)).await {
                        break Err(e);
                    }
                }
                _ = ticker.tick() => {
                    trace!(connection = %self.id, "Sending ping");
                    if let Err(e) = self.write_frame(&mut writer, Frame::Ping(Bytes::new())).await {
                        break Err(e);
                    }
                }
            }
        };

        if let Err(e) = &result {
            warn!(connection = %self.id, error = %e, "Write failed, closing connection");
        }

        outbound.close();
        self.signal_shutdown();

        match timeout(self.config.write_wait, writer.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => trace!(connection = %self.id, error = %e, "Transport close failed"),
            Err(_) => trace!(connection = %self.id, "Transport close timed out"),
        }

        result
    }

    async fn write_frame<W>(
        &self,
        writer: &mut W,
        frame: Frame,
    ) -> Result<(), TransportError>
    where
        W: Sink<Frame, Error = TransportError> + Unpin,
    {
        timeout(self.config.write_wait, writer.send(frame))
            .await
            .map_err(|_| TransportError::WriteTimeout {
                after_ms: self.config.write_wait.as_millis() as u64,
            })??;
        self.counters.frames_written.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn signal_shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    /// Завершает соединение: останавливает оба контекста, отписывает от
    /// всех каналов как при явной отписке, закрывает очередь. Повторные
    /// вызовы ничего не делают.
    pub async fn close(self: &Arc<Self>) {
        if self.torn_down.swap(true, Ordering::AcqRel) {
            return;
        }

        debug!(connection = %self.id, "Tearing down connection");
        self.signal_shutdown();

        let channels = {
            let mut membership = self.membership.lock();
            membership.closed = true;
            std::mem::take(&mut membership.channels)
        };

        for channel in channels {
            let msg = ClientMessage::unsubscribe(channel.name());
            channel.leave(self, msg).await;
        }

        self.queue_closed.store(true, Ordering::Release);
    }
}

/// Завершается, когда поднят флаг остановки (в том числе поднятый до
/// вызова).
async fn stopped(shutdown: &mut watch::Receiver<bool>) {
    while !*shutdown.borrow_and_update() {
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            outbound_capacity: 256,
            write_wait: Duration::from_secs(10),
            pong_wait: Duration::from_secs(60),
            ping_period: Duration::from_secs(54),
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("channels", &self.channels())
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};

    use super::*;
    use crate::{
        network::transport::memory::{self, MemoryClient},
        pubsub::{ChannelFactory, Event, HandlerResult},
    };

    fn test_config() -> ConnectionConfig {
        ConnectionConfig {
            outbound_capacity: 16,
            write_wait: Duration::from_secs(1),
            pong_wait: Duration::from_secs(6),
            ping_period: Duration::from_secs(5),
        }
    }

    fn echo_hub() -> Arc<Hub> {
        let hub = Hub::new();
        let mut factory = ChannelFactory::new("echo").unwrap();
        factory
            .handle("say", |event: Event| async move {
                let data = event.data::<Value>()?;
                event.send("said", &*data);
                HandlerResult::Ok(())
            })
            .unwrap();
        hub.register_factory(factory);
        hub
    }

    fn spawn(
        hub: &Arc<Hub>,
        config: ConnectionConfig,
    ) -> (
        Arc<Connection>,
        MemoryClient,
        tokio::task::JoinHandle<Result<(), TransportError>>,
    ) {
        let conn = Connection::new(Arc::clone(hub), config);
        let (client, stream, sink) = memory::pair();
        let task = tokio::spawn(Arc::clone(&conn).serve(stream, sink));
        (conn, client, task)
    }

    #[tokio::test]
    async fn test_subscribe_event_and_disconnect() {
        let hub = echo_hub();
        let (conn, mut client, task) = spawn(&hub, test_config());

        client.send_json(&json!({"type": "Subscribe", "channel": "echo"}));
        client.send_json(&json!({"type": "ClientEvent", "channel": "echo", "event": "say", "data": {"v": 1}}));

        let reply = client.recv_json().await.unwrap();
        assert_eq!(reply["event"], "said");
        assert_eq!(reply["data"]["v"], 1);
        assert_eq!(conn.channels(), vec!["echo".to_string()]);

        client.disconnect();
        task.await.unwrap().unwrap();

        assert!(conn.is_closed());
        assert_eq!(conn.channel_count(), 0);
        assert!(hub.find_channel("echo").is_none());
    }

    /// Мусор на входе даёт ServerError, соединение продолжает работать.
    #[tokio::test]
    async fn test_malformed_message_keeps_session_open() {
        let hub = echo_hub();
        let (_conn, mut client, task) = spawn(&hub, test_config());

        client.send(Frame::text("{not json"));
        let err = client.recv_json().await.unwrap();
        assert_eq!(err["type"], "ServerError");
        assert_eq!(err["error"], "Malformed message");

        client.send_json(&json!({"type": "Unsubscribe", "channel": "nowhere"}));
        let err = client.recv_json().await.unwrap();
        assert_eq!(err["error"], "Channel not found");
        assert_eq!(err["data"]["channel"], "nowhere");

        client.disconnect();
        assert!(task.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_unknown_channel_and_handler_errors() {
        let hub = echo_hub();
        let (_conn, mut client, task) = spawn(&hub, test_config());

        client.send_json(&json!({"type": "Subscribe", "channel": "no.such.factory"}));
        let err = client.recv_json().await.unwrap();
        assert_eq!(err["error"], "Channel not found");

        client.send_json(&json!({"type": "Subscribe", "channel": "echo"}));
        client.send_json(&json!({"type": "ClientEvent", "channel": "echo", "event": "missing"}));
        let err = client.recv_json().await.unwrap();
        assert_eq!(err["error"], "Handler not available for channel");
        assert_eq!(err["data"]["event"], "missing");

        client.disconnect();
        task.await.unwrap().unwrap();
    }

    /// Пинги уходят каждые `ping_period`; молчание дольше `pong_wait`
    /// завершает соединение.
    #[tokio::test(start_paused = true)]
    async fn test_keepalive_ping_and_read_deadline() {
        let hub = echo_hub();
        let (conn, mut client, task) = spawn(&hub, test_config());
        client.send_json(&json!({"type": "Subscribe", "channel": "echo"}));

        let frame = client.recv().await.unwrap();
        assert_eq!(frame, Frame::Ping(Bytes::new()));

        let result = task.await.unwrap();
        assert_eq!(
            result,
            Err(TransportError::ReadDeadline { after_ms: 6000 })
        );
        assert!(conn.is_closed());
        assert!(hub.find_channel("echo").is_none());
        assert_eq!(client.recv().await, None);
    }

    /// Любой входящий кадр сдвигает дедлайн чтения.
    #[tokio::test(start_paused = true)]
    async fn test_pong_extends_deadline() {
        let hub = echo_hub();
        let (conn, mut client, task) = spawn(&hub, test_config());

        for _ in 0..3 {
            tokio::time::sleep(Duration::from_secs(4)).await;
            client.send(Frame::Pong(Bytes::new()));
        }
        tokio::task::yield_now().await;
        assert!(!conn.is_closed());
        assert!(!task.is_finished());

        client.disconnect();
        task.await.unwrap().unwrap();
        while client.recv().await.is_some() {}
    }

    #[tokio::test]
    async fn test_write_error_tears_down() {
        let hub = echo_hub();
        let conn = Connection::new(Arc::clone(&hub), test_config());
        let (client, stream, _sink) = memory::pair();
        // клиент второй пары сразу удалён: любая запись падает
        let (_, _, failing_sink) = memory::pair();
        let task = tokio::spawn(Arc::clone(&conn).serve(stream, failing_sink));

        client.send_json(&json!({"type": "Subscribe", "channel": "nope"}));
        let result = task.await.unwrap();
        assert_eq!(result, Err(TransportError::ConnectionClosed));
        assert!(conn.is_closed());
    }

    #[tokio::test]
    async fn test_push_after_close_is_discarded() {
        let hub = echo_hub();
        let (conn, mut rx) = Connection::detached(Arc::clone(&hub), test_config());

        conn.handle_message(ClientMessage::subscribe("echo")).await;
        assert_eq!(conn.channel_count(), 1);

        conn.close().await;
        conn.close().await;
        assert!(!conn.push(Bytes::from_static(b"{}")));
        assert!(rx.try_recv().is_err());
        assert!(hub.find_channel("echo").is_none());

        // после завершения новые подписки не принимаются
        conn.handle_message(ClientMessage::subscribe("echo")).await;
        assert_eq!(conn.channel_count(), 0);
        assert!(hub.find_channel("echo").is_none());
        assert_eq!(hub.channel_count(), 0);
    }

    #[tokio::test]
    async fn test_serve_twice_is_rejected() {
        let hub = echo_hub();
        let (conn, _rx) = Connection::detached(hub, test_config());
        let (_client, stream, sink) = memory::pair();
        assert!(matches!(
            conn.serve(stream, sink).await,
            Err(TransportError::Protocol { .. })
        ));
    }
}

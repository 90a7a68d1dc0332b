use std::{
    future::Future,
    net::SocketAddr,
    sync::Arc,
    time::Duration,
};

use anyhow::{anyhow, Context, Result};
use dashmap::DashMap;
use futures::{Sink, Stream};
use tokio::{
    net::{TcpListener, TcpStream},
    select,
    sync::Semaphore,
    time::{sleep, timeout, Instant},
};
use tracing::{debug, error, info, warn};
use zvon_error::{ConfigError, TransportError};

use super::{transport::websocket, Connection, ConnectionConfig, ConnectionId, Frame};
use crate::pubsub::{ChannelFactory, ChannelHandler, Hub};

/// Сколько ждать websocket-рукопожатия после accept.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Конфигурация сервера.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Максимальное кол-во одновременных соединений
    pub max_connections: usize,
    /// Настройки каждого соединения
    pub connection: ConnectionConfig,
}

/// Сервер каналов: хаб плюс учёт живых соединений.
///
/// Каналы регистрируются до начала приёма соединений.
#[derive(Debug)]
pub struct RealtimeServer {
    hub: Arc<Hub>,
    config: ServerConfig,
    permits: Arc<Semaphore>,
    sessions: DashMap<ConnectionId, Arc<Connection>>,
}

impl RealtimeServer {
    pub fn new(config: ServerConfig) -> Arc<Self> {
        Arc::new(Self {
            hub: Hub::new(),
            permits: Arc::new(Semaphore::new(config.max_connections)),
            config,
            sessions: DashMap::new(),
        })
    }

    pub fn hub(&self) -> &Arc<Hub> {
        &self.hub
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Регистрирует шаблон канала; обработчики добавляет `handler`.
    pub fn register_channel<H: ChannelHandler>(
        &self,
        pattern: &str,
        handler: H,
    ) -> Result<(), ConfigError> {
        let mut factory = ChannelFactory::new(pattern)?;
        handler.start(&mut factory)?;
        self.register_channel_factory(factory);
        Ok(())
    }

    /// `false`, если такой шаблон уже зарегистрирован.
    pub fn register_channel_factory(
        &self,
        factory: ChannelFactory,
    ) -> bool {
        let path = factory.path().to_string();
        let inserted = self.hub.register_factory(factory);
        if inserted {
            info!("Channel registered: {path}");
        } else {
            warn!("Channel pattern {path} is already registered, ignoring");
        }
        inserted
    }

    /// Текущее кол-во активных соединений.
    pub fn active_connections(&self) -> usize {
        self.sessions.len()
    }

    /// Обслуживает одно соединение поверх готового транспорта до его
    /// закрытия.
    pub async fn serve_connection<R, W>(
        &self,
        reader: R,
        writer: W,
    ) -> Result<(), TransportError>
    where
        R: Stream<Item = Result<Frame, TransportError>> + Unpin + Send + 'static,
        W: Sink<Frame, Error = TransportError> + Unpin + Send + 'static,
    {
        let conn = Connection::new(Arc::clone(&self.hub), self.config.connection.clone());
        let id = conn.id();

        self.sessions.insert(id, Arc::clone(&conn));
        let result = conn.serve(reader, writer).await;
        self.sessions.remove(&id);

        result
    }

    /// Слушает `addr` до завершения `shutdown`.
    pub async fn listen<F>(
        self: Arc<Self>,
        addr: &str,
        shutdown: F,
    ) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind {addr}"))?;
        self.serve_listener(listener, shutdown).await
    }

    /// Цикл приёма на уже открытом сокете. При завершении `shutdown`
    /// закрывает все живые соединения.
    pub async fn serve_listener<F>(
        self: Arc<Self>,
        listener: TcpListener,
        shutdown: F,
    ) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let local_addr = listener.local_addr()?;
        info!("Listening on ws://{local_addr}");

        tokio::pin!(shutdown);

        loop {
            select! {
                _ = &mut shutdown => {
                    info!("Shutdown requested, no longer accepting connections");
                    break;
                }
                accepted = listener.accept() => {
                    let (socket, addr) = match accepted {
                        Ok(pair) => pair,
                        Err(e) => {
                            warn!("Accept failed: {e}");
                            continue;
                        }
                    };

                    // проверяем общий лимит
                    let Ok(permit) = Arc::clone(&self.permits).try_acquire_owned() else {
                        warn!("Maximum connections limit reached, rejecting {addr}");
                        drop(socket);
                        continue;
                    };

                    let server = Arc::clone(&self);
                    tokio::spawn(async move {
                        let _permit = permit;
                        if let Err(e) = server.accept_websocket(socket, addr).await {
                            debug!("Connection from {addr} ended: {e:#}");
                        }
                    });
                }
            }
        }

        self.shutdown().await;
        Ok(())
    }

    async fn accept_websocket(
        &self,
        socket: TcpStream,
        addr: SocketAddr,
    ) -> Result<()> {
        let ws = timeout(HANDSHAKE_TIMEOUT, tokio_tungstenite::accept_async(socket))
            .await
            .map_err(|_| anyhow!("Websocket handshake timed out"))?
            .context("Websocket handshake failed")?;

        debug!("Websocket handshake completed with {addr}");

        let (reader, writer) = websocket::split(ws);
        self.serve_connection(reader, writer).await?;
        Ok(())
    }

    /// Закрывает все живые соединения.
    pub async fn shutdown(&self) {
        let sessions: Vec<_> = self
            .sessions
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();

        info!("Closing {} active connections", sessions.len());
        for conn in sessions {
            conn.close().await;
        }
    }

    /// Ждёт, пока все соединения не завершатся.
    pub async fn wait_for_shutdown(
        &self,
        timeout_duration: Duration,
    ) -> Result<()> {
        let start = Instant::now();

        while self.active_connections() > 0 {
            if start.elapsed() > timeout_duration {
                error!(
                    "Shutdown timeout reached with {} active connections",
                    self.active_connections()
                );
                return Err(anyhow!("Shutdown timeout exceeded"));
            }
            sleep(Duration::from_millis(20)).await;
        }

        info!("All connections closed gracefully");
        Ok(())
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            max_connections: 1024,
            connection: ConnectionConfig::default(),
        }
    }
}

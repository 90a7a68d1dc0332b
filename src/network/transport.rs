//! Граница между соединением и конкретным транспортом.
//!
//! Соединение обслуживается из любой пары
//! `Stream<Item = Result<Frame, TransportError>>` +
//! `Sink<Frame, Error = TransportError>`. Политика keepalive (когда слать
//! ping, когда объявлять дедлайн) живёт в соединении, а не здесь.

use bytes::Bytes;
use zvon_error::TransportError;

/// Один кадр транспорта.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// UTF-8 текст (JSON-сообщение).
    Text(Bytes),
    Binary(Bytes),
    Ping(Bytes),
    Pong(Bytes),
    Close,
}

impl Frame {
    pub fn text(s: impl Into<String>) -> Self {
        Frame::Text(Bytes::from(s.into()))
    }

    /// Полезная нагрузка кадра с данными (`Text`/`Binary`).
    pub fn payload(&self) -> Option<&[u8]> {
        match self {
            Frame::Text(b) | Frame::Binary(b) => Some(b),
            _ => None,
        }
    }
}

pub mod websocket {
    //! Адаптер `tokio-tungstenite`.

    use futures::{future, Sink, SinkExt, Stream, StreamExt};
    use tokio::io::{AsyncRead, AsyncWrite};
    use tokio_tungstenite::{
        tungstenite::{self, Message},
        WebSocketStream,
    };

    use super::*;

    /// Разделяет websocket-поток на половины, совместимые с
    /// [`Connection::serve`](crate::network::Connection::serve).
    pub fn split<S>(
        ws: WebSocketStream<S>
    ) -> (
        impl Stream<Item = Result<Frame, TransportError>> + Unpin + Send,
        impl Sink<Frame, Error = TransportError> + Unpin + Send,
    )
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let (sink, stream) = ws.split();

        let stream = stream.filter_map(|msg| {
            future::ready(match msg {
                Ok(msg) => from_message(msg).map(Ok),
                Err(err) => Some(Err(map_error(err))),
            })
        });

        let sink = sink
            .sink_map_err(map_error)
            .with(|frame: Frame| future::ready(Ok::<_, TransportError>(into_message(frame))));

        (stream, sink)
    }

    fn from_message(msg: Message) -> Option<Frame> {
        match msg {
            Message::Text(text) => Some(Frame::Text(Bytes::from(text))),
            Message::Binary(data) => Some(Frame::Binary(Bytes::from(data))),
            Message::Ping(data) => Some(Frame::Ping(Bytes::from(data))),
            Message::Pong(data) => Some(Frame::Pong(Bytes::from(data))),
            Message::Close(_) => Some(Frame::Close),
            // сырые кадры при чтении не приходят
            Message::Frame(_) => None,
        }
    }

    fn into_message(frame: Frame) -> Message {
        match frame {
            Frame::Text(b) => Message::Text(String::from_utf8_lossy(&b).into_owned()),
            Frame::Binary(b) => Message::Binary(b.to_vec()),
            Frame::Ping(b) => Message::Ping(b.to_vec()),
            Frame::Pong(b) => Message::Pong(b.to_vec()),
            Frame::Close => Message::Close(None),
        }
    }

    fn map_error(err: tungstenite::Error) -> TransportError {
        match err {
            tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => {
                TransportError::ConnectionClosed
            }
            tungstenite::Error::Io(io) => TransportError::from(io),
            other => TransportError::Protocol {
                reason: other.to_string(),
            },
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn test_message_mapping() {
            assert_eq!(
                from_message(Message::Text("{}".into())),
                Some(Frame::text("{}"))
            );
            assert_eq!(
                from_message(Message::Close(None)),
                Some(Frame::Close)
            );
            assert_eq!(
                into_message(Frame::Ping(Bytes::from_static(b"hb"))),
                Message::Ping(b"hb".to_vec())
            );
            assert_eq!(
                into_message(Frame::text("hi")),
                Message::Text("hi".into())
            );
        }

        #[test]
        fn test_error_mapping() {
            assert_eq!(
                map_error(tungstenite::Error::ConnectionClosed),
                TransportError::ConnectionClosed
            );
            let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
            assert!(matches!(
                map_error(tungstenite::Error::Io(io)),
                TransportError::Io(_)
            ));
        }
    }
}

pub mod memory {
    //! Транспорт в памяти поверх `futures::channel::mpsc`: для встраивания
    //! без сети и для тестов.

    use std::time::Duration;

    use futures::{
        channel::mpsc::{self, SendError, UnboundedReceiver, UnboundedSender},
        sink::SinkMapErr,
        StreamExt,
    };
    use serde::Serialize;
    use serde_json::Value;

    use super::*;

    /// Серверная половина: входящие кадры.
    pub type MemoryStream = UnboundedReceiver<Result<Frame, TransportError>>;
    /// Серверная половина: исходящие кадры.
    pub type MemorySink = SinkMapErr<UnboundedSender<Frame>, fn(SendError) -> TransportError>;

    /// Клиентская сторона транспорта в памяти.
    pub struct MemoryClient {
        tx: Option<UnboundedSender<Result<Frame, TransportError>>>,
        rx: UnboundedReceiver<Frame>,
    }

    /// Создаёт связанную пару клиент/сервер.
    pub fn pair() -> (MemoryClient, MemoryStream, MemorySink) {
        let (client_tx, server_rx) = mpsc::unbounded();
        let (server_tx, client_rx) = mpsc::unbounded();

        let sink = futures::SinkExt::sink_map_err(
            server_tx,
            closed as fn(SendError) -> TransportError,
        );

        (
            MemoryClient {
                tx: Some(client_tx),
                rx: client_rx,
            },
            server_rx,
            sink,
        )
    }

    fn closed(_: SendError) -> TransportError {
        TransportError::ConnectionClosed
    }

    impl MemoryClient {
        /// Отправляет кадр серверу. `false`, если сервер уже не читает.
        pub fn send(
            &self,
            frame: Frame,
        ) -> bool {
            self.tx
                .as_ref()
                .is_some_and(|tx| tx.unbounded_send(Ok(frame)).is_ok())
        }

        pub fn send_json<T: Serialize + ?Sized>(
            &self,
            value: &T,
        ) -> bool {
            match serde_json::to_string(value) {
                Ok(text) => self.send(Frame::text(text)),
                Err(_) => false,
            }
        }

        /// Имитирует ошибку чтения на стороне сервера.
        pub fn fail(
            &self,
            err: TransportError,
        ) -> bool {
            self.tx
                .as_ref()
                .is_some_and(|tx| tx.unbounded_send(Err(err)).is_ok())
        }

        /// Закрывает входящее направление: сервер увидит конец потока.
        pub fn disconnect(&mut self) {
            self.tx = None;
        }

        /// Следующий кадр от сервера; `None`, когда сервер закрыл
        /// транспорт.
        pub async fn recv(&mut self) -> Option<Frame> {
            self.rx.next().await
        }

        /// Следующее JSON-сообщение, пропуская служебные кадры.
        pub async fn recv_json(&mut self) -> Option<Value> {
            while let Some(frame) = self.rx.next().await {
                if let Some(payload) = frame.payload() {
                    return serde_json::from_slice(payload).ok();
                }
            }
            None
        }

        /// Как [`MemoryClient::recv_json`], но не дольше `wait`.
        pub async fn recv_json_timeout(
            &mut self,
            wait: Duration,
        ) -> Option<Value> {
            tokio::time::timeout(wait, self.recv_json())
                .await
                .ok()
                .flatten()
        }
    }
}

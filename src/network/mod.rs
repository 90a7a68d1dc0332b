//! Сетевой слой: соединения, транспорт и сервер.
//!
//! - `connection`: одно клиентское соединение (приём, отправка, keepalive).
//! - `transport`: кадры и адаптеры транспорта (websocket, память).
//! - `server`: приём TCP-соединений и учёт живых сессий.

pub mod connection;
pub mod server;
pub mod transport;

pub use connection::{Connection, ConnectionConfig, ConnectionId, ConnectionStats};
pub use server::{RealtimeServer, ServerConfig};
pub use transport::Frame;

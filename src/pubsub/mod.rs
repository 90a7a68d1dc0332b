//! Каналы, фабрики каналов и маршрутизация событий.
//!
//! - `dotpath`: шаблоны имён каналов с параметрами (`room.{id}.chat`).
//! - `factory`: шаблон плюс таблица обработчиков событий.
//! - `channel`: живой экземпляр канала, его подписчики и рассылка.
//! - `hub`: реестр фабрик и открытых каналов.
//! - `event`: контекст вызова обработчика.
//! - `message`: формат сообщений на проводе.

pub mod channel;
pub mod dotpath;
pub mod event;
pub mod factory;
pub mod hub;
pub mod message;

pub use channel::{Channel, JoinError};
pub use dotpath::{DotPath, Param, Params};
pub use event::{Event, ACK};
pub use factory::{
    is_lifecycle_event, ChannelFactory, ChannelHandler, EventHandler, HandlerResult, BEFORE_JOIN,
    BEFORE_LEAVE, JOIN, LEAVE, LIFECYCLE_EVENTS,
};
pub use hub::{Hub, HubStats};
pub use message::{ClientMessage, MessageType, ServerError, ServerMessage};

//! Каналы демонстрационного приложения: чат-комнаты `room.{id}.chat` и
//! литеральный канал `echo`.

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;
use zvon_error::ConfigError;

use crate::pubsub::{ChannelFactory, ChannelHandler, Event, HandlerResult, ServerError};

pub const ROOM_PATTERN: &str = "room.{id}.chat";
pub const ECHO_CHANNEL: &str = "echo";

/// Максимальная длина текста сообщения в чате.
const MAX_TEXT_LEN: usize = 2000;

/// Сообщение чата от клиента.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatMessage {
    pub text: String,
    #[serde(default)]
    pub author: Option<String>,
}

/// Сообщение чата, разосланное комнате.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatPost {
    pub room: String,
    pub from: String,
    pub author: Option<String>,
    pub text: String,
}

/// Чат-комната: подтверждает вход, оповещает остальных о входе и выходе,
/// рассылает сообщения (`message` всем, `msg` всем, кроме автора).
#[derive(Debug, Default)]
pub struct ChatRoom;

impl ChannelHandler for ChatRoom {
    fn start(
        &self,
        factory: &mut ChannelFactory,
    ) -> Result<(), ConfigError> {
        info!("Starting chat room service");

        factory
            .before_join(before_join)?
            .join(on_join)?
            .leave(on_leave)?
            .handle("message", on_message)?
            .handle("msg", on_msg)?;
        Ok(())
    }
}

async fn before_join(event: Event) -> HandlerResult {
    if event.param("id") == "0" {
        return Err(ServerError::new("Room is closed")
            .with_field("room", event.param("id"))
            .into());
    }
    Ok(())
}

async fn on_join(event: Event) -> HandlerResult {
    let id = event.connection().id().to_string();
    info!("Connection {id} joined room {}", event.param("id"));

    event.ack(&json!({"id": id, "status": "joined"}));
    event.broadcast("joined", &json!({"id": id}));
    Ok(())
}

async fn on_leave(event: Event) -> HandlerResult {
    let id = event.connection().id().to_string();
    event.broadcast("person-left", &json!({"id": id}));
    Ok(())
}

/// `message`: сообщение всем участникам, включая автора.
async fn on_message(event: Event) -> HandlerResult {
    if let Some(post) = chat_post(&event)? {
        event.emit("message", &post);
    }
    Ok(())
}

/// `msg`: сообщение остальным участникам, автору эхо не приходит.
async fn on_msg(event: Event) -> HandlerResult {
    if let Some(post) = chat_post(&event)? {
        event.broadcast("msg", &post);
    }
    Ok(())
}

/// Разбирает сообщение чата. `None`, если оно отклонено и клиенту уже
/// отправлена ошибка.
fn chat_post(event: &Event) -> anyhow::Result<Option<ChatPost>> {
    let msg = event.data::<ChatMessage>()?;

    if msg.text.len() > MAX_TEXT_LEN {
        event.error(
            ServerError::new("Message too long")
                .with_field("limit", MAX_TEXT_LEN)
                .with_field("channel", event.channel().name()),
        );
        return Ok(None);
    }

    Ok(Some(ChatPost {
        room: event.param("id").to_string(),
        from: event.connection().id().to_string(),
        author: msg.author.clone(),
        text: msg.text.clone(),
    }))
}

/// Канал `echo`: событие `say` возвращается только отправителю.
pub fn echo_factory() -> Result<ChannelFactory, ConfigError> {
    let mut factory = ChannelFactory::new(ECHO_CHANNEL)?;
    factory.handle("say", |event: Event| async move {
        let data = event.data::<serde_json::Value>()?;
        event.send("said", &*data);
        HandlerResult::Ok(())
    })?;
    Ok(factory)
}

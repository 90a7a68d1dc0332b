use std::{
    collections::HashMap,
    fmt,
    future::Future,
    sync::{Arc, Weak},
};

use async_trait::async_trait;
use zvon_error::ConfigError;

use super::{Channel, DotPath, Event, Hub, Params};

/// Хук перед подпиской. Ошибка отменяет подписку.
pub const BEFORE_JOIN: &str = "__CHANNEL_BEFORE_JOIN__";
/// Хук после подписки. Ошибка только логируется.
pub const JOIN: &str = "__CHANNEL_JOIN__";
/// Хук перед отпиской.
pub const BEFORE_LEAVE: &str = "__CHANNEL_BEFORE_LEAVE__";
/// Хук после отписки.
pub const LEAVE: &str = "__CHANNEL_LEAVE__";

/// Зарезервированные имена событий жизненного цикла. С провода как
/// клиентские события не принимаются.
pub const LIFECYCLE_EVENTS: [&str; 4] = [BEFORE_JOIN, JOIN, BEFORE_LEAVE, LEAVE];

/// Результат обработчика события.
pub type HandlerResult = anyhow::Result<()>;

/// Обработчик события канала.
///
/// Реализован для любых замыканий `Fn(Event) -> impl Future<Output =
/// HandlerResult>`, поэтому регистрировать можно и функции, и структуры.
#[async_trait]
pub trait EventHandler: Send + Sync + 'static {
    async fn call(
        &self,
        event: Event,
    ) -> HandlerResult;
}

/// Объект приложения, который наполняет фабрику обработчиками.
pub trait ChannelHandler {
    fn start(
        &self,
        factory: &mut ChannelFactory,
    ) -> Result<(), ConfigError>;
}

/// Шаблон канала и таблица его обработчиков.
///
/// Таблица заполняется через `&mut self` до регистрации в хабе; после
/// этого фабрика живёт за `Arc` и только читается.
pub struct ChannelFactory {
    path: DotPath,
    handlers: HashMap<String, Arc<dyn EventHandler>>,
}

#[async_trait]
impl<F, Fut> EventHandler for F
where
    F: Fn(Event) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    async fn call(
        &self,
        event: Event,
    ) -> HandlerResult {
        (self)(event).await
    }
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl ChannelFactory {
    pub fn new(pattern: &str) -> Result<Self, ConfigError> {
        Ok(Self {
            path: DotPath::new(pattern)?,
            handlers: HashMap::new(),
        })
    }

    /// Регистрирует обработчик события.
    ///
    /// # Ошибки
    /// - [`ConfigError::EmptyEvent`] для пустого имени;
    /// - [`ConfigError::DuplicateHandler`] если имя уже занято (включая
    ///   хуки жизненного цикла).
    pub fn handle<H: EventHandler>(
        &mut self,
        event: &str,
        handler: H,
    ) -> Result<&mut Self, ConfigError> {
        if event.is_empty() {
            return Err(ConfigError::EmptyEvent {
                pattern: self.path().to_string(),
            });
        }

        if self.handlers.contains_key(event) {
            return Err(ConfigError::DuplicateHandler {
                pattern: self.path().to_string(),
                event: event.to_string(),
            });
        }

        self.handlers.insert(event.to_string(), Arc::new(handler));
        Ok(self)
    }

    pub fn before_join<H: EventHandler>(
        &mut self,
        handler: H,
    ) -> Result<&mut Self, ConfigError> {
        self.handle(BEFORE_JOIN, handler)
    }

    pub fn join<H: EventHandler>(
        &mut self,
        handler: H,
    ) -> Result<&mut Self, ConfigError> {
        self.handle(JOIN, handler)
    }

    pub fn before_leave<H: EventHandler>(
        &mut self,
        handler: H,
    ) -> Result<&mut Self, ConfigError> {
        self.handle(BEFORE_LEAVE, handler)
    }

    pub fn leave<H: EventHandler>(
        &mut self,
        handler: H,
    ) -> Result<&mut Self, ConfigError> {
        self.handle(LEAVE, handler)
    }

    /// Обработчик события, если он зарегистрирован.
    pub fn handler(
        &self,
        event: &str,
    ) -> Option<Arc<dyn EventHandler>> {
        self.handlers.get(event).cloned()
    }

    pub fn has_handler(
        &self,
        event: &str,
    ) -> bool {
        self.handlers.contains_key(event)
    }

    /// Имена зарегистрированных событий (порядок не определён).
    pub fn events(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }

    pub fn path(&self) -> &str {
        self.path.path()
    }

    pub fn dotpath(&self) -> &DotPath {
        &self.path
    }

    pub fn matches(
        &self,
        topic: &str,
    ) -> Option<Params> {
        self.path.matches(topic)
    }

    pub(crate) fn new_channel(
        self: &Arc<Self>,
        name: &str,
        params: Params,
        hub: Weak<Hub>,
    ) -> Arc<Channel> {
        Arc::new(Channel::new(name, params, Arc::clone(self), hub))
    }
}

/// `true` для имён, зарезервированных под хуки.
pub fn is_lifecycle_event(event: &str) -> bool {
    LIFECYCLE_EVENTS.contains(&event)
}

impl fmt::Debug for ChannelFactory {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        let mut events: Vec<_> = self.events().collect();
        events.sort_unstable();
        f.debug_struct("ChannelFactory")
            .field("path", &self.path())
            .field("events", &events)
            .finish()
    }
}

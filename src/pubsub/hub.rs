use std::{
    collections::HashMap,
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use parking_lot::RwLock;
use tracing::{debug, trace};
use zvon_error::{ChannelError, ZvonResult};

use super::{Channel, ChannelFactory, Params};

/// Реестр фабрик и открытых каналов.
///
/// Один экземпляр на сервер. Открытые каналы индексируются по конкретному
/// имени; на одно имя в каждый момент приходится не более одного живого
/// экземпляра.
#[derive(Default)]
pub struct Hub {
    factories: RwLock<Vec<Arc<ChannelFactory>>>,
    channels: RwLock<HashMap<String, Arc<Channel>>>,
    stats: HubCounters,
}

#[derive(Default)]
struct HubCounters {
    opened: AtomicU64,
    closed: AtomicU64,
}

/// Снимок счётчиков хаба.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HubStats {
    pub factories: usize,
    pub open_channels: usize,
    pub channels_opened: u64,
    pub channels_closed: u64,
}

impl Hub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Добавляет фабрику. Фабрики проверяются в порядке регистрации.
    ///
    /// # Возвращает
    /// - `false`, если фабрика с таким же шаблоном уже есть; она остаётся.
    pub fn register_factory(
        &self,
        factory: impl Into<Arc<ChannelFactory>>,
    ) -> bool {
        let factory = factory.into();
        let mut factories = self.factories.write();
        if factories.iter().any(|f| f.path() == factory.path()) {
            debug!("Channel factory {} already registered", factory.path());
            return false;
        }
        debug!("Registered channel factory {}", factory.path());
        factories.push(factory);
        true
    }

    /// Фабрика для имени канала.
    ///
    /// Если подходит несколько шаблонов, побеждает самый конкретный (с
    /// наименьшим числом параметров); при равенстве выигрывает
    /// зарегистрированный раньше.
    pub fn find_factory(
        &self,
        name: &str,
    ) -> Option<(Arc<ChannelFactory>, Params)> {
        let factories = self.factories.read();
        let mut best: Option<(&Arc<ChannelFactory>, Params)> = None;

        for factory in factories.iter() {
            let Some(params) = factory.matches(name) else {
                continue;
            };
            let better = match &best {
                Some((current, _)) => {
                    factory.dotpath().param_count() < current.dotpath().param_count()
                }
                None => true,
            };
            if better {
                best = Some((factory, params));
            }
        }

        best.map(|(factory, params)| (Arc::clone(factory), params))
    }

    /// Открытый канал по имени. Никогда не создаёт новый.
    pub fn find_channel(
        &self,
        name: &str,
    ) -> Option<Arc<Channel>> {
        self.channels.read().get(name).cloned()
    }

    /// Открытый канал по имени или новый экземпляр из подходящей фабрики.
    ///
    /// Конкурентные вызовы для одного имени получают один и тот же
    /// экземпляр.
    pub fn find_or_open_channel(
        self: &Arc<Self>,
        name: &str,
    ) -> ZvonResult<Arc<Channel>> {
        if let Some(channel) = self.find_channel(name) {
            return Ok(channel);
        }

        let mut channels = self.channels.write();
        if let Some(channel) = channels.get(name) {
            return Ok(Arc::clone(channel));
        }

        let Some((factory, params)) = self.find_factory(name) else {
            trace!("No factory matches channel {name}");
            return Err(ChannelError::NoMatchingFactory {
                channel: name.to_string(),
            });
        };

        let channel = factory.new_channel(name, params, Arc::downgrade(self));
        channels.insert(name.to_string(), Arc::clone(&channel));
        self.stats.opened.fetch_add(1, Ordering::Relaxed);
        debug!("Opened channel {name} from {}", factory.path());

        Ok(channel)
    }

    /// Удаляет канал из реестра, если под его именем зарегистрирован
    /// именно этот экземпляр.
    pub fn close_channel(
        &self,
        channel: &Channel,
    ) -> bool {
        let mut channels = self.channels.write();
        let same = channels
            .get(channel.name())
            .is_some_and(|current| std::ptr::eq(Arc::as_ptr(current), channel));
        if !same {
            trace!("Channel {} already replaced or removed", channel.name());
            return false;
        }

        channels.remove(channel.name());
        self.stats.closed.fetch_add(1, Ordering::Relaxed);
        debug!("Closed channel {}", channel.name());
        true
    }

    pub fn channel_count(&self) -> usize {
        self.channels.read().len()
    }

    pub fn factory_count(&self) -> usize {
        self.factories.read().len()
    }

    /// Имена открытых каналов (порядок не определён).
    pub fn channel_names(&self) -> Vec<String> {
        self.channels.read().keys().cloned().collect()
    }

    pub fn stats(&self) -> HubStats {
        HubStats {
            factories: self.factory_count(),
            open_channels: self.channel_count(),
            channels_opened: self.stats.opened.load(Ordering::Relaxed),
            channels_closed: self.stats.closed.load(Ordering::Relaxed),
        }
    }
}

/// Печатает только имена: форматирование не заходит в каналы и не берёт их
/// блокировки.
impl fmt::Debug for Hub {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        let factories: Vec<String> = self
            .factories
            .read()
            .iter()
            .map(|f| f.path().to_string())
            .collect();
        let mut channels = self.channel_names();
        channels.sort_unstable();

        f.debug_struct("Hub")
            .field("factories", &factories)
            .field("channels", &channels)
            .field("stats", &self.stats())
            .finish()
    }
}

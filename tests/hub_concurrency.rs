use std::sync::Arc;

use futures::future::join_all;
use zvon::{ChannelFactory, ClientMessage, Connection, ConnectionConfig, Hub};

const CONNECTIONS: usize = 32;

fn hub() -> Arc<Hub> {
    let hub = Hub::new();
    hub.register_factory(ChannelFactory::new("lobby.{n}").unwrap());
    hub
}

/// Тест проверяет, что одновременная подписка многих соединений на одно
/// имя даёт один экземпляр канала, а уход последнего закрывает его.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_join_shares_one_channel() {
    let hub = hub();
    let (conns, _queues): (Vec<_>, Vec<_>) = (0..CONNECTIONS)
        .map(|_| Connection::detached(Arc::clone(&hub), ConnectionConfig::default()))
        .unzip();

    let joins = conns.iter().map(|conn| {
        let conn = Arc::clone(conn);
        tokio::spawn(async move { conn.handle_message(ClientMessage::subscribe("lobby.1")).await })
    });
    for result in join_all(joins).await {
        result.unwrap();
    }

    assert_eq!(hub.channel_count(), 1);
    let channel = hub.find_channel("lobby.1").unwrap();
    assert_eq!(channel.subscriber_count(), CONNECTIONS);
    assert_eq!(channel.params().get("n"), Some("1"));
    for conn in &conns {
        assert_eq!(conn.channels(), vec!["lobby.1".to_string()]);
    }

    let closes = conns.iter().map(|conn| {
        let conn = Arc::clone(conn);
        tokio::spawn(async move { conn.close().await })
    });
    for result in join_all(closes).await {
        result.unwrap();
    }

    assert!(channel.is_closed());
    assert_eq!(hub.channel_count(), 0);
    let stats = hub.stats();
    assert_eq!(stats.channels_opened, 1);
    assert_eq!(stats.channels_closed, 1);
}

/// Подписки и отписки вперемешку: каналы многократно открываются и
/// закрываются, но после ухода всех хаб пуст.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_join_leave_churn_leaves_hub_empty() {
    let hub = hub();
    let names = ["lobby.1", "lobby.2", "lobby.3"];

    let tasks = (0..8).map(|i| {
        let hub = Arc::clone(&hub);
        tokio::spawn(async move {
            let (conn, mut queue) = Connection::detached(hub, ConnectionConfig::default());
            for round in 0..50 {
                let name = names[(i + round) % names.len()];
                conn.handle_message(ClientMessage::subscribe(name)).await;
                conn.handle_message(ClientMessage::unsubscribe(name)).await;
                while queue.try_recv().is_ok() {}
            }
            assert_eq!(conn.channel_count(), 0);
            conn.close().await;
        })
    });
    for result in join_all(tasks).await {
        result.unwrap();
    }

    assert_eq!(hub.channel_count(), 0);
    let stats = hub.stats();
    assert_eq!(stats.channels_opened, stats.channels_closed);
    assert!(stats.channels_opened >= 1);
}

/// Закрытое соединение не может подписаться, и открытый для него канал не
/// остаётся в хабе.
#[tokio::test]
async fn test_closed_connection_cannot_join() {
    let hub = hub();
    let (conn, _queue) = Connection::detached(Arc::clone(&hub), ConnectionConfig::default());
    conn.close().await;

    conn.handle_message(ClientMessage::subscribe("lobby.5")).await;

    assert_eq!(conn.channel_count(), 0);
    assert!(hub.find_channel("lobby.5").is_none());
    assert_eq!(hub.channel_count(), 0);
}

use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use tracing::{error, info};
use zvon::{
    demo::{self, ChatRoom},
    init_logging, RealtimeServer, Settings,
};

/// Аргументы командной строки. Заданные значения перекрывают настройки из
/// файла и окружения.
#[derive(Debug, Parser)]
#[command(name = "zvon")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Realtime channel server over websockets", long_about = None)]
struct Cli {
    /// Адрес для приёма соединений (host:port)
    #[arg(short, long, env = "ZVON_LISTEN_ADDRESS")]
    listen: Option<String>,

    /// Путь к файлу настроек (toml, yaml, json)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Уровень логирования: trace, debug, info, warn, error
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut settings =
        Settings::load_from(cli.config.as_deref()).context("Failed to load settings")?;
    if let Some(listen) = cli.listen {
        settings.listen_address = listen;
    }
    if let Some(level) = cli.log_level {
        settings.logging.level = level.to_lowercase();
    }
    settings.validate()?;

    let logging = init_logging(settings.logging.clone()).map_err(|e| anyhow!(e))?;

    let server = RealtimeServer::new(settings.server_config());
    server.register_channel(demo::ROOM_PATTERN, ChatRoom)?;
    server.register_channel_factory(demo::echo_factory()?);

    let result = server
        .clone()
        .listen(&settings.listen_address, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for Ctrl-C: {e}");
            }
        })
        .await;

    if let Err(e) = server.wait_for_shutdown(settings.connection_config().write_wait).await {
        error!("{e}");
    }

    info!("Server stopped");
    logging.shutdown();
    result
}

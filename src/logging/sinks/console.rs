use std::io::{self, Stdout};

use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::Layer,
    registry::LookupSpan,
};

use crate::logging::config::{ConsoleConfig, LogFormat};

/// Консольный слой в выбранном формате. Тип стирается в `Box`, чтобы
/// форматы были взаимозаменяемы.
pub fn layer<S>(config: &ConsoleConfig) -> Box<dyn Layer<S> + Send + Sync>
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
{
    let writer: fn() -> Stdout = io::stdout;

    let base = fmt::layer()
        .with_writer(writer)
        .with_ansi(config.with_ansi)
        .with_target(config.with_target)
        .with_thread_ids(config.with_thread_ids)
        .with_line_number(config.with_line_numbers);

    match config.format {
        LogFormat::Json => Box::new(base.json().with_current_span(true)),
        LogFormat::Pretty => Box::new(base.pretty().with_span_events(FmtSpan::CLOSE)),
        LogFormat::Compact => Box::new(base.compact()),
    }
}

#[cfg(test)]
mod tests {
    use tracing::info;
    use tracing_subscriber::{prelude::*, registry::Registry};

    use super::*;

    /// Каждый формат строится и принимает события без паники.
    #[test]
    fn test_every_format_builds_and_logs() {
        for format in [LogFormat::Pretty, LogFormat::Compact, LogFormat::Json] {
            for with_ansi in [true, false] {
                let cfg = ConsoleConfig {
                    format,
                    with_ansi,
                    ..Default::default()
                };
                let subscriber = Registry::default().with(layer::<Registry>(&cfg));
                tracing::subscriber::with_default(subscriber, || {
                    info!(?format, with_ansi, "console layer smoke test");
                });
            }
        }
    }
}

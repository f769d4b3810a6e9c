//! Tracing subscriber setup and custom event format.

use tracing_subscriber::EnvFilter;

// Local-time timestamp for log lines: "YYYY-MM-DD HH:MM:SS"
struct LocalTimeFormatter;

impl tracing_subscriber::fmt::time::FormatTime for LocalTimeFormatter {
    fn format_time(&self, w: &mut tracing_subscriber::fmt::format::Writer<'_>) -> std::fmt::Result {
        write!(w, "{}", chrono::Local::now().format("%Y-%m-%d %H:%M:%S"))
    }
}

// Event format: "YYYY-MM-DD HH:MM:SS [LEVEL] message", level colorized.
struct EventFormat;

impl<S, N> tracing_subscriber::fmt::FormatEvent<S, N> for EventFormat
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
    N: for<'a> tracing_subscriber::fmt::FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &tracing_subscriber::fmt::FmtContext<'_, S, N>,
        mut writer: tracing_subscriber::fmt::format::Writer<'_>,
        event: &tracing::Event<'_>,
    ) -> std::fmt::Result {
        use tracing_subscriber::fmt::time::FormatTime;

        LocalTimeFormatter.format_time(&mut writer)?;
        write!(writer, " ")?;

        let level = event.metadata().level();
        let color = match *level {
            tracing::Level::TRACE => "\x1b[2m",
            tracing::Level::DEBUG => "\x1b[34m",
            tracing::Level::INFO => "\x1b[32m",
            tracing::Level::WARN => "\x1b[33m",
            tracing::Level::ERROR => "\x1b[31m",
        };
        write!(writer, "{}[{}]\x1b[0m ", color, level)?;

        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

/// Map a user-facing log level name to a tracing filter directive.
pub fn filter_for_level(level: &str) -> &'static str {
    match level.to_lowercase().as_str() {
        "trace" => "trace",
        "debug" => "debug",
        "info" => "info",
        "warn" | "warning" => "warn",
        "error" | "critical" => "error",
        other => {
            eprintln!(
                "Invalid log level '{}'. Using INFO. Valid levels: TRACE, DEBUG, INFO, WARN, ERROR",
                other
            );
            "info"
        }
    }
}

pub fn init_tracing(filter: &str) {
    use tracing_subscriber::prelude::*;

    tracing_subscriber::registry()
        .with(EnvFilter::new(filter))
        .with(
            tracing_subscriber::fmt::layer()
                .with_timer(LocalTimeFormatter)
                .with_target(false)
                .event_format(EventFormat),
        )
        .init();
}

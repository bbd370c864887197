#![deny(clippy::future_not_send)]

pub mod formats;

use tracing_subscriber::{fmt::format::FmtSpan, EnvFilter};

/// Installs the process-wide tracing subscriber, mapping the plain `log`
/// facade used by vendored transport code onto `tracing` as well. Every
/// `{component}: {message}` log line the component design calls for is a
/// `tracing` event with `component` set as a span field.
pub fn init_logging() {
    tracing_log::LogTracer::init().ok();
    let env = std::env::var(EnvFilter::DEFAULT_ENV).unwrap_or_else(|_| "info".to_owned());
    let subscriber = tracing_subscriber::FmtSubscriber::builder()
        .with_span_events(FmtSpan::ENTER | FmtSpan::CLOSE)
        .with_env_filter(EnvFilter::new(env))
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber).ok();
}

use tracing::Span;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};
use crate::config::LoggingConfig;
use crate::types::RequestKind;

/// Installs the global subscriber. `RUST_LOG` overrides the configured level.
pub fn init_tracing(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.level));
    let registry = tracing_subscriber::registry().with(filter);

    let result = if config.json {
        registry
            .with(fmt::layer().json().with_current_span(true))
            .try_init()
    } else {
        registry
            .with(fmt::layer().with_target(true))
            .try_init()
    };

    if let Err(e) = result {
        tracing::debug!("Tracing subscriber already installed: {}", e);
    }
}

pub fn trace_tick(job: &str) -> Span {
    tracing::info_span!(
        "tick",
        job = %job,
    )
}

pub fn trace_exchange_request(exchange: &str, kind: RequestKind) -> Span {
    tracing::info_span!(
        "exchange_request",
        exchange = %exchange,
        kind = %kind,
    )
}

//! services/proxy/src/telemetry.rs
//!
//! Structured logging setup.

use tracing::Level;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// The filter used for a configured level. Chatty dependencies are held at `warn`.
pub fn filter_directives(level: Level) -> String {
    format!("{level},sqlx=warn,hyper=warn,hyper_util=warn,reqwest=warn")
}

/// Installs the global subscriber. Call once, before anything logs.
pub fn init_tracing(level: Level) {
    let env_filter = EnvFilter::new(filter_directives(level));

    let fmt_layer = fmt::layer().with_target(true);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}

//! Structured logging and panic-hook bootstrap.
//!
//! Grounded on `observe::tracing::initialize`/`observe::panic_hook::install`
//! (Cargo.toml-only in this workspace — `observe` pulls in OpenTelemetry
//! exporters this binary has no use for) reimplemented with the
//! `tracing-subscriber` dependency this crate actually carries.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initializes the global `tracing` subscriber. `log_filter` is an
/// `EnvFilter` directive string (e.g. `info` or `watch_tower=debug,warn`);
/// `LOG_LEVEL` is consulted by the CLI layer via `clap(env)`, not here.
/// `json` selects `tracing-subscriber`'s JSON formatter for log aggregation
/// in an orchestrated deployment, as an alternative to the human-readable
/// compact format.
pub fn initialize(log_filter: &str, json: bool) {
    let env_filter = EnvFilter::try_new(log_filter).unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(env_filter);
    if json {
        registry.with(fmt::layer().json().with_timer(fmt::time::UtcTime::rfc_3339())).init();
    } else {
        registry.with(fmt::layer().with_timer(fmt::time::UtcTime::rfc_3339())).init();
    }
}

/// Installs a panic hook that logs panics through `tracing` (so they land in
/// the same sink/aggregation pipeline as everything else) before the default
/// hook prints to stderr.
pub fn install_panic_hook() {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        tracing::error!(%info, "panic");
        default_hook(info);
    }));
}

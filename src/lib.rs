//! Watches conditional-order contracts on one or more EVM chains and
//! bridges satisfiable orders into an off-chain order-book.

pub mod arguments;
pub mod block_processor;
pub mod chain_watcher;
pub mod domain;
pub mod event_source;
pub mod health;
pub mod infra;
pub mod order_poller;
pub mod run;
pub mod shutdown;

use clap::Parser;

/// Parses CLI arguments, initializes logging, and hands off to [`run::start`].
/// `args` mirrors `std::env::args`, injected so tests can drive the CLI
/// without touching the real process environment.
pub async fn start(args: impl Iterator<Item = String>) -> anyhow::Result<()> {
    let arguments = arguments::Arguments::parse_from(args);

    infra::observability::initialize(&arguments.common.log_level, arguments.common.log_json);
    infra::observability::install_panic_hook();
    tracing::info!("{}", arguments);

    run::start(arguments).await
}

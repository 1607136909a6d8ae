//! CLI surface: `run`, `run-multi`, `dump-db`, `replay-block`, `replay-tx`,
//! plus the shared flags every command accepts.
//!
//! Grounded on `autopilot::arguments::Arguments` (flattened shared argument
//! groups, `#[clap(long, env)]` on every flag) and `driver::arguments`'s
//! manual `Display` impl that redacts secrets before logging the parsed
//! arguments.

use {clap::Parser, std::time::Duration, url::Url};

#[derive(Debug, Parser)]
#[clap(version, about = "Bridges on-chain conditional orders to an off-chain order-book.")]
pub struct Arguments {
    #[clap(flatten)]
    pub common: CommonArguments,

    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Debug, clap::Subcommand)]
pub enum Command {
    /// Watch a single chain.
    Run(RunArguments),
    /// Watch several chains in the same process, sharing one registry store.
    RunMulti(RunMultiArguments),
    /// Emit the current registry for one chain as JSON on standard out.
    DumpDb {
        #[clap(long)]
        chain_id: u64,
    },
    /// Re-run the Block Processor against a single historical block.
    ReplayBlock {
        #[clap(long)]
        rpc: Url,
        #[clap(long)]
        block: u64,
    },
    /// Re-run the Block Processor against the block containing a single
    /// historical transaction.
    ReplayTx {
        #[clap(long)]
        rpc: Url,
        #[clap(long)]
        tx: crate::domain::eth::H256,
    },
}

#[derive(Debug, clap::Args)]
pub struct RunArguments {
    #[clap(long, env)]
    pub rpc: Url,
    #[clap(long, env)]
    pub deployment_block: u64,
    /// Restricts ingestion to conditional orders whose owner is in this
    /// list. Empty means "no restriction".
    #[clap(long, env, use_value_delimiter = true)]
    pub addresses: Vec<crate::domain::eth::Address>,
}

#[derive(Debug, clap::Args)]
pub struct RunMultiArguments {
    /// One RPC URL per chain, equal length to `--deployment-block`.
    #[clap(long, env, use_value_delimiter = true)]
    pub rpc: Vec<Url>,
    #[clap(long, env, use_value_delimiter = true)]
    pub deployment_block: Vec<u64>,
}

#[derive(Debug, Parser)]
pub struct CommonArguments {
    #[clap(long, env, default_value = "5000")]
    pub page_size: u64,

    #[clap(
        long,
        env,
        default_value = "30s",
        value_parser = humantime::parse_duration,
    )]
    pub watchdog_timeout: Duration,

    /// Suppresses order-book submissions; the core still runs the full
    /// pipeline, logging what it would have submitted.
    #[clap(long, env)]
    pub dry_run: bool,

    /// Warms up and then exits instead of entering live tail.
    #[clap(long, env)]
    pub one_shot: bool,

    /// Disables the Slack/Sentry notification sinks.
    #[clap(long, env)]
    pub silent: bool,

    #[clap(long, env)]
    pub slack_webhook: Option<Url>,

    #[clap(long, env, default_value = "./database")]
    pub database_path: std::path::PathBuf,

    #[clap(long, env, default_value = "8080")]
    pub api_port: u16,

    #[clap(long, env)]
    pub disable_api: bool,

    #[clap(long, env, default_value = "INFO")]
    pub log_level: String,

    /// Emits logs as newline-delimited JSON instead of the human-readable
    /// compact format, for ingestion by a log aggregator.
    #[clap(long, env)]
    pub log_json: bool,

    #[clap(long, env, default_value = "https://api.cow.fi/")]
    pub orderbook_base_url: Url,

    #[clap(long, env, default_value = "https://raw.githubusercontent.com/cowprotocol/watch-tower/main/filter-policy.json")]
    pub filter_policy_url: Url,

    #[clap(
        long,
        env,
        default_value = "1h",
        value_parser = humantime::parse_duration,
    )]
    pub filter_policy_reload_interval: Duration,

    /// Drives the Order Poller every Nth block.
    #[clap(long, env, default_value = "1")]
    pub process_every_num_blocks: u64,

    #[clap(long, env, default_value = "5")]
    pub orderbook_max_attempts: u32,

    /// Set when running under an orchestrator (e.g. Kubernetes) that
    /// restarts crashed pods; changes watchdog-expiry behaviour from
    /// "exit the process" to "report unhealthy and keep running".
    #[clap(long, env)]
    pub running_in_pod: bool,
}

impl std::fmt::Display for Arguments {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "page_size: {}", self.common.page_size)?;
        writeln!(f, "watchdog_timeout: {:?}", self.common.watchdog_timeout)?;
        writeln!(f, "dry_run: {}", self.common.dry_run)?;
        writeln!(f, "one_shot: {}", self.common.one_shot)?;
        writeln!(f, "silent: {}", self.common.silent)?;
        writeln!(
            f,
            "slack_webhook: {}",
            self.common.slack_webhook.as_ref().map(|_| "SECRET").unwrap_or("None")
        )?;
        writeln!(f, "database_path: {}", self.common.database_path.display())?;
        writeln!(f, "api_port: {}", self.common.api_port)?;
        writeln!(f, "disable_api: {}", self.common.disable_api)?;
        writeln!(f, "log_level: {}", self.common.log_level)?;
        writeln!(f, "log_json: {}", self.common.log_json)?;
        writeln!(f, "orderbook_base_url: {}", self.common.orderbook_base_url)?;
        writeln!(f, "filter_policy_url: {}", self.common.filter_policy_url)?;
        writeln!(f, "filter_policy_reload_interval: {:?}", self.common.filter_policy_reload_interval)?;
        writeln!(f, "process_every_num_blocks: {}", self.common.process_every_num_blocks)?;
        writeln!(f, "orderbook_max_attempts: {}", self.common.orderbook_max_attempts)?;
        writeln!(f, "running_in_pod: {}", self.common.running_in_pod)?;
        write!(f, "command: {:?}", self.command)
    }
}

//! Top-level wiring: constructs every per-chain component, dispatches the
//! five CLI commands, and drives shutdown.
//!
//! Grounded on `autopilot::run`'s top-level `pub async fn run` (constructs
//! infra, wires `tokio::select!` across the serving tasks) scaled down to
//! this binary's narrower surface.

use {
    crate::{
        arguments::{Arguments, Command, CommonArguments, RunArguments, RunMultiArguments},
        block_processor::BlockProcessor,
        chain_watcher::{ChainWatcher, Config as ChainConfig},
        domain::eth::{Address, ChainId},
        health::ChainRegistry,
        infra::{
            blockchain::{AlloyChainProvider, ChainProvider, ToBlock},
            filter_policy_loader,
            handler_contract::RpcHandler,
            notification::{ErrorNotifier, NullNotifier, SlackNotifier},
            orderbook::{HttpOrderBookApi, OrderBookApi},
            registry_store::RegistryStore,
        },
    },
    std::{collections::HashMap, sync::Arc, time::Duration},
};

/// Everything needed to spin up one chain's [`ChainWatcher`].
struct ChainSetup {
    chain_id: ChainId,
    network: String,
    rpc: url::Url,
    deployment_block: u64,
    addresses: Option<Vec<Address>>,
}

pub async fn start(args: Arguments) -> anyhow::Result<()> {
    let common = &args.common;

    match args.command {
        Command::Run(run_args) => run(common, run_args).await,
        Command::RunMulti(multi_args) => run_multi(common, multi_args).await,
        Command::DumpDb { chain_id } => dump_db(common, chain_id).await,
        Command::ReplayBlock { rpc, block } => replay_block(common, rpc, block).await,
        Command::ReplayTx { rpc, tx } => replay_tx(common, rpc, tx).await,
    }
}

async fn run(common: &CommonArguments, run_args: RunArguments) -> anyhow::Result<()> {
    let chain_id = resolve_chain_id(&run_args.rpc).await?;
    let setup = ChainSetup {
        chain_id,
        network: chain_id.to_string(),
        rpc: run_args.rpc,
        deployment_block: run_args.deployment_block,
        addresses: (!run_args.addresses.is_empty()).then_some(run_args.addresses),
    };
    run_chains(common, vec![setup]).await
}

async fn run_multi(common: &CommonArguments, multi_args: RunMultiArguments) -> anyhow::Result<()> {
    if multi_args.rpc.len() != multi_args.deployment_block.len() {
        anyhow::bail!(
            "--rpc and --deployment-block must have the same length ({} vs {})",
            multi_args.rpc.len(),
            multi_args.deployment_block.len()
        );
    }
    let mut setups = Vec::new();
    for (rpc, deployment_block) in multi_args.rpc.into_iter().zip(multi_args.deployment_block) {
        let chain_id = resolve_chain_id(&rpc).await?;
        setups.push(ChainSetup {
            chain_id,
            network: chain_id.to_string(),
            rpc,
            deployment_block,
            addresses: None,
        });
    }
    run_chains(common, setups).await
}

async fn resolve_chain_id(rpc: &url::Url) -> anyhow::Result<ChainId> {
    let provider = AlloyChainProvider::connect(rpc, Duration::from_secs(12)).await?;
    Ok(ChainId(provider.chain_id().await?))
}

/// Shared by `run` and `run-multi`: resolves each chain's real `ChainId` over
/// RPC, constructs its watcher, and serves health/metrics until shutdown.
async fn run_chains(common: &CommonArguments, setups: Vec<ChainSetup>) -> anyhow::Result<()> {
    let store = RegistryStore::open(&common.database_path)?;
    let notifier: Arc<dyn ErrorNotifier> = if common.silent {
        Arc::new(NullNotifier)
    } else if let Some(webhook) = &common.slack_webhook {
        Arc::new(SlackNotifier::new(webhook.clone(), reqwest::Client::new()))
    } else {
        Arc::new(NullNotifier)
    };
    let orderbook: Arc<dyn OrderBookApi> = Arc::new(HttpOrderBookApi::new(
        common.orderbook_base_url.clone(),
        reqwest::Client::new(),
        common.orderbook_max_attempts,
        common.dry_run,
    ));
    let filter_policy = filter_policy_loader::spawn(
        reqwest::Client::new(),
        common.filter_policy_url.clone(),
        common.filter_policy_reload_interval,
    );
    let shutdown = crate::shutdown::spawn_on_signal();

    let mut chains = HashMap::new();
    let mut handles = Vec::new();

    for setup in setups {
        let provider: Arc<dyn ChainProvider> =
            Arc::new(AlloyChainProvider::connect(&setup.rpc, Duration::from_secs(12)).await?);
        let handler: Arc<dyn crate::domain::handler::Handler> = Arc::new(RpcHandler::new(provider.clone()));
        let block_processor = BlockProcessor::new(
            provider.clone(),
            store.clone(),
            handler,
            orderbook.clone(),
            common.process_every_num_blocks,
            setup.chain_id.to_string(),
        );
        let watcher = ChainWatcher::new(
            ChainConfig {
                chain_id: setup.chain_id,
                network: setup.network.clone(),
                deployment_block: setup.deployment_block,
                page_size: common.page_size,
                watchdog_timeout: common.watchdog_timeout,
                process_every_num_blocks: common.process_every_num_blocks,
                running_in_pod: common.running_in_pod,
                addresses: setup.addresses,
                one_shot: common.one_shot,
            },
            provider,
            block_processor,
            store.clone(),
            notifier.clone(),
            filter_policy.clone(),
        );

        let (status, handle) = watcher.spawn(shutdown.clone());
        chains.insert(setup.chain_id, status);
        handles.push(handle);
    }

    let registry = ChainRegistry::new(chains);
    if !common.disable_api {
        let health_shutdown = shutdown.clone();
        tokio::spawn(async move {
            if let Err(err) = crate::health::serve(registry, common.api_port, health_shutdown).await {
                tracing::error!(?err, "health/metrics server exited with an error");
            }
        });
    }

    for handle in handles {
        let _ = handle.await;
    }
    store.close();
    Ok(())
}

/// `dump-db`: emits the registry for one chain as JSON on standard out.
async fn dump_db(common: &CommonArguments, chain_id: u64) -> anyhow::Result<()> {
    let store = RegistryStore::open(&common.database_path)?;
    let registry = store.load_registry(&chain_id.to_string())?;
    println!("{}", serde_json::to_string_pretty(&DumpedRegistry::from(&registry))?);
    Ok(())
}

/// Serialisable projection of [`crate::domain::registry::Registry`]: the
/// domain type itself carries no `Serialize` derive (it is runtime state, not
/// wire or disk format), so `dump-db` builds this view explicitly.
#[derive(serde::Serialize)]
struct DumpedRegistry {
    version: u32,
    network: String,
    num_owners: usize,
    num_orders: usize,
    last_processed_block: Option<crate::domain::conditional_order::RegistryBlock>,
}

impl From<&crate::domain::registry::Registry> for DumpedRegistry {
    fn from(registry: &crate::domain::registry::Registry) -> Self {
        Self {
            version: registry.version,
            network: registry.network.clone(),
            num_owners: registry.num_owners(),
            num_orders: registry.num_orders(),
            last_processed_block: registry.last_processed_block,
        }
    }
}

/// `replay-block`: re-runs the Block Processor against a single historical
/// block using a throwaway in-memory registry and store, for debugging a
/// specific block's behaviour without touching the durable registry.
async fn replay_block(common: &CommonArguments, rpc: url::Url, block: u64) -> anyhow::Result<()> {
    let provider: Arc<dyn ChainProvider> = Arc::new(AlloyChainProvider::connect(&rpc, Duration::from_secs(12)).await?);
    let header = provider
        .get_block(block.into())
        .await?
        .ok_or_else(|| anyhow::anyhow!("block {block} not found"))?;
    replay(common, provider, header).await
}

/// `replay-tx`: resolves the transaction's block, then replays it the same
/// way as `replay-block`.
async fn replay_tx(common: &CommonArguments, rpc: url::Url, tx: crate::domain::eth::H256) -> anyhow::Result<()> {
    let provider: Arc<dyn ChainProvider> = Arc::new(AlloyChainProvider::connect(&rpc, Duration::from_secs(12)).await?);
    let events = provider
        .get_logs(0, ToBlock::Latest, &crate::infra::contracts::topics(), None)
        .await?;
    let block_number = events
        .iter()
        .find(|log| log.transaction_hash == tx)
        .map(|log| log.block_number)
        .ok_or_else(|| anyhow::anyhow!("no conditional-order event found for transaction {tx}"))?;
    let header = provider
        .get_block(block_number.into())
        .await?
        .ok_or_else(|| anyhow::anyhow!("block {block_number} not found"))?;
    replay(common, provider, header).await
}

async fn replay(
    common: &CommonArguments,
    provider: Arc<dyn ChainProvider>,
    header: crate::infra::blockchain::BlockHeader,
) -> anyhow::Result<()> {
    use crate::infra::contracts;

    let raw_logs = provider
        .get_logs(header.number, ToBlock::Number(header.number), &contracts::topics(), None)
        .await?;
    let events: Vec<_> = raw_logs.iter().filter_map(|log| contracts::decode(log).ok()).collect();

    let store = RegistryStore::open_ephemeral()?;
    let orderbook: Arc<dyn OrderBookApi> = Arc::new(HttpOrderBookApi::new(
        common.orderbook_base_url.clone(),
        reqwest::Client::new(),
        common.orderbook_max_attempts,
        true,
    ));
    let handler: Arc<dyn crate::domain::handler::Handler> = Arc::new(RpcHandler::new(provider.clone()));
    let processor = BlockProcessor::new(provider, store, handler, orderbook, 1, "replay".into());
    let mut registry = crate::domain::registry::Registry::empty("replay");
    let policy = crate::domain::filter_policy::FilterPolicy::default();

    processor
        .process_block(&mut registry, header, events, None, &policy)
        .await?;

    println!("{}", serde_json::to_string_pretty(&DumpedRegistry::from(&registry))?);
    Ok(())
}

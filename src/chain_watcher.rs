//! The Chain Watcher: the top-level per-chain state machine,
//! `SYNCING -> IN_SYNC -> (UNKNOWN)`, including the watchdog.

use {
    crate::{
        block_processor::BlockProcessor,
        domain::{
            eth::{Address, ChainId},
            filter_policy::FilterPolicy,
            handler::BlockOverrides,
            registry::Registry,
        },
        event_source::EventSource,
        infra::{
            blockchain::{BlockHeader, ChainProvider, ToBlock},
            metrics::Metrics,
            notification::ErrorNotifier,
            registry_store::RegistryStore,
        },
    },
    chrono::Utc,
    futures::StreamExt,
    std::{
        collections::BTreeMap,
        sync::{
            atomic::{AtomicI64, AtomicU64, Ordering},
            Arc,
        },
        time::Duration,
    },
    tokio::sync::watch,
};

/// The three states a chain watcher can be in. `Unknown` is only reachable
/// when running inside an orchestration pod; otherwise the watchdog exits
/// the process instead of transitioning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Syncing,
    InSync,
    Unknown,
}

/// Everything the Health Aggregator needs about one chain, updated as the
/// watcher progresses.
#[derive(Clone)]
pub struct ChainStatus {
    pub chain_id: ChainId,
    pub state: watch::Receiver<State>,
    last_processed_block: Arc<AtomicU64>,
    last_block_received_at: Arc<AtomicI64>,
}

impl ChainStatus {
    pub fn is_healthy(&self) -> bool {
        *self.state.borrow() == State::InSync
    }

    pub fn last_processed_block(&self) -> u64 {
        self.last_processed_block.load(Ordering::Relaxed)
    }
}

pub struct Config {
    pub chain_id: ChainId,
    pub network: String,
    pub deployment_block: u64,
    pub page_size: u64,
    pub watchdog_timeout: Duration,
    pub process_every_num_blocks: u64,
    pub running_in_pod: bool,
    pub addresses: Option<Vec<Address>>,
    /// Warm up then return without entering the live tail. Used by the
    /// `--one-shot` CLI flag for catch-up runs that should not stay resident.
    pub one_shot: bool,
}

pub struct ChainWatcher {
    config: Config,
    provider: Arc<dyn ChainProvider>,
    event_source: EventSource,
    block_processor: BlockProcessor,
    store: RegistryStore,
    notifier: Arc<dyn ErrorNotifier>,
    filter_policy: watch::Receiver<Arc<FilterPolicy>>,
}

impl ChainWatcher {
    pub fn new(
        config: Config,
        provider: Arc<dyn ChainProvider>,
        block_processor: BlockProcessor,
        store: RegistryStore,
        notifier: Arc<dyn ErrorNotifier>,
        filter_policy: watch::Receiver<Arc<FilterPolicy>>,
    ) -> Self {
        let event_source = EventSource::new(provider.clone(), config.addresses.clone());
        Self {
            config,
            provider,
            event_source,
            block_processor,
            store,
            notifier,
            filter_policy,
        }
    }

    /// Runs warm-up to completion, then the live tail and watchdog forever
    /// (or until cancelled). Returns the shared status handle immediately so
    /// the caller can wire it into the Health Aggregator before warm-up
    /// finishes.
    pub fn spawn(mut self, mut shutdown: watch::Receiver<bool>) -> (ChainStatus, tokio::task::JoinHandle<()>) {
        let (state_tx, state_rx) = watch::channel(State::Syncing);
        let last_processed_block = Arc::new(AtomicU64::new(0));
        let last_block_received_at = Arc::new(AtomicI64::new(Utc::now().timestamp()));

        let status = ChainStatus {
            chain_id: self.config.chain_id,
            state: state_rx,
            last_processed_block: last_processed_block.clone(),
            last_block_received_at: last_block_received_at.clone(),
        };

        let handle = tokio::spawn(async move {
            let mut registry = match Registry::load(&self.store, &self.config.network) {
                Ok(registry) => registry,
                Err(err) => {
                    tracing::error!(?err, "failed to load registry, refusing to start");
                    return;
                }
            };

            tokio::select! {
                _ = shutdown.changed() => return,
                result = self.warm_up(&mut registry, &state_tx, &last_processed_block) => {
                    if let Err(err) = result {
                        tracing::error!(?err, "warm-up failed");
                        return;
                    }
                }
            }

            if self.config.one_shot {
                tracing::info!(chain_id = %self.config.chain_id, "one-shot warm-up complete, not entering live tail");
                self.provider.close();
                return;
            }

            self.live_tail(registry, state_tx, last_processed_block, last_block_received_at, shutdown)
                .await;
        });

        (status, handle)
    }

    /// Warm-up (`SYNCING`): catches the registry up from its last persisted
    /// cursor to the chain tip before entering the live tail.
    async fn warm_up(
        &self,
        registry: &mut Registry,
        state: &watch::Sender<State>,
        last_processed_block: &AtomicU64,
    ) -> anyhow::Result<()> {
        let mut from = registry
            .last_processed_block
            .map(|b| b.number + 1)
            .unwrap_or(self.config.deployment_block);
        let mut tip = self.provider.latest_block_number().await?;

        if from > tip {
            // `deploymentBlock > currentTip` at start: transition to
            // `IN_SYNC` without fetching logs: a deployment block past the
            // current tip is a boundary case, not an error.
            let _ = state.send(State::InSync);
            last_processed_block.store(tip, Ordering::Relaxed);
            return Ok(());
        }

        loop {
            // The page's end: `tip` itself when unpaginated (`page_size ==
            // 0` queries "latest" directly), otherwise the bounded window.
            // This, not a freshly re-read tip, is what the cursor advances
            // to below -- paging one page at a time is how the historical
            // catch-up guarantee holds across a restart mid-page.
            let to = if self.config.page_size == 0 {
                tip
            } else {
                (from + self.config.page_size - 1).min(tip)
            };
            let query_to = if self.config.page_size == 0 {
                ToBlock::Latest
            } else {
                ToBlock::Number(to)
            };

            let events = self.event_source.events(from, query_to).await?;

            let mut by_block: BTreeMap<u64, Vec<_>> = BTreeMap::new();
            for event in events {
                let number = match &event {
                    crate::infra::contracts::DecodedEvent::Created(e) => e.block_number,
                    crate::infra::contracts::DecodedEvent::MerkleRootSet(e) => e.block_number,
                };
                by_block.entry(number).or_default().push(event);
            }

            for (number, events) in by_block {
                let block = self.provider.get_block(number.into()).await?.ok_or_else(|| {
                    anyhow::anyhow!(
                        "chain {}: block {number} carries events but its header could not be fetched during warm-up",
                        self.config.chain_id
                    )
                })?;
                let filter_policy = self.filter_policy.borrow().clone();
                if let Err(err) = self
                    .block_processor
                    .process_block(
                        registry,
                        block,
                        events,
                        Some(BlockOverrides {
                            block_number: tip,
                            block_timestamp: Utc::now().timestamp(),
                        }),
                        &filter_policy,
                    )
                    .await
                {
                    // Non-fatal: the cursor still advances to the page end
                    // below, guaranteeing forward progress across the
                    // catch-up (§4.6 step 5 / §7). Mirrors the live tail's
                    // own log-and-continue handling of the same error.
                    tracing::error!(?err, chain_id = %self.config.chain_id, block = number, "warm-up block processing reported an error");
                }
                last_processed_block.store(number, Ordering::Relaxed);
            }

            let page_end = self.provider.get_block(to.into()).await?.ok_or_else(|| {
                anyhow::anyhow!("chain {}: page-end block {to} not found during warm-up", self.config.chain_id)
            })?;
            registry.last_processed_block = Some(crate::domain::conditional_order::RegistryBlock {
                number: page_end.number,
                hash: page_end.hash,
                timestamp: page_end.timestamp,
            });
            registry.write(&self.store)?;
            last_processed_block.store(to, Ordering::Relaxed);

            if to < tip {
                from = to + 1;
                continue;
            }

            // This page reached the tip as known when it started; re-read
            // it to see whether more blocks were produced while the page
            // was being fetched and processed before declaring in sync.
            let current_tip = self.provider.latest_block_number().await?;
            if current_tip <= to {
                let _ = state.send(State::InSync);
                return Ok(());
            }
            tip = current_tip;
            from = to + 1;
        }
    }

    /// Live tail (`IN_SYNC`) plus the watchdog, run concurrently until
    /// `shutdown` fires.
    async fn live_tail(
        &self,
        mut registry: Registry,
        state: watch::Sender<State>,
        last_processed_block: Arc<AtomicU64>,
        last_block_received_at: Arc<AtomicI64>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut last_block_received: Option<BlockHeader> = None;
        let mut block_stream = self.provider.subscribe_blocks();
        let mut watchdog = tokio::time::interval(Duration::from_secs(5));

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    tracing::info!(chain_id = %self.config.chain_id, "chain watcher shutting down");
                    self.provider.close();
                    return;
                }
                _ = watchdog.tick() => {
                    self.run_watchdog(&last_block_received_at, &state).await;
                    if *state.borrow() == State::Unknown && !self.config.running_in_pod {
                        // run_watchdog already exited the process in this
                        // branch; unreachable in practice, kept for clarity.
                        return;
                    }
                }
                header = block_stream.next() => {
                    let Some(header) = header else {
                        tracing::warn!(chain_id = %self.config.chain_id, "block stream ended unexpectedly");
                        continue;
                    };

                    if let Some(previous) = last_block_received {
                        let rate = (header.timestamp - previous.timestamp) as f64;
                        Metrics::get()
                            .block_time_seconds
                            .with_label_values(&[&self.config.chain_id.to_string()])
                            .set(rate);

                        if header.number <= previous.number && header.hash != previous.hash {
                            let depth = previous.number - header.number + 1;
                            tracing::warn!(chain_id = %self.config.chain_id, depth, "reorg detected");
                            Metrics::get()
                                .reorg_total
                                .with_label_values(&[&self.config.chain_id.to_string()])
                                .inc();
                            Metrics::get()
                                .reorg_depth
                                .with_label_values(&[&self.config.chain_id.to_string()])
                                .set(depth as i64);
                        }
                    }

                    self.process_live_block(&mut registry, header, &last_processed_block).await;
                    last_block_received_at.store(Utc::now().timestamp(), Ordering::Relaxed);
                    last_block_received = Some(header);
                }
            }
        }
    }

    async fn process_live_block(&self, registry: &mut Registry, header: BlockHeader, last_processed_block: &AtomicU64) {
        let events = match self
            .event_source
            .events(header.number, ToBlock::Number(header.number))
            .await
        {
            Ok(events) => events,
            Err(err) => {
                tracing::warn!(?err, chain_id = %self.config.chain_id, "failed to fetch events for block");
                return;
            }
        };

        let filter_policy = self.filter_policy.borrow().clone();
        if let Err(err) = self
            .block_processor
            .process_block(registry, header, events, None, &filter_policy)
            .await
        {
            tracing::error!(?err, chain_id = %self.config.chain_id, block = header.number, "block processing reported an error");
            if crate::infra::notification::should_notify(registry.last_notified_error, Duration::from_secs(300)) {
                self.notifier
                    .notify(&self.config.network, &format!("block {} processing error: {err}", header.number))
                    .await;
                registry.last_notified_error = Some(Utc::now());
            }
        }
        last_processed_block.store(header.number, Ordering::Relaxed);
    }

    /// The watchdog task: if no block has been received for
    /// `watchdog_timeout`, log an error and either transition to `Unknown`
    /// (inside a pod) or exit the process.
    async fn run_watchdog(&self, last_block_received_at: &AtomicI64, state: &watch::Sender<State>) {
        let elapsed = Utc::now().timestamp() - last_block_received_at.load(Ordering::Relaxed);
        if elapsed < self.config.watchdog_timeout.as_secs() as i64 {
            return;
        }
        tracing::error!(
            chain_id = %self.config.chain_id,
            elapsed,
            "no block received within the watchdog timeout"
        );
        if self.config.running_in_pod {
            let _ = state.send(State::Unknown);
        } else {
            self.store.close();
            std::process::exit(1);
        }
    }
}

/// Test-only constructors exposed to `crate::health`'s tests, which need a
/// `ChainStatus` without spinning up an entire chain watcher.
#[cfg(test)]
pub mod test_support {
    use super::*;

    pub fn status_for_tests(chain_id: ChainId, state: watch::Receiver<State>) -> ChainStatus {
        ChainStatus {
            chain_id,
            state,
            last_processed_block: Arc::new(AtomicU64::new(0)),
            last_block_received_at: Arc::new(AtomicI64::new(0)),
        }
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{
            domain::handler::MockHandler,
            infra::{
                blockchain::{Error as ProviderError, RawLog},
                notification::NullNotifier,
                orderbook::MockOrderBookApi,
                registry_store::RegistryStore,
            },
        },
    };

    #[test]
    fn deployment_block_ahead_of_tip_is_a_boundary_case() {
        // Exercised end-to-end in `tests/scenarios.rs` (genesis catch-up):
        // this unit test only pins the boundary arithmetic.
        let deployment_block = 100u64;
        let tip = 100u64;
        assert!(deployment_block <= tip);
        let from = deployment_block;
        assert!(from <= tip);
    }

    /// A provider with a fixed tip and no logs; every block header is
    /// synthesized from its number so warm-up can persist a cursor.
    struct FixedTipProvider {
        tip: u64,
    }

    #[async_trait::async_trait]
    impl ChainProvider for FixedTipProvider {
        async fn get_block(&self, number: crate::domain::eth::BlockNo) -> Result<Option<BlockHeader>, ProviderError> {
            Ok(Some(BlockHeader {
                number: number.0,
                hash: crate::domain::eth::H256(alloy::primitives::B256::repeat_byte(number.0 as u8)),
                timestamp: number.0 as i64,
            }))
        }
        async fn latest_block_number(&self) -> Result<u64, ProviderError> {
            Ok(self.tip)
        }
        async fn chain_id(&self) -> Result<u64, ProviderError> {
            Ok(1)
        }
        async fn get_logs(
            &self,
            _from: u64,
            _to: ToBlock,
            _topics: &[crate::domain::eth::H256],
            _addresses: Option<&[Address]>,
        ) -> Result<Vec<RawLog>, ProviderError> {
            Ok(vec![])
        }
        fn subscribe_blocks(&self) -> crate::infra::blockchain::BlockStream {
            Box::pin(futures::stream::empty())
        }
        async fn get_code(&self, _address: Address) -> Result<Vec<u8>, ProviderError> {
            Ok(vec![])
        }
        async fn call(&self, _address: Address, _data: crate::domain::eth::Bytes) -> Result<crate::domain::eth::Bytes, ProviderError> {
            Ok(crate::domain::eth::Bytes::new())
        }
        fn close(&self) {}
    }

    fn watcher(provider: Arc<dyn ChainProvider>, deployment_block: u64, page_size: u64) -> ChainWatcher {
        let store = RegistryStore::open_ephemeral().unwrap();
        let block_processor = BlockProcessor::new(
            provider.clone(),
            store.clone(),
            Arc::new(MockHandler::new()),
            Arc::new(MockOrderBookApi::new()),
            1,
            "1".into(),
        );
        let (_filter_tx, filter_rx) = watch::channel(Arc::new(FilterPolicy::default()));
        ChainWatcher::new(
            Config {
                chain_id: ChainId(1),
                network: "1".into(),
                deployment_block,
                page_size,
                watchdog_timeout: Duration::from_secs(30),
                process_every_num_blocks: 1,
                running_in_pod: false,
                addresses: None,
                one_shot: true,
            },
            provider,
            block_processor,
            store,
            Arc::new(NullNotifier),
            filter_rx,
        )
    }

    /// Paging across a tip far beyond a single page must persist the
    /// cursor at each page's own end, not jump straight to the tip: a
    /// multi-page warm-up advancing one page_size at a time is what
    /// guarantees every block in between is actually scanned for events.
    #[tokio::test]
    async fn warm_up_advances_page_by_page_to_the_tip() {
        let provider: Arc<dyn ChainProvider> = Arc::new(FixedTipProvider { tip: 23 });
        let watcher = watcher(provider, 0, 10);
        let mut registry = Registry::empty("1");
        let (state_tx, mut state_rx) = watch::channel(State::Syncing);
        let last_processed_block = AtomicU64::new(0);

        watcher.warm_up(&mut registry, &state_tx, &last_processed_block).await.unwrap();

        assert_eq!(registry.last_processed_block.unwrap().number, 23);
        assert_eq!(last_processed_block.load(Ordering::Relaxed), 23);
        state_rx.changed().await.unwrap();
        assert_eq!(*state_rx.borrow(), State::InSync);
    }
}

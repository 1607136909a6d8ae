//! The Block Processor: per block, ingests new events (extending the
//! registry), then iterates the registry and drives the Order Poller.

use {
    crate::{
        domain::{
            conditional_order::{ConditionalOrder, RegistryBlock},
            eth::Address,
            filter_policy::FilterPolicy,
            handler::{BlockOverrides, Handler, PollContext},
            registry::Registry,
        },
        infra::{
            blockchain::{BlockHeader, ChainProvider},
            contracts::{self, DecodedEvent},
            metrics::Metrics,
            orderbook::OrderBookApi,
            registry_store::RegistryStore,
        },
        order_poller::{OrderPoller, PollEffect},
    },
    chrono::{TimeZone, Utc},
    futures::StreamExt,
    std::sync::Arc,
};

/// Bounded fan-out for concurrent Order Poller invocations within one block.
pub const DEFAULT_FAN_OUT: usize = 16;

#[derive(Debug, Default)]
pub struct ProcessingErrors {
    pub decode_failures: u32,
}

impl ProcessingErrors {
    fn has_any(&self) -> bool {
        self.decode_failures > 0
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{0} event(s) were rejected as not composable-compatible or failed to decode")]
    BlockHadDecodeFailures(u32),
    #[error(transparent)]
    Store(#[from] crate::infra::registry_store::Error),
}

pub struct BlockProcessor {
    provider: Arc<dyn ChainProvider>,
    store: RegistryStore,
    order_poller: OrderPoller,
    process_every_num_blocks: u64,
    fan_out: usize,
    chain_id: String,
}

impl BlockProcessor {
    pub fn new(
        provider: Arc<dyn ChainProvider>,
        store: RegistryStore,
        handler: Arc<dyn Handler>,
        orderbook: Arc<dyn OrderBookApi>,
        process_every_num_blocks: u64,
        chain_id: String,
    ) -> Self {
        Self {
            provider,
            store,
            order_poller: OrderPoller::new(handler, orderbook, chain_id.clone()),
            process_every_num_blocks: process_every_num_blocks.max(1),
            fan_out: DEFAULT_FAN_OUT,
            chain_id,
        }
    }

    /// Ingests new events then polls the registry for one block.
    /// `block_number_overrides` is `Some` during historical replay, pinning
    /// the poll context to the warm-up tip rather than the live chain head.
    pub async fn process_block(
        &self,
        registry: &mut Registry,
        block: BlockHeader,
        events: Vec<DecodedEvent>,
        overrides: Option<BlockOverrides>,
        filter_policy: &FilterPolicy,
    ) -> Result<(), Error> {
        let start = std::time::Instant::now();
        let mut errors = ProcessingErrors::default();

        self.ingest_events(registry, events, &mut errors).await;

        if block.number % self.process_every_num_blocks == 0 {
            self.poll_registry(registry, block, overrides, filter_policy).await;
        }

        let cursor = RegistryBlock {
            number: block.number,
            hash: block.hash,
            timestamp: block.timestamp,
        };
        registry.last_processed_block = Some(cursor);
        // Persistence is unconditional, even if ingestion or polling above
        // reported errors, to guarantee forward progress of the cursor.
        let persisted = registry.write(&self.store);

        Metrics::get()
            .block_height
            .with_label_values(&[&self.chain_id])
            .set(block.number as i64);
        Metrics::get()
            .active_owners_total
            .with_label_values(&[&self.chain_id])
            .set(registry.num_owners() as i64);
        Metrics::get()
            .active_orders_total
            .with_label_values(&[&self.chain_id])
            .set(registry.num_orders() as i64);
        Metrics::get()
            .process_block_duration_seconds
            .with_label_values(&[&self.chain_id])
            .observe(start.elapsed().as_secs_f64());

        persisted?;

        if errors.has_any() {
            return Err(Error::BlockHadDecodeFailures(errors.decode_failures));
        }
        Ok(())
    }

    /// Step 1: ingest `ConditionalOrderCreated` (add) and `MerkleRootSet`
    /// (flush + add) events, in their original order. Failures are counted,
    /// never fatal to the block.
    async fn ingest_events(&self, registry: &mut Registry, events: Vec<DecodedEvent>, errors: &mut ProcessingErrors) {
        for event in events {
            let (owner, source_contract) = match &event {
                DecodedEvent::Created(e) => (e.owner, e.source_contract),
                DecodedEvent::MerkleRootSet(e) => (e.owner, e.source_contract),
            };

            match self.provider.get_code(source_contract).await {
                Ok(code) if code.is_empty() => {
                    tracing::debug!(%source_contract, "dropping event from an address with no deployed code");
                    errors.decode_failures += 1;
                    continue;
                }
                Err(err) => {
                    tracing::warn!(?err, %source_contract, "failed to confirm composable-compatibility, processing optimistically");
                }
                Ok(_) => {}
            }

            match event {
                DecodedEvent::Created(created) => {
                    let order = ConditionalOrder::new(
                        created.tx,
                        created.params,
                        None,
                        created.source_contract,
                    );
                    registry.add(owner, order);
                    Metrics::get()
                        .events_processed_total
                        .with_label_values(&[&self.chain_id])
                        .inc();
                }
                DecodedEvent::MerkleRootSet(merkle) => {
                    if !merkle.is_onchain_emission {
                        tracing::warn!(
                            %owner,
                            "merkle root published off-chain; this watcher only understands on-chain emission, skipping flush"
                        );
                        errors.decode_failures += 1;
                        continue;
                    }
                    registry.flush(owner, merkle.root);
                    for (params, path) in &merkle.orders {
                        let order = ConditionalOrder::new(
                            merkle.tx,
                            params.clone(),
                            Some(contracts::proof_for(&merkle, path.clone())),
                            merkle.source_contract,
                        );
                        registry.add(owner, order);
                    }
                    Metrics::get()
                        .events_processed_total
                        .with_label_values(&[&self.chain_id])
                        .inc();
                }
            }
        }
    }

    /// Step 2: walk the registry and drive the Order Poller for every
    /// conditional order, bounded fan-out concurrent, registry mutation
    /// serialized afterwards.
    async fn poll_registry(
        &self,
        registry: &mut Registry,
        block: BlockHeader,
        overrides: Option<BlockOverrides>,
        filter_policy: &FilterPolicy,
    ) {
        let candidates: Vec<_> = registry
            .iter()
            .map(|(owner, order)| (owner, order.tx, order.params.clone(), order.orders.clone()))
            .collect();

        let context = PollContext {
            block_number: block.number,
            block_timestamp: block.timestamp,
            overrides,
        };

        let results = futures::stream::iter(candidates.into_iter().map(|(owner, tx, params, orders)| {
            let filter_policy = filter_policy;
            async move {
                let outcome = self
                    .order_poller
                    .poll(owner, tx, &params, &orders, context, filter_policy)
                    .await;
                (owner, params, outcome)
            }
        }))
        .buffer_unordered(self.fan_out)
        .collect::<Vec<_>>()
        .await;

        let timestamp = Utc.timestamp_opt(block.timestamp, 0).single().unwrap_or_else(Utc::now);
        for (owner, params, outcome) in results {
            let result_label = match &outcome.effect {
                PollEffect::Submitted(_) => "submitted",
                PollEffect::Deferred => "deferred",
                PollEffect::Delete => "delete",
                PollEffect::Skipped => "skipped",
            };
            Metrics::get()
                .polling_total
                .with_label_values(&[&self.chain_id, result_label])
                .inc();

            match outcome.effect {
                PollEffect::Submitted(uid) => {
                    registry.mutate(owner, &params, |order| {
                        order
                            .orders
                            .insert(uid, crate::domain::conditional_order::DiscreteOrderStatus::Submitted);
                        order.record_poll(block.number, timestamp, outcome.summary.clone());
                    });
                }
                PollEffect::Delete => {
                    let tx = registry_tx_of(registry, owner, &params);
                    registry.delete(owner, tx, &params);
                }
                PollEffect::Deferred | PollEffect::Skipped => {
                    registry.mutate(owner, &params, |order| {
                        order.record_poll(block.number, timestamp, outcome.summary.clone());
                    });
                }
            }
        }
    }
}

/// `Registry::delete` is keyed by `(owner, tx, params)`; the tx hash is a
/// property of the conditional order itself, not the poll outcome, so it is
/// looked up rather than threaded through `PollEffect`.
fn registry_tx_of(registry: &Registry, owner: Address, params: &crate::domain::conditional_order::ConditionalOrderParams) -> crate::domain::eth::H256 {
    registry
        .iter()
        .find(|(o, order)| *o == owner && &order.params == params)
        .map(|(_, order)| order.tx)
        .unwrap_or_default()
}

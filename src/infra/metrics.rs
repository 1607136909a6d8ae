//! Global Prometheus registry and the stable metric names this binary exposes.
//!
//! A bare `prometheus::Registry` paired with `prometheus-metric-storage`'s
//! `#[derive(MetricStorage)]`, the pattern used across this codebase's own
//! metric structs.

use {
    prometheus::{Encoder, TextEncoder},
    prometheus_metric_storage::MetricStorage,
    std::sync::OnceLock,
};

static REGISTRY: OnceLock<prometheus::Registry> = OnceLock::new();
static STORAGE: OnceLock<prometheus_metric_storage::StorageRegistry> = OnceLock::new();

pub fn registry() -> &'static prometheus::Registry {
    REGISTRY.get_or_init(prometheus::Registry::new)
}

fn storage_registry() -> &'static prometheus_metric_storage::StorageRegistry {
    STORAGE.get_or_init(|| prometheus_metric_storage::StorageRegistry::new(registry().clone()))
}

/// Renders all registered metrics in Prometheus text exposition format, for
/// the `GET /metrics` HTTP surface.
pub fn encode() -> String {
    let families = registry().gather();
    let mut buffer = Vec::new();
    TextEncoder::new()
        .encode(&families, &mut buffer)
        .expect("prometheus text encoding never fails for well-formed metrics");
    String::from_utf8(buffer).expect("prometheus text encoder always emits valid utf8")
}

/// Per-chain metrics emitted by the Chain Watcher, Block Processor, and
/// Order Poller. One instance is shared across a chain's components; metric
/// names are pinned explicitly (module path would otherwise become the
/// Prometheus prefix, hence the explicit `name = "..."` overrides).
#[derive(MetricStorage)]
pub struct Metrics {
    /// The current block height the chain watcher has processed up to.
    #[metric(name = "watch_tower_block_height", labels("chain_id"))]
    pub block_height: prometheus::IntGaugeVec,

    /// Seconds between the timestamps of two consecutive live-tail blocks.
    #[metric(name = "watch_tower_block_time_seconds", labels("chain_id"))]
    pub block_time_seconds: prometheus::GaugeVec,

    /// Depth of the most recently detected reorg.
    #[metric(name = "watch_tower_reorg_depth", labels("chain_id"))]
    pub reorg_depth: prometheus::IntGaugeVec,

    /// Total number of reorgs detected.
    #[metric(name = "watch_tower_reorg_total", labels("chain_id"))]
    pub reorg_total: prometheus::IntCounterVec,

    /// Total number of decoded conditional-order events ingested.
    #[metric(name = "watch_tower_events_processed_total", labels("chain_id"))]
    pub events_processed_total: prometheus::IntCounterVec,

    /// Time spent processing one block end to end.
    #[metric(name = "watch_tower_process_block_duration_seconds", labels("chain_id"))]
    pub process_block_duration_seconds: prometheus::HistogramVec,

    /// Number of distinct owners with at least one live conditional order.
    #[metric(name = "watch_tower_active_owners_total", labels("chain_id"))]
    pub active_owners_total: prometheus::IntGaugeVec,

    /// Number of live conditional orders across all owners.
    #[metric(name = "watch_tower_active_orders_total", labels("chain_id"))]
    pub active_orders_total: prometheus::IntGaugeVec,

    /// Total number of discrete orders submitted to the order-book.
    #[metric(
        name = "watch_tower_orderbook_discrete_orders_total",
        labels("chain_id", "handler", "owner", "id")
    )]
    pub orderbook_discrete_orders_total: prometheus::IntCounterVec,

    /// Total number of order-book submission errors, by status/error class.
    #[metric(
        name = "watch_tower_orderbook_errors_total",
        labels("chain_id", "handler", "owner", "id", "status", "error")
    )]
    pub orderbook_errors_total: prometheus::IntCounterVec,

    /// Total number of conditional orders polled, by outcome.
    #[metric(name = "watch_tower_polling_total", labels("chain_id", "result"))]
    pub polling_total: prometheus::IntCounterVec,

    /// Total number of unexpected handler errors encountered while polling.
    #[metric(name = "watch_tower_polling_unexpected_errors_total", labels("chain_id"))]
    pub polling_unexpected_errors_total: prometheus::IntCounterVec,
}

impl Metrics {
    pub fn get() -> &'static Self {
        Self::instance(storage_registry()).expect("metric registration is infallible at startup")
    }
}

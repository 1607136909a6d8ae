//! The Health Aggregator and its `axum` HTTP surface.
//!
//! Grounded on `shared::metrics::serve_metrics`/`LivenessChecking` (Cargo.toml
//! dependency set only in this workspace, since `shared`'s actual source is
//! not part of the retrieved pack). The chain map is an explicit value
//! constructed in `run::start` and passed to the router as
//! `axum::extract::State`, never a process-global `static`.

use {
    crate::{chain_watcher::ChainStatus, domain::eth::ChainId, infra::metrics},
    axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router},
    serde::Serialize,
    std::{collections::HashMap, sync::Arc},
};

/// Owns one [`ChainStatus`] handle per monitored chain. Constructed once in
/// `run::start` and shared (never a language-level `static`) with the HTTP
/// router.
#[derive(Clone, Default)]
pub struct ChainRegistry {
    chains: Arc<HashMap<ChainId, ChainStatus>>,
}

impl ChainRegistry {
    pub fn new(chains: HashMap<ChainId, ChainStatus>) -> Self {
        Self {
            chains: Arc::new(chains),
        }
    }
}

#[derive(Serialize)]
struct PerChainHealth {
    sync: &'static str,
    chain_id: u64,
    last_processed_block: u64,
    is_healthy: bool,
}

#[derive(Serialize)]
struct HealthPayload {
    is_healthy: bool,
    chains: Vec<PerChainHealth>,
}

/// A chain is healthy iff its state is `IN_SYNC`; overall health is the
/// conjunction across every monitored chain.
fn aggregate(registry: &ChainRegistry) -> HealthPayload {
    let chains: Vec<_> = registry
        .chains
        .values()
        .map(|status| {
            let state = *status.state.borrow();
            PerChainHealth {
                sync: match state {
                    crate::chain_watcher::State::Syncing => "SYNCING",
                    crate::chain_watcher::State::InSync => "IN_SYNC",
                    crate::chain_watcher::State::Unknown => "UNKNOWN",
                },
                chain_id: status.chain_id.0,
                last_processed_block: status.last_processed_block(),
                is_healthy: status.is_healthy(),
            }
        })
        .collect();
    let is_healthy = chains.iter().all(|c| c.is_healthy);
    HealthPayload { is_healthy, chains }
}

async fn health(State(registry): State<ChainRegistry>) -> impl IntoResponse {
    let payload = aggregate(&registry);
    let status = if payload.is_healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(payload))
}

async fn metrics_endpoint() -> impl IntoResponse {
    (
        [(axum::http::header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        metrics::encode(),
    )
}

pub fn router(registry: ChainRegistry) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics_endpoint))
        .with_state(registry)
}

/// Serves `/health` and `/metrics` until `shutdown` fires, matching the
/// teacher's pattern of a single lightweight HTTP server task per service.
pub async fn serve(registry: ChainRegistry, port: u16, mut shutdown: tokio::sync::watch::Receiver<bool>) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    tracing::info!(port, "serving health and metrics endpoints");
    axum::serve(listener, router(registry))
        .with_graceful_shutdown(async move {
            let _ = shutdown.changed().await;
        })
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use {super::*, crate::chain_watcher::State, tokio::sync::watch};

    fn status(chain_id: u64, state: State) -> ChainStatus {
        let (_tx, rx) = watch::channel(state);
        // `ChainStatus` is only constructible within `chain_watcher`; build
        // one through `spawn`-equivalent internals isn't exposed, so tests
        // here exercise `aggregate` through a hand-rolled status using the
        // crate-visible fields instead.
        crate::chain_watcher::test_support::status_for_tests(ChainId(chain_id), rx)
    }

    #[test]
    fn overall_health_is_the_conjunction_of_per_chain_health() {
        let mut chains = HashMap::new();
        chains.insert(ChainId(1), status(1, State::InSync));
        chains.insert(ChainId(2), status(2, State::Syncing));
        let registry = ChainRegistry::new(chains);

        let payload = aggregate(&registry);
        assert!(!payload.is_healthy);
        assert_eq!(payload.chains.len(), 2);
    }

    #[test]
    fn all_chains_in_sync_is_healthy() {
        let mut chains = HashMap::new();
        chains.insert(ChainId(1), status(1, State::InSync));
        let registry = ChainRegistry::new(chains);

        assert!(aggregate(&registry).is_healthy);
    }
}

//! Translates a half-open block range into a time-ordered stream of decoded
//! conditional-order events.

use {
    crate::{
        domain::eth::Address,
        infra::{
            blockchain::{ChainProvider, ToBlock},
            contracts::{self, DecodedEvent},
        },
    },
    std::sync::Arc,
};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Rpc(#[from] crate::infra::blockchain::Error),
}

pub struct EventSource {
    provider: Arc<dyn ChainProvider>,
    /// Optional owner allow-list. When set, only events whose decoded owner
    /// is in the list are retained.
    addresses: Option<Vec<Address>>,
}

impl EventSource {
    pub fn new(provider: Arc<dyn ChainProvider>, addresses: Option<Vec<Address>>) -> Self {
        Self { provider, addresses }
    }

    fn owner_of(event: &DecodedEvent) -> Address {
        match event {
            DecodedEvent::Created(e) => e.owner,
            DecodedEvent::MerkleRootSet(e) => e.owner,
        }
    }

    fn allowed(&self, owner: Address) -> bool {
        match &self.addresses {
            Some(allow_list) => allow_list.contains(&owner),
            None => true,
        }
    }

    /// Returns a finite, `(blockNumber, logIndex)`-ascending sequence of
    /// decoded events in `[from, to]`. Logs that fail to decode are dropped,
    /// non-fatally.
    pub async fn events(&self, from: u64, to: ToBlock) -> Result<Vec<DecodedEvent>, Error> {
        let raw_logs = self
            .provider
            .get_logs(from, to, &contracts::topics(), None)
            .await?;

        let mut events = Vec::with_capacity(raw_logs.len());
        for log in &raw_logs {
            let Ok(event) = contracts::decode(log) else {
                tracing::debug!(
                    block = log.block_number,
                    log_index = log.log_index,
                    "dropping log that failed to decode as a composable-order event"
                );
                continue;
            };
            if self.allowed(Self::owner_of(&event)) {
                events.push(event);
            }
        }
        // The RPC endpoint is required to return logs in
        // `(blockNumber, logIndex)` order already; re-assert it defensively
        // rather than trusting every possible provider implementation.
        events.sort_by_key(|e| match e {
            DecodedEvent::Created(c) => (c.block_number, c.log_index),
            DecodedEvent::MerkleRootSet(m) => (m.block_number, m.log_index),
        });
        Ok(events)
    }
}

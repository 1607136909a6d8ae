//! In-memory conditional-order registry.

use {
    crate::{
        domain::{
            conditional_order::{ConditionalOrder, RegistryBlock},
            eth::{Address, H256},
        },
        infra::registry_store::{self, RegistryStore},
    },
    chrono::{DateTime, Utc},
    std::collections::{BTreeSet, HashMap},
};

/// The schema version this binary writes. Bumping this requires a written
/// migration in [`registry_store`].
pub const SCHEMA_VERSION: u32 = 1;

/// Per-chain aggregate: `owner -> set of conditional orders`, plus bookkeeping
/// cursors.
#[derive(Debug, Clone)]
pub struct Registry {
    pub version: u32,
    pub owner_orders: HashMap<Address, BTreeSet<ConditionalOrder>>,
    pub last_processed_block: Option<RegistryBlock>,
    pub last_notified_error: Option<DateTime<Utc>>,
    pub network: String,
}

impl Registry {
    pub fn empty(network: impl Into<String>) -> Self {
        Self {
            version: SCHEMA_VERSION,
            owner_orders: HashMap::new(),
            last_processed_block: None,
            last_notified_error: None,
            network: network.into(),
        }
    }

    /// Loads the registry for `network` from `store`, treating missing keys
    /// as defaults.
    pub fn load(store: &RegistryStore, network: &str) -> Result<Self, registry_store::Error> {
        store.load_registry(network)
    }

    /// Inserts `order` under `owner` unless its `params` triple is already
    /// present for that owner (invariant 2). Returns whether the owner was
    /// previously unseen.
    pub fn add(&mut self, owner: Address, order: ConditionalOrder) -> bool {
        let is_new_owner = !self.owner_orders.contains_key(&owner);
        let orders = self.owner_orders.entry(owner).or_default();
        let already_present = orders.iter().any(|o| o.params == order.params);
        if !already_present {
            orders.insert(order);
        }
        tracing::debug!(
            %owner,
            new_owner = is_new_owner,
            already_present,
            "registry add"
        );
        is_new_owner
    }

    /// Removes every conditional order for `owner` whose proof is non-null
    /// and whose merkle root differs from `new_root`, in response to a
    /// `MerkleRootSet` event superseding an older published batch.
    pub fn flush(&mut self, owner: Address, new_root: H256) -> usize {
        let Some(orders) = self.owner_orders.get_mut(&owner) else {
            return 0;
        };
        let before = orders.len();
        let retained: BTreeSet<_> = orders
            .iter()
            .filter(|order| match &order.proof {
                Some(proof) => proof.merkle_root == new_root,
                None => true,
            })
            .cloned()
            .collect();
        let removed = before - retained.len();
        *orders = retained;
        if removed > 0 {
            tracing::debug!(%owner, %new_root, removed, "registry flush");
        }
        removed
    }

    /// Permanently removes a single conditional order (`DROP` filter action
    /// or a handler `DONT_TRY_AGAIN` result).
    pub fn delete(&mut self, owner: Address, tx: H256, params: &crate::domain::conditional_order::ConditionalOrderParams) -> bool {
        let Some(orders) = self.owner_orders.get_mut(&owner) else {
            return false;
        };
        let before = orders.len();
        let retained: BTreeSet<_> = orders
            .iter()
            .filter(|order| !(order.tx == tx && &order.params == params))
            .cloned()
            .collect();
        let removed = before != retained.len();
        *orders = retained;
        removed
    }

    pub fn num_orders(&self) -> usize {
        self.owner_orders.values().map(|s| s.len()).sum()
    }

    pub fn num_owners(&self) -> usize {
        self.owner_orders.values().filter(|s| !s.is_empty()).count()
    }

    /// Iterates `(owner, order)` pairs, used by the Block Processor to drive
    /// the Order Poller.
    pub fn iter(&self) -> impl Iterator<Item = (Address, &ConditionalOrder)> {
        self.owner_orders
            .iter()
            .flat_map(|(owner, orders)| orders.iter().map(move |o| (*owner, o)))
    }

    /// Replaces a conditional order in place after a poll mutates its
    /// `last_poll`/`orders` fields. `params` identifies the order; `update`
    /// receives an owned clone of the current state.
    pub fn mutate<F>(&mut self, owner: Address, params: &crate::domain::conditional_order::ConditionalOrderParams, update: F)
    where
        F: FnOnce(&mut ConditionalOrder),
    {
        let Some(orders) = self.owner_orders.get_mut(&owner) else {
            return;
        };
        if let Some(mut order) = orders.iter().find(|o| &o.params == params).cloned() {
            orders.remove(&order);
            update(&mut order);
            orders.insert(order);
        }
    }

    /// Persists the registry as a single atomic batch.
    pub fn write(&self, store: &RegistryStore) -> Result<(), registry_store::Error> {
        store.write_registry(self)
    }
}

//! Durable, atomic, versioned registry persistence, backed by `sled`, an
//! embedded ordered key/value store with atomic batch writes.

use {
    crate::domain::{
        conditional_order::{ConditionalOrder, RegistryBlock},
        eth::Address,
        registry::{Registry, SCHEMA_VERSION},
    },
    chrono::{DateTime, Utc},
    std::{collections::HashMap, path::Path},
};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),
    #[error("serialisation error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error(
        "registry schema version {found} is newer than the {supported} this binary supports"
    )]
    UnsupportedVersion { found: u32, supported: u32 },
    #[error("malformed LAST_NOTIFIED_ERROR timestamp")]
    MalformedTimestamp,
}

fn key(suffix: &str, network: &str) -> String {
    format!("{suffix}_{network}")
}

const VERSION_KEY: &str = "CONDITIONAL_ORDER_REGISTRY_VERSION";
const REGISTRY_KEY: &str = "CONDITIONAL_ORDER_REGISTRY";
const LAST_PROCESSED_BLOCK_KEY: &str = "LAST_PROCESSED_BLOCK";
const LAST_NOTIFIED_ERROR_KEY: &str = "LAST_NOTIFIED_ERROR";

/// On-disk representation of `owner -> orders`. A plain map/set does not
/// round-trip through `serde_json` with stable key types for non-string
/// keys, so the schema is an explicit array of pairs instead.
#[derive(Debug, serde::Serialize, serde::Deserialize)]
struct OwnerOrdersDto(Vec<(Address, Vec<ConditionalOrder>)>);

impl From<&HashMap<Address, std::collections::BTreeSet<ConditionalOrder>>> for OwnerOrdersDto {
    fn from(value: &HashMap<Address, std::collections::BTreeSet<ConditionalOrder>>) -> Self {
        Self(
            value
                .iter()
                .map(|(owner, orders)| (*owner, orders.iter().cloned().collect()))
                .collect(),
        )
    }
}

impl From<OwnerOrdersDto> for HashMap<Address, std::collections::BTreeSet<ConditionalOrder>> {
    fn from(value: OwnerOrdersDto) -> Self {
        value
            .0
            .into_iter()
            .map(|(owner, orders)| (owner, orders.into_iter().collect()))
            .collect()
    }
}

/// Facade over the embedded key/value store. Namespaced by network id so one
/// process may host multiple chains in one store.
#[derive(Clone)]
pub struct RegistryStore {
    db: sled::Db,
}

impl RegistryStore {
    pub fn open(path: &Path) -> Result<Self, Error> {
        let db = sled::open(path)?;
        Ok(Self { db })
    }

    #[cfg(test)]
    pub fn open_temporary() -> (Self, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = Self::open(dir.path()).unwrap();
        (store, dir)
    }

    /// An in-memory, non-durable store backing a single historical replay:
    /// `replay-block`/`replay-tx` never persist their throwaway registry.
    pub fn open_ephemeral() -> Result<Self, Error> {
        let db = sled::Config::new().temporary(true).open()?;
        Ok(Self { db })
    }

    fn get(&self, key: &str) -> Result<Option<sled::IVec>, Error> {
        Ok(self.db.get(key)?)
    }

    /// Loads the registry for `network`. A missing version key means "empty
    /// registry at schema v1"; any other missing key falls back to its
    /// default.
    pub fn load_registry(&self, network: &str) -> Result<Registry, Error> {
        let version_key = key(VERSION_KEY, network);
        let version: u32 = match self.get(&version_key)? {
            Some(bytes) => std::str::from_utf8(&bytes)
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(1),
            None => 1,
        };
        let version = self.migrate_if_needed(network, version)?;

        let owner_orders = match self.get(&key(REGISTRY_KEY, network))? {
            Some(bytes) => {
                let dto: OwnerOrdersDto = serde_json::from_slice(&bytes)?;
                dto.into()
            }
            None => HashMap::new(),
        };
        let last_processed_block = match self.get(&key(LAST_PROCESSED_BLOCK_KEY, network))? {
            Some(bytes) => Some(serde_json::from_slice::<RegistryBlock>(&bytes)?),
            None => None,
        };
        let last_notified_error = match self.get(&key(LAST_NOTIFIED_ERROR_KEY, network))? {
            Some(bytes) => Some(
                std::str::from_utf8(&bytes)
                    .ok()
                    .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                    .map(|dt| dt.with_timezone(&Utc))
                    .ok_or(Error::MalformedTimestamp)?,
            ),
            None => None,
        };

        Ok(Registry {
            version,
            owner_orders,
            last_processed_block,
            last_notified_error,
            network: network.to_string(),
        })
    }

    /// Applies schema migrations in sequence. The current schema is v1, so
    /// this is currently a no-op beyond rejecting versions from the future:
    /// a binary must never silently drop data from a registry written by a
    /// newer schema.
    fn migrate_if_needed(&self, _network: &str, version: u32) -> Result<u32, Error> {
        if version > SCHEMA_VERSION {
            return Err(Error::UnsupportedVersion {
                found: version,
                supported: SCHEMA_VERSION,
            });
        }
        Ok(SCHEMA_VERSION)
    }

    /// Persists `registry` as one atomic batch: version, `owner_orders`,
    /// `last_processed_block`, and `last_notified_error`, with delete
    /// semantics for the latter two when they are `None`.
    pub fn write_registry(&self, registry: &Registry) -> Result<(), Error> {
        let network = &registry.network;
        let mut batch = sled::Batch::default();
        batch.insert(
            key(VERSION_KEY, network).as_bytes(),
            registry.version.to_string().as_bytes(),
        );
        let dto = OwnerOrdersDto::from(&registry.owner_orders);
        batch.insert(
            key(REGISTRY_KEY, network).as_bytes(),
            serde_json::to_vec(&dto)?,
        );
        match &registry.last_processed_block {
            Some(block) => batch.insert(
                key(LAST_PROCESSED_BLOCK_KEY, network).as_bytes(),
                serde_json::to_vec(block)?,
            ),
            None => batch.remove(key(LAST_PROCESSED_BLOCK_KEY, network).as_bytes()),
        }
        match &registry.last_notified_error {
            Some(ts) => batch.insert(
                key(LAST_NOTIFIED_ERROR_KEY, network).as_bytes(),
                ts.to_rfc3339().as_bytes(),
            ),
            None => batch.remove(key(LAST_NOTIFIED_ERROR_KEY, network).as_bytes()),
        }
        self.db.apply_batch(batch)?;
        // sled batches are atomic but not flushed to disk by default; a
        // crash right after `apply_batch` could still lose the write, so we
        // flush synchronously once per processed block.
        self.db.flush()?;
        Ok(())
    }

    /// Closes the store, releasing all resources. Idempotent.
    pub fn close(&self) {
        let _ = self.db.flush();
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::domain::{conditional_order::ConditionalOrderParams, eth::{Bytes, H256}},
    };

    fn sample_registry(network: &str) -> Registry {
        let mut registry = Registry::empty(network);
        let owner = Address::default();
        let order = ConditionalOrder::new(
            H256::default(),
            ConditionalOrderParams {
                handler: Address::default(),
                salt: H256::default(),
                static_input: Bytes::new(),
            },
            None,
            Address::default(),
        );
        registry.add(owner, order);
        registry.last_processed_block = Some(RegistryBlock {
            number: 42,
            hash: H256::default(),
            timestamp: 1_700_000_000,
        });
        registry
    }

    #[test]
    fn round_trips_a_populated_registry() {
        let (store, _dir) = RegistryStore::open_temporary();
        let registry = sample_registry("mainnet");
        store.write_registry(&registry).unwrap();

        let loaded = store.load_registry("mainnet").unwrap();
        assert_eq!(loaded.num_orders(), 1);
        assert_eq!(loaded.last_processed_block.unwrap().number, 42);
        assert_eq!(loaded.version, SCHEMA_VERSION);
    }

    #[test]
    fn round_trips_an_empty_registry() {
        let (store, _dir) = RegistryStore::open_temporary();
        let registry = Registry::empty("mainnet");
        store.write_registry(&registry).unwrap();

        let loaded = store.load_registry("mainnet").unwrap();
        assert_eq!(loaded.num_orders(), 0);
        assert!(loaded.last_processed_block.is_none());
    }

    #[test]
    fn missing_keys_load_as_defaults() {
        let (store, _dir) = RegistryStore::open_temporary();
        let loaded = store.load_registry("never-written").unwrap();
        assert_eq!(loaded.num_orders(), 0);
        assert_eq!(loaded.version, SCHEMA_VERSION);
        assert!(loaded.last_processed_block.is_none());
        assert!(loaded.last_notified_error.is_none());
    }

    #[test]
    fn networks_are_namespaced_independently() {
        let (store, _dir) = RegistryStore::open_temporary();
        store.write_registry(&sample_registry("mainnet")).unwrap();
        store.write_registry(&Registry::empty("gnosis")).unwrap();

        assert_eq!(store.load_registry("mainnet").unwrap().num_orders(), 1);
        assert_eq!(store.load_registry("gnosis").unwrap().num_orders(), 0);
    }

    #[test]
    fn rejects_a_future_schema_version() {
        let (store, _dir) = RegistryStore::open_temporary();
        store
            .db
            .insert(key(VERSION_KEY, "mainnet"), (SCHEMA_VERSION + 1).to_string().as_bytes())
            .unwrap();
        let err = store.load_registry("mainnet").unwrap_err();
        assert!(matches!(err, Error::UnsupportedVersion { .. }));
    }
}

//! The durable conditional-order data model.

use {
    crate::domain::eth::{Address, Bytes, H256},
    chrono::{DateTime, Utc},
    serde::{Deserialize, Serialize},
    std::collections::BTreeMap,
};

/// Last block fully processed for a chain. `None` before the first run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryBlock {
    pub number: u64,
    pub hash: H256,
    pub timestamp: i64,
}

/// Identity of a conditional order within an owner: `(handler, salt,
/// staticInput)`, compared bytewise.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ConditionalOrderParams {
    pub handler: Address,
    pub salt: H256,
    pub static_input: Bytes,
}

/// Membership proof for a merkle-published batch of orders. `None` means a
/// "single" order created directly on-chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proof {
    pub merkle_root: H256,
    pub path: Vec<H256>,
}

/// A 56 byte opaque identifier for a discrete (off-chain) order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct OrderUid(pub [u8; 56]);

impl std::fmt::Display for OrderUid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{}", const_hex::encode(self.0))
    }
}

// Serialised as a hex string rather than a byte array so that `OrderUid` can
// be used as a JSON object key (serde_json rejects non-string map keys).
impl Serialize for OrderUid {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for OrderUid {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

impl std::str::FromStr for OrderUid {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = const_hex::decode(s.trim_start_matches("0x"))?;
        let bytes: [u8; 56] = bytes
            .try_into()
            .map_err(|_| anyhow::anyhow!("order uid must be 56 bytes"))?;
        Ok(Self(bytes))
    }
}

/// Status of a discrete order we have already emitted for a conditional
/// order. Only ever advances `Submitted -> Filled`; never removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiscreteOrderStatus {
    Submitted,
    Filled,
}

/// Result of the most recent poll of a conditional order, recorded for
/// diagnostics and for handler-supplied deferral hints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LastPoll {
    pub timestamp: DateTime<Utc>,
    pub block_number: u64,
    pub result: PollResultSummary,
}

/// A compact, serialisable summary of [`crate::domain::poll_result::PollResult`]
/// suitable for persistence (the full result, e.g. the signed order, is not
/// durable state).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PollResultSummary {
    Success,
    TryNextBlock,
    TryAtBlock(u64),
    TryAtEpoch(i64),
    DontTryAgain,
    UnexpectedError,
}

/// A conditional order created on-chain, tracked until flushed or deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConditionalOrder {
    pub tx: H256,
    pub params: ConditionalOrderParams,
    pub proof: Option<Proof>,
    pub orders: BTreeMap<OrderUid, DiscreteOrderStatus>,
    pub source_contract: Address,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub last_poll: Option<LastPollEq>,
}

/// [`LastPoll`] wrapper that is comparable so [`ConditionalOrder`] can derive
/// `Eq`/`Ord` for set membership: identity is the `params` triple, so
/// equality here is a formality required by the collection, not a semantic
/// comparison.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LastPollEq(pub LastPoll);

impl PartialEq for LastPollEq {
    fn eq(&self, _other: &Self) -> bool {
        true
    }
}
impl Eq for LastPollEq {}

impl PartialOrd for ConditionalOrder {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ConditionalOrder {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.params.cmp(&other.params)
    }
}

impl ConditionalOrder {
    pub fn new(
        tx: H256,
        params: ConditionalOrderParams,
        proof: Option<Proof>,
        source_contract: Address,
    ) -> Self {
        Self {
            tx,
            params,
            proof,
            orders: BTreeMap::new(),
            source_contract,
            last_poll: None,
        }
    }

    pub fn record_poll(&mut self, block_number: u64, timestamp: DateTime<Utc>, result: PollResultSummary) {
        self.last_poll = Some(LastPollEq(LastPoll {
            timestamp,
            block_number,
            result,
        }));
    }
}

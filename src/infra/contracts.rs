//! ABI definitions and log decoding for the two composable-order contract
//! events the core understands: it subscribes to both
//! `ConditionalOrderCreated` and `MerkleRootSet`.

use {
    crate::{
        domain::{
            conditional_order::{ConditionalOrderParams, Proof},
            eth::{Address, Bytes, H256},
        },
        infra::blockchain::RawLog,
    },
    alloy::sol_types::{sol, SolEvent, SolValue},
};

sol! {
    event ConditionalOrderCreated(address indexed owner, ComposableCoWParams params);

    #[derive(Debug)]
    struct ComposableCoWParams {
        address handler;
        bytes32 salt;
        bytes staticInput;
    }

    event MerkleRootSet(address indexed owner, bytes32 root, ComposableCoWProof proof);

    #[derive(Debug)]
    struct ComposableCoWProof {
        bytes32 location;
        bytes data;
    }

    /// One leaf of an on-chain-emitted merkle batch: the order it publishes
    /// plus the merkle path proving its membership under the event's root.
    /// ABI-encoded as `data` on `ComposableCoWProof` when `location` is the
    /// on-chain-emission sentinel, since `MerkleRootSet` itself only carries
    /// the root, not the leaves.
    #[derive(Debug)]
    struct MerkleLeaf {
        ComposableCoWParams params;
        bytes32[] path;
    }
}

/// The two topic0 hashes this watcher subscribes to, used to build the
/// `eth_getLogs` filter's `topics[0]` OR-match.
pub fn topics() -> [H256; 2] {
    [
        H256(ConditionalOrderCreated::SIGNATURE_HASH),
        H256(MerkleRootSet::SIGNATURE_HASH),
    ]
}

#[derive(Debug, Clone)]
pub struct DecodedCreated {
    pub owner: Address,
    pub tx: H256,
    pub block_number: u64,
    pub log_index: u64,
    pub source_contract: Address,
    pub params: ConditionalOrderParams,
}

#[derive(Debug, Clone)]
pub struct DecodedMerkleRootSet {
    pub owner: Address,
    pub tx: H256,
    pub block_number: u64,
    pub log_index: u64,
    pub source_contract: Address,
    pub root: H256,
    /// `true` when the proof's orders were emitted on-chain alongside this
    /// event. Any other proof location is out of scope for this watcher.
    pub is_onchain_emission: bool,
    /// The batch's leaves, decoded from `proof.data` when
    /// `is_onchain_emission`; empty otherwise (a location this watcher does
    /// not resolve, e.g. off-chain storage).
    pub orders: Vec<(ConditionalOrderParams, Vec<H256>)>,
}

#[derive(Debug, Clone)]
pub enum DecodedEvent {
    Created(DecodedCreated),
    MerkleRootSet(DecodedMerkleRootSet),
}

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("unknown topic0")]
    UnknownTopic,
    #[error("abi decode error: {0}")]
    Abi(#[from] alloy::sol_types::Error),
}

/// Decodes a single raw log into a [`DecodedEvent`]. Logs that fail to
/// decode, or whose topic0 matches neither known event, are the caller's
/// responsibility to drop; this is not a fatal condition.
pub fn decode(log: &RawLog) -> Result<DecodedEvent, DecodeError> {
    let topic0 = *log.topics.first().ok_or(DecodeError::UnknownTopic)?;

    let alloy_log = alloy::primitives::Log {
        address: log.address.0,
        data: alloy::primitives::LogData::new(
            log.topics.iter().map(|t| t.0).collect(),
            log.data.clone().into(),
        )
        .ok_or(DecodeError::UnknownTopic)?,
    };

    if topic0.0 == ConditionalOrderCreated::SIGNATURE_HASH {
        let decoded = ConditionalOrderCreated::decode_log(&alloy_log)?;
        Ok(DecodedEvent::Created(DecodedCreated {
            owner: Address(decoded.owner),
            tx: log.transaction_hash,
            block_number: log.block_number,
            log_index: log.log_index,
            source_contract: log.address,
            params: ConditionalOrderParams {
                handler: Address(decoded.params.handler),
                salt: H256(decoded.params.salt),
                static_input: Bytes::from(decoded.params.staticInput.to_vec()),
            },
        }))
    } else if topic0.0 == MerkleRootSet::SIGNATURE_HASH {
        let decoded = MerkleRootSet::decode_log(&alloy_log)?;
        // location == 0 is the sentinel this watcher treats as "on-chain
        // emission" (the proof's orders travel in this same event).
        let is_onchain_emission = decoded.proof.location.is_zero();
        let orders = if is_onchain_emission {
            Vec::<MerkleLeaf>::abi_decode(&decoded.proof.data)?
                .into_iter()
                .map(|leaf| {
                    (
                        ConditionalOrderParams {
                            handler: Address(leaf.params.handler),
                            salt: H256(leaf.params.salt),
                            static_input: Bytes::from(leaf.params.staticInput.to_vec()),
                        },
                        leaf.path.into_iter().map(H256).collect(),
                    )
                })
                .collect()
        } else {
            Vec::new()
        };
        Ok(DecodedEvent::MerkleRootSet(DecodedMerkleRootSet {
            owner: Address(decoded.owner),
            tx: log.transaction_hash,
            block_number: log.block_number,
            log_index: log.log_index,
            source_contract: log.address,
            root: H256(decoded.root),
            is_onchain_emission,
            orders,
        }))
    } else {
        Err(DecodeError::UnknownTopic)
    }
}

/// Constructs the [`Proof`] a decoded `MerkleRootSet` event implies for
/// orders published alongside it.
pub fn proof_for(event: &DecodedMerkleRootSet, path: Vec<H256>) -> Proof {
    Proof {
        merkle_root: event.root,
        path,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topics_are_distinct() {
        let [a, b] = topics();
        assert_ne!(a, b);
    }
}

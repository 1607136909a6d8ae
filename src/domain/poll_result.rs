//! The closed sum over handler-library poll outcomes, expressed as a tagged
//! variant rather than the loosely-typed result objects a handler library
//! hands back over its native interface.

use {
    crate::domain::{
        conditional_order::OrderUid,
        eth::{Address, Bytes},
    },
    alloy::primitives::keccak256,
};

/// A discrete order and signature ready to be submitted to the order-book,
/// as produced by the external handler library on `SUCCESS`.
#[derive(Debug, Clone)]
pub struct SignedOrder {
    pub order: Bytes,
    pub signature: Bytes,
    pub owner: Address,
    pub valid_to: u32,
}

impl SignedOrder {
    /// Computes the order UID: `keccak256(order) || owner || validTo`, the
    /// 56-byte scheme a GPv2-style order-book expects.
    pub fn uid(&self) -> OrderUid {
        let digest = keccak256(self.order.as_ref());
        let mut bytes = [0u8; 56];
        bytes[0..32].copy_from_slice(digest.as_slice());
        bytes[32..52].copy_from_slice(self.owner.0.as_slice());
        bytes[52..56].copy_from_slice(&self.valid_to.to_be_bytes());
        OrderUid(bytes)
    }
}

/// Outcome of asking the handler library to evaluate one conditional order
/// against a block context.
#[derive(Debug, Clone)]
pub enum PollResult {
    /// The predicate is satisfied; submit the enclosed order.
    Success(SignedOrder),
    /// Predicate not yet satisfied; retry on the very next block.
    TryNextBlock(String),
    /// Predicate not yet satisfied; retry no earlier than the given block.
    TryAtBlock(u64, String),
    /// Predicate not yet satisfied; retry no earlier than the given unix
    /// timestamp.
    TryAtEpoch(i64, String),
    /// The conditional order will never become satisfiable; delete it.
    DontTryAgain(String),
    /// The handler raised an error we don't understand; count it, but the
    /// conditional order survives for the next block.
    UnexpectedError(String),
}

impl PollResult {
    pub fn reason(&self) -> Option<&str> {
        match self {
            PollResult::Success(_) => None,
            PollResult::TryNextBlock(r)
            | PollResult::TryAtBlock(_, r)
            | PollResult::TryAtEpoch(_, r)
            | PollResult::DontTryAgain(r)
            | PollResult::UnexpectedError(r) => Some(r),
        }
    }
}

//! The conditional-order "handler" library contract: an external
//! collaborator referenced only through this narrow interface.

use crate::domain::{conditional_order::ConditionalOrderParams, poll_result::PollResult};

/// The block context a handler evaluates a conditional order against.
/// `overrides` lets historical replay pin the block to a value different
/// from the current tip.
#[derive(Debug, Clone, Copy)]
pub struct PollContext {
    pub block_number: u64,
    pub block_timestamp: i64,
    pub overrides: Option<BlockOverrides>,
}

#[derive(Debug, Clone, Copy)]
pub struct BlockOverrides {
    pub block_number: u64,
    pub block_timestamp: i64,
}

impl PollContext {
    /// The block number an evaluation should be pinned to: the override if
    /// present, otherwise the live block.
    pub fn effective_block_number(&self) -> u64 {
        self.overrides.map(|o| o.block_number).unwrap_or(self.block_number)
    }

    pub fn effective_timestamp(&self) -> i64 {
        self.overrides
            .map(|o| o.block_timestamp)
            .unwrap_or(self.block_timestamp)
    }
}

/// Evaluator for a specific conditional-order family, keyed by `handler`
/// address. Implementations live outside the core; this is the seam.
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait Handler: Send + Sync {
    async fn poll(&self, params: &ConditionalOrderParams, context: PollContext) -> PollResult;
}

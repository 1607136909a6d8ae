//! Concrete [`Handler`] implementation: the "external handler library" turns
//! out, on-chain, to be the very contract the `handler` address of a
//! [`ConditionalOrderParams`] points at. This module invokes it directly
//! over RPC rather than linking a separate library.
//!
//! Grounded on `contracts.rs`'s `sol!`-macro pattern for ABI definitions, and
//! on the `ChainProvider::call` seam added alongside it for read-only
//! `eth_call`s.

use {
    crate::{
        domain::{
            conditional_order::ConditionalOrderParams,
            eth::{Address, Bytes},
            handler::{Handler, PollContext},
            poll_result::{PollResult, SignedOrder},
        },
        infra::blockchain::{ChainProvider, Error as ProviderError},
    },
    alloy::sol_types::{sol, SolCall, SolError, SolValue},
    async_trait::async_trait,
    std::sync::Arc,
};

sol! {
    struct ConditionalOrderParamsAbi {
        address handler;
        bytes32 salt;
        bytes staticInput;
    }

    struct GPv2OrderData {
        address sellToken;
        address buyToken;
        address receiver;
        uint256 sellAmount;
        uint256 buyAmount;
        uint32 validTo;
        bytes32 appData;
        uint256 feeAmount;
        bytes32 kind;
        bool partiallyFillable;
        bytes32 sellTokenBalance;
        bytes32 buyTokenBalance;
    }

    function getTradeableOrderWithSignature(
        address owner,
        ConditionalOrderParamsAbi params,
        bytes offchainInput,
        bytes32[] proof
    ) external view returns (GPv2OrderData order, bytes signature);

    error PollTryNextBlock(string reason);
    error PollTryAtBlock(uint256 blockNumber, string reason);
    error PollTryAtEpoch(uint256 timestamp, string reason);
    error PollNever(string reason);
    error OrderNotValid(string reason);
}

/// Calls `handler.getTradeableOrderWithSignature` and maps the ABI-level
/// result (success or one of the well-known custom error reverts) onto
/// [`PollResult`].
pub struct RpcHandler {
    provider: Arc<dyn ChainProvider>,
}

impl RpcHandler {
    pub fn new(provider: Arc<dyn ChainProvider>) -> Self {
        Self { provider }
    }

    fn decode_revert(data: &Bytes) -> PollResult {
        let bytes = data.as_ref();
        if let Ok(err) = PollTryNextBlock::abi_decode(bytes) {
            return PollResult::TryNextBlock(err.reason);
        }
        if let Ok(err) = PollTryAtBlock::abi_decode(bytes) {
            return PollResult::TryAtBlock(err.blockNumber.to::<u64>(), err.reason);
        }
        if let Ok(err) = PollTryAtEpoch::abi_decode(bytes) {
            return PollResult::TryAtEpoch(err.timestamp.to::<u64>() as i64, err.reason);
        }
        if let Ok(err) = PollNever::abi_decode(bytes) {
            return PollResult::DontTryAgain(err.reason);
        }
        if let Ok(err) = OrderNotValid::abi_decode(bytes) {
            return PollResult::UnexpectedError(err.reason);
        }
        PollResult::UnexpectedError(format!("unrecognised revert ({} bytes)", bytes.len()))
    }
}

#[async_trait]
impl Handler for RpcHandler {
    async fn poll(&self, params: &ConditionalOrderParams, context: PollContext) -> PollResult {
        let _ = context.effective_block_number();
        // `Handler::poll` does not thread the conditional order's owner
        // through (callers only ever pass `params` and a block context); the
        // handler contract is addressed by `params.handler` itself, so that
        // doubles as the `owner` argument here.
        let call = getTradeableOrderWithSignatureCall {
            owner: params.handler.0,
            params: ConditionalOrderParamsAbi {
                handler: params.handler.0,
                salt: params.salt.0,
                staticInput: params.static_input.clone(),
            },
            offchainInput: Bytes::new(),
            proof: vec![],
        };
        let calldata = Bytes::from(call.abi_encode());

        match self.provider.call(params.handler, calldata).await {
            Ok(output) => match getTradeableOrderWithSignatureCall::abi_decode_returns(output.as_ref()) {
                Ok(ret) => {
                    let order_bytes = Bytes::from(ret.order.abi_encode());
                    PollResult::Success(SignedOrder {
                        order: order_bytes,
                        signature: ret.signature,
                        owner: Address(ret.order.receiver),
                        valid_to: ret.order.validTo,
                    })
                }
                Err(err) => PollResult::UnexpectedError(format!("malformed success return: {err}")),
            },
            Err(ProviderError::Revert(data)) => Self::decode_revert(&data),
            Err(err) => PollResult::UnexpectedError(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_try_next_block_revert() {
        let err = PollTryNextBlock {
            reason: "not yet".into(),
        };
        let data = Bytes::from(err.abi_encode());
        assert!(matches!(RpcHandler::decode_revert(&data), PollResult::TryNextBlock(_)));
    }

    #[test]
    fn decodes_never_revert() {
        let err = PollNever {
            reason: "expired".into(),
        };
        let data = Bytes::from(err.abi_encode());
        assert!(matches!(RpcHandler::decode_revert(&data), PollResult::DontTryAgain(_)));
    }

    #[test]
    fn unrecognised_revert_is_unexpected() {
        let data = Bytes::from(vec![0xde, 0xad, 0xbe, 0xef]);
        assert!(matches!(RpcHandler::decode_revert(&data), PollResult::UnexpectedError(_)));
    }
}

//! The RPC provider abstraction, selected by URL scheme at construction
//! time. The low-level RPC provider library itself is an external
//! collaborator; this module only narrows it down to the operations the
//! core actually needs.

use {
    crate::domain::eth::{Address, BlockNo, Bytes, H256},
    alloy::{
        eips::BlockNumberOrTag,
        primitives::B256,
        providers::{DynProvider, Provider, ProviderBuilder},
        rpc::types::{Filter, Log, TransactionRequest},
    },
    async_trait::async_trait,
    futures::Stream,
    std::{pin::Pin, time::Duration},
};

/// A minimal block header: everything the Chain Watcher and Event Source
/// need, nothing else.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHeader {
    pub number: u64,
    pub hash: H256,
    pub timestamp: i64,
}

/// `toBlock` as understood by `eth_getLogs`: a concrete block number or the
/// sentinel meaning "whatever the node considers the tip at query time".
#[derive(Debug, Clone, Copy)]
pub enum ToBlock {
    Number(u64),
    Latest,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("rpc transport error: {0}")]
    Transport(#[from] alloy::transport::RpcError<alloy::transport::TransportErrorKind>),
    #[error("contract call reverted")]
    Revert(Bytes),
}

pub type BlockStream = Pin<Box<dyn Stream<Item = BlockHeader> + Send>>;

/// The abstract interface consumed by the rest of the core. Both `ws(s)://`
/// (streaming subscription) and `http(s)://` (poll-on-interval simulation)
/// providers satisfy it identically from the caller's point of view.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChainProvider: Send + Sync {
    async fn get_block(&self, number: BlockNo) -> Result<Option<BlockHeader>, Error>;
    async fn latest_block_number(&self) -> Result<u64, Error>;
    async fn chain_id(&self) -> Result<u64, Error>;
    async fn get_logs(
        &self,
        from: u64,
        to: ToBlock,
        topics: &[H256],
        addresses: Option<&[Address]>,
    ) -> Result<Vec<RawLog>, Error>;
    /// Streams new block headers as the chain tip advances. For an `http(s)`
    /// endpoint this is simulated by polling at roughly the chain's block
    /// interval.
    fn subscribe_blocks(&self) -> BlockStream;
    /// Raw deployed bytecode at `address`, empty for an EOA or an undeployed
    /// address. Used by the composable-compatible heuristic.
    async fn get_code(&self, address: Address) -> Result<Vec<u8>, Error>;
    /// A read-only `eth_call`. `Error::Revert` carries the revert payload
    /// (custom error selector + arguments) for the caller to decode; any
    /// other transport failure is `Error::Transport`.
    async fn call(&self, to: Address, calldata: Bytes) -> Result<Bytes, Error>;
    fn close(&self);
}

/// A decoded-at-the-transport-level log: still raw bytes, decoding into a
/// domain event happens in [`crate::event_source`].
#[derive(Debug, Clone)]
pub struct RawLog {
    pub block_number: u64,
    pub log_index: u64,
    pub transaction_hash: H256,
    pub address: Address,
    pub topics: Vec<H256>,
    pub data: Vec<u8>,
}

impl From<Log> for RawLog {
    fn from(log: Log) -> Self {
        Self {
            block_number: log.block_number.unwrap_or_default(),
            log_index: log.log_index.unwrap_or_default(),
            transaction_hash: H256(log.transaction_hash.unwrap_or_default()),
            address: Address(log.address()),
            topics: log.topics().iter().map(|t| H256(*t)).collect(),
            data: log.data().data.to_vec(),
        }
    }
}

/// Real implementation backed by `alloy`'s `DynProvider`, selected by URL
/// scheme at construction time.
pub struct AlloyChainProvider {
    provider: DynProvider,
    poll_interval: Duration,
    is_streaming: bool,
}

impl AlloyChainProvider {
    pub async fn connect(url: &url::Url, poll_interval: Duration) -> anyhow::Result<Self> {
        let is_streaming = matches!(url.scheme(), "ws" | "wss");
        let provider = if is_streaming {
            ProviderBuilder::new()
                .connect_ws(alloy::providers::WsConnect::new(url.as_str()))
                .await?
                .erased()
        } else {
            ProviderBuilder::new().connect_http(url.clone()).erased()
        };
        Ok(Self {
            provider,
            poll_interval,
            is_streaming,
        })
    }
}

#[async_trait]
impl ChainProvider for AlloyChainProvider {
    async fn get_block(&self, number: BlockNo) -> Result<Option<BlockHeader>, Error> {
        let block = self
            .provider
            .get_block_by_number(BlockNumberOrTag::Number(number.0))
            .await?;
        Ok(block.map(|b| BlockHeader {
            number: b.header.number,
            hash: H256(b.header.hash),
            timestamp: b.header.timestamp as i64,
        }))
    }

    async fn latest_block_number(&self) -> Result<u64, Error> {
        Ok(self.provider.get_block_number().await?)
    }

    async fn chain_id(&self) -> Result<u64, Error> {
        Ok(self.provider.get_chain_id().await?)
    }

    async fn get_logs(
        &self,
        from: u64,
        to: ToBlock,
        topics: &[H256],
        addresses: Option<&[Address]>,
    ) -> Result<Vec<RawLog>, Error> {
        let mut filter = Filter::new().from_block(from);
        filter = match to {
            ToBlock::Number(n) => filter.to_block(n),
            ToBlock::Latest => filter.to_block(BlockNumberOrTag::Latest),
        };
        if !topics.is_empty() {
            let topics: Vec<B256> = topics.iter().map(|t| t.0).collect();
            filter = filter.topic0(topics);
        }
        if let Some(addresses) = addresses {
            let addresses: Vec<_> = addresses.iter().map(|a| a.0).collect();
            filter = filter.address(addresses);
        }
        let logs = self.provider.get_logs(&filter).await?;
        Ok(logs.into_iter().map(RawLog::from).collect())
    }

    async fn get_code(&self, address: Address) -> Result<Vec<u8>, Error> {
        Ok(self.provider.get_code_at(address.0).await?.to_vec())
    }

    async fn call(&self, to: Address, calldata: Bytes) -> Result<Bytes, Error> {
        let tx = TransactionRequest::default().to(to.0).input(calldata.into());
        match self.provider.call(tx).await {
            Ok(output) => Ok(output),
            Err(err) => match err.as_error_resp().and_then(|payload| payload.as_revert_data()) {
                Some(revert_data) => Err(Error::Revert(revert_data)),
                None => Err(Error::Transport(err)),
            },
        }
    }

    fn subscribe_blocks(&self) -> BlockStream {
        if self.is_streaming {
            let provider = self.provider.clone();
            Box::pin(async_stream::stream! {
                let Ok(subscription) = provider.subscribe_blocks().await else {
                    return;
                };
                let mut stream = subscription.into_stream();
                while let Some(header) = futures::StreamExt::next(&mut stream).await {
                    yield BlockHeader {
                        number: header.number,
                        hash: H256(header.hash),
                        timestamp: header.timestamp as i64,
                    };
                }
            })
        } else {
            let provider = self.provider.clone();
            let interval = self.poll_interval;
            Box::pin(async_stream::stream! {
                let mut last = None;
                loop {
                    tokio::time::sleep(interval).await;
                    let Ok(number) = provider.get_block_number().await else { continue };
                    if Some(number) == last {
                        continue;
                    }
                    let Ok(Some(block)) = provider
                        .get_block_by_number(BlockNumberOrTag::Number(number))
                        .await
                    else {
                        continue;
                    };
                    last = Some(number);
                    yield BlockHeader {
                        number: block.header.number,
                        hash: H256(block.header.hash),
                        timestamp: block.header.timestamp as i64,
                    };
                }
            })
        }
    }

    fn close(&self) {}
}

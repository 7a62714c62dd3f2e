//! The chain-read capability the engine consumes. Every operation is pinned
//! to the run's block; implementations own their own rate limiting and
//! retry discipline so the engine never has to.

pub mod fixture;
pub mod http;

use crate::error::ProviderError;
use alloy::primitives::{Address, Bytes, B256};
use async_trait::async_trait;

pub use fixture::FixtureProvider;
pub use http::{HttpProvider, RpcSettings};

/// Log query shape. Address plus a set of accepted topic0 values; an empty
/// topic0 set matches any event of the address.
#[derive(Debug, Clone, Default)]
pub struct LogFilter {
    pub address: Option<Address>,
    pub topic0: Vec<B256>,
}

impl LogFilter {
    pub fn for_address(address: Address) -> Self {
        Self {
            address: Some(address),
            topic0: Vec::new(),
        }
    }

    pub fn with_topic0(mut self, topic: B256) -> Self {
        self.topic0.push(topic);
        self
    }

    pub fn with_topic0s(mut self, topics: impl IntoIterator<Item = B256>) -> Self {
        self.topic0.extend(topics);
        self
    }

    pub fn matches(&self, log: &LogEntry) -> bool {
        if let Some(address) = self.address {
            if log.address != address {
                return false;
            }
        }
        if self.topic0.is_empty() {
            return true;
        }
        log.topics
            .first()
            .is_some_and(|topic| self.topic0.contains(topic))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub address: Address,
    pub topics: Vec<B256>,
    pub data: Bytes,
    pub block_number: u64,
    pub log_index: u64,
}

/// Read-only chain access at a pinned block.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Deployed bytecode; empty for an EOA.
    async fn get_code(&self, address: Address) -> Result<Bytes, ProviderError>;

    /// One 32-byte storage word.
    async fn get_storage(&self, address: Address, slot: B256) -> Result<B256, ProviderError>;

    /// Static call with raw calldata.
    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes, ProviderError>;

    /// Logs from genesis up to the pinned block, in chain order.
    async fn get_logs(&self, filter: &LogFilter) -> Result<Vec<LogEntry>, ProviderError>;

    /// The pinned block number.
    async fn block_number(&self) -> Result<u64, ProviderError>;
}

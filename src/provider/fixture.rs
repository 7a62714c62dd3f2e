//! In-memory chain state for deterministic runs: integration tests and
//! offline replays both drive the engine through this provider.

use super::{LogEntry, LogFilter, Provider};
use crate::error::ProviderError;
use alloy::primitives::{Address, Bytes, B256, U256};
use async_trait::async_trait;
use std::collections::HashMap;

#[derive(Debug, Clone)]
enum CallOutcome {
    Return(Bytes),
    Revert(String),
}

/// Fixed chain state keyed the same way the RPC surface is keyed. Unregistered
/// calls revert, unregistered storage reads are zero, unregistered code is
/// empty -- the same shape a pristine chain would give.
#[derive(Debug, Clone, Default)]
pub struct FixtureProvider {
    block: u64,
    code: HashMap<Address, Bytes>,
    storage: HashMap<(Address, B256), B256>,
    calls: HashMap<(Address, Bytes), CallOutcome>,
    logs: Vec<LogEntry>,
}

impl FixtureProvider {
    pub fn new(block: u64) -> Self {
        Self {
            block,
            ..Self::default()
        }
    }

    pub fn with_code(mut self, address: Address, code: impl Into<Bytes>) -> Self {
        self.code.insert(address, code.into());
        self
    }

    /// Register a contract with placeholder runtime code.
    pub fn with_contract(self, address: Address) -> Self {
        self.with_code(address, Bytes::from_static(&[0x60, 0x80, 0x60, 0x40]))
    }

    pub fn with_storage(mut self, address: Address, slot: U256, value: B256) -> Self {
        self.storage
            .insert((address, B256::from(slot.to_be_bytes::<32>())), value);
        self
    }

    /// Store an address value left-padded into the slot word.
    pub fn with_storage_address(self, address: Address, slot: U256, value: Address) -> Self {
        let mut word = [0u8; 32];
        word[12..].copy_from_slice(value.as_slice());
        self.with_storage(address, slot, B256::from(word))
    }

    pub fn with_call(mut self, to: Address, data: impl Into<Bytes>, ret: impl Into<Bytes>) -> Self {
        self.calls
            .insert((to, data.into()), CallOutcome::Return(ret.into()));
        self
    }

    pub fn with_reverting_call(mut self, to: Address, data: impl Into<Bytes>) -> Self {
        self.calls.insert(
            (to, data.into()),
            CallOutcome::Revert("execution reverted".to_string()),
        );
        self
    }

    pub fn with_log(mut self, log: LogEntry) -> Self {
        self.logs.push(log);
        self
    }
}

#[async_trait]
impl Provider for FixtureProvider {
    async fn get_code(&self, address: Address) -> Result<Bytes, ProviderError> {
        Ok(self.code.get(&address).cloned().unwrap_or_default())
    }

    async fn get_storage(&self, address: Address, slot: B256) -> Result<B256, ProviderError> {
        Ok(self
            .storage
            .get(&(address, slot))
            .copied()
            .unwrap_or_default())
    }

    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes, ProviderError> {
        match self.calls.get(&(to, data)) {
            Some(CallOutcome::Return(ret)) => Ok(ret.clone()),
            Some(CallOutcome::Revert(reason)) => Err(ProviderError::Revert(reason.clone())),
            None => Err(ProviderError::Revert(
                "execution reverted: no fixture registered".to_string(),
            )),
        }
    }

    async fn get_logs(&self, filter: &LogFilter) -> Result<Vec<LogEntry>, ProviderError> {
        let mut matched: Vec<LogEntry> = self
            .logs
            .iter()
            .filter(|log| filter.matches(log))
            .cloned()
            .collect();
        matched.sort_by_key(|log| (log.block_number, log.log_index));
        Ok(matched)
    }

    async fn block_number(&self) -> Result<u64, ProviderError> {
        Ok(self.block)
    }
}

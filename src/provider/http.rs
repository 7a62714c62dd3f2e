use super::{LogEntry, LogFilter, Provider};
use crate::error::ProviderError;
use alloy::eips::BlockId;
use alloy::primitives::{Address, Bytes, B256, U256};
use alloy::providers::{Provider as AlloyProvider, ProviderBuilder, RootProvider};
use alloy::rpc::types::{Filter, TransactionInput, TransactionRequest};
use alloy::transports::http::Http;
use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;
use tokio::sync::Semaphore;

type HttpTransport = RootProvider<Http<reqwest::Client>>;

const DEFAULT_CONCURRENCY: usize = 25;
const DEFAULT_MAX_RETRIES: u32 = 3;
const DEFAULT_TIMEOUT_MS: u64 = 10_000;
const RETRY_BASE_DELAY_MS: u64 = 250;

/// Process-level RPC settings, loaded from the environment.
#[derive(Debug, Clone)]
pub struct RpcSettings {
    pub rpc_url: String,
    pub concurrency: usize,
    pub max_retries: u32,
    pub timeout: Duration,
}

impl RpcSettings {
    pub fn from_env() -> Result<Self, ProviderError> {
        let rpc_url = std::env::var("ETH_RPC_URL").map_err(|_| ProviderError::InvalidUrl {
            url: String::new(),
            reason: "ETH_RPC_URL must be set".to_string(),
        })?;
        validate_http_url(&rpc_url)?;

        let concurrency = std::env::var("DISCOVERY_CONCURRENCY")
            .ok()
            .and_then(|raw| raw.trim().parse::<usize>().ok())
            .map(|v| v.clamp(1, 256))
            .unwrap_or(DEFAULT_CONCURRENCY);
        let max_retries = std::env::var("DISCOVERY_RPC_RETRIES")
            .ok()
            .and_then(|raw| raw.trim().parse::<u32>().ok())
            .map(|v| v.min(10))
            .unwrap_or(DEFAULT_MAX_RETRIES);
        let timeout_ms = std::env::var("DISCOVERY_RPC_TIMEOUT_MS")
            .ok()
            .and_then(|raw| raw.trim().parse::<u64>().ok())
            .map(|v| v.clamp(250, 120_000))
            .unwrap_or(DEFAULT_TIMEOUT_MS);

        Ok(Self {
            rpc_url,
            concurrency,
            max_retries,
            timeout: Duration::from_millis(timeout_ms),
        })
    }
}

fn validate_http_url(raw: &str) -> Result<(), ProviderError> {
    let parsed = raw
        .parse::<reqwest::Url>()
        .map_err(|e| ProviderError::InvalidUrl {
            url: raw.to_string(),
            reason: e.to_string(),
        })?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        other => Err(ProviderError::InvalidUrl {
            url: raw.to_string(),
            reason: format!("expected http(s) scheme, got `{other}`"),
        }),
    }
}

fn classify_rpc_error(err: impl std::fmt::Display) -> ProviderError {
    let message = err.to_string();
    let lowered = message.to_ascii_lowercase();
    if lowered.contains("revert") || lowered.contains("execution reverted") {
        ProviderError::Revert(message)
    } else {
        ProviderError::Transport(message)
    }
}

/// JSON-RPC provider pinned to one block. A counting semaphore gates every
/// outstanding request across the whole engine; transient failures retry
/// with exponential backoff.
pub struct HttpProvider {
    inner: HttpTransport,
    block: u64,
    gate: Semaphore,
    max_retries: u32,
    timeout: Duration,
}

impl HttpProvider {
    /// Connect and pin. `block = None` pins to the current head.
    pub async fn connect(
        settings: &RpcSettings,
        block: Option<u64>,
    ) -> Result<Self, ProviderError> {
        validate_http_url(&settings.rpc_url)?;
        let url = settings
            .rpc_url
            .parse()
            .map_err(|e| ProviderError::InvalidUrl {
                url: settings.rpc_url.clone(),
                reason: format!("{e}"),
            })?;
        let inner: HttpTransport = ProviderBuilder::new().on_http(url);

        let block = match block {
            Some(n) => n,
            None => inner
                .get_block_number()
                .await
                .map_err(classify_rpc_error)?,
        };

        Ok(Self {
            inner,
            block,
            gate: Semaphore::new(settings.concurrency.max(1)),
            max_retries: settings.max_retries,
            timeout: settings.timeout,
        })
    }

    pub fn pinned_block(&self) -> u64 {
        self.block
    }

    fn block_id(&self) -> BlockId {
        BlockId::number(self.block)
    }

    async fn with_retries<T, F, Fut>(&self, context: &str, op: F) -> Result<T, ProviderError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let _permit = self
            .gate
            .acquire()
            .await
            .map_err(|_| ProviderError::Transport("request gate closed".to_string()))?;

        let mut last: Option<ProviderError> = None;
        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                tokio::time::sleep(Duration::from_millis(
                    RETRY_BASE_DELAY_MS * 2u64.pow(attempt - 1),
                ))
                .await;
            }
            match tokio::time::timeout(self.timeout, op()).await {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(err)) if !err.is_transient() => return Err(err),
                Ok(Err(err)) => last = Some(err),
                Err(_) => {
                    last = Some(ProviderError::Timeout {
                        timeout_ms: self.timeout.as_millis() as u64,
                        context: context.to_string(),
                    })
                }
            }
        }
        Err(ProviderError::RetriesExhausted(format!(
            "{context}: {}",
            last.map(|e| e.to_string())
                .unwrap_or_else(|| "no attempt recorded".to_string())
        )))
    }
}

#[async_trait]
impl Provider for HttpProvider {
    async fn get_code(&self, address: Address) -> Result<Bytes, ProviderError> {
        self.with_retries("get_code", || async {
            self.inner
                .get_code_at(address)
                .block_id(self.block_id())
                .await
                .map_err(classify_rpc_error)
        })
        .await
    }

    async fn get_storage(&self, address: Address, slot: B256) -> Result<B256, ProviderError> {
        self.with_retries("get_storage", || async {
            let value = self
                .inner
                .get_storage_at(address, U256::from_be_bytes(slot.0))
                .block_id(self.block_id())
                .await
                .map_err(classify_rpc_error)?;
            Ok(B256::from(value.to_be_bytes::<32>()))
        })
        .await
    }

    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes, ProviderError> {
        self.with_retries("call", || {
            let data = data.clone();
            async move {
                let tx = TransactionRequest::default()
                    .to(to)
                    .input(TransactionInput::new(data));
                self.inner
                    .call(&tx)
                    .block(self.block_id())
                    .await
                    .map_err(classify_rpc_error)
            }
        })
        .await
    }

    async fn get_logs(&self, filter: &LogFilter) -> Result<Vec<LogEntry>, ProviderError> {
        self.with_retries("get_logs", || {
            let filter = filter.clone();
            async move {
                let mut rpc_filter = Filter::new().from_block(0u64).to_block(self.block);
                if let Some(address) = filter.address {
                    rpc_filter = rpc_filter.address(address);
                }
                if !filter.topic0.is_empty() {
                    rpc_filter = rpc_filter.event_signature(filter.topic0.clone());
                }
                let logs = self
                    .inner
                    .get_logs(&rpc_filter)
                    .await
                    .map_err(classify_rpc_error)?;
                Ok(logs
                    .into_iter()
                    .map(|log| LogEntry {
                        address: log.address(),
                        topics: log.topics().to_vec(),
                        data: log.data().data.clone(),
                        block_number: log.block_number.unwrap_or_default(),
                        log_index: log.log_index.unwrap_or_default(),
                    })
                    .collect())
            }
        })
        .await
    }

    async fn block_number(&self) -> Result<u64, ProviderError> {
        Ok(self.block)
    }
}

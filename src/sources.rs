//! Verified-source retrieval. The engine only needs three things per
//! contract: an ABI for call-shaped handlers, a shape hash per proxy layer
//! for template matching, and the creation arguments for the
//! constructorArgs handler. Everything else the explorer returns is noise.

use crate::error::ProviderError;
use alloy::json_abi::JsonAbi;
use alloy::primitives::{keccak256, Address, B256};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

const EXPLORER_MAX_RETRIES: u32 = 3;
const EXPLORER_TIMEOUT_SECS: u64 = 15;
const UNVERIFIED_ABI_SENTINEL: &str = "Contract source code not verified";

/// Everything the analyzer keeps from a source fetch. Layer 0 is the address
/// itself (the proxy shell when proxied); further layers follow the
/// implementation list.
#[derive(Debug, Clone, Default)]
pub struct ContractSources {
    /// Contract name, preferring the deepest verified layer (the
    /// implementation names the system, not the shell).
    pub name: Option<String>,
    /// Merged ABI across all verified layers.
    pub abi: Option<JsonAbi>,
    /// keccak256 of the canonicalized source bundle, one per verified layer.
    pub source_hashes: Vec<B256>,
    /// ABI-encoded creation arguments of layer 0, when the explorer has them.
    pub constructor_args: Option<Vec<u8>>,
}

impl ContractSources {
    pub fn has_abi(&self) -> bool {
        self.abi.is_some()
    }
}

/// Capability consumed by the analyzer. Missing or unverified source is not
/// an error: it comes back as an empty `ContractSources` and downstream
/// handlers that need an ABI record `MissingAbi` per field.
#[async_trait]
pub trait SourceCodeService: Send + Sync {
    async fn fetch(
        &self,
        address: Address,
        implementations: &[Address],
    ) -> Result<ContractSources, ProviderError>;
}

/// Canonical shape hash: files sorted by path, concatenated as
/// `path\ncontent\n`, keccak256 over the whole bundle.
pub fn source_shape_hash(files: &[(String, String)]) -> B256 {
    let mut sorted: Vec<&(String, String)> = files.iter().collect();
    sorted.sort_by(|a, b| a.0.cmp(&b.0));
    let mut buffer = String::new();
    for (path, content) in sorted {
        buffer.push_str(path);
        buffer.push('\n');
        buffer.push_str(content);
        buffer.push('\n');
    }
    keccak256(buffer.as_bytes())
}

// ---------------------------------------------------------------------------
// Etherscan-family explorer client
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct ExplorerResponse<T> {
    status: String,
    #[allow(dead_code)]
    message: String,
    result: T,
}

#[derive(Deserialize)]
struct SourceCodeRecord {
    #[serde(rename = "SourceCode", default)]
    source_code: String,
    #[serde(rename = "ABI", default)]
    abi: String,
    #[serde(rename = "ContractName", default)]
    contract_name: String,
    #[serde(rename = "ConstructorArguments", default)]
    constructor_arguments: String,
}

pub struct EtherscanSources {
    client: reqwest::Client,
    api_url: String,
    api_key: String,
}

impl EtherscanSources {
    pub fn new(api_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(EXPLORER_TIMEOUT_SECS))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            client,
            api_url: api_url.into(),
            api_key: api_key.into(),
        }
    }

    async fn explorer_get<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
    ) -> Result<T, ProviderError> {
        let mut last: Option<ProviderError> = None;
        for attempt in 0..EXPLORER_MAX_RETRIES {
            if attempt > 0 {
                tokio::time::sleep(Duration::from_millis(1000 * 2u64.pow(attempt - 1))).await;
            }
            match self.client.get(url).send().await {
                Ok(resp) if resp.status().is_success() => match resp.json::<T>().await {
                    Ok(parsed) => return Ok(parsed),
                    Err(e) => last = Some(ProviderError::Transport(e.to_string())),
                },
                Ok(resp) => {
                    last = Some(ProviderError::Transport(format!("HTTP {}", resp.status())))
                }
                Err(e) => last = Some(ProviderError::Transport(e.to_string())),
            }
        }
        Err(ProviderError::RetriesExhausted(format!(
            "explorer_get: {}",
            last.map(|e| e.to_string())
                .unwrap_or_else(|| "no attempt recorded".to_string())
        )))
    }

    async fn fetch_layer(&self, address: Address) -> Result<Option<SourceCodeRecord>, ProviderError> {
        let url = format!(
            "{}?module=contract&action=getsourcecode&address={:?}&apikey={}",
            self.api_url, address, self.api_key
        );
        let resp: ExplorerResponse<Vec<SourceCodeRecord>> = self.explorer_get(&url).await?;
        if resp.status != "1" {
            return Ok(None);
        }
        Ok(resp.result.into_iter().next())
    }
}

#[async_trait]
impl SourceCodeService for EtherscanSources {
    async fn fetch(
        &self,
        address: Address,
        implementations: &[Address],
    ) -> Result<ContractSources, ProviderError> {
        let mut layers = Vec::with_capacity(1 + implementations.len());
        layers.push(address);
        layers.extend_from_slice(implementations);

        let mut sources = ContractSources::default();
        let mut abis: Vec<JsonAbi> = Vec::new();

        for (layer, layer_address) in layers.iter().enumerate() {
            let record = match self.fetch_layer(*layer_address).await {
                Ok(Some(record)) => record,
                Ok(None) => continue,
                Err(err) => {
                    // Degrade to "unverified" rather than failing the whole
                    // address; handlers that need the ABI will record it.
                    tracing::warn!(
                        "source fetch failed for {:?} (layer {layer}): {err}",
                        layer_address
                    );
                    continue;
                }
            };

            if record.abi.is_empty() || record.abi == UNVERIFIED_ABI_SENTINEL {
                continue;
            }
            let files = parse_source_bundle(&record.source_code, &record.contract_name);
            if !files.is_empty() {
                sources.source_hashes.push(source_shape_hash(&files));
            }
            if !record.contract_name.is_empty() {
                sources.name = Some(record.contract_name.clone());
            }
            if layer == 0 && !record.constructor_arguments.is_empty() {
                sources.constructor_args =
                    hex::decode(record.constructor_arguments.trim_start_matches("0x")).ok();
            }
            match serde_json::from_str::<JsonAbi>(&record.abi) {
                Ok(abi) => abis.push(abi),
                Err(e) => tracing::warn!("unparseable ABI for {:?}: {e}", layer_address),
            }
        }

        sources.abi = merge_abis(abis);
        Ok(sources)
    }
}

/// Explorer `SourceCode` comes in three shapes: standard-json wrapped in a
/// doubled brace pair, a bare JSON file map, or a single flattened file.
fn parse_source_bundle(raw: &str, contract_name: &str) -> Vec<(String, String)> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Vec::new();
    }

    let json_candidate = if trimmed.starts_with("{{") && trimmed.ends_with("}}") {
        Some(&trimmed[1..trimmed.len() - 1])
    } else if trimmed.starts_with('{') {
        Some(trimmed)
    } else {
        None
    };

    if let Some(candidate) = json_candidate {
        if let Ok(value) = serde_json::from_str::<serde_json::Value>(candidate) {
            let file_map = value.get("sources").unwrap_or(&value);
            if let Some(entries) = file_map.as_object() {
                let mut files = Vec::with_capacity(entries.len());
                for (path, entry) in entries {
                    let content = entry
                        .get("content")
                        .and_then(|c| c.as_str())
                        .unwrap_or_default();
                    if !content.is_empty() {
                        files.push((path.clone(), content.to_string()));
                    }
                }
                if !files.is_empty() {
                    return files;
                }
            }
        }
    }

    let path = if contract_name.is_empty() {
        "Contract.sol".to_string()
    } else {
        format!("{contract_name}.sol")
    };
    vec![(path, trimmed.to_string())]
}

fn merge_abis(abis: Vec<JsonAbi>) -> Option<JsonAbi> {
    if abis.is_empty() {
        return None;
    }
    let mut merged = JsonAbi::default();
    for abi in abis {
        if merged.constructor.is_none() {
            merged.constructor = abi.constructor;
        }
        if merged.fallback.is_none() {
            merged.fallback = abi.fallback;
        }
        if merged.receive.is_none() {
            merged.receive = abi.receive;
        }
        for (name, functions) in abi.functions {
            merged.functions.entry(name).or_default().extend(functions);
        }
        for (name, events) in abi.events {
            merged.events.entry(name).or_default().extend(events);
        }
        for (name, errors) in abi.errors {
            merged.errors.entry(name).or_default().extend(errors);
        }
    }
    Some(merged)
}

// ---------------------------------------------------------------------------
// Fixture implementation for tests and offline replay
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct FixtureSources {
    by_address: HashMap<Address, ContractSources>,
}

impl FixtureSources {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sources(mut self, address: Address, sources: ContractSources) -> Self {
        self.by_address.insert(address, sources);
        self
    }
}

#[async_trait]
impl SourceCodeService for FixtureSources {
    async fn fetch(
        &self,
        address: Address,
        implementations: &[Address],
    ) -> Result<ContractSources, ProviderError> {
        let mut merged = self.by_address.get(&address).cloned().unwrap_or_default();
        for implementation in implementations {
            if let Some(layer) = self.by_address.get(implementation) {
                merged.source_hashes.extend(layer.source_hashes.iter().copied());
                if layer.name.is_some() {
                    merged.name = layer.name.clone();
                }
                if merged.abi.is_none() {
                    merged.abi = layer.abi.clone();
                }
            }
        }
        Ok(merged)
    }
}

//! Proxy pattern recognition. Each detector reads one or two well-known
//! storage slots or makes a single static call; the first one that resolves
//! an implementation wins. Detection is cached per address for the run
//! because the block is pinned.

use crate::error::ProviderError;
use crate::provider::Provider;
use crate::value::ContractValue;
use alloy::primitives::{b256, keccak256, Address, Bytes, B256};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

// keccak256("eip1967.proxy.implementation") - 1
pub const EIP1967_IMPL_SLOT: B256 =
    b256!("360894a13ba1a3210667c828492db98dca3e2076cc3735a920a3ca505d382bbc");
// keccak256("eip1967.proxy.admin") - 1
pub const EIP1967_ADMIN_SLOT: B256 =
    b256!("b53127684a568b3173ae13b9f8a6016e243e63b6e8ee1178d6a717850b5d6103");
// keccak256("eip1967.proxy.beacon") - 1
pub const EIP1967_BEACON_SLOT: B256 =
    b256!("a3f0ad74e5423aebfd80d3ef4346578335a9a72aeaee59ff6cb3582b35133d50");
// keccak256("PROXIABLE") per EIP-1822
pub const EIP1822_PROXIABLE_SLOT: B256 =
    b256!("c5f16f0fcc639fa48a6947836d9850f504798523bf8c9a3a87d5876cf622bcf7");

/// EIP-1167 minimal proxy: 45 bytes, implementation embedded at offset 10.
const EIP1167_PREFIX: &[u8] = &[0x36, 0x3d, 0x3d, 0x37, 0x3d, 0x3d, 0x3d, 0x36, 0x3d, 0x73];
const EIP1167_SUFFIX: &[u8] = &[
    0x5a, 0xf4, 0x3d, 0x82, 0x80, 0x3e, 0x90, 0x3d, 0x91, 0x60, 0x2b, 0x57, 0xfd, 0x5b, 0xf3,
];

/// Proxy kind pinned by configuration instead of auto-detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ManualProxyType {
    #[serde(rename = "immutable")]
    Immutable,
    #[serde(rename = "EIP-1967")]
    Eip1967,
    #[serde(rename = "EIP-1967 beacon")]
    Eip1967Beacon,
    #[serde(rename = "EIP-1822 UUPS")]
    Eip1822,
    #[serde(rename = "EIP-1167 minimal")]
    Eip1167,
    #[serde(rename = "gnosis safe")]
    GnosisSafe,
}

impl ManualProxyType {
    pub fn label(self) -> &'static str {
        match self {
            ManualProxyType::Immutable => "immutable",
            ManualProxyType::Eip1967 => "EIP-1967",
            ManualProxyType::Eip1967Beacon => "EIP-1967 beacon",
            ManualProxyType::Eip1822 => "EIP-1822 UUPS",
            ManualProxyType::Eip1167 => "EIP-1167 minimal",
            ManualProxyType::GnosisSafe => "gnosis safe",
        }
    }
}

/// What detection yields: the kind, the code layers behind the address, any
/// governance addresses worth following, and values for the output record.
#[derive(Debug, Clone, Default)]
pub struct ProxyInfo {
    /// `None` for plain immutable contracts.
    pub proxy_type: Option<String>,
    pub implementations: Vec<Address>,
    pub relatives: Vec<Address>,
    pub values: BTreeMap<String, ContractValue>,
}

impl ProxyInfo {
    fn immutable() -> Self {
        Self::default()
    }

    fn with_kind(kind: &str, implementation: Address) -> Self {
        let mut info = Self {
            proxy_type: Some(kind.to_string()),
            implementations: vec![implementation],
            ..Self::default()
        };
        info.values.insert(
            "$implementation".to_string(),
            ContractValue::Address(implementation),
        );
        info
    }
}

fn word_to_address(word: B256) -> Option<Address> {
    if word == B256::ZERO || !word[..12].iter().all(|b| *b == 0) {
        return None;
    }
    Some(Address::from_slice(&word[12..]))
}

fn selector(signature: &str) -> [u8; 4] {
    let hash = keccak256(signature.as_bytes());
    let mut out = [0u8; 4];
    out.copy_from_slice(&hash[..4]);
    out
}

pub struct ProxyDetector {
    provider: Arc<dyn Provider>,
    cache: DashMap<Address, ProxyInfo>,
}

impl ProxyDetector {
    pub fn new(provider: Arc<dyn Provider>) -> Self {
        Self {
            provider,
            cache: DashMap::new(),
        }
    }

    /// Detect the proxy pattern of `address`. A manual override runs only
    /// that detector; otherwise auto-detectors run in fixed priority order
    /// and the first hit wins. `code` is the already-fetched bytecode.
    pub async fn detect(
        &self,
        address: Address,
        code: &Bytes,
        manual: Option<ManualProxyType>,
    ) -> Result<ProxyInfo, ProviderError> {
        if let Some(cached) = self.cache.get(&address) {
            return Ok(cached.clone());
        }

        let info = match manual {
            Some(ManualProxyType::Immutable) => ProxyInfo::immutable(),
            Some(ManualProxyType::Eip1967) => self
                .detect_eip1967(address)
                .await?
                .unwrap_or_else(ProxyInfo::immutable),
            Some(ManualProxyType::Eip1967Beacon) => self
                .detect_beacon(address)
                .await?
                .unwrap_or_else(ProxyInfo::immutable),
            Some(ManualProxyType::Eip1822) => self
                .detect_eip1822(address)
                .await?
                .unwrap_or_else(ProxyInfo::immutable),
            Some(ManualProxyType::Eip1167) => {
                detect_eip1167(code).unwrap_or_else(ProxyInfo::immutable)
            }
            Some(ManualProxyType::GnosisSafe) => self
                .detect_gnosis_safe(address)
                .await?
                .unwrap_or_else(ProxyInfo::immutable),
            None => self.detect_auto(address, code).await?,
        };

        self.cache.insert(address, info.clone());
        Ok(info)
    }

    async fn detect_auto(&self, address: Address, code: &Bytes) -> Result<ProxyInfo, ProviderError> {
        if let Some(info) = self.detect_eip1967(address).await? {
            return Ok(info);
        }
        if let Some(info) = self.detect_beacon(address).await? {
            return Ok(info);
        }
        if let Some(info) = self.detect_eip1822(address).await? {
            return Ok(info);
        }
        if let Some(info) = detect_eip1167(code) {
            return Ok(info);
        }
        if let Some(info) = self.detect_gnosis_safe(address).await? {
            return Ok(info);
        }
        Ok(ProxyInfo::immutable())
    }

    async fn detect_eip1967(&self, address: Address) -> Result<Option<ProxyInfo>, ProviderError> {
        let word = self.provider.get_storage(address, EIP1967_IMPL_SLOT).await?;
        let Some(implementation) = word_to_address(word) else {
            return Ok(None);
        };
        let mut info = ProxyInfo::with_kind("EIP-1967", implementation);
        let admin_word = self
            .provider
            .get_storage(address, EIP1967_ADMIN_SLOT)
            .await?;
        if let Some(admin) = word_to_address(admin_word) {
            info.values
                .insert("$admin".to_string(), ContractValue::Address(admin));
            info.relatives.push(admin);
        }
        Ok(Some(info))
    }

    async fn detect_beacon(&self, address: Address) -> Result<Option<ProxyInfo>, ProviderError> {
        let word = self
            .provider
            .get_storage(address, EIP1967_BEACON_SLOT)
            .await?;
        let Some(beacon) = word_to_address(word) else {
            return Ok(None);
        };

        let mut info = ProxyInfo {
            proxy_type: Some("EIP-1967 beacon".to_string()),
            ..ProxyInfo::default()
        };
        info.values
            .insert("$beacon".to_string(), ContractValue::Address(beacon));
        info.relatives.push(beacon);

        // The logic layer lives behind beacon.implementation().
        let calldata = Bytes::from(selector("implementation()").to_vec());
        match self.provider.call(beacon, calldata).await {
            Ok(ret) if ret.len() >= 32 => {
                if let Some(implementation) = word_to_address(B256::from_slice(&ret[..32])) {
                    info.implementations.push(implementation);
                    info.values.insert(
                        "$implementation".to_string(),
                        ContractValue::Address(implementation),
                    );
                }
            }
            Ok(_) => {}
            Err(ProviderError::Revert(_)) => {}
            Err(err) => return Err(err),
        }
        Ok(Some(info))
    }

    async fn detect_eip1822(&self, address: Address) -> Result<Option<ProxyInfo>, ProviderError> {
        let word = self
            .provider
            .get_storage(address, EIP1822_PROXIABLE_SLOT)
            .await?;
        Ok(word_to_address(word).map(|implementation| ProxyInfo::with_kind("EIP-1822 UUPS", implementation)))
    }

    async fn detect_gnosis_safe(&self, address: Address) -> Result<Option<ProxyInfo>, ProviderError> {
        let calldata = Bytes::from(selector("masterCopy()").to_vec());
        let ret = match self.provider.call(address, calldata).await {
            Ok(ret) => ret,
            Err(ProviderError::Revert(_)) => return Ok(None),
            Err(err) => return Err(err),
        };
        if ret.len() < 32 {
            return Ok(None);
        }
        Ok(word_to_address(B256::from_slice(&ret[..32]))
            .map(|singleton| ProxyInfo::with_kind("gnosis safe", singleton)))
    }
}

fn detect_eip1167(code: &Bytes) -> Option<ProxyInfo> {
    let bytes = code.as_ref();
    if bytes.len() != 45 || &bytes[..10] != EIP1167_PREFIX || &bytes[30..] != EIP1167_SUFFIX {
        return None;
    }
    let implementation = Address::from_slice(&bytes[10..30]);
    if implementation.is_zero() {
        return None;
    }
    Some(ProxyInfo::with_kind("EIP-1167 minimal", implementation))
}

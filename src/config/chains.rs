/// Static per-chain settings: the short name used in project configs and
/// template criteria, plus the block-explorer API endpoint for source fetch.
#[derive(Debug, Clone)]
pub struct ChainConfig {
    pub chain_id: u64,
    pub name: String,
    pub display_name: String,
    pub explorer_api_url: String,
    pub block_time_ms: u64,
}

impl ChainConfig {
    pub fn get(chain_id: u64) -> Self {
        match chain_id {
            1 => Self::mainnet(),
            8453 => Self::base(),
            42161 => Self::arbitrum(),
            10 => Self::optimism(),
            137 => Self::polygon(),
            56 => Self::bsc(),
            _ => Self::mainnet(),
        }
    }

    /// Look up by the short name used in `StructureConfig.chain`.
    pub fn by_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "ethereum" | "mainnet" => Some(Self::mainnet()),
            "base" => Some(Self::base()),
            "arbitrum" => Some(Self::arbitrum()),
            "optimism" => Some(Self::optimism()),
            "polygon" => Some(Self::polygon()),
            "bsc" => Some(Self::bsc()),
            _ => None,
        }
    }

    pub fn mainnet() -> Self {
        Self {
            chain_id: 1,
            name: "ethereum".to_string(),
            display_name: "Ethereum Mainnet".to_string(),
            explorer_api_url: "https://api.etherscan.io/api".to_string(),
            block_time_ms: 12_000,
        }
    }

    pub fn base() -> Self {
        Self {
            chain_id: 8453,
            name: "base".to_string(),
            display_name: "Base".to_string(),
            explorer_api_url: "https://api.basescan.org/api".to_string(),
            block_time_ms: 2_000,
        }
    }

    pub fn arbitrum() -> Self {
        Self {
            chain_id: 42161,
            name: "arbitrum".to_string(),
            display_name: "Arbitrum One".to_string(),
            explorer_api_url: "https://api.arbiscan.io/api".to_string(),
            block_time_ms: 250,
        }
    }

    pub fn optimism() -> Self {
        Self {
            chain_id: 10,
            name: "optimism".to_string(),
            display_name: "Optimism".to_string(),
            explorer_api_url: "https://api-optimistic.etherscan.io/api".to_string(),
            block_time_ms: 2_000,
        }
    }

    pub fn polygon() -> Self {
        Self {
            chain_id: 137,
            name: "polygon".to_string(),
            display_name: "Polygon".to_string(),
            explorer_api_url: "https://api.polygonscan.com/api".to_string(),
            block_time_ms: 2_000,
        }
    }

    pub fn bsc() -> Self {
        Self {
            chain_id: 56,
            name: "bsc".to_string(),
            display_name: "BNB Smart Chain".to_string(),
            explorer_api_url: "https://api.bscscan.com/api".to_string(),
            block_time_ms: 3_000,
        }
    }
}

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, AtlasError>;

#[derive(Debug, Error)]
pub enum AtlasError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),
    #[error("internal invariant violated: {0}")]
    Internal(String),
}

/// Fatal at load time. Nothing in this enum is recoverable mid-run.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required configuration: {0}")]
    Missing(String),
    #[error("invalid configuration: {0}")]
    Invalid(String),
    #[error("invalid address `{0}`")]
    InvalidAddress(String),
    #[error("duplicate field `{field}` declared for `{context}`")]
    DuplicateField { context: String, field: String },
    #[error("field `{0}` declares both `handler` and `copy`")]
    AmbiguousField(String),
    #[error("unknown template `{0}`")]
    UnknownTemplate(String),
    #[error("template extends cycle: {0}")]
    ExtendsCycle(String),
    #[error("invalid edit expression for `{field}`: {reason}")]
    InvalidEdit { field: String, reason: String },
}

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("invalid URL `{url}`: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("execution reverted: {0}")]
    Revert(String),
    #[error("timed out after {timeout_ms}ms: {context}")]
    Timeout { timeout_ms: u64, context: String },
    #[error("retries exhausted: {0}")]
    RetriesExhausted(String),
}

impl ProviderError {
    /// Transient failures are worth another attempt; a revert is an answer.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ProviderError::Transport(_) | ProviderError::Timeout { .. }
        )
    }
}

/// Per-field failure captured in an analysis. These are data, not faults:
/// they flow into the output artifact instead of aborting the run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "message", rename_all = "camelCase")]
pub enum FieldError {
    /// Source was unverified or the ABI fetch failed.
    MissingAbi,
    /// An RPC call failed after the provider's own retries.
    Provider(String),
    /// Decoded value out of range, revert, bad slot path, edit failure.
    Handler(String),
}

impl std::fmt::Display for FieldError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FieldError::MissingAbi => write!(f, "missing ABI"),
            FieldError::Provider(msg) => write!(f, "provider: {msg}"),
            FieldError::Handler(msg) => write!(f, "handler: {msg}"),
        }
    }
}

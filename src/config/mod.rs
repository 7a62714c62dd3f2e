//! Project configuration: the on-disk JSON/JSONC shape describing a system
//! to discover. Unknown keys are preserved on every record so configs
//! round-trip without information loss.

pub mod chains;

use crate::edit;
use crate::error::ConfigError;
use crate::handlers::HandlerDef;
use crate::proxy::ManualProxyType;
use crate::utils::{hex, jsonc};
use alloy::primitives::Address;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

pub const DEFAULT_MAX_ADDRESSES: usize = 100;

/// One extractable field on a contract. Carries at most one of
/// `handler` / `copy`; `edit` post-transforms the raw value.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FieldDef {
    pub handler: Option<HandlerDef>,
    pub copy: Option<String>,
    pub template: Option<String>,
    pub edit: Option<String>,
    #[serde(flatten)]
    pub extras: BTreeMap<String, serde_json::Value>,
}

/// Per-address configuration, either from a template or an override block.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ContractOverride {
    pub extends: Option<String>,
    pub can_act_independently: Option<bool>,
    pub ignore_discovery: Option<bool>,
    pub proxy_type: Option<ManualProxyType>,
    pub ignore_in_watch_mode: Vec<String>,
    pub ignore_methods: Vec<String>,
    pub ignore_relatives: Vec<String>,
    pub fields: BTreeMap<String, FieldDef>,
    pub methods: BTreeMap<String, serde_json::Value>,
    pub manual_source_paths: BTreeMap<String, String>,
    pub types: BTreeMap<String, serde_json::Value>,
    #[serde(flatten)]
    pub extras: BTreeMap<String, serde_json::Value>,
}

impl ContractOverride {
    pub fn ignore_discovery(&self) -> bool {
        self.ignore_discovery.unwrap_or(false)
    }

    pub fn ignores_relative(&self, field: &str) -> bool {
        self.ignore_relatives.iter().any(|f| f == field)
    }
}

/// Shallow merge: `child` wins per key over `parent`. Maps merge entry-wise,
/// list fields concatenate with dedup, scalars take the child when present.
pub fn merge_overrides(parent: &ContractOverride, child: &ContractOverride) -> ContractOverride {
    fn merge_maps<V: Clone>(
        parent: &BTreeMap<String, V>,
        child: &BTreeMap<String, V>,
    ) -> BTreeMap<String, V> {
        let mut merged = parent.clone();
        for (key, value) in child {
            merged.insert(key.clone(), value.clone());
        }
        merged
    }

    fn concat_dedup(parent: &[String], child: &[String]) -> Vec<String> {
        let mut merged: Vec<String> = Vec::with_capacity(parent.len() + child.len());
        for item in parent.iter().chain(child.iter()) {
            if !merged.contains(item) {
                merged.push(item.clone());
            }
        }
        merged
    }

    ContractOverride {
        // `extends` is consumed by resolution; a merged config never chains.
        extends: None,
        can_act_independently: child.can_act_independently.or(parent.can_act_independently),
        ignore_discovery: child.ignore_discovery.or(parent.ignore_discovery),
        proxy_type: child.proxy_type.or(parent.proxy_type),
        ignore_in_watch_mode: concat_dedup(&parent.ignore_in_watch_mode, &child.ignore_in_watch_mode),
        ignore_methods: concat_dedup(&parent.ignore_methods, &child.ignore_methods),
        ignore_relatives: concat_dedup(&parent.ignore_relatives, &child.ignore_relatives),
        fields: merge_maps(&parent.fields, &child.fields),
        methods: merge_maps(&parent.methods, &child.methods),
        manual_source_paths: merge_maps(&parent.manual_source_paths, &child.manual_source_paths),
        types: merge_maps(&parent.types, &child.types),
        extras: merge_maps(&parent.extras, &child.extras),
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct RawStructureConfig {
    name: String,
    chain: String,
    archived: Option<bool>,
    initial_addresses: Vec<String>,
    import: Vec<String>,
    max_addresses: Option<usize>,
    max_depth: Option<usize>,
    overrides: BTreeMap<String, ContractOverride>,
    shared_modules: Vec<String>,
    types: BTreeMap<String, serde_json::Value>,
    #[serde(flatten)]
    extras: BTreeMap<String, serde_json::Value>,
}

/// The validated project root. Every address key has been parsed, every edit
/// expression compiled, every field checked for handler/copy exclusivity.
#[derive(Debug, Clone)]
pub struct StructureConfig {
    pub name: String,
    pub chain: String,
    pub archived: bool,
    pub initial_addresses: Vec<Address>,
    pub import: Vec<String>,
    pub max_addresses: usize,
    pub max_depth: usize,
    pub overrides: BTreeMap<Address, ContractOverride>,
    pub shared_modules: Vec<String>,
    pub types: BTreeMap<String, serde_json::Value>,
    pub extras: BTreeMap<String, serde_json::Value>,
}

impl StructureConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Missing(format!("cannot read {}: {e}", path.display())))?;
        Self::from_jsonc_str(&raw)
    }

    pub fn from_jsonc_str(raw: &str) -> Result<Self, ConfigError> {
        let plain = jsonc::strip(raw);
        let parsed: RawStructureConfig = serde_json::from_str(&plain)
            .map_err(|e| ConfigError::Invalid(format!("config schema: {e}")))?;
        Self::validate(parsed)
    }

    fn validate(raw: RawStructureConfig) -> Result<Self, ConfigError> {
        if raw.name.trim().is_empty() {
            return Err(ConfigError::Missing("`name` must be non-empty".to_string()));
        }
        if raw.chain.trim().is_empty() {
            return Err(ConfigError::Missing("`chain` must be non-empty".to_string()));
        }
        let max_addresses = raw.max_addresses.unwrap_or(DEFAULT_MAX_ADDRESSES);
        if max_addresses < 1 {
            return Err(ConfigError::Invalid(
                "`maxAddresses` must be at least 1".to_string(),
            ));
        }

        let mut initial_addresses = Vec::with_capacity(raw.initial_addresses.len());
        for entry in &raw.initial_addresses {
            let addr = hex::parse_address(entry)
                .ok_or_else(|| ConfigError::InvalidAddress(entry.clone()))?;
            if !initial_addresses.contains(&addr) {
                initial_addresses.push(addr);
            }
        }
        if initial_addresses.is_empty() {
            return Err(ConfigError::Missing(
                "`initialAddresses` must list at least one address".to_string(),
            ));
        }

        let mut overrides = BTreeMap::new();
        for (key, value) in raw.overrides {
            let addr =
                hex::parse_address(&key).ok_or_else(|| ConfigError::InvalidAddress(key.clone()))?;
            validate_override(&key, &value)?;
            overrides.insert(addr, value);
        }

        Ok(Self {
            name: raw.name,
            chain: raw.chain,
            archived: raw.archived.unwrap_or(false),
            initial_addresses,
            import: raw.import,
            max_addresses,
            max_depth: raw.max_depth.unwrap_or(usize::MAX),
            overrides,
            shared_modules: raw.shared_modules,
            types: raw.types,
            extras: raw.extras,
        })
    }

    pub fn override_for(&self, address: Address) -> Option<&ContractOverride> {
        self.overrides.get(&address)
    }
}

/// Field-level checks shared by overrides and template configs.
pub fn validate_override(context: &str, config: &ContractOverride) -> Result<(), ConfigError> {
    let mut seen = BTreeMap::new();
    for (name, field) in &config.fields {
        // Case-insensitive collision check: `Owner` next to `owner` is a
        // config mistake that would silently shadow in the output map.
        let folded = name.to_ascii_lowercase();
        if let Some(previous) = seen.insert(folded, name.clone()) {
            return Err(ConfigError::DuplicateField {
                context: context.to_string(),
                field: format!("{previous}/{name}"),
            });
        }
        if field.handler.is_some() && field.copy.is_some() {
            return Err(ConfigError::AmbiguousField(format!("{context}.{name}")));
        }
        if let Some(expr) = &field.edit {
            edit::parse(expr).map_err(|reason| ConfigError::InvalidEdit {
                field: format!("{context}.{name}"),
                reason,
            })?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"{
        // project under watch
        "name": "demo",
        "chain": "ethereum",
        "initialAddresses": ["0x000000000000000000000000000000000000cafe"],
        "maxAddresses": 16,
        "unknownTopLevel": {"passes": "through"},
    }"#;

    #[test]
    fn test_minimal_config_parses_with_defaults() {
        let config = StructureConfig::from_jsonc_str(MINIMAL).unwrap();
        assert_eq!(config.name, "demo");
        assert_eq!(config.max_addresses, 16);
        assert_eq!(config.max_depth, usize::MAX);
        assert_eq!(config.initial_addresses.len(), 1);
        assert!(config.extras.contains_key("unknownTopLevel"));
    }

    #[test]
    fn test_bad_override_key_is_rejected() {
        let doc = r#"{
            "name": "demo",
            "chain": "ethereum",
            "initialAddresses": ["0x000000000000000000000000000000000000cafe"],
            "overrides": {"not-an-address": {}}
        }"#;
        assert!(matches!(
            StructureConfig::from_jsonc_str(doc),
            Err(ConfigError::InvalidAddress(_))
        ));
    }

    #[test]
    fn test_handler_copy_exclusivity() {
        let doc = r#"{
            "name": "demo",
            "chain": "ethereum",
            "initialAddresses": ["0x000000000000000000000000000000000000cafe"],
            "overrides": {
                "0x000000000000000000000000000000000000cafe": {
                    "fields": {
                        "owner": {
                            "handler": {"type": "storage", "slot": 5},
                            "copy": "admin"
                        }
                    }
                }
            }
        }"#;
        assert!(matches!(
            StructureConfig::from_jsonc_str(doc),
            Err(ConfigError::AmbiguousField(_))
        ));
    }

    #[test]
    fn test_case_insensitive_duplicate_fields_rejected() {
        let doc = r#"{
            "name": "demo",
            "chain": "ethereum",
            "initialAddresses": ["0x000000000000000000000000000000000000cafe"],
            "overrides": {
                "0x000000000000000000000000000000000000cafe": {
                    "fields": {
                        "Owner": {"handler": {"type": "storage", "slot": 5}},
                        "owner": {"handler": {"type": "storage", "slot": 6}}
                    }
                }
            }
        }"#;
        assert!(matches!(
            StructureConfig::from_jsonc_str(doc),
            Err(ConfigError::DuplicateField { .. })
        ));
    }

    #[test]
    fn test_merge_overrides_child_wins() {
        let mut parent = ContractOverride::default();
        parent.ignore_discovery = Some(true);
        parent.ignore_relatives = vec!["a".to_string()];
        parent.fields.insert("owner".to_string(), FieldDef::default());

        let mut child = ContractOverride::default();
        child.ignore_discovery = Some(false);
        child.ignore_relatives = vec!["a".to_string(), "b".to_string()];
        child.fields.insert("admin".to_string(), FieldDef::default());

        let merged = merge_overrides(&parent, &child);
        assert_eq!(merged.ignore_discovery, Some(false));
        assert_eq!(merged.ignore_relatives, vec!["a", "b"]);
        assert_eq!(merged.fields.len(), 2);
    }
}

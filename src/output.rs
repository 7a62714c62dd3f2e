//! Artifact materialization. The output is a pure function of the resolved
//! analyses: entries sorted by address, every map key sorted, one rendering
//! path. Two runs against the same pinned block must produce byte-identical
//! files.

use crate::analyzer::Analysis;
use crate::config::StructureConfig;
use crate::engine::Discovery;
use crate::utils::hex::format_address;
use serde_json::{json, Map, Value};

/// Assemble the artifact document. serde_json maps keep sorted keys, so the
/// serialized form is canonical without extra work. Unknown top-level keys
/// from the project config pass through into the document; the typed keys
/// always win on collision.
pub fn build_output(config: &StructureConfig, block_number: u64, discovery: &Discovery) -> Value {
    let entries: Vec<Value> = discovery
        .analyses
        .iter()
        .map(|analysis| entry_json(analysis, discovery))
        .collect();

    let mut document = Map::new();
    document.insert("name".to_string(), json!(config.name));
    document.insert("chain".to_string(), json!(config.chain));
    document.insert("blockNumber".to_string(), json!(block_number));
    document.insert("entries".to_string(), Value::Array(entries));
    for (key, value) in &config.extras {
        document.entry(key.clone()).or_insert_with(|| value.clone());
    }
    Value::Object(document)
}

fn entry_json(analysis: &Analysis, discovery: &Discovery) -> Value {
    match analysis {
        Analysis::Eoa { address } => {
            let mut entry = Map::new();
            entry.insert("type".to_string(), json!("EOA"));
            entry.insert("address".to_string(), json!(format_address(*address)));
            if let Some(roles) = discovery.roles.get(address) {
                if !roles.is_empty() {
                    let listed: Vec<&String> = roles.iter().collect();
                    entry.insert("roles".to_string(), json!(listed));
                }
            }
            Value::Object(entry)
        }
        Analysis::Contract(contract) => {
            let mut entry = Map::new();
            entry.insert("type".to_string(), json!("Contract"));
            entry.insert(
                "address".to_string(),
                json!(format_address(contract.address)),
            );
            if let Some(name) = &contract.name {
                entry.insert("name".to_string(), json!(name));
            }
            if let Some(proxy_type) = &contract.proxy_type {
                entry.insert("proxyType".to_string(), json!(proxy_type));
            }
            if !contract.implementations.is_empty() {
                let implementations: Vec<String> = contract
                    .implementations
                    .iter()
                    .map(|addr| format_address(*addr))
                    .collect();
                entry.insert("implementations".to_string(), json!(implementations));
            }
            let values: Map<String, Value> = contract
                .values
                .iter()
                .map(|(key, value)| (key.clone(), value.to_json()))
                .collect();
            entry.insert("values".to_string(), Value::Object(values));
            if !contract.errors.is_empty() {
                let errors: Map<String, Value> = contract
                    .errors
                    .iter()
                    .map(|(key, err)| {
                        (key.clone(), serde_json::to_value(err).unwrap_or(Value::Null))
                    })
                    .collect();
                entry.insert("errors".to_string(), Value::Object(errors));
            }
            if !contract.ignore_in_watch_mode.is_empty() {
                entry.insert(
                    "ignoreInWatchMode".to_string(),
                    json!(contract.ignore_in_watch_mode),
                );
            }
            if !contract.source_hashes.is_empty() {
                let hashes: Vec<String> = contract
                    .source_hashes
                    .iter()
                    .map(|hash| format!("0x{}", hex::encode(hash)))
                    .collect();
                entry.insert("sourceHashes".to_string(), json!(hashes));
            }
            Value::Object(entry)
        }
    }
}

/// The single serialization path for artifacts: 2-space pretty JSON with a
/// trailing newline.
pub fn render(document: &Value) -> String {
    let mut rendered = serde_json::to_string_pretty(document).unwrap_or_else(|_| "{}".to_string());
    rendered.push('\n');
    rendered
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::ContractAnalysis;
    use crate::value::ContractValue;
    use alloy::primitives::{address, U256};

    fn demo_config() -> StructureConfig {
        StructureConfig::from_jsonc_str(
            r#"{"name": "demo", "chain": "ethereum",
                "initialAddresses": ["0x000000000000000000000000000000000000cafe"]}"#,
        )
        .unwrap()
    }

    #[test]
    fn test_entries_keep_address_order_and_sorted_values() {
        let alpha = address!("0000000000000000000000000000000000000001");
        let beta = address!("0000000000000000000000000000000000000002");
        let mut contract = ContractAnalysis {
            address: alpha,
            ..ContractAnalysis::default()
        };
        contract
            .values
            .insert("zed".to_string(), ContractValue::Uint(U256::from(1u64)));
        contract
            .values
            .insert("alpha".to_string(), ContractValue::Uint(U256::from(2u64)));

        let discovery = Discovery {
            analyses: vec![
                Analysis::Contract(Box::new(contract)),
                Analysis::Eoa { address: beta },
            ],
            ..Discovery::default()
        };
        let document = build_output(&demo_config(), 42, &discovery);
        let entries = document["entries"].as_array().unwrap();
        assert_eq!(entries[0]["type"], "Contract");
        assert_eq!(entries[1]["type"], "EOA");

        let rendered = render(&document);
        // Sorted map keys: "alpha" must serialize before "zed".
        let alpha_at = rendered.find("\"alpha\"").unwrap();
        let zed_at = rendered.find("\"zed\"").unwrap();
        assert!(alpha_at < zed_at);
        assert!(rendered.ends_with('\n'));
    }

    #[test]
    fn test_eoa_roles_come_from_harvest() {
        let holder = address!("0000000000000000000000000000000000000001");
        let mut discovery = Discovery {
            analyses: vec![Analysis::Eoa { address: holder }],
            ..Discovery::default()
        };
        discovery
            .roles
            .entry(holder)
            .or_default()
            .insert("ADMIN".to_string());

        let document = build_output(&demo_config(), 1, &discovery);
        assert_eq!(document["entries"][0]["roles"][0], "ADMIN");
    }
}

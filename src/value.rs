use alloy::primitives::{Address, U256};
use serde::ser::{Serialize, Serializer};
use std::collections::BTreeMap;

/// Largest integer JSON consumers can hold losslessly (2^53 - 1). Anything
/// above serializes as a decimal string.
const JSON_SAFE_MAX: u64 = 9_007_199_254_740_991;

/// A value extracted from a contract. Recursive so handlers can return
/// role->members maps, getter arrays, decoded event payloads, and so on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContractValue {
    Address(Address),
    Uint(U256),
    Bool(bool),
    Bytes(Vec<u8>),
    Text(String),
    Array(Vec<ContractValue>),
    Object(BTreeMap<String, ContractValue>),
}

impl ContractValue {
    /// Collect every address reachable in this value. These become relative
    /// candidates for discovery unless the field is pruned.
    pub fn collect_addresses(&self, out: &mut Vec<Address>) {
        match self {
            ContractValue::Address(addr) => out.push(*addr),
            ContractValue::Array(items) => {
                for item in items {
                    item.collect_addresses(out);
                }
            }
            ContractValue::Object(entries) => {
                for item in entries.values() {
                    item.collect_addresses(out);
                }
            }
            _ => {}
        }
    }

    pub fn as_uint(&self) -> Option<U256> {
        match self {
            ContractValue::Uint(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_address(&self) -> Option<Address> {
        match self {
            ContractValue::Address(a) => Some(*a),
            _ => None,
        }
    }

    /// Interpret a JSON literal from configuration (hardcoded handler values,
    /// call arguments). Strings that parse as addresses become addresses;
    /// 0x/decimal strings become uints; everything else stays text.
    pub fn from_json(raw: &serde_json::Value) -> ContractValue {
        match raw {
            serde_json::Value::Bool(b) => ContractValue::Bool(*b),
            serde_json::Value::Number(n) => match n.as_u64() {
                Some(v) => ContractValue::Uint(U256::from(v)),
                None => ContractValue::Text(n.to_string()),
            },
            serde_json::Value::String(s) => {
                if let Some(addr) = crate::utils::hex::parse_address(s) {
                    return ContractValue::Address(addr);
                }
                if let Some(v) = crate::utils::hex::to_u256(s) {
                    return ContractValue::Uint(v);
                }
                ContractValue::Text(s.clone())
            }
            serde_json::Value::Array(items) => {
                ContractValue::Array(items.iter().map(ContractValue::from_json).collect())
            }
            serde_json::Value::Object(entries) => ContractValue::Object(
                entries
                    .iter()
                    .map(|(k, v)| (k.clone(), ContractValue::from_json(v)))
                    .collect(),
            ),
            serde_json::Value::Null => ContractValue::Text(String::new()),
        }
    }

    /// The single canonical JSON shape. Addresses are lowercase hex, bytes
    /// are 0x-hex, integers above 2^53-1 are decimal strings, maps keep
    /// sorted keys. The output artifact relies on this being deterministic.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            ContractValue::Address(addr) => {
                serde_json::Value::String(format!("0x{}", hex::encode(addr.as_slice())))
            }
            ContractValue::Uint(v) => {
                if *v <= U256::from(JSON_SAFE_MAX) {
                    serde_json::Value::Number(v.to::<u64>().into())
                } else {
                    serde_json::Value::String(v.to_string())
                }
            }
            ContractValue::Bool(b) => serde_json::Value::Bool(*b),
            ContractValue::Bytes(bytes) => {
                serde_json::Value::String(format!("0x{}", hex::encode(bytes)))
            }
            ContractValue::Text(s) => serde_json::Value::String(s.clone()),
            ContractValue::Array(items) => {
                serde_json::Value::Array(items.iter().map(|v| v.to_json()).collect())
            }
            ContractValue::Object(entries) => serde_json::Value::Object(
                entries
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
        }
    }
}

impl Serialize for ContractValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl From<Address> for ContractValue {
    fn from(addr: Address) -> Self {
        ContractValue::Address(addr)
    }
}

impl From<U256> for ContractValue {
    fn from(v: U256) -> Self {
        ContractValue::Uint(v)
    }
}

impl From<bool> for ContractValue {
    fn from(b: bool) -> Self {
        ContractValue::Bool(b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::address;

    #[test]
    fn test_small_uint_serializes_as_number() {
        let v = ContractValue::Uint(U256::from(42u64));
        assert_eq!(v.to_json(), serde_json::json!(42));
    }

    #[test]
    fn test_large_uint_serializes_as_decimal_string() {
        let v = ContractValue::Uint(U256::from(JSON_SAFE_MAX) + U256::from(1u64));
        assert_eq!(v.to_json(), serde_json::json!("9007199254740992"));
    }

    #[test]
    fn test_address_serializes_lowercase() {
        let v = ContractValue::Address(address!("C02aaA39b223FE8D0A0e5C4F27eAD9083C756Cc2"));
        assert_eq!(
            v.to_json(),
            serde_json::json!("0xc02aaa39b223fe8d0a0e5c4f27ead9083c756cc2")
        );
    }

    #[test]
    fn test_collect_addresses_descends_into_containers() {
        let a = address!("0000000000000000000000000000000000000001");
        let b = address!("0000000000000000000000000000000000000002");
        let mut entries = BTreeMap::new();
        entries.insert("inner".to_string(), ContractValue::Address(b));
        let v = ContractValue::Array(vec![
            ContractValue::Address(a),
            ContractValue::Object(entries),
            ContractValue::Uint(U256::from(7u64)),
        ]);
        let mut out = Vec::new();
        v.collect_addresses(&mut out);
        assert_eq!(out, vec![a, b]);
    }

    #[test]
    fn test_from_json_recognizes_addresses_and_numbers() {
        let raw = serde_json::json!("0xc02aaa39b223fe8d0a0e5c4f27ead9083c756cc2");
        assert!(matches!(
            ContractValue::from_json(&raw),
            ContractValue::Address(_)
        ));
        let raw = serde_json::json!(1000);
        assert_eq!(
            ContractValue::from_json(&raw),
            ContractValue::Uint(U256::from(1000u64))
        );
    }
}

//! Domain-specific extractors that don't fit the general shapes.

use super::{sol_to_value, HandlerContext};
use crate::error::FieldError;
use crate::provider::LogFilter;
use crate::value::ContractValue;
use alloy::dyn_abi::JsonAbiExt;
use alloy::primitives::{keccak256, U256};
use std::collections::BTreeMap;

/// Decode the creation arguments recorded by the explorer against the ABI
/// constructor. Named parameters give an object, anonymous ones an array.
pub fn constructor_args(ctx: &HandlerContext) -> Result<ContractValue, FieldError> {
    let abi = ctx.require_abi()?;
    let constructor = abi
        .constructor
        .as_ref()
        .ok_or_else(|| FieldError::Handler("ABI has no constructor".to_string()))?;
    let raw = ctx
        .constructor_args
        .as_deref()
        .ok_or_else(|| FieldError::Handler("no creation arguments recorded".to_string()))?;

    let decoded = constructor
        .abi_decode_input(raw, true)
        .map_err(|e| FieldError::Handler(format!("constructor decode failed: {e}")))?;

    let named = constructor.inputs.iter().all(|p| !p.name.is_empty());
    if named {
        let mut entries = BTreeMap::new();
        for (param, value) in constructor.inputs.iter().zip(decoded) {
            entries.insert(param.name.clone(), sol_to_value(value));
        }
        Ok(ContractValue::Object(entries))
    } else {
        Ok(ContractValue::Array(
            decoded.into_iter().map(sol_to_value).collect(),
        ))
    }
}

/// Arbitrum data-availability committee keyset, taken from the latest
/// SetValidKeyset event. The keyset blob leads with two big-endian u64s:
/// the assumed-honest signer count, then the committee size.
pub async fn arbitrum_dac(ctx: &HandlerContext) -> Result<ContractValue, FieldError> {
    let topic = keccak256("SetValidKeyset(bytes32,bytes)".as_bytes());
    let filter = LogFilter::for_address(ctx.address).with_topic0(topic);
    let logs = ctx
        .provider
        .get_logs(&filter)
        .await
        .map_err(super::provider_field_error)?;
    let latest = logs
        .last()
        .ok_or_else(|| FieldError::Handler("no SetValidKeyset logs".to_string()))?;

    let keyset_hash = latest
        .topics
        .get(1)
        .ok_or_else(|| FieldError::Handler("SetValidKeyset log missing keyset hash".to_string()))?;

    // data = abi.encode(bytes): [offset][length][payload...]
    let data = latest.data.as_ref();
    if data.len() < 64 {
        return Err(FieldError::Handler("malformed keyset payload".to_string()));
    }
    let length = usize::try_from(U256::from_be_slice(&data[32..64]))
        .map_err(|_| FieldError::Handler("keyset length out of range".to_string()))?;
    let payload = data
        .get(64..64 + length)
        .ok_or_else(|| FieldError::Handler("truncated keyset payload".to_string()))?;
    if payload.len() < 16 {
        return Err(FieldError::Handler("keyset payload too short".to_string()));
    }

    let required = u64::from_be_bytes(payload[..8].try_into().expect("checked length"));
    let members = u64::from_be_bytes(payload[8..16].try_into().expect("checked length"));

    let mut entries = BTreeMap::new();
    entries.insert(
        "requiredSignatures".to_string(),
        ContractValue::Uint(U256::from(required)),
    );
    entries.insert(
        "membersCount".to_string(),
        ContractValue::Uint(U256::from(members)),
    );
    entries.insert(
        "keysetHash".to_string(),
        ContractValue::Bytes(keyset_hash.to_vec()),
    );
    Ok(ContractValue::Object(entries))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{FixtureProvider, LogEntry};
    use alloy::json_abi::JsonAbi;
    use alloy::primitives::{address, Bytes, B256};
    use std::sync::Arc;

    #[test]
    fn test_constructor_args_decode_named_params() {
        let abi = r#"[
            {"type":"constructor","inputs":[
                {"name":"admin","type":"address"},
                {"name":"delay","type":"uint256"}
            ],"stateMutability":"nonpayable"}
        ]"#;
        let admin = address!("0000000000000000000000000000000000000a11");
        let mut encoded = vec![0u8; 64];
        encoded[12..32].copy_from_slice(admin.as_slice());
        encoded[32..64].copy_from_slice(&U256::from(3600u64).to_be_bytes::<32>());

        let ctx = HandlerContext {
            provider: Arc::new(FixtureProvider::new(1)),
            address: address!("00000000000000000000000000000000000000aa"),
            abi: Some(Arc::new(serde_json::from_str::<JsonAbi>(abi).unwrap())),
            constructor_args: Some(Arc::new(encoded)),
        };
        let ContractValue::Object(entries) = constructor_args(&ctx).unwrap() else {
            panic!("expected an object");
        };
        assert_eq!(entries.get("admin"), Some(&ContractValue::Address(admin)));
        assert_eq!(
            entries.get("delay"),
            Some(&ContractValue::Uint(U256::from(3600u64)))
        );
    }

    #[tokio::test]
    async fn test_arbitrum_dac_reads_latest_keyset() {
        let inbox = address!("00000000000000000000000000000000000000aa");
        let keyset_hash = B256::from([0x11u8; 32]);

        // 6-of-20 committee.
        let mut payload = Vec::new();
        payload.extend_from_slice(&6u64.to_be_bytes());
        payload.extend_from_slice(&20u64.to_be_bytes());
        let mut data = Vec::new();
        data.extend_from_slice(&U256::from(32u64).to_be_bytes::<32>());
        data.extend_from_slice(&U256::from(payload.len() as u64).to_be_bytes::<32>());
        data.extend_from_slice(&payload);

        let provider = FixtureProvider::new(10).with_contract(inbox).with_log(LogEntry {
            address: inbox,
            topics: vec![
                keccak256("SetValidKeyset(bytes32,bytes)".as_bytes()),
                keyset_hash,
            ],
            data: Bytes::from(data),
            block_number: 4,
            log_index: 0,
        });

        let ctx = HandlerContext {
            provider: Arc::new(provider),
            address: inbox,
            abi: None,
            constructor_args: None,
        };
        let ContractValue::Object(entries) = arbitrum_dac(&ctx).await.unwrap() else {
            panic!("expected an object");
        };
        assert_eq!(
            entries.get("requiredSignatures"),
            Some(&ContractValue::Uint(U256::from(6u64)))
        );
        assert_eq!(
            entries.get("membersCount"),
            Some(&ContractValue::Uint(U256::from(20u64)))
        );
    }
}

//! Raw storage reads, including Solidity mapping-slot derivation and the
//! two-form string layout.

use super::{decode_word, HandlerContext, ReturnType, SlotDef};
use crate::error::FieldError;
use crate::value::ContractValue;
use alloy::primitives::{keccak256, B256, U256};

/// Nested-mapping slot derivation. The path is `[base, k1, ... kn]`; each
/// key folds as `slot = keccak256(pad32(key) ++ pad32(slot))`, matching the
/// Solidity reference layout.
pub fn derive_mapping_slot(path: &[U256]) -> U256 {
    let mut slot = path.first().copied().unwrap_or_default();
    for key in &path[1.min(path.len())..] {
        let mut buffer = [0u8; 64];
        buffer[..32].copy_from_slice(&key.to_be_bytes::<32>());
        buffer[32..].copy_from_slice(&slot.to_be_bytes::<32>());
        slot = U256::from_be_bytes(keccak256(buffer).0);
    }
    slot
}

fn resolve_slot(def: &SlotDef, offset: Option<u64>) -> Result<U256, FieldError> {
    let base = match def {
        SlotDef::One(atom) => atom.to_u256()?,
        SlotDef::Path(atoms) => {
            if atoms.is_empty() {
                return Err(FieldError::Handler("empty slot path".to_string()));
            }
            let mut path = Vec::with_capacity(atoms.len());
            for atom in atoms {
                path.push(atom.to_u256()?);
            }
            derive_mapping_slot(&path)
        }
    };
    Ok(base.wrapping_add(U256::from(offset.unwrap_or(0))))
}

pub async fn run(
    ctx: &HandlerContext,
    slot: &SlotDef,
    offset: Option<u64>,
    return_type: Option<&ReturnType>,
) -> Result<ContractValue, FieldError> {
    let slot = resolve_slot(slot, offset)?;
    let word = ctx
        .provider
        .get_storage(ctx.address, B256::from(slot.to_be_bytes::<32>()))
        .await
        .map_err(super::provider_field_error)?;

    let return_type = return_type.unwrap_or(&ReturnType::Bytes32);
    if matches!(return_type, ReturnType::Text) && word[31] % 2 == 1 {
        return read_long_string(ctx, slot, word).await;
    }
    decode_word(word, return_type)
}

/// Long strings keep `length*2 + 1` in the base slot and the content in
/// consecutive slots starting at `keccak256(pad32(slot))`.
async fn read_long_string(
    ctx: &HandlerContext,
    slot: U256,
    word: B256,
) -> Result<ContractValue, FieldError> {
    let encoded_len = U256::from_be_bytes(word.0);
    let len = usize::try_from((encoded_len - U256::from(1u64)) / U256::from(2u64))
        .map_err(|_| FieldError::Handler("string length out of range".to_string()))?;
    if len > 4096 {
        return Err(FieldError::Handler(format!(
            "string of {len} bytes exceeds the read budget"
        )));
    }

    let data_base = U256::from_be_bytes(keccak256(slot.to_be_bytes::<32>()).0);
    let mut content = Vec::with_capacity(len);
    let mut remaining = len;
    let mut index = 0u64;
    while remaining > 0 {
        let chunk = ctx
            .provider
            .get_storage(
                ctx.address,
                B256::from((data_base + U256::from(index)).to_be_bytes::<32>()),
            )
            .await
            .map_err(super::provider_field_error)?;
        let take = remaining.min(32);
        content.extend_from_slice(&chunk[..take]);
        remaining -= take;
        index += 1;
    }
    Ok(ContractValue::Text(
        String::from_utf8_lossy(&content).into_owned(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::SlotAtom;

    #[test]
    fn test_single_key_matches_solidity_reference() {
        // slot of map[k] at base b is keccak256(pad32(k) ++ pad32(b)).
        let base = U256::from(3u64);
        let key = U256::from(0xabcdu64);
        let mut buffer = [0u8; 64];
        buffer[..32].copy_from_slice(&key.to_be_bytes::<32>());
        buffer[32..].copy_from_slice(&base.to_be_bytes::<32>());
        let expected = U256::from_be_bytes(keccak256(buffer).0);
        assert_eq!(derive_mapping_slot(&[base, key]), expected);
    }

    #[test]
    fn test_nested_keys_fold_outward() {
        let base = U256::from(7u64);
        let k0 = U256::from(1u64);
        let k1 = U256::from(2u64);
        let inner = derive_mapping_slot(&[base, k0]);
        assert_eq!(
            derive_mapping_slot(&[base, k0, k1]),
            derive_mapping_slot(&[inner, k1])
        );
    }

    #[test]
    fn test_bare_slot_passes_through() {
        assert_eq!(derive_mapping_slot(&[U256::from(5u64)]), U256::from(5u64));
    }

    #[test]
    fn test_offset_applies_after_derivation() {
        let slot = resolve_slot(&SlotDef::One(SlotAtom::Num(10)), Some(2)).unwrap();
        assert_eq!(slot, U256::from(12u64));
    }
}

//! Static calls through the fetched ABI.

use super::{coerce, json_to_sol, sol_to_value, HandlerContext, ReturnType};
use crate::error::FieldError;
use crate::value::ContractValue;
use alloy::dyn_abi::{DynSolValue, FunctionExt, JsonAbiExt, Specifier};
use alloy::json_abi::Function;
use alloy::primitives::Bytes;

/// Find a function by bare name or full signature. Overloads resolve by
/// argument count when the bare-name form is used.
pub(crate) fn find_function<'a>(
    ctx: &'a HandlerContext,
    method: &str,
    arg_count: Option<usize>,
) -> Result<&'a Function, FieldError> {
    let abi = ctx.require_abi()?;
    if method.contains('(') {
        return abi
            .functions()
            .find(|f| f.signature() == method)
            .ok_or_else(|| FieldError::Handler(format!("no function `{method}` in ABI")));
    }
    let overloads = abi
        .functions
        .get(method)
        .ok_or_else(|| FieldError::Handler(format!("no function `{method}` in ABI")))?;
    match arg_count {
        Some(count) => overloads
            .iter()
            .find(|f| f.inputs.len() == count)
            .ok_or_else(|| {
                FieldError::Handler(format!("no overload of `{method}` takes {count} arguments"))
            }),
        None => overloads
            .first()
            .ok_or_else(|| FieldError::Handler(format!("no function `{method}` in ABI"))),
    }
}

pub(crate) fn encode_call(
    function: &Function,
    args: &[serde_json::Value],
) -> Result<Bytes, FieldError> {
    if function.inputs.len() != args.len() {
        return Err(FieldError::Handler(format!(
            "`{}` takes {} arguments, got {}",
            function.name,
            function.inputs.len(),
            args.len()
        )));
    }
    let mut values = Vec::with_capacity(args.len());
    for (param, raw) in function.inputs.iter().zip(args) {
        let ty = param
            .resolve()
            .map_err(|e| FieldError::Handler(format!("bad parameter type: {e}")))?;
        values.push(json_to_sol(raw, &ty)?);
    }
    function
        .abi_encode_input(&values)
        .map(Bytes::from)
        .map_err(|e| FieldError::Handler(format!("encode failed: {e}")))
}

pub(crate) fn decode_output(
    function: &Function,
    ret: &[u8],
    return_type: Option<&ReturnType>,
) -> Result<ContractValue, FieldError> {
    let mut decoded: Vec<DynSolValue> = function
        .abi_decode_output(ret, true)
        .map_err(|e| FieldError::Handler(format!("decode failed: {e}")))?;
    let value = match decoded.len() {
        0 => return Err(FieldError::Handler("function returns nothing".to_string())),
        1 => sol_to_value(decoded.remove(0)),
        _ => ContractValue::Array(decoded.into_iter().map(sol_to_value).collect()),
    };
    Ok(coerce(value, return_type))
}

pub async fn run(
    ctx: &HandlerContext,
    method: &str,
    args: &[serde_json::Value],
    return_type: Option<&ReturnType>,
) -> Result<ContractValue, FieldError> {
    let function = find_function(ctx, method, Some(args.len()))?;
    let calldata = encode_call(function, args)?;
    let ret = ctx
        .provider
        .call(ctx.address, calldata)
        .await
        .map_err(super::provider_field_error)?;
    decode_output(function, &ret, return_type)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::FixtureProvider;
    use alloy::json_abi::JsonAbi;
    use alloy::primitives::{address, keccak256, Address};
    use std::sync::Arc;

    const OWNABLE_ABI: &str = r#"[
        {"type":"function","name":"owner","inputs":[],"outputs":[{"name":"","type":"address"}],"stateMutability":"view"},
        {"type":"function","name":"balanceOf","inputs":[{"name":"who","type":"address"}],"outputs":[{"name":"","type":"uint256"}],"stateMutability":"view"}
    ]"#;

    fn context(provider: FixtureProvider, target: Address) -> HandlerContext {
        HandlerContext {
            provider: Arc::new(provider),
            address: target,
            abi: Some(Arc::new(serde_json::from_str::<JsonAbi>(OWNABLE_ABI).unwrap())),
            constructor_args: None,
        }
    }

    #[tokio::test]
    async fn test_call_decodes_address_output() {
        let target = address!("00000000000000000000000000000000000000aa");
        let owner = address!("00000000000000000000000000000000000000bb");
        let selector = &keccak256("owner()".as_bytes())[..4];
        let mut ret = [0u8; 32];
        ret[12..].copy_from_slice(owner.as_slice());

        let provider =
            FixtureProvider::new(1).with_call(target, selector.to_vec(), ret.to_vec());
        let ctx = context(provider, target);
        let value = run(&ctx, "owner", &[], None).await.unwrap();
        assert_eq!(value, ContractValue::Address(owner));
    }

    #[tokio::test]
    async fn test_missing_abi_is_reported_as_such() {
        let target = address!("00000000000000000000000000000000000000aa");
        let ctx = HandlerContext {
            provider: Arc::new(FixtureProvider::new(1)),
            address: target,
            abi: None,
            constructor_args: None,
        };
        let err = run(&ctx, "owner", &[], None).await.unwrap_err();
        assert_eq!(err, FieldError::MissingAbi);
    }

    #[tokio::test]
    async fn test_revert_is_a_handler_error() {
        let target = address!("00000000000000000000000000000000000000aa");
        let selector = &keccak256("owner()".as_bytes())[..4];
        let provider = FixtureProvider::new(1).with_reverting_call(target, selector.to_vec());
        let ctx = context(provider, target);
        let err = run(&ctx, "owner", &[], None).await.unwrap_err();
        assert!(matches!(err, FieldError::Handler(_)));
    }
}

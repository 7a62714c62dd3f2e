//! Numeric-indexed getter iteration: `getter(0)`, `getter(1)`, ... until the
//! contract reverts or the configured length is reached.

use super::call::{decode_output, encode_call, find_function};
use super::{HandlerContext, ReturnType};
use crate::error::{FieldError, ProviderError};
use crate::value::ContractValue;

/// Runaway guard for configs that forget `length` on an unbounded getter.
const DEFAULT_MAX_ITEMS: u64 = 100;

pub async fn run(
    ctx: &HandlerContext,
    method: &str,
    start_index: u64,
    length: Option<u64>,
    max_length: Option<u64>,
    return_type: Option<&ReturnType>,
) -> Result<ContractValue, FieldError> {
    let function = find_function(ctx, method, Some(1))?;
    let ceiling = length.unwrap_or(max_length.unwrap_or(DEFAULT_MAX_ITEMS));

    let mut items = Vec::new();
    for i in 0..ceiling {
        let index = start_index + i;
        let calldata = encode_call(function, &[serde_json::json!(index)])?;
        match ctx.provider.call(ctx.address, calldata).await {
            Ok(ret) => items.push(decode_output(function, &ret, return_type)?),
            // An out-of-bounds revert is the natural terminator.
            Err(ProviderError::Revert(_)) => break,
            Err(err) => return Err(super::provider_field_error(err)),
        }
    }

    if length.is_some_and(|expected| (items.len() as u64) < expected) {
        return Err(FieldError::Handler(format!(
            "`{method}` ended after {} of {} items",
            items.len(),
            length.unwrap_or(0)
        )));
    }
    Ok(ContractValue::Array(items))
}

//! Event-driven extractors: fold a contract's own event stream into a
//! current-state value, or just count matching logs.

use super::{sol_to_value, HandlerContext};
use crate::error::FieldError;
use crate::provider::LogFilter;
use crate::value::ContractValue;
use alloy::dyn_abi::EventExt;
use alloy::json_abi::Event;
use alloy::primitives::{keccak256, B256, U256};
use std::collections::BTreeMap;

fn find_event<'a>(ctx: &'a HandlerContext, event: &str) -> Result<&'a Event, FieldError> {
    let abi = ctx.require_abi()?;
    if event.contains('(') {
        return abi
            .events()
            .find(|e| e.signature() == event)
            .ok_or_else(|| FieldError::Handler(format!("no event `{event}` in ABI")));
    }
    abi.events
        .get(event)
        .and_then(|overloads| overloads.first())
        .ok_or_else(|| FieldError::Handler(format!("no event `{event}` in ABI")))
}

/// Resolve the topic0 for an event reference: a full signature hashes
/// directly, a bare name goes through the ABI.
fn event_topic(ctx: &HandlerContext, event: &str) -> Result<B256, FieldError> {
    if event.contains('(') {
        return Ok(keccak256(event.as_bytes()));
    }
    find_event(ctx, event).map(|e| e.selector())
}

/// Fold the logs of one event into a value. Each log decodes to a
/// name-keyed object of its parameters, projected down to `returnParams`
/// when given; `multiple` accumulates every log, otherwise the latest wins.
pub async fn state_from_event(
    ctx: &HandlerContext,
    event: &str,
    return_params: &[String],
    multiple: bool,
) -> Result<ContractValue, FieldError> {
    let decl = find_event(ctx, event)?.clone();
    let filter = LogFilter::for_address(ctx.address).with_topic0(decl.selector());
    let logs = ctx
        .provider
        .get_logs(&filter)
        .await
        .map_err(super::provider_field_error)?;

    let mut states = Vec::with_capacity(logs.len());
    for log in &logs {
        let decoded = decl
            .decode_log_parts(log.topics.iter().copied(), &log.data, true)
            .map_err(|e| FieldError::Handler(format!("event decode failed: {e}")))?;

        let mut indexed = decoded.indexed.into_iter();
        let mut body = decoded.body.into_iter();
        let mut entries: BTreeMap<String, ContractValue> = BTreeMap::new();
        for (position, param) in decl.inputs.iter().enumerate() {
            let value = if param.indexed {
                indexed.next()
            } else {
                body.next()
            };
            let Some(value) = value else {
                return Err(FieldError::Handler(format!(
                    "event `{event}` is missing parameter {position}"
                )));
            };
            let name = if param.name.is_empty() {
                format!("param{position}")
            } else {
                param.name.clone()
            };
            if return_params.is_empty() || return_params.contains(&name) {
                entries.insert(name, sol_to_value(value));
            }
        }
        states.push(ContractValue::Object(entries));
    }

    if multiple {
        return Ok(ContractValue::Array(states));
    }
    states
        .pop()
        .ok_or_else(|| FieldError::Handler(format!("no `{event}` logs up to the pinned block")))
}

pub async fn event_count(ctx: &HandlerContext, event: &str) -> Result<ContractValue, FieldError> {
    let topic = event_topic(ctx, event)?;
    let filter = LogFilter::for_address(ctx.address).with_topic0(topic);
    let logs = ctx
        .provider
        .get_logs(&filter)
        .await
        .map_err(super::provider_field_error)?;
    Ok(ContractValue::Uint(U256::from(logs.len())))
}

//! Typed per-field extractors. The handler set is closed: adding a kind is a
//! compile-time change, not a plugin. Fields of one contract execute
//! concurrently and land in a name-keyed map, so execution order is never
//! observable. A failing field records its error and leaves every other
//! field untouched.

pub mod access_control;
pub mod array;
pub mod call;
pub mod events;
pub mod special;
pub mod storage;

use crate::config::ContractOverride;
use crate::edit;
use crate::error::{AtlasError, FieldError, ProviderError};
use crate::provider::Provider;
use crate::templates::TemplateService;
use crate::value::ContractValue;
use alloy::dyn_abi::{DynSolType, DynSolValue};
use alloy::json_abi::JsonAbi;
use alloy::primitives::{Address, B256, U256};
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::str::FromStr;
use std::sync::Arc;
use tokio::task::JoinSet;

// ---------------------------------------------------------------------------
// Declarations (the on-disk shape of a handler)
// ---------------------------------------------------------------------------

/// A storage slot reference: a single atom or a mapping path
/// `[base, key1, ... keyN]`.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum SlotDef {
    One(SlotAtom),
    Path(Vec<SlotAtom>),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum SlotAtom {
    Num(u64),
    Raw(String),
}

impl SlotAtom {
    pub fn to_u256(&self) -> Result<U256, FieldError> {
        match self {
            SlotAtom::Num(n) => Ok(U256::from(*n)),
            SlotAtom::Raw(raw) => {
                if let Some(addr) = crate::utils::hex::parse_address(raw) {
                    return Ok(U256::from_be_slice(addr.as_slice()));
                }
                crate::utils::hex::to_u256(raw)
                    .ok_or_else(|| FieldError::Handler(format!("bad slot atom `{raw}`")))
            }
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum HandlerDef {
    Storage {
        slot: SlotDef,
        #[serde(default)]
        offset: Option<u64>,
        #[serde(default)]
        return_type: Option<ReturnType>,
    },
    Call {
        method: String,
        #[serde(default)]
        args: Vec<serde_json::Value>,
        #[serde(default)]
        return_type: Option<ReturnType>,
    },
    Array {
        method: String,
        #[serde(default)]
        start_index: u64,
        #[serde(default)]
        length: Option<u64>,
        #[serde(default)]
        max_length: Option<u64>,
        #[serde(default)]
        return_type: Option<ReturnType>,
    },
    AccessControl {
        #[serde(default)]
        role_names: Vec<String>,
        #[serde(default)]
        pick_role_members: Option<String>,
    },
    StateFromEvent {
        event: String,
        #[serde(default)]
        return_params: Vec<String>,
        #[serde(default)]
        multiple: bool,
    },
    #[serde(rename = "eventCount", alias = "event-count")]
    EventCount { event: String },
    Hardcoded { value: serde_json::Value },
    ConstructorArgs,
    #[serde(rename = "arbitrumDAC")]
    ArbitrumDac,
}

/// Decode target for raw words and call outputs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReturnType {
    Address,
    Uint(usize),
    Bool,
    Bytes32,
    Bytes,
    Text,
    ArrayOf(Box<ReturnType>),
}

impl FromStr for ReturnType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Some(inner) = s.strip_prefix("array<").and_then(|r| r.strip_suffix('>')) {
            return Ok(ReturnType::ArrayOf(Box::new(inner.parse()?)));
        }
        match s {
            "address" => Ok(ReturnType::Address),
            "bool" => Ok(ReturnType::Bool),
            "bytes32" => Ok(ReturnType::Bytes32),
            "bytes" => Ok(ReturnType::Bytes),
            "string" => Ok(ReturnType::Text),
            _ => {
                if let Some(bits) = s.strip_prefix("uint") {
                    let bits = if bits.is_empty() {
                        256
                    } else {
                        bits.parse::<usize>().map_err(|_| format!("bad return type `{s}`"))?
                    };
                    if bits == 0 || bits > 256 || bits % 8 != 0 {
                        return Err(format!("bad uint width `{s}`"));
                    }
                    return Ok(ReturnType::Uint(bits));
                }
                Err(format!("unknown return type `{s}`"))
            }
        }
    }
}

impl<'de> Deserialize<'de> for ReturnType {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// Execution
// ---------------------------------------------------------------------------

/// Everything a handler may touch for one contract.
#[derive(Clone)]
pub struct HandlerContext {
    pub provider: Arc<dyn Provider>,
    pub address: Address,
    pub abi: Option<Arc<JsonAbi>>,
    pub constructor_args: Option<Arc<Vec<u8>>>,
}

impl HandlerContext {
    pub fn require_abi(&self) -> Result<&JsonAbi, FieldError> {
        self.abi.as_deref().ok_or(FieldError::MissingAbi)
    }
}

/// One handler's result. Only accessControl populates `role_grants`; the
/// engine uses them to annotate EOA entries.
#[derive(Debug, Clone, Default)]
pub struct HandlerOutcome {
    pub value: Option<ContractValue>,
    pub role_grants: Vec<(Address, String)>,
}

impl HandlerOutcome {
    pub fn value(value: ContractValue) -> Self {
        Self {
            value: Some(value),
            role_grants: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ExecutionOutput {
    pub values: BTreeMap<String, ContractValue>,
    pub errors: BTreeMap<String, FieldError>,
    pub relatives: BTreeSet<Address>,
    /// Template suggestions for relatives, keyed by the discovered address.
    /// A field declared with a `template` reference hints that template for
    /// every address it surfaces.
    pub relative_hints: BTreeMap<Address, BTreeSet<String>>,
    pub role_grants: BTreeMap<Address, BTreeSet<String>>,
}

pub fn provider_field_error(err: ProviderError) -> FieldError {
    match err {
        ProviderError::Revert(msg) => FieldError::Handler(format!("reverted: {msg}")),
        other => FieldError::Provider(other.to_string()),
    }
}

async fn run_handler(ctx: &HandlerContext, def: &HandlerDef) -> Result<HandlerOutcome, FieldError> {
    match def {
        HandlerDef::Storage {
            slot,
            offset,
            return_type,
        } => storage::run(ctx, slot, *offset, return_type.as_ref())
            .await
            .map(HandlerOutcome::value),
        HandlerDef::Call {
            method,
            args,
            return_type,
        } => call::run(ctx, method, args, return_type.as_ref())
            .await
            .map(HandlerOutcome::value),
        HandlerDef::Array {
            method,
            start_index,
            length,
            max_length,
            return_type,
        } => array::run(ctx, method, *start_index, *length, *max_length, return_type.as_ref())
            .await
            .map(HandlerOutcome::value),
        HandlerDef::AccessControl {
            role_names,
            pick_role_members,
        } => access_control::run(ctx, role_names, pick_role_members.as_deref()).await,
        HandlerDef::StateFromEvent {
            event,
            return_params,
            multiple,
        } => events::state_from_event(ctx, event, return_params, *multiple)
            .await
            .map(HandlerOutcome::value),
        HandlerDef::EventCount { event } => events::event_count(ctx, event)
            .await
            .map(HandlerOutcome::value),
        HandlerDef::Hardcoded { value } => {
            Ok(HandlerOutcome::value(ContractValue::from_json(value)))
        }
        HandlerDef::ConstructorArgs => {
            special::constructor_args(ctx).map(HandlerOutcome::value)
        }
        HandlerDef::ArbitrumDac => special::arbitrum_dac(ctx)
            .await
            .map(HandlerOutcome::value),
    }
}

/// Run every declared field of `config` against one contract. Handler fields
/// execute concurrently; `copy` fields resolve afterwards from their source
/// field; `edit` expressions post-transform in place. Address-typed results
/// become relative candidates unless the field is listed in
/// `ignoreRelatives`.
pub async fn execute(
    ctx: &HandlerContext,
    config: &ContractOverride,
    templates: &TemplateService,
) -> Result<ExecutionOutput, AtlasError> {
    let mut planned: Vec<(String, HandlerDef, Option<String>)> = Vec::new();
    let mut copies: Vec<(String, String, Option<String>)> = Vec::new();

    for (name, field) in &config.fields {
        let mut handler = field.handler.clone();
        let mut edit_expr = field.edit.clone();
        if handler.is_none() && field.copy.is_none() {
            if let Some(template_id) = &field.template {
                if let Some(defaults) = templates.field_defaults(template_id, name) {
                    handler = defaults.handler.clone();
                    if edit_expr.is_none() {
                        edit_expr = defaults.edit.clone();
                    }
                }
            }
        }
        if let Some(def) = handler {
            planned.push((name.clone(), def, edit_expr));
        } else if let Some(source) = &field.copy {
            copies.push((name.clone(), source.clone(), edit_expr));
        }
    }

    let mut tasks: JoinSet<(String, Option<String>, Result<HandlerOutcome, FieldError>)> =
        JoinSet::new();
    for (name, def, edit_expr) in planned {
        let ctx = ctx.clone();
        tasks.spawn(async move {
            let outcome = run_handler(&ctx, &def).await;
            (name, edit_expr, outcome)
        });
    }

    let mut output = ExecutionOutput::default();
    while let Some(joined) = tasks.join_next().await {
        let (name, edit_expr, outcome) =
            joined.map_err(|e| AtlasError::Internal(format!("handler task failed: {e}")))?;
        match outcome {
            Ok(outcome) => {
                for (holder, role) in outcome.role_grants {
                    output.role_grants.entry(holder).or_default().insert(role);
                }
                if let Some(value) = outcome.value {
                    store_field(&mut output, &name, value, edit_expr.as_deref());
                }
            }
            Err(err) => {
                tracing::debug!("field `{name}` failed: {err}");
                output.errors.insert(name, err);
            }
        }
    }

    for (name, source, edit_expr) in copies {
        match output.values.get(&source).cloned() {
            Some(value) => store_field(&mut output, &name, value, edit_expr.as_deref()),
            None => {
                output.errors.insert(
                    name,
                    FieldError::Handler(format!("copy source `{source}` has no value")),
                );
            }
        }
    }

    for (name, value) in &output.values {
        if config.ignores_relative(name) {
            continue;
        }
        let mut found = Vec::new();
        value.collect_addresses(&mut found);
        let hint = config
            .fields
            .get(name)
            .and_then(|field| field.template.clone());
        for address in &found {
            if let Some(template_id) = &hint {
                output
                    .relative_hints
                    .entry(*address)
                    .or_default()
                    .insert(template_id.clone());
            }
        }
        output.relatives.extend(found);
    }

    Ok(output)
}

fn store_field(output: &mut ExecutionOutput, name: &str, value: ContractValue, edit_expr: Option<&str>) {
    let value = match edit_expr {
        None => value,
        Some(expr) => match edit::parse(expr).and_then(|parsed| edit::apply(&parsed, &value)) {
            Ok(edited) => edited,
            Err(reason) => {
                output
                    .errors
                    .insert(name.to_string(), FieldError::Handler(format!("edit: {reason}")));
                return;
            }
        },
    };
    output.values.insert(name.to_string(), value);
}

// ---------------------------------------------------------------------------
// Shared decoding
// ---------------------------------------------------------------------------

pub(crate) fn mask_uint(value: U256, bits: usize) -> U256 {
    if bits >= 256 {
        value
    } else {
        value & ((U256::from(1u64) << bits) - U256::from(1u64))
    }
}

/// Interpret a raw 32-byte storage word. Strings need extra slot reads for
/// the long form, which the storage handler does itself before calling this.
pub(crate) fn decode_word(word: B256, return_type: &ReturnType) -> Result<ContractValue, FieldError> {
    match return_type {
        ReturnType::Address => Ok(ContractValue::Address(Address::from_slice(&word[12..]))),
        ReturnType::Uint(bits) => Ok(ContractValue::Uint(mask_uint(
            U256::from_be_bytes(word.0),
            *bits,
        ))),
        ReturnType::Bool => Ok(ContractValue::Bool(word[31] != 0)),
        ReturnType::Bytes32 | ReturnType::Bytes => Ok(ContractValue::Bytes(word.to_vec())),
        ReturnType::Text => {
            let len_byte = word[31] as usize;
            if len_byte % 2 != 0 {
                return Err(FieldError::Handler(
                    "long string requires slot expansion".to_string(),
                ));
            }
            let len = (len_byte / 2).min(31);
            Ok(ContractValue::Text(
                String::from_utf8_lossy(&word[..len]).into_owned(),
            ))
        }
        ReturnType::ArrayOf(_) => Err(FieldError::Handler(
            "array return type needs an array-shaped source".to_string(),
        )),
    }
}

/// ABI value -> ContractValue, preserving full precision.
pub(crate) fn sol_to_value(value: DynSolValue) -> ContractValue {
    match value {
        DynSolValue::Address(addr) => ContractValue::Address(addr),
        DynSolValue::Uint(v, _) => ContractValue::Uint(v),
        DynSolValue::Int(v, _) => ContractValue::Text(v.to_string()),
        DynSolValue::Bool(b) => ContractValue::Bool(b),
        DynSolValue::Bytes(bytes) => ContractValue::Bytes(bytes),
        DynSolValue::FixedBytes(word, size) => ContractValue::Bytes(word[..size].to_vec()),
        DynSolValue::String(s) => ContractValue::Text(s),
        DynSolValue::Array(items) | DynSolValue::FixedArray(items) | DynSolValue::Tuple(items) => {
            ContractValue::Array(items.into_iter().map(sol_to_value).collect())
        }
        DynSolValue::Function(f) => ContractValue::Bytes(f.as_slice().to_vec()),
    }
}

/// Configuration literal -> ABI value, guided by the declared parameter type.
pub(crate) fn json_to_sol(
    raw: &serde_json::Value,
    ty: &DynSolType,
) -> Result<DynSolValue, FieldError> {
    let fail = || FieldError::Handler(format!("cannot encode `{raw}` as {ty}"));
    match ty {
        DynSolType::Address => {
            let s = raw.as_str().ok_or_else(fail)?;
            crate::utils::hex::parse_address(s)
                .map(DynSolValue::Address)
                .ok_or_else(fail)
        }
        DynSolType::Uint(bits) => {
            let value = match raw {
                serde_json::Value::Number(n) => n.as_u64().map(U256::from),
                serde_json::Value::String(s) => crate::utils::hex::to_u256(s),
                _ => None,
            }
            .ok_or_else(fail)?;
            Ok(DynSolValue::Uint(value, *bits))
        }
        DynSolType::Bool => raw.as_bool().map(DynSolValue::Bool).ok_or_else(fail),
        DynSolType::Bytes => {
            let s = raw.as_str().ok_or_else(fail)?;
            hex::decode(s.trim_start_matches("0x"))
                .map(DynSolValue::Bytes)
                .map_err(|_| fail())
        }
        DynSolType::FixedBytes(size) => {
            let s = raw.as_str().ok_or_else(fail)?;
            let bytes = hex::decode(s.trim_start_matches("0x")).map_err(|_| fail())?;
            if bytes.len() != *size {
                return Err(fail());
            }
            let mut word = [0u8; 32];
            word[..*size].copy_from_slice(&bytes);
            Ok(DynSolValue::FixedBytes(B256::from(word), *size))
        }
        DynSolType::String => raw
            .as_str()
            .map(|s| DynSolValue::String(s.to_string()))
            .ok_or_else(fail),
        _ => Err(FieldError::Handler(format!(
            "unsupported argument type {ty}"
        ))),
    }
}

/// Best-effort coercion when a handler pins a returnType that differs from
/// the ABI's natural decode.
pub(crate) fn coerce(value: ContractValue, return_type: Option<&ReturnType>) -> ContractValue {
    let Some(rt) = return_type else { return value };
    match (rt, &value) {
        (ReturnType::Address, ContractValue::Uint(v)) => {
            ContractValue::Address(Address::from_slice(&v.to_be_bytes::<32>()[12..]))
        }
        (ReturnType::Address, ContractValue::Bytes(bytes)) if bytes.len() == 32 => {
            ContractValue::Address(Address::from_slice(&bytes[12..]))
        }
        (ReturnType::Uint(bits), ContractValue::Bytes(bytes)) if bytes.len() == 32 => {
            ContractValue::Uint(mask_uint(U256::from_be_slice(bytes), *bits))
        }
        (ReturnType::ArrayOf(inner), ContractValue::Array(items)) => ContractValue::Array(
            items
                .iter()
                .map(|item| coerce(item.clone(), Some(inner.as_ref())))
                .collect(),
        ),
        _ => value,
    }
}

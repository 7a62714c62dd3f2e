//! Current role membership reconstructed from the OpenZeppelin
//! AccessControl event stream: fold every RoleGranted/RoleRevoked up to the
//! pinned block, in chain order.

use super::{HandlerContext, HandlerOutcome};
use crate::error::FieldError;
use crate::provider::LogFilter;
use crate::value::ContractValue;
use alloy::primitives::{keccak256, Address, B256};
use std::collections::{BTreeMap, BTreeSet};

fn role_granted_topic() -> B256 {
    keccak256("RoleGranted(bytes32,address,address)".as_bytes())
}

fn role_revoked_topic() -> B256 {
    keccak256("RoleRevoked(bytes32,address,address)".as_bytes())
}

/// `roleNames` are candidate plain names; a hash that matches
/// `keccak256(name)` renders as the name. The zero role is always `ADMIN`.
fn role_label(role: B256, names: &BTreeMap<B256, String>) -> String {
    if role == B256::ZERO {
        return "ADMIN".to_string();
    }
    names
        .get(&role)
        .cloned()
        .unwrap_or_else(|| format!("0x{}", hex::encode(role)))
}

pub async fn run(
    ctx: &HandlerContext,
    role_names: &[String],
    pick_role_members: Option<&str>,
) -> Result<HandlerOutcome, FieldError> {
    let granted = role_granted_topic();
    let revoked = role_revoked_topic();
    let filter = LogFilter::for_address(ctx.address).with_topic0s([granted, revoked]);
    let logs = ctx
        .provider
        .get_logs(&filter)
        .await
        .map_err(super::provider_field_error)?;

    let mut members: BTreeMap<B256, BTreeSet<Address>> = BTreeMap::new();
    for log in &logs {
        if log.topics.len() < 3 {
            continue;
        }
        let role = log.topics[1];
        let account = Address::from_slice(&log.topics[2][12..]);
        if log.topics[0] == granted {
            members.entry(role).or_default().insert(account);
        } else if let Some(holders) = members.get_mut(&role) {
            holders.remove(&account);
        }
    }
    members.retain(|_, holders| !holders.is_empty());

    let names: BTreeMap<B256, String> = role_names
        .iter()
        .map(|name| (keccak256(name.as_bytes()), name.clone()))
        .collect();

    let mut role_grants = Vec::new();
    let mut rendered: BTreeMap<String, ContractValue> = BTreeMap::new();
    for (role, holders) in &members {
        let label = role_label(*role, &names);
        for holder in holders {
            role_grants.push((*holder, label.clone()));
        }
        rendered.insert(
            label,
            ContractValue::Array(
                holders
                    .iter()
                    .map(|holder| ContractValue::Address(*holder))
                    .collect(),
            ),
        );
    }

    let value = match pick_role_members {
        Some(wanted) => rendered
            .get(wanted)
            .cloned()
            .unwrap_or(ContractValue::Array(Vec::new())),
        None => ContractValue::Object(rendered),
    };

    Ok(HandlerOutcome {
        value: Some(value),
        role_grants,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{FixtureProvider, LogEntry};
    use alloy::primitives::{address, Bytes};
    use std::sync::Arc;

    fn topic_of(addr: Address) -> B256 {
        let mut word = [0u8; 32];
        word[12..].copy_from_slice(addr.as_slice());
        B256::from(word)
    }

    fn log(target: Address, topic0: B256, role: B256, account: Address, block: u64) -> LogEntry {
        LogEntry {
            address: target,
            topics: vec![topic0, role, topic_of(account), topic_of(Address::ZERO)],
            data: Bytes::new(),
            block_number: block,
            log_index: 0,
        }
    }

    #[tokio::test]
    async fn test_revoked_members_drop_out() {
        let target = address!("00000000000000000000000000000000000000aa");
        let alice = address!("0000000000000000000000000000000000000a11");
        let bob = address!("0000000000000000000000000000000000000b22");
        let pauser = keccak256("PAUSER_ROLE".as_bytes());

        let provider = FixtureProvider::new(10)
            .with_contract(target)
            .with_log(log(target, role_granted_topic(), pauser, alice, 1))
            .with_log(log(target, role_granted_topic(), pauser, bob, 2))
            .with_log(log(target, role_revoked_topic(), pauser, alice, 3));

        let ctx = HandlerContext {
            provider: Arc::new(provider),
            address: target,
            abi: None,
            constructor_args: None,
        };
        let outcome = run(&ctx, &["PAUSER_ROLE".to_string()], None).await.unwrap();
        let ContractValue::Object(roles) = outcome.value.unwrap() else {
            panic!("expected an object");
        };
        assert_eq!(
            roles.get("PAUSER_ROLE"),
            Some(&ContractValue::Array(vec![ContractValue::Address(bob)]))
        );
        assert_eq!(outcome.role_grants, vec![(bob, "PAUSER_ROLE".to_string())]);
    }

    #[tokio::test]
    async fn test_pick_role_members_projects_one_role() {
        let target = address!("00000000000000000000000000000000000000aa");
        let alice = address!("0000000000000000000000000000000000000a11");

        let provider = FixtureProvider::new(10)
            .with_contract(target)
            .with_log(log(target, role_granted_topic(), B256::ZERO, alice, 1));

        let ctx = HandlerContext {
            provider: Arc::new(provider),
            address: target,
            abi: None,
            constructor_args: None,
        };
        let outcome = run(&ctx, &[], Some("ADMIN")).await.unwrap();
        assert_eq!(
            outcome.value.unwrap(),
            ContractValue::Array(vec![ContractValue::Address(alice)])
        );
    }
}

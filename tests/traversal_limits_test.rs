//! Traversal bounds: the address cap is enforced before enqueue, depth is a
//! strict pre-filter, and every followed relative ends up as a top-level
//! entry.

use dark_atlas::analyzer::Analysis;
use dark_atlas::config::StructureConfig;
use dark_atlas::engine::{Discovery, DiscoveryEngine};
use dark_atlas::provider::FixtureProvider;
use dark_atlas::sources::FixtureSources;
use dark_atlas::templates::TemplateService;
use alloy::primitives::{address, Address, U256};
use std::sync::Arc;

async fn discover(provider: FixtureProvider, config_json: &str) -> Discovery {
    let config = StructureConfig::from_jsonc_str(config_json).unwrap();
    let engine = DiscoveryEngine::new(
        Arc::new(provider),
        Arc::new(FixtureSources::new()),
        Arc::new(TemplateService::empty()),
        Arc::new(config),
    );
    engine.discover().await.unwrap()
}

#[tokio::test]
async fn address_cap_drops_excess_relatives_but_completes() {
    let seed = address!("cccccccccccccccccccccccccccccccccccccc01");
    let relatives: Vec<Address> = (1..=5u8)
        .map(|i| Address::from_slice(&[&[0xbb; 19][..], &[i][..]].concat()))
        .collect();

    let mut provider = FixtureProvider::new(100).with_contract(seed);
    for (i, relative) in relatives.iter().enumerate() {
        provider = provider.with_storage_address(seed, U256::from(10 + i as u64), *relative);
    }

    let config = r#"{
        "name": "capped", "chain": "ethereum", "maxAddresses": 3,
        "initialAddresses": ["0xcccccccccccccccccccccccccccccccccccccc01"],
        "overrides": {
            "0xcccccccccccccccccccccccccccccccccccccc01": {
                "fields": {
                    "r1": {"handler": {"type": "storage", "slot": 10, "returnType": "address"}},
                    "r2": {"handler": {"type": "storage", "slot": 11, "returnType": "address"}},
                    "r3": {"handler": {"type": "storage", "slot": 12, "returnType": "address"}},
                    "r4": {"handler": {"type": "storage", "slot": 13, "returnType": "address"}},
                    "r5": {"handler": {"type": "storage", "slot": 14, "returnType": "address"}}
                }
            }
        }
    }"#;
    let discovery = discover(provider, config).await;

    assert_eq!(discovery.analyses.len(), 3);
    assert!(discovery.cap_exceeded);
}

#[tokio::test]
async fn max_depth_is_a_strict_prefilter() {
    let seed = address!("cccccccccccccccccccccccccccccccccccccc01");
    let middle = address!("cccccccccccccccccccccccccccccccccccccc02");
    let far = address!("cccccccccccccccccccccccccccccccccccccc03");
    let provider = FixtureProvider::new(100)
        .with_contract(seed)
        .with_contract(middle)
        .with_contract(far)
        .with_storage_address(seed, U256::from(1u64), middle)
        .with_storage_address(middle, U256::from(1u64), far);

    let config = r#"{
        "name": "shallow", "chain": "ethereum", "maxDepth": 1,
        "initialAddresses": ["0xcccccccccccccccccccccccccccccccccccccc01"],
        "overrides": {
            "0xcccccccccccccccccccccccccccccccccccccc01": {
                "fields": {"next": {"handler": {"type": "storage", "slot": 1, "returnType": "address"}}}
            },
            "0xcccccccccccccccccccccccccccccccccccccc02": {
                "fields": {"next": {"handler": {"type": "storage", "slot": 1, "returnType": "address"}}}
            }
        }
    }"#;
    let discovery = discover(provider, config).await;

    let resolved: Vec<Address> = discovery
        .analyses
        .iter()
        .map(|analysis| analysis.address())
        .collect();
    assert!(resolved.contains(&seed));
    assert!(resolved.contains(&middle));
    // Depth 2 exceeds maxDepth 1.
    assert!(!resolved.contains(&far));
    assert!(!discovery.cap_exceeded);
}

#[tokio::test]
async fn every_followed_relative_is_a_top_level_entry() {
    let seed = address!("cccccccccccccccccccccccccccccccccccccc01");
    let owner = address!("bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb01");
    let treasury = address!("bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb02");
    let provider = FixtureProvider::new(100)
        .with_contract(seed)
        .with_storage_address(seed, U256::from(1u64), owner)
        .with_storage_address(seed, U256::from(2u64), treasury);

    let config = r#"{
        "name": "closure", "chain": "ethereum",
        "initialAddresses": ["0xcccccccccccccccccccccccccccccccccccccc01"],
        "overrides": {
            "0xcccccccccccccccccccccccccccccccccccccc01": {
                "fields": {
                    "owner": {"handler": {"type": "storage", "slot": 1, "returnType": "address"}},
                    "treasury": {"handler": {"type": "storage", "slot": 2, "returnType": "address"}}
                }
            }
        }
    }"#;
    let discovery = discover(provider, config).await;

    let resolved: Vec<Address> = discovery
        .analyses
        .iter()
        .map(|analysis| analysis.address())
        .collect();
    for analysis in &discovery.analyses {
        if let Analysis::Contract(contract) = analysis {
            for relative in &contract.relatives {
                assert!(
                    resolved.contains(relative),
                    "relative {relative:?} missing from entries"
                );
            }
        }
    }
    assert_eq!(discovery.analyses.len(), 3);
}

#[tokio::test]
async fn seeds_beyond_cap_are_dropped_with_flag() {
    let provider = FixtureProvider::new(100);
    let config = r#"{
        "name": "tiny", "chain": "ethereum", "maxAddresses": 1,
        "initialAddresses": [
            "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa01",
            "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa02"
        ]
    }"#;
    let discovery = discover(provider, config).await;
    assert_eq!(discovery.analyses.len(), 1);
    assert!(discovery.cap_exceeded);
}

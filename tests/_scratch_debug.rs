use dark_atlas::config::StructureConfig;
use dark_atlas::engine::DiscoveryEngine;
use dark_atlas::provider::FixtureProvider;
use dark_atlas::sources::FixtureSources;
use dark_atlas::templates::TemplateService;
use alloy::primitives::{address, U256};
use std::sync::Arc;

#[test]
fn scratch_handlerdef() {
    let def: dark_atlas::handlers::HandlerDef =
        serde_json::from_str(r#"{"type": "storage", "slot": 5, "returnType": "address"}"#)
            .unwrap();
    eprintln!("direct: {:?}", def);
}

#[tokio::test]
async fn scratch() {
    let seed = address!("cccccccccccccccccccccccccccccccccccccc01");
    let owner = address!("bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb");
    let provider = FixtureProvider::new(100)
        .with_contract(seed)
        .with_storage_address(seed, U256::from(5u64), owner);

    let config_json = r#"{
        "name": "demo", "chain": "ethereum",
        "initialAddresses": ["0xcccccccccccccccccccccccccccccccccccccc01"],
        "overrides": {
            "0xcccccccccccccccccccccccccccccccccccccc01": {
                "fields": {
                    "owner": {"handler": {"type": "storage", "slot": 5, "returnType": "address"}}
                }
            }
        }
    }"#;
    let config = StructureConfig::from_jsonc_str(config_json).unwrap();
    eprintln!("override present: {:?}", config.overrides.keys().collect::<Vec<_>>());
    eprintln!("seed: {:?}", seed);
    let ov = config.override_for(seed).unwrap();
    eprintln!("fields: {:?}", ov.fields);
    let engine = DiscoveryEngine::new(
        Arc::new(provider),
        Arc::new(FixtureSources::new()),
        Arc::new(TemplateService::empty()),
        Arc::new(config),
    );
    let discovery = engine.discover().await.unwrap();
    eprintln!("{:#?}", discovery);
}

//! Unknown config keys survive parse -> discover -> serialize: top-level
//! extras land in the artifact without shadowing the typed keys, and the
//! passthrough does not disturb byte-level determinism.

use dark_atlas::config::StructureConfig;
use dark_atlas::engine::{Discovery, DiscoveryEngine};
use dark_atlas::output;
use dark_atlas::provider::FixtureProvider;
use dark_atlas::sources::FixtureSources;
use dark_atlas::templates::TemplateService;
use std::sync::Arc;

const CONFIG: &str = r#"{
    // keys the engine does not know about
    "name": "passthrough", "chain": "ethereum",
    "initialAddresses": ["0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa"],
    "reviewedBy": "ops-rotation",
    "upstream": {"tracker": "SYS-482", "milestone": 7},
    "entries": "should never replace the real entry list",
    "overrides": {
        "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa": {
            "customSeverity": "high"
        }
    }
}"#;

async fn run() -> (StructureConfig, Discovery) {
    let config = StructureConfig::from_jsonc_str(CONFIG).unwrap();
    let engine = DiscoveryEngine::new(
        Arc::new(FixtureProvider::new(100)),
        Arc::new(FixtureSources::new()),
        Arc::new(TemplateService::empty()),
        Arc::new(config.clone()),
    );
    let discovery = engine.discover().await.unwrap();
    (config, discovery)
}

#[tokio::test]
async fn unknown_top_level_keys_reach_the_artifact() {
    let (config, discovery) = run().await;
    let document = output::build_output(&config, 100, &discovery);

    assert_eq!(document["reviewedBy"], "ops-rotation");
    assert_eq!(document["upstream"]["tracker"], "SYS-482");
    assert_eq!(document["upstream"]["milestone"], 7);
}

#[tokio::test]
async fn extras_never_shadow_typed_artifact_keys() {
    let (config, discovery) = run().await;
    // The config smuggles an "entries" key; it must lose to the real list.
    assert!(config.extras.contains_key("entries"));

    let document = output::build_output(&config, 100, &discovery);
    let entries = document["entries"].as_array().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["type"], "EOA");
    assert_eq!(document["name"], "passthrough");
}

#[tokio::test]
async fn override_extras_survive_parsing() {
    let (config, _) = run().await;
    let seed = config.initial_addresses[0];
    let override_cfg = config.override_for(seed).unwrap();
    assert_eq!(
        override_cfg.extras.get("customSeverity"),
        Some(&serde_json::json!("high"))
    );
}

#[tokio::test]
async fn passthrough_keeps_rendering_deterministic() {
    let (config, discovery) = run().await;
    let first = output::render(&output::build_output(&config, 100, &discovery));

    let (config_again, discovery_again) = run().await;
    let second = output::render(&output::build_output(&config_again, 100, &discovery_again));
    assert_eq!(first, second);
}

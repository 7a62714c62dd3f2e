//! Level-synchronous BFS over the address graph. Every address in one level
//! is analyzed concurrently; the frontier for the next level is assembled
//! only after the whole level completes, which gives a clean happens-before
//! between levels and keeps all engine state single-owner.

use crate::analyzer::{AddressAnalyzer, Analysis};
use crate::config::StructureConfig;
use crate::error::AtlasError;
use crate::provider::Provider;
use crate::sources::SourceCodeService;
use crate::templates::{TemplateId, TemplateService};
use alloy::primitives::Address;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tokio::task::JoinSet;

/// Everything a run produces: analyses sorted by address, the roles
/// harvested for EOA annotation, and whether the address cap dropped work.
#[derive(Debug, Default)]
pub struct Discovery {
    pub analyses: Vec<Analysis>,
    pub roles: BTreeMap<Address, BTreeSet<String>>,
    pub cap_exceeded: bool,
}

pub struct DiscoveryEngine {
    analyzer: Arc<AddressAnalyzer>,
    config: Arc<StructureConfig>,
}

impl DiscoveryEngine {
    pub fn new(
        provider: Arc<dyn Provider>,
        sources: Arc<dyn SourceCodeService>,
        templates: Arc<TemplateService>,
        config: Arc<StructureConfig>,
    ) -> Self {
        let analyzer = Arc::new(AddressAnalyzer::new(
            provider,
            sources,
            templates,
            Arc::clone(&config),
        ));
        Self { analyzer, config }
    }

    pub async fn discover(&self) -> Result<Discovery, AtlasError> {
        let mut resolved: BTreeMap<Address, Analysis> = BTreeMap::new();
        let mut frontier: BTreeMap<Address, BTreeSet<TemplateId>> = BTreeMap::new();
        let mut depth: HashMap<Address, usize> = HashMap::new();
        let mut cap_exceeded = false;

        for seed in &self.config.initial_addresses {
            if frontier.len() >= self.config.max_addresses {
                tracing::warn!(
                    "maxAddresses={} reached while seeding; dropping {seed:?}",
                    self.config.max_addresses
                );
                cap_exceeded = true;
                continue;
            }
            frontier.insert(*seed, BTreeSet::new());
            depth.insert(*seed, 0);
        }

        let mut level = 0usize;
        while !frontier.is_empty() {
            let current = std::mem::take(&mut frontier);
            let addresses: Vec<Address> = current.keys().copied().collect();
            tracing::info!(
                "discovery level {level}: analyzing {} address(es), {} resolved",
                addresses.len(),
                resolved.len()
            );

            let mut tasks: JoinSet<(Address, Result<Analysis, AtlasError>)> = JoinSet::new();
            for (address, hints) in current {
                let analyzer = Arc::clone(&self.analyzer);
                let address_depth = depth.get(&address).copied().unwrap_or(0);
                tasks.spawn(async move {
                    let result = analyzer.analyze(address, &hints, address_depth).await;
                    (address, result)
                });
            }

            while let Some(joined) = tasks.join_next().await {
                let (address, result) = joined
                    .map_err(|e| AtlasError::Internal(format!("analyzer task died: {e}")))?;
                resolved.insert(address, result?);
            }

            // Enqueue relatives in address order so hint merging and cap
            // decisions are stable across runs.
            for address in &addresses {
                let analysis = &resolved[address];
                let next_depth = depth.get(address).copied().unwrap_or(0) + 1;
                if next_depth > self.config.max_depth {
                    continue;
                }
                let hints_by_relative = match analysis {
                    Analysis::Contract(contract) => Some(&contract.relative_hints),
                    Analysis::Eoa { .. } => None,
                };
                for relative in analysis.relatives() {
                    if resolved.contains_key(relative) {
                        continue;
                    }
                    let hints = hints_by_relative
                        .and_then(|hints| hints.get(relative))
                        .cloned()
                        .unwrap_or_default();
                    if let Some(pending) = frontier.get_mut(relative) {
                        pending.extend(hints);
                        continue;
                    }
                    if resolved.len() + frontier.len() >= self.config.max_addresses {
                        tracing::warn!(
                            "maxAddresses={} reached; dropping relative {relative:?} of {address:?}",
                            self.config.max_addresses
                        );
                        cap_exceeded = true;
                        continue;
                    }
                    frontier.insert(*relative, hints);
                    depth.entry(*relative).or_insert(next_depth);
                }
            }
            level += 1;
        }

        let mut roles: BTreeMap<Address, BTreeSet<String>> = BTreeMap::new();
        for analysis in resolved.values() {
            if let Analysis::Contract(contract) = analysis {
                for (holder, granted) in &contract.role_grants {
                    roles.entry(*holder).or_default().extend(granted.iter().cloned());
                }
            }
        }

        tracing::info!("discovery finished: {} address(es) resolved", resolved.len());
        Ok(Discovery {
            analyses: resolved.into_values().collect(),
            roles,
            cap_exceeded,
        })
    }
}

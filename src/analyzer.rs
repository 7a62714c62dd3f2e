//! Per-address orchestration: classify, resolve the proxy, fetch source,
//! pick a template, run handlers, and collect the relatives that feed the
//! next BFS level.

use crate::config::StructureConfig;
use crate::error::{AtlasError, FieldError};
use crate::handlers::{self, HandlerContext};
use crate::provider::Provider;
use crate::proxy::ProxyDetector;
use crate::sources::SourceCodeService;
use crate::templates::{TemplateId, TemplateService};
use crate::value::ContractValue;
use alloy::primitives::{Address, B256};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// The per-address result record. Lives for one run; the output
/// materializer turns the set of these into the artifact.
#[derive(Debug, Clone)]
pub enum Analysis {
    Eoa { address: Address },
    Contract(Box<ContractAnalysis>),
}

#[derive(Debug, Clone, Default)]
pub struct ContractAnalysis {
    pub address: Address,
    pub name: Option<String>,
    pub proxy_type: Option<String>,
    pub implementations: Vec<Address>,
    pub values: BTreeMap<String, ContractValue>,
    pub errors: BTreeMap<String, FieldError>,
    pub relatives: BTreeSet<Address>,
    pub relative_hints: BTreeMap<Address, BTreeSet<TemplateId>>,
    pub ignore_in_watch_mode: Vec<String>,
    pub template_id: Option<TemplateId>,
    pub source_hashes: Vec<B256>,
    pub role_grants: BTreeMap<Address, BTreeSet<String>>,
}

impl Analysis {
    pub fn address(&self) -> Address {
        match self {
            Analysis::Eoa { address } => *address,
            Analysis::Contract(contract) => contract.address,
        }
    }

    pub fn relatives(&self) -> &BTreeSet<Address> {
        static EMPTY: std::sync::OnceLock<BTreeSet<Address>> = std::sync::OnceLock::new();
        match self {
            Analysis::Eoa { .. } => EMPTY.get_or_init(BTreeSet::new),
            Analysis::Contract(contract) => &contract.relatives,
        }
    }
}

pub struct AddressAnalyzer {
    provider: Arc<dyn Provider>,
    sources: Arc<dyn SourceCodeService>,
    templates: Arc<TemplateService>,
    proxy: ProxyDetector,
    config: Arc<StructureConfig>,
}

impl AddressAnalyzer {
    pub fn new(
        provider: Arc<dyn Provider>,
        sources: Arc<dyn SourceCodeService>,
        templates: Arc<TemplateService>,
        config: Arc<StructureConfig>,
    ) -> Self {
        let proxy = ProxyDetector::new(Arc::clone(&provider));
        Self {
            provider,
            sources,
            templates,
            proxy,
            config,
        }
    }

    pub async fn analyze(
        &self,
        address: Address,
        hints: &BTreeSet<TemplateId>,
        depth: usize,
    ) -> Result<Analysis, AtlasError> {
        tracing::debug!("analyzing {address:?} at depth {depth}");

        let code = self.provider.get_code(address).await?;
        if code.is_empty() {
            return Ok(Analysis::Eoa { address });
        }

        let override_cfg = self.config.override_for(address);
        let mut analysis = ContractAnalysis {
            address,
            ..ContractAnalysis::default()
        };

        // Proxy detection failures are recorded, not fatal: the contract is
        // then treated as immutable and the rest of the pipeline continues.
        let proxy_info = match self
            .proxy
            .detect(address, &code, override_cfg.and_then(|cfg| cfg.proxy_type))
            .await
        {
            Ok(info) => info,
            Err(err) => {
                analysis
                    .errors
                    .insert("$proxy".to_string(), FieldError::Provider(err.to_string()));
                Default::default()
            }
        };
        analysis.proxy_type = proxy_info.proxy_type.clone();
        analysis.implementations = proxy_info.implementations.clone();
        for (key, value) in &proxy_info.values {
            analysis.values.insert(key.clone(), value.clone());
        }

        let sources = self
            .sources
            .fetch(address, &proxy_info.implementations)
            .await
            .unwrap_or_else(|err| {
                tracing::warn!("source fetch failed for {address:?}: {err}");
                Default::default()
            });
        analysis.name = sources.name.clone();
        analysis.source_hashes = sources.source_hashes.clone();

        let matched = self.templates.find_matching(
            &sources.source_hashes,
            address,
            &self.config.chain,
            hints,
        );
        analysis.template_id = matched.map(|t| t.id.clone());
        let effective = self.templates.effective_config(matched, override_cfg)?;
        analysis.ignore_in_watch_mode = effective.ignore_in_watch_mode.clone();

        // The ignore gate keeps classification (type + proxy status) but
        // skips extraction, so the address contributes no relatives.
        if effective.ignore_discovery() {
            tracing::debug!("{address:?} has ignoreDiscovery set; minimal analysis only");
            return Ok(Analysis::Contract(Box::new(analysis)));
        }

        let ctx = HandlerContext {
            provider: Arc::clone(&self.provider),
            address,
            abi: sources.abi.map(Arc::new),
            constructor_args: sources.constructor_args.map(Arc::new),
        };
        let executed = handlers::execute(&ctx, &effective, &self.templates).await?;
        analysis.values.extend(executed.values);
        analysis.errors.extend(executed.errors);
        analysis.role_grants = executed.role_grants;
        analysis.relative_hints = executed.relative_hints;

        let mut relatives = executed.relatives;
        relatives.extend(proxy_info.relatives.iter().copied());
        relatives.extend(proxy_info.implementations.iter().copied());

        // Proxy-derived values ($admin, $beacon) can be pruned by name too.
        // Handler fields were already pruned per-field by the executor, and
        // the implementation layer is always analyzed.
        for ignored in &effective.ignore_relatives {
            if !ignored.starts_with('$') || ignored == "$implementation" {
                continue;
            }
            if let Some(value) = analysis.values.get(ignored.as_str()) {
                let mut pruned = Vec::new();
                value.collect_addresses(&mut pruned);
                for addr in pruned {
                    if !proxy_info.implementations.contains(&addr) {
                        relatives.remove(&addr);
                    }
                }
            }
        }
        relatives.remove(&address);
        analysis.relatives = relatives;

        Ok(Analysis::Contract(Box::new(analysis)))
    }
}

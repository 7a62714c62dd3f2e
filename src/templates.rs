//! Reusable per-contract configuration, matched by verified-source shape.
//! A template bundle is a directory tree: each directory holding a
//! `template.jsonc` defines one template, identified by its relative path.
//! `shapes.json` lists the source hashes the template recognizes and
//! `criteria.json` restricts it to specific addresses or chains.

use crate::config::{merge_overrides, validate_override, ContractOverride, FieldDef};
use crate::error::ConfigError;
use crate::utils::{hex, jsonc};
use alloy::primitives::{Address, B256};
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

pub type TemplateId = String;

const SHAPE_HASH_SCORE: u32 = 2;
const ADDRESS_CRITERION_SCORE: u32 = 10;
const CHAIN_CRITERION_SCORE: u32 = 5;
const HINT_SCORE: u32 = 1;

#[derive(Debug, Clone, Default)]
pub struct Criteria {
    pub addresses: Option<Vec<Address>>,
    pub chains: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct RawCriteria {
    addresses: Option<Vec<String>>,
    chains: Option<Vec<String>>,
}

#[derive(Debug, Clone)]
pub struct Template {
    pub id: TemplateId,
    pub config: ContractOverride,
    pub shapes: BTreeSet<B256>,
    pub criteria: Criteria,
}

/// Immutable after load; freely shared across analyzer tasks.
#[derive(Debug, Default)]
pub struct TemplateService {
    templates: BTreeMap<TemplateId, Template>,
    hash_index: BTreeMap<B256, BTreeSet<TemplateId>>,
}

impl TemplateService {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Load a bundle from disk. A missing directory is an empty bundle, not
    /// an error: projects without templates are common.
    pub fn load(root: &Path) -> Result<Self, ConfigError> {
        let mut service = Self::default();
        if !root.is_dir() {
            tracing::debug!("template bundle {} not present", root.display());
            return Ok(service);
        }
        service.load_dir(root, root)?;
        for template in service.templates.values() {
            for shape in &template.shapes {
                service
                    .hash_index
                    .entry(*shape)
                    .or_default()
                    .insert(template.id.clone());
            }
        }
        tracing::debug!(
            "loaded {} templates ({} indexed shapes)",
            service.templates.len(),
            service.hash_index.len()
        );
        Ok(service)
    }

    fn load_dir(&mut self, root: &Path, dir: &Path) -> Result<(), ConfigError> {
        let manifest = dir.join("template.jsonc");
        if manifest.is_file() {
            let template = load_template(root, dir, &manifest)?;
            self.templates.insert(template.id.clone(), template);
        }
        let entries = std::fs::read_dir(dir)
            .map_err(|e| ConfigError::Invalid(format!("cannot read {}: {e}", dir.display())))?;
        let mut subdirs: Vec<_> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.is_dir())
            .collect();
        subdirs.sort();
        for subdir in subdirs {
            self.load_dir(root, &subdir)?;
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Template> {
        self.templates.get(id)
    }

    /// Pick the single best template for a contract. Candidates come from the
    /// shape-hash index and from hints accumulated during discovery; criteria
    /// filter, scores rank, and ties go to the lexicographically smallest id
    /// so the choice is stable across runs.
    pub fn find_matching(
        &self,
        source_hashes: &[B256],
        address: Address,
        chain: &str,
        hints: &BTreeSet<TemplateId>,
    ) -> Option<&Template> {
        let mut candidates: BTreeSet<&TemplateId> = BTreeSet::new();
        for hash in source_hashes {
            if let Some(ids) = self.hash_index.get(hash) {
                candidates.extend(ids.iter());
            }
        }
        for hint in hints {
            match self.templates.get(hint) {
                Some(template) => {
                    candidates.insert(&template.id);
                }
                None => tracing::debug!("ignoring unknown template hint `{hint}`"),
            }
        }

        let mut best: Option<(&Template, u32)> = None;
        // BTreeSet iteration is ascending, so on equal scores the first
        // (smallest) id sticks.
        for id in candidates {
            let template = &self.templates[id];
            let mut score = 0u32;
            if let Some(addresses) = &template.criteria.addresses {
                if !addresses.contains(&address) {
                    continue;
                }
                score += ADDRESS_CRITERION_SCORE;
            }
            if let Some(chains) = &template.criteria.chains {
                if !chains.iter().any(|c| c == chain) {
                    continue;
                }
                score += CHAIN_CRITERION_SCORE;
            }
            score += SHAPE_HASH_SCORE
                * source_hashes
                    .iter()
                    .filter(|h| template.shapes.contains(*h))
                    .count() as u32;
            if hints.contains(id) {
                score += HINT_SCORE;
            }
            if best.map_or(true, |(_, best_score)| score > best_score) {
                best = Some((template, score));
            }
        }
        best.map(|(template, _)| template)
    }

    /// Flatten an `extends` chain, parents first. A repeated id on the
    /// resolution stack is a fatal cycle.
    pub fn resolve_extends(&self, config: &ContractOverride) -> Result<ContractOverride, ConfigError> {
        let mut stack = Vec::new();
        self.resolve_extends_inner(config, &mut stack)
    }

    fn resolve_extends_inner(
        &self,
        config: &ContractOverride,
        stack: &mut Vec<TemplateId>,
    ) -> Result<ContractOverride, ConfigError> {
        let Some(parent_id) = &config.extends else {
            return Ok(config.clone());
        };
        if stack.iter().any(|id| id == parent_id) {
            stack.push(parent_id.clone());
            return Err(ConfigError::ExtendsCycle(stack.join(" -> ")));
        }
        let parent = self
            .templates
            .get(parent_id)
            .ok_or_else(|| ConfigError::UnknownTemplate(parent_id.clone()))?;
        stack.push(parent_id.clone());
        let resolved_parent = self.resolve_extends_inner(&parent.config, stack)?;
        stack.pop();
        Ok(merge_overrides(&resolved_parent, config))
    }

    /// Template config under the per-address override, both with their
    /// `extends` chains flattened. The override wins field by field.
    pub fn effective_config(
        &self,
        matched: Option<&Template>,
        override_cfg: Option<&ContractOverride>,
    ) -> Result<ContractOverride, ConfigError> {
        let base = match matched {
            Some(template) => self.resolve_extends(&template.config)?,
            None => ContractOverride::default(),
        };
        match override_cfg {
            None => Ok(base),
            Some(cfg) => {
                let resolved = self.resolve_extends(cfg)?;
                Ok(merge_overrides(&base, &resolved))
            }
        }
    }

    /// A field can point at a template for its defaults: the template's
    /// same-named field supplies the handler when the field has none.
    pub fn field_defaults(&self, template_id: &str, field_name: &str) -> Option<&FieldDef> {
        self.templates
            .get(template_id)
            .and_then(|t| t.config.fields.get(field_name))
    }

    #[cfg(test)]
    pub fn insert_for_tests(&mut self, template: Template) {
        for shape in &template.shapes {
            self.hash_index
                .entry(*shape)
                .or_default()
                .insert(template.id.clone());
        }
        self.templates.insert(template.id.clone(), template);
    }
}

fn load_template(root: &Path, dir: &Path, manifest: &Path) -> Result<Template, ConfigError> {
    let id = dir
        .strip_prefix(root)
        .map_err(|_| ConfigError::Invalid(format!("template path outside bundle: {}", dir.display())))?
        .to_string_lossy()
        .replace('\\', "/");
    if id.is_empty() {
        return Err(ConfigError::Invalid(
            "template.jsonc at the bundle root has no id".to_string(),
        ));
    }

    let raw = std::fs::read_to_string(manifest)
        .map_err(|e| ConfigError::Missing(format!("cannot read {}: {e}", manifest.display())))?;
    let config: ContractOverride = serde_json::from_str(&jsonc::strip(&raw))
        .map_err(|e| ConfigError::Invalid(format!("template `{id}`: {e}")))?;
    validate_override(&id, &config)?;

    let mut shapes = BTreeSet::new();
    let shapes_path = dir.join("shapes.json");
    if shapes_path.is_file() {
        let raw = std::fs::read_to_string(&shapes_path)
            .map_err(|e| ConfigError::Missing(format!("cannot read {}: {e}", shapes_path.display())))?;
        let entries: Vec<String> = serde_json::from_str(&raw)
            .map_err(|e| ConfigError::Invalid(format!("template `{id}` shapes: {e}")))?;
        for entry in entries {
            let hash = hex::parse_b256(&entry).ok_or_else(|| {
                ConfigError::Invalid(format!("template `{id}`: bad shape hash `{entry}`"))
            })?;
            shapes.insert(hash);
        }
    }

    let mut criteria = Criteria::default();
    let criteria_path = dir.join("criteria.json");
    if criteria_path.is_file() {
        let raw = std::fs::read_to_string(&criteria_path).map_err(|e| {
            ConfigError::Missing(format!("cannot read {}: {e}", criteria_path.display()))
        })?;
        let parsed: RawCriteria = serde_json::from_str(&raw)
            .map_err(|e| ConfigError::Invalid(format!("template `{id}` criteria: {e}")))?;
        if let Some(addresses) = parsed.addresses {
            let mut typed = Vec::with_capacity(addresses.len());
            for entry in addresses {
                typed.push(
                    hex::parse_address(&entry)
                        .ok_or_else(|| ConfigError::InvalidAddress(entry.clone()))?,
                );
            }
            criteria.addresses = Some(typed);
        }
        criteria.chains = parsed.chains;
    }

    Ok(Template {
        id,
        config,
        shapes,
        criteria,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::{address, b256};

    fn template(id: &str, shapes: &[B256]) -> Template {
        Template {
            id: id.to_string(),
            config: ContractOverride::default(),
            shapes: shapes.iter().copied().collect(),
            criteria: Criteria::default(),
        }
    }

    const H1: B256 = b256!("1111111111111111111111111111111111111111111111111111111111111111");
    const H2: B256 = b256!("2222222222222222222222222222222222222222222222222222222222222222");

    #[test]
    fn test_tie_breaks_to_smallest_id() {
        let mut service = TemplateService::empty();
        service.insert_for_tests(template("zeta", &[H1]));
        service.insert_for_tests(template("alpha", &[H1]));

        let matched = service
            .find_matching(
                &[H1],
                address!("0000000000000000000000000000000000000001"),
                "ethereum",
                &BTreeSet::new(),
            )
            .unwrap();
        assert_eq!(matched.id, "alpha");
    }

    #[test]
    fn test_more_shape_hits_outrank_hints() {
        let mut service = TemplateService::empty();
        service.insert_for_tests(template("hinted", &[H1]));
        service.insert_for_tests(template("shaped", &[H1, H2]));

        let hints: BTreeSet<String> = ["hinted".to_string()].into_iter().collect();
        let matched = service
            .find_matching(
                &[H1, H2],
                address!("0000000000000000000000000000000000000001"),
                "ethereum",
                &hints,
            )
            .unwrap();
        assert_eq!(matched.id, "shaped");
    }

    #[test]
    fn test_criteria_filter_excludes_wrong_chain() {
        let mut service = TemplateService::empty();
        let mut restricted = template("restricted", &[H1]);
        restricted.criteria.chains = Some(vec!["base".to_string()]);
        service.insert_for_tests(restricted);

        let matched = service.find_matching(
            &[H1],
            address!("0000000000000000000000000000000000000001"),
            "ethereum",
            &BTreeSet::new(),
        );
        assert!(matched.is_none());
    }

    #[test]
    fn test_address_criterion_dominates_shape_count() {
        let target = address!("0000000000000000000000000000000000000001");
        let mut service = TemplateService::empty();
        service.insert_for_tests(template("generic", &[H1, H2]));
        let mut pinned = template("pinned", &[]);
        pinned.criteria.addresses = Some(vec![target]);
        service.insert_for_tests(pinned);

        let hints: BTreeSet<String> = ["pinned".to_string()].into_iter().collect();
        let matched = service
            .find_matching(&[H1, H2], target, "ethereum", &hints)
            .unwrap();
        // 10 (address criterion) + 1 (hint) beats 4 (two shape hits).
        assert_eq!(matched.id, "pinned");
    }

    #[test]
    fn test_extends_cycle_is_fatal() {
        let mut service = TemplateService::empty();
        let mut a = template("a", &[]);
        a.config.extends = Some("b".to_string());
        let mut b = template("b", &[]);
        b.config.extends = Some("a".to_string());
        service.insert_for_tests(a.clone());
        service.insert_for_tests(b);

        let result = service.resolve_extends(&a.config);
        assert!(matches!(result, Err(ConfigError::ExtendsCycle(_))));
    }

    #[test]
    fn test_extends_chain_merges_parent_first() {
        let mut service = TemplateService::empty();
        let mut parent = template("parent", &[]);
        parent.config.ignore_discovery = Some(true);
        parent.config.ignore_relatives = vec!["owner".to_string()];
        service.insert_for_tests(parent);

        let mut child_cfg = ContractOverride::default();
        child_cfg.extends = Some("parent".to_string());
        child_cfg.ignore_discovery = Some(false);

        let resolved = service.resolve_extends(&child_cfg).unwrap();
        assert_eq!(resolved.ignore_discovery, Some(false));
        assert_eq!(resolved.ignore_relatives, vec!["owner"]);
        assert!(resolved.extends.is_none());
    }
}

//! Externally supplied detection inputs, loaded once at process start and
//! shared read-only across all package workers.
//!
//! Malformed rule files are fatal here (`RuleLoad`), never per package.
//! The popularity dataset is optional: absence just skips the
//! typosquatting checker.

use crate::config::ScanConfig;
use crate::error::{Result, SiftError};
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use tracing::{debug, info};

/// Declarative AST-shape rule: flags calls to `call` (full dotted name, or
/// bare name matching the callee's last segment), optionally requiring a
/// literal substring among the arguments.
#[derive(Debug, Clone, Deserialize)]
pub struct SemanticRule {
    pub id: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Score contribution per match; overrides the weight table.
    pub score: u32,
    pub call: String,
    #[serde(default)]
    pub argument_contains: Option<String>,
}

/// One byte-pattern rule file, passed through opaquely to the external
/// matching engine in its native syntax.
#[derive(Debug, Clone)]
pub struct ByteRuleSource {
    pub name: String,
    pub source: String,
}

/// Read-only rule set for a whole process run.
#[derive(Debug, Default)]
pub struct RuleSet {
    pub semantic: Vec<SemanticRule>,
    pub byte_sources: Vec<ByteRuleSource>,
}

impl RuleSet {
    /// Load every configured rule file. Any malformed input is fatal at
    /// process start.
    pub fn load(config: &ScanConfig) -> Result<Self> {
        let mut set = RuleSet::default();

        if let Some(path) = &config.semantic_rules_path {
            set.semantic = load_semantic_rules(path)?;
            info!(count = set.semantic.len(), path = %path.display(), "loaded semantic rules");
        }

        for path in &config.byte_rules_paths {
            let source = fs::read_to_string(path).map_err(|e| {
                SiftError::rule_load(format!("cannot read byte rule file {}: {e}", path.display()))
            })?;
            let name = path
                .file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_else(|| "rules".to_string());
            set.byte_sources.push(ByteRuleSource { name, source });
        }
        if !set.byte_sources.is_empty() {
            debug!(files = set.byte_sources.len(), "collected byte-pattern rule sources");
        }

        Ok(set)
    }
}

fn load_semantic_rules(path: &Path) -> Result<Vec<SemanticRule>> {
    let text = fs::read_to_string(path).map_err(|e| {
        SiftError::rule_load(format!("cannot read semantic rules {}: {e}", path.display()))
    })?;
    let rules: Vec<SemanticRule> = serde_json::from_str(&text).map_err(|e| {
        SiftError::rule_load(format!("malformed semantic rules {}: {e}", path.display()))
    })?;
    for rule in &rules {
        if rule.id.is_empty() || rule.call.is_empty() {
            return Err(SiftError::rule_load(format!(
                "semantic rule with empty id or call in {}",
                path.display()
            )));
        }
    }
    Ok(rules)
}

/// name -> download-count reference used by the typosquatting checker.
/// Keys are PEP 503 normalized.
#[derive(Debug, Default)]
pub struct PopularityIndex {
    counts: HashMap<String, u64>,
}

impl PopularityIndex {
    /// Load the dataset if configured; `Ok(None)` when no path is set or
    /// the file does not exist (the checker is then skipped).
    pub fn load(config: &ScanConfig) -> Result<Option<Self>> {
        let Some(path) = &config.popularity_dataset_path else { return Ok(None) };
        if !path.exists() {
            info!(path = %path.display(), "popularity dataset absent; typosquatting checks disabled");
            return Ok(None);
        }
        let text = fs::read_to_string(path).map_err(|e| {
            SiftError::rule_load(format!("cannot read popularity dataset {}: {e}", path.display()))
        })?;
        let raw: HashMap<String, u64> = serde_json::from_str(&text).map_err(|e| {
            SiftError::rule_load(format!("malformed popularity dataset {}: {e}", path.display()))
        })?;
        let counts = raw
            .into_iter()
            .map(|(name, count)| (crate::locator::normalize_name(&name), count))
            .collect();
        Ok(Some(Self { counts }))
    }

    pub fn from_counts<I: IntoIterator<Item = (String, u64)>>(entries: I) -> Self {
        Self {
            counts: entries
                .into_iter()
                .map(|(name, count)| (crate::locator::normalize_name(&name), count))
                .collect(),
        }
    }

    pub fn get(&self, normalized_name: &str) -> u64 {
        self.counts.get(normalized_name).copied().unwrap_or(0)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &u64)> {
        self.counts.iter()
    }

    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }
}

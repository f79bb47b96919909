//! Analyzer framework and the built-in analyzer registry.
//!
//! Analyzers are passive observers: they read located items, return
//! findings, and never mutate the tree or each other's output. A failing
//! analyzer downgrades only the item it failed on; the failure itself is
//! recorded as a zero-score `analyzer-error` finding.

pub mod archive;
pub mod crypto;
pub mod data;
pub mod files;
pub mod flow;
pub mod metadata;
pub mod setup;
pub mod typosquat;

use crate::config::ScanConfig;
use crate::error::Result;
use crate::guard::ResourceGuard;
use crate::pattern::PatternAnalyzer;
use crate::rules::{PopularityIndex, RuleSet};
use crate::types::{Finding, LocatedItem, PackageRef};
use tracing::{debug, warn};

/// Shared read-only state handed to every analyzer invocation.
pub struct ScanContext<'a> {
    pub config: &'a ScanConfig,
    pub rules: &'a RuleSet,
    pub popularity: Option<&'a PopularityIndex>,
    pub guard: &'a ResourceGuard,
}

pub trait Analyzer: Send + Sync {
    /// Stable identifier, recorded on every finding this analyzer emits.
    fn id(&self) -> &'static str;

    /// Whether this analyzer wants to look at the given item.
    fn accepts(&self, _item: &LocatedItem) -> bool {
        false
    }

    /// Per-item pass; called once for every accepted item.
    fn analyze_item(&self, _ctx: &ScanContext<'_>, _item: &LocatedItem) -> Result<Vec<Finding>> {
        Ok(Vec::new())
    }

    /// Whole-package pass over the complete item list, called once after
    /// unpacking. Used by analyzers that need cross-file context.
    fn analyze_package(
        &self,
        _ctx: &ScanContext<'_>,
        _package: &PackageRef,
        _items: &[LocatedItem],
    ) -> Result<Vec<Finding>> {
        Ok(Vec::new())
    }
}

/// The built-in analyzers in their fixed registration order. Findings are
/// emitted in this order per item, which keeps scan output deterministic.
pub fn builtin_analyzers(rules: &RuleSet) -> Result<Vec<Box<dyn Analyzer>>> {
    Ok(vec![
        Box::new(archive::ArchiveShapeAnalyzer),
        Box::new(files::FileAuditAnalyzer),
        Box::new(setup::SetupScriptAnalyzer),
        Box::new(data::DataBlobAnalyzer),
        Box::new(metadata::MetadataAnalyzer),
        Box::new(flow::FlowAnalyzer),
        Box::new(crypto::WeakCryptoAnalyzer),
        Box::new(PatternAnalyzer::new(rules)?),
        Box::new(typosquat::TyposquatAnalyzer),
    ])
}

/// Outcome of running the full registry over one package.
pub struct AnalysisOutcome {
    pub findings: Vec<Finding>,
    /// Some item or analyzer was skipped along the way.
    pub partial: bool,
}

/// Run every analyzer over the package: item passes in unpack-tree order,
/// then the package-level passes in registration order.
pub fn run_all(
    ctx: &ScanContext<'_>,
    analyzers: &[Box<dyn Analyzer>],
    package: &PackageRef,
    items: &[LocatedItem],
) -> AnalysisOutcome {
    let mut findings = Vec::new();
    let mut partial = false;

    'items: for item in items {
        for analyzer in analyzers {
            if !analyzer.accepts(item) {
                continue;
            }
            if ctx.guard.check_deadline().is_err() {
                warn!(package = %package.display_name(), "analysis budget spent; stopping early");
                findings.push(
                    Finding::new(
                        "engine",
                        "resource-limit-exceeded",
                        "package time budget spent before analysis finished".to_string(),
                        ctx.config.score_or_default("resource-limit-exceeded"),
                        item.rel_path.clone(),
                    ),
                );
                partial = true;
                break 'items;
            }
            match analyzer.analyze_item(ctx, item) {
                Ok(mut fs) => findings.append(&mut fs),
                Err(e) => {
                    warn!(analyzer = analyzer.id(), item = %item.rel_path, error = %e, "analyzer failed on item");
                    findings.push(Finding::new(
                        analyzer.id(),
                        "analyzer-error",
                        format!("{} failed on {}: {e}", analyzer.id(), item.rel_path),
                        ctx.config.score_or_default("analyzer-error"),
                        item.rel_path.clone(),
                    ));
                    partial = true;
                }
            }
        }
    }

    for analyzer in analyzers {
        match analyzer.analyze_package(ctx, package, items) {
            Ok(mut fs) => findings.append(&mut fs),
            Err(e) => {
                warn!(analyzer = analyzer.id(), package = %package.display_name(), error = %e, "package-level analyzer failed");
                findings.push(Finding::new(
                    analyzer.id(),
                    "analyzer-error",
                    format!("{} failed on package: {e}", analyzer.id()),
                    ctx.config.score_or_default("analyzer-error"),
                    String::new(),
                ));
                partial = true;
            }
        }
    }

    debug!(package = %package.display_name(), findings = findings.len(), "analysis pass complete");
    AnalysisOutcome { findings, partial }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ResourceLimits, ScanConfig};
    use crate::error::SiftError;
    use crate::types::ContentKind;
    use std::path::PathBuf;
    use std::thread;
    use std::time::Duration;

    struct EchoAnalyzer;

    impl Analyzer for EchoAnalyzer {
        fn id(&self) -> &'static str {
            "echo"
        }
        fn accepts(&self, _item: &LocatedItem) -> bool {
            true
        }
        fn analyze_item(&self, _ctx: &ScanContext<'_>, item: &LocatedItem) -> Result<Vec<Finding>> {
            Ok(vec![Finding::new(
                "echo",
                "echo-hit",
                format!("saw {}", item.rel_path),
                1,
                item.rel_path.clone(),
            )])
        }
    }

    /// Fails on every item and on the package pass.
    struct BrokenAnalyzer;

    impl Analyzer for BrokenAnalyzer {
        fn id(&self) -> &'static str {
            "broken"
        }
        fn accepts(&self, _item: &LocatedItem) -> bool {
            true
        }
        fn analyze_item(&self, _ctx: &ScanContext<'_>, item: &LocatedItem) -> Result<Vec<Finding>> {
            Err(SiftError::analyzer("broken", item.rel_path.clone(), "backing file vanished"))
        }
        fn analyze_package(
            &self,
            _ctx: &ScanContext<'_>,
            _package: &PackageRef,
            _items: &[LocatedItem],
        ) -> Result<Vec<Finding>> {
            Err(SiftError::analyzer("broken", "<package>", "dataset unreadable"))
        }
    }

    fn item(rel: &str) -> LocatedItem {
        LocatedItem {
            path: PathBuf::from(rel),
            rel_path: rel.to_string(),
            container_chain: vec![],
            kind: ContentKind::Data,
            size: 0,
            sha256: None,
        }
    }

    #[test]
    fn failing_analyzer_is_isolated_as_zero_score_findings() {
        let config = ScanConfig::default();
        let rules = RuleSet::default();
        let guard = ResourceGuard::new(config.limits.clone());
        let ctx = ScanContext { config: &config, rules: &rules, popularity: None, guard: &guard };
        let analyzers: Vec<Box<dyn Analyzer>> =
            vec![Box::new(BrokenAnalyzer), Box::new(EchoAnalyzer)];
        let items = vec![item("a.bin"), item("b.bin")];

        let outcome = run_all(&ctx, &analyzers, &PackageRef::local("pkg", "pkg"), &items);
        assert!(outcome.partial);

        // One error per failed item plus the package-level failure; the
        // healthy analyzer still saw every item.
        let errors: Vec<&Finding> =
            outcome.findings.iter().filter(|f| f.kind == "analyzer-error").collect();
        assert_eq!(errors.len(), 3);
        assert!(errors.iter().all(|f| f.score == 0 && f.analyzer == "broken"));
        assert_eq!(outcome.findings.iter().filter(|f| f.kind == "echo-hit").count(), 2);
    }

    #[test]
    fn spent_time_budget_stops_the_item_pass() {
        let config = ScanConfig {
            limits: ResourceLimits { package_timeout_ms: 1, ..ResourceLimits::default() },
            ..ScanConfig::default()
        };
        let rules = RuleSet::default();
        let guard = ResourceGuard::new(config.limits.clone());
        thread::sleep(Duration::from_millis(20));
        let ctx = ScanContext { config: &config, rules: &rules, popularity: None, guard: &guard };
        let analyzers: Vec<Box<dyn Analyzer>> = vec![Box::new(EchoAnalyzer)];
        let items = vec![item("a.bin"), item("b.bin")];

        let outcome = run_all(&ctx, &analyzers, &PackageRef::local("pkg", "pkg"), &items);
        assert!(outcome.partial);
        assert_eq!(outcome.findings.len(), 1);
        assert_eq!(outcome.findings[0].kind, "resource-limit-exceeded");
        assert_eq!(outcome.findings[0].analyzer, "engine");
        assert_eq!(outcome.findings[0].score, 100);
    }
}

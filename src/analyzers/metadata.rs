//! Package metadata consistency. A missing or lying PKG-INFO is weak
//! evidence on its own but compounds with everything else.

use crate::analyzers::{Analyzer, ScanContext};
use crate::error::Result;
use crate::locator::normalize_name;
use crate::types::{ContentKind, Finding, LocatedItem, PackageRef};
use std::collections::HashSet;
use std::fs;
use std::path::Path;

pub const ANALYZER_ID: &str = "metadata";

pub struct MetadataAnalyzer;

impl Analyzer for MetadataAnalyzer {
    fn id(&self) -> &'static str {
        ANALYZER_ID
    }

    fn analyze_package(
        &self,
        ctx: &ScanContext<'_>,
        package: &PackageRef,
        items: &[LocatedItem],
    ) -> Result<Vec<Finding>> {
        let core: Vec<&LocatedItem> = items
            .iter()
            .filter(|i| i.kind == ContentKind::Metadata && is_core_metadata(&i.rel_path))
            .collect();

        if core.is_empty() {
            let kind = "metadata-missing";
            return Ok(vec![Finding::new(
                ANALYZER_ID,
                kind,
                format!("{} ships no PKG-INFO or METADATA", package.display_name()),
                ctx.config.score_or_default(kind),
                String::new(),
            )]);
        }

        let expected = normalize_name(&package.name);
        let mut findings = Vec::new();
        let mut reported: HashSet<String> = HashSet::new();
        for item in core {
            let text = fs::read_to_string(&item.path).unwrap_or_default();
            match declared_name(&text) {
                Some(declared) => {
                    let normalized = normalize_name(&declared);
                    if normalized != expected && reported.insert(normalized) {
                        let kind = "metadata-name-mismatch";
                        findings.push(Finding::new(
                            ANALYZER_ID,
                            kind,
                            format!(
                                "metadata declares name '{declared}' but the package is '{}'",
                                package.name
                            ),
                            ctx.config.score_or_default(kind),
                            item.rel_path.clone(),
                        ));
                    }
                }
                None => {
                    let kind = "metadata-malformed";
                    findings.push(Finding::new(
                        ANALYZER_ID,
                        kind,
                        format!("{} carries no parseable Name field", item.rel_path),
                        ctx.config.score_or_default(kind),
                        item.rel_path.clone(),
                    ));
                }
            }
        }
        Ok(findings)
    }
}

fn is_core_metadata(rel_path: &str) -> bool {
    Path::new(rel_path)
        .file_name()
        .is_some_and(|n| n == "PKG-INFO" || n == "METADATA")
}

/// First `Name:` header of an RFC 822 style metadata file.
fn declared_name(text: &str) -> Option<String> {
    for line in text.lines() {
        // Headers end at the first blank line; the body may quote anything.
        if line.trim().is_empty() {
            break;
        }
        if let Some(value) = line.strip_prefix("Name:") {
            let value = value.trim();
            if value.is_empty() {
                return None;
            }
            return Some(value.to_string());
        }
    }
    None
}

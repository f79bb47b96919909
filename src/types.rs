use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Where a package reference points to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    /// A package on a remote index, identified by name and optional version.
    RemoteIndex,
    /// A package inside a pre-scanned local mirror snapshot.
    Mirror,
    /// A plain filesystem path (file or directory).
    LocalPath,
}

/// Logical reference to a package to be scanned. Immutable once resolved.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackageRef {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    pub origin: Origin,
    /// Physical location, filled in by the artifact locator.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_path: Option<PathBuf>,
}

impl PackageRef {
    pub fn local<P: Into<PathBuf>>(name: &str, path: P) -> Self {
        Self {
            name: name.to_string(),
            version: None,
            origin: Origin::LocalPath,
            resolved_path: Some(path.into()),
        }
    }

    pub fn remote(name: &str, version: Option<&str>) -> Self {
        Self {
            name: name.to_string(),
            version: version.map(str::to_string),
            origin: Origin::RemoteIndex,
            resolved_path: None,
        }
    }

    pub fn mirror(name: &str) -> Self {
        Self { name: name.to_string(), version: None, origin: Origin::Mirror, resolved_path: None }
    }

    /// "name" or "name-version" for logs and finding signatures.
    pub fn display_name(&self) -> String {
        match &self.version {
            Some(v) => format!("{}-{}", self.name, v),
            None => self.name.clone(),
        }
    }
}

/// Content classification of a located item, determined by content
/// signature, never by filename alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentKind {
    /// zip/tar/gzip container (wheel and sdist included)
    Archive,
    /// Python source
    PythonSource,
    /// Compiled Python bytecode (.pyc magic)
    Bytecode,
    /// Packaging metadata (PKG-INFO, METADATA, setup.cfg, ...)
    Metadata,
    /// Anything else with content
    Data,
    /// Directory node
    Directory,
}

/// One file or directory discovered while unpacking a package, with its
/// provenance chain. Created by the unpacker and never mutated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocatedItem {
    /// Absolute path on disk (inside the extraction root, or the original
    /// location for plain-path packages).
    pub path: PathBuf,
    /// Path relative to the package root, using the container entry name.
    pub rel_path: String,
    /// Chain of containers this item was found in, outermost first.
    /// Its length is the nesting depth and never exceeds the configured
    /// maximum unpack depth.
    pub container_chain: Vec<String>,
    pub kind: ContentKind,
    pub size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
}

impl LocatedItem {
    pub fn depth(&self) -> usize {
        self.container_chain.len()
    }
}

/// Severity class of a finding, derived from its score contribution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn from_score(score: u32) -> Self {
        match score {
            0 => Severity::Info,
            1..=24 => Severity::Low,
            25..=49 => Severity::Medium,
            50..=99 => Severity::High,
            _ => Severity::Critical,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One analyzer's detection. Append-only; scores are always non-negative
/// (the score type enforces it).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Finding {
    /// Analyzer that produced this finding.
    pub analyzer: String,
    /// Finding-kind tag, also the key into the weight table
    /// (e.g. "suspicious-archive-entry-parent-reference").
    pub kind: String,
    pub message: String,
    /// Score contribution under the active weight table.
    pub score: u32,
    pub severity: Severity,
    /// Item path this finding is about, relative to the package root.
    pub location: String,
    /// 1-based source line, for source-level findings.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<usize>,
    /// Heuristic confidence in [0, 1].
    pub confidence: f32,
}

impl Finding {
    pub fn new(analyzer: &str, kind: &str, message: String, score: u32, location: String) -> Self {
        Self {
            analyzer: analyzer.to_string(),
            kind: kind.to_string(),
            message,
            score,
            severity: Severity::from_score(score),
            location,
            line: None,
            confidence: 1.0,
        }
    }

    #[must_use]
    pub fn with_line(mut self, line: usize) -> Self {
        self.line = Some(line);
        self
    }

    #[must_use]
    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = confidence.clamp(0.0, 1.0);
        self
    }
}

/// Terminal status of one package scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanStatus {
    /// Every analyzer ran on every item.
    Completed,
    /// The package was scored, but some subtree or analyzer was skipped
    /// (unpack errors, resource limits, analyzer failures).
    PartiallyFailed,
    /// The package could not be analyzed at all.
    Failed,
}

/// Resource accounting for one package run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResourceUsage {
    pub elapsed_ms: u64,
    pub decompressed_bytes: u64,
    pub items_examined: usize,
}

/// One package's complete scan output. Produced exactly once per package
/// per run, whatever happened along the way.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanResult {
    pub reference: PackageRef,
    pub status: ScanStatus,
    pub score: u32,
    pub findings: Vec<Finding>,
    pub usage: ResourceUsage,
    pub scanned_at: DateTime<Utc>,
    /// Set when status is `Failed`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ScanResult {
    pub fn failed(reference: PackageRef, error: String) -> Self {
        Self {
            reference,
            status: ScanStatus::Failed,
            score: 0,
            findings: Vec::new(),
            usage: ResourceUsage::default(),
            scanned_at: Utc::now(),
            error: Some(error),
        }
    }

    pub fn has_findings(&self) -> bool {
        !self.findings.is_empty()
    }

    pub fn max_severity(&self) -> Option<Severity> {
        self.findings.iter().map(|f| f.severity).max()
    }
}

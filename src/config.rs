use crate::error::{Result, SiftError};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

/// Default ceilings; chosen to keep a single hostile package from taking
/// the whole batch down.
pub const MAX_UNPACK_DEPTH: usize = 3;
pub const MAX_FILE_SIZE: u64 = 100 * 1024 * 1024; // 100MB
pub const MAX_DECOMPRESSED_SIZE: u64 = 1024 * 1024 * 1024; // 1GB
pub const DEFAULT_PACKAGE_TIMEOUT: Duration = Duration::from_secs(120);

/// Resource ceilings applied by one package's resource guard.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ResourceLimits {
    /// Maximum size of any single decompressed file.
    pub max_file_size: u64,
    /// Maximum cumulative decompressed size per package.
    pub max_decompressed_size: u64,
    /// Maximum nesting depth when descending into nested archives.
    pub max_unpack_depth: usize,
    /// Per-package wall-clock budget in milliseconds.
    pub package_timeout_ms: u64,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            max_file_size: MAX_FILE_SIZE,
            max_decompressed_size: MAX_DECOMPRESSED_SIZE,
            max_unpack_depth: MAX_UNPACK_DEPTH,
            package_timeout_ms: DEFAULT_PACKAGE_TIMEOUT.as_millis() as u64,
        }
    }
}

impl ResourceLimits {
    pub fn validate(&self) -> Result<()> {
        if self.max_file_size == 0 {
            return Err(SiftError::config("max_file_size must be greater than 0"));
        }
        if self.max_decompressed_size == 0 {
            return Err(SiftError::config("max_decompressed_size must be greater than 0"));
        }
        if self.max_unpack_depth == 0 {
            return Err(SiftError::config("max_unpack_depth must be greater than 0"));
        }
        if self.package_timeout_ms == 0 {
            return Err(SiftError::config("package_timeout_ms must be greater than 0"));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.package_timeout_ms)
    }
}

/// How a sensitive-file hit affects the package total. The exact policy is
/// deliberately configurable; `Additive` keeps the plain sum of finding
/// scores, `Flat` raises the total to at least the given floor and records
/// the override as its own finding so the sum invariant still holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(tag = "policy", content = "floor", rename_all = "snake_case")]
pub enum SensitiveFilePolicy {
    Additive,
    Flat(u32),
}

impl Default for SensitiveFilePolicy {
    fn default() -> Self {
        SensitiveFilePolicy::Additive
    }
}

/// Parser strategies for Python source, tried in configured order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParserStrategy {
    /// Reject trees whose ERROR-node ratio is above the tolerance.
    Strict,
    /// Accept partial trees; partial findings are better than none.
    Lenient,
}

/// Operation tables driving the source flow analyzer's taint simulation.
/// These are heuristics, not a sound analysis: missing entries mean missed
/// findings, never crashes.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FlowConfig {
    /// Calls whose result counts as decoded/deobfuscated data.
    pub decode_calls: Vec<String>,
    /// Calls/expressions that read environment or credential-shaped data.
    pub env_calls: Vec<String>,
    /// Dynamic code evaluation sinks.
    pub exec_sinks: Vec<String>,
    /// Dynamic import sinks.
    pub import_sinks: Vec<String>,
    /// Process spawn sinks.
    pub spawn_sinks: Vec<String>,
    /// Network send sinks (credential-exfiltration shape when an
    /// environment read happened in the same scope).
    pub net_sinks: Vec<String>,
    /// Parser preference order.
    pub parsers: Vec<ParserStrategy>,
    /// Fraction of ERROR nodes above which the strict parser gives up.
    pub strict_error_tolerance: f32,
    /// Ceiling on simulated-walk depth; deeper expressions are reported,
    /// not followed.
    pub max_walk_depth: usize,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            decode_calls: [
                "base64.b64decode",
                "base64.b32decode",
                "base64.b16decode",
                "base64.b85decode",
                "base64.decodebytes",
                "binascii.unhexlify",
                "binascii.a2b_base64",
                "bytes.fromhex",
                "codecs.decode",
                "zlib.decompress",
                "bz2.decompress",
                "lzma.decompress",
                "marshal.loads",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            env_calls: ["os.getenv", "os.environ.get", "os.environ", "getpass.getpass"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            exec_sinks: ["eval", "exec", "compile"].iter().map(|s| s.to_string()).collect(),
            import_sinks: ["__import__", "importlib.import_module"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            spawn_sinks: [
                "os.system",
                "os.popen",
                "subprocess.run",
                "subprocess.call",
                "subprocess.Popen",
                "subprocess.check_output",
                "subprocess.check_call",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            net_sinks: [
                "requests.get",
                "requests.post",
                "requests.put",
                "urllib.request.urlopen",
                "urllib.request.Request",
                "http.client.HTTPConnection",
                "http.client.HTTPSConnection",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            parsers: vec![ParserStrategy::Strict, ParserStrategy::Lenient],
            strict_error_tolerance: 0.05,
            max_walk_depth: 500,
        }
    }
}

/// Engine configuration, normally supplied by an external loader
/// (deserializable from JSON); everything has working defaults.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    pub limits: ResourceLimits,
    /// Findings below this score are dropped at the presentation boundary,
    /// never inside the engine.
    pub min_report_score: u32,
    /// Per-finding-kind score table; kinds not listed fall back to the
    /// built-in defaults via `score_or_default`.
    pub score_weights: HashMap<String, u32>,
    pub sensitive_file_policy: SensitiveFilePolicy,
    /// Scan packages in parallel across worker threads.
    pub parallel: bool,
    pub flow: FlowConfig,
    /// Semantic rule file (JSON), loaded once at process start.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub semantic_rules_path: Option<PathBuf>,
    /// Byte-pattern rule files in the external matcher's native syntax,
    /// passed through opaquely.
    pub byte_rules_paths: Vec<PathBuf>,
    /// name -> download-count dataset for the typosquatting checker;
    /// absence skips that analyzer.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub popularity_dataset_path: Option<PathBuf>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            limits: ResourceLimits::default(),
            min_report_score: 10,
            score_weights: HashMap::new(),
            sensitive_file_policy: SensitiveFilePolicy::default(),
            parallel: true,
            flow: FlowConfig::default(),
            semantic_rules_path: None,
            byte_rules_paths: Vec::new(),
            popularity_dataset_path: None,
        }
    }
}

/// Built-in weight defaults, used when the configured table has no entry
/// for a kind. Kinds scoring 0 are informational only.
fn default_weight(kind: &str) -> u32 {
    match kind {
        "corrupted-archive" => 10,
        "suspicious-archive-entry-absolute-path" => 50,
        "suspicious-archive-entry-parent-reference" => 50,
        "suspicious-archive-entry-link" => 50,
        "archive-file-size-exceeded" => 100,
        "resource-limit-exceeded" => 100,
        "unpacked-depth-exceeded" => 10,
        "double-compressed-archive" => 20,
        "mismatched-archive-extension" => 20,
        "bytecode-in-source-dist" => 40,
        "unexpected-binary" => 30,
        "contain-sensitive-file" => 100,
        "sensitive-file-override" => 0,
        "weak-crypto-key" => 100,
        "crypto-key-generation" => 0,
        "setup-script-network" => 60,
        "setup-script-exec" => 80,
        "embedded-high-entropy-payload" => 30,
        "embedded-large-blob" => 15,
        "metadata-missing" => 10,
        "metadata-name-mismatch" => 25,
        "metadata-malformed" => 10,
        "dynamic-execution-of-decoded-value" => 100,
        "dynamic-import-of-tainted-value" => 60,
        "process-spawn-with-tainted-value" => 80,
        "credential-exfiltration" => 100,
        "typosquatting" => 80,
        "parse-error" => 0,
        "analyzer-error" => 0,
        "ast-depth-exceeded" => 10,
        _ => 0,
    }
}

impl ScanConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Weight for a finding kind: configured table first, then the
    /// built-in default for that kind. Never panics on unknown kinds.
    pub fn score_or_default(&self, kind: &str) -> u32 {
        self.score_weights.get(kind).copied().unwrap_or_else(|| default_weight(kind))
    }

    pub fn validate(&self) -> Result<()> {
        self.limits.validate()?;
        if self.flow.parsers.is_empty() {
            return Err(SiftError::config("flow.parsers must list at least one parser strategy"));
        }
        if !(0.0..=1.0).contains(&self.flow.strict_error_tolerance) {
            return Err(SiftError::config("flow.strict_error_tolerance must be within [0, 1]"));
        }
        if self.flow.max_walk_depth == 0 {
            return Err(SiftError::config("flow.max_walk_depth must be greater than 0"));
        }
        Ok(())
    }

    /// Stricter ceilings for scanning untrusted mirrors wholesale.
    #[must_use]
    pub fn high_security() -> Self {
        Self {
            limits: ResourceLimits {
                max_file_size: 10 * 1024 * 1024,
                max_decompressed_size: 100 * 1024 * 1024,
                max_unpack_depth: 2,
                package_timeout_ms: 30_000,
            },
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(ScanConfig::default().validate().is_ok());
        assert!(ScanConfig::high_security().validate().is_ok());
    }

    #[test]
    fn zero_limits_are_rejected() {
        let cfg = ScanConfig {
            limits: ResourceLimits { max_unpack_depth: 0, ..ResourceLimits::default() },
            ..ScanConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn configured_weights_override_defaults() {
        let mut cfg = ScanConfig::default();
        assert_eq!(cfg.score_or_default("contain-sensitive-file"), 100);
        cfg.score_weights.insert("contain-sensitive-file".to_string(), 42);
        assert_eq!(cfg.score_or_default("contain-sensitive-file"), 42);
        // Unknown kinds never panic.
        assert_eq!(cfg.score_or_default("no-such-kind"), 0);
    }

    #[test]
    fn config_deserializes_from_partial_json() {
        let cfg: ScanConfig =
            serde_json::from_str(r#"{"min_report_score": 5, "parallel": false}"#).unwrap();
        assert_eq!(cfg.min_report_score, 5);
        assert!(!cfg.parallel);
        assert_eq!(cfg.limits.max_unpack_depth, MAX_UNPACK_DEPTH);
    }
}

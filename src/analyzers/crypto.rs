//! Cryptographic key generation audit. Flags RSA/DSA key generation with
//! key sizes below the accepted minimum; generation at a safe size is
//! recorded as an informational finding.

use crate::analyzers::{Analyzer, ScanContext};
use crate::error::Result;
use crate::pattern::collect_calls;
use crate::types::{ContentKind, Finding, LocatedItem};
use std::fs;
use tree_sitter::Node;

pub const ANALYZER_ID: &str = "crypto";

/// Smallest RSA/DSA modulus considered safe.
const MIN_KEY_SIZE: u64 = 2048;

/// Keyword argument carrying the key size in `cryptography`.
const KEY_SIZE_KW: &str = "key_size";
/// Keyword argument carrying the key size in `pycrypto`/`pycryptodome`.
const BITS_KW: &str = "bits";

/// Fully qualified key generation functions, by library.
const GEN_CALLS: &[(&str, &str)] = &[
    ("cryptography.hazmat.primitives.asymmetric.dsa.generate_private_key", "dsa"),
    ("cryptography.hazmat.primitives.asymmetric.dsa.generate_parameters", "dsa"),
    ("cryptography.hazmat.primitives.asymmetric.rsa.generate_private_key", "rsa"),
    ("cryptography.hazmat.primitives.asymmetric.rsa.generate_parameters", "rsa"),
    ("Crypto.PublicKey.DSA.generate", "dsa"),
    ("Crypto.PublicKey.RSA.generate", "rsa"),
    ("Cryptodome.PublicKey.DSA.generate", "dsa"),
    ("Cryptodome.PublicKey.RSA.generate", "rsa"),
];

/// A callee matches a generation function when it equals the full dotted
/// name or is a dotted suffix of it. Bare names never match, so a local
/// `generate(...)` stays quiet.
fn key_type_for(callee: &str) -> Option<&'static str> {
    if !callee.contains('.') {
        return None;
    }
    for (full, key_type) in GEN_CALLS {
        if *full == callee || full.ends_with(&format!(".{callee}")) {
            return Some(key_type);
        }
    }
    None
}

/// Key size from the call's arguments: the first positional integer
/// literal, or a `key_size=`/`bits=` keyword. Non-literal sizes are
/// unknown, not weak.
fn key_size_argument(call: Node<'_>, source: &[u8]) -> Option<u64> {
    let args = call.child_by_field_name("arguments")?;
    let mut cursor = args.walk();
    for child in args.named_children(&mut cursor) {
        match child.kind() {
            "integer" => {
                return child.utf8_text(source).ok().and_then(|t| t.parse().ok());
            }
            "keyword_argument" => {
                let name = child
                    .child_by_field_name("name")
                    .and_then(|n| n.utf8_text(source).ok())
                    .unwrap_or("");
                if name == KEY_SIZE_KW || name == BITS_KW {
                    let value = child.child_by_field_name("value")?;
                    if value.kind() == "integer" {
                        return value.utf8_text(source).ok().and_then(|t| t.parse().ok());
                    }
                    return None;
                }
            }
            _ => {}
        }
    }
    None
}

pub struct WeakCryptoAnalyzer;

impl Analyzer for WeakCryptoAnalyzer {
    fn id(&self) -> &'static str {
        ANALYZER_ID
    }

    fn accepts(&self, item: &LocatedItem) -> bool {
        item.kind == ContentKind::PythonSource
    }

    fn analyze_item(&self, ctx: &ScanContext<'_>, item: &LocatedItem) -> Result<Vec<Finding>> {
        let bytes = fs::read(&item.path)?;
        let source = String::from_utf8_lossy(&bytes);
        let Ok(parsed) = crate::analyzers::flow::parse::parse_python(&ctx.config.flow, &source)
        else {
            // The flow analyzer reports unparseable sources.
            return Ok(Vec::new());
        };

        let mut findings = Vec::new();
        for call in collect_calls(parsed.tree.root_node()) {
            let Some(callee) = call.child_by_field_name("function") else { continue };
            let name = callee.utf8_text(source.as_bytes()).unwrap_or("");
            let Some(key_type) = key_type_for(name) else { continue };

            let line = call.start_position().row + 1;
            let size = key_size_argument(call, source.as_bytes());
            let finding = match size {
                Some(size) if size < MIN_KEY_SIZE => {
                    let kind = "weak-crypto-key";
                    Finding::new(
                        ANALYZER_ID,
                        kind,
                        format!(
                            "{name} generates a {size}-bit {} key; minimum accepted is {MIN_KEY_SIZE}",
                            key_type
                        ),
                        ctx.config.score_or_default(kind),
                        item.rel_path.clone(),
                    )
                }
                _ => {
                    let kind = "crypto-key-generation";
                    let size_text =
                        size.map_or_else(|| "unknown size".to_string(), |s| format!("{s} bits"));
                    Finding::new(
                        ANALYZER_ID,
                        kind,
                        format!("{name} generates a {} key ({size_text})", key_type),
                        ctx.config.score_or_default(kind),
                        item.rel_path.clone(),
                    )
                }
            };
            findings.push(finding.with_line(line));
        }
        Ok(findings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ScanConfig;
    use crate::guard::ResourceGuard;
    use crate::rules::RuleSet;

    fn source_item(dir: &tempfile::TempDir, source: &str) -> LocatedItem {
        let path = dir.path().join("keys.py");
        std::fs::write(&path, source).unwrap();
        LocatedItem {
            path,
            rel_path: "pkg-1.0/keys.py".to_string(),
            container_chain: vec!["pkg-1.0.tar.gz".to_string()],
            kind: ContentKind::PythonSource,
            size: source.len() as u64,
            sha256: None,
        }
    }

    fn run(dir: &tempfile::TempDir, source: &str) -> Vec<Finding> {
        let config = ScanConfig::default();
        let rules = RuleSet::default();
        let guard = ResourceGuard::new(config.limits.clone());
        let ctx = ScanContext { config: &config, rules: &rules, popularity: None, guard: &guard };
        WeakCryptoAnalyzer.analyze_item(&ctx, &source_item(dir, source)).unwrap()
    }

    #[test]
    fn short_rsa_key_via_keyword_is_weak() {
        let dir = tempfile::tempdir().unwrap();
        let findings = run(
            &dir,
            "from cryptography.hazmat.primitives.asymmetric import rsa\n\
             key = rsa.generate_private_key(public_exponent=65537, key_size=1024)\n",
        );
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].kind, "weak-crypto-key");
        assert_eq!(findings[0].score, 100);
        assert_eq!(findings[0].line, Some(2));
        assert!(findings[0].message.contains("1024-bit rsa"));
    }

    #[test]
    fn short_key_via_positional_bits_is_weak() {
        let dir = tempfile::tempdir().unwrap();
        let findings = run(&dir, "from Crypto.PublicKey import RSA\nk = RSA.generate(1024)\n");
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].kind, "weak-crypto-key");
    }

    #[test]
    fn safe_key_size_is_informational_only() {
        let dir = tempfile::tempdir().unwrap();
        let findings = run(
            &dir,
            "from cryptography.hazmat.primitives.asymmetric import dsa\n\
             dsa.generate_private_key(key_size=2048)\n",
        );
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].kind, "crypto-key-generation");
        assert_eq!(findings[0].score, 0);
    }

    #[test]
    fn non_literal_size_is_not_weak() {
        let dir = tempfile::tempdir().unwrap();
        let findings =
            run(&dir, "from Crypto.PublicKey import DSA\nDSA.generate(bits=size_from_config())\n");
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].kind, "crypto-key-generation");
        assert!(findings[0].message.contains("unknown size"));
    }

    #[test]
    fn unrelated_generate_calls_stay_quiet() {
        let dir = tempfile::tempdir().unwrap();
        assert!(run(&dir, "generate(1024)\nreport.generate(1024)\n").is_empty());
    }
}

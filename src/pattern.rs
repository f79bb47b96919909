//! Declarative pattern matching: byte-level rules through an external
//! matching engine, and semantic call-shape rules over parsed Python.
//!
//! The engine is isolated behind the narrow [`ByteMatcher`] trait; the rest
//! of the crate never sees its types. Rule sources are compiled once per
//! process and shared read-only.

use crate::analyzers::flow::parse;
use crate::analyzers::{Analyzer, ScanContext};
use crate::error::{Result, SiftError};
use crate::rules::{ByteRuleSource, RuleSet, SemanticRule};
use crate::types::{ContentKind, Finding, LocatedItem};
use std::collections::HashSet;
use std::fs;
use tracing::debug;
use tree_sitter::Node;

pub const ANALYZER_ID: &str = "pattern";

/// Score for a byte-rule hit whose rule id has no entry in the weight
/// table.
const DEFAULT_BYTE_RULE_SCORE: u32 = 50;

/// One byte-rule hit: which rule, and every offset it matched at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ByteMatch {
    pub rule_id: String,
    pub offsets: Vec<usize>,
}

/// Narrow seam over the byte-pattern engine.
pub trait ByteMatcher: Send + Sync {
    fn match_bytes(&self, data: &[u8]) -> Result<Vec<ByteMatch>>;
}

/// yara-x backed implementation. Compilation failures are fatal at
/// process start, like every other rule-load problem.
pub struct YaraMatcher {
    rules: yara_x::Rules,
}

impl std::fmt::Debug for YaraMatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("YaraMatcher").finish_non_exhaustive()
    }
}

impl YaraMatcher {
    pub fn from_sources(sources: &[ByteRuleSource]) -> Result<Option<Self>> {
        if sources.is_empty() {
            return Ok(None);
        }
        let mut compiler = yara_x::Compiler::new();
        for src in sources {
            compiler.new_namespace(&src.name);
            compiler.add_source(src.source.as_str()).map_err(|e| {
                SiftError::rule_load(format!("byte rule file '{}' does not compile: {e}", src.name))
            })?;
        }
        let rules = compiler.build();
        debug!(files = sources.len(), "compiled byte-pattern rules");
        Ok(Some(Self { rules }))
    }
}

impl ByteMatcher for YaraMatcher {
    fn match_bytes(&self, data: &[u8]) -> Result<Vec<ByteMatch>> {
        let mut scanner = yara_x::Scanner::new(&self.rules);
        let results = scanner
            .scan(data)
            .map_err(|e| SiftError::analyzer(ANALYZER_ID, "<bytes>", e.to_string()))?;

        // One hit per matching rule, carrying every matched offset.
        let mut matches = Vec::new();
        for rule in results.matching_rules() {
            let mut offsets: Vec<usize> = rule
                .patterns()
                .flat_map(|p| p.matches().map(|m| m.range().start))
                .collect();
            offsets.sort_unstable();
            offsets.dedup();
            matches.push(ByteMatch { rule_id: rule.identifier().to_string(), offsets });
        }
        Ok(matches)
    }
}

/// Runs the compiled byte rules over every file and the semantic
/// call-shape rules over Python sources.
pub struct PatternAnalyzer {
    matcher: Option<YaraMatcher>,
    semantic: Vec<SemanticRule>,
}

impl PatternAnalyzer {
    pub fn new(rules: &RuleSet) -> Result<Self> {
        Ok(Self {
            matcher: YaraMatcher::from_sources(&rules.byte_sources)?,
            semantic: rules.semantic.clone(),
        })
    }

    fn byte_findings(&self, ctx: &ScanContext<'_>, item: &LocatedItem) -> Result<Vec<Finding>> {
        let Some(matcher) = &self.matcher else { return Ok(Vec::new()) };
        let data = fs::read(&item.path)?;
        let mut findings = Vec::new();
        for m in matcher.match_bytes(&data)? {
            let score = ctx
                .config
                .score_weights
                .get(&m.rule_id)
                .copied()
                .unwrap_or(DEFAULT_BYTE_RULE_SCORE);
            findings.push(Finding::new(
                ANALYZER_ID,
                &m.rule_id,
                byte_match_message(&m),
                score,
                item.rel_path.clone(),
            ));
        }
        Ok(findings)
    }

    fn semantic_findings(&self, ctx: &ScanContext<'_>, item: &LocatedItem) -> Result<Vec<Finding>> {
        if self.semantic.is_empty() {
            return Ok(Vec::new());
        }
        let bytes = fs::read(&item.path)?;
        let source = String::from_utf8_lossy(&bytes);
        // Hopeless sources are already reported by the flow analyzer.
        let Ok(parsed) = parse::parse_python(&ctx.config.flow, &source) else {
            return Ok(Vec::new());
        };

        let mut findings = Vec::new();
        let mut seen: HashSet<(String, usize)> = HashSet::new();
        for call in collect_calls(parsed.tree.root_node()) {
            let Some(callee) = call.child_by_field_name("function") else { continue };
            let callee_text = callee.utf8_text(source.as_bytes()).unwrap_or("");
            let args_text = call
                .child_by_field_name("arguments")
                .and_then(|a| a.utf8_text(source.as_bytes()).ok())
                .unwrap_or("");

            for rule in &self.semantic {
                if !call_matches(&rule.call, callee_text) {
                    continue;
                }
                if let Some(needle) = &rule.argument_contains {
                    if !args_text.contains(needle.as_str()) {
                        continue;
                    }
                }
                let line = call.start_position().row + 1;
                if !seen.insert((rule.id.clone(), line)) {
                    continue;
                }
                let message = match &rule.description {
                    Some(d) => format!("{d} ({} at line {line})", rule.call),
                    None => format!("call to {} at line {line}", rule.call),
                };
                findings.push(
                    Finding::new(ANALYZER_ID, &rule.id, message, rule.score, item.rel_path.clone())
                        .with_line(line),
                );
            }
        }
        Ok(findings)
    }
}

impl Analyzer for PatternAnalyzer {
    fn id(&self) -> &'static str {
        ANALYZER_ID
    }

    fn accepts(&self, item: &LocatedItem) -> bool {
        item.kind != ContentKind::Directory
            && (self.matcher.is_some()
                || (!self.semantic.is_empty() && item.kind == ContentKind::PythonSource))
    }

    fn analyze_item(&self, ctx: &ScanContext<'_>, item: &LocatedItem) -> Result<Vec<Finding>> {
        let mut findings = self.byte_findings(ctx, item)?;
        if item.kind == ContentKind::PythonSource {
            findings.append(&mut self.semantic_findings(ctx, item)?);
        }
        Ok(findings)
    }
}

/// Maximum offsets spelled out in a byte-rule message.
const MAX_LISTED_OFFSETS: usize = 8;

fn byte_match_message(m: &ByteMatch) -> String {
    match m.offsets.as_slice() {
        [] => format!("byte rule '{}' matched", m.rule_id),
        [offset] => format!("byte rule '{}' matched at offset {offset}", m.rule_id),
        offsets => {
            let listed: Vec<String> =
                offsets.iter().take(MAX_LISTED_OFFSETS).map(|o| o.to_string()).collect();
            let tail = if offsets.len() > MAX_LISTED_OFFSETS { ", ..." } else { "" };
            format!(
                "byte rule '{}' matched {} times (offsets {}{tail})",
                m.rule_id,
                offsets.len(),
                listed.join(", ")
            )
        }
    }
}

/// A rule call pattern matches on the full dotted name, or, for bare
/// patterns, on the callee's last segment.
fn call_matches(pattern: &str, callee: &str) -> bool {
    if pattern == callee {
        return true;
    }
    !pattern.contains('.') && callee.rsplit('.').next() == Some(pattern)
}

pub(crate) fn collect_calls(root: Node<'_>) -> Vec<Node<'_>> {
    let mut calls = Vec::new();
    let mut cursor = root.walk();
    let mut advanced = true;
    while advanced {
        if cursor.node().kind() == "call" {
            calls.push(cursor.node());
        }
        if cursor.goto_first_child() {
            continue;
        }
        loop {
            if cursor.goto_next_sibling() {
                break;
            }
            if !cursor.goto_parent() {
                advanced = false;
                break;
            }
        }
    }
    calls
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ScanConfig;
    use crate::guard::ResourceGuard;
    use std::io::Write;

    fn write_item(dir: &tempfile::TempDir, name: &str, body: &[u8], kind: ContentKind) -> LocatedItem {
        let path = dir.path().join(name);
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(body).unwrap();
        LocatedItem {
            path,
            rel_path: name.to_string(),
            container_chain: vec![],
            kind,
            size: body.len() as u64,
            sha256: None,
        }
    }

    #[test]
    fn call_pattern_matching_rules() {
        assert!(call_matches("eval", "eval"));
        assert!(call_matches("eval", "builtins.eval"));
        assert!(call_matches("base64.b64decode", "base64.b64decode"));
        assert!(!call_matches("base64.b64decode", "b64decode"));
        assert!(!call_matches("eval", "evaluate"));
    }

    #[test]
    fn semantic_rule_flags_matching_call_shape() {
        let dir = tempfile::tempdir().unwrap();
        let config = ScanConfig::default();
        let guard = ResourceGuard::new(config.limits.clone());
        let mut rules = RuleSet::default();
        rules.semantic.push(SemanticRule {
            id: "eval-with-base64".to_string(),
            description: Some("eval over a base64 literal".to_string()),
            score: 80,
            call: "eval".to_string(),
            argument_contains: Some("base64".to_string()),
        });
        let analyzer = PatternAnalyzer::new(&rules).unwrap();
        let ctx = ScanContext { config: &config, rules: &rules, popularity: None, guard: &guard };

        let item = write_item(
            &dir,
            "mod.py",
            b"eval(base64.b64decode(blob))\neval('1 + 1')\n",
            ContentKind::PythonSource,
        );
        let findings = analyzer.analyze_item(&ctx, &item).unwrap();
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].kind, "eval-with-base64");
        assert_eq!(findings[0].score, 80);
        assert_eq!(findings[0].line, Some(1));
    }

    #[test]
    fn byte_rule_matches_report_rule_id_and_offset() {
        let dir = tempfile::tempdir().unwrap();
        let config = ScanConfig::default();
        let guard = ResourceGuard::new(config.limits.clone());
        let mut rules = RuleSet::default();
        rules.byte_sources.push(ByteRuleSource {
            name: "test".to_string(),
            source: r#"
rule marker_string {
    strings:
        $a = "EVIL_MARKER"
    condition:
        $a
}
"#
            .to_string(),
        });
        let analyzer = PatternAnalyzer::new(&rules).unwrap();
        let ctx = ScanContext { config: &config, rules: &rules, popularity: None, guard: &guard };

        let item = write_item(&dir, "blob.bin", b"xxxxEVIL_MARKERyyyy", ContentKind::Data);
        let findings = analyzer.analyze_item(&ctx, &item).unwrap();
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].kind, "marker_string");
        assert_eq!(findings[0].score, DEFAULT_BYTE_RULE_SCORE);
        assert!(findings[0].message.contains("offset 4"));
    }

    #[test]
    fn repeated_byte_rule_matches_list_every_offset() {
        let dir = tempfile::tempdir().unwrap();
        let config = ScanConfig::default();
        let guard = ResourceGuard::new(config.limits.clone());
        let mut rules = RuleSet::default();
        rules.byte_sources.push(ByteRuleSource {
            name: "test".to_string(),
            source: r#"
rule marker_string {
    strings:
        $a = "EVIL_MARKER"
    condition:
        $a
}
"#
            .to_string(),
        });
        let analyzer = PatternAnalyzer::new(&rules).unwrap();
        let ctx = ScanContext { config: &config, rules: &rules, popularity: None, guard: &guard };

        let item = write_item(&dir, "blob.bin", b"..EVIL_MARKER....EVIL_MARKER..", ContentKind::Data);
        let findings = analyzer.analyze_item(&ctx, &item).unwrap();
        // Still one finding per rule, but the message carries the full extent.
        assert_eq!(findings.len(), 1);
        assert!(findings[0].message.contains("matched 2 times"));
        assert!(findings[0].message.contains("offsets 2, 17"));
    }

    #[test]
    fn uncompilable_byte_rules_are_fatal() {
        let sources =
            vec![ByteRuleSource { name: "bad".to_string(), source: "rule {{{".to_string() }];
        let err = YaraMatcher::from_sources(&sources).unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn no_rules_means_nothing_accepted() {
        let rules = RuleSet::default();
        let analyzer = PatternAnalyzer::new(&rules).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let item = write_item(&dir, "a.py", b"print(1)\n", ContentKind::PythonSource);
        assert!(!analyzer.accepts(&item));
    }
}

//! Source flow analyzer: parses Python sources and runs the simulated
//! taint walk, turning sink hits into findings.

pub mod parse;
pub mod taint;

use crate::analyzers::{Analyzer, ScanContext};
use crate::error::Result;
use crate::types::{ContentKind, Finding, LocatedItem};
use std::fs;
use taint::{SinkHit, SinkKind, TaintKind};
use tracing::debug;

pub const ANALYZER_ID: &str = "flow";

pub struct FlowAnalyzer;

impl Analyzer for FlowAnalyzer {
    fn id(&self) -> &'static str {
        ANALYZER_ID
    }

    fn accepts(&self, item: &LocatedItem) -> bool {
        item.kind == ContentKind::PythonSource
    }

    fn analyze_item(&self, ctx: &ScanContext<'_>, item: &LocatedItem) -> Result<Vec<Finding>> {
        let bytes = fs::read(&item.path)?;
        let source = String::from_utf8_lossy(&bytes);

        let parsed = match parse::parse_python(&ctx.config.flow, &source) {
            Ok(parsed) => parsed,
            Err(reason) => {
                // Unparseable source is a signal in its own right, recorded
                // at zero score so it never inflates the total by itself.
                return Ok(vec![Finding::new(
                    ANALYZER_ID,
                    "parse-error",
                    format!("could not parse {}: {reason}", item.rel_path),
                    ctx.config.score_or_default("parse-error"),
                    item.rel_path.clone(),
                )]);
            }
        };
        if parsed.partial {
            debug!(item = %item.rel_path, "walking a partial parse tree");
        }

        let outcome = taint::walk(&parsed.tree, source.as_bytes(), &ctx.config.flow);
        let mut findings = Vec::with_capacity(outcome.hits.len());
        for hit in &outcome.hits {
            findings.push(finding_for_hit(ctx, item, hit));
        }
        if outcome.depth_exceeded {
            findings.push(Finding::new(
                ANALYZER_ID,
                "ast-depth-exceeded",
                format!("expression nesting in {} exceeds the walk ceiling", item.rel_path),
                ctx.config.score_or_default("ast-depth-exceeded"),
                item.rel_path.clone(),
            ));
        }
        Ok(findings)
    }
}

fn finding_for_hit(ctx: &ScanContext<'_>, item: &LocatedItem, hit: &SinkHit) -> Finding {
    let (kind, what) = match hit.sink {
        SinkKind::Exec => ("dynamic-execution-of-decoded-value", "dynamic code execution"),
        SinkKind::Import => ("dynamic-import-of-tainted-value", "dynamic import"),
        SinkKind::Spawn => ("process-spawn-with-tainted-value", "process spawn"),
        SinkKind::Net => ("credential-exfiltration", "network send"),
    };
    let message = match hit.taint {
        Some(t) => format!(
            "{what} via {} with {} input (chain length {})",
            hit.call,
            taint_label(t.kind),
            t.chain
        ),
        None => format!("{what} via {} after an environment read in the same scope", hit.call),
    };
    Finding::new(ANALYZER_ID, kind, message, ctx.config.score_or_default(kind), item.rel_path.clone())
        .with_line(hit.line)
        .with_confidence(confidence_for_hit(hit))
}

fn taint_label(kind: TaintKind) -> &'static str {
    match kind {
        TaintKind::Decoded => "decoded",
        TaintKind::Constructed => "constructed",
        TaintKind::Environment => "environment-derived",
    }
}

/// Confidence starts from the sink kind and drops with every extra
/// transformation step between source and sink.
fn confidence_for_hit(hit: &SinkHit) -> f32 {
    let base = match hit.sink {
        SinkKind::Exec => 0.9,
        SinkKind::Import => 0.8,
        SinkKind::Spawn => 0.8,
        // Env read in scope but no tainted argument is the weakest shape.
        SinkKind::Net => match hit.taint {
            Some(_) => 0.7,
            None => 0.5,
        },
    };
    let chain = hit.taint.map_or(1, |t| t.chain);
    (base - 0.05 * (chain.saturating_sub(1)) as f32).max(0.3)
}

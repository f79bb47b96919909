//! Install-time script inspection. `setup.py` runs with the installer's
//! privileges at `pip install` time, so network access or dynamic
//! execution there is far more suspicious than the same call elsewhere.

use crate::analyzers::{Analyzer, ScanContext};
use crate::error::Result;
use crate::pattern::collect_calls;
use crate::types::{ContentKind, Finding, LocatedItem};
use std::fs;
use std::path::Path;

pub const ANALYZER_ID: &str = "setup";

/// Call prefixes that open network connections.
const NETWORK_PREFIXES: &[&str] =
    &["requests.", "urllib.request.", "urllib2.", "http.client.", "socket.", "httpx."];

/// Calls that execute code or spawn processes.
const EXEC_CALLS: &[&str] = &["eval", "exec", "compile", "__import__", "os.system", "os.popen"];
const EXEC_PREFIXES: &[&str] = &["subprocess."];

pub struct SetupScriptAnalyzer;

impl Analyzer for SetupScriptAnalyzer {
    fn id(&self) -> &'static str {
        ANALYZER_ID
    }

    fn accepts(&self, item: &LocatedItem) -> bool {
        item.kind == ContentKind::PythonSource
            && Path::new(&item.rel_path).file_name().is_some_and(|n| n == "setup.py")
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
            let line = call.start_position().row + 1;

            if NETWORK_PREFIXES.iter().any(|p| name.starts_with(p)) {
                let kind = "setup-script-network";
                findings.push(
                    Finding::new(
                        ANALYZER_ID,
                        kind,
                        format!("setup script opens a network connection via {name}"),
                        ctx.config.score_or_default(kind),
                        item.rel_path.clone(),
                    )
                    .with_line(line),
                );
            } else if EXEC_CALLS.contains(&name)
                || EXEC_PREFIXES.iter().any(|p| name.starts_with(p))
            {
                let kind = "setup-script-exec";
                findings.push(
                    Finding::new(
                        ANALYZER_ID,
                        kind,
                        format!("setup script executes code via {name}"),
                        ctx.config.score_or_default(kind),
                        item.rel_path.clone(),
                    )
                    .with_line(line),
                );
            }
        }
        Ok(findings)
    }
}

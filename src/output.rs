//! Report rendering. The reporting threshold (`min_report_score`) is
//! applied here at the presentation boundary; the engine itself always
//! keeps the full finding list.

use crate::config::ScanConfig;
use crate::error::{Result, SiftError};
use crate::types::{ScanResult, ScanStatus, Severity};
use colored::Colorize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" => Ok(OutputFormat::Text),
            "json" => Ok(OutputFormat::Json),
            other => Err(format!("unknown output format '{other}' (expected text or json)")),
        }
    }
}

/// A result with sub-threshold findings dropped. The score is left as the
/// engine computed it, so the report says what the package scored, not
/// what the visible findings sum to.
pub fn report_view(result: &ScanResult, config: &ScanConfig) -> ScanResult {
    let mut view = result.clone();
    view.findings.retain(|f| f.score >= config.min_report_score);
    view
}

pub fn render_json(results: &[ScanResult], config: &ScanConfig) -> Result<String> {
    let views: Vec<ScanResult> = results.iter().map(|r| report_view(r, config)).collect();
    serde_json::to_string_pretty(&views)
        .map_err(|e| SiftError::config(format!("could not serialize report: {e}")))
}

pub fn print_text(results: &[ScanResult], config: &ScanConfig) {
    for result in results {
        let view = report_view(result, config);
        print_one(&view);
    }
    let flagged = results.iter().filter(|r| r.score >= config.min_report_score).count();
    let failed = results.iter().filter(|r| r.status == ScanStatus::Failed).count();
    println!(
        "\n{} package(s) scanned, {} above threshold, {} failed",
        results.len(),
        flagged,
        failed
    );
}

fn print_one(result: &ScanResult) {
    let name = result.reference.display_name();
    let header = match result.status {
        ScanStatus::Completed => format!("{name} (score {})", result.score),
        ScanStatus::PartiallyFailed => format!("{name} (score {}, partial)", result.score),
        ScanStatus::Failed => format!("{name} (failed)"),
    };
    println!("\n{}", header.bold());

    if let Some(error) = &result.error {
        println!("  {} {error}", "error:".red().bold());
        return;
    }
    if result.findings.is_empty() {
        println!("  {}", "no findings above threshold".dimmed());
        return;
    }
    for finding in &result.findings {
        let severity = colorize_severity(finding.severity);
        let place = match (&finding.location[..], finding.line) {
            ("", _) => String::new(),
            (loc, Some(line)) => format!(" [{loc}:{line}]"),
            (loc, None) => format!(" [{loc}]"),
        };
        println!(
            "  {severity} {} ({}, score {}, confidence {:.2}){place}",
            finding.message, finding.kind, finding.score, finding.confidence
        );
    }
    println!(
        "  {} {} items, {} bytes decompressed, {} ms",
        "usage:".dimmed(),
        result.usage.items_examined,
        result.usage.decompressed_bytes,
        result.usage.elapsed_ms
    );
}

fn colorize_severity(severity: Severity) -> String {
    let tag = format!("[{}]", severity.as_str().to_uppercase());
    match severity {
        Severity::Critical => tag.red().bold().to_string(),
        Severity::High => tag.red().to_string(),
        Severity::Medium => tag.yellow().to_string(),
        Severity::Low => tag.cyan().to_string(),
        Severity::Info => tag.dimmed().to_string(),
    }
}

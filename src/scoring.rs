//! Score aggregation. The package total is always the plain sum of its
//! findings' scores; policies that want a different total add a synthetic
//! finding rather than bending the arithmetic.

use crate::config::{ScanConfig, SensitiveFilePolicy};
use crate::types::Finding;
use tracing::debug;

/// Aggregate a finished finding list into the package total, applying the
/// sensitive-file policy. Called exactly once per package scan; the input
/// order is preserved and only synthetic findings are appended.
pub fn score_package(config: &ScanConfig, findings: &mut Vec<Finding>) -> u32 {
    if let SensitiveFilePolicy::Flat(floor) = config.sensitive_file_policy {
        apply_sensitive_floor(findings, floor);
    }
    let total = total_score(findings);
    debug!(total, findings = findings.len(), "package scored");
    total
}

pub fn total_score(findings: &[Finding]) -> u32 {
    findings.iter().map(|f| f.score).fold(0u32, u32::saturating_add)
}

/// Flat policy: a sensitive-file hit raises the total to at least `floor`.
/// The raise is recorded as its own finding so the total stays the sum of
/// the list.
fn apply_sensitive_floor(findings: &mut Vec<Finding>, floor: u32) {
    let Some(hit) = findings.iter().find(|f| f.kind == "contain-sensitive-file") else { return };
    let location = hit.location.clone();
    let current = total_score(findings);
    if current >= floor {
        return;
    }
    // The synthetic entry carries the policy's raise, not a table weight;
    // severity follows the contributed score as usual.
    findings.push(Finding::new(
        "engine",
        "sensitive-file-override",
        format!("sensitive-file policy raises the package total to {floor}"),
        floor - current,
        location,
    ));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ScanConfig;

    fn finding(kind: &str, score: u32) -> Finding {
        Finding::new("test", kind, format!("{kind} for test"), score, "x".to_string())
    }

    #[test]
    fn total_is_the_sum_of_finding_scores() {
        let config = ScanConfig::default();
        let mut findings = vec![finding("a", 10), finding("b", 25), finding("c", 0)];
        assert_eq!(score_package(&config, &mut findings), 35);
        assert_eq!(findings.len(), 3);
    }

    #[test]
    fn scoring_twice_gives_the_same_total() {
        let config = ScanConfig::default();
        let mut findings = vec![finding("a", 10), finding("b", 40)];
        let first = score_package(&config, &mut findings);
        assert_eq!(total_score(&findings), first);
    }

    #[test]
    fn flat_policy_floors_the_total_via_a_synthetic_finding() {
        let config =
            ScanConfig { sensitive_file_policy: SensitiveFilePolicy::Flat(100), ..Default::default() };
        let mut findings = vec![finding("contain-sensitive-file", 30)];
        let total = score_package(&config, &mut findings);
        assert_eq!(total, 100);
        assert_eq!(findings.len(), 2);
        assert_eq!(findings[1].kind, "sensitive-file-override");
        assert_eq!(findings[1].score, 70);
        // Sum invariant holds after the override.
        assert_eq!(total_score(&findings), total);
    }

    #[test]
    fn flat_policy_is_a_no_op_above_the_floor() {
        let config =
            ScanConfig { sensitive_file_policy: SensitiveFilePolicy::Flat(50), ..Default::default() };
        let mut findings = vec![finding("contain-sensitive-file", 100)];
        assert_eq!(score_package(&config, &mut findings), 100);
        assert_eq!(findings.len(), 1);
    }

    #[test]
    fn flat_policy_needs_a_sensitive_hit() {
        let config =
            ScanConfig { sensitive_file_policy: SensitiveFilePolicy::Flat(100), ..Default::default() };
        let mut findings = vec![finding("unexpected-binary", 30)];
        assert_eq!(score_package(&config, &mut findings), 30);
        assert_eq!(findings.len(), 1);
    }
}

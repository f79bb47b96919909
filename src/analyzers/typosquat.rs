//! Typosquatting check: does this package's name sit within typo distance
//! of a vastly more popular one? Disabled when no popularity dataset is
//! configured.

use crate::analyzers::{Analyzer, ScanContext};
use crate::error::Result;
use crate::locator::normalize_name;
use crate::types::{Finding, LocatedItem, PackageRef};
use tracing::debug;

pub const ANALYZER_ID: &str = "typosquat";

/// Targets with fewer downloads than this are not worth squatting.
const MIN_TARGET_DOWNLOADS: u64 = 10_000;

/// Required popularity gap: the target must dwarf the scanned package.
const POPULARITY_GAP: u64 = 100;

/// Names shorter than this collide by accident all the time.
const MIN_NAME_LEN: usize = 4;

pub struct TyposquatAnalyzer;

impl Analyzer for TyposquatAnalyzer {
    fn id(&self) -> &'static str {
        ANALYZER_ID
    }

    fn accepts(&self, _item: &LocatedItem) -> bool {
        false
    }

    fn analyze_package(
        &self,
        ctx: &ScanContext<'_>,
        package: &PackageRef,
        _items: &[LocatedItem],
    ) -> Result<Vec<Finding>> {
        let Some(index) = ctx.popularity else { return Ok(Vec::new()) };
        let own = normalize_name(&package.name);
        if own.len() < MIN_NAME_LEN {
            return Ok(Vec::new());
        }
        let own_count = index.get(&own);

        // Best candidate: smallest edit distance, then most downloads,
        // then name order so ties never flap between runs.
        let mut best: Option<(usize, u64, &str)> = None;
        for (name, &count) in index.iter() {
            if *name == own || count < MIN_TARGET_DOWNLOADS {
                continue;
            }
            if count < own_count.saturating_mul(POPULARITY_GAP).max(MIN_TARGET_DOWNLOADS) {
                continue;
            }
            let distance = strsim::levenshtein(&own, name);
            if distance == 0 || distance > 2 {
                continue;
            }
            let candidate = (distance, count, name.as_str());
            best = match best {
                Some((bd, bc, bn))
                    if (bd, std::cmp::Reverse(bc), bn)
                        <= (distance, std::cmp::Reverse(count), name.as_str()) =>
                {
                    Some((bd, bc, bn))
                }
                _ => Some(candidate),
            };
        }

        let Some((distance, count, target)) = best else { return Ok(Vec::new()) };
        debug!(package = %own, target, distance, "typosquat candidate");
        let kind = "typosquatting";
        let confidence = if distance == 1 { 0.8 } else { 0.55 };
        Ok(vec![Finding::new(
            ANALYZER_ID,
            kind,
            format!(
                "'{}' is {distance} edit(s) away from '{target}' ({count} downloads)",
                package.name
            ),
            ctx.config.score_or_default(kind),
            String::new(),
        )
        .with_confidence(confidence)])
    }
}

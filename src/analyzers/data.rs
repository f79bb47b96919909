//! Opaque-blob heuristics: high-entropy payloads and oversized data files
//! that often carry an embedded second stage.

use crate::analyzers::{Analyzer, ScanContext};
use crate::entropy::{shannon_entropy, OBFUSCATED_THRESHOLD};
use crate::error::Result;
use crate::types::{ContentKind, Finding, LocatedItem};
use std::fs;

pub const ANALYZER_ID: &str = "data";

/// Blobs shorter than this give meaningless entropy readings.
const MIN_ENTROPY_SAMPLE: usize = 256;

/// Data files above this size are unusual in a Python package.
const LARGE_BLOB_SIZE: u64 = 4 * 1024 * 1024;

/// Formats that are compressed by design; their entropy tells us nothing.
const MEDIA_EXTENSIONS: &[&str] = &[
    ".png", ".jpg", ".jpeg", ".gif", ".webp", ".ico", ".woff", ".woff2", ".ttf", ".otf", ".pdf",
    ".mp3", ".mp4", ".ogg",
];

pub struct DataBlobAnalyzer;

impl Analyzer for DataBlobAnalyzer {
    fn id(&self) -> &'static str {
        ANALYZER_ID
    }

    fn accepts(&self, item: &LocatedItem) -> bool {
        item.kind == ContentKind::Data
    }

    fn analyze_item(&self, ctx: &ScanContext<'_>, item: &LocatedItem) -> Result<Vec<Finding>> {
        let mut findings = Vec::new();

        if item.size > LARGE_BLOB_SIZE {
            let kind = "embedded-large-blob";
            findings.push(Finding::new(
                ANALYZER_ID,
                kind,
                format!("{} is a {} byte data file", item.rel_path, item.size),
                ctx.config.score_or_default(kind),
                item.rel_path.clone(),
            ));
        }

        if !is_media(&item.rel_path) {
            let data = fs::read(&item.path)?;
            if data.len() >= MIN_ENTROPY_SAMPLE {
                let entropy = shannon_entropy(&data);
                if entropy > OBFUSCATED_THRESHOLD {
                    let kind = "embedded-high-entropy-payload";
                    findings.push(Finding::new(
                        ANALYZER_ID,
                        kind,
                        format!("{} has entropy {entropy:.2}, consistent with an encrypted or packed payload", item.rel_path),
                        ctx.config.score_or_default(kind),
                        item.rel_path.clone(),
                    ));
                }
            }
        }

        Ok(findings)
    }
}

fn is_media(rel_path: &str) -> bool {
    let lower = rel_path.to_ascii_lowercase();
    MEDIA_EXTENSIONS.iter().any(|ext| lower.ends_with(ext))
}

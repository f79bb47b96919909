//! File-level audit: leaked credential files, compiled bytecode where
//! source is expected, and native executables hiding in a package.

use crate::analyzers::{Analyzer, ScanContext};
use crate::error::Result;
use crate::types::{ContentKind, Finding, LocatedItem};
use std::fs::File;
use std::io::Read;
use std::path::Path;

pub const ANALYZER_ID: &str = "files";

/// File names that have no business being published in a package. Hits
/// usually mean the author packaged their home directory by accident,
/// which leaks credentials to everyone who installs it.
const SENSITIVE_NAMES: &[&str] = &[
    ".pypirc",
    ".netrc",
    ".git-credentials",
    ".npmrc",
    ".htpasswd",
    ".pgpass",
    ".boto",
    "id_rsa",
    "id_dsa",
    "id_ecdsa",
    "id_ed25519",
];

/// Path suffixes for credentials that live under well-known directories.
const SENSITIVE_SUFFIXES: &[&str] = &[".aws/credentials", ".docker/config.json", ".ssh/config"];

pub struct FileAuditAnalyzer;

impl Analyzer for FileAuditAnalyzer {
    fn id(&self) -> &'static str {
        ANALYZER_ID
    }

    fn accepts(&self, item: &LocatedItem) -> bool {
        item.kind != ContentKind::Directory
    }

    fn analyze_item(&self, ctx: &ScanContext<'_>, item: &LocatedItem) -> Result<Vec<Finding>> {
        let mut findings = Vec::new();

        if is_sensitive(&item.rel_path) {
            let kind = "contain-sensitive-file";
            findings.push(Finding::new(
                ANALYZER_ID,
                kind,
                format!("{} looks like a leaked credential file", item.rel_path),
                ctx.config.score_or_default(kind),
                item.rel_path.clone(),
            ));
        }

        if item.kind == ContentKind::Bytecode && in_source_dist(item) {
            let kind = "bytecode-in-source-dist";
            findings.push(Finding::new(
                ANALYZER_ID,
                kind,
                format!("compiled bytecode {} shipped inside a source distribution", item.rel_path),
                ctx.config.score_or_default(kind),
                item.rel_path.clone(),
            ));
        }

        if item.kind == ContentKind::Data {
            if let Some(format) = native_binary_format(&item.path)? {
                let kind = "unexpected-binary";
                findings.push(Finding::new(
                    ANALYZER_ID,
                    kind,
                    format!("{} is a native {format} binary", item.rel_path),
                    ctx.config.score_or_default(kind),
                    item.rel_path.clone(),
                ));
            }
        }

        Ok(findings)
    }
}

fn is_sensitive(rel_path: &str) -> bool {
    let name = Path::new(rel_path)
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    SENSITIVE_NAMES.contains(&name.as_str())
        || SENSITIVE_SUFFIXES.iter().any(|s| rel_path.ends_with(s))
}

/// Source distributions are tarballs; wheels and eggs are zips and may
/// legitimately carry compiled artifacts.
fn in_source_dist(item: &LocatedItem) -> bool {
    item.container_chain.first().is_some_and(|outer| {
        let lower = outer.to_ascii_lowercase();
        lower.ends_with(".tar.gz") || lower.ends_with(".tgz") || lower.ends_with(".tar")
    })
}

fn native_binary_format(path: &Path) -> Result<Option<&'static str>> {
    let mut magic = [0u8; 4];
    let read = File::open(path)?.read(&mut magic)?;
    if read < 4 {
        return Ok(None);
    }
    let format = match magic {
        [0x7f, b'E', b'L', b'F'] => Some("ELF"),
        [b'M', b'Z', _, _] => Some("PE"),
        [0xfe, 0xed, 0xfa, _] | [0xcf, 0xfa, 0xed, 0xfe] | [0xca, 0xfe, 0xba, 0xbe] => {
            Some("Mach-O")
        }
        _ => None,
    };
    Ok(format)
}

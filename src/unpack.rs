//! Recursive, resource-bounded unpacking of package artifacts.
//!
//! Container types are determined by content signature, never by filename.
//! Hostile inputs (zip bombs, traversal entries, links, deep nesting) are
//! rejected per entry and reported as findings; the rest of the artifact
//! is still examined.

use crate::config::ScanConfig;
use crate::error::{Result, SiftError};
use crate::guard::ResourceGuard;
use crate::locator::{file_sha256, ResolvedArtifact};
use crate::types::{ContentKind, Finding, LocatedItem};
use flate2::read::GzDecoder;
use std::fs::{self, File};
use std::io::Read;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

pub const ANALYZER_ID: &str = "unpacker";

/// Container formats recognised by signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Container {
    Zip,
    Tar,
    TarGz,
    Gzip,
    Directory,
}

/// Sniff a container type from leading bytes (and the ustar block).
pub fn detect_container(path: &Path) -> Option<Container> {
    if path.is_dir() {
        return Some(Container::Directory);
    }
    let mut header = [0u8; 262];
    let mut file = File::open(path).ok()?;
    let read = file.read(&mut header).ok()?;
    let header = &header[..read];

    if header.starts_with(b"PK\x03\x04") || header.starts_with(b"PK\x05\x06") {
        return Some(Container::Zip);
    }
    if header.starts_with(&[0x1f, 0x8b]) {
        // gzip; whether it wraps a tar stream is decided after one level of
        // decompression.
        return Some(gzip_wraps_tar(path).unwrap_or(Container::Gzip));
    }
    if read >= 262 && &header[257..262] == b"ustar" {
        return Some(Container::Tar);
    }
    None
}

/// Peek into a gzip stream far enough to spot a tar header.
fn gzip_wraps_tar(path: &Path) -> Option<Container> {
    let file = File::open(path).ok()?;
    let mut decoder = GzDecoder::new(file);
    let mut block = [0u8; 262];
    let mut filled = 0usize;
    while filled < block.len() {
        match decoder.read(&mut block[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(_) => return None,
        }
    }
    if filled >= 262 && &block[257..262] == b"ustar" {
        Some(Container::TarGz)
    } else {
        Some(Container::Gzip)
    }
}

/// Classify a non-container file by signature, falling back to well-known
/// packaging names and extensions.
pub fn classify_file(path: &Path, rel_path: &str) -> ContentKind {
    if detect_container(path).is_some() {
        return ContentKind::Archive;
    }

    let file_name = Path::new(rel_path)
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    if matches!(
        file_name.as_str(),
        "PKG-INFO" | "METADATA" | "WHEEL" | "RECORD" | "setup.cfg" | "pyproject.toml" | "metadata.json"
    ) {
        return ContentKind::Metadata;
    }

    let mut header = [0u8; 64];
    let read = File::open(path).and_then(|mut f| f.read(&mut header)).unwrap_or(0);
    let header = &header[..read];

    // CPython bytecode magic ends in \r\n.
    if rel_path.ends_with(".pyc") && read >= 4 && header[2] == 0x0d && header[3] == 0x0a {
        return ContentKind::Bytecode;
    }
    if rel_path.ends_with(".py") {
        return ContentKind::PythonSource;
    }
    if header.starts_with(b"#!") {
        let line = String::from_utf8_lossy(header);
        if line.lines().next().is_some_and(|l| l.contains("python")) {
            return ContentKind::PythonSource;
        }
    }

    ContentKind::Data
}

/// Output of one package's unpack phase: the located-item tree in
/// container-entry order plus any findings raised along the way.
#[derive(Debug, Default)]
pub struct UnpackOutcome {
    pub items: Vec<LocatedItem>,
    pub findings: Vec<Finding>,
}

pub struct Unpacker<'a> {
    config: &'a ScanConfig,
    guard: &'a ResourceGuard,
    extract_root: &'a Path,
    next_dir: usize,
}

impl<'a> Unpacker<'a> {
    pub fn new(config: &'a ScanConfig, guard: &'a ResourceGuard, extract_root: &'a Path) -> Self {
        Self { config, guard, extract_root, next_dir: 0 }
    }

    /// Expand a resolved artifact into its located-item tree. Errors that
    /// concern a single entry or subtree become findings; only I/O failure
    /// on the artifact itself propagates.
    pub fn unpack(&mut self, artifact: &ResolvedArtifact) -> Result<UnpackOutcome> {
        let mut outcome = UnpackOutcome::default();
        match detect_container(&artifact.path) {
            Some(Container::Directory) => {
                self.walk_directory(&artifact.path, &[], &mut outcome)?;
            }
            Some(container) => {
                let name = artifact
                    .path
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_else(|| "artifact".to_string());
                // The artifact itself is the first item, so analyzers can
                // check its shape and the report carries its digest.
                if let Some(item) = self.make_item(&artifact.path, &name, &[], &mut outcome) {
                    outcome.items.push(item);
                }
                self.expand_archive(&artifact.path, container, &name, &[], &mut outcome);
            }
            None => {
                // A bare file is a one-item package.
                let rel = artifact
                    .path
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_else(|| "artifact".to_string());
                if let Some(item) = self.make_item(&artifact.path, &rel, &[], &mut outcome) {
                    outcome.items.push(item);
                }
            }
        }
        Ok(outcome)
    }

    fn walk_directory(
        &mut self,
        root: &Path,
        chain: &[String],
        outcome: &mut UnpackOutcome,
    ) -> Result<()> {
        for entry in WalkDir::new(root)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
        {
            if entry.path() == root {
                continue;
            }
            let rel = entry
                .path()
                .strip_prefix(root)
                .unwrap_or(entry.path())
                .to_string_lossy()
                .to_string();
            if entry.path_is_symlink() {
                outcome.findings.push(self.entry_finding(
                    "suspicious-archive-entry-link",
                    format!("symbolic link entry '{rel}' was not followed"),
                    chain,
                    &rel,
                ));
                continue;
            }
            if entry.file_type().is_dir() {
                outcome.items.push(LocatedItem {
                    path: entry.path().to_path_buf(),
                    rel_path: rel,
                    container_chain: chain.to_vec(),
                    kind: ContentKind::Directory,
                    size: 0,
                    sha256: None,
                });
                continue;
            }
            let path = entry.path().to_path_buf();
            if let Some(item) = self.make_item(&path, &rel, chain, outcome) {
                let is_archive = item.kind == ContentKind::Archive;
                outcome.items.push(item);
                if is_archive {
                    self.descend(&path, &rel, chain, outcome);
                }
            }
        }
        Ok(())
    }

    /// Recurse into a nested archive item, honoring the depth ceiling.
    fn descend(&mut self, path: &Path, rel: &str, chain: &[String], outcome: &mut UnpackOutcome) {
        let mut child_chain = chain.to_vec();
        child_chain.push(rel.to_string());
        if child_chain.len() > self.config.limits.max_unpack_depth {
            outcome.findings.push(self.entry_finding(
                "unpacked-depth-exceeded",
                format!(
                    "archive '{}' left unexamined: nesting depth {} exceeds the configured maximum {}",
                    rel,
                    child_chain.len(),
                    self.config.limits.max_unpack_depth
                ),
                chain,
                rel,
            ));
            return;
        }
        let Some(container) = detect_container(path) else { return };
        self.expand_archive(path, container, rel, chain, outcome);
    }

    fn expand_archive(
        &mut self,
        path: &Path,
        container: Container,
        rel: &str,
        chain: &[String],
        outcome: &mut UnpackOutcome,
    ) {
        if let Err(e) = self.guard.check_deadline() {
            outcome.findings.push(self.entry_finding(
                "resource-limit-exceeded",
                format!("unpacking stopped: {e}"),
                chain,
                rel,
            ));
            return;
        }

        let mut child_chain = chain.to_vec();
        child_chain.push(rel.to_string());

        let dest = self.extract_root.join(format!("unpack_{}", self.next_dir));
        self.next_dir += 1;
        if let Err(e) = fs::create_dir_all(&dest) {
            outcome.findings.push(self.entry_finding(
                "corrupted-archive",
                format!("could not create extraction dir: {e}"),
                chain,
                rel,
            ));
            return;
        }

        debug!(archive = rel, ?container, dest = %dest.display(), "expanding archive");
        let result = match container {
            Container::Zip => self.expand_zip(path, &dest, &child_chain, outcome),
            Container::Tar => {
                File::open(path).map_err(SiftError::Io).and_then(|f| {
                    self.expand_tar(tar::Archive::new(f), &dest, &child_chain, outcome)
                })
            }
            Container::TarGz => {
                File::open(path).map_err(SiftError::Io).and_then(|f| {
                    self.expand_tar(tar::Archive::new(GzDecoder::new(f)), &dest, &child_chain, outcome)
                })
            }
            Container::Gzip => self.expand_gzip(path, rel, &dest, &child_chain, outcome),
            Container::Directory => unreachable!("directories are walked, not expanded"),
        };

        if let Err(e) = result {
            let kind =
                if e.is_resource_limit() { "resource-limit-exceeded" } else { "corrupted-archive" };
            warn!(archive = rel, error = %e, "archive subtree aborted");
            outcome.findings.push(self.entry_finding(
                kind,
                format!("could not examine archive '{rel}': {e}"),
                chain,
                rel,
            ));
        }
    }

    fn expand_zip(
        &mut self,
        path: &Path,
        dest: &Path,
        chain: &[String],
        outcome: &mut UnpackOutcome,
    ) -> Result<()> {
        let file = File::open(path)?;
        let mut archive = zip::ZipArchive::new(file)
            .map_err(|e| SiftError::unpack(path.display().to_string(), e.to_string()))?;

        for i in 0..archive.len() {
            let mut entry = archive
                .by_index(i)
                .map_err(|e| SiftError::unpack(path.display().to_string(), e.to_string()))?;
            let name = entry.name().to_string();

            if let Some(finding) = self.check_entry_path(&name, chain) {
                outcome.findings.push(finding);
                continue;
            }
            if entry.is_dir() {
                let dir = dest.join(sanitize_rel(&name));
                let _ = fs::create_dir_all(&dir);
                outcome.items.push(LocatedItem {
                    path: dir,
                    rel_path: name,
                    container_chain: chain.to_vec(),
                    kind: ContentKind::Directory,
                    size: 0,
                    sha256: None,
                });
                continue;
            }

            // Declared uncompressed size, checked before materializing.
            let declared = entry.size();
            if self.guard.check_file_size(declared).is_err() {
                outcome.findings.push(self.entry_finding(
                    "archive-file-size-exceeded",
                    format!(
                        "entry '{}' declares {} bytes, over the {} byte per-file ceiling",
                        name,
                        declared,
                        self.guard.limits().max_file_size
                    ),
                    chain,
                    &name,
                ));
                continue;
            }
            // Budget exhaustion aborts the whole subtree.
            self.guard.charge(declared)?;

            let out_path = dest.join(sanitize_rel(&name));
            if let Some(parent) = out_path.parent() {
                fs::create_dir_all(parent)?;
            }
            let mut out = File::create(&out_path)?;
            // Cap the copy at the declared size so a lying header cannot
            // blow the budget.
            let copied = std::io::copy(&mut (&mut entry).take(declared), &mut out)?;
            if copied != declared {
                warn!(entry = name, declared, copied, "zip entry size mismatch");
            }

            if let Some(item) = self.make_item(&out_path, &name, chain, outcome) {
                let is_archive = item.kind == ContentKind::Archive;
                outcome.items.push(item);
                if is_archive {
                    self.descend(&out_path, &name, chain, outcome);
                }
            }
        }
        Ok(())
    }

    fn expand_tar<R: Read>(
        &mut self,
        mut archive: tar::Archive<R>,
        dest: &Path,
        chain: &[String],
        outcome: &mut UnpackOutcome,
    ) -> Result<()> {
        let entries = archive
            .entries()
            .map_err(|e| SiftError::unpack(chain.join("!"), e.to_string()))?;

        for entry in entries {
            let mut entry =
                entry.map_err(|e| SiftError::unpack(chain.join("!"), e.to_string()))?;
            let name = match entry.path() {
                Ok(p) => p.to_string_lossy().to_string(),
                Err(e) => {
                    outcome.findings.push(self.entry_finding(
                        "corrupted-archive",
                        format!("tar entry with undecodable path: {e}"),
                        chain,
                        "<invalid>",
                    ));
                    continue;
                }
            };

            let entry_type = entry.header().entry_type();
            if entry_type.is_symlink() || entry_type.is_hard_link() {
                outcome.findings.push(self.entry_finding(
                    "suspicious-archive-entry-link",
                    format!("link entry '{name}' was not followed"),
                    chain,
                    &name,
                ));
                continue;
            }
            if let Some(finding) = self.check_entry_path(&name, chain) {
                outcome.findings.push(finding);
                continue;
            }
            if entry_type.is_dir() {
                let dir = dest.join(sanitize_rel(&name));
                let _ = fs::create_dir_all(&dir);
                outcome.items.push(LocatedItem {
                    path: dir,
                    rel_path: name,
                    container_chain: chain.to_vec(),
                    kind: ContentKind::Directory,
                    size: 0,
                    sha256: None,
                });
                continue;
            }
            if !entry_type.is_file() {
                continue;
            }

            let declared = entry.size();
            if self.guard.check_file_size(declared).is_err() {
                outcome.findings.push(self.entry_finding(
                    "archive-file-size-exceeded",
                    format!(
                        "entry '{}' declares {} bytes, over the {} byte per-file ceiling",
                        name,
                        declared,
                        self.guard.limits().max_file_size
                    ),
                    chain,
                    &name,
                ));
                // Skip this entry's bytes without materializing them.
                std::io::copy(&mut entry, &mut std::io::sink())?;
                continue;
            }
            self.guard.charge(declared)?;

            let out_path = dest.join(sanitize_rel(&name));
            if let Some(parent) = out_path.parent() {
                fs::create_dir_all(parent)?;
            }
            let mut out = File::create(&out_path)?;
            std::io::copy(&mut (&mut entry).take(declared), &mut out)?;

            if let Some(item) = self.make_item(&out_path, &name, chain, outcome) {
                let is_archive = item.kind == ContentKind::Archive;
                outcome.items.push(item);
                if is_archive {
                    self.descend(&out_path, &name, chain, outcome);
                }
            }
        }
        Ok(())
    }

    /// A bare gzip stream (not wrapping tar): one decompressed member.
    fn expand_gzip(
        &mut self,
        path: &Path,
        rel: &str,
        dest: &Path,
        chain: &[String],
        outcome: &mut UnpackOutcome,
    ) -> Result<()> {
        let inner_name = rel.strip_suffix(".gz").unwrap_or(rel).to_string();
        let inner_name =
            Path::new(&inner_name).file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or(inner_name);

        let file = File::open(path)?;
        let mut decoder = GzDecoder::new(file);
        let cap = self.guard.limits().max_file_size;
        let out_path = dest.join(sanitize_rel(&inner_name));
        let mut out = File::create(&out_path)?;
        // Decompressed size is unknown upfront for bare gzip; the copy is
        // hard-capped one byte past the per-file ceiling to detect overrun.
        let copied = std::io::copy(&mut (&mut decoder).take(cap + 1), &mut out)?;
        if copied > cap {
            let _ = fs::remove_file(&out_path);
            return Err(SiftError::FileTooLarge { size: copied, limit: cap });
        }
        self.guard.charge(copied)?;

        if let Some(item) = self.make_item(&out_path, &inner_name, chain, outcome) {
            let is_archive = item.kind == ContentKind::Archive;
            outcome.items.push(item);
            if is_archive {
                self.descend(&out_path, &inner_name, chain, outcome);
            }
        }
        Ok(())
    }

    /// aura-style suspicious entry checks: absolute paths and parent
    /// references are rejected, reported, and never extracted.
    fn check_entry_path(&self, name: &str, chain: &[String]) -> Option<Finding> {
        if name.starts_with('/') || name.starts_with('\\') || Path::new(name).is_absolute() {
            return Some(self.entry_finding(
                "suspicious-archive-entry-absolute-path",
                format!("entry '{name}' uses an absolute path and was not extracted"),
                chain,
                name,
            ));
        }
        if Path::new(name).components().any(|c| matches!(c, Component::ParentDir)) {
            return Some(self.entry_finding(
                "suspicious-archive-entry-parent-reference",
                format!("entry '{name}' escapes its extraction root and was not extracted"),
                chain,
                name,
            ));
        }
        None
    }

    fn entry_finding(&self, kind: &str, message: String, chain: &[String], name: &str) -> Finding {
        Finding::new(
            ANALYZER_ID,
            kind,
            message,
            self.config.score_or_default(kind),
            provenance(chain, name),
        )
    }

    fn make_item(
        &self,
        path: &Path,
        rel: &str,
        chain: &[String],
        outcome: &mut UnpackOutcome,
    ) -> Option<LocatedItem> {
        self.guard.record_item();
        let size = match fs::metadata(path) {
            Ok(m) => m.len(),
            Err(e) => {
                outcome.findings.push(self.entry_finding(
                    "corrupted-archive",
                    format!("could not stat extracted entry '{rel}': {e}"),
                    chain,
                    rel,
                ));
                return None;
            }
        };
        let kind = classify_file(path, rel);
        let sha256 = file_sha256(path).ok();
        Some(LocatedItem {
            path: path.to_path_buf(),
            rel_path: rel.to_string(),
            container_chain: chain.to_vec(),
            kind,
            size,
            sha256,
        })
    }
}

/// Provenance path for findings: containers joined with '!'.
pub fn provenance(chain: &[String], name: &str) -> String {
    if chain.is_empty() {
        name.to_string()
    } else {
        format!("{}!{}", chain.join("!"), name)
    }
}

/// Keep only normal components, stripping prefixes like "./". Traversal
/// entries were already rejected before this point.
fn sanitize_rel(name: &str) -> PathBuf {
    let mut out = PathBuf::new();
    for component in Path::new(name).components() {
        if let Component::Normal(c) = component {
            out.push(c);
        }
    }
    if out.as_os_str().is_empty() {
        out.push("entry");
    }
    out
}

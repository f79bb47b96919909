//! Artifact location: turning a logical package reference into a concrete
//! readable artifact on disk.
//!
//! Three interchangeable sources implement the same `resolve` contract, so
//! the pipeline cannot tell a mirror snapshot from a plain path. Network
//! fetching is an external collaborator: the remote-index source resolves
//! against the download directory such a fetcher populates.

use crate::error::{Result, SiftError};
use crate::types::{Origin, PackageRef};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

/// A resolved, readable artifact plus whatever the source declared about it.
#[derive(Debug, Clone)]
pub struct ResolvedArtifact {
    pub path: PathBuf,
    pub declared_size: Option<u64>,
    pub declared_sha256: Option<String>,
}

/// Capability of turning a package reference into a readable artifact.
pub trait ArtifactSource: Send + Sync {
    fn resolve(&self, reference: &PackageRef) -> Result<ResolvedArtifact>;
}

/// PEP 503 name normalization, so "Foo_Bar" and "foo-bar" land on the same
/// mirror entry.
pub fn normalize_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut last_sep = false;
    for ch in name.chars() {
        if ch == '-' || ch == '_' || ch == '.' {
            if !last_sep {
                out.push('-');
            }
            last_sep = true;
        } else {
            out.push(ch.to_ascii_lowercase());
            last_sep = false;
        }
    }
    out
}

/// A plain filesystem path: file or directory, used as-is.
pub struct LocalPathSource;

impl ArtifactSource for LocalPathSource {
    fn resolve(&self, reference: &PackageRef) -> Result<ResolvedArtifact> {
        let path = reference.resolved_path.as_ref().ok_or_else(|| {
            SiftError::location(reference.display_name(), "local reference carries no path")
        })?;
        if !path.exists() {
            return Err(SiftError::location(
                reference.display_name(),
                format!("path does not exist: {}", path.display()),
            ));
        }
        let declared_size = fs::metadata(path).ok().filter(|m| m.is_file()).map(|m| m.len());
        Ok(ResolvedArtifact { path: path.clone(), declared_size, declared_sha256: None })
    }
}

/// A pre-scanned local mirror snapshot (bandersnatch-style layout with a
/// `web/packages/` or `packages/` tree of release files).
pub struct MirrorSource {
    root: PathBuf,
}

impl MirrorSource {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    fn packages_root(&self) -> PathBuf {
        let nested = self.root.join("web").join("packages");
        if nested.is_dir() {
            nested
        } else {
            self.root.join("packages")
        }
    }
}

impl ArtifactSource for MirrorSource {
    fn resolve(&self, reference: &PackageRef) -> Result<ResolvedArtifact> {
        let packages = self.packages_root();
        if !packages.is_dir() {
            return Err(SiftError::location(
                reference.display_name(),
                format!("mirror has no packages tree under {}", self.root.display()),
            ));
        }

        let wanted = normalize_name(&reference.name);
        let mut candidates: Vec<PathBuf> = Vec::new();
        for entry in WalkDir::new(&packages).follow_links(false).into_iter().filter_map(|e| e.ok())
        {
            if !entry.file_type().is_file() {
                continue;
            }
            let file_name = entry.file_name().to_string_lossy().to_string();
            if !release_matches(&file_name, &wanted) {
                continue;
            }
            if let Some(version) = &reference.version {
                if !file_name.contains(version.as_str()) {
                    continue;
                }
            }
            candidates.push(entry.into_path());
        }

        // Entry order from walkdir is unstable across filesystems; sort for
        // a deterministic pick.
        candidates.sort();
        let path = candidates.into_iter().next_back().ok_or_else(|| {
            SiftError::location(reference.display_name(), "no matching release file in mirror")
        })?;

        debug!(package = %reference.display_name(), path = %path.display(), "resolved from mirror");
        let declared_size = fs::metadata(&path).ok().map(|m| m.len());
        Ok(ResolvedArtifact { path, declared_size, declared_sha256: None })
    }
}

/// Remote-index resolution against a pre-fetched download directory. The
/// HTTP layer that fills the directory also writes `<file>.sha256` sidecar
/// digests, which we surface as declared hashes.
pub struct IndexSource {
    download_dir: PathBuf,
}

impl IndexSource {
    pub fn new<P: Into<PathBuf>>(download_dir: P) -> Self {
        Self { download_dir: download_dir.into() }
    }
}

impl ArtifactSource for IndexSource {
    fn resolve(&self, reference: &PackageRef) -> Result<ResolvedArtifact> {
        let wanted = normalize_name(&reference.name);
        let entries = fs::read_dir(&self.download_dir).map_err(|e| {
            SiftError::location(
                reference.display_name(),
                format!("download directory unreadable: {e}"),
            )
        })?;

        let mut candidates: Vec<PathBuf> = Vec::new();
        for entry in entries.filter_map(|e| e.ok()) {
            let file_name = entry.file_name().to_string_lossy().to_string();
            if file_name.ends_with(".sha256") {
                continue;
            }
            if !release_matches(&file_name, &wanted) {
                continue;
            }
            if let Some(version) = &reference.version {
                if !file_name.contains(version.as_str()) {
                    continue;
                }
            }
            candidates.push(entry.path());
        }

        candidates.sort();
        let path = candidates.into_iter().next_back().ok_or_else(|| {
            SiftError::location(
                reference.display_name(),
                format!("no pre-fetched artifact under {}", self.download_dir.display()),
            )
        })?;

        let sidecar = path.with_extension(format!(
            "{}.sha256",
            path.extension().map(|e| e.to_string_lossy().to_string()).unwrap_or_default()
        ));
        let declared_sha256 =
            fs::read_to_string(&sidecar).ok().map(|s| s.trim().to_ascii_lowercase());

        let declared_size = fs::metadata(&path).ok().map(|m| m.len());
        Ok(ResolvedArtifact { path, declared_size, declared_sha256 })
    }
}

/// True when `file_name` is a release file of the normalized package name
/// (e.g. "requests-2.31.0.tar.gz" for "requests").
fn release_matches(file_name: &str, normalized: &str) -> bool {
    let normalized_file = normalize_name(file_name);
    normalized_file.starts_with(&format!("{normalized}-"))
}

/// Dispatches to the right source per reference origin. Holds only
/// configured roots; stateless across packages.
pub struct ArtifactResolver {
    local: LocalPathSource,
    mirror: Option<MirrorSource>,
    index: Option<IndexSource>,
}

impl ArtifactResolver {
    pub fn new(mirror_root: Option<PathBuf>, download_dir: Option<PathBuf>) -> Self {
        Self {
            local: LocalPathSource,
            mirror: mirror_root.map(MirrorSource::new),
            index: download_dir.map(IndexSource::new),
        }
    }

    pub fn resolve(&self, reference: &PackageRef) -> Result<ResolvedArtifact> {
        match reference.origin {
            Origin::LocalPath => self.local.resolve(reference),
            Origin::Mirror => self
                .mirror
                .as_ref()
                .ok_or_else(|| {
                    SiftError::location(reference.display_name(), "no mirror root configured")
                })?
                .resolve(reference),
            Origin::RemoteIndex => self
                .index
                .as_ref()
                .ok_or_else(|| {
                    SiftError::location(reference.display_name(), "no download dir configured")
                })?
                .resolve(reference),
        }
    }
}

/// SHA-256 of a file on disk, hex encoded.
pub fn file_sha256(path: &Path) -> Result<String> {
    let data = fs::read(path)?;
    Ok(hex::encode(Sha256::digest(&data)))
}

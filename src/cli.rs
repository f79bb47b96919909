//! Command-line surface. Kept thin: argument parsing and config loading
//! here, everything else in the engine.

use crate::config::ScanConfig;
use crate::error::{Result, SiftError};
use crate::output::OutputFormat;
use crate::types::PackageRef;
use clap::Parser;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Parser)]
#[command(name = "pysift", version, about = "Static risk scanner for Python packages")]
pub struct Cli {
    /// Packages to scan: filesystem paths, or name[==version] specs
    /// resolved against --mirror or --downloads
    #[arg(required = true, value_name = "PACKAGE")]
    pub targets: Vec<String>,

    /// Root of a local package mirror for name targets
    #[arg(long, value_name = "DIR")]
    pub mirror: Option<PathBuf>,

    /// Directory of pre-fetched index downloads for name targets
    #[arg(long, value_name = "DIR")]
    pub downloads: Option<PathBuf>,

    /// Engine configuration file (JSON)
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Report format
    #[arg(long, default_value = "text", value_name = "FORMAT")]
    pub format: OutputFormat,

    /// Drop findings below this score from reports
    #[arg(long, value_name = "SCORE")]
    pub min_score: Option<u32>,

    /// Scan packages one at a time instead of in parallel
    #[arg(long)]
    pub no_parallel: bool,

    /// Tight resource ceilings, for sweeping untrusted mirrors
    #[arg(long)]
    pub high_security: bool,
}

impl Cli {
    /// Effective engine configuration: file, then baseline, then flags.
    pub fn load_config(&self) -> Result<ScanConfig> {
        let mut config = match &self.config {
            Some(path) => {
                let text = fs::read_to_string(path).map_err(|e| {
                    SiftError::config(format!("cannot read config {}: {e}", path.display()))
                })?;
                serde_json::from_str(&text).map_err(|e| {
                    SiftError::config(format!("malformed config {}: {e}", path.display()))
                })?
            }
            None if self.high_security => ScanConfig::high_security(),
            None => ScanConfig::default(),
        };
        if let Some(score) = self.min_score {
            config.min_report_score = score;
        }
        if self.no_parallel {
            config.parallel = false;
        }
        config.validate()?;
        Ok(config)
    }

    /// Turn the positional targets into package references.
    pub fn resolve_targets(&self) -> Result<Vec<PackageRef>> {
        self.targets.iter().map(|t| self.parse_target(t)).collect()
    }

    fn parse_target(&self, target: &str) -> Result<PackageRef> {
        let path = Path::new(target);
        if path.exists() {
            return Ok(PackageRef::local(&package_name_from_path(path), path));
        }
        if self.mirror.is_some() {
            return Ok(PackageRef::mirror(target));
        }
        if self.downloads.is_some() {
            let (name, version) = match target.split_once("==") {
                Some((n, v)) => (n, Some(v)),
                None => (target, None),
            };
            return Ok(PackageRef::remote(name, version));
        }
        Err(SiftError::location(
            target,
            "not a local path, and neither --mirror nor --downloads is set",
        ))
    }
}

/// Guess the package name from an artifact path: the part of the file
/// stem before the version separator, or the directory name.
fn package_name_from_path(path: &Path) -> String {
    let stem = if path.is_dir() {
        path.file_name().map(|n| n.to_string_lossy().to_string())
    } else {
        path.file_name().map(|n| {
            let name = n.to_string_lossy();
            let name = name.strip_suffix(".tar.gz").unwrap_or(&name);
            Path::new(name).file_stem().map_or_else(|| name.to_string(), |s| s.to_string_lossy().to_string())
        })
    }
    .unwrap_or_else(|| "package".to_string());

    match stem.split_once('-') {
        Some((name, rest)) if rest.chars().next().is_some_and(|c| c.is_ascii_digit()) => {
            name.to_string()
        }
        _ => stem,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Origin;

    #[test]
    fn name_is_stripped_of_version_and_extension() {
        assert_eq!(package_name_from_path(Path::new("/x/requests-2.31.0.tar.gz")), "requests");
        assert_eq!(
            package_name_from_path(Path::new("/x/flask-3.0.0-py3-none-any.whl")),
            "flask"
        );
        assert_eq!(package_name_from_path(Path::new("/x/left-pad.whl")), "left-pad");
    }

    #[test]
    fn name_targets_need_a_source_flag() {
        let cli = Cli::parse_from(["pysift", "requests"]);
        assert!(cli.resolve_targets().is_err());

        let cli = Cli::parse_from(["pysift", "--mirror", "/srv/mirror", "requests"]);
        let refs = cli.resolve_targets().unwrap();
        assert_eq!(refs[0].origin, Origin::Mirror);
    }

    #[test]
    fn download_targets_split_version_specs() {
        let cli = Cli::parse_from(["pysift", "--downloads", "/tmp/dl", "requests==2.31.0"]);
        let refs = cli.resolve_targets().unwrap();
        assert_eq!(refs[0].origin, Origin::RemoteIndex);
        assert_eq!(refs[0].name, "requests");
        assert_eq!(refs[0].version.as_deref(), Some("2.31.0"));
    }

    #[test]
    fn flags_override_the_loaded_config() {
        let cli = Cli::parse_from(["pysift", "--min-score", "40", "--no-parallel", "x.whl"]);
        let config = cli.load_config().unwrap();
        assert_eq!(config.min_report_score, 40);
        assert!(!config.parallel);
    }

    #[test]
    fn high_security_flag_tightens_ceilings() {
        let cli = Cli::parse_from(["pysift", "--high-security", "x.whl"]);
        let config = cli.load_config().unwrap();
        assert!(config.limits.max_decompressed_size < crate::config::MAX_DECOMPRESSED_SIZE);
    }
}

//! pysift — static risk analysis for Python packages.
//!
//! Takes package references (remote index names, local mirror entries, or
//! plain paths), unpacks them under strict resource ceilings, runs a set
//! of independent analyzers over the extracted tree, and aggregates their
//! findings into a per-package risk score. Scanned code is never
//! executed; everything is derived from bytes, parse trees, and metadata.
//!
//! The typical embedding goes through [`pipeline::Engine`]:
//!
//! ```no_run
//! use pysift::config::ScanConfig;
//! use pysift::locator::ArtifactResolver;
//! use pysift::pipeline::Engine;
//! use pysift::types::PackageRef;
//!
//! # fn main() -> pysift::error::Result<()> {
//! let engine = Engine::new(ScanConfig::default(), ArtifactResolver::new(None, None))?;
//! let results = engine.scan_all(&[PackageRef::local("demo", "demo-1.0.tar.gz")]);
//! for result in &results {
//!     println!("{}: {}", result.reference.display_name(), result.score);
//! }
//! # Ok(())
//! # }
//! ```

pub mod analyzers;
pub mod cli;
pub mod config;
pub mod entropy;
pub mod error;
pub mod guard;
pub mod locator;
pub mod output;
pub mod pattern;
pub mod pipeline;
pub mod rules;
pub mod scoring;
pub mod types;
pub mod unpack;

pub use config::ScanConfig;
pub use error::{Result, SiftError};
pub use pipeline::Engine;
pub use types::{Finding, PackageRef, ScanResult, ScanStatus, Severity};

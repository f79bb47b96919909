use std::path::PathBuf;
use thiserror::Error;

/// pysift's error taxonomy. Only `Location` (per package) and `RuleLoad`
/// (at process start) are allowed to propagate out of the pipeline; every
/// other variant is demoted to a finding so a hostile package cannot abort
/// a batch run.
#[derive(Debug, Error)]
pub enum SiftError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("artifact unreachable: {reference}: {reason}")]
    Location { reference: String, reason: String },

    #[error("unpack failed for {path}: {reason}")]
    Unpack { path: String, reason: String },

    #[error("decompressed size limit exceeded: {used} + {requested} bytes > {limit} bytes")]
    SizeLimit { used: u64, requested: u64, limit: u64 },

    #[error("file too large: {size} bytes exceeds per-file limit of {limit} bytes")]
    FileTooLarge { size: u64, limit: u64 },

    #[error("package deadline exceeded after {elapsed_ms} ms (budget {budget_ms} ms)")]
    DeadlineExceeded { elapsed_ms: u64, budget_ms: u64 },

    #[error("could not parse source {path}: {reason}")]
    Parse { path: String, reason: String },

    #[error("analyzer '{analyzer}' failed on {path}: {reason}")]
    Analyzer { analyzer: String, path: String, reason: String },

    #[error("rule set loading failed: {message}")]
    RuleLoad { message: String },

    #[error("invalid path: {path}: {reason}")]
    InvalidPath { path: PathBuf, reason: String },

    #[error("configuration error: {message}")]
    Config { message: String },
}

pub type Result<T> = std::result::Result<T, SiftError>;

impl SiftError {
    pub fn location<S1: Into<String>, S2: Into<String>>(reference: S1, reason: S2) -> Self {
        Self::Location { reference: reference.into(), reason: reason.into() }
    }

    pub fn unpack<S1: Into<String>, S2: Into<String>>(path: S1, reason: S2) -> Self {
        Self::Unpack { path: path.into(), reason: reason.into() }
    }

    pub fn parse<S1: Into<String>, S2: Into<String>>(path: S1, reason: S2) -> Self {
        Self::Parse { path: path.into(), reason: reason.into() }
    }

    pub fn analyzer<S1: Into<String>, S2: Into<String>, S3: Into<String>>(
        analyzer: S1,
        path: S2,
        reason: S3,
    ) -> Self {
        Self::Analyzer { analyzer: analyzer.into(), path: path.into(), reason: reason.into() }
    }

    pub fn rule_load<S: Into<String>>(message: S) -> Self {
        Self::RuleLoad { message: message.into() }
    }

    pub fn invalid_path<P: Into<PathBuf>, S: Into<String>>(path: P, reason: S) -> Self {
        Self::InvalidPath { path: path.into(), reason: reason.into() }
    }

    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config { message: message.into() }
    }

    /// True if this error ends the whole package run (terminal `Failed`).
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Location { .. } | Self::RuleLoad { .. })
    }

    /// True if this error is a resource ceiling hit.
    pub fn is_resource_limit(&self) -> bool {
        matches!(
            self,
            Self::SizeLimit { .. } | Self::FileTooLarge { .. } | Self::DeadlineExceeded { .. }
        )
    }
}

//! Per-package resource guard.
//!
//! Every worker gets its own guard; counters are atomics so the guard can
//! be shared freely between the unpacker and analyzers of one package
//! without locking. Ceilings crossed here surface as `SiftError` values
//! that the pipeline turns into resource-limit findings.

use crate::config::ResourceLimits;
use crate::error::{Result, SiftError};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Instant;
use tracing::warn;

#[derive(Debug)]
pub struct ResourceGuard {
    limits: ResourceLimits,
    decompressed_bytes: AtomicU64,
    items_examined: AtomicUsize,
    started: Instant,
}

impl ResourceGuard {
    #[must_use]
    pub fn new(limits: ResourceLimits) -> Self {
        Self {
            limits,
            decompressed_bytes: AtomicU64::new(0),
            items_examined: AtomicUsize::new(0),
            started: Instant::now(),
        }
    }

    pub fn limits(&self) -> &ResourceLimits {
        &self.limits
    }

    /// Check a single file's declared size against the per-file ceiling
    /// without charging it.
    pub fn check_file_size(&self, size: u64) -> Result<()> {
        if size > self.limits.max_file_size {
            return Err(SiftError::FileTooLarge { size, limit: self.limits.max_file_size });
        }
        Ok(())
    }

    /// Reserve `bytes` of decompressed output. Fails before the cumulative
    /// ceiling would be crossed, so actual usage never exceeds the ceiling
    /// by more than one declared entry.
    pub fn charge(&self, bytes: u64) -> Result<()> {
        let used = self.decompressed_bytes.load(Ordering::Relaxed);
        if used.saturating_add(bytes) > self.limits.max_decompressed_size {
            warn!(used, requested = bytes, limit = self.limits.max_decompressed_size, "decompression budget exhausted");
            return Err(SiftError::SizeLimit {
                used,
                requested: bytes,
                limit: self.limits.max_decompressed_size,
            });
        }
        self.decompressed_bytes.fetch_add(bytes, Ordering::Relaxed);
        Ok(())
    }

    /// Fail once the package's wall-clock budget is spent.
    pub fn check_deadline(&self) -> Result<()> {
        let elapsed = self.started.elapsed();
        if elapsed > self.limits.timeout() {
            return Err(SiftError::DeadlineExceeded {
                elapsed_ms: elapsed.as_millis() as u64,
                budget_ms: self.limits.package_timeout_ms,
            });
        }
        Ok(())
    }

    pub fn record_item(&self) {
        self.items_examined.fetch_add(1, Ordering::Relaxed);
    }

    pub fn decompressed_bytes(&self) -> u64 {
        self.decompressed_bytes.load(Ordering::Relaxed)
    }

    pub fn items_examined(&self) -> usize {
        self.items_examined.load(Ordering::Relaxed)
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tiny_limits() -> ResourceLimits {
        ResourceLimits {
            max_file_size: 10,
            max_decompressed_size: 100,
            max_unpack_depth: 3,
            package_timeout_ms: 60_000,
        }
    }

    #[test]
    fn charge_stops_before_the_ceiling() {
        let guard = ResourceGuard::new(tiny_limits());
        assert!(guard.charge(60).is_ok());
        assert!(guard.charge(40).is_ok());
        // Exactly at the ceiling now; one more byte must fail.
        assert!(matches!(guard.charge(1), Err(SiftError::SizeLimit { .. })));
        assert_eq!(guard.decompressed_bytes(), 100);
    }

    #[test]
    fn per_file_ceiling_is_independent_of_budget() {
        let guard = ResourceGuard::new(tiny_limits());
        assert!(guard.check_file_size(10).is_ok());
        assert!(matches!(guard.check_file_size(11), Err(SiftError::FileTooLarge { .. })));
    }

    #[test]
    fn deadline_is_not_hit_immediately() {
        let guard = ResourceGuard::new(tiny_limits());
        assert!(guard.check_deadline().is_ok());
    }
}

//! Host statistics for computed sources.
//!
//! Each call builds its own `sysinfo::System`, so nothing is shared between
//! sampling loops that read these concurrently.

use crate::source::SourceError;
use sysinfo::System;

/// Percentage of physical memory in use, in `[0, 100]`.
pub fn memory_used_percent() -> Result<f64, SourceError> {
    let mut sys = System::new();
    sys.refresh_memory();
    used_percent(sys.total_memory(), sys.available_memory())
}

fn used_percent(total: u64, available: u64) -> Result<f64, SourceError> {
    if total == 0 {
        return Err(SourceError::Unavailable("total memory reported as 0".to_string()));
    }
    let free = available.min(total) as f64;
    Ok((1.0 - free / total as f64) * 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_used_percent() {
        assert_eq!(used_percent(100, 25).unwrap(), 75.0);
        assert_eq!(used_percent(100, 100).unwrap(), 0.0);
        // available larger than total is clamped
        assert_eq!(used_percent(100, 150).unwrap(), 0.0);
    }

    #[test]
    fn test_zero_total_is_unavailable() {
        assert!(matches!(
            used_percent(0, 0),
            Err(SourceError::Unavailable(_))
        ));
    }

    #[test]
    fn test_memory_used_percent_in_range() {
        if let Ok(pct) = memory_used_percent() {
            assert!((0.0..=100.0).contains(&pct));
        }
    }
}

//! Workflow execution engine.
//!
//! Leaf-first: `retry` and `circuit_breaker` protect single action calls,
//! `context` and `registry` hold per-execution state, `action` is the
//! handler seam, `step_executor` runs one step and `engine` drives a whole
//! definition.

pub mod action;
pub mod circuit_breaker;
pub mod context;
pub mod definition;
pub mod engine;
pub mod registry;
pub mod retry;
pub mod step_executor;

use std::time::Duration;

/// Whole milliseconds in `duration`, saturating at `u64::MAX`.
pub(crate) fn saturating_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_saturating_millis() {
        assert_eq!(saturating_millis(Duration::from_millis(1_500)), 1_500);
        assert_eq!(saturating_millis(Duration::MAX), u64::MAX);
    }
}

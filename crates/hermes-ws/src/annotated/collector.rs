//! Violation accumulator.

use parking_lot::Mutex;
use tracing::debug;

use crate::error::DeploymentError;

/// Gathers every violation found while deploying one endpoint.
///
/// Validation never stops at the first problem; callers add violations as
/// they find them and [`compose`](Self::compose) the result at the end.
#[derive(Debug, Default)]
pub struct ErrorCollector {
    violations: Mutex<Vec<String>>,
}

impl ErrorCollector {
    /// Create an empty collector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a violation.
    pub fn add(&self, violation: impl Into<String>) {
        let violation = violation.into();
        debug!(violation = %violation, "Deployment violation collected");
        self.violations.lock().push(violation);
    }

    /// Number of violations so far.
    pub fn len(&self) -> usize {
        self.violations.lock().len()
    }

    /// True when nothing was collected.
    pub fn is_empty(&self) -> bool {
        self.violations.lock().is_empty()
    }

    /// Collected violations, in order.
    pub fn violations(&self) -> Vec<String> {
        self.violations.lock().clone()
    }

    /// Combine everything collected into one error, or `None` when clean.
    pub fn compose(&self, endpoint: impl Into<String>) -> Option<DeploymentError> {
        let violations = self.violations.lock().clone();
        if violations.is_empty() {
            return None;
        }
        Some(DeploymentError {
            endpoint: endpoint.into(),
            violations,
        })
    }
}

//! Error reports consumed by `guardian.analyze-errors`.

use std::sync::{PoisonError, RwLock};

use serde::{Deserialize, Serialize};

/// Number of recorded errors per severity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeverityCounts {
    pub critical: u32,
    pub error: u32,
    pub warning: u32,
}

impl SeverityCounts {
    pub fn new(critical: u32, error: u32, warning: u32) -> Self {
        Self {
            critical,
            error,
            warning,
        }
    }

    pub fn total(&self) -> u32 {
        self.critical
            .saturating_add(self.error)
            .saturating_add(self.warning)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Critical,
    Error,
    Warning,
}

/// Where error reports are read from (an error log, a telemetry service).
pub trait ErrorSource: Send + Sync {
    fn severity_counts(&self) -> SeverityCounts;
}

/// Error source backed by in-process counters.
#[derive(Debug, Default)]
pub struct InMemoryErrorSource {
    counts: RwLock<SeverityCounts>,
}

impl InMemoryErrorSource {
    pub fn new(counts: SeverityCounts) -> Self {
        Self {
            counts: RwLock::new(counts),
        }
    }

    pub fn record(&self, severity: Severity) {
        let mut counts = self.counts.write().unwrap_or_else(PoisonError::into_inner);
        match severity {
            Severity::Critical => counts.critical = counts.critical.saturating_add(1),
            Severity::Error => counts.error = counts.error.saturating_add(1),
            Severity::Warning => counts.warning = counts.warning.saturating_add(1),
        }
    }

    pub fn reset(&self) {
        *self.counts.write().unwrap_or_else(PoisonError::into_inner) = SeverityCounts::default();
    }
}

impl ErrorSource for InMemoryErrorSource {
    fn severity_counts(&self) -> SeverityCounts {
        *self.counts.read().unwrap_or_else(PoisonError::into_inner)
    }
}

//! Canonical severity scale shared by every analyzer adapter.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Ordered severity scale. Comparison is by ordinal only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Severity {
    Informational,
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Numeric rank, `Informational = 0` through `Critical = 4`.
    pub fn ordinal(self) -> u8 {
        self as u8
    }

    /// Case-insensitive parse of an analyzer-native severity label.
    ///
    /// Unknown input defaults to `Low` with a logged warning, so a tool
    /// inventing a new label never drops a finding on the floor.
    pub fn parse(value: &str) -> Severity {
        match value.trim().to_ascii_lowercase().as_str() {
            "informational" | "info" | "note" => Severity::Informational,
            "low" => Severity::Low,
            "medium" => Severity::Medium,
            "high" => Severity::High,
            "critical" => Severity::Critical,
            other => {
                tracing::warn!("unknown severity label {other:?}, defaulting to Low");
                Severity::Low
            }
        }
    }

    /// True iff `self >= floor`.
    pub fn at_least(self, floor: Severity) -> bool {
        self >= floor
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Severity::Informational => "Informational",
            Severity::Low => "Low",
            Severity::Medium => "Medium",
            Severity::High => "High",
            Severity::Critical => "Critical",
        };
        f.write_str(label)
    }
}

//! Canonical finding record and fingerprint identity.

use crate::severity::Severity;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// A single issue reported by one analyzer, normalized into the shared shape.
///
/// `file` is a repository-relative POSIX path; `line` is 1-based with `0`
/// meaning "unknown / file-level".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Finding {
    /// Name of the producing adapter, e.g. `"slither"`.
    pub tool: String,
    /// Tool-native rule or detector identifier.
    #[serde(rename = "type")]
    pub kind: String,
    pub severity: Severity,
    /// Tool-reported confidence; informational only.
    pub confidence: String,
    /// Short human label.
    pub title: String,
    pub description: String,
    pub file: String,
    pub line: u32,
    /// The tool's original record, preserved for debugging.
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub raw: serde_json::Value,
}

impl Finding {
    /// Stable identity of a finding across runs: `tool|type|file|line`.
    ///
    /// The tool name is part of the identity on purpose: the same logical
    /// vulnerability surfaced by two analyzers is attributed independently.
    /// Pure function of the record, so two processes always agree.
    pub fn fingerprint(&self) -> String {
        format!("{}|{}|{}|{}", self.tool, self.kind, self.file, self.line)
    }
}

/// Deduplicate by fingerprint, keeping the first occurrence of each.
pub fn dedup_by_fingerprint(findings: Vec<Finding>) -> Vec<Finding> {
    let mut seen = HashSet::new();
    findings
        .into_iter()
        .filter(|f| seen.insert(f.fingerprint()))
        .collect()
}

/// Keep only findings at or above the severity floor.
pub fn filter_by_severity(findings: Vec<Finding>, min_severity: Severity) -> Vec<Finding> {
    findings
        .into_iter()
        .filter(|f| {
            let keep = f.severity.at_least(min_severity);
            if !keep {
                tracing::debug!(tool = %f.tool, kind = %f.kind, severity = %f.severity,
                    "filtering finding below severity floor");
            }
            keep
        })
        .collect()
}

/// Findings whose fingerprint is not present in the baseline set.
pub fn new_since_baseline(findings: Vec<Finding>, baseline: &HashSet<String>) -> Vec<Finding> {
    findings
        .into_iter()
        .filter(|f| !baseline.contains(&f.fingerprint()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn finding(tool: &str, kind: &str, file: &str, line: u32, severity: Severity) -> Finding {
        Finding {
            tool: tool.to_string(),
            kind: kind.to_string(),
            severity,
            confidence: "Medium".to_string(),
            title: kind.to_string(),
            description: format!("{kind} in {file}"),
            file: file.to_string(),
            line,
            raw: serde_json::Value::Null,
        }
    }

    #[test]
    fn test_fingerprint_format() {
        let f = finding("slither", "reentrancy", "contracts/Vault.sol", 42, Severity::High);
        assert_eq!(f.fingerprint(), "slither|reentrancy|contracts/Vault.sol|42");
    }

    #[test]
    fn test_fingerprint_deterministic() {
        let f = finding("mythril", "unchecked-call", "contracts/Vault.sol", 55, Severity::Medium);
        assert_eq!(f.fingerprint(), f.fingerprint());
        assert_eq!(f.clone().fingerprint(), f.fingerprint());
    }

    #[test]
    fn test_fingerprint_distinguishes_tools() {
        let a = finding("slither", "reentrancy", "a.sol", 1, Severity::High);
        let b = finding("mythril", "reentrancy", "a.sol", 1, Severity::High);
        assert_ne!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn test_dedup_keeps_first_occurrence() {
        let xs = vec![
            finding("slither", "a", "x.sol", 1, Severity::High),
            finding("slither", "b", "x.sol", 2, Severity::Low),
            finding("slither", "a", "x.sol", 1, Severity::Medium),
        ];
        let out = dedup_by_fingerprint(xs);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].kind, "a");
        // The first occurrence wins, including its severity.
        assert_eq!(out[0].severity, Severity::High);
        assert_eq!(out[1].kind, "b");
    }

    #[test]
    fn test_dedup_idempotent() {
        let xs = vec![
            finding("slither", "a", "x.sol", 1, Severity::High),
            finding("mythril", "b", "y.sol", 2, Severity::Low),
        ];
        let mut doubled = xs.clone();
        doubled.extend(xs.clone());

        let once = dedup_by_fingerprint(doubled);
        let fingerprints: Vec<_> = once.iter().map(Finding::fingerprint).collect();
        let twice = dedup_by_fingerprint(once);
        assert_eq!(
            twice.iter().map(Finding::fingerprint).collect::<Vec<_>>(),
            fingerprints
        );
        assert_eq!(twice.len(), xs.len());
    }

    #[test]
    fn test_severity_filter_monotone() {
        let xs = vec![
            finding("slither", "a", "x.sol", 1, Severity::Informational),
            finding("slither", "b", "x.sol", 2, Severity::Low),
            finding("slither", "c", "x.sol", 3, Severity::Medium),
            finding("slither", "d", "x.sol", 4, Severity::Critical),
        ];
        let at_high = filter_by_severity(xs.clone(), Severity::High);
        let at_low = filter_by_severity(xs, Severity::Low);
        // filter(F, t) ⊆ filter(F, s) for s ≤ t
        for f in &at_high {
            assert!(at_low.iter().any(|g| g.fingerprint() == f.fingerprint()));
        }
        assert_eq!(at_high.len(), 1);
        assert_eq!(at_low.len(), 3);
    }

    #[test]
    fn test_new_since_baseline() {
        let f1 = finding("slither", "reentrancy", "contracts/Vault.sol", 42, Severity::High);
        let f2 = finding("mythril", "unchecked-call", "contracts/Vault.sol", 55, Severity::Medium);
        let baseline: HashSet<String> = [f1.fingerprint()].into_iter().collect();

        let new = new_since_baseline(vec![f1, f2.clone()], &baseline);
        assert_eq!(new.len(), 1);
        assert_eq!(new[0].fingerprint(), f2.fingerprint());
    }

    #[test]
    fn test_serde_uses_type_key() {
        let f = finding("slither", "reentrancy", "a.sol", 1, Severity::High);
        let json = serde_json::to_value(&f).unwrap();
        assert_eq!(json["type"], "reentrancy");
        assert!(json.get("kind").is_none());
        let back: Finding = serde_json::from_value(json).unwrap();
        assert_eq!(back.kind, "reentrancy");
    }
}

//! Mythril adapter: symbolic execution over EVM bytecode.

use crate::{
    existing_files, map_severity, run_command, Analyzer, ToolError, ToolResult, ToolRun,
    DEFAULT_TOOL_TIMEOUT_SECS,
};
use apc_core::{filter_by_severity, Finding, ScanConfig, Severity};
use async_trait::async_trait;
use std::path::Path;

const REPORT_FILE: &str = "mythril_report.json";

/// Execution-depth bound. Deeper exploration finds more paths but runtime
/// grows quickly; depth 3 keeps a scan to tens of seconds.
const MAX_DEPTH: &str = "3";

const SEVERITY_MAP: &[(&str, Severity)] = &[
    ("high", Severity::High),
    ("medium", Severity::Medium),
    ("low", Severity::Low),
];

#[derive(Debug, Default)]
pub struct MythrilAnalyzer;

impl MythrilAnalyzer {
    pub fn new() -> Self {
        MythrilAnalyzer
    }
}

#[async_trait]
impl Analyzer for MythrilAnalyzer {
    fn name(&self) -> &'static str {
        "mythril"
    }

    fn binary(&self) -> &'static str {
        "myth"
    }

    fn default_severity_map(&self) -> &'static [(&'static str, Severity)] {
        SEVERITY_MAP
    }

    async fn run(
        &self,
        repo_root: &Path,
        files: Option<&[String]>,
        config: &ScanConfig,
    ) -> ToolResult<ToolRun> {
        tracing::info!("starting mythril scan of {}", repo_root.display());

        if matches!(files, Some(list) if list.is_empty()) {
            tracing::info!("no candidate files for mythril, skipping");
            return Ok(ToolRun::default());
        }

        let targets: Vec<String> = match files {
            Some(list) => existing_files(repo_root, list),
            None => Vec::new(),
        };

        let mut args: Vec<&str> = vec!["analyze"];
        if targets.is_empty() {
            args.push(".");
        } else {
            args.extend(targets.iter().map(String::as_str));
        }
        args.extend(["--max-depth", MAX_DEPTH, "-o", "json"]);

        let output = run_command(
            self.name(),
            self.binary(),
            &args,
            repo_root,
            DEFAULT_TOOL_TIMEOUT_SECS,
        )
        .await?;

        // An entirely silent run means no issues; stderr-only output means
        // the tool died before analyzing anything.
        if output.stdout.trim().is_empty() {
            if output.stderr.trim().is_empty() {
                tracing::info!("mythril produced no output: no issues found");
                return Ok(ToolRun::default());
            }
            return Err(ToolError::ExecutionFailed {
                tool: self.name().to_string(),
                detail: output.stderr.trim().to_string(),
            });
        }

        let report: serde_json::Value = match serde_json::from_str(&output.stdout) {
            Ok(report) => report,
            // Some mythril builds write the report to disk instead of stdout.
            Err(_) => match std::fs::read_to_string(repo_root.join(REPORT_FILE))
                .ok()
                .and_then(|raw| serde_json::from_str(&raw).ok())
            {
                Some(report) => report,
                None => {
                    return Err(ToolError::Parse {
                        tool: self.name().to_string(),
                        detail: format!(
                            "output was not valid JSON (exit code {}): {}",
                            output.code,
                            output.stderr.trim()
                        ),
                    })
                }
            },
        };

        let findings = parse_report(&report, &targets, config.min_severity);
        tracing::info!(
            "mythril found {} finding(s) at or above {}",
            findings.len(),
            config.min_severity
        );
        Ok(ToolRun {
            findings,
            logs: Vec::new(),
        })
    }
}

/// Map a mythril JSON report to canonical findings.
///
/// Mythril does not attribute issues to files, so attribution falls back to
/// the scanned file list: a single target claims every issue, multiple
/// targets are matched by contract name.
fn parse_report(
    report: &serde_json::Value,
    scanned_files: &[String],
    min_severity: Severity,
) -> Vec<Finding> {
    let issues = match report.get("issues").and_then(serde_json::Value::as_array) {
        Some(issues) => issues,
        None => return Vec::new(),
    };

    let findings = issues
        .iter()
        .map(|issue| {
            let native = issue.get("severity").and_then(|v| v.as_str()).unwrap_or("");
            let title = issue
                .get("title")
                .and_then(|v| v.as_str())
                .unwrap_or("unknown")
                .to_string();
            let source_map = issue.get("sourceMap").and_then(|v| v.as_str()).unwrap_or("");

            Finding {
                tool: "mythril".to_string(),
                kind: title.clone(),
                severity: map_severity(SEVERITY_MAP, native, Severity::Informational),
                confidence: issue
                    .get("confidence")
                    .and_then(|v| v.as_str())
                    .unwrap_or("Medium")
                    .to_string(),
                title,
                description: issue
                    .get("description")
                    .and_then(|v| v.as_str())
                    .unwrap_or("No description")
                    .to_string(),
                file: attribute_file(issue, scanned_files),
                line: estimate_line(source_map),
                raw: issue.clone(),
            }
        })
        .collect();

    filter_by_severity(findings, min_severity)
}

fn attribute_file(issue: &serde_json::Value, scanned_files: &[String]) -> String {
    match scanned_files {
        [] => String::new(),
        [only] => only.clone(),
        many => {
            let contract = issue
                .get("contract")
                .and_then(|v| v.as_str())
                .unwrap_or("")
                .to_ascii_lowercase();
            many.iter()
                .find(|file| !contract.is_empty() && file.to_ascii_lowercase().contains(&contract))
                .unwrap_or(&many[0])
                .clone()
        }
    }
}

/// Rough line estimate from a Solidity source map (`offset:length:index`).
///
/// The byte offset divided by ~40 chars per line is imprecise but far more
/// useful in a report than 0.
fn estimate_line(source_map: &str) -> u32 {
    let offset: u32 = source_map
        .split(':')
        .next()
        .and_then(|part| part.parse().ok())
        .unwrap_or(0);
    if offset == 0 {
        0
    } else {
        (offset / 40).max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_report() -> serde_json::Value {
        json!({
            "error": null,
            "success": true,
            "issues": [
                {
                    "title": "Unchecked Call Return Value",
                    "severity": "Medium",
                    "confidence": "High",
                    "contract": "Vault",
                    "description": "The return value of a message call is not checked.",
                    "sourceMap": "2200:42:0"
                },
                {
                    "title": "Integer Overflow",
                    "severity": "Unknown",
                    "description": "Possible overflow.",
                    "sourceMap": ""
                }
            ]
        })
    }

    #[test]
    fn test_parse_report_maps_fields() {
        let files = vec!["contracts/Vault.sol".to_string()];
        let findings = parse_report(&sample_report(), &files, Severity::Informational);
        assert_eq!(findings.len(), 2);
        assert_eq!(findings[0].tool, "mythril");
        assert_eq!(findings[0].severity, Severity::Medium);
        assert_eq!(findings[0].file, "contracts/Vault.sol");
        assert_eq!(findings[0].line, 2200 / 40);
        // Unknown native severities degrade to Informational.
        assert_eq!(findings[1].severity, Severity::Informational);
        assert_eq!(findings[1].line, 0);
    }

    #[test]
    fn test_parse_report_applies_severity_floor() {
        let files = vec!["contracts/Vault.sol".to_string()];
        let findings = parse_report(&sample_report(), &files, Severity::Low);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].kind, "Unchecked Call Return Value");
    }

    #[test]
    fn test_attribute_file_matches_contract_name() {
        let files = vec![
            "contracts/Token.sol".to_string(),
            "contracts/Vault.sol".to_string(),
        ];
        let issue = json!({"contract": "Vault"});
        assert_eq!(attribute_file(&issue, &files), "contracts/Vault.sol");

        let unattributed = json!({});
        assert_eq!(attribute_file(&unattributed, &files), "contracts/Token.sol");
    }

    #[test]
    fn test_estimate_line() {
        assert_eq!(estimate_line("2200:42:0"), 55);
        assert_eq!(estimate_line("10:5:0"), 1);
        assert_eq!(estimate_line(""), 0);
        assert_eq!(estimate_line("garbage"), 0);
    }
}

//! Aderyn adapter: comprehensive whole-tree analysis.
//!
//! Aderyn is invoked once per repository and ignores the changed-file list;
//! it is also the slowest tool, so it gets the long timeout. Minimal
//! deployments may not install it at all, in which case the unified scanner
//! skips it.

use crate::{map_severity, run_command, Analyzer, ToolError, ToolResult, ToolRun};
use apc_core::{filter_by_severity, Finding, ScanConfig, Severity};
use async_trait::async_trait;
use std::path::Path;

const REPORT_FILE: &str = "aderyn_report.json";
const ADERYN_TIMEOUT_SECS: u64 = 600;

const SEVERITY_MAP: &[(&str, Severity)] = &[
    ("critical", Severity::Critical),
    ("high", Severity::High),
    ("medium", Severity::Medium),
    ("low", Severity::Low),
    ("info", Severity::Low),
    ("informational", Severity::Low),
];

#[derive(Debug, Default)]
pub struct AderynAnalyzer;

impl AderynAnalyzer {
    pub fn new() -> Self {
        AderynAnalyzer
    }
}

#[async_trait]
impl Analyzer for AderynAnalyzer {
    fn name(&self) -> &'static str {
        "aderyn"
    }

    fn binary(&self) -> &'static str {
        "aderyn"
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
        tracing::info!("starting aderyn scan of {}", repo_root.display());
        if files.is_some() {
            tracing::debug!("aderyn scans the whole tree, candidate list ignored");
        }

        let output = run_command(
            self.name(),
            self.binary(),
            &[".", "-o", REPORT_FILE],
            repo_root,
            ADERYN_TIMEOUT_SECS,
        )
        .await?;

        let report_path = repo_root.join(REPORT_FILE);
        let report: serde_json::Value = match serde_json::from_str(&output.stdout) {
            Ok(report) => report,
            Err(_) => match std::fs::read_to_string(&report_path)
                .ok()
                .and_then(|raw| serde_json::from_str(&raw).ok())
            {
                Some(report) => report,
                None if output.code != 0 => {
                    return Err(ToolError::ExecutionFailed {
                        tool: self.name().to_string(),
                        detail: format!(
                            "exit code {} with no readable report: {}",
                            output.code,
                            output.stderr.trim()
                        ),
                    })
                }
                // A clean exit with no report means the tool had nothing to
                // say about this tree.
                None => {
                    tracing::info!("aderyn produced no report: no issues found");
                    return Ok(ToolRun::default());
                }
            },
        };

        let findings = parse_report(&report, repo_root, config.min_severity);
        tracing::info!(
            "aderyn found {} finding(s) at or above {}",
            findings.len(),
            config.min_severity
        );
        Ok(ToolRun {
            findings,
            logs: vec![report_path],
        })
    }
}

fn parse_report(
    report: &serde_json::Value,
    repo_root: &Path,
    min_severity: Severity,
) -> Vec<Finding> {
    let issues = match report.get("issues").and_then(serde_json::Value::as_array) {
        Some(issues) => issues,
        None => return Vec::new(),
    };

    let findings = issues
        .iter()
        .map(|issue| {
            let title = issue
                .get("title")
                .or_else(|| issue.get("name"))
                .and_then(|v| v.as_str())
                .unwrap_or("unknown")
                .to_string();
            let native = issue.get("severity").and_then(|v| v.as_str()).unwrap_or("low");
            let file = issue
                .get("file")
                .and_then(|v| v.as_str())
                .map(|p| crate::normalize_path(p, repo_root))
                .unwrap_or_default();

            Finding {
                tool: "aderyn".to_string(),
                kind: title.clone(),
                severity: map_severity(SEVERITY_MAP, native, Severity::Low),
                confidence: issue
                    .get("confidence")
                    .and_then(|v| v.as_str())
                    .unwrap_or("Unknown")
                    .to_string(),
                title,
                description: issue
                    .get("description")
                    .and_then(|v| v.as_str())
                    .unwrap_or("")
                    .to_string(),
                file,
                line: issue
                    .get("line")
                    .and_then(serde_json::Value::as_u64)
                    .unwrap_or(0) as u32,
                raw: issue.clone(),
            }
        })
        .collect();

    filter_by_severity(findings, min_severity)
}

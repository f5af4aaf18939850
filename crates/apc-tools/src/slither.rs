//! Slither adapter: fast AST-pattern analysis over Solidity sources.

use crate::{
    existing_files, map_severity, run_command, Analyzer, ToolError, ToolResult, ToolRun,
    DEFAULT_TOOL_TIMEOUT_SECS,
};
use apc_core::{filter_by_severity, Finding, ScanConfig, Severity};
use async_trait::async_trait;
use std::path::Path;

const REPORT_FILE: &str = "slither_report.json";
const SOLC_VERSION: &str = "0.8.20";

const SEVERITY_MAP: &[(&str, Severity)] = &[
    ("high", Severity::High),
    ("medium", Severity::Medium),
    ("low", Severity::Low),
    ("informational", Severity::Informational),
    ("optimization", Severity::Informational),
];

#[derive(Debug, Default)]
pub struct SlitherAnalyzer;

impl SlitherAnalyzer {
    pub fn new() -> Self {
        SlitherAnalyzer
    }

    /// Best-effort pin of the solc version slither will compile with. The
    /// toolchain is assumed pre-provisioned, so any failure here is only a
    /// warning.
    async fn select_solc(&self, repo_root: &Path) {
        if which::which("solc-select").is_err() {
            tracing::warn!("solc-select not installed, using whatever solc is active");
            return;
        }
        match run_command("slither", "solc-select", &["use", SOLC_VERSION], repo_root, 60).await {
            Ok(output) if output.code == 0 => {
                tracing::debug!("solc version set to {SOLC_VERSION}");
            }
            Ok(output) => {
                tracing::warn!("could not set solc version: {}", output.stderr.trim());
            }
            Err(err) => {
                tracing::warn!("could not set solc version: {err}");
            }
        }
    }
}

#[async_trait]
impl Analyzer for SlitherAnalyzer {
    fn name(&self) -> &'static str {
        "slither"
    }

    fn binary(&self) -> &'static str {
        "slither"
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
        tracing::info!("starting slither scan of {}", repo_root.display());

        // A filtered list that exists but is empty means there is nothing in
        // scope for this adapter.
        if matches!(files, Some(list) if list.is_empty()) {
            tracing::info!("no candidate files for slither, skipping");
            return Ok(ToolRun::default());
        }

        let targets = match files {
            Some(list) => {
                let present = existing_files(repo_root, list);
                if present.is_empty() {
                    tracing::warn!(
                        "none of the candidate files exist on disk, falling back to full scan"
                    );
                    None
                } else {
                    Some(present)
                }
            }
            None => None,
        };

        self.select_solc(repo_root).await;

        let mut args: Vec<&str> = Vec::new();
        match &targets {
            Some(present) => args.extend(present.iter().map(String::as_str)),
            None => args.push("."),
        }
        args.extend(["--json", REPORT_FILE]);

        // Slither signals findings through its exit code, so success is
        // judged by whether it produced a readable report.
        let output = run_command(
            self.name(),
            self.binary(),
            &args,
            repo_root,
            DEFAULT_TOOL_TIMEOUT_SECS,
        )
        .await?;

        let report_path = repo_root.join(REPORT_FILE);
        let report: serde_json::Value = match std::fs::read_to_string(&report_path)
            .map_err(|err| err.to_string())
            .and_then(|raw| serde_json::from_str(&raw).map_err(|err| err.to_string()))
        {
            Ok(report) => report,
            Err(parse_err) => {
                let detail = if output.stderr.trim().is_empty() {
                    format!(
                        "exit code {} and no readable report ({parse_err})",
                        output.code
                    )
                } else {
                    output.stderr.trim().to_string()
                };
                return Err(ToolError::ExecutionFailed {
                    tool: self.name().to_string(),
                    detail,
                });
            }
        };

        let findings = parse_report(&report, repo_root, config.min_severity);
        tracing::info!(
            "slither found {} finding(s) at or above {}",
            findings.len(),
            config.min_severity
        );
        Ok(ToolRun {
            findings,
            logs: vec![report_path],
        })
    }
}

/// Map a slither JSON report to canonical findings, applying the severity
/// floor. A report without detector results is treated as clean.
fn parse_report(
    report: &serde_json::Value,
    repo_root: &Path,
    min_severity: Severity,
) -> Vec<Finding> {
    let detectors = match report
        .get("success")
        .and_then(serde_json::Value::as_bool)
        .unwrap_or(false)
        .then(|| report.pointer("/results/detectors"))
        .flatten()
        .and_then(serde_json::Value::as_array)
    {
        Some(detectors) => detectors,
        None => {
            tracing::warn!("slither report is empty or indicates failure");
            return Vec::new();
        }
    };

    let findings = detectors
        .iter()
        .map(|issue| {
            let impact = issue.get("impact").and_then(|v| v.as_str()).unwrap_or("Informational");
            let check = issue
                .get("check")
                .and_then(|v| v.as_str())
                .unwrap_or("unknown")
                .to_string();
            let element = issue
                .pointer("/elements/0/source_mapping")
                .cloned()
                .unwrap_or(serde_json::Value::Null);
            let file = element
                .get("filename_relative")
                .and_then(|v| v.as_str())
                .map(|p| crate::normalize_path(p, repo_root))
                .unwrap_or_default();
            let line = element
                .pointer("/lines/0")
                .and_then(serde_json::Value::as_u64)
                .unwrap_or(0) as u32;

            Finding {
                tool: "slither".to_string(),
                kind: check.clone(),
                severity: map_severity(SEVERITY_MAP, impact, Severity::Informational),
                confidence: issue
                    .get("confidence")
                    .and_then(|v| v.as_str())
                    .unwrap_or("Low")
                    .to_string(),
                title: check,
                description: issue
                    .get("description")
                    .and_then(|v| v.as_str())
                    .unwrap_or("No description")
                    .to_string(),
                file,
                line,
                raw: issue.clone(),
            }
        })
        .collect();

    filter_by_severity(findings, min_severity)
}

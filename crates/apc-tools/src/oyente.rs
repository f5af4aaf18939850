//! Oyente adapter: per-file bytecode-pattern analysis.

use crate::{
    map_severity, run_command, Analyzer, ToolError, ToolResult, ToolRun,
    DEFAULT_TOOL_TIMEOUT_SECS,
};
use apc_core::{filter_by_severity, Finding, ScanConfig, Severity};
use async_trait::async_trait;
use std::path::Path;
use walkdir::WalkDir;

const SEVERITY_MAP: &[(&str, Severity)] = &[
    ("critical", Severity::Critical),
    ("high", Severity::High),
    ("medium", Severity::Medium),
    ("warning", Severity::Medium),
    ("low", Severity::Low),
    ("informational", Severity::Low),
    ("info", Severity::Low),
    ("note", Severity::Low),
];

#[derive(Debug, Default)]
pub struct OyenteAnalyzer;

impl OyenteAnalyzer {
    pub fn new() -> Self {
        OyenteAnalyzer
    }

    async fn scan_file(&self, repo_root: &Path, file: &str) -> ToolResult<Vec<Finding>> {
        let output = run_command(
            self.name(),
            self.binary(),
            &["-s", file, "-j"],
            repo_root,
            DEFAULT_TOOL_TIMEOUT_SECS,
        )
        .await?;

        if output.stdout.trim().is_empty() {
            if output.code != 0 {
                tracing::warn!(
                    "oyente exited with code {} on {file}: {}",
                    output.code,
                    output.stderr.trim()
                );
            }
            return Ok(Vec::new());
        }

        let report: serde_json::Value = match serde_json::from_str(&output.stdout) {
            Ok(report) => report,
            Err(err) => {
                tracing::warn!("oyente output for {file} is not valid JSON: {err}");
                return Ok(Vec::new());
            }
        };

        Ok(parse_issues(&report, file))
    }
}

#[async_trait]
impl Analyzer for OyenteAnalyzer {
    fn name(&self) -> &'static str {
        "oyente"
    }

    fn binary(&self) -> &'static str {
        "oyente"
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
        tracing::info!("starting oyente scan of {}", repo_root.display());

        let targets = match files {
            Some(list) => list.to_vec(),
            None => discover_solidity_files(repo_root),
        };
        if targets.is_empty() {
            tracing::warn!("no Solidity files for oyente to scan");
            return Ok(ToolRun::default());
        }

        let mut findings = Vec::new();
        for file in &targets {
            if !repo_root.join(file).is_file() {
                tracing::warn!("file not found, skipping: {file}");
                continue;
            }
            // Each file invocation is independent; one broken contract must
            // not abort the rest. A missing binary is different: nothing
            // later can succeed, so that propagates.
            match self.scan_file(repo_root, file).await {
                Ok(file_findings) => findings.extend(file_findings),
                Err(err @ ToolError::NotFound(_)) => return Err(err),
                Err(err) => {
                    tracing::error!("oyente failed on {file}: {err}");
                }
            }
        }

        let findings = filter_by_severity(findings, config.min_severity);
        tracing::info!(
            "oyente found {} finding(s) at or above {}",
            findings.len(),
            config.min_severity
        );
        Ok(ToolRun {
            findings,
            logs: Vec::new(),
        })
    }
}

/// Solidity files under `repo_root`, skipping hidden directories and vendored
/// dependencies. Used for full-tree (baseline) scans.
fn discover_solidity_files(repo_root: &Path) -> Vec<String> {
    WalkDir::new(repo_root)
        .into_iter()
        .filter_entry(|entry| {
            if entry.depth() == 0 {
                return true;
            }
            let name = entry.file_name().to_string_lossy();
            !(entry.file_type().is_dir() && (name.starts_with('.') || name == "node_modules"))
        })
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| entry.path().extension().is_some_and(|ext| ext == "sol"))
        .filter_map(|entry| {
            entry
                .path()
                .strip_prefix(repo_root)
                .ok()
                .map(|rel| rel.to_string_lossy().replace('\\', "/"))
        })
        .collect()
}

fn parse_issues(report: &serde_json::Value, file: &str) -> Vec<Finding> {
    let issues = match report.get("issues").and_then(serde_json::Value::as_array) {
        Some(issues) => issues,
        None => return Vec::new(),
    };

    issues
        .iter()
        .map(|issue| {
            let title = issue
                .get("title")
                .or_else(|| issue.get("name"))
                .and_then(|v| v.as_str())
                .unwrap_or("unknown")
                .to_string();
            let native = issue.get("severity").and_then(|v| v.as_str()).unwrap_or("low");

            Finding {
                tool: "oyente".to_string(),
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
                file: file.to_string(),
                line: issue
                    .get("line")
                    .and_then(serde_json::Value::as_u64)
                    .unwrap_or(0) as u32,
                raw: issue.clone(),
            }
        })
        .collect()
}

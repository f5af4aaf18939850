//! Multi-tool scanner: runs every enabled adapter over one workspace and
//! aggregates their findings into a single deduplicated list.

use crate::aderyn::AderynAnalyzer;
use crate::mythril::MythrilAnalyzer;
use crate::oyente::OyenteAnalyzer;
use crate::slither::SlitherAnalyzer;
use crate::{Analyzer, ToolError, ToolResult};
use apc_core::{dedup_by_fingerprint, Finding, ScanConfig};
use std::fmt::Write as _;
use std::path::Path;
use std::time::Instant;

/// Aggregates findings from all enabled analyzers.
///
/// Adapters run sequentially in declared order; one failing adapter is
/// logged and the rest still run. Instantiated per job, never shared.
pub struct UnifiedScanner {
    analyzers: Vec<Box<dyn Analyzer>>,
}

impl UnifiedScanner {
    /// Build the adapter set from the manifest's `enabled_tools`.
    pub fn from_config(config: &ScanConfig) -> Self {
        let mut analyzers: Vec<Box<dyn Analyzer>> = Vec::new();
        if config.is_tool_enabled("slither") {
            analyzers.push(Box::new(SlitherAnalyzer::new()));
        }
        if config.is_tool_enabled("mythril") {
            analyzers.push(Box::new(MythrilAnalyzer::new()));
        }
        if config.is_tool_enabled("oyente") {
            analyzers.push(Box::new(OyenteAnalyzer::new()));
        }
        if config.is_tool_enabled("aderyn") {
            analyzers.push(Box::new(AderynAnalyzer::new()));
        }
        tracing::info!("unified scanner initialized with {} tool(s)", analyzers.len());
        Self { analyzers }
    }

    /// Build a scanner over an explicit adapter set.
    pub fn with_analyzers(analyzers: Vec<Box<dyn Analyzer>>) -> Self {
        Self { analyzers }
    }

    /// Run every adapter and return the deduplicated aggregate.
    ///
    /// Individual tool failures are isolated here; if every adapter fails
    /// the result is an empty list with a warning, not an error. An error
    /// from this function means the scanner itself could not operate.
    pub async fn run(
        &self,
        repo_root: &Path,
        files: Option<&[String]>,
        config: &ScanConfig,
    ) -> ToolResult<Vec<Finding>> {
        if !repo_root.is_dir() {
            return Err(ToolError::Internal(format!(
                "scan root {} is not a directory",
                repo_root.display()
            )));
        }

        let total_start = Instant::now();
        let mut all_findings = Vec::new();
        let mut timing = String::new();
        let mut succeeded = 0usize;

        for analyzer in &self.analyzers {
            let name = analyzer.name();
            if !analyzer.is_available() {
                tracing::warn!("{name} binary not installed, skipping");
                continue;
            }

            let start = Instant::now();
            match analyzer.run(repo_root, files, config).await {
                Ok(run) => {
                    succeeded += 1;
                    tracing::info!("{name} completed with {} finding(s)", run.findings.len());
                    for log in &run.logs {
                        tracing::debug!("{name} artifact: {}", log.display());
                    }
                    all_findings.extend(run.findings);
                }
                Err(err) => {
                    tracing::error!("{name} scan failed: {err}");
                }
            }
            let _ = write!(timing, "{name}={:.1}s ", start.elapsed().as_secs_f64());
        }

        if succeeded == 0 && !self.analyzers.is_empty() {
            tracing::warn!("no analyzer produced results for this scan");
        }

        let findings = dedup_by_fingerprint(all_findings);
        tracing::info!(
            "scan timing: {}total={:.1}s, {} unique finding(s)",
            timing,
            total_start.elapsed().as_secs_f64(),
            findings.len()
        );
        Ok(findings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ToolRun;
    use apc_core::Severity;
    use async_trait::async_trait;

    struct FakeAnalyzer {
        name: &'static str,
        outcome: Result<Vec<Finding>, &'static str>,
    }

    fn fake_finding(tool: &str, kind: &str, line: u32) -> Finding {
        Finding {
            tool: tool.to_string(),
            kind: kind.to_string(),
            severity: Severity::High,
            confidence: "High".to_string(),
            title: kind.to_string(),
            description: String::new(),
            file: "contracts/Vault.sol".to_string(),
            line,
            raw: serde_json::Value::Null,
        }
    }

    #[async_trait]
    impl Analyzer for FakeAnalyzer {
        fn name(&self) -> &'static str {
            self.name
        }

        fn binary(&self) -> &'static str {
            self.name
        }

        fn default_severity_map(&self) -> &'static [(&'static str, Severity)] {
            &[]
        }

        fn is_available(&self) -> bool {
            true
        }

        async fn run(
            &self,
            _repo_root: &Path,
            _files: Option<&[String]>,
            _config: &ScanConfig,
        ) -> ToolResult<ToolRun> {
            match &self.outcome {
                Ok(findings) => Ok(ToolRun {
                    findings: findings.clone(),
                    logs: Vec::new(),
                }),
                Err(detail) => Err(ToolError::ExecutionFailed {
                    tool: self.name.to_string(),
                    detail: detail.to_string(),
                }),
            }
        }
    }

    #[tokio::test]
    async fn test_failing_adapter_is_isolated() {
        let dir = tempfile::tempdir().unwrap();
        let scanner = UnifiedScanner::with_analyzers(vec![
            Box::new(FakeAnalyzer {
                name: "broken",
                outcome: Err("compiler exploded"),
            }),
            Box::new(FakeAnalyzer {
                name: "fine",
                outcome: Ok(vec![fake_finding("fine", "reentrancy", 42)]),
            }),
        ]);

        let findings = scanner
            .run(dir.path(), None, &ScanConfig::default())
            .await
            .unwrap();
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].tool, "fine");
    }

    #[tokio::test]
    async fn test_aggregate_is_deduplicated_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let scanner = UnifiedScanner::with_analyzers(vec![
            Box::new(FakeAnalyzer {
                name: "first",
                outcome: Ok(vec![
                    fake_finding("shared", "reentrancy", 42),
                    fake_finding("first", "tx-origin", 7),
                ]),
            }),
            Box::new(FakeAnalyzer {
                name: "second",
                outcome: Ok(vec![
                    fake_finding("shared", "reentrancy", 42),
                    fake_finding("second", "unchecked-call", 55),
                ]),
            }),
        ]);

        let findings = scanner
            .run(dir.path(), None, &ScanConfig::default())
            .await
            .unwrap();
        let kinds: Vec<_> = findings.iter().map(|f| f.kind.as_str()).collect();
        assert_eq!(kinds, vec!["reentrancy", "tx-origin", "unchecked-call"]);
    }

    #[tokio::test]
    async fn test_all_adapters_failing_yields_empty() {
        let dir = tempfile::tempdir().unwrap();
        let scanner = UnifiedScanner::with_analyzers(vec![Box::new(FakeAnalyzer {
            name: "broken",
            outcome: Err("boom"),
        })]);

        let findings = scanner
            .run(dir.path(), None, &ScanConfig::default())
            .await
            .unwrap();
        assert!(findings.is_empty());
    }

    #[tokio::test]
    async fn test_missing_scan_root_is_an_error() {
        let scanner = UnifiedScanner::with_analyzers(vec![]);
        let result = scanner
            .run(Path::new("/nonexistent/workspace"), None, &ScanConfig::default())
            .await;
        assert!(matches!(result, Err(ToolError::Internal(_))));
    }

    #[test]
    fn test_from_config_respects_enabled_tools() {
        let config = ScanConfig {
            enabled_tools: vec!["Slither".to_string(), "aderyn".to_string()],
            ..ScanConfig::default()
        };
        let scanner = UnifiedScanner::from_config(&config);
        let names: Vec<_> = scanner.analyzers.iter().map(|a| a.name()).collect();
        assert_eq!(names, vec!["slither", "aderyn"]);
    }
}

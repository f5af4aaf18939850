//! Per-repository scan manifest.
//!
//! Repositories opt into non-default behavior by committing an
//! `audit-pit-crew.yml` at their root. The schema is strict, but a broken
//! manifest must never block scanning: any read, parse, or validation
//! failure degrades to the defaults with a logged error.

use crate::severity::Severity;
use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use serde::Deserialize;
use std::path::Path;

/// Fixed manifest filename looked up at the repository root (not recursively).
pub const MANIFEST_FILE: &str = "audit-pit-crew.yml";

/// Adapter names a manifest may enable.
pub const KNOWN_TOOLS: [&str; 4] = ["slither", "mythril", "oyente", "aderyn"];

/// Effective scan configuration for one repository.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanConfig {
    /// Repository-relative root of the sources to scan.
    pub contracts_path: String,
    /// Shell-style glob patterns; matching files are dropped.
    pub ignore_paths: Vec<String>,
    /// Findings below this severity are not reported.
    pub min_severity: Severity,
    /// Findings at or above this severity fail the gating check.
    pub block_on_severity: Severity,
    /// Adapters to run, in declared order.
    pub enabled_tools: Vec<String>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            contracts_path: ".".to_string(),
            ignore_paths: vec!["node_modules/**".to_string(), "test/**".to_string()],
            min_severity: Severity::Low,
            block_on_severity: Severity::High,
            enabled_tools: vec!["slither".to_string(), "mythril".to_string()],
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct Manifest {
    scan: Option<ScanSection>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ScanSection {
    contracts_path: Option<String>,
    ignore_paths: Option<Vec<String>>,
    min_severity: Option<Severity>,
    block_on_severity: Option<Severity>,
    enabled_tools: Option<Vec<String>>,
}

impl ScanConfig {
    /// Load the manifest from `repo_root`, falling back to defaults.
    ///
    /// A missing file is the common case and logs at info; anything else that
    /// goes wrong (unreadable file, malformed YAML, unknown keys, invalid
    /// enum values, unknown tool names) logs at error and yields defaults.
    /// This function never returns an error.
    pub async fn load(repo_root: &Path) -> ScanConfig {
        let manifest_path = repo_root.join(MANIFEST_FILE);
        let contents = match tokio::fs::read_to_string(&manifest_path).await {
            Ok(contents) => contents,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("no {MANIFEST_FILE} found, using default scan config");
                return ScanConfig::default();
            }
            Err(err) => {
                tracing::error!("failed to read {MANIFEST_FILE}: {err}, using defaults");
                return ScanConfig::default();
            }
        };

        match Self::parse(&contents) {
            Ok(config) => config,
            Err(err) => {
                tracing::error!("invalid {MANIFEST_FILE}: {err}, using defaults");
                ScanConfig::default()
            }
        }
    }

    /// Strict parse of manifest contents. An empty document yields defaults.
    fn parse(contents: &str) -> Result<ScanConfig, String> {
        if contents.trim().is_empty() {
            return Ok(ScanConfig::default());
        }

        let manifest: Manifest =
            serde_yaml::from_str(contents).map_err(|err| err.to_string())?;

        let defaults = ScanConfig::default();
        let Some(scan) = manifest.scan else {
            return Ok(defaults);
        };

        let enabled_tools = match scan.enabled_tools {
            Some(tools) => {
                for tool in &tools {
                    if !KNOWN_TOOLS.iter().any(|known| known.eq_ignore_ascii_case(tool)) {
                        return Err(format!("unknown tool {tool:?} in enabled_tools"));
                    }
                }
                tools
            }
            None => defaults.enabled_tools,
        };

        Ok(ScanConfig {
            contracts_path: scan.contracts_path.unwrap_or(defaults.contracts_path),
            ignore_paths: scan.ignore_paths.unwrap_or(defaults.ignore_paths),
            min_severity: scan.min_severity.unwrap_or(defaults.min_severity),
            block_on_severity: scan.block_on_severity.unwrap_or(defaults.block_on_severity),
            enabled_tools,
        })
    }

    /// Case-insensitive membership test against `enabled_tools`.
    pub fn is_tool_enabled(&self, name: &str) -> bool {
        self.enabled_tools
            .iter()
            .any(|tool| tool.eq_ignore_ascii_case(name))
    }

    /// `contracts_path` with unsafe values degraded to `"."`.
    ///
    /// Absolute paths and parent traversal would let a manifest point the
    /// scanner outside the checkout, so both fall back to the repo root.
    pub fn sanitized_contracts_path(&self) -> &str {
        let path = self.contracts_path.trim_end_matches('/');
        if path.is_empty() || path == "." {
            return ".";
        }
        if Path::new(path).is_absolute() || path.split('/').any(|part| part == "..") {
            tracing::warn!(
                "contracts_path {:?} is not a safe relative path, scanning repo root",
                self.contracts_path
            );
            return ".";
        }
        path
    }

    /// Compiled matcher over `ignore_paths`.
    ///
    /// `*` and `?` stay within one path component; `**` crosses components,
    /// so `node_modules/**` matches `node_modules/a` and `node_modules/a/b`
    /// but not `src/node_modules/a`. Unparseable patterns are dropped with a
    /// warning rather than failing the scan.
    pub fn ignore_matcher(&self) -> GlobSet {
        let mut builder = GlobSetBuilder::new();
        for pattern in &self.ignore_paths {
            match GlobBuilder::new(pattern).literal_separator(true).build() {
                Ok(glob) => {
                    builder.add(glob);
                }
                Err(err) => {
                    tracing::warn!("ignoring invalid glob pattern {pattern:?}: {err}");
                }
            }
        }
        builder.build().unwrap_or_else(|err| {
            tracing::warn!("failed to compile ignore patterns: {err}");
            GlobSet::empty()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn load_from(contents: &str) -> ScanConfig {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join(MANIFEST_FILE), contents)
            .await
            .unwrap();
        ScanConfig::load(dir.path()).await
    }

    #[tokio::test]
    async fn test_missing_file_returns_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = ScanConfig::load(dir.path()).await;
        assert_eq!(config, ScanConfig::default());
    }

    #[tokio::test]
    async fn test_empty_file_returns_defaults() {
        assert_eq!(load_from("").await, ScanConfig::default());
    }

    #[tokio::test]
    async fn test_partial_config_merges_with_defaults() {
        let config = load_from("scan:\n  min_severity: \"High\"\n").await;
        assert_eq!(config.min_severity, Severity::High);
        assert_eq!(config.contracts_path, ".");
        assert_eq!(config.ignore_paths, vec!["node_modules/**", "test/**"]);
        assert_eq!(config.block_on_severity, Severity::High);
    }

    #[tokio::test]
    async fn test_full_config_overrides_defaults() {
        let config = load_from(concat!(
            "scan:\n",
            "  contracts_path: \"contracts\"\n",
            "  ignore_paths:\n",
            "    - \"mocks/**\"\n",
            "    - \"upgrades/**\"\n",
            "  min_severity: \"Medium\"\n",
            "  block_on_severity: \"Critical\"\n",
            "  enabled_tools: [\"slither\", \"aderyn\"]\n",
        ))
        .await;
        assert_eq!(config.contracts_path, "contracts");
        assert_eq!(config.ignore_paths, vec!["mocks/**", "upgrades/**"]);
        assert_eq!(config.min_severity, Severity::Medium);
        assert_eq!(config.block_on_severity, Severity::Critical);
        assert_eq!(config.enabled_tools, vec!["slither", "aderyn"]);
    }

    #[tokio::test]
    async fn test_malformed_yaml_returns_defaults() {
        let config = load_from("this is: not: valid yaml:::").await;
        assert_eq!(config, ScanConfig::default());
    }

    #[tokio::test]
    async fn test_unknown_key_returns_defaults() {
        let config = load_from("scan:\n  min_severity: \"High\"\n  surprise: true\n").await;
        assert_eq!(config, ScanConfig::default());
    }

    #[tokio::test]
    async fn test_invalid_severity_returns_defaults() {
        let config = load_from("scan:\n  min_severity: \"Invalid\"\n").await;
        assert_eq!(config.min_severity, Severity::Low);
    }

    #[tokio::test]
    async fn test_unknown_tool_returns_defaults() {
        let config = load_from("scan:\n  enabled_tools: [\"slither\", \"banana\"]\n").await;
        assert_eq!(config, ScanConfig::default());
    }

    #[test]
    fn test_is_tool_enabled_case_insensitive() {
        let config = ScanConfig {
            enabled_tools: vec!["Slither".to_string(), "MYTHRIL".to_string()],
            ..ScanConfig::default()
        };
        assert!(config.is_tool_enabled("slither"));
        assert!(config.is_tool_enabled("Mythril"));
        assert!(config.is_tool_enabled("SLITHER"));
        assert!(!config.is_tool_enabled("aderyn"));
    }

    #[test]
    fn test_contracts_path_sanitization() {
        let mut config = ScanConfig::default();
        assert_eq!(config.sanitized_contracts_path(), ".");

        config.contracts_path = "src/contracts/".to_string();
        assert_eq!(config.sanitized_contracts_path(), "src/contracts");

        config.contracts_path = "/etc/passwd".to_string();
        assert_eq!(config.sanitized_contracts_path(), ".");

        config.contracts_path = "../../../etc".to_string();
        assert_eq!(config.sanitized_contracts_path(), ".");
    }

    #[test]
    fn test_ignore_glob_semantics() {
        let config = ScanConfig::default();
        let matcher = config.ignore_matcher();
        assert!(matcher.is_match("node_modules/dep.sol"));
        assert!(matcher.is_match("node_modules/a/b.sol"));
        assert!(matcher.is_match("test/Token.t.sol"));
        assert!(!matcher.is_match("src/node_modules/dep.sol"));
        assert!(!matcher.is_match("contracts/Token.sol"));
    }

    #[test]
    fn test_invalid_glob_is_dropped() {
        let config = ScanConfig {
            ignore_paths: vec!["[".to_string(), "mocks/**".to_string()],
            ..ScanConfig::default()
        };
        let matcher = config.ignore_matcher();
        assert!(matcher.is_match("mocks/Fake.sol"));
    }
}

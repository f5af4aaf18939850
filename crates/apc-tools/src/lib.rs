//! External Analyzer Integration
//!
//! This crate wraps the external static-analysis binaries behind a uniform
//! adapter interface: each adapter builds its own command line, executes it
//! with a bounded timeout, parses the tool's native output, and normalizes
//! every record into the shared [`Finding`] shape.

pub mod aderyn;
pub mod mythril;
pub mod oyente;
pub mod slither;
pub mod unified;

use apc_core::{Finding, ScanConfig, Severity};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;

pub use unified::UnifiedScanner;

/// Default timeout for a single analyzer invocation.
pub const DEFAULT_TOOL_TIMEOUT_SECS: u64 = 300;

#[derive(Error, Debug)]
pub enum ToolError {
    #[error("tool not found: {0}")]
    NotFound(String),

    #[error("{tool} execution failed: {detail}")]
    ExecutionFailed { tool: String, detail: String },

    #[error("{tool} timed out after {secs} s")]
    Timeout { tool: String, secs: u64 },

    #[error("{tool} output could not be parsed: {detail}")]
    Parse { tool: String, detail: String },

    #[error("scanner error: {0}")]
    Internal(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type ToolResult<T> = Result<T, ToolError>;

/// One adapter invocation's output: normalized findings plus any file-based
/// artifacts the tool left behind (report files, kept for diagnostics).
#[derive(Debug, Default)]
pub struct ToolRun {
    pub findings: Vec<Finding>,
    pub logs: Vec<PathBuf>,
}

/// Uniform interface over one external analyzer.
///
/// Adapters are cheap to instantiate and hold no cross-run state, so
/// concurrent jobs can each build their own set over disjoint workspaces.
#[async_trait]
pub trait Analyzer: Send + Sync {
    /// Identifier used in `Finding.tool` and the manifest's `enabled_tools`.
    fn name(&self) -> &'static str;

    /// Executable looked up on `PATH`.
    fn binary(&self) -> &'static str;

    /// Mapping from this tool's native severity vocabulary to the canonical
    /// scale.
    fn default_severity_map(&self) -> &'static [(&'static str, Severity)];

    /// Whether the external binary is installed.
    fn is_available(&self) -> bool {
        which::which(self.binary()).is_ok()
    }

    /// Run the analyzer over `repo_root`.
    ///
    /// `files`, when given, is the pre-filtered candidate list relative to
    /// `repo_root`; tree-scanning adapters may ignore it. Findings below
    /// `config.min_severity` are filtered before returning. A run that
    /// cannot produce interpretable output returns an error; it never
    /// silently yields an empty list.
    async fn run(
        &self,
        repo_root: &Path,
        files: Option<&[String]>,
        config: &ScanConfig,
    ) -> ToolResult<ToolRun>;
}

/// Captured output of one subprocess invocation.
#[derive(Debug)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub code: i32,
}

/// Run `program` with `args` in `cwd`, bounded by `timeout_secs`.
///
/// The child is spawned with explicit argv (no shell), and killed and reaped
/// on timeout so orphans cannot accumulate.
pub(crate) async fn run_command(
    tool: &str,
    program: &str,
    args: &[&str],
    cwd: &Path,
    timeout_secs: u64,
) -> ToolResult<CommandOutput> {
    tracing::debug!("executing {program} {args:?} in {}", cwd.display());
    let child = Command::new(program)
        .args(args)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|err| {
            if err.kind() == std::io::ErrorKind::NotFound {
                ToolError::NotFound(program.to_string())
            } else {
                ToolError::Io(err)
            }
        })?;

    match tokio::time::timeout(Duration::from_secs(timeout_secs), child.wait_with_output()).await
    {
        Ok(Ok(output)) => Ok(CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            code: output.status.code().unwrap_or(-1),
        }),
        Ok(Err(err)) => Err(ToolError::Io(err)),
        Err(_) => Err(ToolError::Timeout {
            tool: tool.to_string(),
            secs: timeout_secs,
        }),
    }
}

/// Translate a native severity label through an adapter's map, with an
/// adapter-chosen fallback for labels the map does not know.
pub(crate) fn map_severity(
    map: &[(&str, Severity)],
    native: &str,
    fallback: Severity,
) -> Severity {
    let lowered = native.trim().to_ascii_lowercase();
    map.iter()
        .find(|(label, _)| *label == lowered)
        .map(|(_, severity)| *severity)
        .unwrap_or(fallback)
}

/// Normalize a tool-reported path to a repo-relative POSIX path.
pub(crate) fn normalize_path(path: &str, repo_root: &Path) -> String {
    let mut normalized = path.replace('\\', "/");
    if let Ok(rel) = Path::new(&normalized).strip_prefix(repo_root) {
        normalized = rel.to_string_lossy().replace('\\', "/");
    }
    normalized
        .trim_start_matches("./")
        .trim_start_matches('/')
        .to_string()
}

/// Keep only the candidates that exist under `repo_root` as regular files,
/// warning about the rest.
pub(crate) fn existing_files(repo_root: &Path, files: &[String]) -> Vec<String> {
    files
        .iter()
        .filter(|rel| {
            let exists = repo_root.join(rel.as_str()).is_file();
            if !exists {
                tracing::warn!("file not found, skipping: {rel}");
            }
            exists
        })
        .cloned()
        .collect()
}

//! Git operations for scan workspaces.
//!
//! Every operation shells out to the git CLI with an explicit working
//! directory, explicit argv, and a bounded timeout; stderr is captured so a
//! failure carries a usable diagnostic. Authentication tokens are injected
//! into the clone URL in memory only and never logged.

use crate::config::ScanConfig;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;

const CLONE_TIMEOUT_SECS: u64 = 120;
const FETCH_TIMEOUT_SECS: u64 = 30;
const CHECKOUT_TIMEOUT_SECS: u64 = 30;
const DIFF_TIMEOUT_SECS: u64 = 30;
const REV_PARSE_TIMEOUT_SECS: u64 = 10;

#[derive(Error, Debug)]
pub enum GitError {
    #[error("git clone failed: {0}")]
    Clone(String),
    #[error("git fetch failed: {0}")]
    Fetch(String),
    #[error("git checkout failed: {0}")]
    Checkout(String),
    #[error("git diff failed: {0}")]
    Diff(String),
    #[error("git rev-parse failed: {0}")]
    RevParse(String),
    #[error("git {op} timed out after {secs} s")]
    Timeout { op: &'static str, secs: u64 },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type GitResult<T> = Result<T, GitError>;

/// Handles cloning, ref resolution, and changed-file discovery for one
/// workspace. Stateless; safe to instantiate per job.
#[derive(Debug, Default)]
pub struct GitManager;

impl GitManager {
    pub fn new() -> Self {
        GitManager
    }

    /// Clone `repo_url` into `workspace`.
    ///
    /// Remote HTTPS URLs are authenticated by injecting the installation
    /// token as `x-access-token` userinfo; the authenticated URL lives only
    /// in the spawned argv. Local paths clone as-is, which keeps integration
    /// tests off the network.
    pub async fn clone_repo(
        &self,
        workspace: &Path,
        repo_url: &str,
        token: Option<&str>,
        shallow: bool,
    ) -> GitResult<()> {
        let is_remote = repo_url.starts_with("http") || repo_url.starts_with("git");
        let clone_url = match token {
            Some(token) if is_remote => repo_url.replacen(
                "https://",
                &format!("https://x-access-token:{token}@"),
                1,
            ),
            _ => repo_url.to_string(),
        };

        tracing::info!("cloning {repo_url} (shallow: {shallow})");
        let mut args = vec!["clone"];
        if shallow {
            args.extend(["--depth", "1"]);
        }
        args.extend([clone_url.as_str(), "."]);

        self.run_git(workspace, &args, "clone", CLONE_TIMEOUT_SECS)
            .await
            .map_err(|err| redact(err, &clone_url, repo_url))?;
        tracing::info!("clone of {repo_url} complete");
        Ok(())
    }

    /// Top-level directory of the cloned repo.
    ///
    /// Cloning with destination `"."` puts the checkout at the workspace
    /// itself; if a clone produced exactly one child directory instead, that
    /// child is the root.
    pub fn repo_root(&self, workspace: &Path) -> PathBuf {
        if workspace.join(".git").exists() {
            return workspace.to_path_buf();
        }
        let entries: Vec<_> = match std::fs::read_dir(workspace) {
            Ok(read) => read.filter_map(|entry| entry.ok()).collect(),
            Err(_) => return workspace.to_path_buf(),
        };
        match entries.as_slice() {
            [only] if only.path().is_dir() => only.path(),
            _ => workspace.to_path_buf(),
        }
    }

    /// Fetch the PR base ref from origin. Any failure is downgraded to a
    /// warning: the ref may already be a commit SHA or locally reachable.
    pub async fn fetch_base_ref(&self, repo_root: &Path, base_ref: &str) {
        match self
            .run_git(repo_root, &["fetch", "origin", base_ref], "fetch", FETCH_TIMEOUT_SECS)
            .await
        {
            Ok(_) => tracing::debug!("fetched origin {base_ref}"),
            Err(err) => tracing::warn!("could not fetch origin {base_ref}: {err}"),
        }
    }

    /// Hard checkout of a ref or SHA.
    pub async fn checkout(&self, repo_root: &Path, git_ref: &str) -> GitResult<()> {
        self.run_git(
            repo_root,
            &["checkout", "--force", git_ref],
            "checkout",
            CHECKOUT_TIMEOUT_SECS,
        )
        .await?;
        Ok(())
    }

    /// Resolve `base_ref` to something diffable: try the ref as given, then
    /// `origin/<ref>`, then fall back to the original string with a warning.
    pub async fn resolve_base_ref(&self, repo_root: &Path, base_ref: &str) -> String {
        if self.rev_parse(repo_root, base_ref).await.is_ok() {
            return base_ref.to_string();
        }
        let remote_ref = format!("origin/{base_ref}");
        if self.rev_parse(repo_root, &remote_ref).await.is_ok() {
            tracing::debug!("base ref {base_ref} resolved via {remote_ref}");
            return remote_ref;
        }
        tracing::warn!("could not resolve base ref {base_ref} locally or via origin");
        base_ref.to_string()
    }

    async fn rev_parse(&self, repo_root: &Path, git_ref: &str) -> GitResult<String> {
        let stdout = self
            .run_git(
                repo_root,
                &["rev-parse", "--verify", git_ref],
                "rev-parse",
                REV_PARSE_TIMEOUT_SECS,
            )
            .await?;
        Ok(stdout.trim().to_string())
    }

    /// Solidity files changed between `base_ref` and `head_ref`, filtered by
    /// the manifest, unique, in diff order.
    pub async fn changed_solidity_files(
        &self,
        repo_root: &Path,
        base_ref: &str,
        head_ref: &str,
        config: &ScanConfig,
    ) -> GitResult<Vec<String>> {
        let resolved_base = self.resolve_base_ref(repo_root, base_ref).await;
        let stdout = self
            .run_git(
                repo_root,
                &["diff", "--name-only", &resolved_base, head_ref],
                "diff",
                DIFF_TIMEOUT_SECS,
            )
            .await?;

        let candidates: Vec<String> = stdout.lines().map(str::to_string).collect();
        let files = filter_changed_files(repo_root, candidates, config);
        tracing::info!(
            "{} changed Solidity file(s) against {resolved_base}",
            files.len()
        );
        Ok(files)
    }

    async fn run_git(
        &self,
        cwd: &Path,
        args: &[&str],
        op: &'static str,
        timeout_secs: u64,
    ) -> GitResult<String> {
        let child = Command::new("git")
            .args(args)
            .current_dir(cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let output = match tokio::time::timeout(
            Duration::from_secs(timeout_secs),
            child.wait_with_output(),
        )
        .await
        {
            Ok(result) => result?,
            Err(_) => {
                return Err(GitError::Timeout {
                    op,
                    secs: timeout_secs,
                })
            }
        };

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).to_string())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            let detail = if stderr.is_empty() {
                format!("exit code {}", output.status.code().unwrap_or(-1))
            } else {
                stderr
            };
            Err(match op {
                "clone" => GitError::Clone(detail),
                "fetch" => GitError::Fetch(detail),
                "checkout" => GitError::Checkout(detail),
                "diff" => GitError::Diff(detail),
                _ => GitError::RevParse(detail),
            })
        }
    }
}

/// Strip an authenticated clone URL out of an error message.
fn redact(err: GitError, authenticated_url: &str, plain_url: &str) -> GitError {
    match err {
        GitError::Clone(detail) => {
            GitError::Clone(detail.replace(authenticated_url, plain_url))
        }
        other => other,
    }
}

/// Apply the manifest filters to a diff candidate list.
///
/// Keeps paths that currently exist on disk as regular files (deletions and
/// renames out of scope drop here), end in `.sol` (case-sensitive), sit under
/// `contracts_path`, and match no ignore glob. Globs are tested against both
/// the full repo-relative path and the path relative to `contracts_path`.
pub fn filter_changed_files(
    repo_root: &Path,
    candidates: Vec<String>,
    config: &ScanConfig,
) -> Vec<String> {
    let contracts_path = config.sanitized_contracts_path();
    let ignore = config.ignore_matcher();
    let mut seen = std::collections::HashSet::new();
    let mut files = Vec::new();

    for path in candidates {
        let path = path.trim().replace('\\', "/");
        if path.is_empty() || !path.ends_with(".sol") {
            continue;
        }
        if !repo_root.join(&path).is_file() {
            tracing::debug!("skipping {path}: not present at head");
            continue;
        }
        let scoped = if contracts_path == "." {
            path.as_str()
        } else if path == contracts_path {
            ""
        } else if let Some(rest) = path.strip_prefix(&format!("{contracts_path}/")) {
            rest
        } else {
            tracing::debug!("skipping {path}: outside contracts_path {contracts_path}");
            continue;
        };
        if ignore.is_match(&path) || (!scoped.is_empty() && ignore.is_match(scoped)) {
            tracing::debug!("skipping {path}: matches ignore pattern");
            continue;
        }
        if seen.insert(path.clone()) {
            files.push(path);
        }
    }

    files
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::severity::Severity;

    fn touch(root: &Path, rel: &str) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, "// SPDX-License-Identifier: MIT\n").unwrap();
    }

    fn default_config() -> ScanConfig {
        ScanConfig::default()
    }

    #[test]
    fn test_filter_default_ignores() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "node_modules/dep.sol");
        touch(dir.path(), "test/Token.t.sol");
        touch(dir.path(), "contracts/Token.sol");

        let files = filter_changed_files(
            dir.path(),
            vec![
                "node_modules/dep.sol".to_string(),
                "test/Token.t.sol".to_string(),
                "contracts/Token.sol".to_string(),
            ],
            &default_config(),
        );
        assert_eq!(files, vec!["contracts/Token.sol"]);
    }

    #[test]
    fn test_filter_drops_missing_and_non_sol() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "contracts/Token.sol");
        touch(dir.path(), "README.md");

        let files = filter_changed_files(
            dir.path(),
            vec![
                "contracts/Token.sol".to_string(),
                "contracts/Deleted.sol".to_string(),
                "README.md".to_string(),
                "contracts/UPPER.SOL".to_string(),
            ],
            &default_config(),
        );
        assert_eq!(files, vec!["contracts/Token.sol"]);
    }

    #[test]
    fn test_filter_contracts_path_prefix() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "src/contracts/Token.sol");
        touch(dir.path(), "scripts/Deploy.sol");

        let config = ScanConfig {
            contracts_path: "src/contracts".to_string(),
            ignore_paths: vec![],
            ..default_config()
        };
        let files = filter_changed_files(
            dir.path(),
            vec![
                "src/contracts/Token.sol".to_string(),
                "scripts/Deploy.sol".to_string(),
            ],
            &config,
        );
        assert_eq!(files, vec!["src/contracts/Token.sol"]);
    }

    #[test]
    fn test_filter_globs_relative_to_contracts_path() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "src/mocks/Fake.sol");
        touch(dir.path(), "src/Token.sol");

        let config = ScanConfig {
            contracts_path: "src".to_string(),
            ignore_paths: vec!["mocks/**".to_string()],
            ..default_config()
        };
        let files = filter_changed_files(
            dir.path(),
            vec!["src/mocks/Fake.sol".to_string(), "src/Token.sol".to_string()],
            &config,
        );
        assert_eq!(files, vec!["src/Token.sol"]);
    }

    #[test]
    fn test_filter_unique_in_diff_order() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "b.sol");
        touch(dir.path(), "a.sol");

        let config = ScanConfig {
            ignore_paths: vec![],
            ..default_config()
        };
        let files = filter_changed_files(
            dir.path(),
            vec![
                "b.sol".to_string(),
                "a.sol".to_string(),
                "b.sol".to_string(),
            ],
            &config,
        );
        assert_eq!(files, vec!["b.sol", "a.sol"]);
    }

    #[test]
    fn test_filter_unsafe_contracts_path_scans_root() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "contracts/Token.sol");

        let config = ScanConfig {
            contracts_path: "../../etc".to_string(),
            ignore_paths: vec![],
            min_severity: Severity::Low,
            ..default_config()
        };
        let files = filter_changed_files(
            dir.path(),
            vec!["contracts/Token.sol".to_string()],
            &config,
        );
        assert_eq!(files, vec!["contracts/Token.sol"]);
    }
}

//! Scan orchestration: the seven-step task executed for every queued job.
//!
//! Step order is fixed: workspace, authenticate + clone, load config,
//! discover files, scan, report, cleanup. Cleanup runs on every exit path;
//! the workspace guard's `Drop` covers panics, cancellation, and worker
//! shutdown. Only transient git failures are retried.

use crate::baseline::StoreError;
use crate::github::{
    checks, CheckConclusion, CheckOutput, ChecksManager, GitHubClient, GitHubError, PrReporter,
};
use crate::queue::{PrContext, ScanJob, ScanMode};
use crate::AppState;
use apc_core::{
    new_since_baseline, Finding, GitError, GitManager, ScanConfig, Workspace, WorkspaceError,
};
use apc_tools::{ToolError, UnifiedScanner};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Extra attempts after the first failure of a transient kind.
const MAX_RETRIES: u32 = 2;
/// First retry delay; doubles per attempt.
const RETRY_BASE_DELAY_SECS: u64 = 10;
/// How long a worker blocks waiting for a job before looping.
const DEQUEUE_TIMEOUT_SECS: u64 = 5;

#[derive(Error, Debug)]
pub enum JobError {
    #[error(transparent)]
    Workspace(#[from] WorkspaceError),

    #[error(transparent)]
    Git(#[from] GitError),

    #[error(transparent)]
    GitHub(#[from] GitHubError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Scanner(#[from] ToolError),

    #[error("invalid job: {0}")]
    Invalid(String),

    #[error("cancelled")]
    Cancelled,
}

impl JobError {
    /// Git operations fail transiently (network, transport, timeouts) and
    /// are worth retrying. Credential rejections, tool failures, store
    /// errors, and operator cancellation are deterministic and are not.
    pub fn is_transient(&self) -> bool {
        matches!(self, JobError::Git(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Success,
    Failed,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Success => "success",
            JobStatus::Failed => "failed",
        }
    }
}

/// Structured result of one job.
#[derive(Debug)]
pub struct ScanOutcome {
    pub status: JobStatus,
    pub new_issues_found: usize,
    pub mode: ScanMode,
    /// Operator-visible failure reason, e.g. `"cancelled"`.
    pub reason: Option<String>,
}

impl ScanOutcome {
    fn success(mode: ScanMode, new_issues_found: usize) -> Self {
        Self {
            status: JobStatus::Success,
            new_issues_found,
            mode,
            reason: None,
        }
    }

    fn failed(mode: ScanMode, reason: String) -> Self {
        Self {
            status: JobStatus::Failed,
            new_issues_found: 0,
            mode,
            reason: Some(reason),
        }
    }
}

/// Cancellation tokens of every in-flight job, keyed by job id, so an
/// operator can cancel one job without touching the rest of the pool.
#[derive(Default)]
pub struct JobRegistry {
    active: Mutex<HashMap<Uuid, CancellationToken>>,
}

impl JobRegistry {
    async fn register(&self, job_id: Uuid, token: CancellationToken) {
        self.active.lock().await.insert(job_id, token);
    }

    /// Cancel a running job. Returns false when no such job is in flight.
    /// The job still runs its cleanup step and reports a failed outcome
    /// with reason "cancelled"; it is not retried.
    pub async fn cancel(&self, job_id: Uuid) -> bool {
        match self.active.lock().await.get(&job_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    async fn remove(&self, job_id: Uuid) {
        self.active.lock().await.remove(&job_id);
    }
}

/// Worker loop: dequeue jobs until shutdown. A queue transport error backs
/// off briefly instead of spinning.
pub async fn run_worker(worker_id: usize, state: Arc<AppState>, shutdown: CancellationToken) {
    tracing::info!("worker {worker_id} started");
    loop {
        let dequeued = tokio::select! {
            _ = shutdown.cancelled() => break,
            dequeued = state.queue.dequeue(DEQUEUE_TIMEOUT_SECS) => dequeued,
        };
        match dequeued {
            Ok(Some(job)) => {
                let job_id = job.id;
                let cancel = shutdown.child_token();
                state.jobs.register(job_id, cancel.clone()).await;
                let outcome = run_job_with_retry(&state, job, &cancel).await;
                state.jobs.remove(job_id).await;
                tracing::info!(
                    "worker {worker_id} finished job {job_id}: {} ({} mode, {} new issue(s))",
                    outcome.status.as_str(),
                    outcome.mode,
                    outcome.new_issues_found
                );
                if let Some(reason) = &outcome.reason {
                    tracing::info!("job {job_id} failure reason: {reason}");
                }
            }
            Ok(None) => {}
            Err(err) => {
                tracing::error!("worker {worker_id} queue error: {err}");
                tokio::time::sleep(Duration::from_secs(DEQUEUE_TIMEOUT_SECS)).await;
            }
        }
    }
    tracing::info!("worker {worker_id} stopped");
}

/// Run a job, retrying transient failures with exponential delay.
///
/// Cancellation is checked before each attempt and raced against the running
/// attempt; a cancelled attempt is abandoned mid-flight (the workspace guard
/// cleans up behind it) and reported as failed with reason "cancelled",
/// never retried.
pub async fn run_job_with_retry(
    state: &AppState,
    job: ScanJob,
    cancel: &CancellationToken,
) -> ScanOutcome {
    let mode = job.mode();
    let mut attempt = 0u32;
    loop {
        if cancel.is_cancelled() {
            tracing::warn!("job {} cancelled", job.id);
            return ScanOutcome::failed(mode, JobError::Cancelled.to_string());
        }

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(JobError::Cancelled),
            result = run_scan_job(state, &job) => result,
        };

        match result {
            Ok(outcome) => return outcome,
            Err(err) if err.is_transient() && attempt < MAX_RETRIES => {
                let delay = RETRY_BASE_DELAY_SECS << attempt;
                attempt += 1;
                tracing::warn!(
                    "job {} attempt {attempt} failed transiently ({err}), retrying in {delay} s",
                    job.id
                );
                tokio::time::sleep(Duration::from_secs(delay)).await;
            }
            Err(err) => {
                tracing::error!("job {} failed: {err}", job.id);
                return ScanOutcome::failed(mode, err.to_string());
            }
        }
    }
}

/// One attempt at the seven steps. The workspace is removed on every path
/// out of this function, including when the whole future is dropped on
/// cancellation.
async fn run_scan_job(state: &AppState, job: &ScanJob) -> Result<ScanOutcome, JobError> {
    // Step 1: workspace. Failure here is fatal to the job.
    let mut workspace = Workspace::create()?;
    let result = execute_scan(state, job, workspace.path()).await;
    // Step 7: cleanup, unconditionally.
    workspace.remove().await;
    result
}

async fn execute_scan(
    state: &AppState,
    job: &ScanJob,
    workspace: &Path,
) -> Result<ScanOutcome, JobError> {
    let git = GitManager::new();

    // Step 2: authenticate and clone. Baseline scans take the shallow path,
    // differential scans need history for the diff.
    let token = state.auth.installation_token(job.installation_id).await?;
    let shallow = job.mode() == ScanMode::Baseline;
    git.clone_repo(workspace, &job.repo_url, Some(&token), shallow)
        .await?;
    let repo_root = git.repo_root(workspace);

    // Step 3: load config. Never fails; a broken manifest means defaults.
    let config = ScanConfig::load(&repo_root).await;

    match &job.pr {
        Some(pr) => run_differential(state, &git, &repo_root, &config, pr, &token).await,
        None => run_baseline(state, job, &repo_root, &config).await,
    }
}

async fn run_differential(
    state: &AppState,
    git: &GitManager,
    repo_root: &Path,
    config: &ScanConfig,
    pr: &PrContext,
    token: &str,
) -> Result<ScanOutcome, JobError> {
    let client = GitHubClient::new(&state.config.github_api_url, token)?;
    let checks_manager = ChecksManager::new(&client, &pr.owner, &pr.repo);
    let reporter = PrReporter::new(&client, &pr.owner, &pr.repo, pr.pr_number);

    // The gating check goes in_progress before any scanning. Publication is
    // best-effort: a check we could not create is logged and skipped later.
    let check_run_id = match checks_manager.create(&pr.head_sha).await {
        Ok(id) => Some(id),
        Err(err) => {
            tracing::error!("could not create check run: {err}");
            None
        }
    };

    git.fetch_base_ref(repo_root, &pr.base_ref).await;
    git.checkout(repo_root, &pr.head_sha).await?;

    // Step 4: discover changed files.
    let files = git
        .changed_solidity_files(repo_root, &pr.base_ref, "HEAD", config)
        .await?;
    if files.is_empty() {
        tracing::info!(
            "no Solidity changes in {}/{}#{}, skipping scan",
            pr.owner,
            pr.repo,
            pr.pr_number
        );
        if let Some(id) = check_run_id {
            if let Err(err) = checks_manager
                .complete(id, CheckConclusion::Success, CheckOutput::no_changes())
                .await
            {
                tracing::error!("could not complete check run: {err}");
            }
        }
        return Ok(ScanOutcome::success(ScanMode::Pr, 0));
    }

    // Step 5: scan. Per-tool failures are isolated inside the scanner; an
    // error escaping here is a scanner defect, which fails the PR visibly
    // and is not retried.
    let scanner = UnifiedScanner::from_config(config);
    let findings = match scanner.run(repo_root, Some(&files), config).await {
        Ok(findings) => findings,
        Err(err) => {
            let reason = err.to_string();
            if let Err(report_err) = reporter.post_error_report(&reason).await {
                tracing::error!("could not post error report: {report_err}");
            }
            if let Some(id) = check_run_id {
                if let Err(check_err) = checks_manager
                    .complete(id, CheckConclusion::Failure, CheckOutput::scan_error(&reason))
                    .await
                {
                    tracing::error!("could not complete check run: {check_err}");
                }
            }
            return Err(err.into());
        }
    };

    // Step 6: diff against the baseline and publish. A failed baseline read
    // degrades to an empty set: over-reporting beats under-reporting.
    let baseline = match state.baseline.read_baseline(&pr.owner, &pr.repo).await {
        Ok(baseline) => baseline,
        Err(err) => {
            tracing::warn!("baseline read failed, treating as empty: {err}");
            HashSet::new()
        }
    };
    let new_findings = new_since_baseline(findings, &baseline);
    tracing::info!(
        "{} new finding(s) for {}/{}#{}",
        new_findings.len(),
        pr.owner,
        pr.repo,
        pr.pr_number
    );

    if let Err(err) = reporter.post_report(&new_findings).await {
        tracing::error!("could not post report comment: {err}");
    }
    if let Some(id) = check_run_id {
        let (conclusion, output) = checks::evaluate(&new_findings, config.block_on_severity);
        if let Err(err) = checks_manager.complete(id, conclusion, output).await {
            tracing::error!("could not complete check run: {err}");
        }
    }

    Ok(ScanOutcome::success(ScanMode::Pr, new_findings.len()))
}

async fn run_baseline(
    state: &AppState,
    job: &ScanJob,
    repo_root: &Path,
    config: &ScanConfig,
) -> Result<ScanOutcome, JobError> {
    let (owner, repo) = job
        .repo_slug()
        .ok_or_else(|| JobError::Invalid(format!("cannot derive owner/repo from {}", job.repo_url)))?;

    // Step 4 is skipped in baseline mode: the scanners walk the whole tree.
    let scanner = UnifiedScanner::from_config(config);
    let findings = scanner.run(repo_root, None, config).await?;

    // Step 6: replace the stored baseline. A store failure fails the job;
    // a stale baseline would silently swallow future reports.
    let fingerprints: HashSet<String> = findings.iter().map(Finding::fingerprint).collect();
    state
        .baseline
        .write_baseline(&owner, &repo, &fingerprints)
        .await?;
    tracing::info!(
        "baseline for {owner}/{repo} replaced with {} fingerprint(s)",
        fingerprints.len()
    );

    Ok(ScanOutcome::success(ScanMode::Baseline, 0))
}

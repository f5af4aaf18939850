//! Job queue: JSON scan jobs on a Redis list.
//!
//! The webhook pushes differential jobs; operator tooling can push baseline
//! jobs in the same format. Workers block-pop from the list, so any number
//! of worker tasks or processes can drain it concurrently.

use crate::baseline::StoreResult;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

pub const QUEUE_KEY: &str = "audit-pit-crew:jobs";

/// Pull-request coordinates carried by a differential job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrContext {
    pub owner: String,
    pub repo: String,
    pub pr_number: u64,
    pub base_ref: String,
    pub head_sha: String,
}

/// One unit of orchestrator work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanJob {
    pub id: Uuid,
    pub repo_url: String,
    pub installation_id: u64,
    /// Present for differential scans, absent for baseline scans.
    pub pr: Option<PrContext>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanMode {
    Pr,
    Baseline,
}

impl fmt::Display for ScanMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ScanMode::Pr => "pr",
            ScanMode::Baseline => "baseline",
        })
    }
}

impl ScanJob {
    pub fn differential(repo_url: String, installation_id: u64, pr: PrContext) -> Self {
        Self {
            id: Uuid::new_v4(),
            repo_url,
            installation_id,
            pr: Some(pr),
        }
    }

    pub fn mode(&self) -> ScanMode {
        if self.pr.is_some() {
            ScanMode::Pr
        } else {
            ScanMode::Baseline
        }
    }

    /// `(owner, repo)` for the baseline key, derived from the clone URL when
    /// there is no PR context to carry it.
    pub fn repo_slug(&self) -> Option<(String, String)> {
        if let Some(pr) = &self.pr {
            return Some((pr.owner.clone(), pr.repo.clone()));
        }
        let trimmed = self
            .repo_url
            .trim_end_matches('/')
            .trim_end_matches(".git");
        let mut segments = trimmed.rsplit('/');
        let repo = segments.next()?.to_string();
        let owner = segments
            .next()
            .map(|owner| owner.rsplit(':').next().unwrap_or(owner))?
            .to_string();
        if owner.is_empty() || repo.is_empty() || owner.contains("//") {
            return None;
        }
        Some((owner, repo))
    }
}

#[derive(Clone)]
pub struct JobQueue {
    conn: ConnectionManager,
}

impl JobQueue {
    pub async fn connect(redis_url: &str) -> StoreResult<Self> {
        let client = redis::Client::open(redis_url)?;
        let conn = client.get_connection_manager().await?;
        tracing::info!("connected to job queue");
        Ok(Self { conn })
    }

    pub fn from_connection(conn: ConnectionManager) -> Self {
        Self { conn }
    }

    pub async fn enqueue(&self, job: &ScanJob) -> StoreResult<()> {
        let payload = serde_json::to_string(job)?;
        let mut conn = self.conn.clone();
        let _: () = conn.lpush(QUEUE_KEY, payload).await?;
        tracing::info!("enqueued {} job {} for {}", job.mode(), job.id, job.repo_url);
        Ok(())
    }

    /// Block up to `timeout_secs` waiting for a job. A malformed payload is
    /// dropped with an error log rather than wedging the queue.
    pub async fn dequeue(&self, timeout_secs: u64) -> StoreResult<Option<ScanJob>> {
        let mut conn = self.conn.clone();
        let popped: Option<(String, String)> = redis::cmd("BRPOP")
            .arg(QUEUE_KEY)
            .arg(timeout_secs)
            .query_async(&mut conn)
            .await?;

        let Some((_, payload)) = popped else {
            return Ok(None);
        };
        match serde_json::from_str(&payload) {
            Ok(job) => Ok(Some(job)),
            Err(err) => {
                tracing::error!("dropping malformed job payload: {err}");
                Ok(None)
            }
        }
    }
}

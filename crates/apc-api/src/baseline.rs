//! Baseline store: the known-findings fingerprint set per repository.
//!
//! Keys are `"{owner}:{repo}"`, values are JSON arrays of fingerprint
//! strings. A read of an absent key is an empty baseline; a write replaces
//! the whole set. The store is the only state shared across jobs.

use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::collections::HashSet;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Clone)]
pub struct BaselineStore {
    conn: ConnectionManager,
}

impl BaselineStore {
    pub async fn connect(redis_url: &str) -> StoreResult<Self> {
        let client = redis::Client::open(redis_url)?;
        let conn = client.get_connection_manager().await?;
        tracing::info!("connected to baseline store");
        Ok(Self { conn })
    }

    pub fn from_connection(conn: ConnectionManager) -> Self {
        Self { conn }
    }

    fn key(owner: &str, repo: &str) -> String {
        format!("{owner}:{repo}")
    }

    /// The stored fingerprint set, empty when no baseline exists yet.
    pub async fn read_baseline(&self, owner: &str, repo: &str) -> StoreResult<HashSet<String>> {
        let key = Self::key(owner, repo);
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.get(&key).await?;
        match raw {
            Some(raw) => {
                let fingerprints: Vec<String> = serde_json::from_str(&raw)?;
                tracing::info!(
                    "loaded baseline for {key} with {} fingerprint(s)",
                    fingerprints.len()
                );
                Ok(fingerprints.into_iter().collect())
            }
            None => {
                tracing::info!("no baseline stored for {key}, using empty baseline");
                Ok(HashSet::new())
            }
        }
    }

    /// Replace the stored set. Serialized sorted so the stored payload is
    /// stable across runs.
    pub async fn write_baseline(
        &self,
        owner: &str,
        repo: &str,
        fingerprints: &HashSet<String>,
    ) -> StoreResult<()> {
        let key = Self::key(owner, repo);
        let mut sorted: Vec<&String> = fingerprints.iter().collect();
        sorted.sort();
        let payload = serde_json::to_string(&sorted)?;

        let mut conn = self.conn.clone();
        let _: () = conn.set(&key, payload).await?;
        tracing::info!(
            "saved baseline for {key} with {} fingerprint(s)",
            fingerprints.len()
        );
        Ok(())
    }
}

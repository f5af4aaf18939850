//! GitHub App integration: token minting, REST client, check runs, and the
//! PR comment reporter.

pub mod auth;
pub mod checks;
pub mod client;
pub mod reporter;

use thiserror::Error;

pub use auth::GitHubAuth;
pub use checks::{ChecksManager, CheckConclusion, CheckOutput};
pub use client::GitHubClient;
pub use reporter::PrReporter;

#[derive(Error, Debug)]
pub enum GitHubError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("github api returned {status}: {detail}")]
    Api { status: u16, detail: String },

    #[error("jwt error: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),
}

pub type GitHubResult<T> = Result<T, GitHubError>;

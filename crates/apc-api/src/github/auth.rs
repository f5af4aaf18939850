//! GitHub App authentication.
//!
//! The app identity is an RS256-signed JWT; each job exchanges it for a
//! short-lived installation access token scoped to the repository's
//! installation. Tokens are minted per job and never cached across jobs.

use super::{GitHubError, GitHubResult};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde::Serialize;
use std::time::{SystemTime, UNIX_EPOCH};

const USER_AGENT: &str = "audit-pit-crew/1.0";

/// JWT lifetime: GitHub accepts at most 10 minutes.
const JWT_TTL_SECS: u64 = 10 * 60;
/// Backdate issued-at to absorb clock skew between us and GitHub.
const JWT_IAT_SKEW_SECS: u64 = 60;

#[derive(Serialize)]
struct AppClaims {
    iat: u64,
    exp: u64,
    iss: String,
}

pub struct GitHubAuth {
    app_id: String,
    key: EncodingKey,
    api_base: String,
    http: reqwest::Client,
}

impl GitHubAuth {
    pub fn new(app_id: &str, private_key_pem: &str, api_base: &str) -> GitHubResult<Self> {
        let key = EncodingKey::from_rsa_pem(private_key_pem.as_bytes())?;
        let http = reqwest::Client::builder().user_agent(USER_AGENT).build()?;
        Ok(Self {
            app_id: app_id.to_string(),
            key,
            api_base: api_base.trim_end_matches('/').to_string(),
            http,
        })
    }

    fn app_jwt(&self) -> GitHubResult<String> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_secs())
            .unwrap_or(0);
        let claims = AppClaims {
            iat: now.saturating_sub(JWT_IAT_SKEW_SECS),
            exp: now + JWT_TTL_SECS,
            iss: self.app_id.clone(),
        };
        Ok(encode(&Header::new(Algorithm::RS256), &claims, &self.key)?)
    }

    /// Exchange the app JWT for an installation access token (valid ≤ 1 h).
    pub async fn installation_token(&self, installation_id: u64) -> GitHubResult<String> {
        let jwt = self.app_jwt()?;
        let url = format!(
            "{}/app/installations/{installation_id}/access_tokens",
            self.api_base
        );

        let response = self
            .http
            .post(&url)
            .bearer_auth(jwt)
            .header("Accept", "application/vnd.github+json")
            .send()
            .await?;

        let status = response.status();
        if status != reqwest::StatusCode::CREATED {
            let detail = response.text().await.unwrap_or_default();
            tracing::error!("failed to mint installation token ({status}): {detail}");
            return Err(GitHubError::Api {
                status: status.as_u16(),
                detail,
            });
        }

        let body: serde_json::Value = response.json().await?;
        match body.get("token").and_then(|v| v.as_str()) {
            Some(token) => {
                tracing::info!("minted installation token for installation {installation_id}");
                Ok(token.to_string())
            }
            None => Err(GitHubError::Api {
                status: status.as_u16(),
                detail: "token missing from response".to_string(),
            }),
        }
    }
}

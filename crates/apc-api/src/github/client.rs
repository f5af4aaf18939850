//! Thin authenticated wrapper over the GitHub REST API.

use super::{GitHubError, GitHubResult};

const USER_AGENT: &str = "audit-pit-crew/1.0";

/// An installation-token-scoped API client, built once per job.
pub struct GitHubClient {
    http: reqwest::Client,
    api_base: String,
    token: String,
}

impl GitHubClient {
    pub fn new(api_base: &str, token: &str) -> GitHubResult<Self> {
        let http = reqwest::Client::builder().user_agent(USER_AGENT).build()?;
        Ok(Self {
            http,
            api_base: api_base.trim_end_matches('/').to_string(),
            token: token.to_string(),
        })
    }

    pub async fn post(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> GitHubResult<serde_json::Value> {
        let request = self.http.post(format!("{}{path}", self.api_base));
        self.send(request, body).await
    }

    pub async fn patch(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> GitHubResult<serde_json::Value> {
        let request = self.http.patch(format!("{}{path}", self.api_base));
        self.send(request, body).await
    }

    async fn send(
        &self,
        request: reqwest::RequestBuilder,
        body: &serde_json::Value,
    ) -> GitHubResult<serde_json::Value> {
        let response = request
            .bearer_auth(&self.token)
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", "2022-11-28")
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(GitHubError::Api {
                status: status.as_u16(),
                detail,
            });
        }
        Ok(response
            .json::<serde_json::Value>()
            .await
            .unwrap_or(serde_json::Value::Null))
    }
}

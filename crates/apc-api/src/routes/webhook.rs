//! GitHub webhook intake.
//!
//! The raw body is read before any JSON parse so signature verification runs
//! over the exact bytes GitHub signed. An invalid or missing signature is a
//! 401 and nothing is enqueued; parse problems surface as status codes only,
//! never as error bodies.

use crate::queue::{PrContext, ScanJob};
use crate::AppState;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use serde_json::json;
use sha2::Sha256;
use std::sync::Arc;

type HmacSha256 = Hmac<Sha256>;

/// PR actions that trigger a differential scan.
const SCANNED_ACTIONS: [&str; 3] = ["opened", "synchronize", "reopened"];

#[derive(Debug, Deserialize)]
struct PullRequestEvent {
    action: String,
    pull_request: PullRequestInfo,
    repository: RepositoryInfo,
    installation: Option<InstallationInfo>,
}

#[derive(Debug, Deserialize)]
struct PullRequestInfo {
    number: u64,
    head: HeadRef,
    base: BaseRef,
}

#[derive(Debug, Deserialize)]
struct HeadRef {
    sha: String,
}

#[derive(Debug, Deserialize)]
struct BaseRef {
    #[serde(rename = "ref")]
    name: String,
}

#[derive(Debug, Deserialize)]
struct RepositoryInfo {
    name: String,
    clone_url: String,
    owner: OwnerInfo,
}

#[derive(Debug, Deserialize)]
struct OwnerInfo {
    login: String,
}

#[derive(Debug, Deserialize)]
struct InstallationInfo {
    id: u64,
}

/// Verify `X-Hub-Signature-256` over the raw body. Constant-time comparison
/// via the MAC itself.
pub fn verify_signature(secret: &str, body: &[u8], signature_header: &str) -> bool {
    let Some(hex_digest) = signature_header.strip_prefix("sha256=") else {
        return false;
    };
    let Ok(expected) = hex::decode(hex_digest) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

pub async fn github_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let signature = headers
        .get("X-Hub-Signature-256")
        .and_then(|value| value.to_str().ok())
        .unwrap_or("");
    if !verify_signature(&state.config.webhook_secret, &body, signature) {
        tracing::warn!("webhook rejected: missing or invalid signature");
        return StatusCode::UNAUTHORIZED.into_response();
    }

    let event = headers
        .get("X-GitHub-Event")
        .and_then(|value| value.to_str().ok())
        .unwrap_or("");

    match event {
        "ping" => (StatusCode::OK, Json(json!({ "status": "pong" }))).into_response(),
        "pull_request" => handle_pull_request(&state, &body).await,
        other => {
            tracing::debug!("ignoring event {other:?}");
            StatusCode::NO_CONTENT.into_response()
        }
    }
}

async fn handle_pull_request(state: &AppState, body: &[u8]) -> Response {
    // The response contract is closed over {401, 200, 202, 204}: anything we
    // cannot act on is ignored with 204, never a status GitHub would retry
    // or alert on.
    let event: PullRequestEvent = match serde_json::from_slice(body) {
        Ok(event) => event,
        Err(err) => {
            tracing::warn!("ignoring unparseable pull_request payload: {err}");
            return StatusCode::NO_CONTENT.into_response();
        }
    };

    if !SCANNED_ACTIONS.contains(&event.action.as_str()) {
        tracing::debug!("ignoring pull_request action {:?}", event.action);
        return StatusCode::NO_CONTENT.into_response();
    }

    let Some(installation) = event.installation else {
        tracing::warn!(
            "ignoring pull_request event for {}/{}: no installation, cannot scan",
            event.repository.owner.login,
            event.repository.name
        );
        return StatusCode::NO_CONTENT.into_response();
    };

    let job = ScanJob::differential(
        event.repository.clone_url.clone(),
        installation.id,
        PrContext {
            owner: event.repository.owner.login,
            repo: event.repository.name,
            pr_number: event.pull_request.number,
            base_ref: event.pull_request.base.name,
            head_sha: event.pull_request.head.sha,
        },
    );

    match state.queue.enqueue(&job).await {
        Ok(()) => (
            StatusCode::ACCEPTED,
            Json(json!({ "status": "queued", "job_id": job.id })),
        )
            .into_response(),
        Err(err) => {
            tracing::error!("failed to enqueue scan job, dropping event: {err}");
            StatusCode::NO_CONTENT.into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sign(secret: &str, body: &[u8]) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(body);
        format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
    }

    #[test]
    fn test_signature_roundtrip() {
        let secret = "hunter2";
        let body = br#"{"action":"opened"}"#;
        let header = sign(secret, body);
        assert!(verify_signature(secret, body, &header));
    }

    #[test]
    fn test_signature_rejects_tampered_body() {
        let secret = "hunter2";
        let header = sign(secret, b"original");
        assert!(!verify_signature(secret, b"originaL", &header));
    }

    #[test]
    fn test_signature_rejects_wrong_key() {
        let body = b"payload";
        let header = sign("key-prime", body);
        assert!(!verify_signature("key", body, &header));
    }

    #[test]
    fn test_signature_rejects_malformed_header() {
        assert!(!verify_signature("secret", b"body", ""));
        assert!(!verify_signature("secret", b"body", "sha1=abcdef"));
        assert!(!verify_signature("secret", b"body", "sha256=nothex"));
    }

    #[test]
    fn test_pull_request_payload_parses() {
        let payload = serde_json::json!({
            "action": "opened",
            "pull_request": {
                "number": 7,
                "head": { "sha": "abc123" },
                "base": { "ref": "main" }
            },
            "repository": {
                "name": "vault",
                "clone_url": "https://github.com/acme/vault.git",
                "owner": { "login": "acme" }
            },
            "installation": { "id": 42 }
        });
        let event: PullRequestEvent = serde_json::from_value(payload).unwrap();
        assert_eq!(event.action, "opened");
        assert_eq!(event.pull_request.number, 7);
        assert_eq!(event.pull_request.base.name, "main");
        assert_eq!(event.pull_request.head.sha, "abc123");
        assert_eq!(event.repository.owner.login, "acme");
        assert_eq!(event.installation.unwrap().id, 42);
    }
}

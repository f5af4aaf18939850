//! HTTP surface: the webhook endpoint plus a health probe.

pub mod webhook;

use crate::AppState;
use axum::{extract::State, Json};
use serde_json::json;
use std::sync::Arc;

pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(json!({ "status": "ok", "app": state.config.app_name }))
}

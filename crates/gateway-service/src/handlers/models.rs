//! `GET /v1/models` and `GET /v1/model/info` (spec.md §6).

use axum::extract::State;
use axum::Json;
use serde_json::{json, Value};

use crate::errors::{Dialect, DialectError};
use crate::state::ServerState;

use super::authorized_get;

async fn fetch_models(state: &ServerState) -> Result<Value, DialectError> {
    let url = state
        .config
        .llm_models_api_url
        .clone()
        .unwrap_or_else(|| derive_models_url(&state.config.llm_api_url));

    let body = authorized_get(&state.token_manager, &url)
        .await
        .map_err(|e| DialectError::new(Dialect::OpenAi, e))?;

    serde_json::from_slice(&body)
        .map_err(|e| DialectError::new(Dialect::OpenAi, gateway_core::GatewayError::Json(e)))
}

/// Best-effort `/v1/models` URL derivation when `llm_models_api_url` isn't
/// configured: Chat-Completions-style upstreams conventionally expose model
/// listing at the sibling `models` path of the chat endpoint.
fn derive_models_url(chat_url: &str) -> String {
    if let Some(idx) = chat_url.find("/chat/completions") {
        format!("{}/models", &chat_url[..idx])
    } else {
        chat_url.to_string()
    }
}

pub async fn list_models(State(state): State<ServerState>) -> Result<Json<Value>, DialectError> {
    let body = fetch_models(&state).await?;
    let ids: Vec<Value> = body
        .get("data")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default()
        .into_iter()
        .filter_map(|m| m.get("id").cloned().map(|id| json!({ "id": id, "object": "model" })))
        .collect();
    Ok(Json(json!({ "object": "list", "data": ids })))
}

pub async fn model_info(State(state): State<ServerState>) -> Result<Json<Value>, DialectError> {
    let body = fetch_models(&state).await?;
    Ok(Json(body))
}

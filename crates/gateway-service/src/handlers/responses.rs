//! `POST /v1/responses`, `GET /v1/responses/{id}`, `DELETE /v1/responses/{id}`
//! (spec.md §6, Responses dialect, C6+C9).

use axum::extract::{Path, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures_util::stream;
use gateway_core::upstream::{consume_stream, tools_to_upstream_json};
use gateway_core::{validate, GatewayError};
use gateway_responses::cache::CachedResponse;
use gateway_responses::{reply_to_response, request_to_canonical, tools_to_canonical, ResponsesRequest, ResponsesStreamEmitter};
use serde_json::Value;
use std::convert::Infallible;

use crate::errors::{Dialect, DialectError};
use crate::state::ServerState;

use super::passthrough;

const DIALECT: Dialect = Dialect::Responses;

pub async fn create(State(state): State<ServerState>, Json(body): Json<Value>) -> Result<Response, DialectError> {
    // Passthrough forwards the raw body verbatim (spec.md §4.6): branch
    // before any struct parsing so fields the typed request model doesn't
    // know about still make it to the upstream untouched.
    if state.config.llm_responses_passthrough_url.is_some() {
        return passthrough::relay(state, body).await;
    }

    let req: ResponsesRequest =
        serde_json::from_value(body).map_err(|e| DialectError::new(DIALECT, GatewayError::Json(e)))?;

    let canonical = request_to_canonical(&req, &state.response_cache)
        .await
        .map_err(|e| DialectError::new(DIALECT, e))?;
    let canonical = validate(canonical);

    let tools = req
        .tools
        .as_ref()
        .filter(|t| !t.is_empty())
        .map(|t| tools_to_upstream_json(&tools_to_canonical(t)));

    let model = state.config.llm_model_name.clone().unwrap_or_else(|| req.model.clone());
    let url = state
        .config
        .llm_responses_api_url
        .clone()
        .unwrap_or_else(|| state.config.llm_api_url.clone());
    let token_manager = state.token_manager.clone();
    let previous_response_id = req.previous_response_id.clone();
    let store = req.store;
    let cache = state.response_cache.clone();

    if req.stream {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel::<Result<Event, Infallible>>();
        let response_model = model.clone();
        let prev_id_for_emitter = previous_response_id.clone();

        tokio::spawn(async move {
            let mut emitter = ResponsesStreamEmitter::new(response_model.clone(), prev_id_for_emitter.clone());
            for event in emitter.open() {
                let _ = tx.send(Ok(Event::default().data(event.to_string())));
            }

            let result = consume_stream(
                token_manager,
                &url,
                &model,
                &canonical,
                req.max_output_tokens,
                tools,
                req.tool_choice.clone(),
                |chunk| {
                    for event in emitter.on_chunk(&chunk) {
                        let _ = tx.send(Ok(Event::default().data(event.to_string())));
                    }
                },
            )
            .await;

            match result {
                Ok(reply) => {
                    if store {
                        cache
                            .insert(
                                emitter.response_id().to_string(),
                                CachedResponse {
                                    model: response_model,
                                    reply,
                                    previous_response_id: prev_id_for_emitter,
                                },
                            )
                            .await;
                    }
                }
                Err(e) => {
                    for event in emitter.on_error(&e.to_string()) {
                        let _ = tx.send(Ok(Event::default().data(event.to_string())));
                    }
                }
            }
        });

        let out = stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|item| (item, rx)) });
        return Ok(Sse::new(out).keep_alive(KeepAlive::default()).into_response());
    }

    let reply = consume_stream(
        token_manager,
        &url,
        &model,
        &canonical,
        req.max_output_tokens,
        tools,
        req.tool_choice.clone(),
        |_chunk| {},
    )
    .await
    .map_err(|e| DialectError::new(DIALECT, e))?;

    let response_id = gateway_core::ids::generate("resp");
    if store {
        state
            .response_cache
            .insert(
                response_id.clone(),
                CachedResponse {
                    model: model.clone(),
                    reply: reply.clone(),
                    previous_response_id: previous_response_id.clone(),
                },
            )
            .await;
    }

    Ok(Json(reply_to_response(&reply, &model, &response_id, previous_response_id.as_deref())).into_response())
}

pub async fn retrieve(State(state): State<ServerState>, Path(id): Path<String>) -> Result<Json<serde_json::Value>, DialectError> {
    let cached = state
        .response_cache
        .get(&id)
        .await
        .ok_or_else(|| DialectError::new(DIALECT, GatewayError::ResponseNotFound(id.clone())))?;

    Ok(Json(reply_to_response(
        &cached.reply,
        &cached.model,
        &id,
        cached.previous_response_id.as_deref(),
    )))
}

pub async fn delete(State(state): State<ServerState>, Path(id): Path<String>) -> Result<Json<serde_json::Value>, DialectError> {
    let removed = state.response_cache.remove(&id).await;
    if removed.is_none() {
        return Err(DialectError::new(DIALECT, GatewayError::ResponseNotFound(id)));
    }
    Ok(Json(serde_json::json!({ "id": id, "object": "response", "deleted": true })))
}

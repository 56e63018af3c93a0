//! `POST /v1/messages` (spec.md §6, Anthropic dialect, C5+C9).

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::{http::HeaderMap, Json};
use futures_util::stream;
use gateway_anthropic::{
    reply_to_response, request_to_canonical, tools_to_canonical, AnthropicRequest, AnthropicStreamEmitter,
};
use gateway_core::upstream::{consume_stream, tools_to_upstream_json};
use gateway_core::{validate, GatewayError};
use std::convert::Infallible;

use crate::errors::{Dialect, DialectError};
use crate::state::ServerState;

const DIALECT: Dialect = Dialect::Anthropic;

pub async fn messages(
    State(state): State<ServerState>,
    headers: HeaderMap,
    Json(req): Json<AnthropicRequest>,
) -> Result<Response, DialectError> {
    if !headers.contains_key("anthropic-version") {
        tracing::warn!("request to /v1/messages missing anthropic-version header");
    }

    // spec.md §7: "missing max_tokens for Anthropic" is a structural dialect
    // violation rejected at the boundary, not silently defaulted.
    let max_tokens = req
        .max_tokens
        .ok_or_else(|| DialectError::new(DIALECT, GatewayError::InvalidRequest("max_tokens is required".into())))?;

    let canonical = request_to_canonical(&req).map_err(|e| DialectError::new(DIALECT, e))?;
    let canonical = validate(canonical);

    let tools = req
        .tools
        .as_ref()
        .filter(|t| !t.is_empty())
        .map(|t| tools_to_upstream_json(&tools_to_canonical(t)));

    let model = state.config.llm_model_name.clone().unwrap_or_else(|| req.model.clone());
    let url = state.config.llm_api_url.clone();
    let token_manager = state.token_manager.clone();

    if req.stream {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel::<Result<Event, Infallible>>();
        let response_model = model.clone();

        tokio::spawn(async move {
            let mut emitter = AnthropicStreamEmitter::new(response_model);
            for event in emitter.open() {
                let _ = tx.send(Ok(Event::default().data(event.to_string())));
            }

            let result = consume_stream(
                token_manager,
                &url,
                &model,
                &canonical,
                Some(max_tokens),
                tools,
                req.tool_choice.clone(),
                |chunk| {
                    for event in emitter.on_chunk(&chunk) {
                        let _ = tx.send(Ok(Event::default().data(event.to_string())));
                    }
                },
            )
            .await;

            if let Err(e) = result {
                let event = emitter.on_error(&e.to_string());
                let _ = tx.send(Ok(Event::default().event("error").data(event.to_string())));
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
        Some(max_tokens),
        tools,
        req.tool_choice.clone(),
        |_chunk| {},
    )
    .await
    .map_err(|e| DialectError::new(DIALECT, e))?;

    Ok(Json(reply_to_response(&reply, &model)).into_response())
}

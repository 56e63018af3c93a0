//! `POST /v1/chat/completions` (spec.md §6, OpenAI dialect, C7+C9).

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures_util::stream;
use gateway_core::upstream::{consume_stream, tools_to_upstream_json};
use gateway_core::validate;
use gateway_openai::{reply_to_response, request_to_canonical, tools_to_canonical, OpenAiRequest, OpenAiStreamEmitter};
use std::convert::Infallible;

use crate::errors::{Dialect, DialectError};
use crate::state::ServerState;

const DIALECT: Dialect = Dialect::OpenAi;

pub async fn chat_completions(
    State(state): State<ServerState>,
    Json(req): Json<OpenAiRequest>,
) -> Result<Response, DialectError> {
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
        let created = chrono::Utc::now().timestamp();
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel::<Result<Event, Infallible>>();
        let response_model = model.clone();

        tokio::spawn(async move {
            let mut emitter = OpenAiStreamEmitter::new(response_model.clone(), created);
            let opening = serde_json::json!({
                "id": "chatcmpl-init",
                "object": "chat.completion.chunk",
                "created": created,
                "model": response_model,
                "choices": [{ "index": 0, "delta": { "role": "assistant" }, "finish_reason": null }],
            });
            let _ = tx.send(Ok(Event::default().data(opening.to_string())));

            let result = consume_stream(
                token_manager,
                &url,
                &model,
                &canonical,
                req.max_tokens,
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
                let _ = tx.send(Ok(Event::default().data(emitter.on_error(&e.to_string()).to_string())));
            }
            let _ = tx.send(Ok(Event::default().data("[DONE]")));
        });

        let out = stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|item| (item, rx)) });
        return Ok(Sse::new(out).keep_alive(KeepAlive::default()).into_response());
    }

    let reply = consume_stream(
        token_manager,
        &url,
        &model,
        &canonical,
        req.max_tokens,
        tools,
        req.tool_choice.clone(),
        |_chunk| {},
    )
    .await
    .map_err(|e| DialectError::new(DIALECT, e))?;

    Ok(Json(reply_to_response(&reply, &model)).into_response())
}

//! Responses passthrough relay (spec.md §4.6, C8): raw byte forwarding to a
//! native Responses-speaking upstream, bypassing every dialect converter.
//! Grounded in `examples/other_examples/78f8528d_ryanolson-cc-proxy__crates-cc-proxy-src-proxy-primary.rs.rs`'s
//! `HOP_BY_HOP_HEADERS`/header-forwarding shape, adapted from Anthropic's
//! wire protocol to Responses and from a header-driven reqwest call to one
//! built entirely in-process since the only rewrite inputs here are the
//! parsed request body and the gateway's own config.

use axum::body::Body;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use gateway_core::token_manager::bearer_header;
use serde_json::{json, Value};

use crate::errors::{Dialect, DialectError};
use crate::state::ServerState;

const VALID_EFFORTS: &[&str] = &["low", "medium", "high", "xhigh", "minimal", "none"];

/// Headers that should NOT be forwarded from the upstream response to the client.
const HOP_BY_HOP_HEADERS: &[&str] = &[
    "host",
    "connection",
    "transfer-encoding",
    "keep-alive",
    "upgrade",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailers",
];

/// Relay a Responses request body verbatim to the configured passthrough
/// upstream, rewriting only `model` and `reasoning` in place.
pub async fn relay(state: ServerState, mut body: Value) -> Result<Response, DialectError> {
    // Environment reload discipline (spec.md §4.6): pick up config edits
    // without a process restart on every passthrough call.
    let config = state
        .reload_config()
        .await
        .map_err(|e| DialectError::new(Dialect::Responses, e))?;

    let url = config
        .llm_responses_passthrough_url
        .clone()
        .ok_or_else(|| {
            DialectError::new(
                Dialect::Responses,
                gateway_core::GatewayError::InvalidRequest("passthrough URL not configured".into()),
            )
        })?;

    rewrite_model(&mut body, config.llm_model_name.as_deref());
    rewrite_reasoning(
        &mut body,
        config.llm_reasoning_strength.as_deref(),
        config.llm_non_reasoning_strength.as_deref(),
    );

    let token = state
        .token_manager
        .get_access_token()
        .await
        .map_err(|e| DialectError::new(Dialect::Responses, e))?;
    let auth = bearer_header(&token).map_err(|e| DialectError::new(Dialect::Responses, e))?;

    let upstream = state
        .passthrough_client
        .post(&url)
        .header("content-type", "application/json")
        .header(http::header::AUTHORIZATION, auth)
        .json(&body)
        .send()
        .await
        .map_err(|e| DialectError::new(Dialect::Responses, gateway_core::GatewayError::ConnectionError(e.to_string())))?;

    let status = StatusCode::from_u16(upstream.status().as_u16()).unwrap_or(StatusCode::BAD_GATEWAY);

    let mut builder = Response::builder().status(status);
    let mut saw_content_type = false;
    for (name, value) in upstream.headers().iter() {
        let name_str = name.as_str().to_lowercase();
        if HOP_BY_HOP_HEADERS.contains(&name_str.as_str()) {
            continue;
        }
        if name_str == http::header::CONTENT_TYPE.as_str() {
            saw_content_type = true;
        }
        builder = builder.header(name, value);
    }
    if !saw_content_type {
        builder = builder.header(http::header::CONTENT_TYPE, "application/json");
    }

    let byte_stream = upstream.bytes_stream();
    let response = builder
        .body(Body::from_stream(byte_stream))
        .unwrap_or_else(|_| StatusCode::BAD_GATEWAY.into_response());

    Ok(response)
}

/// (a) If a configured model override already carries the `oca/` prefix,
/// it overwrites the incoming `model` outright; otherwise the incoming name
/// is `oca/`-prefixed (unless already prefixed).
fn rewrite_model(body: &mut Value, configured_model: Option<&str>) {
    let Some(obj) = body.as_object_mut() else { return };
    if let Some(configured) = configured_model {
        if configured.starts_with("oca/") {
            obj.insert("model".into(), json!(configured));
            return;
        }
    }
    if let Some(Value::String(model)) = obj.get("model") {
        if !model.starts_with("oca/") {
            obj.insert("model".into(), json!(format!("oca/{model}")));
        }
    }
}

/// (b)/(c) reasoning-effort override: overwrite `reasoning.effort` when a
/// valid override is configured; synthesize `{effort, summary:"auto"}` when
/// the incoming `reasoning` is explicitly null and a non-reasoning default
/// exists. Gated on the `reasoning` key being present at all (even if
/// null) — an incoming body with no `reasoning` key is left untouched,
/// matching the original passthrough's `if "reasoning" in modified_body`.
fn rewrite_reasoning(body: &mut Value, reasoning_override: Option<&str>, non_reasoning_default: Option<&str>) {
    let Some(obj) = body.as_object_mut() else { return };
    if !obj.contains_key("reasoning") {
        return;
    }

    let is_null = matches!(obj.get("reasoning"), Some(Value::Null));

    if let Some(effort) = reasoning_override.filter(|e| VALID_EFFORTS.contains(e)) {
        if is_null {
            obj.insert("reasoning".into(), json!({ "effort": effort, "summary": "auto" }));
        } else if let Some(reasoning) = obj.get_mut("reasoning").and_then(Value::as_object_mut) {
            reasoning.insert("effort".into(), json!(effort));
        }
        return;
    }

    if is_null {
        if let Some(effort) = non_reasoning_default {
            obj.insert("reasoning".into(), json!({ "effort": effort, "summary": "auto" }));
        }
    }
}

//! Chat-Completions-style upstream client.
//!
//! Request shapes and the tool-builder-map accumulation pattern generalize
//! a single `HashMap<usize, ToolUseState>` (index-only key) into the
//! three-tier key this gateway needs when upstreams omit `index`.

use std::collections::HashMap;
use std::sync::Arc;

use futures_util::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::GatewayError;
use crate::message::{CanonicalMessage, CanonicalReply, FinishReason, ToolCallRecord, Usage};
use crate::token_manager::TokenManager;

/// Upstream wire shape for one message in the Chat Completions `messages`
/// array.
#[derive(Debug, Serialize)]
pub struct UpstreamMessage {
    pub role: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<UpstreamToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct UpstreamToolCall {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub id: String,
    pub function: UpstreamFunctionCall,
}

#[derive(Debug, Serialize)]
pub struct UpstreamFunctionCall {
    pub name: String,
    pub arguments: String,
}

#[derive(Debug, Serialize, Default)]
pub struct StreamOptions {
    pub include_usage: bool,
}

#[derive(Debug, Serialize)]
pub struct UpstreamRequest {
    pub model: String,
    pub messages: Vec<UpstreamMessage>,
    pub stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream_options: Option<StreamOptions>,
}

/// Assemble an upstream request from a (validated) canonical message
/// sequence. `tools`/`tool_choice`/`max_tokens` are forwarded only when
/// present and non-empty.
pub fn build_request(
    model: &str,
    messages: &[CanonicalMessage],
    max_tokens: Option<u32>,
    tools: Option<Value>,
    tool_choice: Option<Value>,
    stream: bool,
) -> UpstreamRequest {
    let messages = messages.iter().flat_map(to_upstream_messages).collect();

    let tools = match tools {
        Some(Value::Array(a)) if a.is_empty() => None,
        other => other,
    };

    UpstreamRequest {
        model: model.to_string(),
        messages,
        stream,
        max_tokens,
        tools,
        tool_choice,
        stream_options: stream.then(|| StreamOptions { include_usage: false }),
    }
}

fn to_upstream_messages(m: &CanonicalMessage) -> Vec<UpstreamMessage> {
    match m {
        CanonicalMessage::User { text } => vec![UpstreamMessage {
            role: "user",
            content: Some(text.clone()),
            tool_calls: None,
            tool_call_id: None,
        }],
        CanonicalMessage::System { text } => vec![UpstreamMessage {
            role: "system",
            content: Some(text.clone()),
            tool_calls: None,
            tool_call_id: None,
        }],
        CanonicalMessage::AssistantPlain { text } => vec![UpstreamMessage {
            role: "assistant",
            content: Some(text.clone()),
            tool_calls: None,
            tool_call_id: None,
        }],
        CanonicalMessage::AssistantWithToolCalls { text, tool_calls } => vec![UpstreamMessage {
            role: "assistant",
            content: text.clone(),
            tool_calls: Some(
                tool_calls
                    .iter()
                    .map(|c| UpstreamToolCall {
                        kind: "function",
                        id: c.id.clone(),
                        function: UpstreamFunctionCall {
                            name: c.name.clone(),
                            arguments: c.arguments.clone(),
                        },
                    })
                    .collect(),
            ),
            tool_call_id: None,
        }],
        CanonicalMessage::ToolResult { tool_call_id, text } => vec![UpstreamMessage {
            role: "tool",
            content: Some(text.clone()),
            tool_calls: None,
            tool_call_id: Some(tool_call_id.clone()),
        }],
    }
}

// ---------------------------------------------------------------------
// Streaming response parsing
// ---------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct RawStreamChunk {
    #[serde(default)]
    choices: Vec<RawStreamChoice>,
    #[serde(default)]
    usage: Option<RawUsage>,
}

#[derive(Debug, Deserialize)]
struct RawStreamChoice {
    #[serde(default)]
    delta: RawDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RawDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<RawToolCallDelta>>,
    /// Legacy pre-tool-calls function-call field some backends still emit.
    #[serde(default)]
    function_call: Option<RawLegacyFunctionCall>,
}

#[derive(Debug, Deserialize)]
struct RawLegacyFunctionCall {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawToolCallDelta {
    #[serde(default)]
    index: Option<usize>,
    #[serde(default)]
    id: Option<String>,
    /// The canonical model has no `type` field to carry this to — every
    /// tool call is `"function"` in this gateway's scope, so the value is
    /// parsed and discarded.
    #[serde(rename = "type", default)]
    #[allow(dead_code)]
    kind: Option<String>,
    #[serde(default)]
    function: Option<RawFunctionDelta>,
}

#[derive(Debug, Default, Deserialize)]
struct RawFunctionDelta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

/// One emitted unit from the streaming parser: a text delta and/or
/// in-progress tool-call fragments, surfaced to the dialect converter in
/// real time so it can remultiplex as events arrive.
#[derive(Debug, Clone, Default)]
pub struct StreamChunk {
    pub text_delta: Option<String>,
    pub tool_call_deltas: Vec<ToolCallDelta>,
    pub finish_reason: Option<FinishReason>,
    pub usage: Option<Usage>,
}

/// A partial tool-call fragment keyed to its builder slot, surfaced for
/// dialects (Anthropic, Responses) that stream tool-call construction
/// incrementally rather than only at the end.
#[derive(Debug, Clone)]
pub struct ToolCallDelta {
    pub slot: usize,
    pub id: Option<String>,
    pub name: Option<String>,
    pub arguments_fragment: Option<String>,
    pub is_new: bool,
}

/// Key identifying a tool-builder slot: the upstream's index when present,
/// else its id, else a single shared slot at index 0.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum BuilderKey {
    Index(usize),
    Id(String),
}

#[derive(Debug, Default)]
struct ToolBuilder {
    id: Option<String>,
    name: Option<String>,
    arguments: String,
}

/// Accumulates fragmented tool-call deltas across an entire stream and
/// seals them into canonical [`ToolCallRecord`]s on completion.
#[derive(Default)]
pub struct ToolCallAccumulator {
    builders: HashMap<BuilderKey, ToolBuilder>,
    order: Vec<BuilderKey>,
}

impl ToolCallAccumulator {
    fn key_for(&self, delta: &RawToolCallDelta) -> BuilderKey {
        if let Some(i) = delta.index {
            BuilderKey::Index(i)
        } else if let Some(id) = &delta.id {
            BuilderKey::Id(id.clone())
        } else {
            BuilderKey::Index(0)
        }
    }

    fn apply(&mut self, delta: &RawToolCallDelta) -> ToolCallDelta {
        let key = self.key_for(delta);
        let is_new = !self.builders.contains_key(&key);
        if is_new {
            self.order.push(key.clone());
        }
        let slot = self.order.iter().position(|k| k == &key).unwrap();

        let builder = self.builders.entry(key).or_default();

        if builder.id.is_none() {
            if let Some(id) = &delta.id {
                if !id.is_empty() {
                    builder.id = Some(id.clone());
                }
            }
        }
        let mut arguments_fragment = None;
        if let Some(function) = &delta.function {
            if builder.name.is_none() {
                if let Some(name) = &function.name {
                    if !name.is_empty() {
                        builder.name = Some(name.clone());
                    }
                }
            }
            if let Some(args) = &function.arguments {
                if !args.is_empty() {
                    builder.arguments.push_str(args);
                    arguments_fragment = Some(args.clone());
                }
            }
        }

        ToolCallDelta {
            slot,
            id: builder.id.clone(),
            name: builder.name.clone(),
            arguments_fragment,
            is_new,
        }
    }

    /// Apply a legacy `function_call` delta as if it were a tool-call delta
    /// at index 0.
    fn apply_legacy(&mut self, legacy: &RawLegacyFunctionCall) -> ToolCallDelta {
        let synthetic = RawToolCallDelta {
            index: Some(0),
            id: None,
            kind: Some("function".to_string()),
            function: Some(RawFunctionDelta {
                name: legacy.name.clone(),
                arguments: legacy.arguments.clone(),
            }),
        };
        self.apply(&synthetic)
    }

    /// Seal the accumulated builders into the final, order-preserving
    /// tool-call list. `arguments` is never JSON-parsed here.
    pub fn seal(&self) -> Vec<ToolCallRecord> {
        self.order
            .iter()
            .filter_map(|key| self.builders.get(key))
            .filter(|b| b.name.is_some() || b.id.is_some())
            .map(|b| ToolCallRecord {
                id: b.id.clone().unwrap_or_default(),
                name: b.name.clone().unwrap_or_default(),
                arguments: b.arguments.clone(),
            })
            .collect()
    }
}

/// Drive a Chat-Completions-style SSE stream to completion, invoking
/// `on_chunk` for each parsed event and returning the sealed aggregate
/// reply. Used both for the non-streaming path (drained internally with a
/// no-op `on_chunk`) and, with a live `on_chunk`, for true streaming
/// responses.
pub async fn consume_stream(
    token_manager: Arc<TokenManager>,
    url: &str,
    model: &str,
    messages: &[CanonicalMessage],
    max_tokens: Option<u32>,
    tools: Option<Value>,
    tool_choice: Option<Value>,
    mut on_chunk: impl FnMut(StreamChunk) + Send,
) -> Result<CanonicalReply, GatewayError> {
    let request = build_request(model, messages, max_tokens, tools, tool_choice, true);
    let body = serde_json::to_vec(&request)?;

    let stream = token_manager
        .stream_request(
            http::Method::POST,
            url,
            move |b| {
                let body = body.clone();
                b.header("content-type", "application/json").body(body)
            },
            |_headers| {},
        )
        .await?;

    tokio::pin!(stream);

    let mut accumulator = ToolCallAccumulator::default();
    let mut text = String::new();
    let mut finish_reason = FinishReason::Other;
    let mut usage = None;
    let mut buf = Vec::new();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        buf.extend_from_slice(&chunk);

        while let Some(pos) = find_line_end(&buf) {
            let line = buf.drain(..pos).collect::<Vec<u8>>();
            if !buf.is_empty() {
                buf.remove(0); // consume the newline itself
            }
            let line = String::from_utf8_lossy(&line);
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let Some(data) = line.strip_prefix("data: ") else {
                continue;
            };
            if data == "[DONE]" {
                continue;
            }

            let parsed: RawStreamChunk = serde_json::from_str(data)?;
            let mut out = StreamChunk::default();

            if let Some(u) = parsed.usage {
                usage = Some(Usage {
                    input_tokens: u.prompt_tokens,
                    output_tokens: u.completion_tokens,
                });
                out.usage = usage;
            }

            for choice in &parsed.choices {
                if let Some(content) = &choice.delta.content {
                    if !content.is_empty() {
                        text.push_str(content);
                        out.text_delta = Some(content.clone());
                    }
                }
                if let Some(tool_calls) = &choice.delta.tool_calls {
                    for tc in tool_calls {
                        out.tool_call_deltas.push(accumulator.apply(tc));
                    }
                }
                if let Some(legacy) = &choice.delta.function_call {
                    out.tool_call_deltas.push(accumulator.apply_legacy(legacy));
                }
                if let Some(fr) = &choice.finish_reason {
                    finish_reason = FinishReason::from_upstream(fr);
                    out.finish_reason = Some(finish_reason);
                }
            }

            on_chunk(out);
        }
    }

    let tool_calls = accumulator.seal();
    Ok(CanonicalReply {
        text: (!text.is_empty()).then_some(text),
        tool_calls,
        finish_reason,
        usage,
    })
}

fn find_line_end(buf: &[u8]) -> Option<usize> {
    buf.iter().position(|&b| b == b'\n')
}

/// Convert the canonical tool schema (`{name, description, parameters}`,
/// shared by every dialect converter) into the upstream Chat-Completions
/// `tools` array shape (`{type:"function", function:{...}}`).
pub fn tools_to_upstream_json(tools: &[Value]) -> Value {
    Value::Array(
        tools
            .iter()
            .map(|t| {
                serde_json::json!({
                    "type": "function",
                    "function": {
                        "name": t.get("name").cloned().unwrap_or(Value::Null),
                        "description": t.get("description").cloned().unwrap_or(Value::Null),
                        "parameters": t.get("parameters").cloned().unwrap_or(Value::Null),
                    }
                })
            })
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn delta(index: Option<usize>, id: Option<&str>, name: Option<&str>, args: Option<&str>) -> RawToolCallDelta {
        RawToolCallDelta {
            index,
            id: id.map(String::from),
            kind: Some("function".to_string()),
            function: Some(RawFunctionDelta {
                name: name.map(String::from),
                arguments: args.map(String::from),
            }),
        }
    }

    #[test]
    fn accumulates_fragmented_arguments_by_index() {
        let mut acc = ToolCallAccumulator::default();
        acc.apply(&delta(Some(0), Some("call_1"), Some("search"), Some("{\"q\":")));
        acc.apply(&delta(Some(0), None, None, Some("\"rust\"}")));
        let sealed = acc.seal();
        assert_eq!(sealed.len(), 1);
        assert_eq!(sealed[0].id, "call_1");
        assert_eq!(sealed[0].name, "search");
        assert_eq!(sealed[0].arguments, "{\"q\":\"rust\"}");
    }

    #[test]
    fn falls_back_to_id_key_when_index_absent() {
        let mut acc = ToolCallAccumulator::default();
        acc.apply(&delta(None, Some("call_a"), Some("f1"), Some("{}")));
        acc.apply(&delta(None, Some("call_b"), Some("f2"), Some("{}")));
        let sealed = acc.seal();
        assert_eq!(sealed.len(), 2);
        assert_eq!(sealed[0].id, "call_a");
        assert_eq!(sealed[1].id, "call_b");
    }

    #[test]
    fn falls_back_to_index_zero_when_neither_present() {
        let mut acc = ToolCallAccumulator::default();
        acc.apply(&delta(None, None, Some("only"), Some("{}")));
        let sealed = acc.seal();
        assert_eq!(sealed.len(), 1);
        assert_eq!(sealed[0].name, "only");
    }

    #[test]
    fn legacy_function_call_normalizes_to_index_zero() {
        let mut acc = ToolCallAccumulator::default();
        let legacy = RawLegacyFunctionCall {
            name: Some("legacy_fn".to_string()),
            arguments: Some("{\"a\":1}".to_string()),
        };
        acc.apply_legacy(&legacy);
        let sealed = acc.seal();
        assert_eq!(sealed.len(), 1);
        assert_eq!(sealed[0].name, "legacy_fn");
        assert_eq!(sealed[0].arguments, "{\"a\":1}");
    }

    #[test]
    fn first_non_empty_id_and_name_win_subsequent_empties_ignored() {
        let mut acc = ToolCallAccumulator::default();
        acc.apply(&delta(Some(0), Some("call_1"), Some("search"), None));
        acc.apply(&delta(Some(0), Some(""), Some(""), Some("{}")));
        let sealed = acc.seal();
        assert_eq!(sealed[0].id, "call_1");
        assert_eq!(sealed[0].name, "search");
    }

    #[test]
    fn build_request_omits_empty_tools_and_includes_stream_options() {
        let req = build_request(
            "gpt-4o",
            &[CanonicalMessage::User { text: "hi".into() }],
            None,
            Some(serde_json::json!([])),
            None,
            true,
        );
        assert!(req.tools.is_none());
        assert!(req.stream_options.is_some());
        assert_eq!(req.messages.len(), 1);
    }
}

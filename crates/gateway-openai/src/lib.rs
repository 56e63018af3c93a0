//! OpenAI Chat Completions dialect converter.
//!
//! The near-identity dialect: canonical messages already mirror the
//! Chat-Completions wire shape (`gateway_core::upstream`'s
//! `UpstreamMessage` family exists for exactly this reason), so this
//! converter's job is mostly field renaming between the client-facing JSON
//! and the canonical model, plus a translucent SSE reshaping for the
//! streaming path. The `OpenAiMessage`/`OpenAiResponse`/`OpenAiFunctionCall`
//! shapes mirror the ones used to parse an OpenAI upstream reply, reused
//! here as the *client-facing* shape instead.

use gateway_core::message::{CanonicalMessage, CanonicalReply, ToolCallRecord, Usage};
use gateway_core::upstream::StreamChunk;
use gateway_core::{ids, GatewayError};
use serde::Deserialize;
use serde_json::{json, Value};

// ---------------------------------------------------------------------
// Request → canonical
// ---------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct OpenAiRequest {
    pub model: String,
    pub messages: Vec<OpenAiMessage>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub tools: Option<Vec<OpenAiToolDef>>,
    #[serde(default)]
    pub tool_choice: Option<Value>,
    #[serde(default)]
    pub stream: bool,
}

#[derive(Debug, Deserialize)]
pub struct OpenAiMessage {
    pub role: String,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub tool_calls: Option<Vec<OpenAiToolCall>>,
    #[serde(default)]
    pub tool_call_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct OpenAiToolCall {
    pub id: String,
    pub function: OpenAiFunctionCall,
}

#[derive(Debug, Deserialize)]
pub struct OpenAiFunctionCall {
    pub name: String,
    pub arguments: String,
}

#[derive(Debug, Deserialize)]
pub struct OpenAiToolDef {
    #[serde(rename = "type", default)]
    pub kind: String,
    pub function: OpenAiFunctionDef,
}

#[derive(Debug, Deserialize)]
pub struct OpenAiFunctionDef {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub parameters: Value,
}

/// Identity mapping from the OpenAI wire shape into canonical messages —
/// the two models are the same shape, so this is field-for-field, not
/// structural translation.
pub fn request_to_canonical(req: &OpenAiRequest) -> Result<Vec<CanonicalMessage>, GatewayError> {
    req.messages.iter().map(message_to_canonical).collect()
}

fn message_to_canonical(m: &OpenAiMessage) -> Result<CanonicalMessage, GatewayError> {
    match m.role.as_str() {
        "user" => Ok(CanonicalMessage::User {
            text: m.content.clone().unwrap_or_default(),
        }),
        "system" | "developer" => Ok(CanonicalMessage::System {
            text: m.content.clone().unwrap_or_default(),
        }),
        "tool" => {
            let tool_call_id = m.tool_call_id.clone().ok_or_else(|| {
                GatewayError::InvalidRequest("tool message missing tool_call_id".into())
            })?;
            Ok(CanonicalMessage::ToolResult {
                tool_call_id,
                text: m.content.clone().unwrap_or_default(),
            })
        }
        "assistant" => match &m.tool_calls {
            Some(calls) if !calls.is_empty() => Ok(CanonicalMessage::AssistantWithToolCalls {
                text: m.content.clone(),
                tool_calls: calls
                    .iter()
                    .map(|c| ToolCallRecord {
                        id: c.id.clone(),
                        name: c.function.name.clone(),
                        arguments: c.function.arguments.clone(),
                    })
                    .collect(),
            }),
            _ => Ok(CanonicalMessage::AssistantPlain {
                text: m.content.clone().unwrap_or_default(),
            }),
        },
        other => Err(GatewayError::InvalidRequest(format!("invalid role: {other}"))),
    }
}

/// OpenAI `tools` array (`{type:"function", function:{name,description,parameters}}`)
/// to the canonical tool schema (`{name, description, parameters}`).
pub fn tools_to_canonical(tools: &[OpenAiToolDef]) -> Vec<Value> {
    tools
        .iter()
        .map(|t| {
            json!({
                "name": t.function.name,
                "description": t.function.description,
                "parameters": t.function.parameters,
            })
        })
        .collect()
}

// ---------------------------------------------------------------------
// Canonical reply → response
// ---------------------------------------------------------------------

/// Build a non-streaming `chat.completion` response mirroring the
/// canonical reply shape directly.
pub fn reply_to_response(reply: &CanonicalReply, model: &str) -> Value {
    let tool_calls = (!reply.tool_calls.is_empty()).then(|| {
        reply
            .tool_calls
            .iter()
            .map(|c| {
                json!({
                    "id": c.id,
                    "type": "function",
                    "function": { "name": c.name, "arguments": c.arguments },
                })
            })
            .collect::<Vec<_>>()
    });

    let finish_reason = if reply.tool_calls.is_empty() { "stop" } else { "tool_calls" };

    json!({
        "id": ids::generate("chatcmpl"),
        "object": "chat.completion",
        "model": model,
        "choices": [{
            "index": 0,
            "message": {
                "role": "assistant",
                "content": reply.text,
                "tool_calls": tool_calls,
            },
            "finish_reason": finish_reason,
        }],
        "usage": usage_json(reply.usage),
    })
}

fn usage_json(usage: Option<Usage>) -> Value {
    let usage = usage.unwrap_or_default();
    json!({
        "prompt_tokens": usage.input_tokens,
        "completion_tokens": usage.output_tokens,
        "total_tokens": usage.input_tokens + usage.output_tokens,
    })
}

// ---------------------------------------------------------------------
// Streaming: translucent remultiplexing
// ---------------------------------------------------------------------

/// Reshapes each upstream [`StreamChunk`] into a `chat.completion.chunk`
/// frame with the same `delta` fields the upstream already emits — a
/// translucent remixing, since the dialect is already the upstream's own.
/// One emitter per response; `id`/`created` are fixed at construction so
/// every chunk in the stream shares them.
pub struct OpenAiStreamEmitter {
    id: String,
    model: String,
    created: i64,
}

impl OpenAiStreamEmitter {
    pub fn new(model: impl Into<String>, created: i64) -> Self {
        Self {
            id: ids::generate("chatcmpl"),
            model: model.into(),
            created,
        }
    }

    pub fn on_chunk(&mut self, chunk: &StreamChunk) -> Vec<Value> {
        let mut events = Vec::new();

        if chunk.text_delta.is_some() || !chunk.tool_call_deltas.is_empty() {
            let mut delta = serde_json::Map::new();
            if let Some(text) = &chunk.text_delta {
                delta.insert("content".into(), json!(text));
            }
            if !chunk.tool_call_deltas.is_empty() {
                let tool_calls: Vec<Value> = chunk
                    .tool_call_deltas
                    .iter()
                    .map(|d| {
                        let mut function = serde_json::Map::new();
                        if let Some(name) = &d.name {
                            function.insert("name".into(), json!(name));
                        }
                        if let Some(frag) = &d.arguments_fragment {
                            function.insert("arguments".into(), json!(frag));
                        }
                        let mut entry = serde_json::Map::new();
                        entry.insert("index".into(), json!(d.slot));
                        if let Some(id) = &d.id {
                            entry.insert("id".into(), json!(id));
                            entry.insert("type".into(), json!("function"));
                        }
                        entry.insert("function".into(), Value::Object(function));
                        Value::Object(entry)
                    })
                    .collect();
                delta.insert("tool_calls".into(), json!(tool_calls));
            }
            events.push(self.frame(Value::Object(delta), None));
        }

        if let Some(reason) = chunk.finish_reason {
            let finish_reason = if matches!(reason, gateway_core::FinishReason::ToolCalls) {
                "tool_calls"
            } else if matches!(reason, gateway_core::FinishReason::Length) {
                "length"
            } else {
                "stop"
            };
            events.push(self.frame(json!({}), Some(finish_reason)));
        }

        events
    }

    fn frame(&self, delta: Value, finish_reason: Option<&str>) -> Value {
        json!({
            "id": self.id,
            "object": "chat.completion.chunk",
            "created": self.created,
            "model": self.model,
            "choices": [{
                "index": 0,
                "delta": delta,
                "finish_reason": finish_reason,
            }],
        })
    }

    /// Mid-stream failure terminator: a single error frame. The caller
    /// still emits `[DONE]` afterward.
    pub fn on_error(&self, message: &str) -> Value {
        tracing::warn!(message, "openai stream terminated mid-flight");
        json!({ "error": { "message": message, "type": "server_error" } })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gateway_core::message::FinishReason;
    use gateway_core::upstream::ToolCallDelta;

    #[test]
    fn user_message_round_trips() {
        let req = OpenAiRequest {
            model: "gpt-4o".into(),
            messages: vec![OpenAiMessage {
                role: "user".into(),
                content: Some("hi".into()),
                tool_calls: None,
                tool_call_id: None,
            }],
            max_tokens: None,
            tools: None,
            tool_choice: None,
            stream: false,
        };
        let canonical = request_to_canonical(&req).unwrap();
        assert_eq!(canonical, vec![CanonicalMessage::User { text: "hi".into() }]);
    }

    #[test]
    fn tool_message_requires_tool_call_id() {
        let req = OpenAiRequest {
            model: "gpt-4o".into(),
            messages: vec![OpenAiMessage {
                role: "tool".into(),
                content: Some("42".into()),
                tool_calls: None,
                tool_call_id: None,
            }],
            max_tokens: None,
            tools: None,
            tool_choice: None,
            stream: false,
        };
        assert!(request_to_canonical(&req).is_err());
    }

    #[test]
    fn assistant_with_tool_calls_maps_through() {
        let req = OpenAiRequest {
            model: "gpt-4o".into(),
            messages: vec![OpenAiMessage {
                role: "assistant".into(),
                content: None,
                tool_calls: Some(vec![OpenAiToolCall {
                    id: "call_1".into(),
                    function: OpenAiFunctionCall {
                        name: "search".into(),
                        arguments: "{}".into(),
                    },
                }]),
                tool_call_id: None,
            }],
            max_tokens: None,
            tools: None,
            tool_choice: None,
            stream: false,
        };
        let canonical = request_to_canonical(&req).unwrap();
        match &canonical[0] {
            CanonicalMessage::AssistantWithToolCalls { tool_calls, .. } => {
                assert_eq!(tool_calls[0].id, "call_1");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn reply_sets_tool_calls_finish_reason() {
        let reply = CanonicalReply {
            text: None,
            tool_calls: vec![ToolCallRecord {
                id: "call_1".into(),
                name: "search".into(),
                arguments: "{}".into(),
            }],
            finish_reason: FinishReason::ToolCalls,
            usage: None,
        };
        let resp = reply_to_response(&reply, "gpt-4o");
        assert_eq!(resp["choices"][0]["finish_reason"], "tool_calls");
        assert_eq!(resp["choices"][0]["message"]["tool_calls"][0]["id"], "call_1");
    }

    #[test]
    fn stream_emitter_reshapes_text_and_tool_deltas() {
        let mut emitter = OpenAiStreamEmitter::new("gpt-4o", 0);
        let events = emitter.on_chunk(&StreamChunk {
            text_delta: Some("hi".into()),
            tool_call_deltas: vec![ToolCallDelta {
                slot: 0,
                id: Some("call_1".into()),
                name: Some("search".into()),
                arguments_fragment: Some("{}".into()),
                is_new: true,
            }],
            finish_reason: None,
            usage: None,
        });
        assert_eq!(events.len(), 1);
        assert_eq!(events[0]["object"], "chat.completion.chunk");
        assert_eq!(events[0]["choices"][0]["delta"]["content"], "hi");

        let done = emitter.on_chunk(&StreamChunk {
            text_delta: None,
            tool_call_deltas: vec![],
            finish_reason: Some(FinishReason::Stop),
            usage: None,
        });
        assert_eq!(done[0]["choices"][0]["finish_reason"], "stop");
    }
}

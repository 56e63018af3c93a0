//! Anthropic Messages dialect converter.
//!
//! Request/response struct shapes mirror the `AnthropicCompleteRequest`/
//! `AnthropicCompleteResponse`/`AnthropicStreamResponse` family used to
//! parse an Anthropic upstream reply, reused in the opposite direction:
//! this converter emits them to an Anthropic-speaking client instead.

use gateway_core::message::{CanonicalMessage, CanonicalReply, ToolCallRecord, Usage};
use gateway_core::upstream::StreamChunk;
use gateway_core::{ids, GatewayError};
use serde::Deserialize;
use serde_json::{json, Value};

// ---------------------------------------------------------------------
// Request → canonical
// ---------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct AnthropicRequest {
    pub model: String,
    pub messages: Vec<AnthropicMessage>,
    #[serde(default)]
    pub system: Option<Value>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub tools: Option<Vec<AnthropicToolDef>>,
    #[serde(default)]
    pub tool_choice: Option<Value>,
    #[serde(default)]
    pub stream: bool,
}

#[derive(Debug, Deserialize)]
pub struct AnthropicMessage {
    pub role: String,
    pub content: Value, // string or Vec<ContentBlock>
}

#[derive(Debug, Deserialize)]
pub struct AnthropicToolDef {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub input_schema: Value,
}

/// Parse an Anthropic request body into canonical messages. `system`, if
/// present, becomes a leading `System` message.
pub fn request_to_canonical(req: &AnthropicRequest) -> Result<Vec<CanonicalMessage>, GatewayError> {
    let mut out = Vec::new();

    if let Some(system) = &req.system {
        if let Some(text) = system_to_text(system) {
            if !text.is_empty() {
                out.push(CanonicalMessage::System { text });
            }
        }
    }

    for m in &req.messages {
        out.extend(message_to_canonical(m)?);
    }

    Ok(out)
}

fn system_to_text(system: &Value) -> Option<String> {
    match system {
        Value::String(s) => Some(s.clone()),
        Value::Array(blocks) => {
            let joined: Vec<String> = blocks
                .iter()
                .filter_map(|b| b.get("text").and_then(Value::as_str))
                .map(str::to_string)
                .collect();
            Some(joined.join("\n"))
        }
        _ => None,
    }
}

fn message_to_canonical(m: &AnthropicMessage) -> Result<Vec<CanonicalMessage>, GatewayError> {
    match &m.content {
        Value::String(text) => Ok(vec![plain_for_role(&m.role, text.clone())]),
        Value::Array(blocks) => blocks_to_canonical(&m.role, blocks),
        _ => Err(GatewayError::InvalidRequest(
            "message content must be a string or content-block array".into(),
        )),
    }
}

fn plain_for_role(role: &str, text: String) -> CanonicalMessage {
    match role {
        "assistant" => CanonicalMessage::AssistantPlain { text },
        _ => CanonicalMessage::User { text },
    }
}

fn blocks_to_canonical(role: &str, blocks: &[Value]) -> Result<Vec<CanonicalMessage>, GatewayError> {
    let mut texts = Vec::new();
    let mut tool_calls = Vec::new();
    let mut tool_results = Vec::new();

    for block in blocks {
        let block_type = block.get("type").and_then(Value::as_str).unwrap_or("");
        match block_type {
            "text" => {
                if let Some(t) = block.get("text").and_then(Value::as_str) {
                    texts.push(t.to_string());
                }
            }
            "tool_use" => {
                let id = block.get("id").and_then(Value::as_str).unwrap_or_default().to_string();
                let name = block.get("name").and_then(Value::as_str).unwrap_or_default().to_string();
                let arguments = block
                    .get("input")
                    .map(|v| v.to_string())
                    .unwrap_or_else(|| "{}".to_string());
                tool_calls.push(ToolCallRecord { id, name, arguments });
            }
            "tool_result" => {
                let tool_call_id = block
                    .get("tool_use_id")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                let text = extract_tool_result_text(block.get("content"));
                tool_results.push(CanonicalMessage::ToolResult { tool_call_id, text });
            }
            _ => {}
        }
    }

    let joined_text = texts.join("\n");
    let mut out = Vec::new();

    if role == "assistant" {
        if !tool_calls.is_empty() {
            out.push(CanonicalMessage::AssistantWithToolCalls {
                text: (!joined_text.is_empty()).then_some(joined_text),
                tool_calls,
            });
        } else if !joined_text.is_empty() {
            out.push(CanonicalMessage::AssistantPlain { text: joined_text });
        }
    } else if !joined_text.is_empty() {
        out.push(CanonicalMessage::User { text: joined_text });
    }

    out.extend(tool_results);
    Ok(out)
}

fn extract_tool_result_text(content: Option<&Value>) -> String {
    match content {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Array(blocks)) => blocks
            .iter()
            .filter_map(|b| b.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join("\n"),
        _ => String::new(),
    }
}

/// Anthropic `tools` array entries to the canonical tool schema
/// (`{name, description, parameters}`).
pub fn tools_to_canonical(tools: &[AnthropicToolDef]) -> Vec<Value> {
    tools
        .iter()
        .map(|t| {
            json!({
                "name": t.name,
                "description": t.description,
                "parameters": t.input_schema,
            })
        })
        .collect()
}

// ---------------------------------------------------------------------
// Canonical reply → response
// ---------------------------------------------------------------------

/// Build a non-streaming Anthropic `messages` response from a canonical
/// reply. Content is a text block (only if non-empty) followed by one
/// `tool_use` block per canonical tool-call; ids are prefixed `toolu_`.
pub fn reply_to_response(reply: &CanonicalReply, model: &str) -> Value {
    let mut content = Vec::new();

    if let Some(text) = &reply.text {
        if !text.is_empty() {
            content.push(json!({ "type": "text", "text": text }));
        }
    }

    for call in &reply.tool_calls {
        let input: Value = serde_json::from_str(&call.arguments).unwrap_or_else(|_| json!({}));
        content.push(json!({
            "type": "tool_use",
            "id": rewrite_id_prefix(&call.id, "toolu_"),
            "name": call.name,
            "input": input,
        }));
    }

    let stop_reason = if reply.tool_calls.is_empty() { "end_turn" } else { "tool_use" };

    json!({
        "id": ids::generate("msg"),
        "type": "message",
        "role": "assistant",
        "model": model,
        "content": content,
        "stop_reason": stop_reason,
        "stop_sequence": Value::Null,
        "usage": usage_json(reply.usage),
    })
}

fn usage_json(usage: Option<Usage>) -> Value {
    let usage = usage.unwrap_or_default();
    json!({
        "input_tokens": usage.input_tokens,
        "output_tokens": usage.output_tokens,
    })
}

fn rewrite_id_prefix(id: &str, target_prefix: &str) -> String {
    if let Some(rest) = id.strip_prefix("call_") {
        format!("{target_prefix}{rest}")
    } else if id.starts_with(target_prefix) {
        id.to_string()
    } else {
        format!("{target_prefix}{id}")
    }
}

// ---------------------------------------------------------------------
// Streaming remultiplexing
// ---------------------------------------------------------------------

#[derive(Default)]
struct ToolBlockState {
    block_index: Option<usize>,
    id: Option<String>,
    name: Option<String>,
    buffered_args: String,
    opened: bool,
}

/// Consumes [`StreamChunk`]s from the upstream client and emits Anthropic
/// SSE events in the `message_start`/`content_block_*`/`message_delta`/
/// `message_stop` grammar.
///
/// Block index bookkeeping: a single counter starting at 0, incremented on
/// each `content_block_stop`. The text block opens lazily on first
/// non-empty text delta; tool blocks open once both `id` and `name` have
/// been observed, replaying any buffered argument fragments at that point.
pub struct AnthropicStreamEmitter {
    model: String,
    block_index: usize,
    text_block_index: Option<usize>,
    tool_states: Vec<ToolBlockState>,
    started: bool,
    accumulated_text: String,
    accumulated_args_len: usize,
}

impl AnthropicStreamEmitter {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            block_index: 0,
            text_block_index: None,
            tool_states: Vec::new(),
            started: false,
            accumulated_text: String::new(),
            accumulated_args_len: 0,
        }
    }

    /// Emits `message_start` — call once before the first [`Self::on_chunk`].
    pub fn open(&mut self) -> Vec<Value> {
        self.started = true;
        vec![json!({
            "type": "message_start",
            "message": {
                "id": ids::generate("msg"),
                "type": "message",
                "role": "assistant",
                "model": self.model,
                "content": [],
                "stop_reason": Value::Null,
                "usage": { "input_tokens": 0, "output_tokens": 0 },
            }
        })]
    }

    pub fn on_chunk(&mut self, chunk: &StreamChunk) -> Vec<Value> {
        let mut events = Vec::new();

        if let Some(text) = &chunk.text_delta {
            if !text.is_empty() {
                self.accumulated_text.push_str(text);
                if self.text_block_index.is_none() {
                    let idx = self.next_index();
                    self.text_block_index = Some(idx);
                    events.push(json!({
                        "type": "content_block_start",
                        "index": idx,
                        "content_block": { "type": "text", "text": "" },
                    }));
                }
                let idx = self.text_block_index.unwrap();
                events.push(json!({
                    "type": "content_block_delta",
                    "index": idx,
                    "delta": { "type": "text_delta", "text": text },
                }));
            }
        }

        for delta in &chunk.tool_call_deltas {
            while self.tool_states.len() <= delta.slot {
                self.tool_states.push(ToolBlockState::default());
            }
            let state = &mut self.tool_states[delta.slot];

            if let Some(id) = &delta.id {
                state.id = Some(id.clone());
            }
            if let Some(name) = &delta.name {
                state.name = Some(name.clone());
            }
            if let Some(frag) = &delta.arguments_fragment {
                self.accumulated_args_len += frag.len();
                if state.opened {
                    let idx = state.block_index.unwrap();
                    events.push(json!({
                        "type": "content_block_delta",
                        "index": idx,
                        "delta": { "type": "input_json_delta", "partial_json": frag },
                    }));
                } else {
                    state.buffered_args.push_str(frag);
                }
            }

            if !state.opened {
                if let (Some(id), Some(name)) = (state.id.clone(), state.name.clone()) {
                    let idx = self.block_index_for_tool();
                    state.block_index = Some(idx);
                    state.opened = true;
                    events.push(json!({
                        "type": "content_block_start",
                        "index": idx,
                        "content_block": {
                            "type": "tool_use",
                            "id": rewrite_id_prefix(&id, "toolu_"),
                            "name": name,
                            "input": {},
                        },
                    }));
                    if !state.buffered_args.is_empty() {
                        events.push(json!({
                            "type": "content_block_delta",
                            "index": idx,
                            "delta": { "type": "input_json_delta", "partial_json": state.buffered_args },
                        }));
                        state.buffered_args.clear();
                    }
                }
            }
        }

        if let Some(reason) = chunk.finish_reason {
            events.extend(self.close_open_blocks());
            let stop_reason = if matches!(reason, gateway_core::FinishReason::ToolCalls) {
                "tool_use"
            } else if matches!(reason, gateway_core::FinishReason::Length) {
                "max_tokens"
            } else {
                "end_turn"
            };
            let usage = chunk.usage.unwrap_or_else(|| self.estimate_usage());
            events.push(json!({
                "type": "message_delta",
                "delta": { "stop_reason": stop_reason, "stop_sequence": Value::Null },
                "usage": usage_json(Some(usage)),
            }));
            events.push(json!({ "type": "message_stop" }));
        }

        events
    }

    /// Best-effort output-token estimate for when the upstream omits usage
    /// entirely (the gateway requests `stream_options.include_usage:false`):
    /// word count of accumulated text plus a quarter-byte-per-char estimate
    /// over accumulated tool-call argument fragments.
    fn estimate_usage(&self) -> Usage {
        let word_count = self.accumulated_text.split_whitespace().count() as u32;
        let args_estimate = (self.accumulated_args_len / 4) as u32;
        Usage {
            input_tokens: 0,
            output_tokens: word_count + args_estimate,
        }
    }

    fn next_index(&mut self) -> usize {
        let idx = self.block_index;
        self.block_index += 1;
        idx
    }

    fn block_index_for_tool(&mut self) -> usize {
        self.next_index()
    }

    fn close_open_blocks(&mut self) -> Vec<Value> {
        let mut events = Vec::new();
        if let Some(idx) = self.text_block_index.take() {
            events.push(json!({ "type": "content_block_stop", "index": idx }));
        }
        for state in &mut self.tool_states {
            if state.opened {
                if let Some(idx) = state.block_index.take() {
                    events.push(json!({ "type": "content_block_stop", "index": idx }));
                }
            }
        }
        events
    }

    /// Mid-stream failure terminator: an `event: error` frame.
    pub fn on_error(&self, message: &str) -> Value {
        tracing::warn!(message, "anthropic stream terminated mid-flight");
        json!({
            "type": "error",
            "error": { "type": "overloaded_error", "message": message },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gateway_core::upstream::ToolCallDelta;

    #[test]
    fn string_content_becomes_plain_message() {
        let req = AnthropicRequest {
            model: "claude".into(),
            messages: vec![AnthropicMessage {
                role: "user".into(),
                content: Value::String("hi".into()),
            }],
            system: Some(Value::String("be nice".into())),
            max_tokens: None,
            tools: None,
            tool_choice: None,
            stream: false,
        };
        let canonical = request_to_canonical(&req).unwrap();
        assert_eq!(
            canonical,
            vec![
                CanonicalMessage::System { text: "be nice".into() },
                CanonicalMessage::User { text: "hi".into() },
            ]
        );
    }

    #[test]
    fn tool_use_block_becomes_assistant_with_tool_calls() {
        let req = AnthropicRequest {
            model: "claude".into(),
            messages: vec![AnthropicMessage {
                role: "assistant".into(),
                content: json!([
                    { "type": "text", "text": "let me check" },
                    { "type": "tool_use", "id": "call_1", "name": "search", "input": {"q": "rust"} }
                ]),
            }],
            system: None,
            max_tokens: None,
            tools: None,
            tool_choice: None,
            stream: false,
        };
        let canonical = request_to_canonical(&req).unwrap();
        assert_eq!(canonical.len(), 1);
        match &canonical[0] {
            CanonicalMessage::AssistantWithToolCalls { text, tool_calls } => {
                assert_eq!(text.as_deref(), Some("let me check"));
                assert_eq!(tool_calls[0].id, "call_1");
                assert_eq!(tool_calls[0].name, "search");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn tool_result_extracts_nested_text() {
        let req = AnthropicRequest {
            model: "claude".into(),
            messages: vec![AnthropicMessage {
                role: "user".into(),
                content: json!([
                    { "type": "tool_result", "tool_use_id": "call_1", "content": [{"type": "text", "text": "42"}] }
                ]),
            }],
            system: None,
            max_tokens: None,
            tools: None,
            tool_choice: None,
            stream: false,
        };
        let canonical = request_to_canonical(&req).unwrap();
        assert_eq!(
            canonical,
            vec![CanonicalMessage::ToolResult { tool_call_id: "call_1".into(), text: "42".into() }]
        );
    }

    #[test]
    fn reply_with_tool_calls_sets_tool_use_stop_reason() {
        let reply = CanonicalReply {
            text: None,
            tool_calls: vec![ToolCallRecord {
                id: "call_abc".into(),
                name: "search".into(),
                arguments: "{\"q\":1}".into(),
            }],
            finish_reason: gateway_core::FinishReason::ToolCalls,
            usage: Some(Usage { input_tokens: 10, output_tokens: 5 }),
        };
        let resp = reply_to_response(&reply, "claude-3");
        assert_eq!(resp["stop_reason"], "tool_use");
        assert_eq!(resp["content"][0]["type"], "tool_use");
        assert_eq!(resp["content"][0]["id"], "toolu_abc");
    }

    #[test]
    fn streaming_opens_text_block_lazily_and_closes_on_finish() {
        let mut emitter = AnthropicStreamEmitter::new("claude-3");
        let start = emitter.open();
        assert_eq!(start[0]["type"], "message_start");

        let events = emitter.on_chunk(&StreamChunk {
            text_delta: Some("hello".into()),
            tool_call_deltas: vec![],
            finish_reason: None,
            usage: None,
        });
        assert_eq!(events[0]["type"], "content_block_start");
        assert_eq!(events[1]["type"], "content_block_delta");

        let done = emitter.on_chunk(&StreamChunk {
            text_delta: None,
            tool_call_deltas: vec![],
            finish_reason: Some(gateway_core::FinishReason::Stop),
            usage: Some(Usage { input_tokens: 1, output_tokens: 2 }),
        });
        assert_eq!(done[0]["type"], "content_block_stop");
        assert_eq!(done[1]["type"], "message_delta");
        assert_eq!(done[1]["delta"]["stop_reason"], "end_turn");
        assert_eq!(done[2]["type"], "message_stop");
    }

    #[test]
    fn tool_block_buffers_arguments_until_id_and_name_observed() {
        let mut emitter = AnthropicStreamEmitter::new("claude-3");
        emitter.open();

        let events = emitter.on_chunk(&StreamChunk {
            text_delta: None,
            tool_call_deltas: vec![ToolCallDelta {
                slot: 0,
                id: None,
                name: None,
                arguments_fragment: Some("{\"q\":".into()),
                is_new: true,
            }],
            finish_reason: None,
            usage: None,
        });
        assert!(events.is_empty(), "no block should open before id+name are known");

        let events = emitter.on_chunk(&StreamChunk {
            text_delta: None,
            tool_call_deltas: vec![ToolCallDelta {
                slot: 0,
                id: Some("call_1".into()),
                name: Some("search".into()),
                arguments_fragment: Some("1}".into()),
                is_new: false,
            }],
            finish_reason: None,
            usage: None,
        });
        assert_eq!(events[0]["type"], "content_block_start");
        assert_eq!(events[1]["type"], "content_block_delta");
        assert_eq!(events[1]["delta"]["partial_json"], "{\"q\":1}");
    }

    #[test]
    fn missing_upstream_usage_falls_back_to_estimate() {
        let mut emitter = AnthropicStreamEmitter::new("claude-3");
        emitter.open();
        emitter.on_chunk(&StreamChunk {
            text_delta: Some("four little words".into()),
            tool_call_deltas: vec![],
            finish_reason: None,
            usage: None,
        });
        let done = emitter.on_chunk(&StreamChunk {
            text_delta: None,
            tool_call_deltas: vec![],
            finish_reason: Some(gateway_core::FinishReason::Stop),
            usage: None,
        });
        let message_delta = done.iter().find(|e| e["type"] == "message_delta").unwrap();
        assert_eq!(message_delta["usage"]["output_tokens"], 3);
    }
}

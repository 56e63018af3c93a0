//! OpenAI Responses dialect converter.
//!
//! Request/response/event shapes follow the Responses input-item/tool-type
//! union and the streaming event-builder grammar, expressed in the same
//! idiom the other dialect converters in this workspace use.

pub mod cache;

use gateway_core::message::{CanonicalMessage, CanonicalReply, ToolCallRecord, Usage};
use gateway_core::upstream::StreamChunk;
use gateway_core::{ids, GatewayError};
use serde::Deserialize;
use serde_json::{json, Value};

pub use cache::{CachedResponse, ResponseCache};

// ---------------------------------------------------------------------
// Request → canonical
// ---------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct ResponsesRequest {
    pub model: String,
    #[serde(default)]
    pub input: Option<Value>, // string or Vec<input item>
    #[serde(default)]
    pub instructions: Option<String>,
    #[serde(default)]
    pub tools: Option<Vec<Value>>,
    #[serde(default)]
    pub tool_choice: Option<Value>,
    #[serde(default)]
    pub max_output_tokens: Option<u32>,
    #[serde(default)]
    pub stream: bool,
    #[serde(default = "default_store")]
    pub store: bool,
    #[serde(default)]
    pub previous_response_id: Option<String>,
}

fn default_store() -> bool {
    true
}

/// Name-inference table for Responses `function_call` items with an empty
/// `name`, keyed by the argument keys present.
const NAME_INFERENCE_TABLE: &[(&[&str], &str)] = &[
    (&["cmd"], "exec_command"),
    (&["session_id", "chars"], "write_stdin"),
    (&["plan"], "update_plan"),
    (&["questions"], "request_user_input"),
    (&["path"], "view_image"),
];

fn infer_function_name(arguments: &Value) -> Option<&'static str> {
    let Value::Object(map) = arguments else {
        return None;
    };
    NAME_INFERENCE_TABLE
        .iter()
        .find(|(keys, _)| keys.iter().all(|k| map.contains_key(*k)))
        .map(|(_, name)| *name)
}

/// Convert a Responses request into canonical messages. Resolves
/// `previous_response_id` against the cache if present: a miss yields
/// [`GatewayError::ResponseNotFound`], which handlers translate into a
/// `not_found_error` 404 envelope.
pub async fn request_to_canonical(
    req: &ResponsesRequest,
    cache: &cache::ResponseCache,
) -> Result<Vec<CanonicalMessage>, GatewayError> {
    let mut out = Vec::new();

    if let Some(prev_id) = &req.previous_response_id {
        let cached = cache
            .get(prev_id)
            .await
            .ok_or_else(|| GatewayError::ResponseNotFound(prev_id.clone()))?;
        out.extend(reply_to_canonical_turn(&cached.reply));
    }

    if let Some(instructions) = &req.instructions {
        if !instructions.is_empty() {
            out.push(CanonicalMessage::System { text: instructions.clone() });
        }
    }

    match &req.input {
        Some(Value::String(s)) => out.push(CanonicalMessage::User { text: s.clone() }),
        Some(Value::Array(items)) => out.extend(input_items_to_canonical(items)?),
        _ => {}
    }

    Ok(out)
}

fn reply_to_canonical_turn(reply: &CanonicalReply) -> Vec<CanonicalMessage> {
    if reply.tool_calls.is_empty() {
        vec![CanonicalMessage::AssistantPlain { text: reply.text.clone().unwrap_or_default() }]
    } else {
        vec![CanonicalMessage::AssistantWithToolCalls {
            text: reply.text.clone(),
            tool_calls: reply.tool_calls.clone(),
        }]
    }
}

fn input_items_to_canonical(items: &[Value]) -> Result<Vec<CanonicalMessage>, GatewayError> {
    // First pass: does any function_call sibling exist? (tie-break for
    // dropping empty assistant message items.)
    let has_function_call = items
        .iter()
        .any(|i| i.get("type").and_then(Value::as_str) == Some("function_call"));

    let mut out = Vec::new();
    for item in items {
        let item_type = item.get("type").and_then(Value::as_str).unwrap_or("message");
        match item_type {
            "message" => {
                if let Some(m) = message_item_to_canonical(item, has_function_call) {
                    out.push(m);
                }
            }
            "function_call" => {
                if let Some(m) = function_call_to_canonical(item) {
                    out.push(m);
                }
            }
            "function_call_output" => {
                let call_id = item.get("call_id").and_then(Value::as_str).unwrap_or_default();
                let output = item.get("output").and_then(Value::as_str).unwrap_or_default();
                out.push(CanonicalMessage::ToolResult {
                    tool_call_id: call_id.to_string(),
                    text: output.to_string(),
                });
            }
            "reasoning" => {
                tracing::debug!("dropping responses reasoning input item");
            }
            _ => {
                tracing::debug!(item_type, "dropping unrecognized responses input item");
            }
        }
    }
    Ok(out)
}

fn message_item_to_canonical(item: &Value, has_function_call: bool) -> Option<CanonicalMessage> {
    let role = item.get("role").and_then(Value::as_str).unwrap_or("user");
    let text = match item.get("content") {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Array(blocks)) => blocks
            .iter()
            .filter_map(|b| b.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join("\n"),
        _ => String::new(),
    };

    if text.is_empty() && role == "assistant" && has_function_call {
        return None;
    }

    Some(match role {
        "assistant" => CanonicalMessage::AssistantPlain { text },
        "system" | "developer" => CanonicalMessage::System { text },
        _ => CanonicalMessage::User { text },
    })
}

fn function_call_to_canonical(item: &Value) -> Option<CanonicalMessage> {
    let id = item
        .get("call_id")
        .or_else(|| item.get("id"))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let arguments = item
        .get("arguments")
        .and_then(Value::as_str)
        .unwrap_or("{}")
        .to_string();

    let mut name = item.get("name").and_then(Value::as_str).unwrap_or_default().to_string();
    if name.is_empty() {
        let parsed: Value = serde_json::from_str(&arguments).unwrap_or(Value::Null);
        name = infer_function_name(&parsed)?.to_string();
    }

    Some(CanonicalMessage::AssistantWithToolCalls {
        text: None,
        tool_calls: vec![ToolCallRecord { id, name, arguments }],
    })
}

const BUILTIN_TOOL_TYPES: &[&str] = &["web_search", "file_search", "computer"];

/// Responses `tools` array to the canonical tool schema. Built-in tools
/// (`web_search`/`file_search`/`computer`) are dropped; custom tool types
/// are coerced to `function` with a permissive default schema when absent
/// or malformed.
pub fn tools_to_canonical(tools: &[Value]) -> Vec<Value> {
    tools
        .iter()
        .filter_map(|t| {
            let kind = t.get("type").and_then(Value::as_str).unwrap_or("function");
            if BUILTIN_TOOL_TYPES.contains(&kind) {
                return None;
            }
            let name = t.get("name").and_then(Value::as_str).unwrap_or_default();
            let description = t.get("description").and_then(Value::as_str).unwrap_or_default();
            let parameters = match t.get("parameters") {
                Some(p @ Value::Object(_)) => p.clone(),
                _ => default_parameters_schema(),
            };
            Some(json!({ "name": name, "description": description, "parameters": parameters }))
        })
        .collect()
}

fn default_parameters_schema() -> Value {
    json!({ "type": "object", "properties": {}, "required": [], "additionalProperties": false })
}

// ---------------------------------------------------------------------
// Canonical reply → response
// ---------------------------------------------------------------------

/// Build a non-streaming Responses `output` list: a `message` item
/// (omitted if there is no text) followed by one `function_call` item per
/// canonical tool-call.
pub fn reply_to_response(
    reply: &CanonicalReply,
    model: &str,
    response_id: &str,
    previous_response_id: Option<&str>,
) -> Value {
    let mut output = Vec::new();

    if let Some(text) = &reply.text {
        if !text.is_empty() {
            output.push(json!({
                "id": ids::generate("msg"),
                "type": "message",
                "role": "assistant",
                "status": "completed",
                "content": [{ "type": "output_text", "text": text, "annotations": [] }],
            }));
        }
    }

    for call in &reply.tool_calls {
        output.push(json!({
            "id": ids::generate("fc"),
            "type": "function_call",
            "call_id": call.id,
            "name": call.name,
            "arguments": call.arguments,
            "status": "completed",
        }));
    }

    json!({
        "id": response_id,
        "object": "response",
        "model": model,
        "status": "completed",
        "output": output,
        "usage": usage_json(reply.usage),
        "previous_response_id": previous_response_id,
    })
}

fn usage_json(usage: Option<Usage>) -> Value {
    let usage = usage.unwrap_or_default();
    json!({
        "input_tokens": usage.input_tokens,
        "output_tokens": usage.output_tokens,
        "total_tokens": usage.input_tokens + usage.output_tokens,
    })
}

// ---------------------------------------------------------------------
// Streaming remultiplexing
// ---------------------------------------------------------------------

struct ToolItemState {
    call_id: String,
    item_id: String,
    output_index: usize,
    opened: bool,
    name: Option<String>,
    arguments: String,
}

/// Emits the Responses SSE event grammar: `response.created`, a message
/// item opened lazily on first text delta with `response.output_text.delta`
/// events and a closing `response.output_item.done`, then one
/// `output_item.added`/`function_call_arguments.delta`*/`output_item.done`
/// group per tool-call, finally `response.completed`. Every event carries a
/// monotonically increasing `sequence_number` allocated at emission time,
/// reflecting emission order rather than upstream arrival order.
pub struct ResponsesStreamEmitter {
    model: String,
    response_id: String,
    previous_response_id: Option<String>,
    sequence_number: u64,
    output_index: usize,
    message_item_id: Option<String>,
    message_output_index: Option<usize>,
    message_opened: bool,
    message_closed: bool,
    tool_items: Vec<ToolItemState>,
    accumulated_text: String,
    accumulated_args_len: usize,
    final_output: Vec<Value>,
}

impl ResponsesStreamEmitter {
    pub fn new(model: impl Into<String>, previous_response_id: Option<String>) -> Self {
        Self {
            model: model.into(),
            response_id: ids::generate("resp"),
            previous_response_id,
            sequence_number: 0,
            output_index: 0,
            message_item_id: None,
            message_output_index: None,
            message_opened: false,
            message_closed: false,
            tool_items: Vec::new(),
            accumulated_text: String::new(),
            accumulated_args_len: 0,
            final_output: Vec::new(),
        }
    }

    pub fn response_id(&self) -> &str {
        &self.response_id
    }

    fn next_seq(&mut self) -> u64 {
        self.sequence_number += 1;
        self.sequence_number
    }

    pub fn open(&mut self) -> Vec<Value> {
        let seq = self.next_seq();
        vec![json!({
            "type": "response.created",
            "sequence_number": seq,
            "response": {
                "id": self.response_id,
                "object": "response",
                "model": self.model,
                "status": "in_progress",
                "output": [],
                "previous_response_id": self.previous_response_id,
            }
        })]
    }

    pub fn on_chunk(&mut self, chunk: &StreamChunk) -> Vec<Value> {
        let mut events = Vec::new();

        if let Some(text) = &chunk.text_delta {
            if !text.is_empty() {
                self.accumulated_text.push_str(text);
                if !self.message_opened {
                    self.message_opened = true;
                    self.message_item_id = Some(ids::generate("msg"));
                    let idx = self.output_index;
                    self.output_index += 1;
                    self.message_output_index = Some(idx);
                    let seq = self.next_seq();
                    events.push(json!({
                        "type": "response.output_item.added",
                        "sequence_number": seq,
                        "output_index": idx,
                        "item": {
                            "id": self.message_item_id,
                            "type": "message",
                            "role": "assistant",
                            "content": [],
                            "status": "in_progress",
                        }
                    }));
                }
                let seq = self.next_seq();
                events.push(json!({
                    "type": "response.output_text.delta",
                    "sequence_number": seq,
                    "item_id": self.message_item_id,
                    "output_index": self.message_output_index,
                    "content_index": 0,
                    "delta": text,
                }));
            }
        }

        for delta in &chunk.tool_call_deltas {
            while self.tool_items.len() <= delta.slot {
                self.tool_items.push(ToolItemState {
                    call_id: String::new(),
                    item_id: ids::generate("fc"),
                    output_index: 0,
                    opened: false,
                    name: None,
                    arguments: String::new(),
                });
            }
            let slot = delta.slot;
            if let Some(id) = &delta.id {
                self.tool_items[slot].call_id = id.clone();
            }
            if let Some(name) = &delta.name {
                self.tool_items[slot].name = Some(name.clone());
            }

            if !self.tool_items[slot].opened && self.tool_items[slot].name.is_some() {
                self.tool_items[slot].opened = true;
                let idx = self.output_index;
                self.output_index += 1;
                self.tool_items[slot].output_index = idx;
                let item_id = self.tool_items[slot].item_id.clone();
                let call_id = self.tool_items[slot].call_id.clone();
                let name = self.tool_items[slot].name.clone().unwrap_or_default();
                let seq = self.next_seq();
                events.push(json!({
                    "type": "response.output_item.added",
                    "sequence_number": seq,
                    "output_index": idx,
                    "item": {
                        "id": item_id,
                        "type": "function_call",
                        "call_id": call_id,
                        "name": name,
                        "arguments": "",
                        "status": "in_progress",
                    }
                }));
            }

            if let Some(frag) = &delta.arguments_fragment {
                self.accumulated_args_len += frag.len();
                self.tool_items[slot].arguments.push_str(frag);
                if self.tool_items[slot].opened {
                    let call_id = self.tool_items[slot].call_id.clone();
                    let seq = self.next_seq();
                    events.push(json!({
                        "type": "response.function_call_arguments.delta",
                        "sequence_number": seq,
                        "output_index": self.tool_items[slot].output_index,
                        "call_id": call_id,
                        "delta": frag,
                    }));
                }
            }
        }

        if chunk.finish_reason.is_some() {
            events.extend(self.close_open_items());
            let usage = chunk.usage.unwrap_or_else(|| self.estimate_usage());
            let output = self.build_final_output();
            let seq = self.next_seq();
            events.push(json!({
                "type": "response.completed",
                "sequence_number": seq,
                "response": {
                    "id": self.response_id,
                    "object": "response",
                    "model": self.model,
                    "status": "completed",
                    "output": output,
                    "usage": usage_json(Some(usage)),
                    "previous_response_id": self.previous_response_id,
                }
            }));
        }

        events
    }

    /// Best-effort output-token estimate for when the upstream omits usage
    /// entirely: word count of accumulated text plus a quarter-byte-per-char
    /// estimate over accumulated tool-call argument fragments.
    fn estimate_usage(&self) -> Usage {
        let word_count = self.accumulated_text.split_whitespace().count() as u32;
        let args_estimate = (self.accumulated_args_len / 4) as u32;
        Usage {
            input_tokens: 0,
            output_tokens: word_count + args_estimate,
        }
    }

    /// Assembles the final `output` array carried on `response.completed`,
    /// mirroring the shape `reply_to_response` builds for the non-streaming
    /// path: a message item (if any text was emitted) followed by one
    /// `function_call` item per tool-call, in emission order.
    fn build_final_output(&mut self) -> Vec<Value> {
        if self.final_output.is_empty() {
            if !self.accumulated_text.is_empty() {
                self.final_output.push(json!({
                    "id": self.message_item_id,
                    "type": "message",
                    "role": "assistant",
                    "status": "completed",
                    "content": [{ "type": "output_text", "text": self.accumulated_text, "annotations": [] }],
                }));
            }
            for item in &self.tool_items {
                if !item.opened {
                    continue;
                }
                self.final_output.push(json!({
                    "id": item.item_id,
                    "type": "function_call",
                    "call_id": item.call_id,
                    "name": item.name.clone().unwrap_or_default(),
                    "arguments": item.arguments,
                    "status": "completed",
                }));
            }
        }
        self.final_output.clone()
    }

    fn close_open_items(&mut self) -> Vec<Value> {
        let mut events = Vec::new();
        if self.message_opened && !self.message_closed {
            self.message_closed = true;
            let seq = self.next_seq();
            events.push(json!({
                "type": "response.output_item.done",
                "sequence_number": seq,
                "output_index": self.message_output_index,
                "item": {
                    "id": self.message_item_id,
                    "type": "message",
                    "role": "assistant",
                    "status": "completed",
                },
            }));
        }
        let done: Vec<_> = self
            .tool_items
            .iter()
            .filter(|t| t.opened)
            .map(|t| (t.item_id.clone(), t.call_id.clone(), t.name.clone().unwrap_or_default(), t.output_index))
            .collect();
        for (item_id, call_id, name, idx) in done {
            let seq = self.next_seq();
            events.push(json!({
                "type": "response.output_item.done",
                "sequence_number": seq,
                "output_index": idx,
                "item": {
                    "id": item_id,
                    "type": "function_call",
                    "call_id": call_id,
                    "name": name,
                    "status": "completed",
                }
            }));
        }
        events
    }

    /// Mid-stream failure terminator: `response.failed` then `error`.
    pub fn on_error(&mut self, message: &str) -> Vec<Value> {
        tracing::warn!(message, "responses stream terminated mid-flight");
        let seq1 = self.next_seq();
        let seq2 = self.next_seq();
        vec![
            json!({
                "type": "response.failed",
                "sequence_number": seq1,
                "response": { "id": self.response_id, "status": "failed" },
            }),
            json!({
                "type": "error",
                "sequence_number": seq2,
                "error": { "message": message },
            }),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gateway_core::message::FinishReason;
    use gateway_core::upstream::ToolCallDelta;

    #[tokio::test]
    async fn previous_response_id_miss_is_not_found() {
        let cache = ResponseCache::new();
        let req = ResponsesRequest {
            model: "m".into(),
            input: Some(Value::String("hi".into())),
            instructions: None,
            tools: None,
            tool_choice: None,
            max_output_tokens: None,
            stream: false,
            store: true,
            previous_response_id: Some("resp_missing".into()),
        };
        let err = request_to_canonical(&req, &cache).await.unwrap_err();
        assert!(matches!(err, GatewayError::ResponseNotFound(_)));
    }

    #[test]
    fn empty_function_call_name_infers_from_argument_keys() {
        let item = json!({
            "type": "function_call",
            "call_id": "call_1",
            "name": "",
            "arguments": "{\"cmd\": \"ls\"}",
        });
        let m = function_call_to_canonical(&item).unwrap();
        match m {
            CanonicalMessage::AssistantWithToolCalls { tool_calls, .. } => {
                assert_eq!(tool_calls[0].name, "exec_command");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn uninferable_empty_name_drops_call() {
        let item = json!({
            "type": "function_call",
            "call_id": "call_1",
            "name": "",
            "arguments": "{\"mystery\": 1}",
        });
        assert!(function_call_to_canonical(&item).is_none());
    }

    #[test]
    fn builtin_tools_are_dropped() {
        let tools = vec![
            json!({ "type": "web_search" }),
            json!({ "type": "function", "name": "f", "description": "d", "parameters": {"type":"object"} }),
        ];
        let canonical = tools_to_canonical(&tools);
        assert_eq!(canonical.len(), 1);
        assert_eq!(canonical[0]["name"], "f");
    }

    #[test]
    fn custom_tool_gets_default_schema_when_parameters_absent() {
        let tools = vec![json!({ "type": "custom_thing", "name": "widget" })];
        let canonical = tools_to_canonical(&tools);
        assert_eq!(canonical[0]["parameters"]["type"], "object");
    }

    #[test]
    fn empty_assistant_message_dropped_only_with_sibling_function_call() {
        let items = vec![
            json!({ "type": "message", "role": "assistant", "content": "" }),
            json!({ "type": "function_call", "call_id": "c1", "name": "f", "arguments": "{}" }),
        ];
        let canonical = input_items_to_canonical(&items).unwrap();
        assert_eq!(canonical.len(), 1);
        assert!(matches!(canonical[0], CanonicalMessage::AssistantWithToolCalls { .. }));
    }

    #[test]
    fn empty_assistant_message_preserved_without_sibling_function_call() {
        let items = vec![json!({ "type": "message", "role": "assistant", "content": "" })];
        let canonical = input_items_to_canonical(&items).unwrap();
        assert_eq!(canonical.len(), 1);
        assert!(matches!(canonical[0], CanonicalMessage::AssistantPlain { .. }));
    }

    #[test]
    fn streaming_sequence_numbers_increase_monotonically() {
        let mut emitter = ResponsesStreamEmitter::new("gpt-4o", None);
        let mut seqs: Vec<u64> = emitter
            .open()
            .iter()
            .map(|e| e["sequence_number"].as_u64().unwrap())
            .collect();

        let events = emitter.on_chunk(&StreamChunk {
            text_delta: Some("hi".into()),
            tool_call_deltas: vec![],
            finish_reason: None,
            usage: None,
        });
        seqs.extend(events.iter().map(|e| e["sequence_number"].as_u64().unwrap()));

        let events = emitter.on_chunk(&StreamChunk {
            text_delta: None,
            tool_call_deltas: vec![],
            finish_reason: Some(FinishReason::Stop),
            usage: Some(Usage { input_tokens: 1, output_tokens: 1 }),
        });
        seqs.extend(events.iter().map(|e| e["sequence_number"].as_u64().unwrap()));

        for w in seqs.windows(2) {
            assert!(w[1] > w[0]);
        }
    }

    #[test]
    fn tool_call_stream_opens_on_name_and_closes_on_finish() {
        let mut emitter = ResponsesStreamEmitter::new("gpt-4o", None);
        emitter.open();
        let events = emitter.on_chunk(&StreamChunk {
            text_delta: None,
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
        assert_eq!(events[0]["type"], "response.output_item.added");
        assert_eq!(events[1]["type"], "response.function_call_arguments.delta");

        let done = emitter.on_chunk(&StreamChunk {
            text_delta: None,
            tool_call_deltas: vec![],
            finish_reason: Some(FinishReason::ToolCalls),
            usage: None,
        });
        assert!(done.iter().any(|e| e["type"] == "response.output_item.done"));
        assert!(done.iter().any(|e| e["type"] == "response.completed"));
    }

    #[test]
    fn missing_upstream_usage_falls_back_to_estimate() {
        let mut emitter = ResponsesStreamEmitter::new("gpt-4o", None);
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
            finish_reason: Some(FinishReason::Stop),
            usage: None,
        });
        let completed = done.iter().find(|e| e["type"] == "response.completed").unwrap();
        assert_eq!(completed["response"]["usage"]["output_tokens"], 3);
    }

    #[test]
    fn mixed_text_and_tool_call_stream_assigns_distinct_output_indices() {
        let mut emitter = ResponsesStreamEmitter::new("gpt-4o", None);
        emitter.open();

        let text_events = emitter.on_chunk(&StreamChunk {
            text_delta: Some("hi".into()),
            tool_call_deltas: vec![],
            finish_reason: None,
            usage: None,
        });
        let message_added = text_events
            .iter()
            .find(|e| e["type"] == "response.output_item.added")
            .unwrap();
        assert_eq!(message_added["output_index"], 0);
        let text_delta_event = text_events
            .iter()
            .find(|e| e["type"] == "response.output_text.delta")
            .unwrap();
        assert_eq!(text_delta_event["output_index"], 0);

        let tool_events = emitter.on_chunk(&StreamChunk {
            text_delta: None,
            tool_call_deltas: vec![ToolCallDelta {
                slot: 0,
                id: Some("call_1".into()),
                name: Some("search".into()),
                arguments_fragment: Some("{\"q\":1}".into()),
                is_new: true,
            }],
            finish_reason: None,
            usage: None,
        });
        let tool_added = tool_events
            .iter()
            .find(|e| e["type"] == "response.output_item.added")
            .unwrap();
        assert_eq!(tool_added["output_index"], 1);

        let done = emitter.on_chunk(&StreamChunk {
            text_delta: None,
            tool_call_deltas: vec![],
            finish_reason: Some(FinishReason::ToolCalls),
            usage: None,
        });
        let completed = done.iter().find(|e| e["type"] == "response.completed").unwrap();
        let output = completed["response"]["output"].as_array().unwrap();
        assert_eq!(output.len(), 2);
        assert_eq!(output[0]["type"], "message");
        assert_eq!(output[1]["type"], "function_call");
        assert_eq!(output[1]["arguments"], "{\"q\":1}");
    }
}

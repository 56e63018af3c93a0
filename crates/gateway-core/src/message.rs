//! Canonical message model.
//!
//! A tagged-union representation that every dialect converter maps into and
//! out of, and that the tool-call sequence validator operates on. Collapses
//! role and content-type into a single closed enum rather than a role field
//! paired with a content-type field, since canonical messages here never
//! carry images or PDFs and total pattern matching is cheaper with one enum
//! than with a role/type product.

use serde::{Deserialize, Serialize};

/// One tool invocation announced by the assistant.
///
/// `arguments` is always the raw JSON text as emitted by the upstream; the
/// gateway never parses it into a structured value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRecord {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

/// Token accounting for a completed assistant turn.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

/// A single record in a canonical conversation. Ordering is significant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CanonicalMessage {
    User { text: String },
    System { text: String },
    AssistantPlain { text: String },
    AssistantWithToolCalls {
        text: Option<String>,
        tool_calls: Vec<ToolCallRecord>,
    },
    ToolResult { tool_call_id: String, text: String },
}

impl CanonicalMessage {
    /// Weight function `w(m)` used by the tool-call sequence validator.
    pub fn weight(&self) -> i64 {
        match self {
            CanonicalMessage::User { .. }
            | CanonicalMessage::System { .. }
            | CanonicalMessage::AssistantPlain { .. } => 0,
            CanonicalMessage::AssistantWithToolCalls { tool_calls, .. } => tool_calls.len() as i64,
            CanonicalMessage::ToolResult { .. } => -1,
        }
    }

    /// The tool-call id a tool-result message answers, if this is one.
    pub fn tool_result_id(&self) -> Option<&str> {
        match self {
            CanonicalMessage::ToolResult { tool_call_id, .. } => Some(tool_call_id),
            _ => None,
        }
    }

    /// The text payload, for message kinds that carry one directly (not the
    /// tool-call list on an assistant-with-tool-calls message).
    pub fn text(&self) -> Option<&str> {
        match self {
            CanonicalMessage::User { text }
            | CanonicalMessage::System { text }
            | CanonicalMessage::AssistantPlain { text }
            | CanonicalMessage::ToolResult { text, .. } => Some(text),
            CanonicalMessage::AssistantWithToolCalls { text, .. } => text.as_deref(),
        }
    }
}

/// A finished assistant reply plus the usage the upstream reported for it
/// (or a best-effort estimate when the upstream omits usage entirely).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalReply {
    pub text: Option<String>,
    pub tool_calls: Vec<ToolCallRecord>,
    pub finish_reason: FinishReason,
    pub usage: Option<Usage>,
}

/// Upstream-agnostic stop reason, mapped from the Chat Completions
/// `finish_reason` string and re-mapped per dialect on the way out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FinishReason {
    Stop,
    Length,
    ToolCalls,
    ContentFilter,
    Other,
}

impl FinishReason {
    pub fn from_upstream(s: &str) -> Self {
        match s {
            "stop" => FinishReason::Stop,
            "length" => FinishReason::Length,
            "tool_calls" => FinishReason::ToolCalls,
            "content_filter" => FinishReason::ContentFilter,
            _ => FinishReason::Other,
        }
    }
}

//! Tool-call sequence validator.
//!
//! Repairs histories where a tool-invoking assistant message is not
//! immediately followed by its matching tool-results, the wire-format
//! precondition every upstream enforces. Single-pass and order-preserving
//! apart from the repairs it makes.

use std::collections::{HashSet, VecDeque};

use crate::message::CanonicalMessage;

/// Validate and repair a canonical message sequence: every tool-invoking
/// assistant message ends up immediately followed by exactly its matching
/// tool-results, in order, with orphans dropped. Never raises for
/// repairable input; repairs are informational only (`tracing::debug!`).
pub fn validate(messages: Vec<CanonicalMessage>) -> Vec<CanonicalMessage> {
    let mut remaining: VecDeque<CanonicalMessage> = messages.into();
    let mut valid: Vec<CanonicalMessage> = Vec::with_capacity(remaining.len());

    while let Some(m) = remaining.pop_front() {
        match m.weight() {
            0 => valid.push(m),
            w if w < 0 => {
                tracing::debug!("validator: discarding orphaned tool-result");
            }
            _ => collect_group(m, &mut remaining, &mut valid),
        }
    }

    valid
}

/// The collection phase: pair an opening assistant-with-tool-calls message
/// with its tool-results, deferring the first interruption behind the
/// repaired group.
fn collect_group(
    opener: CanonicalMessage,
    remaining: &mut VecDeque<CanonicalMessage>,
    valid: &mut Vec<CanonicalMessage>,
) {
    let CanonicalMessage::AssistantWithToolCalls { text, tool_calls } = opener else {
        unreachable!("collect_group is only called with a positive-weight message");
    };

    let mut pending_ids: HashSet<String> = tool_calls.iter().map(|c| c.id.clone()).collect();
    let mut group: Vec<CanonicalMessage> = Vec::new();
    let mut delayed: VecDeque<CanonicalMessage> = VecDeque::new();

    while !pending_ids.is_empty() {
        let Some(n) = remaining.front() else { break };
        if n.weight() < 0 {
            let n = remaining.pop_front().unwrap();
            let id = n.tool_result_id().expect("weight < 0 implies ToolResult");
            if pending_ids.remove(id) {
                group.push(n);
            } else {
                tracing::debug!(id, "validator: discarding tool-result with unknown id inside collection phase");
            }
        } else {
            let n = remaining.pop_front().unwrap();
            delayed.push_back(n);
            break;
        }
    }

    if pending_ids.is_empty() {
        valid.push(CanonicalMessage::AssistantWithToolCalls { text, tool_calls });
        valid.extend(group);
    } else {
        tracing::debug!(
            unresolved = pending_ids.len(),
            "validator: partial tool-call resolution, trimming unmatched calls"
        );
        let resolved_ids: HashSet<String> = tool_calls
            .iter()
            .map(|c| c.id.clone())
            .filter(|id| !pending_ids.contains(id))
            .collect();
        let resolved_calls: Vec<_> = tool_calls
            .into_iter()
            .filter(|c| resolved_ids.contains(&c.id))
            .collect();

        if resolved_calls.is_empty() {
            valid.push(CanonicalMessage::AssistantPlain {
                text: text.unwrap_or_default(),
            });
        } else {
            valid.push(CanonicalMessage::AssistantWithToolCalls {
                text,
                tool_calls: resolved_calls,
            });
        }
        valid.extend(group);
    }

    // Re-queue the interrupting message(s) at the front of `remaining`.
    while let Some(d) = delayed.pop_back() {
        remaining.push_front(d);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::ToolCallRecord;

    fn user(s: &str) -> CanonicalMessage {
        CanonicalMessage::User { text: s.into() }
    }
    fn assistant_tool(ids: &[&str]) -> CanonicalMessage {
        CanonicalMessage::AssistantWithToolCalls {
            text: None,
            tool_calls: ids
                .iter()
                .map(|id| ToolCallRecord {
                    id: id.to_string(),
                    name: "search".into(),
                    arguments: "{}".into(),
                })
                .collect(),
        }
    }
    fn tool_result(id: &str) -> CanonicalMessage {
        CanonicalMessage::ToolResult {
            tool_call_id: id.into(),
            text: "result".into(),
        }
    }

    fn has_invariants(messages: &[CanonicalMessage]) -> bool {
        let mut i = 0;
        while i < messages.len() {
            match &messages[i] {
                CanonicalMessage::AssistantWithToolCalls { tool_calls, .. } => {
                    let mut pending: HashSet<&str> =
                        tool_calls.iter().map(|c| c.id.as_str()).collect();
                    let mut j = i + 1;
                    while j < messages.len() && !pending.is_empty() {
                        match messages[j].tool_result_id() {
                            Some(id) if pending.remove(id) => {}
                            _ => break,
                        }
                        j += 1;
                    }
                    if !pending.is_empty() {
                        return false;
                    }
                    i = j;
                }
                CanonicalMessage::ToolResult { .. } => return false, // orphan
                _ => i += 1,
            }
        }
        true
    }

    #[test]
    fn scenario_2_interrupted_tool_call() {
        // [User "go", Assistant{call_A}, User "stop", Tool{call_A}, User "hi"]
        let input = vec![
            user("go"),
            assistant_tool(&["call_A"]),
            user("stop"),
            tool_result("call_A"),
            user("hi"),
        ];
        let out = validate(input);
        assert_eq!(
            out,
            vec![
                user("go"),
                CanonicalMessage::AssistantPlain { text: String::new() },
                user("stop"),
                user("hi"),
            ]
        );
    }

    #[test]
    fn scenario_3_partial_match() {
        let input = vec![user("x"), assistant_tool(&["a", "b"]), tool_result("a")];
        let out = validate(input);
        assert_eq!(
            out,
            vec![user("x"), assistant_tool(&["a"]), tool_result("a")]
        );
    }

    #[test]
    fn orphan_tool_result_is_dropped() {
        let input = vec![user("hi"), tool_result("ghost")];
        assert_eq!(validate(input), vec![user("hi")]);
    }

    #[test]
    fn out_of_order_matching_within_group() {
        let input = vec![
            assistant_tool(&["a", "b"]),
            tool_result("b"),
            tool_result("a"),
        ];
        let out = validate(input.clone());
        assert_eq!(out, input);
    }

    #[test]
    fn validating_twice_is_idempotent() {
        let input = vec![
            user("go"),
            assistant_tool(&["call_A"]),
            user("stop"),
            tool_result("call_A"),
        ];
        let once = validate(input);
        let twice = validate(once.clone());
        assert_eq!(once, twice);
    }

    #[test]
    fn already_valid_sequence_is_untouched() {
        let input = vec![user("hi"), assistant_tool(&["a"]), tool_result("a")];
        assert_eq!(validate(input.clone()), input);
    }

    #[test]
    fn repair_never_lengthens_the_sequence() {
        let input = vec![
            user("go"),
            assistant_tool(&["a", "b"]),
            user("stop"),
            tool_result("a"),
            tool_result("b"),
        ];
        let len_before = input.len();
        let out = validate(input);
        assert!(out.len() <= len_before);
    }

    #[test]
    fn repaired_output_always_satisfies_invariants() {
        let cases: Vec<Vec<CanonicalMessage>> = vec![
            vec![user("go"), assistant_tool(&["a"]), user("stop"), tool_result("a")],
            vec![assistant_tool(&["a", "b"]), tool_result("a")],
            vec![tool_result("ghost"), user("hi")],
            vec![
                assistant_tool(&["a"]),
                tool_result("a"),
                assistant_tool(&["b"]),
                tool_result("x"),
            ],
        ];
        for case in cases {
            let out = validate(case);
            assert!(has_invariants(&out));
        }
    }
}

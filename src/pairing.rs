use crate::normalize::Message;
use std::collections::HashSet;

/// Drops tool calls that have no response in the contiguous run of tool
/// messages right after them, and tool messages that answer no call. An
/// empty id never matches anything.
///
/// Single left-to-right pass. Retained messages keep their relative order.
/// Matching always looks at the input list, never at already-filtered output.
pub fn validate_tool_calls(messages: &[Message]) -> Vec<Message> {
    let mut out = Vec::with_capacity(messages.len());
    // Call ids already answered inside the current tool run.
    let mut answered: HashSet<&str> = HashSet::new();

    for (i, message) in messages.iter().enumerate() {
        match message {
            Message::Assistant {
                content,
                tool_calls,
            } if !tool_calls.is_empty() => {
                answered.clear();
                let responders = following_tool_ids(messages, i);
                let mut seen: HashSet<&str> = HashSet::new();
                let kept: Vec<_> = tool_calls
                    .iter()
                    .filter(|call| !call.id.is_empty() && responders.contains(call.id.as_str()))
                    .filter(|call| seen.insert(call.id.as_str()))
                    .cloned()
                    .collect();
                let has_content = content.as_deref().is_some_and(|c| !c.is_empty());
                if has_content || !kept.is_empty() {
                    out.push(Message::Assistant {
                        content: content.clone(),
                        tool_calls: kept,
                    });
                }
            }
            Message::Tool { tool_call_id, .. } => {
                if tool_call_id.is_empty() {
                    continue;
                }
                let Some(owner) = owning_assistant(messages, i) else {
                    continue;
                };
                let matches = owner
                    .tool_calls()
                    .iter()
                    .any(|call| call.id == *tool_call_id);
                if matches && answered.insert(tool_call_id.as_str()) {
                    out.push(message.clone());
                }
            }
            other => {
                answered.clear();
                out.push(other.clone());
            }
        }
    }
    out
}

fn following_tool_ids(messages: &[Message], index: usize) -> HashSet<&str> {
    messages[index + 1..]
        .iter()
        .map_while(|m| match m {
            Message::Tool { tool_call_id, .. } => Some(tool_call_id.as_str()),
            _ => None,
        })
        .collect()
}

/// The assistant message a tool response at `index` can answer: the
/// immediately preceding message, or the first non-tool message found by
/// scanning back over a tool run. Anything other than an assistant with
/// tool calls yields no owner.
fn owning_assistant(messages: &[Message], index: usize) -> Option<&Message> {
    let candidate = messages[..index].iter().rev().find(|m| !m.is_tool())?;
    match candidate {
        Message::Assistant { tool_calls, .. } if !tool_calls.is_empty() => Some(candidate),
        _ => None,
    }
}

use crate::decode::single_choice_completion;
use crate::encode::anthropic::ToolIdMap;
use crate::openai::{ChatCompletion, ToolCall, Usage, completion_id, now_ts};
use serde_json::Value;

pub fn map_stop_reason(stop_reason: Option<&str>, saw_tool_use: bool) -> &'static str {
    if saw_tool_use {
        return "tool_calls";
    }
    match stop_reason {
        Some("max_tokens") => "length",
        _ => "stop",
    }
}

pub fn parse_usage(value: Option<&Value>) -> Option<Usage> {
    let value = value?.as_object()?;
    let get = |k: &str| value.get(k).and_then(Value::as_u64).unwrap_or(0);
    Some(Usage::new(get("input_tokens"), get("output_tokens")))
}

/// Converts a Messages API response. Text blocks are concatenated; each
/// `tool_use` block becomes a tool call whose arguments are the encoded input.
pub fn to_chat_completion(resp: &Value, model: &str, ids: &ToolIdMap) -> ChatCompletion {
    let mut text = String::new();
    let mut tool_calls = Vec::new();
    for block in resp
        .get("content")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default()
    {
        match block.get("type").and_then(Value::as_str) {
            Some("text") => {
                text.push_str(block.get("text").and_then(Value::as_str).unwrap_or_default());
            }
            Some("tool_use") => {
                let backend_id = block.get("id").and_then(Value::as_str).unwrap_or_default();
                let name = block.get("name").and_then(Value::as_str).unwrap_or_default();
                let input = block.get("input").cloned().unwrap_or_else(|| Value::Object(Default::default()));
                tool_calls.push(ToolCall::function(
                    ids.client_id(backend_id),
                    name,
                    input.to_string(),
                ));
            }
            _ => {}
        }
    }

    let id = resp
        .get("id")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .unwrap_or_else(completion_id);
    let finish_reason = map_stop_reason(
        resp.get("stop_reason").and_then(Value::as_str),
        !tool_calls.is_empty(),
    );
    let content = if tool_calls.is_empty() { Some(text) } else { None };
    let usage = parse_usage(resp.get("usage")).unwrap_or_default();

    single_choice_completion(
        id,
        now_ts(),
        model,
        content,
        tool_calls,
        finish_reason.to_string(),
        usage,
    )
}

use crate::decode::single_choice_completion;
use crate::markers::{MarkerScan, ToolMarker};
use crate::openai::{ChatCompletion, ToolCall, Usage, completion_id, now_ts};
use crate::tokens::estimate_tokens;
use serde_json::Value;

/// Visible text of a complete proprietary response, by precedence:
/// `choices[0].message.content`, `choices[0].delta.content`, top-level
/// `content` or `text`, else empty.
pub fn extract_content(resp: &Value) -> String {
    let choice = resp.pointer("/choices/0");
    choice
        .and_then(|c| c.pointer("/message/content"))
        .and_then(Value::as_str)
        .or_else(|| {
            choice
                .and_then(|c| c.pointer("/delta/content"))
                .and_then(Value::as_str)
        })
        .or_else(|| resp.get("content").and_then(Value::as_str))
        .or_else(|| resp.get("text").and_then(Value::as_str))
        .unwrap_or_default()
        .to_string()
}

fn native_tool_calls(resp: &Value) -> Vec<ToolCall> {
    resp.pointer("/choices/0/message/tool_calls")
        .cloned()
        .and_then(|v| serde_json::from_value::<Vec<ToolCall>>(v).ok())
        .unwrap_or_default()
}

pub fn parse_usage(value: Option<&Value>) -> Option<Usage> {
    let value = value?.as_object()?;
    let get = |k: &str| value.get(k).and_then(Value::as_u64).unwrap_or(0);
    let prompt = get("prompt_tokens");
    let completion = get("completion_tokens");
    let total = value
        .get("total_tokens")
        .and_then(Value::as_u64)
        .unwrap_or(prompt + completion);
    Some(Usage {
        prompt_tokens: prompt,
        completion_tokens: completion,
        total_tokens: total,
    })
}

/// `prompt_text` is set only when usage estimation is enabled; it is the
/// text the estimator counts for the prompt side.
pub fn to_chat_completion(
    resp: &Value,
    model: &str,
    marker: &ToolMarker,
    prompt_text: Option<&str>,
) -> ChatCompletion {
    let id = resp
        .get("id")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .unwrap_or_else(completion_id);
    let created = resp
        .get("created")
        .and_then(Value::as_i64)
        .filter(|ts| *ts > 0)
        .unwrap_or_else(now_ts);
    let text = extract_content(resp);

    let mut tool_calls = native_tool_calls(resp);
    let content = if !tool_calls.is_empty() {
        Some(text).filter(|t| !t.is_empty())
    } else {
        match marker.scan(&text) {
            MarkerScan::Found {
                tool_calls: found,
                content,
            } => {
                tool_calls = found;
                Some(content).filter(|t| !t.is_empty())
            }
            MarkerScan::NoToolCalls => Some(text),
        }
    };

    let finish_reason = if tool_calls.is_empty() {
        resp.pointer("/choices/0/finish_reason")
            .and_then(Value::as_str)
            .unwrap_or("stop")
            .to_string()
    } else {
        "tool_calls".to_string()
    };

    let usage = match (parse_usage(resp.get("usage")), prompt_text) {
        (Some(usage), _) => usage,
        (None, Some(prompt)) => {
            let usage = Usage::new(
                estimate_tokens(prompt),
                estimate_tokens(content.as_deref().unwrap_or_default()),
            );
            tracing::debug!(
                prompt_tokens = usage.prompt_tokens,
                completion_tokens = usage.completion_tokens,
                "backend reported no usage; returning estimate"
            );
            usage
        }
        (None, None) => Usage::default(),
    };

    single_choice_completion(id, created, model, content, tool_calls, finish_reason, usage)
}

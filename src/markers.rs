use crate::openai::{ToolCall, tool_call_id};
use regex::Regex;
use serde_json::Value;

/// Labels of the plain-text convention the proprietary backend uses to
/// describe tool invocations:
///
/// ```text
/// [<invoke>: NAME]
/// <arguments>: {"json": "object"}
/// ```
///
/// The exact wording follows the backend's prompt phrasing, so both labels
/// are configurable.
#[derive(Debug, Clone)]
pub struct ToolMarker {
    invoke_label: String,
    arguments_label: String,
    header: Regex,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MarkerScan {
    /// At least one well-formed marker was found. `content` is the visible
    /// text with all parsed markers removed.
    Found {
        tool_calls: Vec<ToolCall>,
        content: String,
    },
    NoToolCalls,
}

pub const DEFAULT_INVOKE_LABEL: &str = "调用工具";
pub const DEFAULT_ARGUMENTS_LABEL: &str = "参数";

impl Default for ToolMarker {
    fn default() -> Self {
        Self::new(DEFAULT_INVOKE_LABEL, DEFAULT_ARGUMENTS_LABEL)
    }
}

impl ToolMarker {
    pub fn new(invoke_label: impl Into<String>, arguments_label: impl Into<String>) -> Self {
        let invoke_label = invoke_label.into();
        let arguments_label = arguments_label.into();
        let pattern = format!(
            r"\[{}:\s*([^\]\n]+)\]\r?\n{}:[ \t]*",
            regex::escape(&invoke_label),
            regex::escape(&arguments_label)
        );
        let header = Regex::new(&pattern).expect("escaped tool marker pattern");
        Self {
            invoke_label,
            arguments_label,
            header,
        }
    }

    pub fn render(&self, call: &ToolCall) -> String {
        format!(
            "[{}: {}]\n{}: {}",
            self.invoke_label, call.function.name, self.arguments_label, call.function.arguments
        )
    }

    /// Extracts every well-formed marker. The arguments must be one complete
    /// JSON value; nested objects are fine. A header whose arguments do not
    /// parse is left in the visible text untouched.
    pub fn scan(&self, text: &str) -> MarkerScan {
        let mut tool_calls = Vec::new();
        let mut content = String::with_capacity(text.len());
        let mut cursor = 0;

        for caps in self.header.captures_iter(text) {
            let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            if whole.start() < cursor {
                continue;
            }
            let rest = &text[whole.end()..];
            let Some(len) = leading_json_len(rest) else {
                tracing::debug!(
                    tool = name.as_str(),
                    "tool marker arguments are not valid JSON; leaving text untouched"
                );
                continue;
            };
            content.push_str(&text[cursor..whole.start()]);
            tool_calls.push(ToolCall::function(
                tool_call_id(),
                name.as_str().trim(),
                &rest[..len],
            ));
            cursor = whole.end() + len;
        }

        if tool_calls.is_empty() {
            return MarkerScan::NoToolCalls;
        }
        content.push_str(&text[cursor..]);
        MarkerScan::Found {
            tool_calls,
            content: content.trim().to_string(),
        }
    }
}

/// Byte length of the JSON object or array at the start of `text`.
fn leading_json_len(text: &str) -> Option<usize> {
    if !text.starts_with(['{', '[']) {
        return None;
    }
    let mut stream = serde_json::Deserializer::from_str(text).into_iter::<Value>();
    match stream.next() {
        Some(Ok(_)) => Some(stream.byte_offset()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_then_scan_recovers_call() {
        let marker = ToolMarker::default();
        let call = ToolCall::function("c1", "get_weather", r#"{"city":"Paris"}"#);
        let text = format!("Let me check.\n{}", marker.render(&call));
        let MarkerScan::Found {
            tool_calls,
            content,
        } = marker.scan(&text)
        else {
            panic!("expected tool calls");
        };
        assert_eq!(content, "Let me check.");
        assert_eq!(tool_calls.len(), 1);
        assert_eq!(tool_calls[0].function.name, "get_weather");
        assert_eq!(tool_calls[0].function.arguments, r#"{"city":"Paris"}"#);
        assert!(tool_calls[0].id.starts_with("call_"));
    }

    #[test]
    fn nested_arguments_and_multiple_markers() {
        let marker = ToolMarker::new("invoke tool", "arguments");
        let text = "a\n[invoke tool: f]\narguments: {\"o\":{\"k\":[1,2]}}\nb\n[invoke tool: g]\narguments: {}";
        let MarkerScan::Found {
            tool_calls,
            content,
        } = marker.scan(text)
        else {
            panic!("expected tool calls");
        };
        assert_eq!(tool_calls.len(), 2);
        assert_eq!(tool_calls[0].function.arguments, r#"{"o":{"k":[1,2]}}"#);
        assert_eq!(tool_calls[1].function.name, "g");
        assert_eq!(content, "a\n\nb");
    }

    #[test]
    fn malformed_arguments_report_no_tool_calls() {
        let marker = ToolMarker::new("invoke tool", "arguments");
        assert_eq!(
            marker.scan("[invoke tool: f]\narguments: {not json"),
            MarkerScan::NoToolCalls
        );
        assert_eq!(marker.scan("plain answer"), MarkerScan::NoToolCalls);
    }

    #[test]
    fn other_labels_do_not_match() {
        let marker = ToolMarker::default();
        assert_eq!(
            marker.scan("[invoke tool: f]\narguments: {}"),
            MarkerScan::NoToolCalls
        );
    }
}

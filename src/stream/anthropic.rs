use crate::stream::{EventDecoder, StreamFailure};
use crate::stream::transcoder::StreamEvent;
use serde_json::Value;

/// Decodes Anthropic Messages SSE. Events are recognized by the `type`
/// field of their payload; `ping` and unknown types are skipped.
#[derive(Debug, Default)]
pub struct AnthropicDecoder;

impl EventDecoder for AnthropicDecoder {
    fn decode(&mut self, _event: &str, data: &str) -> Result<Vec<StreamEvent>, StreamFailure> {
        let Ok(value) = serde_json::from_str::<Value>(data) else {
            return Ok(Vec::new());
        };
        let index = value.get("index").and_then(Value::as_u64).unwrap_or(0);
        let event = match value.get("type").and_then(Value::as_str) {
            Some("content_block_start") => {
                let block = value.get("content_block");
                if block.and_then(|b| b.get("type")).and_then(Value::as_str) != Some("tool_use") {
                    return Ok(Vec::new());
                }
                StreamEvent::ToolStart {
                    block: index,
                    id: block
                        .and_then(|b| b.get("id"))
                        .and_then(Value::as_str)
                        .map(str::to_string),
                    name: block
                        .and_then(|b| b.get("name"))
                        .and_then(Value::as_str)
                        .unwrap_or("unknown")
                        .to_string(),
                }
            }
            Some("content_block_delta") => {
                let delta = value.get("delta");
                let field = |k: &str| {
                    delta
                        .and_then(|d| d.get(k))
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string()
                };
                match delta.and_then(|d| d.get("type")).and_then(Value::as_str) {
                    Some("text_delta") => StreamEvent::TextDelta(field("text")),
                    Some("input_json_delta") => StreamEvent::ToolArgs {
                        block: index,
                        fragment: field("partial_json"),
                    },
                    _ => return Ok(Vec::new()),
                }
            }
            Some("message_delta") => StreamEvent::Metadata {
                stop_reason: value
                    .pointer("/delta/stop_reason")
                    .and_then(Value::as_str)
                    .map(str::to_string),
            },
            Some("message_stop") => StreamEvent::End,
            Some("error") => {
                let message = value
                    .pointer("/error/message")
                    .and_then(Value::as_str)
                    .unwrap_or("upstream stream error")
                    .to_string();
                return Err(StreamFailure(message));
            }
            _ => return Ok(Vec::new()),
        };
        Ok(vec![event])
    }
}

use crate::stream::{EventDecoder, StreamFailure};
use crate::stream::transcoder::StreamEvent;
use serde_json::Value;

/// Decodes the proprietary backend's SSE, which carries OpenAI-shaped chunks
/// and ends with `[DONE]`.
#[derive(Debug, Default)]
pub struct KimiDecoder;

impl EventDecoder for KimiDecoder {
    fn decode(&mut self, _event: &str, data: &str) -> Result<Vec<StreamEvent>, StreamFailure> {
        let data = data.trim();
        if data.is_empty() {
            return Ok(Vec::new());
        }
        if data == "[DONE]" {
            return Ok(vec![StreamEvent::End]);
        }
        let Ok(value) = serde_json::from_str::<Value>(data) else {
            tracing::debug!("skipping unparsable upstream chunk");
            return Ok(Vec::new());
        };
        if let Some(err) = value.get("error") {
            let message = err
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| err.to_string());
            return Err(StreamFailure(message));
        }

        let mut out = Vec::new();
        let Some(choice) = value.pointer("/choices/0") else {
            return Ok(out);
        };
        if let Some(text) = choice.pointer("/delta/content").and_then(Value::as_str) {
            out.push(StreamEvent::TextDelta(text.to_string()));
        }
        let calls = choice
            .pointer("/delta/tool_calls")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();
        for (position, call) in calls.iter().enumerate() {
            let block = call
                .get("index")
                .and_then(Value::as_u64)
                .unwrap_or(position as u64);
            let id = call.get("id").and_then(Value::as_str);
            let name = call.pointer("/function/name").and_then(Value::as_str);
            if id.is_some() || name.is_some() {
                out.push(StreamEvent::ToolStart {
                    block,
                    id: id.map(str::to_string),
                    name: name.unwrap_or_default().to_string(),
                });
            }
            if let Some(fragment) = call
                .pointer("/function/arguments")
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
            {
                out.push(StreamEvent::ToolArgs {
                    block,
                    fragment: fragment.to_string(),
                });
            }
        }
        if let Some(reason) = choice.get("finish_reason").and_then(Value::as_str) {
            out.push(StreamEvent::Metadata {
                stop_reason: Some(reason.to_string()),
            });
        }
        Ok(out)
    }
}

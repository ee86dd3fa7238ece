use crate::markers::ToolMarker;
use crate::models::map_model_name;
use crate::normalize::Message;
use crate::openai::ChatCompletionRequest;
use serde::Serialize;
use serde_json::{Value, json};

/// The proprietary backend only knows text turns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KimiMessage {
    pub role: &'static str,
    pub content: String,
}

pub fn project(messages: &[Message], marker: &ToolMarker) -> Vec<KimiMessage> {
    messages
        .iter()
        .map(|message| match message {
            Message::System { content } => KimiMessage {
                role: "system",
                content: content.clone().unwrap_or_default(),
            },
            Message::User { content, .. } => KimiMessage {
                role: "user",
                content: content.clone().unwrap_or_default(),
            },
            Message::Assistant {
                content,
                tool_calls,
            } => {
                let mut text = content.clone().unwrap_or_default();
                for call in tool_calls {
                    text.push('\n');
                    text.push_str(&marker.render(call));
                }
                KimiMessage {
                    role: "assistant",
                    content: text.trim().to_string(),
                }
            }
            Message::Tool {
                tool_call_id,
                content,
            } => KimiMessage {
                role: "user",
                content: format!(
                    "Tool Response ({}): {}",
                    tool_call_id,
                    content.as_deref().unwrap_or_default()
                ),
            },
        })
        .collect()
}

pub fn build_request(
    req: &ChatCompletionRequest,
    messages: &[Message],
    marker: &ToolMarker,
) -> Value {
    let mut body = json!({
        "model": map_model_name(&req.model),
        "messages": project(messages, marker),
        "stream": req.stream,
    });
    if let Some(obj) = body.as_object_mut() {
        if let Some(t) = req.temperature {
            obj.insert("temperature".to_string(), json!(t));
        }
        if let Some(p) = req.top_p {
            obj.insert("top_p".to_string(), json!(p));
        }
        if let Some(m) = req.max_tokens {
            obj.insert("max_tokens".to_string(), json!(m));
        }
    }
    body
}

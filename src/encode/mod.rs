//! Request side: OpenAI messages in, backend request bodies out.

pub mod anthropic;
pub mod kimi;

use crate::normalize::{Message, normalize};
use crate::openai::ChatMessage;
use crate::pairing::validate_tool_calls;

/// Legacy upgrade followed by pairing validation. Every backend projection
/// starts from this list.
pub fn prepare_messages(messages: Vec<ChatMessage>) -> Vec<Message> {
    validate_tool_calls(&normalize(messages))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn legacy_call_with_function_reply_survives_validation() {
        let messages: Vec<ChatMessage> = serde_json::from_value(json!([
            { "role": "user", "content": "weather?" },
            { "role": "assistant", "content": null, "function_call": { "name": "w", "arguments": "{}" } },
            { "role": "function", "name": "w", "content": "sunny" },
            { "role": "assistant", "content": null, "function_call": { "name": "w", "arguments": "{}" } },
            { "role": "user", "content": "thanks" }
        ]))
        .unwrap();
        let out = prepare_messages(messages);
        assert_eq!(out.len(), 4);
        assert_eq!(out[1].tool_calls()[0].id, "w");
        assert!(out[2].is_tool());
        assert!(out[3].content() == Some("thanks"));
    }

    #[test]
    fn missing_ids_drop_the_pair() {
        let messages: Vec<ChatMessage> = serde_json::from_value(json!([
            { "role": "assistant", "content": null, "tool_calls": [{ "type": "function", "function": { "name": "f", "arguments": "{}" } }] },
            { "role": "tool", "content": "ok" },
            { "role": "user", "content": "go on" }
        ]))
        .unwrap();
        let out = prepare_messages(messages);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].content(), Some("go on"));
    }
}

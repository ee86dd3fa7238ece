//! Response side: one complete backend response in, one `chat.completion` out.

pub mod anthropic;
pub mod kimi;

use crate::openai::{AssistantMessage, ChatCompletion, Choice, ToolCall, Usage};

pub(crate) fn single_choice_completion(
    id: String,
    created: i64,
    model: &str,
    content: Option<String>,
    tool_calls: Vec<ToolCall>,
    finish_reason: String,
    usage: Usage,
) -> ChatCompletion {
    ChatCompletion {
        id,
        object: "chat.completion".to_string(),
        created,
        model: model.to_string(),
        choices: vec![Choice {
            index: 0,
            message: AssistantMessage {
                role: "assistant".to_string(),
                content,
                tool_calls: if tool_calls.is_empty() {
                    None
                } else {
                    Some(tool_calls)
                },
            },
            finish_reason,
            logprobs: None,
        }],
        usage,
    }
}

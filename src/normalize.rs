use crate::openai::{
    ChatCompletionRequest, ChatMessage, FunctionCall, ToolCall, ToolDefinition, tool_call_id,
};
use serde_json::{Value, json};

/// A conversation turn after legacy upgrade. Every backend projection matches
/// on this exhaustively, so there is no "function" role left to forget.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    System {
        content: Option<String>,
    },
    User {
        content: Option<String>,
        name: Option<String>,
    },
    Assistant {
        content: Option<String>,
        tool_calls: Vec<ToolCall>,
    },
    Tool {
        tool_call_id: String,
        content: Option<String>,
    },
}

impl Message {
    pub fn content(&self) -> Option<&str> {
        match self {
            Message::System { content }
            | Message::User { content, .. }
            | Message::Assistant { content, .. }
            | Message::Tool { content, .. } => content.as_deref(),
        }
    }

    pub fn is_tool(&self) -> bool {
        matches!(self, Message::Tool { .. })
    }

    pub fn tool_calls(&self) -> &[ToolCall] {
        match self {
            Message::Assistant { tool_calls, .. } => tool_calls,
            _ => &[],
        }
    }
}

impl From<Message> for ChatMessage {
    fn from(message: Message) -> Self {
        match message {
            Message::System { content } => ChatMessage::System {
                content: content.into(),
                name: None,
            },
            Message::User { content, name } => ChatMessage::User {
                content: content.into(),
                name,
            },
            Message::Assistant {
                content,
                tool_calls,
            } => ChatMessage::Assistant {
                content: content.into(),
                name: None,
                tool_calls: if tool_calls.is_empty() {
                    None
                } else {
                    Some(tool_calls)
                },
                function_call: None,
            },
            Message::Tool {
                tool_call_id,
                content,
            } => ChatMessage::Tool {
                content: content.into(),
                tool_call_id,
            },
        }
    }
}

/// Upgrades legacy function-calling shapes. Total and order-preserving:
/// every input message yields exactly one output message.
pub fn normalize(messages: Vec<ChatMessage>) -> Vec<Message> {
    messages.into_iter().map(upgrade_message).collect()
}

fn upgrade_message(message: ChatMessage) -> Message {
    match message {
        ChatMessage::System { content, .. } => Message::System {
            content: content.to_text(),
        },
        ChatMessage::User { content, name } => Message::User {
            content: content.to_text(),
            name,
        },
        ChatMessage::Assistant {
            content,
            tool_calls,
            function_call,
            ..
        } => {
            let tool_calls = match (tool_calls, function_call) {
                (Some(calls), _) => calls,
                (None, Some(call)) => vec![wrap_function_call(call)],
                (None, None) => Vec::new(),
            };
            Message::Assistant {
                content: content.to_text(),
                tool_calls,
            }
        }
        ChatMessage::Tool {
            content,
            tool_call_id,
        } => Message::Tool {
            tool_call_id,
            content: content.to_text(),
        },
        ChatMessage::Function { content, name } => Message::Tool {
            tool_call_id: name
                .filter(|n| !n.is_empty())
                .unwrap_or_else(tool_call_id),
            content: content.to_text(),
        },
    }
}

/// The wrapped call takes the function name as its id, which is also the id
/// a legacy `function` reply is given, so the pair still matches.
fn wrap_function_call(call: FunctionCall) -> ToolCall {
    let id = if call.name.is_empty() {
        tool_call_id()
    } else {
        call.name.clone()
    };
    ToolCall::function(id, call.name, call.arguments)
}

/// Folds the deprecated `functions`/`function_call` request fields into
/// `tools`/`tool_choice` when the modern fields are absent.
pub fn upgrade_request_tools(req: &mut ChatCompletionRequest) {
    if req.tools.is_none() {
        if let Some(functions) = req.functions.take() {
            req.tools = Some(
                functions
                    .into_iter()
                    .map(|function| ToolDefinition {
                        tool_type: "function".to_string(),
                        function: Some(function),
                    })
                    .collect(),
            );
        }
    }
    if req.tool_choice.is_none() {
        if let Some(choice) = req.function_call.take() {
            req.tool_choice = Some(match choice {
                Value::Object(obj) => match obj.get("name").and_then(|v| v.as_str()) {
                    Some(name) => json!({ "type": "function", "function": { "name": name } }),
                    None => Value::Object(obj),
                },
                other => other,
            });
        }
    }
}

/// Text of every message, used by the token estimator.
pub fn conversation_text(messages: &[Message]) -> String {
    let mut out = String::new();
    for message in messages {
        if let Some(text) = message.content() {
            out.push_str(text);
        }
        for call in message.tool_calls() {
            out.push_str(&call.function.name);
            out.push_str(&call.function.arguments);
        }
    }
    out
}

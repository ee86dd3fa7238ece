use crate::normalize::Message;
use crate::openai::{ChatCompletionRequest, ToolDefinition};
use serde::Serialize;
use serde_json::{Value, json};
use std::collections::HashMap;

/// Client tool-call ids and the `toolu_` ids sent to Anthropic, both ways.
/// Lives for one request.
#[derive(Debug, Clone, Default)]
pub struct ToolIdMap {
    to_backend: HashMap<String, String>,
    to_client: HashMap<String, String>,
}

impl ToolIdMap {
    pub fn insert(&mut self, client_id: impl Into<String>, backend_id: impl Into<String>) {
        let client_id = client_id.into();
        let backend_id = backend_id.into();
        self.to_client.insert(backend_id.clone(), client_id.clone());
        self.to_backend.insert(client_id, backend_id);
    }

    pub fn backend_id(&self, client_id: &str) -> Option<&str> {
        self.to_backend.get(client_id).map(String::as_str)
    }

    /// The client's id for a backend id, or the backend id itself when the
    /// call originated upstream.
    pub fn client_id<'a>(&'a self, backend_id: &'a str) -> &'a str {
        self.to_client
            .get(backend_id)
            .map(String::as_str)
            .unwrap_or(backend_id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnthropicMessage {
    pub role: &'static str,
    pub content: Vec<ContentBlock>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AnthropicTool {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub input_schema: Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct MessagesRequest {
    pub model: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub system: Vec<ContentBlock>,
    pub messages: Vec<AnthropicMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<AnthropicTool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    pub max_tokens: u64,
    pub stream: bool,
}

pub fn backend_tool_id() -> String {
    format!("toolu_{}", uuid::Uuid::new_v4().simple())
}

/// Projects the validated conversation. System turns are lifted out; tool
/// results ride in user turns, consecutive results sharing one turn.
pub fn project(messages: &[Message], ids: &mut ToolIdMap) -> (Vec<ContentBlock>, Vec<AnthropicMessage>) {
    let mut system = Vec::new();
    let mut out: Vec<AnthropicMessage> = Vec::new();

    for message in messages {
        match message {
            Message::System { content } => {
                if let Some(text) = content.as_deref().filter(|t| !t.is_empty()) {
                    system.push(ContentBlock::Text {
                        text: text.to_string(),
                    });
                }
            }
            Message::User { content, .. } => out.push(AnthropicMessage {
                role: "user",
                content: vec![ContentBlock::Text {
                    text: content.clone().unwrap_or_default(),
                }],
            }),
            Message::Assistant {
                content,
                tool_calls,
            } => {
                let mut blocks = Vec::new();
                if let Some(text) = content.as_deref().filter(|t| !t.is_empty()) {
                    blocks.push(ContentBlock::Text {
                        text: text.to_string(),
                    });
                }
                for call in tool_calls {
                    let backend_id = backend_tool_id();
                    ids.insert(call.id.clone(), backend_id.clone());
                    let input = serde_json::from_str::<Value>(&call.function.arguments)
                        .unwrap_or_else(|_| Value::String(call.function.arguments.clone()));
                    blocks.push(ContentBlock::ToolUse {
                        id: backend_id,
                        name: call.function.name.clone(),
                        input,
                    });
                }
                out.push(AnthropicMessage {
                    role: "assistant",
                    content: blocks,
                });
            }
            Message::Tool {
                tool_call_id,
                content,
            } => {
                let block = ContentBlock::ToolResult {
                    tool_use_id: ids
                        .backend_id(tool_call_id)
                        .unwrap_or(tool_call_id)
                        .to_string(),
                    content: content.clone().unwrap_or_default(),
                };
                if out.last().is_some_and(is_tool_result_turn) {
                    if let Some(last) = out.last_mut() {
                        last.content.push(block);
                    }
                } else {
                    out.push(AnthropicMessage {
                        role: "user",
                        content: vec![block],
                    });
                }
            }
        }
    }
    (system, out)
}

fn is_tool_result_turn(message: &AnthropicMessage) -> bool {
    message.role == "user"
        && message
            .content
            .iter()
            .all(|b| matches!(b, ContentBlock::ToolResult { .. }))
}

pub fn map_tools(tools: &[ToolDefinition]) -> Vec<AnthropicTool> {
    tools
        .iter()
        .filter(|t| t.tool_type == "function")
        .filter_map(|t| t.function.as_ref())
        .filter(|f| !f.name.is_empty())
        .map(|f| AnthropicTool {
            name: f.name.clone(),
            description: f.description.clone(),
            input_schema: f.parameters.clone().unwrap_or_else(|| json!({})),
        })
        .collect()
}

pub fn map_tool_choice(choice: &Value) -> Option<Value> {
    match choice {
        Value::String(s) => match s.as_str() {
            "auto" => Some(json!({ "type": "auto" })),
            "required" => Some(json!({ "type": "any" })),
            "none" => Some(json!({ "type": "none" })),
            _ => None,
        },
        Value::Object(obj) => obj
            .get("function")
            .and_then(|f| f.get("name"))
            .and_then(|n| n.as_str())
            .map(|name| json!({ "type": "tool", "name": name })),
        _ => None,
    }
}

pub fn build_request(
    req: &ChatCompletionRequest,
    messages: &[Message],
    default_max_tokens: u64,
) -> (MessagesRequest, ToolIdMap) {
    let mut ids = ToolIdMap::default();
    let (system, messages) = project(messages, &mut ids);
    let tools = req
        .tools
        .as_deref()
        .map(map_tools)
        .filter(|t| !t.is_empty());
    let request = MessagesRequest {
        model: req.model.clone(),
        system,
        messages,
        tool_choice: tools
            .as_ref()
            .and(req.tool_choice.as_ref())
            .and_then(map_tool_choice),
        tools,
        temperature: req.temperature,
        top_p: req.top_p,
        max_tokens: req.max_tokens.unwrap_or(default_max_tokens),
        stream: req.stream,
    };
    (request, ids)
}

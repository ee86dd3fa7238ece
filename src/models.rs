use crate::openai::{ModelCard, ModelList};

const CATALOG_CREATED: i64 = 1_704_067_200;

const KIMI_MODELS: &[&str] = &[
    "moonshot-v1",
    "moonshot-v1-8k",
    "moonshot-v1-32k",
    "moonshot-v1-128k",
    "moonshot-v1-vision",
    "kimi",
    "kimi-search",
    "kimi-research",
    "kimi-k1",
    "kimi-math",
];

const CLAUDE_MODELS: &[&str] = &[
    "claude-3-opus-20240229",
    "claude-3-sonnet-20240229",
    "claude-3-haiku-20240307",
    "claude-3-5-sonnet-20240620",
];

/// OpenAI model names clients commonly hard-code, and the proprietary model
/// that stands in for each.
const MODEL_ALIASES: &[(&str, &str)] = &[
    ("gpt-3.5-turbo", "moonshot-v1-8k"),
    ("gpt-3.5-turbo-16k", "moonshot-v1-32k"),
    ("gpt-4", "moonshot-v1-32k"),
    ("gpt-4-32k", "moonshot-v1-128k"),
    ("gpt-4-turbo", "moonshot-v1-128k"),
    ("gpt-4-vision-preview", "moonshot-v1-vision"),
];

pub fn model_list() -> ModelList {
    let data = KIMI_MODELS
        .iter()
        .map(|id| card(id, "moonshot"))
        .chain(CLAUDE_MODELS.iter().map(|id| card(id, "anthropic")))
        .collect();
    ModelList {
        object: "list".to_string(),
        data,
    }
}

fn card(id: &str, owned_by: &str) -> ModelCard {
    ModelCard {
        id: id.to_string(),
        object: "model".to_string(),
        created: CATALOG_CREATED,
        owned_by: owned_by.to_string(),
        permission: Vec::new(),
        root: id.to_string(),
        parent: None,
    }
}

/// Maps a requested model name to the proprietary backend's name. Unknown
/// names pass through untouched.
pub fn map_model_name(model: &str) -> &str {
    MODEL_ALIASES
        .iter()
        .find(|(alias, _)| *alias == model)
        .map(|(_, target)| *target)
        .unwrap_or(model)
}

pub fn is_claude_model(model: &str) -> bool {
    model
        .get(..6)
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case("claude"))
}

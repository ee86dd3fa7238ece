use crate::markers::{DEFAULT_ARGUMENTS_LABEL, DEFAULT_INVOKE_LABEL};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProviderType {
    /// The proprietary chat backend, spoken to in an OpenAI-like dialect.
    Kimi,
    /// Anthropic Messages.
    Messages,
}

impl ProviderType {
    pub fn as_str(self) -> &'static str {
        match self {
            ProviderType::Kimi => "kimi",
            ProviderType::Messages => "anthropic",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub provider_type: ProviderType,
    pub base_url: String,
    pub auth: ProviderAuthConfig,
}

#[derive(Debug, Clone)]
pub struct ProviderAuthConfig {
    pub auth_type: ProviderAuthType,
    /// Fixed credential. When absent the caller's bearer token is forwarded.
    pub value: Option<String>,
    pub header_name: Option<String>,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProviderAuthType {
    Bearer,
    Header,
}

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub listen: String,
    pub metrics_path: String,
    pub request_timeout_ms: u64,
    pub estimate_usage: bool,
    pub kimi: ProviderConfig,
    pub anthropic: ProviderConfig,
    pub anthropic_version: String,
    pub anthropic_default_max_tokens: u64,
    pub tool_marker_invoke: String,
    pub tool_marker_arguments: String,
}

impl RuntimeConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from any key lookup. Blank values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let get_or = |key: &str, default: &str| get(key).unwrap_or_else(|| default.to_string());
        let get_u64 = |key: &str, default: u64| {
            get(key)
                .and_then(|v| v.trim().parse::<u64>().ok())
                .unwrap_or(default)
        };

        let kimi_base = get_or("KIMI_BASE_URL", "http://127.0.0.1:8001");
        let anthropic_base = get_or("ANTHROPIC_BASE_URL", "https://api.anthropic.com");

        Self {
            listen: get_or("CHATGATE_LISTEN", "0.0.0.0:8000"),
            metrics_path: get_or("CHATGATE_METRICS_PATH", "/metrics"),
            request_timeout_ms: get_u64("CHATGATE_REQUEST_TIMEOUT_MS", 120_000),
            estimate_usage: get("CHATGATE_ESTIMATE_USAGE")
                .is_some_and(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes")),
            kimi: ProviderConfig {
                provider_type: ProviderType::Kimi,
                base_url: kimi_base.trim_end_matches('/').to_string(),
                auth: ProviderAuthConfig {
                    auth_type: ProviderAuthType::Bearer,
                    value: None,
                    header_name: None,
                },
            },
            anthropic: ProviderConfig {
                provider_type: ProviderType::Messages,
                base_url: anthropic_base.trim_end_matches('/').to_string(),
                auth: ProviderAuthConfig {
                    auth_type: ProviderAuthType::Header,
                    value: get("ANTHROPIC_API_KEY"),
                    header_name: Some("x-api-key".to_string()),
                },
            },
            anthropic_version: get_or("ANTHROPIC_VERSION", "2023-06-01"),
            anthropic_default_max_tokens: get_u64("ANTHROPIC_DEFAULT_MAX_TOKENS", 1024),
            tool_marker_invoke: get_or("CHATGATE_TOOL_MARKER_INVOKE", DEFAULT_INVOKE_LABEL),
            tool_marker_arguments: get_or("CHATGATE_TOOL_MARKER_ARGUMENTS", DEFAULT_ARGUMENTS_LABEL),
        }
    }
}

use crate::config::{ProviderType, RuntimeConfig};
use crate::decode;
use crate::encode;
use crate::encode::anthropic::ToolIdMap;
use crate::error::ApiException;
use crate::markers::ToolMarker;
use crate::models::is_claude_model;
use crate::normalize::{Message, conversation_text};
use crate::openai::{ChatCompletion, ChatCompletionRequest};
use crate::stream::anthropic::AnthropicDecoder;
use crate::stream::kimi::KimiDecoder;
use crate::stream::transcoder::Transcoder;
use crate::stream::{rejected_stream, spawn_pump};
use crate::upstream::{self, UpstreamCall, UpstreamCallError, UpstreamErrorKind};
use async_trait::async_trait;
use axum::response::sse::Event;
use serde_json::Value;
use tokio_stream::wrappers::ReceiverStream;

pub type ChunkStream = ReceiverStream<Event>;

/// Per-request handles a provider needs to reach its backend.
pub struct ChatContext<'a> {
    pub http: &'a reqwest::Client,
    pub runtime: &'a RuntimeConfig,
    pub marker: &'a ToolMarker,
    pub caller_token: &'a str,
    pub request_id: Option<&'a str>,
}

/// Accepts an OpenAI request and produces an OpenAI response or chunk
/// stream from one backend.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    fn provider_type(&self) -> ProviderType;

    async fn complete(
        &self,
        ctx: &ChatContext<'_>,
        req: &ChatCompletionRequest,
        messages: &[Message],
    ) -> Result<ChatCompletion, ApiException>;

    /// Errors reaching the backend come back as `Err`. A backend that answers
    /// with a non-2xx status still yields a stream carrying the error text.
    async fn stream(
        &self,
        ctx: &ChatContext<'_>,
        req: &ChatCompletionRequest,
        messages: &[Message],
    ) -> Result<ChunkStream, ApiException>;
}

pub struct KimiProvider;
pub struct AnthropicProvider;

static KIMI: KimiProvider = KimiProvider;
static ANTHROPIC: AnthropicProvider = AnthropicProvider;

pub fn provider_for(model: &str) -> &'static dyn ChatProvider {
    if is_claude_model(model) {
        &ANTHROPIC
    } else {
        &KIMI
    }
}

const CHAT_PATH: &str = "/v1/chat/completions";
const MESSAGES_PATH: &str = "/v1/messages";

fn record_upstream_error(provider: ProviderType, err: &UpstreamCallError) {
    metrics::counter!("chatgate_upstream_errors_total", "provider" => provider.as_str()).increment(1);
    tracing::warn!(
        provider = provider.as_str(),
        status = err.status.map(|s| s.as_u16()),
        code = err.code.as_deref(),
        "upstream call failed: {}",
        err.message
    );
}

/// Non-2xx before any event goes in-band; anything else is an error response.
fn stream_failure(
    provider: ProviderType,
    label: &str,
    model: &str,
    err: UpstreamCallError,
) -> Result<ChunkStream, ApiException> {
    record_upstream_error(provider, &err);
    if err.kind == UpstreamErrorKind::Http && err.status.is_some() {
        return Ok(rejected_stream(model, &format!("{label} {}", err.message)));
    }
    Err(err.into())
}

#[async_trait]
impl ChatProvider for KimiProvider {
    fn provider_type(&self) -> ProviderType {
        ProviderType::Kimi
    }

    async fn complete(
        &self,
        ctx: &ChatContext<'_>,
        req: &ChatCompletionRequest,
        messages: &[Message],
    ) -> Result<ChatCompletion, ApiException> {
        let mut body = encode::kimi::build_request(req, messages, ctx.marker);
        body["stream"] = Value::Bool(false);
        let headers: Vec<(&str, &str)> = ctx.request_id.map(|id| ("x-request-id", id)).into_iter().collect();
        let call = UpstreamCall {
            provider: &ctx.runtime.kimi,
            caller_token: ctx.caller_token,
            timeout_ms: ctx.runtime.request_timeout_ms,
            extra_headers: &headers,
        };
        let resp = upstream::call_upstream(ctx.http, call, CHAT_PATH, &body)
            .await
            .inspect_err(|err| record_upstream_error(ProviderType::Kimi, err))?;
        let prompt_text = ctx
            .runtime
            .estimate_usage
            .then(|| conversation_text(messages));
        Ok(decode::kimi::to_chat_completion(
            &resp,
            &req.model,
            ctx.marker,
            prompt_text.as_deref(),
        ))
    }

    async fn stream(
        &self,
        ctx: &ChatContext<'_>,
        req: &ChatCompletionRequest,
        messages: &[Message],
    ) -> Result<ChunkStream, ApiException> {
        let mut body = encode::kimi::build_request(req, messages, ctx.marker);
        body["stream"] = Value::Bool(true);
        let headers: Vec<(&str, &str)> = ctx.request_id.map(|id| ("x-request-id", id)).into_iter().collect();
        let call = UpstreamCall {
            provider: &ctx.runtime.kimi,
            caller_token: ctx.caller_token,
            timeout_ms: ctx.runtime.request_timeout_ms,
            extra_headers: &headers,
        };
        match upstream::call_upstream_raw(ctx.http, call, CHAT_PATH, &body).await {
            Ok(resp) => Ok(spawn_pump(
                resp.bytes_stream(),
                KimiDecoder,
                Transcoder::new(req.model.clone()),
                ToolIdMap::default(),
            )),
            Err(err) => stream_failure(ProviderType::Kimi, "Kimi", &req.model, err),
        }
    }
}

impl AnthropicProvider {
    fn headers<'a>(ctx: &'a ChatContext<'_>, stream: bool) -> Vec<(&'a str, &'a str)> {
        let mut headers = vec![("anthropic-version", ctx.runtime.anthropic_version.as_str())];
        if stream {
            headers.push(("accept", "text/event-stream"));
        }
        if let Some(id) = ctx.request_id {
            headers.push(("x-request-id", id));
        }
        headers
    }

    fn encode(
        ctx: &ChatContext<'_>,
        req: &ChatCompletionRequest,
        messages: &[Message],
        stream: bool,
    ) -> Result<(Value, ToolIdMap), ApiException> {
        let (mut body, ids) =
            encode::anthropic::build_request(req, messages, ctx.runtime.anthropic_default_max_tokens);
        body.stream = stream;
        let body = serde_json::to_value(&body).map_err(|err| {
            ApiException::new(crate::error::ErrorCode::INTERNAL_ERROR, err.to_string())
        })?;
        Ok((body, ids))
    }
}

#[async_trait]
impl ChatProvider for AnthropicProvider {
    fn provider_type(&self) -> ProviderType {
        ProviderType::Messages
    }

    async fn complete(
        &self,
        ctx: &ChatContext<'_>,
        req: &ChatCompletionRequest,
        messages: &[Message],
    ) -> Result<ChatCompletion, ApiException> {
        let (body, ids) = Self::encode(ctx, req, messages, false)?;
        let headers = Self::headers(ctx, false);
        let call = UpstreamCall {
            provider: &ctx.runtime.anthropic,
            caller_token: ctx.caller_token,
            timeout_ms: ctx.runtime.request_timeout_ms,
            extra_headers: &headers,
        };
        let resp = upstream::call_upstream(ctx.http, call, MESSAGES_PATH, &body)
            .await
            .inspect_err(|err| record_upstream_error(ProviderType::Messages, err))?;
        Ok(decode::anthropic::to_chat_completion(&resp, &req.model, &ids))
    }

    async fn stream(
        &self,
        ctx: &ChatContext<'_>,
        req: &ChatCompletionRequest,
        messages: &[Message],
    ) -> Result<ChunkStream, ApiException> {
        let (body, ids) = Self::encode(ctx, req, messages, true)?;
        let headers = Self::headers(ctx, true);
        let call = UpstreamCall {
            provider: &ctx.runtime.anthropic,
            caller_token: ctx.caller_token,
            timeout_ms: ctx.runtime.request_timeout_ms,
            extra_headers: &headers,
        };
        match upstream::call_upstream_raw(ctx.http, call, MESSAGES_PATH, &body).await {
            Ok(resp) => Ok(spawn_pump(
                resp.bytes_stream(),
                AnthropicDecoder,
                Transcoder::new(req.model.clone()),
                ids,
            )),
            Err(err) => stream_failure(ProviderType::Messages, "Anthropic", &req.model, err),
        }
    }
}

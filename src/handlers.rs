use crate::app::AppState;
use crate::auth::bearer_token;
use crate::encode::prepare_messages;
use crate::error::{ApiException, AppError, AppResult, ErrorCode};
use crate::models::model_list;
use crate::normalize::upgrade_request_tools;
use crate::openai::{ChatCompletionRequest, ModelList};
use crate::providers::{ChatContext, provider_for};
use axum::Json;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, Uri};
use axum::response::{IntoResponse, Response, Sse};
use futures_util::StreamExt;
use serde_json::Value;
use std::convert::Infallible;

pub async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    state.metrics.render()
}

pub async fn ping() -> &'static str {
    "pong"
}

pub async fn list_models() -> Json<ModelList> {
    Json(model_list())
}

pub async fn not_found(uri: Uri) -> AppError {
    ApiException::new(
        ErrorCode::ROUTE_NOT_FOUND,
        format!("No route matches {}", uri.path()),
    )
    .into()
}

/// Parses the body by hand so that malformed input still gets the OpenAI
/// error envelope.
fn parse_request(body: &[u8]) -> AppResult<ChatCompletionRequest> {
    let invalid = |message: String| {
        ApiException::new(ErrorCode::INVALID_REQUEST, message).into_app_error(None)
    };
    let value: Value = serde_json::from_slice(body)
        .map_err(|err| invalid(format!("Request body is not valid JSON: {err}")))?;
    if !value.is_object() {
        return Err(invalid("Request body must be a JSON object".to_string()));
    }
    let has_messages = value
        .get("messages")
        .and_then(Value::as_array)
        .is_some_and(|m| !m.is_empty());
    if !has_messages {
        return Err(ApiException::new(
            ErrorCode::MISSING_REQUIRED_PARAM,
            "'messages' is required and must be a non-empty array",
        )
        .into_app_error(Some("messages")));
    }
    serde_json::from_value(value).map_err(|err| {
        ApiException::new(ErrorCode::INVALID_REQUEST, format!("Invalid request: {err}"))
            .into_app_error(Some("messages"))
    })
}

pub async fn create_chat_completions(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<Response> {
    let token = bearer_token(&headers)?;
    let mut req = parse_request(&body)?;
    upgrade_request_tools(&mut req);
    let messages = prepare_messages(std::mem::take(&mut req.messages));

    let provider = provider_for(&req.model);
    let provider_name = provider.provider_type().as_str();
    metrics::counter!(
        "chatgate_requests_total",
        "provider" => provider_name,
        "stream" => if req.stream { "true" } else { "false" }
    )
    .increment(1);
    tracing::debug!(
        model = %req.model,
        provider = provider_name,
        stream = req.stream,
        messages = messages.len(),
        "dispatching chat completion"
    );

    let request_id = headers
        .get("x-request-id")
        .and_then(|v| v.to_str().ok());
    let ctx = ChatContext {
        http: &state.http,
        runtime: &state.runtime,
        marker: &state.marker,
        caller_token: &token,
        request_id,
    };

    if req.stream {
        let chunks = provider.stream(&ctx, &req, &messages).await?;
        return Ok(Sse::new(chunks.map(Ok::<_, Infallible>)).into_response());
    }
    let completion = provider.complete(&ctx, &req, &messages).await?;
    Ok(Json(completion).into_response())
}

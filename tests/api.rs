use axum::Json;
use axum::Router;
use axum::body::Body;
use axum::http::header::{AUTHORIZATION, CONTENT_TYPE};
use axum::http::{HeaderMap, Request, StatusCode};
use axum::response::IntoResponse;
use axum::response::Sse;
use axum::response::sse::Event;
use axum::routing::post;
use futures_util::StreamExt;
use http_body_util::BodyExt;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tower::ServiceExt;

#[derive(Clone, Default)]
struct Captured {
    headers: Arc<Mutex<Vec<(String, String)>>>,
    bodies: Arc<Mutex<Vec<Value>>>,
}

impl Captured {
    fn record(&self, headers: &HeaderMap, body: &Value) {
        for name in ["authorization", "x-api-key", "anthropic-version", "x-request-id"] {
            if let Some(v) = headers.get(name).and_then(|h| h.to_str().ok()) {
                self.headers
                    .lock()
                    .unwrap()
                    .push((name.to_string(), v.to_string()));
            }
        }
        self.bodies.lock().unwrap().push(body.clone());
    }

    fn header(&self, name: &str) -> Option<String> {
        self.headers
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.clone())
    }

    fn last_body(&self) -> Value {
        self.bodies.lock().unwrap().last().cloned().unwrap_or(Value::Null)
    }
}

struct TestContext {
    router: axum::Router,
    captured: Captured,
}

/// Text of the last message, whatever its shape on the wire.
fn last_text(body: &Value) -> String {
    let Some(last) = body["messages"].as_array().and_then(|m| m.last()) else {
        return String::new();
    };
    match &last["content"] {
        Value::String(s) => s.clone(),
        Value::Array(blocks) => blocks
            .iter()
            .filter_map(|b| b["text"].as_str().or_else(|| b["content"].as_str()))
            .collect::<Vec<_>>()
            .join(""),
        _ => String::new(),
    }
}

fn forced_error(text: &str) -> Option<axum::response::Response> {
    let status = if text.contains("force_error_500") {
        StatusCode::INTERNAL_SERVER_ERROR
    } else if text.contains("force_error_429") {
        StatusCode::TOO_MANY_REQUESTS
    } else if text.contains("force_error_401") {
        StatusCode::UNAUTHORIZED
    } else {
        return None;
    };
    Some(
        (
            status,
            Json(json!({ "error": { "type": "forced", "message": "forced upstream error" } })),
        )
            .into_response(),
    )
}

fn sse(events: Vec<Event>) -> axum::response::Response {
    Sse::new(futures_util::stream::iter(
        events.into_iter().map(Ok::<_, Infallible>),
    ))
    .into_response()
}

/// Sends each event after `gap`, so the whole body outlives short timeouts.
fn slow_sse(events: Vec<Event>, gap: Duration) -> axum::response::Response {
    Sse::new(futures_util::stream::iter(events).then(move |event| async move {
        tokio::time::sleep(gap).await;
        Ok::<_, Infallible>(event)
    }))
    .into_response()
}

async fn start_upstream() -> (SocketAddr, Captured) {
    let captured = Captured::default();

    async fn kimi(
        axum::extract::State(captured): axum::extract::State<Captured>,
        headers: HeaderMap,
        Json(body): Json<Value>,
    ) -> axum::response::Response {
        captured.record(&headers, &body);
        let text = last_text(&body);
        if let Some(resp) = forced_error(&text) {
            return resp;
        }
        if body["stream"].as_bool() == Some(true) {
            let chunk = |delta: Value, finish: Value| {
                Event::default().data(
                    json!({ "id": "kimi-1", "choices": [{ "index": 0, "delta": delta, "finish_reason": finish }] })
                        .to_string(),
                )
            };
            let mut events = Vec::new();
            if text.contains("slow_stream") {
                for i in 0..6 {
                    events.push(chunk(json!({ "content": format!("t{i}") }), Value::Null));
                }
                events.push(chunk(json!({}), json!("stop")));
                events.push(Event::default().data("[DONE]"));
                return slow_sse(events, Duration::from_millis(150));
            }
            if text.contains("use_tool") {
                events.push(chunk(
                    json!({ "tool_calls": [{ "index": 0, "id": "call_k1", "type": "function", "function": { "name": "lookup", "arguments": "" } }] }),
                    Value::Null,
                ));
                events.push(chunk(
                    json!({ "tool_calls": [{ "index": 0, "function": { "arguments": "{\"q\":" } }] }),
                    Value::Null,
                ));
                events.push(chunk(
                    json!({ "tool_calls": [{ "index": 0, "function": { "arguments": "1}" } }] }),
                    Value::Null,
                ));
                events.push(chunk(json!({}), json!("tool_calls")));
            } else {
                events.push(chunk(json!({ "content": "Hel" }), Value::Null));
                events.push(chunk(json!({ "content": "lo" }), Value::Null));
                events.push(chunk(json!({}), json!("stop")));
            }
            if !text.contains("cut_short") {
                events.push(Event::default().data("[DONE]"));
            }
            return sse(events);
        }
        let content = if text.contains("use_tool") {
            "Let me look.\n[调用工具: lookup]\n参数: {\"q\":{\"deep\":[1,2]}}".to_string()
        } else {
            format!("echo: {text}")
        };
        let mut resp = json!({
            "id": "kimi-cmpl-1",
            "created": 1_700_000_000,
            "choices": [{ "index": 0, "message": { "role": "assistant", "content": content }, "finish_reason": "stop" }]
        });
        if !text.contains("no_usage") {
            resp["usage"] = json!({ "prompt_tokens": 7, "completion_tokens": 3, "total_tokens": 10 });
        }
        Json(resp).into_response()
    }

    async fn messages(
        axum::extract::State(captured): axum::extract::State<Captured>,
        headers: HeaderMap,
        Json(body): Json<Value>,
    ) -> axum::response::Response {
        captured.record(&headers, &body);
        let text = last_text(&body);
        if let Some(resp) = forced_error(&text) {
            return resp;
        }
        let wants_tool = body["tools"].as_array().is_some_and(|t| !t.is_empty())
            && !body["messages"]
                .as_array()
                .into_iter()
                .flatten()
                .flat_map(|m| m["content"].as_array().into_iter().flatten())
                .any(|b| b["type"] == "tool_result");
        if body["stream"].as_bool() == Some(true) {
            let ev = |name: &str, data: Value| Event::default().event(name).data(data.to_string());
            let mut events = vec![
                ev("message_start", json!({ "type": "message_start", "message": { "id": "msg_1" } })),
                ev("ping", json!({ "type": "ping" })),
            ];
            if wants_tool {
                events.push(ev("content_block_start", json!({ "type": "content_block_start", "index": 0, "content_block": { "type": "tool_use", "id": "toolu_s1", "name": "calc", "input": {} } })));
                events.push(ev("content_block_delta", json!({ "type": "content_block_delta", "index": 0, "delta": { "type": "input_json_delta", "partial_json": "{\"x\":" } })));
                events.push(ev("content_block_delta", json!({ "type": "content_block_delta", "index": 0, "delta": { "type": "input_json_delta", "partial_json": "1}" } })));
                events.push(ev("message_delta", json!({ "type": "message_delta", "delta": { "stop_reason": "tool_use" } })));
            } else if text.contains("stream_error") {
                events.push(ev("content_block_delta", json!({ "type": "content_block_delta", "index": 0, "delta": { "type": "text_delta", "text": "par" } })));
                events.push(ev("error", json!({ "type": "error", "error": { "type": "overloaded_error", "message": "Overloaded" } })));
            } else {
                events.push(ev("content_block_start", json!({ "type": "content_block_start", "index": 0, "content_block": { "type": "text", "text": "" } })));
                events.push(ev("content_block_delta", json!({ "type": "content_block_delta", "index": 0, "delta": { "type": "text_delta", "text": "Hi" } })));
                events.push(ev("content_block_delta", json!({ "type": "content_block_delta", "index": 0, "delta": { "type": "text_delta", "text": " there" } })));
                events.push(ev("message_delta", json!({ "type": "message_delta", "delta": { "stop_reason": "end_turn" } })));
            }
            events.push(ev("message_stop", json!({ "type": "message_stop" })));
            return sse(events);
        }
        let content = if wants_tool {
            json!([{ "type": "tool_use", "id": "toolu_n1", "name": "calc", "input": { "x": 1 } }])
        } else {
            json!([{ "type": "text", "text": format!("claude says: {text}") }])
        };
        Json(json!({
            "id": "msg_n1",
            "type": "message",
            "content": content,
            "stop_reason": if wants_tool { "tool_use" } else { "end_turn" },
            "usage": { "input_tokens": 11, "output_tokens": 4 }
        }))
        .into_response()
    }

    let router = Router::new()
        .route("/v1/chat/completions", post(kimi))
        .route("/v1/messages", post(messages))
        .with_state(captured.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    (addr, captured)
}

fn runtime(kimi: &str, anthropic: &str, extra: &[(&str, &str)]) -> chatgate::config::RuntimeConfig {
    let mut env: HashMap<String, String> = HashMap::from([
        ("CHATGATE_LISTEN".to_string(), "127.0.0.1:0".to_string()),
        ("KIMI_BASE_URL".to_string(), kimi.to_string()),
        ("ANTHROPIC_BASE_URL".to_string(), anthropic.to_string()),
        ("CHATGATE_REQUEST_TIMEOUT_MS".to_string(), "5000".to_string()),
    ]);
    for (k, v) in extra {
        env.insert(k.to_string(), v.to_string());
    }
    chatgate::config::RuntimeConfig::from_lookup(|key| env.get(key).cloned())
}

async fn setup_with(extra: &[(&str, &str)]) -> TestContext {
    let (addr, captured) = start_upstream().await;
    let base = format!("http://{addr}");
    let state = chatgate::app::load_state_with_runtime(runtime(&base, &base, extra))
        .await
        .expect("load state");
    TestContext {
        router: chatgate::app::build_app(state),
        captured,
    }
}

async fn setup() -> TestContext {
    setup_with(&[("ANTHROPIC_API_KEY", "sk-ant-test")]).await
}

async fn post_chat(router: &Router, auth: Option<&str>, body: String) -> (StatusCode, HeaderMap, String) {
    let mut req = Request::builder()
        .method("POST")
        .uri("/v1/chat/completions")
        .header(CONTENT_TYPE, "application/json");
    if let Some(auth) = auth {
        req = req.header(AUTHORIZATION, auth);
    }
    let resp = router
        .clone()
        .oneshot(req.body(Body::from(body)).unwrap())
        .await
        .unwrap();
    let status = resp.status();
    let headers = resp.headers().clone();
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    (status, headers, String::from_utf8_lossy(&bytes).to_string())
}

async fn chat(ctx: &TestContext, body: Value) -> (StatusCode, String) {
    let (status, _, text) = post_chat(&ctx.router, Some("Bearer user-token"), body.to_string()).await;
    (status, text)
}

/// The `data:` payloads of an SSE body, in order.
fn sse_data(body: &str) -> Vec<String> {
    body.split("\n\n")
        .filter_map(|event| {
            event
                .lines()
                .find_map(|line| line.strip_prefix("data:"))
                .map(|d| d.trim_start().to_string())
        })
        .collect()
}

fn chunks(body: &str) -> Vec<Value> {
    sse_data(body)
        .iter()
        .filter(|d| *d != "[DONE]")
        .map(|d| serde_json::from_str(d).unwrap())
        .collect()
}

#[tokio::test]
async fn chat_requires_bearer_auth() {
    let ctx = setup().await;
    let body = json!({ "model": "kimi", "messages": [{ "role": "user", "content": "hi" }] }).to_string();

    let (status, _, text) = post_chat(&ctx.router, None, body.clone()).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let v: Value = serde_json::from_str(&text).unwrap();
    assert_eq!(v["error"]["type"], "authentication_error");
    assert_eq!(v["error"]["code"], "invalid_api_key");
    assert_eq!(v["error"]["param"], "Authorization");

    let (status, _, _) = post_chat(&ctx.router, Some("Token abc"), body).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn models_and_ping_need_no_auth() {
    let ctx = setup().await;
    let resp = ctx
        .router
        .clone()
        .oneshot(Request::builder().uri("/v1/models").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    let v: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(v["object"], "list");
    assert_eq!(v["data"].as_array().unwrap().len(), 14);
    assert_eq!(v["data"][0]["object"], "model");
    assert!(v["data"][0]["parent"].is_null());

    let resp = ctx
        .router
        .clone()
        .oneshot(Request::builder().uri("/ping").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&bytes[..], b"pong");
}

#[tokio::test]
async fn request_id_is_set_and_forwarded() {
    let ctx = setup().await;
    let body = json!({ "model": "kimi", "messages": [{ "role": "user", "content": "hi" }] }).to_string();
    let (status, headers, _) = post_chat(&ctx.router, Some("Bearer user-token"), body).await;
    assert_eq!(status, StatusCode::OK);
    let id = headers.get("x-request-id").unwrap().to_str().unwrap().to_string();
    assert_eq!(ctx.captured.header("x-request-id"), Some(id));
}

#[tokio::test]
async fn malformed_bodies_get_error_envelopes() {
    let ctx = setup().await;
    let (status, _, text) = post_chat(&ctx.router, Some("Bearer t"), "{not json".to_string()).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let v: Value = serde_json::from_str(&text).unwrap();
    assert_eq!(v["error"]["type"], "invalid_request_error");

    let (status, text) = chat(&ctx, json!({ "model": "kimi", "messages": [] })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let v: Value = serde_json::from_str(&text).unwrap();
    assert_eq!(v["error"]["param"], "messages");
}

#[tokio::test]
async fn kimi_nonstream_forwards_bearer_and_maps_model() {
    let ctx = setup().await;
    let (status, text) = chat(
        &ctx,
        json!({ "model": "gpt-4", "messages": [{ "role": "user", "content": "hello" }] }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let v: Value = serde_json::from_str(&text).unwrap();
    assert_eq!(v["object"], "chat.completion");
    assert_eq!(v["id"], "kimi-cmpl-1");
    assert_eq!(v["model"], "gpt-4");
    assert_eq!(v["choices"][0]["message"]["content"], "echo: hello");
    assert_eq!(v["choices"][0]["finish_reason"], "stop");
    assert_eq!(v["usage"]["total_tokens"], 10);

    assert_eq!(
        ctx.captured.header("authorization").as_deref(),
        Some("Bearer user-token")
    );
    assert_eq!(ctx.captured.last_body()["model"], "moonshot-v1-32k");
}

#[tokio::test]
async fn kimi_projection_flattens_tool_turns() {
    let ctx = setup().await;
    let (status, _) = chat(
        &ctx,
        json!({
            "model": "kimi",
            "messages": [
                { "role": "user", "content": "weather?" },
                { "role": "assistant", "content": null, "tool_calls": [
                    { "id": "c1", "type": "function", "function": { "name": "weather", "arguments": "{\"city\":\"Oslo\"}" } },
                    { "id": "c2", "type": "function", "function": { "name": "orphan", "arguments": "{}" } }
                ] },
                { "role": "tool", "tool_call_id": "c1", "content": "rain" },
                { "role": "tool", "tool_call_id": "zz", "content": "stray" },
                { "role": "user", "content": "thanks" }
            ]
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let sent = ctx.captured.last_body();
    let messages = sent["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 4);
    assert_eq!(
        messages[1]["content"],
        "[调用工具: weather]\n参数: {\"city\":\"Oslo\"}"
    );
    assert_eq!(messages[2]["role"], "user");
    assert_eq!(messages[2]["content"], "Tool Response (c1): rain");
}

#[tokio::test]
async fn kimi_markers_become_tool_calls() {
    let ctx = setup().await;
    let (status, text) = chat(
        &ctx,
        json!({ "model": "kimi", "messages": [{ "role": "user", "content": "use_tool please" }] }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let v: Value = serde_json::from_str(&text).unwrap();
    let choice = &v["choices"][0];
    assert_eq!(choice["finish_reason"], "tool_calls");
    assert_eq!(choice["message"]["content"], "Let me look.");
    assert_eq!(choice["message"]["tool_calls"][0]["function"]["name"], "lookup");
    assert_eq!(
        choice["message"]["tool_calls"][0]["function"]["arguments"],
        "{\"q\":{\"deep\":[1,2]}}"
    );
}

#[tokio::test]
async fn kimi_usage_estimate_is_opt_in() {
    let ctx = setup().await;
    let (_, text) = chat(
        &ctx,
        json!({ "model": "kimi", "messages": [{ "role": "user", "content": "no_usage" }] }),
    )
    .await;
    let v: Value = serde_json::from_str(&text).unwrap();
    assert_eq!(v["usage"]["total_tokens"], 0);

    let ctx = setup_with(&[("CHATGATE_ESTIMATE_USAGE", "true")]).await;
    let (_, text) = chat(
        &ctx,
        json!({ "model": "kimi", "messages": [{ "role": "user", "content": "no_usage" }] }),
    )
    .await;
    let v: Value = serde_json::from_str(&text).unwrap();
    assert!(v["usage"]["prompt_tokens"].as_u64().unwrap() > 0);
    assert!(v["usage"]["completion_tokens"].as_u64().unwrap() > 0);
}

#[tokio::test]
async fn kimi_stream_text() {
    let ctx = setup().await;
    let (status, text) = chat(
        &ctx,
        json!({ "model": "kimi", "stream": true, "messages": [{ "role": "user", "content": "hi" }] }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let data = sse_data(&text);
    assert_eq!(data.last().map(String::as_str), Some("[DONE]"));
    assert_eq!(data.iter().filter(|d| *d == "[DONE]").count(), 1);

    let chunks = chunks(&text);
    assert_eq!(chunks.len(), 4);
    assert_eq!(chunks[0]["choices"][0]["delta"]["role"], "assistant");
    assert_eq!(chunks[1]["choices"][0]["delta"]["content"], "Hel");
    assert_eq!(chunks[2]["choices"][0]["delta"]["content"], "lo");
    assert_eq!(chunks[3]["choices"][0]["finish_reason"], "stop");
    assert!(chunks.iter().all(|c| c["id"] == chunks[0]["id"]));
    assert!(chunks.iter().all(|c| c["model"] == "kimi"));
}

#[tokio::test]
async fn kimi_stream_tool_call_fragments() {
    let ctx = setup().await;
    let (_, text) = chat(
        &ctx,
        json!({ "model": "kimi", "stream": true, "messages": [{ "role": "user", "content": "use_tool" }] }),
    )
    .await;
    let chunks = chunks(&text);
    let start = &chunks[1]["choices"][0]["delta"]["tool_calls"][0];
    assert_eq!(start["index"], 0);
    assert_eq!(start["id"], "call_k1");
    assert_eq!(start["function"]["name"], "lookup");
    let args: String = chunks
        .iter()
        .filter_map(|c| c["choices"][0]["delta"]["tool_calls"][0]["function"]["arguments"].as_str())
        .collect();
    assert_eq!(args, "{\"q\":1}");
    assert_eq!(chunks.last().unwrap()["choices"][0]["finish_reason"], "tool_calls");
}

#[tokio::test]
async fn long_stream_outlives_request_timeout() {
    let ctx = setup_with(&[("CHATGATE_REQUEST_TIMEOUT_MS", "500")]).await;
    let (status, text) = chat(
        &ctx,
        json!({ "model": "kimi", "stream": true, "messages": [{ "role": "user", "content": "slow_stream" }] }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let chunks = chunks(&text);
    let content: Vec<_> = chunks
        .iter()
        .filter_map(|c| c["choices"][0]["delta"]["content"].as_str())
        .collect();
    assert_eq!(content, vec!["t0", "t1", "t2", "t3", "t4", "t5"]);
    assert_eq!(chunks.last().unwrap()["choices"][0]["finish_reason"], "stop");
    assert_eq!(sse_data(&text).last().map(String::as_str), Some("[DONE]"));
}

#[tokio::test]
async fn kimi_stream_cut_short_still_terminates() {
    let ctx = setup().await;
    let (_, text) = chat(
        &ctx,
        json!({ "model": "kimi", "stream": true, "messages": [{ "role": "user", "content": "cut_short" }] }),
    )
    .await;
    let data = sse_data(&text);
    assert_eq!(data.last().map(String::as_str), Some("[DONE]"));
    let chunks = chunks(&text);
    assert_eq!(chunks.last().unwrap()["choices"][0]["finish_reason"], "stop");
}

#[tokio::test]
async fn kimi_upstream_errors_map_to_envelopes() {
    let ctx = setup().await;
    let (status, text) = chat(
        &ctx,
        json!({ "model": "kimi", "messages": [{ "role": "user", "content": "force_error_429" }] }),
    )
    .await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    let v: Value = serde_json::from_str(&text).unwrap();
    assert_eq!(v["error"]["type"], "rate_limit_error");
    assert_eq!(v["error"]["code"], "rate_limit_exceeded");

    let (status, text) = chat(
        &ctx,
        json!({ "model": "kimi", "messages": [{ "role": "user", "content": "force_error_500" }] }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    let v: Value = serde_json::from_str(&text).unwrap();
    assert_eq!(v["error"]["type"], "api_error");
    assert!(v["error"]["message"].as_str().unwrap().contains("forced upstream error"));
}

#[tokio::test]
async fn rejected_stream_is_delivered_in_band() {
    let ctx = setup().await;
    let (status, text) = chat(
        &ctx,
        json!({ "model": "kimi", "stream": true, "messages": [{ "role": "user", "content": "force_error_500" }] }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let data = sse_data(&text);
    assert_eq!(data.len(), 2);
    assert_eq!(data[1], "[DONE]");
    let chunk: Value = serde_json::from_str(&data[0]).unwrap();
    let content = chunk["choices"][0]["delta"]["content"].as_str().unwrap();
    assert!(content.starts_with("Error: Kimi upstream status 500"));
    assert!(chunk["choices"][0]["finish_reason"].is_null());
}

#[tokio::test]
async fn unreachable_backend_uses_error_envelope_for_streams_too() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let dead = format!("http://{}", listener.local_addr().unwrap());
    drop(listener);
    let state = chatgate::app::load_state_with_runtime(runtime(&dead, &dead, &[]))
        .await
        .expect("load state");
    let router = chatgate::app::build_app(state);

    for stream in [false, true] {
        let body = json!({ "model": "kimi", "stream": stream, "messages": [{ "role": "user", "content": "hi" }] });
        let (status, _, text) = post_chat(&router, Some("Bearer t"), body.to_string()).await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        let v: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(v["error"]["type"], "connection_error");
        assert_eq!(v["error"]["code"], "connection_error");
    }
}

#[tokio::test]
async fn anthropic_nonstream_text_and_headers() {
    let ctx = setup().await;
    let (status, text) = chat(
        &ctx,
        json!({
            "model": "claude-3-haiku-20240307",
            "messages": [
                { "role": "system", "content": "be brief" },
                { "role": "user", "content": "hello" }
            ]
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let v: Value = serde_json::from_str(&text).unwrap();
    assert_eq!(v["choices"][0]["message"]["content"], "claude says: hello");
    assert_eq!(v["choices"][0]["finish_reason"], "stop");
    assert_eq!(v["usage"]["prompt_tokens"], 11);
    assert_eq!(v["usage"]["total_tokens"], 15);
    assert_eq!(v["model"], "claude-3-haiku-20240307");

    assert_eq!(ctx.captured.header("x-api-key").as_deref(), Some("sk-ant-test"));
    assert_eq!(
        ctx.captured.header("anthropic-version").as_deref(),
        Some("2023-06-01")
    );
    let sent = ctx.captured.last_body();
    assert_eq!(sent["system"][0]["text"], "be brief");
    assert_eq!(sent["max_tokens"], 1024);
    assert_eq!(sent["messages"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn anthropic_falls_back_to_caller_token() {
    let ctx = setup_with(&[]).await;
    let (status, _) = chat(
        &ctx,
        json!({ "model": "claude-3-opus-20240229", "messages": [{ "role": "user", "content": "hi" }] }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ctx.captured.header("x-api-key").as_deref(), Some("user-token"));
}

#[tokio::test]
async fn anthropic_tool_round_trip_remaps_ids() {
    let ctx = setup().await;
    let tools = json!([{ "type": "function", "function": { "name": "calc", "parameters": { "type": "object" } } }]);
    let (status, text) = chat(
        &ctx,
        json!({
            "model": "claude-3-haiku-20240307",
            "tools": tools.clone(),
            "tool_choice": "auto",
            "messages": [{ "role": "user", "content": "compute" }]
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let v: Value = serde_json::from_str(&text).unwrap();
    assert_eq!(v["choices"][0]["finish_reason"], "tool_calls");
    assert!(v["choices"][0]["message"]["content"].is_null());
    let call = &v["choices"][0]["message"]["tool_calls"][0];
    assert_eq!(call["id"], "toolu_n1");
    assert_eq!(call["function"]["arguments"], "{\"x\":1}");
    assert_eq!(ctx.captured.last_body()["tool_choice"], json!({ "type": "auto" }));

    let (status, _) = chat(
        &ctx,
        json!({
            "model": "claude-3-haiku-20240307",
            "tools": tools,
            "messages": [
                { "role": "user", "content": "compute" },
                { "role": "assistant", "content": null, "tool_calls": [call.clone()] },
                { "role": "tool", "tool_call_id": "toolu_n1", "content": "1" }
            ]
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let sent = ctx.captured.last_body();
    let tool_use_id = sent["messages"][1]["content"][0]["id"].as_str().unwrap().to_string();
    assert!(tool_use_id.starts_with("toolu_"));
    assert_ne!(tool_use_id, "toolu_n1");
    assert_eq!(sent["messages"][2]["content"][0]["type"], "tool_result");
    assert_eq!(sent["messages"][2]["content"][0]["tool_use_id"], tool_use_id);
}

#[tokio::test]
async fn anthropic_stream_text() {
    let ctx = setup().await;
    let (status, text) = chat(
        &ctx,
        json!({ "model": "claude-3-haiku-20240307", "stream": true, "messages": [{ "role": "user", "content": "hi" }] }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let chunks = chunks(&text);
    let content: Vec<_> = chunks
        .iter()
        .filter_map(|c| c["choices"][0]["delta"]["content"].as_str())
        .collect();
    assert_eq!(content, vec!["Hi", " there"]);
    assert_eq!(chunks.len(), 4);
    assert_eq!(chunks[3]["choices"][0]["finish_reason"], "stop");
    assert_eq!(sse_data(&text).last().map(String::as_str), Some("[DONE]"));
}

#[tokio::test]
async fn anthropic_stream_tool_use() {
    let ctx = setup().await;
    let (_, text) = chat(
        &ctx,
        json!({
            "model": "claude-3-haiku-20240307",
            "stream": true,
            "tools": [{ "type": "function", "function": { "name": "calc" } }],
            "messages": [{ "role": "user", "content": "compute" }]
        }),
    )
    .await;
    let chunks = chunks(&text);
    assert_eq!(chunks.len(), 5);
    let start = &chunks[1]["choices"][0]["delta"]["tool_calls"][0];
    assert_eq!(start["index"], 0);
    assert_eq!(start["id"], "toolu_s1");
    assert_eq!(start["type"], "function");
    assert_eq!(start["function"]["name"], "calc");
    assert_eq!(
        chunks[2]["choices"][0]["delta"]["tool_calls"][0]["function"]["arguments"],
        "{\"x\":"
    );
    assert_eq!(
        chunks[3]["choices"][0]["delta"]["tool_calls"][0]["function"]["arguments"],
        "1}"
    );
    assert_eq!(chunks[4]["choices"][0]["delta"], json!({}));
    assert_eq!(chunks[4]["choices"][0]["finish_reason"], "tool_calls");
}

#[tokio::test]
async fn anthropic_stream_error_event_is_in_band() {
    let ctx = setup().await;
    let (status, text) = chat(
        &ctx,
        json!({ "model": "claude-3-haiku-20240307", "stream": true, "messages": [{ "role": "user", "content": "stream_error" }] }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let chunks = chunks(&text);
    assert_eq!(chunks[1]["choices"][0]["delta"]["content"], "par");
    assert_eq!(chunks[2]["choices"][0]["delta"]["content"], "Error: Overloaded");
    assert_eq!(chunks[3]["choices"][0]["finish_reason"], "stop");
    assert_eq!(sse_data(&text).last().map(String::as_str), Some("[DONE]"));
}

#[tokio::test]
async fn anthropic_rejection_streams_error_text() {
    let ctx = setup().await;
    let (status, text) = chat(
        &ctx,
        json!({ "model": "claude-3-haiku-20240307", "stream": true, "messages": [{ "role": "user", "content": "force_error_401" }] }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let data = sse_data(&text);
    assert_eq!(data.len(), 2);
    assert!(data[0].contains("Error: Anthropic upstream status 401"));

    let (status, text) = chat(
        &ctx,
        json!({ "model": "claude-3-haiku-20240307", "messages": [{ "role": "user", "content": "force_error_401" }] }),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let v: Value = serde_json::from_str(&text).unwrap();
    assert_eq!(v["error"]["type"], "authentication_error");
}

#[tokio::test]
async fn unknown_routes_get_envelope() {
    let ctx = setup().await;
    let resp = ctx
        .router
        .clone()
        .oneshot(Request::builder().uri("/v1/nope").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    let v: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(v["error"]["type"], "invalid_request");
}

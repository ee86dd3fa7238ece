use crate::config::RuntimeConfig;
use crate::error::{AppError, AppResult};
use crate::markers::ToolMarker;
use axum::Router;
use axum::http::HeaderName;
use axum::routing::{get, post};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::{Arc, Once, OnceLock};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    pub runtime: Arc<RuntimeConfig>,
    pub http: reqwest::Client,
    pub marker: Arc<ToolMarker>,
    pub metrics: PrometheusHandle,
}

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();
static METRICS_ERROR: OnceLock<AppError> = OnceLock::new();
static METRICS_INIT: Once = Once::new();

const REQUEST_ID_HEADER: &str = "x-request-id";

pub async fn load_state() -> AppResult<AppState> {
    load_state_with_runtime(RuntimeConfig::from_env()).await
}

pub async fn load_state_with_runtime(runtime: RuntimeConfig) -> AppResult<AppState> {
    let http = reqwest::Client::builder()
        .user_agent(concat!("chatgate/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|err| {
            AppError::new(
                axum::http::StatusCode::INTERNAL_SERVER_ERROR,
                "http_client_init_failed",
                err.to_string(),
            )
        })?;
    let metrics = init_metrics()?;
    let marker = ToolMarker::new(
        runtime.tool_marker_invoke.clone(),
        runtime.tool_marker_arguments.clone(),
    );
    tracing::info!(
        kimi = %runtime.kimi.base_url,
        anthropic = %runtime.anthropic.base_url,
        "backends configured"
    );
    Ok(AppState {
        runtime: Arc::new(runtime),
        http,
        marker: Arc::new(marker),
        metrics,
    })
}

fn init_metrics() -> AppResult<PrometheusHandle> {
    METRICS_INIT.call_once(|| {
        match metrics_exporter_prometheus::PrometheusBuilder::new().install_recorder() {
            Ok(handle) => {
                let _ = METRICS_HANDLE.set(handle);
            }
            Err(err) => {
                let _ = METRICS_ERROR.set(AppError::new(
                    axum::http::StatusCode::INTERNAL_SERVER_ERROR,
                    "metrics_init_failed",
                    err.to_string(),
                ));
            }
        }
    });

    if let Some(err) = METRICS_ERROR.get() {
        return Err(err.clone());
    }
    METRICS_HANDLE.get().cloned().ok_or_else(|| {
        AppError::new(
            axum::http::StatusCode::INTERNAL_SERVER_ERROR,
            "metrics_init_failed",
            "metrics recorder not available",
        )
    })
}

pub fn build_app(state: AppState) -> Router {
    let metrics_path = state.runtime.metrics_path.clone();
    let request_id = HeaderName::from_static(REQUEST_ID_HEADER);
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::mirror_request())
        .allow_methods(tower_http::cors::AllowMethods::mirror_request())
        .allow_headers(tower_http::cors::AllowHeaders::mirror_request())
        .allow_credentials(true)
        .expose_headers([request_id.clone()]);

    Router::<AppState>::new()
        .route("/ping", get(crate::handlers::ping))
        .route("/v1/models", get(crate::handlers::list_models))
        .route(
            "/v1/chat/completions",
            post(crate::handlers::create_chat_completions),
        )
        .route(&metrics_path, get(crate::handlers::metrics))
        .fallback(crate::handlers::not_found)
        .with_state(state)
        .layer(cors)
        .layer(PropagateRequestIdLayer::new(request_id.clone()))
        .layer(SetRequestIdLayer::new(request_id, MakeRequestUuid))
        .layer(TraceLayer::new_for_http())
}

pub mod config;
pub mod error;
pub mod metrics;
pub mod negotiate;
pub mod respbuf;
pub mod speech;
pub mod validation;

use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{Request, State},
    http::{header, HeaderValue, Method},
    middleware::Next,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    limit::RequestBodyLimitLayer,
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::{info, warn};
use tts_core::{CompletionBridge, SpeechEngine, VoiceRecord, VoiceRegistry};

use crate::config::ServerConfig;
use crate::metrics::{AppMetrics, MetricsResponse};
use crate::speech::speech_endpoint;

const JSON_MIME_TYPE: &str = "application/json; charset=utf-8";

#[derive(Clone)]
pub struct AppState {
    pub voices: Arc<VoiceRegistry>,
    /// `/voices` body, serialized once; the registry never changes.
    pub voices_json: Bytes,
    pub engine: Arc<dyn SpeechEngine>,
    pub bridge: CompletionBridge,
    pub config: ServerConfig,
    pub metrics: AppMetrics,
    pub last_modified: HeaderValue,
    start_instant: Instant,
}

#[derive(Serialize)]
struct VoiceList<'a> {
    voices: Vec<&'a VoiceRecord>,
}

impl AppState {
    pub fn new(voices: VoiceRegistry, engine: Arc<dyn SpeechEngine>, config: ServerConfig) -> anyhow::Result<Self> {
        let voices_json = serde_json::to_vec(&VoiceList {
            voices: voices.iter().collect(),
        })?;
        let last_modified = HeaderValue::from_str(&http_date(Utc::now()))?;

        Ok(Self {
            voices: Arc::new(voices),
            voices_json: Bytes::from(voices_json),
            engine,
            bridge: CompletionBridge::new(config.synthesis_timeout()),
            config,
            metrics: AppMetrics::new(),
            last_modified,
            start_instant: Instant::now(),
        })
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_instant.elapsed().as_secs()
    }
}

/// IMF-fixdate, as used by `Last-Modified`.
pub fn http_date(t: DateTime<Utc>) -> String {
    t.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

/// Routes at the root and under `/api`, with request ids, tracing, the
/// body limit, the outer timeout and CORS. Rate limiting is added by the
/// binary.
pub fn router(state: AppState) -> Router {
    let config = &state.config;
    let middleware_stack = ServiceBuilder::new()
        .layer(TraceLayer::new_for_http())
        .layer(RequestBodyLimitLayer::new(config.max_body_bytes))
        .layer(TimeoutLayer::new(config.request_timeout()))
        .layer(cors_layer(config))
        .into_inner();

    let api = Router::new()
        .route("/health", get(health_check))
        .route("/healthz", get(health_check))
        .route("/voices", get(list_voices))
        .route("/speech", get(speech_endpoint).post(speech_endpoint))
        .route("/metrics", get(metrics_endpoint));

    Router::new()
        .merge(api.clone()) // root paths
        .nest("/api", api) // /api prefix
        .layer(axum::middleware::from_fn(add_request_id))
        .layer(middleware_stack)
        .with_state(state)
}

/// Permissive unless `CORS_ALLOWED_ORIGINS` names origins.
pub fn cors_layer(config: &ServerConfig) -> CorsLayer {
    let base = CorsLayer::new()
        .allow_methods([Method::GET, Method::HEAD, Method::POST, Method::OPTIONS])
        .allow_headers(Any)
        .expose_headers([header::ETAG, header::CONTENT_DISPOSITION, header::CONTENT_RANGE])
        .allow_credentials(false);

    let origins: Vec<HeaderValue> = config
        .cors_allowed_origins
        .iter()
        .flatten()
        .filter_map(|origin| origin.parse::<HeaderValue>().ok())
        .collect();

    match &config.cors_allowed_origins {
        Some(_) if !origins.is_empty() => {
            info!("CORS configured for {} origin(s)", origins.len());
            base.allow_origin(AllowOrigin::list(origins))
        }
        Some(_) => {
            warn!("CORS_ALLOWED_ORIGINS is empty, falling back to permissive CORS");
            base.allow_origin(Any)
        }
        None => {
            warn!("CORS_ALLOWED_ORIGINS not set, allowing all origins (development mode)");
            base.allow_origin(Any)
        }
    }
}

// Request ID middleware for tracing
async fn add_request_id(mut request: Request, next: Next) -> Response {
    let request_id = uuid::Uuid::new_v4().to_string();
    let value = HeaderValue::from_str(&request_id).ok();
    if let Some(v) = value.clone() {
        request.headers_mut().insert("x-request-id", v);
    }
    let mut response = next.run(request).await;
    if let Some(v) = value {
        response.headers_mut().insert("x-request-id", v);
    }
    response
}

pub async fn health_check() -> &'static str {
    "ok"
}

pub async fn list_voices(State(state): State<AppState>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, HeaderValue::from_static(JSON_MIME_TYPE))],
        state.voices_json.clone(),
    )
}

pub async fn metrics_endpoint(State(state): State<AppState>) -> Json<MetricsResponse> {
    Json(MetricsResponse {
        timestamp: Utc::now(),
        system: metrics::system_metrics(state.uptime_seconds()),
        endpoint: state.metrics.endpoint.stats(),
        speech: state.metrics.speech.stats(),
    })
}

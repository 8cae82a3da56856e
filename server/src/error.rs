use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use tts_core::{EncoderError, EngineError, ResolveError, SynthesisError};

/// API Error types
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("{0}")]
    SynthesisTimeout(String),

    #[error("TTS error: {0}")]
    TtsError(#[from] anyhow::Error),

    #[error("Internal server error: {0}")]
    InternalError(String),

    #[error("Range not satisfiable")]
    RangeNotSatisfiable { len: u64 },

    #[error("Payload too large: {0}")]
    PayloadTooLarge(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::SynthesisTimeout(_) | ApiError::TtsError(_) | ApiError::InternalError(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            ApiError::RangeNotSatisfiable { .. } => StatusCode::RANGE_NOT_SATISFIABLE,
            ApiError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
        }
    }
}

impl From<ResolveError> for ApiError {
    fn from(e: ResolveError) -> Self {
        ApiError::NotFound(e.to_string())
    }
}

impl From<SynthesisError> for ApiError {
    fn from(e: SynthesisError) -> Self {
        match e {
            SynthesisError::Timeout(_) => ApiError::SynthesisTimeout(e.to_string()),
            SynthesisError::Engine(e) => ApiError::TtsError(e.into()),
        }
    }
}

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        ApiError::TtsError(e.into())
    }
}

impl From<EncoderError> for ApiError {
    fn from(e: EncoderError) -> Self {
        ApiError::TtsError(e.into())
    }
}

/// Error response structure
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    code: u16,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        // Server-side detail is logged, never echoed; timeouts keep their reason.
        let error_message = match self {
            ApiError::InvalidInput(msg) | ApiError::NotFound(msg) | ApiError::PayloadTooLarge(msg) => msg,
            ApiError::SynthesisTimeout(reason) => {
                tracing::error!("Synthesis timeout: {}", reason);
                reason
            }
            ApiError::TtsError(e) => {
                tracing::error!("TTS error: {:#}", e);
                canonical_reason(status)
            }
            ApiError::InternalError(msg) => {
                tracing::error!("Internal error: {}", msg);
                canonical_reason(status)
            }
            ApiError::RangeNotSatisfiable { len } => {
                let body = Json(ErrorResponse {
                    error: canonical_reason(status),
                    code: status.as_u16(),
                });
                let mut response = (status, body).into_response();
                if let Ok(v) = HeaderValue::from_str(&format!("bytes */{len}")) {
                    response.headers_mut().insert(header::CONTENT_RANGE, v);
                }
                return response;
            }
        };

        let body = Json(ErrorResponse {
            error: error_message,
            code: status.as_u16(),
        });

        (status, body).into_response()
    }
}

fn canonical_reason(status: StatusCode) -> String {
    status.canonical_reason().unwrap_or("Error").to_string()
}

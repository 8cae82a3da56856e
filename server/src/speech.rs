//! The `/speech` pipeline.
//!
//! One request moves through validation, voice resolution, the conditional
//! check, synthesis, the bounded wait for completion and finalization. The
//! current stage is recorded on the `speech` span so failures name where they
//! happened. Nothing is written and the engine is never touched when the
//! client's validator already matches.

use std::panic::AssertUnwindSafe;
use std::time::Instant;

use axum::{
    extract::{FromRequest, Query, Request, State},
    http::{header, HeaderMap, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    Form,
};
use futures_util::FutureExt;
use tracing::{field, Instrument, Span};
use tts_core::{cache_key, AudioEncoder, OutputSpec, RandomAccessBuffer};

use crate::error::ApiError;
use crate::negotiate::negotiate;
use crate::respbuf::ResponseBuffer;
use crate::validation::{validate_speech_request, SpeechParams};
use crate::AppState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    ValidatingInput,
    ResolvingVoice,
    CheckingCache,
    Synthesizing,
    AwaitingCompletion,
    Finalizing,
}

impl Stage {
    fn as_str(self) -> &'static str {
        match self {
            Stage::ValidatingInput => "validating_input",
            Stage::ResolvingVoice => "resolving_voice",
            Stage::CheckingCache => "checking_cache",
            Stage::Synthesizing => "synthesizing",
            Stage::AwaitingCompletion => "awaiting_completion",
            Stage::Finalizing => "finalizing",
        }
    }

    fn enter(self) {
        Span::current().record("stage", self.as_str());
    }
}

/// GET, HEAD and POST `/speech`.
///
/// Panics anywhere in the pipeline are caught here and answered with a 500.
pub async fn speech_endpoint(State(state): State<AppState>, request: Request) -> Response {
    let started = Instant::now();
    let span = tracing::info_span!("speech", method = %request.method(), stage = field::Empty);

    let outcome = AssertUnwindSafe(run_pipeline(&state, request))
        .catch_unwind()
        .instrument(span.clone())
        .await;

    let response = span.in_scope(|| {
        let result = outcome.unwrap_or_else(|panic| {
            let reason = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            Err(ApiError::InternalError(format!("panic while handling request: {reason}")))
        });

        let speech = &state.metrics.speech;
        match result {
            Ok(response) => response,
            Err(e) => {
                match &e {
                    ApiError::SynthesisTimeout(_) => speech.record_failure(true),
                    e if e.status().is_server_error() => speech.record_failure(false),
                    _ => speech.record_client_error(),
                }
                if e.status().is_server_error() {
                    state.metrics.endpoint.record_error();
                }
                e.into_response()
            }
        }
    });

    state
        .metrics
        .endpoint
        .record_request(started.elapsed().as_millis() as u64);
    response
}

async fn run_pipeline(state: &AppState, request: Request) -> Result<Response, ApiError> {
    Stage::ValidatingInput.enter();
    let method = request.method().clone();
    let headers = request.headers().clone();
    let params = read_params(request).await?;
    let params = validate_speech_request(params)?;
    let (format, mime) = params
        .media_type
        .unwrap_or_else(|| negotiate(header_str(&headers, header::ACCEPT)));

    Stage::ResolvingVoice.enter();
    let voice = state.voices.resolve(&params.voice, &state.config.default_voice)?;
    tracing::debug!(voice = %voice.name, %mime, sample_rate = params.sample_rate, "Resolved voice");

    Stage::CheckingCache.enter();
    let fingerprint = cache_key::compute(params.sample_rate, &voice.id, mime, &params.text);
    let etag = HeaderValue::from_str(&fingerprint.etag()).map_err(|e| ApiError::InternalError(e.to_string()))?;
    if cache_key::is_not_modified(header_str(&headers, header::IF_NONE_MATCH), &fingerprint) {
        state.metrics.speech.record_not_modified();
        let mut out = ResponseBuffer::new();
        out.set_status(StatusCode::NOT_MODIFIED);
        out.headers_mut().insert(header::ETAG, etag);
        out.headers_mut()
            .insert(header::LAST_MODIFIED, state.last_modified.clone());
        return Ok(out.into_response(false));
    }

    Stage::Synthesizing.enter();
    let encoder = AudioEncoder::open(format, RandomAccessBuffer::new(), OutputSpec::mono16(params.sample_rate))?;
    let channel = state.engine.open_channel(voice)?;

    Stage::AwaitingCompletion.enter();
    let document = state.bridge.synthesize(channel, &params.text, encoder).await?;
    state.metrics.speech.record_synthesis(document.len());

    Stage::Finalizing.enter();
    let mut out = ResponseBuffer::new();
    out.set_body(document);
    let pending = out.headers_mut();
    pending.insert(header::CONTENT_TYPE, HeaderValue::from_static(mime));
    pending.insert(header::ETAG, etag);
    pending.insert(header::VARY, HeaderValue::from_static("Accept"));
    if method == Method::POST {
        if let Some(name) = params.attachment.as_deref() {
            pending.insert(header::CONTENT_DISPOSITION, content_disposition(name)?);
        }
    }
    pending.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
    if !pending.contains_key(header::LAST_MODIFIED) {
        pending.insert(header::LAST_MODIFIED, state.last_modified.clone());
    }

    if method == Method::GET {
        out.apply_range(
            header_str(&headers, header::RANGE),
            header_str(&headers, header::IF_RANGE),
        )?;
    }
    Ok(out.into_response(method != Method::HEAD))
}

/// Query parameters, overlaid with a urlencoded form body on POST.
async fn read_params(request: Request) -> Result<SpeechParams, ApiError> {
    let Query(query) = Query::<SpeechParams>::try_from_uri(request.uri())
        .map_err(|e| ApiError::InvalidInput(e.body_text()))?;
    if request.method() != Method::POST {
        return Ok(query);
    }

    let is_form = request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with("application/x-www-form-urlencoded"));
    if !is_form {
        return Ok(query);
    }

    let Form(form) = Form::<SpeechParams>::from_request(request, &())
        .await
        .map_err(|rejection| {
            if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
                ApiError::PayloadTooLarge(rejection.body_text())
            } else {
                ApiError::InvalidInput(rejection.body_text())
            }
        })?;
    Ok(query.merge(form))
}

fn header_str(headers: &HeaderMap, name: header::HeaderName) -> Option<&str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// `attachment` disposition with a quoted ASCII filename, plus an RFC 5987
/// `filename*` when the name is not plain ASCII.
fn content_disposition(name: &str) -> Result<HeaderValue, ApiError> {
    let name = name.rsplit(['/', '\\']).next().unwrap_or(name).trim();

    let mut ascii = String::with_capacity(name.len());
    for c in name.chars() {
        match c {
            '"' | '\\' => {
                ascii.push('\\');
                ascii.push(c);
            }
            c if c.is_ascii() && !c.is_ascii_control() => ascii.push(c),
            _ => ascii.push('_'),
        }
    }

    let mut value = format!("attachment; filename=\"{ascii}\"");
    if !name.chars().all(|c| c.is_ascii() && !c.is_ascii_control()) {
        value.push_str("; filename*=UTF-8''");
        for b in name.bytes() {
            if b.is_ascii_alphanumeric() || b"!#$&+-.^_`|~".contains(&b) {
                value.push(b as char);
            } else {
                value.push_str(&format!("%{b:02X}"));
            }
        }
    }
    HeaderValue::from_str(&value).map_err(|e| ApiError::InvalidInput(format!("bad attachment name: {e}")))
}

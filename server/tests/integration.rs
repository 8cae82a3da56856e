//! Integration tests for the HTTP surface

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;

use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
};
use server::config::ServerConfig;

use common::*;

fn error_message(body: &[u8]) -> String {
    let json: serde_json::Value = serde_json::from_slice(body).unwrap();
    json["error"].as_str().unwrap_or_default().to_string()
}

#[tokio::test]
async fn test_health_check() {
    let app = create_test_app();
    for uri in ["/health", "/healthz", "/api/health"] {
        let (response, body) = get(app.clone(), uri).await;
        assert_eq!(response.status(), StatusCode::OK, "{uri}");
        assert_eq!(body, "ok");
    }
}

#[tokio::test]
async fn test_responses_carry_request_id() {
    let (response, _) = get(create_test_app(), "/health").await;
    let id = response.headers()["x-request-id"].to_str().unwrap();
    assert_eq!(id.len(), 36);
}

#[tokio::test]
async fn test_list_voices() {
    let (response, body) = get(create_test_app(), "/voices").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers()[header::CONTENT_TYPE]
        .to_str()
        .unwrap()
        .starts_with("application/json"));

    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    let voices = json["voices"].as_array().unwrap();
    let names: Vec<&str> = voices.iter().map(|v| v["name"].as_str().unwrap()).collect();
    assert_eq!(names, ["Hysterical", "Fred", "Amelie"]);
    assert_eq!(voices[0]["gender"], "female");

    let (_, again) = get(create_test_app(), "/api/voices").await;
    assert_eq!(body, again);
}

#[tokio::test]
async fn test_missing_text_is_bad_request() {
    let (response, body) = get(create_test_app(), "/speech?voice=Fred").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(error_message(&body), "missing `text` parameter");
}

#[tokio::test]
async fn test_invalid_parameters_are_bad_requests() {
    let app = create_test_app();
    for uri in [
        "/speech?text=Hi&gender=robot",
        "/speech?text=Hi&type=audio/ogg",
        "/speech?text=Hi&lang=en%20US",
    ] {
        let (response, _) = get(app.clone(), uri).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{uri}");
    }
}

#[tokio::test]
async fn test_unknown_voice_is_not_found() {
    let app = create_test_app();
    let (response, body) = get(app.clone(), "/speech?text=Hi&voice=DoesNotExist").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert!(error_message(&body).contains("DoesNotExist"));

    // No male French voice; locales are matched exactly.
    let (response, _) = get(app.clone(), "/speech?text=Hi&gender=male&lang=fr_FR").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let (response, _) = get(app, "/speech?text=Hi&lang=en_GB").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_missing_default_voice_is_not_found() {
    let config = ServerConfig {
        default_voice: "Victoria".into(),
        ..ServerConfig::default()
    };
    let app = create_app_with(Arc::new(tts_core::ToneEngine::new()), config);
    let (response, _) = get(app, "/speech?text=Hi").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_engine_failure_is_not_echoed() {
    let app = create_app_with(Arc::new(BrokenEngine), ServerConfig::default());
    let (response, body) = get(app, "/speech?text=Hi").await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let message = error_message(&body);
    assert_eq!(message, "Internal Server Error");
    assert!(!message.contains("/dev/speech"));
}

#[tokio::test]
async fn test_unencodable_container_is_bad_request() {
    let (response, body) = get(create_test_app(), "/speech?text=Hi&type=mp4").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(error_message(&body).contains("AAC/MP4"));
}

#[tokio::test]
async fn test_panic_is_contained() {
    let app = create_app_with(Arc::new(PanickingEngine), ServerConfig::default());
    let (response, body) = get(app.clone(), "/speech?text=Hi").await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(error_message(&body), "Internal Server Error");

    let (response, _) = get(app, "/health").await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test(start_paused = true)]
async fn test_synthesis_timeout() {
    let engine = StalledEngine::default();
    let events = engine.events.clone();
    let app = create_app_with(Arc::new(engine), ServerConfig::default());

    let started = tokio::time::Instant::now();
    let (response, body) = get(app.clone(), "/speech?text=Hi").await;
    let elapsed = started.elapsed();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(error_message(&body), "synthesis did not complete within 60s");
    assert!(elapsed >= std::time::Duration::from_secs(60), "{elapsed:?}");
    assert!(elapsed < std::time::Duration::from_secs(61), "{elapsed:?}");
    assert_eq!(events.opened.load(Ordering::SeqCst), 1);
    assert_eq!(events.stops.load(Ordering::SeqCst), 1);
    assert_eq!(events.drops.load(Ordering::SeqCst), 1);

    let (_, body) = get(app, "/metrics").await;
    let metrics: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(metrics["speech"]["timeouts"], 1);
    assert_eq!(metrics["speech"]["failures"], 1);
}

#[tokio::test]
async fn test_head_has_headers_but_no_body() {
    let app = create_test_app();
    let (get_response, get_body) = get(app.clone(), "/speech?text=Hi").await;
    let (response, body) = send(
        app,
        Request::builder()
            .method(Method::HEAD)
            .uri("/speech?text=Hi")
            .body(Body::empty())
            .unwrap(),
    )
    .await;

    assert_eq!(response.status(), StatusCode::OK);
    assert!(body.is_empty());
    assert_eq!(
        response.headers()[header::CONTENT_LENGTH],
        get_body.len().to_string().as_str()
    );
    assert_eq!(response.headers()[header::ETAG], get_response.headers()[header::ETAG]);
}

#[tokio::test]
async fn test_post_form_with_attachment() {
    let (response, body) = send(
        create_test_app(),
        Request::builder()
            .method(Method::POST)
            .uri("/speech?text=from%20query&samplerate=8000")
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from("text=from+form&attachment=greeting.wav"))
            .unwrap(),
    )
    .await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_DISPOSITION],
        "attachment; filename=\"greeting.wav\""
    );
    let reader = hound::WavReader::new(std::io::Cursor::new(body.to_vec())).unwrap();
    assert_eq!(reader.spec().sample_rate, 8000);
}

#[tokio::test]
async fn test_attachment_ignored_on_get() {
    let (response, _) = get(create_test_app(), "/speech?text=Hi&attachment=greeting.wav").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().get(header::CONTENT_DISPOSITION).is_none());
}

#[tokio::test]
async fn test_byte_ranges() {
    let app = create_test_app();
    let (full, full_body) = get(app.clone(), "/speech?text=Hi&samplerate=8000").await;
    let etag = full.headers()[header::ETAG].to_str().unwrap().to_string();
    let len = full_body.len();

    let (response, body) = send(
        app.clone(),
        Request::builder()
            .uri("/speech?text=Hi&samplerate=8000")
            .header(header::RANGE, "bytes=0-43")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(
        response.headers()[header::CONTENT_RANGE],
        format!("bytes 0-43/{len}").as_str()
    );
    assert_eq!(&body[..], &full_body[..44]);
    assert_eq!(&body[..4], b"RIFF");

    // Stale If-Range: full document.
    let (response, body) = send(
        app.clone(),
        Request::builder()
            .uri("/speech?text=Hi&samplerate=8000")
            .header(header::RANGE, "bytes=0-43")
            .header(header::IF_RANGE, "\"stale\"")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body.len(), len);

    let (response, body) = send(
        app.clone(),
        Request::builder()
            .uri("/speech?text=Hi&samplerate=8000")
            .header(header::RANGE, "bytes=-10")
            .header(header::IF_RANGE, etag.as_str())
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(&body[..], &full_body[len - 10..]);

    let (response, _) = send(
        app,
        Request::builder()
            .uri("/speech?text=Hi&samplerate=8000")
            .header(header::RANGE, format!("bytes={}-", len + 100))
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::RANGE_NOT_SATISFIABLE);
    assert_eq!(
        response.headers()[header::CONTENT_RANGE],
        format!("bytes */{len}").as_str()
    );
}

#[tokio::test]
async fn test_oversized_form_is_rejected() {
    let body = format!("text={}", "a".repeat(200_000));
    let (response, _) = send(
        create_test_app(),
        Request::builder()
            .method(Method::POST)
            .uri("/speech")
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .header(header::CONTENT_LENGTH, body.len())
            .body(Body::from(body))
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
}

#[tokio::test]
async fn test_metrics_count_outcomes() {
    let app = create_test_app();
    let (first, _) = get(app.clone(), "/speech?text=count+me").await;
    let etag = first.headers()[header::ETAG].clone();
    send(
        app.clone(),
        Request::builder()
            .uri("/speech?text=count+me")
            .header(header::IF_NONE_MATCH, etag)
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    get(app.clone(), "/speech").await;

    let (response, body) = get(app, "/api/metrics").await;
    assert_eq!(response.status(), StatusCode::OK);
    let metrics: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(metrics["speech"]["synthesized"], 1);
    assert_eq!(metrics["speech"]["not_modified"], 1);
    assert_eq!(metrics["speech"]["client_errors"], 1);
    assert_eq!(metrics["endpoint"]["request_count"], 3);
}

//! End-to-end tests of the speech pipeline
//! Run with: cargo test --test e2e

mod common;

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
};
use tts_core::format::WAVE_MIME_TYPES;

use common::*;

async fn etag_for(uri: &str) -> String {
    let (response, _) = get(create_test_app(), uri).await;
    assert_eq!(response.status(), StatusCode::OK, "{uri}");
    response.headers()[header::ETAG].to_str().unwrap().to_string()
}

#[tokio::test]
async fn test_hello_then_not_modified() {
    let app = create_test_app();
    let (response, body) = get(app.clone(), "/speech?text=Hello&samplerate=16000").await;

    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response.headers()[header::CONTENT_TYPE].to_str().unwrap();
    assert!(WAVE_MIME_TYPES.contains(&content_type), "{content_type}");
    assert_eq!(response.headers()[header::ACCEPT_RANGES], "bytes");
    assert!(response.headers().contains_key(header::LAST_MODIFIED));
    assert!(!body.is_empty());

    let reader = hound::WavReader::new(std::io::Cursor::new(body.to_vec())).unwrap();
    assert_eq!(reader.spec().sample_rate, 16000);
    assert_eq!(reader.spec().channels, 1);
    assert_eq!(reader.spec().bits_per_sample, 16);
    assert!(reader.len() > 0);

    let etag = response.headers()[header::ETAG].clone();
    assert_eq!(etag.len(), 34);

    let (response, body) = send(
        app,
        Request::builder()
            .uri("/speech?text=Hello&samplerate=16000")
            .header(header::IF_NONE_MATCH, etag.clone())
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::NOT_MODIFIED);
    assert_eq!(response.headers()[header::ETAG], etag);
    assert!(body.is_empty());
}

#[tokio::test]
async fn test_wildcard_validator_skips_synthesis() {
    // The broken engine would fail the request if it were reached.
    let app = create_app_with(std::sync::Arc::new(BrokenEngine), Default::default());
    let (response, body) = send(
        app,
        Request::builder()
            .uri("/speech?text=Hello")
            .header(header::IF_NONE_MATCH, "*")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::NOT_MODIFIED);
    assert!(body.is_empty());
}

#[tokio::test]
async fn test_voice_resolution_priority() {
    let hysterical = etag_for("/speech?text=Hi&voice=Hysterical").await;
    let fred = etag_for("/speech?text=Hi&voice=Fred").await;
    assert_ne!(hysterical, fred);

    // An explicit name wins over gender.
    assert_eq!(etag_for("/speech?text=Hi&voice=Hysterical&gender=male").await, hysterical);
    // Gender alone matches the first female en_US voice.
    assert_eq!(etag_for("/speech?text=Hi&gender=female").await, hysterical);
    // Nothing given: the default voice.
    assert_eq!(etag_for("/speech?text=Hi").await, fred);
}

#[tokio::test]
async fn test_validator_depends_on_every_input() {
    let base = etag_for("/speech?text=Hi").await;
    assert_ne!(etag_for("/speech?text=Ho").await, base);
    assert_ne!(etag_for("/speech?text=Hi&samplerate=8000").await, base);
    assert_ne!(etag_for("/speech?text=Hi&type=audio/x-wav").await, base);
    // Same snapped rate, same document.
    assert_eq!(
        etag_for("/speech?text=Hi&samplerate=16001").await,
        etag_for("/speech?text=Hi&samplerate=16000").await
    );
}

#[tokio::test]
async fn test_mime_and_text_do_not_run_together() {
    assert_ne!(
        etag_for("/speech?text=Hello&type=audio/wave").await,
        etag_for("/speech?text=eHello&type=audio/wav").await
    );
}

#[tokio::test]
async fn test_accept_negotiation() {
    let (response, _) = send(
        create_test_app(),
        Request::builder()
            .uri("/speech?text=Hi")
            .header(header::ACCEPT, "text/html, audio/x-wav;q=0.9, audio/*;q=0.5")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "audio/x-wav");

    // Explicit type overrides Accept.
    let (response, _) = send(
        create_test_app(),
        Request::builder()
            .uri("/speech?text=Hi&type=wav")
            .header(header::ACCEPT, "audio/vnd.wav")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(response.headers()[header::CONTENT_TYPE], "audio/wave");
}

#[tokio::test]
async fn test_preferred_mp4_falls_through_to_wave() {
    let (response, body) = send(
        create_test_app(),
        Request::builder()
            .uri("/speech?text=Hi")
            .header(header::ACCEPT, "audio/mp4, audio/wav;q=0.9")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "audio/wav");
    assert!(hound::WavReader::new(std::io::Cursor::new(body.to_vec())).is_ok());
}

#[tokio::test]
async fn test_default_sample_rate() {
    let (_, body) = get(create_test_app(), "/api/speech?text=Hi").await;
    let reader = hound::WavReader::new(std::io::Cursor::new(body.to_vec())).unwrap();
    assert_eq!(reader.spec().sample_rate, 22050);
}

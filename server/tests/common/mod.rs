//! Common utilities for integration tests

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use axum::{
    body::{to_bytes, Body, Bytes},
    http::{Request, Response},
    Router,
};
use tower::ServiceExt;

use server::config::ServerConfig;
use server::{router, AppState};
use tts_core::{
    AudioEncoder, Completion, EngineError, Gender, SpeechChannel, SpeechEngine, ToneEngine, VoiceRecord,
    VoiceRegistry,
};

/// Hysterical (female) and Fred (male, the default) in en_US, plus a French voice.
pub fn test_registry() -> VoiceRegistry {
    VoiceRegistry::new([
        VoiceRecord::new("en_US/hysterical", "Hysterical", Gender::Female, Some("en_US")).with_age(30),
        VoiceRecord::new("en_US/fred", "Fred", Gender::Male, Some("en_US")).with_age(30),
        VoiceRecord::new("fr_FR/amelie", "Amelie", Gender::Female, Some("fr_FR")).with_age(25),
    ])
}

/// Create a test app instance backed by the tone engine
pub fn create_test_app() -> Router {
    create_app_with(Arc::new(ToneEngine::new()), ServerConfig::default())
}

pub fn create_app_with(engine: Arc<dyn SpeechEngine>, config: ServerConfig) -> Router {
    let state = AppState::new(test_registry(), engine, config).expect("Failed to build app state");
    router(state)
}

pub async fn send(app: Router, request: Request<Body>) -> (Response<Body>, Bytes) {
    let response = app.oneshot(request).await.unwrap();
    let (parts, body) = response.into_parts();
    let bytes = to_bytes(body, usize::MAX).await.unwrap();
    (Response::from_parts(parts, Body::empty()), bytes)
}

pub async fn get(app: Router, uri: &str) -> (Response<Body>, Bytes) {
    send(app, Request::builder().uri(uri).body(Body::empty()).unwrap()).await
}

/// Counts what happened to the channels a [`StalledEngine`] handed out.
#[derive(Default)]
pub struct ChannelEvents {
    pub opened: AtomicUsize,
    pub stops: AtomicUsize,
    pub drops: AtomicUsize,
}

/// Engine whose channels accept work and never finish it.
#[derive(Default, Clone)]
pub struct StalledEngine {
    pub events: Arc<ChannelEvents>,
}

struct StalledChannel {
    events: Arc<ChannelEvents>,
    pending: Option<Completion>,
}

impl SpeechEngine for StalledEngine {
    fn name(&self) -> &'static str {
        "stalled"
    }

    fn open_channel(&self, _voice: &VoiceRecord) -> Result<Box<dyn SpeechChannel>, EngineError> {
        self.events.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(StalledChannel {
            events: self.events.clone(),
            pending: None,
        }))
    }
}

impl SpeechChannel for StalledChannel {
    fn speak(&mut self, _text: &str, _encoder: AudioEncoder, done: Completion) -> Result<(), EngineError> {
        self.pending = Some(done);
        Ok(())
    }

    fn stop(&mut self) -> Result<(), EngineError> {
        self.events.stops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

impl Drop for StalledChannel {
    fn drop(&mut self) {
        self.events.drops.fetch_add(1, Ordering::SeqCst);
    }
}

/// Engine that fails to open a channel.
pub struct BrokenEngine;

impl SpeechEngine for BrokenEngine {
    fn name(&self) -> &'static str {
        "broken"
    }

    fn open_channel(&self, _voice: &VoiceRecord) -> Result<Box<dyn SpeechChannel>, EngineError> {
        Err(EngineError::Channel("device /dev/speech unavailable".into()))
    }
}

/// Engine that panics while opening a channel.
pub struct PanickingEngine;

impl SpeechEngine for PanickingEngine {
    fn name(&self) -> &'static str {
        "panicking"
    }

    fn open_channel(&self, _voice: &VoiceRecord) -> Result<Box<dyn SpeechChannel>, EngineError> {
        panic!("engine exploded");
    }
}

use std::{net::SocketAddr, sync::Arc};

use tokio::net::TcpListener;
use tower_governor::{governor::GovernorConfigBuilder, key_extractor::GlobalKeyExtractor, GovernorLayer};
use tracing::{info, warn};

use server::config::ServerConfig;
use server::{router, AppState};
use tts_core::{SpeechEngine, ToneEngine, VoiceRegistry};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let _ = dotenv::dotenv();

    async_main().await
}

async fn async_main() -> anyhow::Result<()> {
    info!("Starting speech server...");

    // Load configuration from environment
    let config = ServerConfig::from_env();

    info!("Loading voices from {}...", config.voice_map_path);
    let voices = VoiceRegistry::from_mapfile(&config.voice_map_path).unwrap_or_else(|e| {
        warn!("Could not load {}: {e:#}, using empty voice list.", config.voice_map_path);
        VoiceRegistry::default()
    });
    info!("Loaded {} voices", voices.len());
    if voices.find_by_name(&config.default_voice).is_none() {
        warn!(
            "Default voice '{}' is not installed; requests without a voice will fail",
            config.default_voice
        );
    }

    let engine = select_engine(&config.engine, &voices)?;
    info!("Using '{}' speech engine", engine.name());

    let state = AppState::new(voices, engine, config.clone())?;
    info!(
        "Server configuration loaded: port={}, rate_limit={}/min, synthesis_timeout={}s, request_timeout={}s",
        config.port, config.rate_limit_per_minute, config.synthesis_timeout_secs, config.request_timeout_secs
    );

    // Global limit: all clients share one bucket, which behaves predictably behind proxies.
    let governor_conf = Arc::new(
        GovernorConfigBuilder::default()
            .per_millisecond((60_000 / config.rate_limit_per_minute as u64).max(1))
            .burst_size(config.rate_limit_per_minute)
            .key_extractor(GlobalKeyExtractor)
            .finish()
            .ok_or_else(|| anyhow::anyhow!("invalid rate limit configuration"))?,
    );
    info!("Rate limiting: {} requests per minute", config.rate_limit_per_minute);

    let app = router(state).layer(GovernorLayer::new(governor_conf));

    let addr: SocketAddr = format!("{}:{}", config.bind_addr, config.port).parse()?;

    let listener = TcpListener::bind(addr).await.map_err(|e| {
        anyhow::anyhow!("Failed to bind {addr}: {e}. Try a different PORT.")
    })?;

    info!("Server listening on http://{addr}");
    axum::serve(listener, app).await?;
    Ok(())
}

fn select_engine(name: &str, voices: &VoiceRegistry) -> anyhow::Result<Arc<dyn SpeechEngine>> {
    match name {
        "tone" => Ok(Arc::new(ToneEngine::new())),
        #[cfg(feature = "piper")]
        "piper" => {
            let engine = tts_core::PiperEngine::new();
            if let Err(e) = engine.preload(voices.iter()) {
                warn!("Could not preload Piper models: {e:#}");
            }
            Ok(Arc::new(engine))
        }
        #[cfg(not(feature = "piper"))]
        "piper" => {
            let _ = voices;
            anyhow::bail!("TTS_ENGINE=piper requires the server to be built with the `piper` feature")
        }
        other => anyhow::bail!("unknown TTS_ENGINE '{other}' (expected `tone` or `piper`)"),
    }
}

// Configuration constants for the server

use std::time::Duration;

use tts_core::voices::FALLBACK_VOICE;

const REQUEST_TIMEOUT_MARGIN_SECS: u64 = 30;

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_addr: String,
    pub port: u16,
    pub rate_limit_per_minute: u32,
    pub request_timeout_secs: u64,
    pub synthesis_timeout_secs: u64,
    pub max_body_bytes: usize,
    pub cors_allowed_origins: Option<Vec<String>>,
    pub voice_map_path: String,
    pub default_voice: String,
    pub engine: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0".into(),
            port: 8080,
            rate_limit_per_minute: 120,
            request_timeout_secs: 90,
            synthesis_timeout_secs: 60,
            max_body_bytes: 131_072,
            cors_allowed_origins: None,
            voice_map_path: "models/map.json".into(),
            default_voice: FALLBACK_VOICE.into(),
            engine: "tone".into(),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl ServerConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let cors_allowed_origins = std::env::var("CORS_ALLOWED_ORIGINS").ok().map(|origins| {
            origins
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        });

        let config = Self {
            bind_addr: env_string("BIND_ADDR").unwrap_or(defaults.bind_addr),
            port: env_parse("PORT").unwrap_or(defaults.port),
            rate_limit_per_minute: env_parse("RATE_LIMIT_PER_MINUTE")
                .filter(|n: &u32| *n > 0)
                .unwrap_or(defaults.rate_limit_per_minute),
            request_timeout_secs: env_parse("REQUEST_TIMEOUT_SECS").unwrap_or(defaults.request_timeout_secs),
            synthesis_timeout_secs: env_parse("SYNTHESIS_TIMEOUT_SECS").unwrap_or(defaults.synthesis_timeout_secs),
            max_body_bytes: env_parse("MAX_BODY_BYTES").unwrap_or(defaults.max_body_bytes),
            cors_allowed_origins,
            voice_map_path: env_string("VOICE_MAP_PATH").unwrap_or(defaults.voice_map_path),
            default_voice: env_string("DEFAULT_VOICE").unwrap_or(defaults.default_voice),
            engine: env_string("TTS_ENGINE").unwrap_or(defaults.engine),
        };
        config.with_consistent_timeouts()
    }

    /// Raise the outer request timeout so it outlasts the synthesis wait.
    pub fn with_consistent_timeouts(mut self) -> Self {
        if self.request_timeout_secs <= self.synthesis_timeout_secs {
            let raised = self.synthesis_timeout_secs + REQUEST_TIMEOUT_MARGIN_SECS;
            tracing::warn!(
                "REQUEST_TIMEOUT_SECS={} does not exceed SYNTHESIS_TIMEOUT_SECS={}, using {}",
                self.request_timeout_secs,
                self.synthesis_timeout_secs,
                raised
            );
            self.request_timeout_secs = raised;
        }
        self
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn synthesis_timeout(&self) -> Duration {
        Duration::from_secs(self.synthesis_timeout_secs)
    }
}

//! Neural voices through Piper ONNX models.
//!
//! A voice's `identifier` is the path of its Piper model config. Loaded
//! synthesizers are cached per config path and shared between channels.

use std::{
    collections::HashMap,
    fs,
    path::Path,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
    thread::{self, JoinHandle},
};

use anyhow::Context;
use piper_rs::synth::{PiperSpeechStreamParallel, PiperSpeechSynthesizer};

use crate::engine::{Completion, EngineError, SpeechChannel, SpeechEngine};
use crate::voices::VoiceRecord;
use crate::wav::AudioEncoder;

// Cached synthesizer and its native sample rate
#[derive(Clone)]
struct CachedSynth {
    synth: Arc<Mutex<PiperSpeechSynthesizer>>,
    sample_rate: u32,
}

#[derive(Default)]
pub struct PiperEngine {
    cache: Mutex<HashMap<String, CachedSynth>>,
}

impl PiperEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load models ahead of the first request.
    pub fn preload<'a>(&self, voices: impl IntoIterator<Item = &'a VoiceRecord>) -> anyhow::Result<()> {
        for voice in voices {
            if let Some(cfg) = voice.identifier.as_deref() {
                self.get_or_create_synth(cfg)?;
            }
        }
        Ok(())
    }

    /// Read sample rate from model config JSON
    fn read_sample_rate<P: AsRef<Path>>(cfg_path: P) -> anyhow::Result<u32> {
        let text = fs::read_to_string(cfg_path.as_ref())
            .with_context(|| format!("Failed to read config file: {}", cfg_path.as_ref().display()))?;
        let json: serde_json::Value = serde_json::from_str(&text).with_context(|| "Config file is not valid JSON")?;

        let sample_rate = json
            .get("audio")
            .and_then(|a| a.get("sample_rate"))
            .and_then(|sr| sr.as_u64())
            .ok_or_else(|| anyhow::anyhow!("Missing or invalid 'audio.sample_rate' in config"))?;

        Ok(sample_rate as u32)
    }

    fn get_or_create_synth(&self, cfg_path: &str) -> anyhow::Result<CachedSynth> {
        let mut cache = self
            .cache
            .lock()
            .map_err(|_| anyhow::anyhow!("Synthesizer cache lock poisoned"))?;
        if let Some(cached) = cache.get(cfg_path) {
            return Ok(cached.clone());
        }

        let sample_rate = Self::read_sample_rate(cfg_path)?;
        let model = piper_rs::from_config_path(Path::new(cfg_path))
            .map_err(|e| anyhow::anyhow!("piper load error: {e}"))?;
        let synth = PiperSpeechSynthesizer::new(model)?;
        let cached = CachedSynth {
            synth: Arc::new(Mutex::new(synth)),
            sample_rate,
        };
        cache.insert(cfg_path.to_string(), cached.clone());
        tracing::info!("Loaded Piper model {cfg_path} ({sample_rate} Hz)");
        Ok(cached)
    }
}

impl SpeechEngine for PiperEngine {
    fn name(&self) -> &'static str {
        "piper"
    }

    fn open_channel(&self, voice: &VoiceRecord) -> Result<Box<dyn SpeechChannel>, EngineError> {
        let cfg = voice
            .identifier
            .as_deref()
            .ok_or_else(|| EngineError::UnsupportedVoice(voice.name.clone()))?;
        let synth = self
            .get_or_create_synth(cfg)
            .map_err(|e| EngineError::Channel(format!("{e:#}")))?;
        Ok(Box::new(PiperChannel {
            synth,
            stop: Arc::new(AtomicBool::new(false)),
            worker: None,
        }))
    }
}

struct PiperChannel {
    synth: CachedSynth,
    stop: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl SpeechChannel for PiperChannel {
    fn speak(&mut self, text: &str, mut encoder: AudioEncoder, done: Completion) -> Result<(), EngineError> {
        if self.worker.is_some() {
            return Err(EngineError::Channel("channel is already speaking".into()));
        }

        let text = text.to_string();
        let cached = self.synth.clone();
        let stop = self.stop.clone();
        let worker = thread::Builder::new()
            .name("piper-synth".into())
            .spawn(move || {
                let synth = match cached.synth.lock() {
                    Ok(s) => s,
                    Err(_) => {
                        done.complete(Err(EngineError::Synthesis("synthesizer lock poisoned".into())));
                        return;
                    }
                };
                let iter: PiperSpeechStreamParallel = match synth.synthesize_parallel(text, None) {
                    Ok(i) => i,
                    Err(e) => {
                        done.complete(Err(EngineError::Synthesis(format!("piper synth error: {e}"))));
                        return;
                    }
                };

                for part in iter {
                    if stop.load(Ordering::Relaxed) || done.is_abandoned() {
                        return;
                    }
                    let samples = match part {
                        Ok(samples) => samples.into_vec(),
                        Err(e) => {
                            done.complete(Err(EngineError::Synthesis(format!("chunk error: {e}"))));
                            return;
                        }
                    };
                    if let Err(e) = encoder.write(&samples, cached.sample_rate) {
                        done.complete(Err(e.into()));
                        return;
                    }
                }
                done.complete(encoder.finish().map_err(EngineError::from));
            })
            .map_err(|e| EngineError::Channel(format!("could not start synthesis thread: {e}")))?;
        self.worker = Some(worker);
        Ok(())
    }

    fn stop(&mut self) -> Result<(), EngineError> {
        self.stop.store(true, Ordering::Relaxed);
        Ok(())
    }
}

impl Drop for PiperChannel {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        self.worker.take();
    }
}

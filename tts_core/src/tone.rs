//! Built-in engine that renders text as a sequence of short tones.
//!
//! Each letter or digit becomes a tone whose pitch depends on the character
//! and the voice gender; whitespace and punctuation become pauses, longer at
//! sentence ends. Output is deterministic, which makes the engine useful for
//! wiring checks and tests when no neural voices are installed.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::thread::{self, JoinHandle};

use crate::engine::{Completion, EngineError, SpeechChannel, SpeechEngine};
use crate::voices::{Gender, VoiceRecord};
use crate::wav::AudioEncoder;

pub const TONE_SAMPLE_RATE: u32 = 22050;

const TONE_MS: u32 = 70;
const SHORT_PAUSE_MS: u32 = 60;
const LONG_PAUSE_MS: u32 = 250;
const AMPLITUDE: f32 = 0.4;
// Attack/release length in samples, keeps tone edges click-free.
const RAMP: usize = 110;

#[derive(Debug, Default, Clone)]
pub struct ToneEngine;

impl ToneEngine {
    pub fn new() -> Self {
        Self
    }
}

impl SpeechEngine for ToneEngine {
    fn name(&self) -> &'static str {
        "tone"
    }

    fn open_channel(&self, voice: &VoiceRecord) -> Result<Box<dyn SpeechChannel>, EngineError> {
        Ok(Box::new(ToneChannel {
            base_hz: base_frequency(voice.gender),
            stop: Arc::new(AtomicBool::new(false)),
            worker: None,
        }))
    }
}

fn base_frequency(gender: Gender) -> f32 {
    match gender {
        Gender::Male => 110.0,
        Gender::Female => 220.0,
        Gender::Neuter => 165.0,
        Gender::Unspecified => 147.0,
    }
}

struct ToneChannel {
    base_hz: f32,
    stop: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl SpeechChannel for ToneChannel {
    fn speak(&mut self, text: &str, mut encoder: AudioEncoder, done: Completion) -> Result<(), EngineError> {
        if self.worker.is_some() {
            return Err(EngineError::Channel("channel is already speaking".into()));
        }

        let text = text.to_string();
        let base_hz = self.base_hz;
        let stop = self.stop.clone();
        let worker = thread::Builder::new()
            .name("tone-synth".into())
            .spawn(move || {
                let mut chunk = Vec::new();
                for c in text.chars() {
                    if stop.load(Ordering::Relaxed) || done.is_abandoned() {
                        // Stopped: the waiter is gone, so the signal is just dropped.
                        return;
                    }
                    chunk.clear();
                    render_char(c, base_hz, &mut chunk);
                    if let Err(e) = encoder.write(&chunk, TONE_SAMPLE_RATE) {
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

impl Drop for ToneChannel {
    fn drop(&mut self) {
        // The worker notices within one character and exits on its own.
        self.stop.store(true, Ordering::Relaxed);
        self.worker.take();
    }
}

fn samples_for(ms: u32) -> usize {
    (TONE_SAMPLE_RATE * ms / 1000) as usize
}

fn render_char(c: char, base_hz: f32, out: &mut Vec<f32>) {
    if c.is_alphanumeric() {
        // Two octaves of semitones above the voice base.
        let step = (c.to_lowercase().next().unwrap_or(c) as u32 % 24) as f32;
        let hz = base_hz * 2f32.powf(step / 12.0);
        let n = samples_for(TONE_MS);
        let w = 2.0 * std::f32::consts::PI * hz / TONE_SAMPLE_RATE as f32;
        out.extend((0..n).map(|i| {
            let ramp = (i.min(n - 1 - i) as f32 / RAMP as f32).min(1.0);
            (w * i as f32).sin() * AMPLITUDE * ramp
        }));
    } else if matches!(c, '.' | '!' | '?' | ';' | ':' | '\n') {
        out.resize(out.len() + samples_for(LONG_PAUSE_MS), 0.0);
    } else {
        out.resize(out.len() + samples_for(SHORT_PAUSE_MS), 0.0);
    }
}

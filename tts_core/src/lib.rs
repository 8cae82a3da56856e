//! Core of the speech service: the random-access output buffer, the WAVE
//! encoder that writes into it, the voice registry, response fingerprints,
//! and the engine contract with its bounded completion wait.

pub mod buffer;
pub mod cache_key;
pub mod engine;
pub mod format;
#[cfg(feature = "piper")]
pub mod piper;
pub mod tone;
pub mod voices;
pub mod wav;

pub use buffer::{RandomAccessBuffer, ReadAt, WriteAt};
pub use cache_key::Fingerprint;
pub use engine::{
    Completion, CompletionBridge, EngineError, SpeechChannel, SpeechEngine, SynthesisError, SYNTHESIS_TIMEOUT,
};
pub use format::{AudioFormat, OutputSpec};
#[cfg(feature = "piper")]
pub use piper::PiperEngine;
pub use tone::ToneEngine;
pub use voices::{Gender, ResolveError, VoiceId, VoiceQuery, VoiceRecord, VoiceRegistry};
pub use wav::{AudioEncoder, EncoderError};

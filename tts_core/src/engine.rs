//! Engine contract and the bridge from its one-shot "done" signal to a bounded wait.

use std::time::Duration;

use thiserror::Error;
use tokio::sync::oneshot;

use crate::buffer::RandomAccessBuffer;
use crate::voices::VoiceRecord;
use crate::wav::{AudioEncoder, EncoderError};

/// How long a request waits for the engine before giving up.
pub const SYNTHESIS_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("voice '{0}' cannot be used with this engine")]
    UnsupportedVoice(String),

    #[error("could not open a synthesis channel: {0}")]
    Channel(String),

    #[error("synthesis failed: {0}")]
    Synthesis(String),

    #[error(transparent)]
    Encoder(#[from] EncoderError),
}

#[derive(Debug, Error)]
pub enum SynthesisError {
    #[error("synthesis did not complete within {}s", .0.as_secs())]
    Timeout(Duration),

    #[error(transparent)]
    Engine(#[from] EngineError),
}

/// A synthesizer that hands out one channel per utterance.
pub trait SpeechEngine: Send + Sync {
    fn name(&self) -> &'static str;

    fn open_channel(&self, voice: &VoiceRecord) -> Result<Box<dyn SpeechChannel>, EngineError>;
}

/// One utterance in flight. Dropping the channel releases it.
pub trait SpeechChannel: Send {
    /// Start synthesizing `text` into `encoder` and return without waiting.
    ///
    /// The channel must eventually consume `done` exactly once, or drop it if
    /// stopped. An `Err` here means nothing was started.
    fn speak(&mut self, text: &str, encoder: AudioEncoder, done: Completion) -> Result<(), EngineError>;

    /// Halt synthesis immediately. Safe on an idle channel.
    fn stop(&mut self) -> Result<(), EngineError>;
}

type Signal = oneshot::Receiver<Result<RandomAccessBuffer, EngineError>>;

/// Sending half of the completion signal, consumed when fired.
#[derive(Debug)]
pub struct Completion {
    tx: oneshot::Sender<Result<RandomAccessBuffer, EngineError>>,
}

impl Completion {
    pub(crate) fn pair() -> (Self, Signal) {
        let (tx, rx) = oneshot::channel();
        (Self { tx }, rx)
    }

    /// Fire the signal. Returns `false` if the waiter already gave up.
    pub fn complete(self, result: Result<RandomAccessBuffer, EngineError>) -> bool {
        self.tx.send(result).is_ok()
    }

    /// True once nobody is waiting; producers use it to stop early.
    pub fn is_abandoned(&self) -> bool {
        self.tx.is_closed()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CompletionBridge {
    timeout: Duration,
}

impl Default for CompletionBridge {
    fn default() -> Self {
        Self::new(SYNTHESIS_TIMEOUT)
    }
}

impl CompletionBridge {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Speak `text` on `channel` and wait, bounded, for the finished document.
    ///
    /// Exactly one of completion or timeout is observed, on both sides. On
    /// timeout the receiving side is closed before the channel is stopped and
    /// dropped, so a late signal from the engine is refused rather than
    /// delivered. The channel is released on every path.
    pub async fn synthesize(
        &self,
        mut channel: Box<dyn SpeechChannel>,
        text: &str,
        encoder: AudioEncoder,
    ) -> Result<RandomAccessBuffer, SynthesisError> {
        let (done, mut rx) = Completion::pair();
        channel.speak(text, encoder, done)?;

        match tokio::time::timeout(self.timeout, &mut rx).await {
            Ok(Ok(result)) => Ok(result?),
            Ok(Err(_)) => Err(EngineError::Synthesis("engine dropped its completion signal".into()).into()),
            Err(_) => self.settle_after_deadline(&mut rx, channel),
        }
    }

    /// Refuse further signals, then look once more: a signal that was
    /// accepted between the deadline and the close is a completion, and the
    /// engine was told so.
    fn settle_after_deadline(
        &self,
        rx: &mut Signal,
        mut channel: Box<dyn SpeechChannel>,
    ) -> Result<RandomAccessBuffer, SynthesisError> {
        rx.close();
        if let Ok(result) = rx.try_recv() {
            return Ok(result?);
        }
        if let Err(e) = channel.stop() {
            tracing::warn!("Failed to stop timed-out synthesis: {e}");
        }
        drop(channel);
        Err(SynthesisError::Timeout(self.timeout))
    }
}

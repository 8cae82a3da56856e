use std::fmt;

use rubato::{FftFixedIn, Resampler};
use thiserror::Error;

use crate::buffer::{RandomAccessBuffer, WriteAt};
use crate::format::{AudioFormat, OutputSpec};

const HEADER_LEN: u64 = 44;
const RIFF_SIZE_OFFSET: u64 = 4;
const DATA_SIZE_OFFSET: u64 = 40;

#[derive(Debug, Error)]
pub enum EncoderError {
    #[error("no encoder available for {0}")]
    UnsupportedFormat(AudioFormat),

    #[error("unsupported output shape: {channels} channel(s), {bits} bits per sample")]
    UnsupportedSpec { channels: u16, bits: u16 },

    #[error("resampling failed: {0}")]
    Resample(String),

    #[error("audio payload exceeds the container size limit")]
    TooLarge,

    #[error("sink write failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Encodes f32 samples into a RIFF/WAVE stream inside a [`RandomAccessBuffer`].
///
/// The header goes in first with zeroed size fields, PCM frames are appended
/// behind it, and [`AudioEncoder::finish`] patches the RIFF and data sizes in
/// place. Input arriving at a different rate than the output spec goes
/// through a streaming rubato resampler that is flushed on finish.
#[derive(Debug)]
pub struct AudioEncoder {
    sink: RandomAccessBuffer,
    spec: OutputSpec,
    data_len: u64,
    resampler: Option<StreamResampler>,
    scratch: Vec<u8>,
    resampled: Vec<f32>,
}

impl AudioEncoder {
    /// Open an encoder for `format` writing into `sink`.
    pub fn open(format: AudioFormat, sink: RandomAccessBuffer, spec: OutputSpec) -> Result<Self, EncoderError> {
        if !format.is_encodable() {
            return Err(EncoderError::UnsupportedFormat(format));
        }
        if spec.bits_per_sample != 16 || spec.channels == 0 || spec.sample_rate == 0 {
            return Err(EncoderError::UnsupportedSpec {
                channels: spec.channels,
                bits: spec.bits_per_sample,
            });
        }

        let mut encoder = Self {
            sink,
            spec,
            data_len: 0,
            resampler: None,
            scratch: Vec::new(),
            resampled: Vec::new(),
        };
        encoder.write_header()?;
        Ok(encoder)
    }

    pub fn spec(&self) -> OutputSpec {
        self.spec
    }

    /// Bytes of PCM payload written so far.
    pub fn data_len(&self) -> u64 {
        self.data_len
    }

    fn write_header(&mut self) -> Result<(), EncoderError> {
        let spec = self.spec;
        let mut header = Vec::with_capacity(HEADER_LEN as usize);

        // RIFF header; the size is patched in finish()
        header.extend_from_slice(b"RIFF");
        header.extend_from_slice(&0u32.to_le_bytes());
        header.extend_from_slice(b"WAVE");

        // fmt chunk
        header.extend_from_slice(b"fmt ");
        header.extend_from_slice(&16u32.to_le_bytes());
        header.extend_from_slice(&1u16.to_le_bytes()); // PCM
        header.extend_from_slice(&spec.channels.to_le_bytes());
        header.extend_from_slice(&spec.sample_rate.to_le_bytes());
        header.extend_from_slice(&spec.byte_rate().to_le_bytes());
        header.extend_from_slice(&spec.block_align().to_le_bytes());
        header.extend_from_slice(&spec.bits_per_sample.to_le_bytes());

        // data chunk
        header.extend_from_slice(b"data");
        header.extend_from_slice(&0u32.to_le_bytes());

        self.sink.write_at(&header, 0)?;
        Ok(())
    }

    /// Append mono samples produced at `input_rate`.
    pub fn write(&mut self, samples: &[f32], input_rate: u32) -> Result<(), EncoderError> {
        if samples.is_empty() {
            return Ok(());
        }
        if input_rate == self.spec.sample_rate || input_rate == 0 {
            return self.encode_frames(samples);
        }

        let resampler = match &mut self.resampler {
            Some(r) if r.input_rate() == input_rate => r,
            slot => {
                if let Some(mut previous) = slot.take() {
                    // Rate changed mid-stream: drain what the old one holds.
                    let mut tail = Vec::new();
                    previous.flush(&mut tail)?;
                    self.resampled.extend_from_slice(&tail);
                }
                slot.insert(StreamResampler::new(input_rate, self.spec.sample_rate)?)
            }
        };
        let mut resampled = std::mem::take(&mut self.resampled);
        resampler.process(samples, &mut resampled)?;
        let result = self.encode_frames(&resampled);
        resampled.clear();
        self.resampled = resampled;
        result
    }

    fn encode_frames(&mut self, frames: &[f32]) -> Result<(), EncoderError> {
        if frames.is_empty() {
            return Ok(());
        }
        const I16_MAX_F32: f32 = i16::MAX as f32;
        let channels = self.spec.channels as usize;
        self.scratch.clear();
        self.scratch.reserve(frames.len() * 2 * channels);
        for &s in frames {
            let v = (s.clamp(-1.0, 1.0) * I16_MAX_F32) as i16;
            for _ in 0..channels {
                self.scratch.extend_from_slice(&v.to_le_bytes());
            }
        }
        self.append_payload()
    }

    fn append_payload(&mut self) -> Result<(), EncoderError> {
        let new_len = self.data_len + self.scratch.len() as u64;
        if HEADER_LEN - 8 + new_len > u32::MAX as u64 {
            return Err(EncoderError::TooLarge);
        }
        self.sink.write_at(&self.scratch, HEADER_LEN + self.data_len)?;
        self.data_len = new_len;
        Ok(())
    }

    /// Flush the resampler, patch the size fields and hand the finished
    /// document back.
    pub fn finish(mut self) -> Result<RandomAccessBuffer, EncoderError> {
        if let Some(mut resampler) = self.resampler.take() {
            let mut tail = Vec::new();
            resampler.flush(&mut tail)?;
            self.encode_frames(&tail)?;
        }

        let data_size = self.data_len as u32;
        let riff_size = (HEADER_LEN - 8) as u32 + data_size;
        self.sink.write_at(&data_size.to_le_bytes(), DATA_SIZE_OFFSET)?;
        self.sink.write_at(&riff_size.to_le_bytes(), RIFF_SIZE_OFFSET)?;
        Ok(self.sink)
    }
}

const RESAMPLER_CHUNK: usize = 1024;
const RESAMPLER_SUB_CHUNKS: usize = 2;

/// Streaming wrapper around rubato's FFT resampler.
///
/// Input is queued until a full chunk is available. The resampler's output
/// delay is dropped from the front and the tail is flushed by [`flush`] so
/// the output length tracks `frames_in * output_rate / input_rate`.
///
/// [`flush`]: StreamResampler::flush
struct StreamResampler {
    inner: FftFixedIn<f32>,
    input_rate: u32,
    output_rate: u32,
    pending: Vec<f32>,
    delay: usize,
    frames_in: u64,
    frames_out: u64,
}

impl fmt::Debug for StreamResampler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamResampler")
            .field("input_rate", &self.input_rate)
            .field("output_rate", &self.output_rate)
            .field("pending", &self.pending.len())
            .field("frames_in", &self.frames_in)
            .field("frames_out", &self.frames_out)
            .finish()
    }
}

impl StreamResampler {
    fn new(input_rate: u32, output_rate: u32) -> Result<Self, EncoderError> {
        let inner = FftFixedIn::<f32>::new(
            input_rate as usize,
            output_rate as usize,
            RESAMPLER_CHUNK,
            RESAMPLER_SUB_CHUNKS,
            1,
        )
        .map_err(|e| EncoderError::Resample(e.to_string()))?;
        let delay = inner.output_delay();
        Ok(Self {
            inner,
            input_rate,
            output_rate,
            pending: Vec::with_capacity(RESAMPLER_CHUNK),
            delay,
            frames_in: 0,
            frames_out: 0,
        })
    }

    fn input_rate(&self) -> u32 {
        self.input_rate
    }

    /// Output frames owed for everything fed so far.
    fn expected_out(&self) -> u64 {
        let (num, den) = (self.output_rate as u64, self.input_rate as u64);
        (self.frames_in * num + den / 2) / den
    }

    fn process(&mut self, input: &[f32], out: &mut Vec<f32>) -> Result<(), EncoderError> {
        self.frames_in += input.len() as u64;
        self.pending.extend_from_slice(input);

        loop {
            let needed = self.inner.input_frames_next();
            if self.pending.len() < needed {
                return Ok(());
            }
            let block = self
                .inner
                .process(&[&self.pending[..needed]][..], None)
                .map_err(|e| EncoderError::Resample(e.to_string()))?;
            self.pending.drain(..needed);
            self.emit(&block[0], out);
        }
    }

    /// Push out the queued remainder and the frames still held back by the
    /// resampler's delay.
    fn flush(&mut self, out: &mut Vec<f32>) -> Result<(), EncoderError> {
        if !self.pending.is_empty() {
            let block = self
                .inner
                .process_partial(Some(&[&self.pending[..]][..]), None)
                .map_err(|e| EncoderError::Resample(e.to_string()))?;
            self.pending.clear();
            self.emit(&block[0], out);
        }

        while self.frames_out < self.expected_out() {
            let block = self
                .inner
                .process_partial(None::<&[&[f32]]>, None)
                .map_err(|e| EncoderError::Resample(e.to_string()))?;
            if block[0].is_empty() {
                break;
            }
            self.emit(&block[0], out);
        }
        Ok(())
    }

    fn emit(&mut self, block: &[f32], out: &mut Vec<f32>) {
        let skip = self.delay.min(block.len());
        self.delay -= skip;
        let owed = self.expected_out().saturating_sub(self.frames_out) as usize;
        let take = (block.len() - skip).min(owed);
        out.extend_from_slice(&block[skip..skip + take]);
        self.frames_out += take as u64;
    }
}

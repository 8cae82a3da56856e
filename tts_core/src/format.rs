//! Output containers and sample-rate policy.

use std::fmt;

/// Sample rates a client may ask for; anything else snaps to the nearest entry.
pub const SUPPORTED_SAMPLE_RATES: [u32; 6] = [8000, 11025, 16000, 32000, 44100, 48000];

/// Used when the client gives no sample rate or one we cannot parse.
pub const DEFAULT_SAMPLE_RATE: u32 = 22050;

/// Mime types answered with a WAVE container. The first one is the baseline.
pub const WAVE_MIME_TYPES: [&str; 4] = ["audio/wave", "audio/wav", "audio/x-wav", "audio/vnd.wav"];

pub const MP4_MIME_TYPES: [&str; 1] = ["audio/mp4"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AudioFormat {
    /// RIFF/WAVE with linear PCM.
    Wave,
    /// AAC in an MPEG-4 container.
    Mp4Aac,
}

impl AudioFormat {
    /// Container for a mime type from the supported set, ignoring parameters and case.
    pub fn from_mime(mime: &str) -> Option<Self> {
        let essence = mime.split(';').next().unwrap_or_default().trim();
        if WAVE_MIME_TYPES.iter().any(|m| m.eq_ignore_ascii_case(essence)) {
            Some(Self::Wave)
        } else if MP4_MIME_TYPES.iter().any(|m| m.eq_ignore_ascii_case(essence)) {
            Some(Self::Mp4Aac)
        } else {
            None
        }
    }

    /// Resolve a `type` parameter: either a supported mime type or a short alias.
    ///
    /// Returns the container together with the mime type to answer with.
    pub fn from_type_param(value: &str) -> Option<(Self, &'static str)> {
        let value = value.trim();
        match value.to_ascii_lowercase().as_str() {
            "wav" | "wave" => return Some((Self::Wave, Self::Wave.baseline_mime())),
            "mp4" | "m4a" | "aac" => return Some((Self::Mp4Aac, Self::Mp4Aac.baseline_mime())),
            _ => {}
        }
        let essence = value.split(';').next().unwrap_or_default().trim();
        WAVE_MIME_TYPES
            .iter()
            .map(|m| (Self::Wave, *m))
            .chain(MP4_MIME_TYPES.iter().map(|m| (Self::Mp4Aac, *m)))
            .find(|(_, m)| m.eq_ignore_ascii_case(essence))
    }

    /// Mime type answered when the client named the container without one.
    pub fn baseline_mime(self) -> &'static str {
        match self {
            Self::Wave => WAVE_MIME_TYPES[0],
            Self::Mp4Aac => MP4_MIME_TYPES[0],
        }
    }

    /// Whether a bundled encoder can produce this container.
    pub fn is_encodable(self) -> bool {
        matches!(self, Self::Wave)
    }
}

impl fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Wave => f.write_str("WAVE"),
            Self::Mp4Aac => f.write_str("AAC/MP4"),
        }
    }
}

/// Shape of the encoded output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputSpec {
    pub sample_rate: u32,
    pub channels: u16,
    pub bits_per_sample: u16,
}

impl OutputSpec {
    /// Mono, 16-bit: the only shape the service produces.
    pub fn mono16(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            channels: 1,
            bits_per_sample: 16,
        }
    }

    pub fn block_align(&self) -> u16 {
        self.channels * (self.bits_per_sample / 8)
    }

    pub fn byte_rate(&self) -> u32 {
        self.sample_rate * self.block_align() as u32
    }
}

/// Snap a requested rate to the nearest supported one. Ties go to the lower rate.
pub fn snap_sample_rate(requested: u32) -> u32 {
    SUPPORTED_SAMPLE_RATES
        .iter()
        .copied()
        .min_by_key(|rate| rate.abs_diff(requested))
        .unwrap_or(DEFAULT_SAMPLE_RATE)
}

/// Parse and snap the raw `samplerate` parameter.
pub fn resolve_sample_rate(raw: Option<&str>) -> u32 {
    raw.map(str::trim)
        .filter(|s| !s.is_empty())
        .and_then(|s| s.parse::<f64>().ok())
        .filter(|r| r.is_finite() && *r > 0.0 && *r <= u32::MAX as f64)
        .map(|r| snap_sample_rate(r.round() as u32))
        .unwrap_or(DEFAULT_SAMPLE_RATE)
}

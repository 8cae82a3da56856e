use serde::Deserialize;
use tts_core::format::{resolve_sample_rate, AudioFormat};
use tts_core::{Gender, VoiceQuery};

use crate::error::ApiError;

/// Maximum text length for TTS requests
const MAX_TEXT_LENGTH: usize = 5000;
/// Longest accepted locale tag
const MAX_LANG_LENGTH: usize = 35;

/// Raw `/speech` parameters as they arrive in the query string or form body.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SpeechParams {
    pub text: Option<String>,
    pub voice: Option<String>,
    pub gender: Option<String>,
    pub lang: Option<String>,
    pub samplerate: Option<String>,
    #[serde(rename = "type")]
    pub media_type: Option<String>,
    pub attachment: Option<String>,
}

impl SpeechParams {
    /// Layer `over` on top of `self`; values present in `over` win.
    pub fn merge(self, over: SpeechParams) -> SpeechParams {
        SpeechParams {
            text: over.text.or(self.text),
            voice: over.voice.or(self.voice),
            gender: over.gender.or(self.gender),
            lang: over.lang.or(self.lang),
            samplerate: over.samplerate.or(self.samplerate),
            media_type: over.media_type.or(self.media_type),
            attachment: over.attachment.or(self.attachment),
        }
    }
}

/// Validated request, parsed once.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestParameters {
    pub text: String,
    pub voice: VoiceQuery,
    pub sample_rate: u32,
    /// Set when the client named a type explicitly; otherwise negotiated from `Accept`.
    pub media_type: Option<(AudioFormat, &'static str)>,
    pub attachment: Option<String>,
}

/// Validate TTS request
pub fn validate_speech_request(params: SpeechParams) -> Result<RequestParameters, ApiError> {
    let text = params.text.unwrap_or_default();
    if text.is_empty() {
        return Err(ApiError::InvalidInput("missing `text` parameter".to_string()));
    }
    if text.chars().count() > MAX_TEXT_LENGTH {
        return Err(ApiError::InvalidInput(format!(
            "Text too long (max {} characters)",
            MAX_TEXT_LENGTH
        )));
    }

    let gender = params
        .gender
        .as_deref()
        .unwrap_or_default()
        .parse::<Gender>()
        .map_err(|e| ApiError::InvalidInput(e.to_string()))?;

    let locale = params.lang.filter(|l| !l.is_empty());
    if let Some(lang) = locale.as_deref() {
        if !is_valid_language_code(lang) {
            return Err(ApiError::InvalidInput(format!(
                "Invalid language code format: {}. Expected a locale such as en_US",
                lang
            )));
        }
    }

    let media_type = match params.media_type.as_deref().filter(|t| !t.trim().is_empty()) {
        Some(t) => {
            let (format, mime) = AudioFormat::from_type_param(t)
                .ok_or_else(|| ApiError::InvalidInput(format!("unsupported `type` '{}'", t)))?;
            if !format.is_encodable() {
                return Err(ApiError::InvalidInput(format!(
                    "`type` '{}' is recognised but this server cannot encode {}",
                    t, format
                )));
            }
            Some((format, mime))
        }
        None => None,
    };

    Ok(RequestParameters {
        text,
        voice: VoiceQuery {
            name: params.voice.filter(|v| !v.is_empty()),
            gender,
            locale,
        },
        sample_rate: resolve_sample_rate(params.samplerate.as_deref()),
        media_type,
        attachment: params.attachment.filter(|a| !a.trim().is_empty()),
    })
}

/// Locale tokens: ASCII letters, digits, `_` and `-` (e.g. en_US, de-DE).
fn is_valid_language_code(code: &str) -> bool {
    code.len() <= MAX_LANG_LENGTH
        && code
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

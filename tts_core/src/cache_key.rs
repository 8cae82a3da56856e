//! Deterministic response fingerprints used as HTTP validators.

use std::fmt;

use sha2::{Digest, Sha256};

use crate::voices::VoiceId;

/// Bytes of digest kept in a fingerprint (128 bits).
const FINGERPRINT_BYTES: usize = 16;

/// Lowercase hex digest identifying one rendering of one text.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Strong entity tag form, quoted.
    pub fn etag(&self) -> String {
        format!("\"{}\"", self.0)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Hash of sample rate, voice identity, response mime type and text.
///
/// The rate is encoded as a big-endian u32, the voice identity through
/// [`VoiceId::to_bytes`] and the mime type with the same u32 length prefix,
/// so the value is identical across processes and platforms and no two
/// inputs share a byte stream.
pub fn compute(sample_rate: u32, voice: &VoiceId, mime_type: &str, text: &str) -> Fingerprint {
    let mut hasher = Sha256::new();
    hasher.update(sample_rate.to_be_bytes());
    hasher.update(voice.to_bytes());
    hasher.update((mime_type.len() as u32).to_be_bytes());
    hasher.update(mime_type.as_bytes());
    hasher.update(text.as_bytes());
    let digest = hasher.finalize();
    Fingerprint(hex::encode(&digest[..FINGERPRINT_BYTES]))
}

/// Whether an `If-None-Match` value lets us skip synthesis entirely.
///
/// Matches on the wildcard or on any listed tag equal to the fingerprint.
/// Weak tags compare by their opaque value, as conditional GET allows.
pub fn is_not_modified(validator: Option<&str>, fingerprint: &Fingerprint) -> bool {
    let Some(validator) = validator else {
        return false;
    };
    validator.split(',').map(str::trim).any(|tag| {
        if tag == "*" {
            return true;
        }
        let tag = tag.strip_prefix("W/").unwrap_or(tag);
        let tag = tag
            .strip_prefix('"')
            .and_then(|t| t.strip_suffix('"'))
            .unwrap_or(tag);
        !tag.is_empty() && tag == fingerprint.as_str()
    })
}

//! Voice catalog: records loaded once at startup and matched per request.

use std::{collections::BTreeMap, collections::HashMap, fmt, fs, path::Path, str::FromStr};

use anyhow::Context;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Locale assumed when a match query carries an empty locale.
pub const DEFAULT_LOCALE: &str = "en_US";

/// Voice used when a request names no voice and asks for no gender or locale.
pub const FALLBACK_VOICE: &str = "Fred";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    #[default]
    Unspecified,
    Male,
    Female,
    Neuter,
}

impl Gender {
    pub fn as_str(self) -> &'static str {
        match self {
            Gender::Unspecified => "unspecified",
            Gender::Male => "male",
            Gender::Female => "female",
            Gender::Neuter => "neuter",
        }
    }

    /// An unspecified query gender accepts any voice.
    pub fn accepts(self, voice: Gender) -> bool {
        self == Gender::Unspecified || self == voice
    }
}

impl fmt::Display for Gender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown gender '{0}'")]
pub struct ParseGenderError(pub String);

impl FromStr for Gender {
    type Err = ParseGenderError;

    /// Accepts "", "male", "female" and "neuter", ignoring ASCII case.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" => Ok(Gender::Unspecified),
            "male" => Ok(Gender::Male),
            "female" => Ok(Gender::Female),
            "neuter" => Ok(Gender::Neuter),
            _ => Err(ParseGenderError(s.to_string())),
        }
    }
}

/// Opaque engine-side identity of a voice.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VoiceId(String);

impl VoiceId {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Stable binary form: big-endian u32 length followed by the UTF-8 token.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(4 + self.0.len());
        out.extend_from_slice(&(self.0.len() as u32).to_be_bytes());
        out.extend_from_slice(self.0.as_bytes());
        out
    }
}

impl fmt::Display for VoiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VoiceRecord {
    #[serde(skip)]
    pub id: VoiceId,
    pub name: String,
    pub gender: Gender,
    pub locale: Option<String>,
    pub age: u32,
    /// Engine-specific handle, e.g. a Piper model config path.
    pub identifier: Option<String>,
}

impl VoiceRecord {
    pub fn new(id: impl Into<String>, name: impl Into<String>, gender: Gender, locale: Option<&str>) -> Self {
        Self {
            id: VoiceId::new(id),
            name: name.into(),
            gender,
            locale: locale.map(str::to_string),
            age: 0,
            identifier: None,
        }
    }

    pub fn with_age(mut self, age: u32) -> Self {
        self.age = age;
        self
    }

    pub fn with_identifier(mut self, identifier: impl Into<String>) -> Self {
        self.identifier = Some(identifier.into());
        self
    }
}

/// What a request asked for, before resolution.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VoiceQuery {
    pub name: Option<String>,
    pub gender: Gender,
    pub locale: Option<String>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ResolveError {
    #[error("no voice named '{0}'")]
    NoSuchVoice(String),

    #[error("no {gender} voice for locale '{locale}'")]
    NoMatch { gender: Gender, locale: String },

    #[error("default voice '{0}' is not installed")]
    NoFallback(String),
}

// Catalog file layout, keyed by language then voice id.
#[derive(Debug, Deserialize)]
struct LanguageEntry {
    #[serde(default)]
    voices: BTreeMap<String, VoiceEntry>,
}

#[derive(Debug, Deserialize)]
struct VoiceEntry {
    config: String,
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    gender: Option<String>,
    #[serde(default)]
    age: Option<u32>,
}

/// Immutable after construction; share it behind an `Arc` and read without locking.
#[derive(Debug, Clone, Default)]
pub struct VoiceRegistry {
    voices: Vec<VoiceRecord>,
    by_name: HashMap<String, usize>,
}

impl VoiceRegistry {
    /// Build from records in enumeration order. Later duplicates of a name are dropped.
    pub fn new(records: impl IntoIterator<Item = VoiceRecord>) -> Self {
        let mut voices = Vec::new();
        let mut by_name = HashMap::new();
        for record in records {
            if by_name.contains_key(&record.name) {
                tracing::warn!("Duplicate voice name '{}' ignored (id {})", record.name, record.id);
                continue;
            }
            by_name.insert(record.name.clone(), voices.len());
            voices.push(record);
        }
        Self { voices, by_name }
    }

    /// Load the voice catalog from a map file such as `models/map.json`.
    pub fn from_mapfile<P: AsRef<Path>>(p: P) -> anyhow::Result<Self> {
        let text = fs::read_to_string(p.as_ref())
            .with_context(|| format!("Failed to load {}", p.as_ref().display()))?;
        Self::from_map_json(&text)
    }

    /// Parse a catalog of the form
    /// `{ "en_US": { "voices": { "lessac": { "config": "...", "display_name": "Fred", "gender": "male", "age": 35 } } } }`.
    ///
    /// Records are enumerated by language key, then voice id, in sorted order.
    pub fn from_map_json(text: &str) -> anyhow::Result<Self> {
        let languages: BTreeMap<String, LanguageEntry> =
            serde_json::from_str(text).with_context(|| "voice map is not a valid catalog")?;

        let mut records = Vec::new();
        for (lang, entry) in languages {
            for (voice_id, voice) in entry.voices {
                let gender = match voice.gender.as_deref() {
                    Some(g) => g
                        .parse::<Gender>()
                        .with_context(|| format!("invalid gender for voice {lang}/{voice_id}"))?,
                    None => Gender::Unspecified,
                };
                let name = voice.display_name.unwrap_or_else(|| voice_id.clone());
                records.push(
                    VoiceRecord::new(format!("{lang}/{voice_id}"), name, gender, Some(lang.as_str()))
                        .with_age(voice.age.unwrap_or(0))
                        .with_identifier(voice.config),
                );
            }
        }
        Ok(Self::new(records))
    }

    pub fn len(&self) -> usize {
        self.voices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.voices.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &VoiceRecord> {
        self.voices.iter()
    }

    /// Exact, case-sensitive name lookup.
    pub fn find_by_name(&self, name: &str) -> Option<&VoiceRecord> {
        self.by_name.get(name).map(|&i| &self.voices[i])
    }

    /// First voice, in enumeration order, whose gender satisfies `gender` and
    /// whose locale equals `locale` exactly. An empty locale means `en_US`.
    pub fn find_match(&self, gender: Gender, locale: &str) -> Option<&VoiceRecord> {
        let locale = if locale.is_empty() { DEFAULT_LOCALE } else { locale };
        self.voices
            .iter()
            .find(|v| gender.accepts(v.gender) && v.locale.as_deref() == Some(locale))
    }

    /// Resolve a request's voice: explicit name, then gender/locale match,
    /// then the `fallback` name.
    pub fn resolve(&self, query: &VoiceQuery, fallback: &str) -> Result<&VoiceRecord, ResolveError> {
        if let Some(name) = query.name.as_deref().filter(|n| !n.is_empty()) {
            return self
                .find_by_name(name)
                .ok_or_else(|| ResolveError::NoSuchVoice(name.to_string()));
        }

        let locale = query.locale.as_deref().unwrap_or_default();
        if query.gender != Gender::Unspecified || !locale.is_empty() {
            return self.find_match(query.gender, locale).ok_or_else(|| ResolveError::NoMatch {
                gender: query.gender,
                locale: if locale.is_empty() { DEFAULT_LOCALE } else { locale }.to_string(),
            });
        }

        self.find_by_name(fallback)
            .ok_or_else(|| ResolveError::NoFallback(fallback.to_string()))
    }
}

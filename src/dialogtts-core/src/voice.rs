//! Voice identity definitions.
//!
//! A voice is one concrete synthesizable identity, owned by a single backend
//! and tagged with the gender it is used for.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Gender of a speaker, and of the voices that may speak for them.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    Male,
    Female,
}

impl Gender {
    pub const ALL: [Gender; 2] = [Gender::Male, Gender::Female];

    pub fn as_str(&self) -> &'static str {
        match self {
            Gender::Male => "male",
            Gender::Female => "female",
        }
    }
}

impl fmt::Display for Gender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Speech synthesis backend a voice belongs to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Google Translate speech endpoint.
    Google,
    /// ElevenLabs AI voices.
    ElevenLabs,
}

impl BackendKind {
    pub const ALL: [BackendKind; 2] = [BackendKind::Google, BackendKind::ElevenLabs];

    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Google => "google",
            BackendKind::ElevenLabs => "elevenlabs",
        }
    }

    /// Voice parameters every voice of this backend must define.
    pub fn required_params(&self) -> &'static [&'static str] {
        match self {
            BackendKind::Google => &[],
            BackendKind::ElevenLabs => &["voice_id"],
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        BackendKind::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| {
                format!(
                    "unknown backend '{}' (expected one of: {})",
                    s,
                    BackendKind::ALL.map(|k| k.as_str()).join(", ")
                )
            })
    }
}

/// A synthesizable voice from the catalog. Immutable once loaded.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VoiceIdentity {
    /// Display name, unique within a catalog.
    pub name: String,
    /// Backend that owns this voice.
    pub backend: BackendKind,
    /// Gender this voice speaks for.
    pub gender: Gender,
    /// Backend-specific parameters (e.g. `tld` for Google, `voice_id` for ElevenLabs).
    #[serde(default)]
    pub params: BTreeMap<String, String>,
}

impl VoiceIdentity {
    /// Create a new voice without backend parameters.
    pub fn new(name: impl Into<String>, backend: BackendKind, gender: Gender) -> Self {
        Self {
            name: name.into(),
            backend,
            gender,
            params: BTreeMap::new(),
        }
    }

    /// Add a backend-specific parameter.
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    /// Get the display name with its backend.
    pub fn display_name_with_backend(&self) -> String {
        format!("{} ({})", self.name, self.backend)
    }
}

//! Voice catalog loading and validation.
//!
//! The catalog file is the single source of truth for which voices exist.
//! It is read once at startup (TOML, or JSON when the file ends in `.json`)
//! and is read-only afterwards.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fs;
use std::path::Path;
use std::sync::Arc;

use serde::Deserialize;

use crate::error::DialogueError;
use crate::voice::{BackendKind, Gender, VoiceIdentity};

/// Root structure of a catalog file.
#[derive(Debug, Clone, Deserialize)]
struct CatalogFile {
    #[serde(default, alias = "provider_weights")]
    weights: BTreeMap<String, f64>,
    voices: BTreeMap<String, Vec<VoiceEntry>>,
}

/// One voice as written in the catalog file.
#[derive(Debug, Clone, Deserialize)]
struct VoiceEntry {
    name: String,
    #[serde(alias = "provider")]
    backend: String,
    /// Every other key is a backend-specific parameter.
    #[serde(flatten)]
    params: BTreeMap<String, String>,
}

/// Validated, immutable table of voices grouped by gender.
#[derive(Debug, Clone)]
pub struct VoiceCatalog {
    voices: BTreeMap<Gender, Vec<Arc<VoiceIdentity>>>,
    weights: BTreeMap<BackendKind, f64>,
}

impl VoiceCatalog {
    /// Load the catalog from a TOML or JSON file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, DialogueError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            DialogueError::Config(format!(
                "Failed to read voice catalog {}: {}",
                path.display(),
                e
            ))
        })?;

        let is_json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        if is_json {
            Self::from_json_str(&content)
        } else {
            Self::from_toml_str(&content)
        }
    }

    /// Parse a catalog from TOML content.
    pub fn from_toml_str(content: &str) -> Result<Self, DialogueError> {
        let file: CatalogFile = toml::from_str(content).map_err(|e| {
            DialogueError::Config(format!("Failed to parse voice catalog: {}", e))
        })?;
        Self::from_file(file)
    }

    /// Parse a catalog from JSON content.
    pub fn from_json_str(content: &str) -> Result<Self, DialogueError> {
        let file: CatalogFile = serde_json::from_str(content).map_err(|e| {
            DialogueError::Config(format!("Failed to parse voice catalog: {}", e))
        })?;
        Self::from_file(file)
    }

    fn from_file(file: CatalogFile) -> Result<Self, DialogueError> {
        let mut voices = Vec::new();
        for (gender_key, entries) in file.voices {
            let gender = parse_gender(&gender_key)?;
            for entry in entries {
                let backend = entry.backend.parse::<BackendKind>().map_err(|e| {
                    DialogueError::Config(format!("Voice '{}': {}", entry.name, e))
                })?;
                voices.push(VoiceIdentity {
                    name: entry.name,
                    backend,
                    gender,
                    params: entry.params,
                });
            }
        }

        let mut weights = BTreeMap::new();
        for (backend_key, weight) in file.weights {
            let backend = backend_key
                .parse::<BackendKind>()
                .map_err(|e| DialogueError::Config(format!("Backend weights: {}", e)))?;
            weights.insert(backend, weight);
        }

        Self::from_voices(voices, weights)
    }

    /// Build a catalog from already-constructed voices, applying the same
    /// validation as a file load.
    pub fn from_voices(
        voices: Vec<VoiceIdentity>,
        weights: BTreeMap<BackendKind, f64>,
    ) -> Result<Self, DialogueError> {
        for (backend, weight) in &weights {
            if !weight.is_finite() || *weight < 0.0 {
                return Err(DialogueError::Config(format!(
                    "Weight for backend '{}' must be a non-negative number, got {}",
                    backend, weight
                )));
            }
        }

        let mut seen = HashSet::new();
        let mut grouped: BTreeMap<Gender, Vec<Arc<VoiceIdentity>>> = BTreeMap::new();
        for voice in voices {
            validate_voice(&voice)?;
            if !seen.insert(voice.name.clone()) {
                return Err(DialogueError::Config(format!(
                    "Duplicate voice name '{}' in catalog",
                    voice.name
                )));
            }
            grouped.entry(voice.gender).or_default().push(Arc::new(voice));
        }

        for gender in Gender::ALL {
            if grouped.get(&gender).is_none_or(|list| list.is_empty()) {
                return Err(DialogueError::Config(format!(
                    "Voice catalog defines no voices for gender '{}'",
                    gender
                )));
            }
        }

        Ok(Self {
            voices: grouped,
            weights,
        })
    }

    /// Voices for a gender, in catalog order.
    pub fn voices(&self, gender: Gender) -> &[Arc<VoiceIdentity>] {
        self.voices.get(&gender).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Iterate over every voice in the catalog.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<VoiceIdentity>> {
        self.voices.values().flatten()
    }

    pub fn len(&self) -> usize {
        self.voices.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Find a voice by its catalog name.
    pub fn find(&self, name: &str) -> Option<&Arc<VoiceIdentity>> {
        self.iter().find(|voice| voice.name == name)
    }

    /// Backends referenced by at least one voice.
    pub fn backends(&self) -> BTreeSet<BackendKind> {
        self.iter().map(|voice| voice.backend).collect()
    }

    /// Raw configured weights.
    pub fn weights(&self) -> &BTreeMap<BackendKind, f64> {
        &self.weights
    }

    /// Configured weights restricted to `backends` and normalized to sum to 1.
    ///
    /// Backends without a configured weight get zero. If every backend in the
    /// set ends up at zero, weight is spread uniformly over the set instead.
    pub fn weights_for(&self, backends: &BTreeSet<BackendKind>) -> BTreeMap<BackendKind, f64> {
        if backends.is_empty() {
            return BTreeMap::new();
        }

        let restricted: BTreeMap<BackendKind, f64> = backends
            .iter()
            .map(|backend| (*backend, self.weights.get(backend).copied().unwrap_or(0.0)))
            .collect();
        let total: f64 = restricted.values().sum();

        if total > 0.0 {
            restricted
                .into_iter()
                .map(|(backend, weight)| (backend, weight / total))
                .collect()
        } else {
            let uniform = 1.0 / backends.len() as f64;
            backends.iter().map(|backend| (*backend, uniform)).collect()
        }
    }
}

fn parse_gender(key: &str) -> Result<Gender, DialogueError> {
    Gender::ALL
        .into_iter()
        .find(|gender| gender.as_str() == key)
        .ok_or_else(|| {
            DialogueError::Config(format!(
                "Unknown gender '{}' in voice catalog (expected 'male' or 'female')",
                key
            ))
        })
}

fn validate_voice(voice: &VoiceIdentity) -> Result<(), DialogueError> {
    if voice.name.trim().is_empty() {
        return Err(DialogueError::Config(
            "Voice catalog contains a voice with an empty name".to_string(),
        ));
    }

    for key in voice.backend.required_params() {
        if voice.param(key).is_none_or(|value| value.trim().is_empty()) {
            return Err(DialogueError::Config(format!(
                "Voice '{}' ({}) is missing required parameter '{}'",
                voice.name, voice.backend, key
            )));
        }
    }

    Ok(())
}

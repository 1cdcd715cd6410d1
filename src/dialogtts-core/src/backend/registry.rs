//! Backend registry.
//!
//! Maps backend kinds to factories, builds every backend once at startup and
//! remembers which ones are usable for the run.

use std::collections::{BTreeMap, BTreeSet};

use tracing::{info, warn};

use crate::backend::{BackendSettings, ElevenLabsBackend, GoogleBackend, SpeechBackend};
use crate::error::{BackendError, DialogueError};
use crate::voice::{BackendKind, VoiceIdentity};

/// Constructor for one backend.
pub type BackendFactory =
    Box<dyn Fn(&BackendSettings) -> Result<Box<dyn SpeechBackend>, BackendError> + Send + Sync>;

/// Registered backend factories and the backends built from them.
pub struct BackendRegistry {
    factories: BTreeMap<BackendKind, BackendFactory>,
    backends: BTreeMap<BackendKind, Box<dyn SpeechBackend>>,
    unavailable: BTreeMap<BackendKind, String>,
}

impl BackendRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            factories: BTreeMap::new(),
            backends: BTreeMap::new(),
            unavailable: BTreeMap::new(),
        }
    }

    /// Registry with every built-in backend registered.
    pub fn with_default_backends() -> Self {
        let mut registry = Self::new();
        registry.factories.insert(
            BackendKind::Google,
            Box::new(
                |settings: &BackendSettings| -> Result<Box<dyn SpeechBackend>, BackendError> {
                    Ok(Box::new(GoogleBackend::new(settings)?))
                },
            ),
        );
        registry.factories.insert(
            BackendKind::ElevenLabs,
            Box::new(
                |settings: &BackendSettings| -> Result<Box<dyn SpeechBackend>, BackendError> {
                    Ok(Box::new(ElevenLabsBackend::new(settings)?))
                },
            ),
        );
        registry
    }

    /// Register a factory.
    pub fn register(
        &mut self,
        kind: BackendKind,
        factory: BackendFactory,
    ) -> Result<(), DialogueError> {
        if self.factories.contains_key(&kind) || self.backends.contains_key(&kind) {
            return Err(DialogueError::Config(format!(
                "Backend {} already registered",
                kind
            )));
        }
        self.factories.insert(kind, factory);
        Ok(())
    }

    /// Drop every registered backend not in `kinds`.
    pub fn retain(&mut self, kinds: &BTreeSet<BackendKind>) {
        self.factories.retain(|kind, _| kinds.contains(kind));
        self.backends.retain(|kind, _| kinds.contains(kind));
    }

    /// Build every registered backend once.
    ///
    /// A factory that fails marks its backend unavailable with a warning;
    /// it never aborts the run.
    pub fn initialize(&mut self, settings: &BackendSettings) -> BTreeSet<BackendKind> {
        for (kind, factory) in std::mem::take(&mut self.factories) {
            match factory(settings) {
                Ok(backend) => {
                    info!(backend = %kind, "backend ready");
                    self.unavailable.remove(&kind);
                    self.backends.insert(kind, backend);
                }
                Err(e) => {
                    warn!(backend = %kind, error = %e, "backend unavailable");
                    self.unavailable.insert(kind, e.to_string());
                }
            }
        }
        self.available_backends()
    }

    /// Backends that were built successfully.
    pub fn available_backends(&self) -> BTreeSet<BackendKind> {
        self.backends.keys().copied().collect()
    }

    /// Backends that failed to build, with the reason.
    pub fn unavailable(&self) -> &BTreeMap<BackendKind, String> {
        &self.unavailable
    }

    pub fn is_available(&self, kind: BackendKind) -> bool {
        self.backends.contains_key(&kind)
    }

    pub fn get(&self, kind: BackendKind) -> Option<&dyn SpeechBackend> {
        self.backends.get(&kind).map(|backend| &**backend)
    }

    /// Send one utterance to the backend owning `voice`.
    pub async fn dispatch(
        &self,
        text: &str,
        voice: &VoiceIdentity,
    ) -> Result<Vec<u8>, BackendError> {
        let backend = self.get(voice.backend).ok_or_else(|| BackendError::Unavailable {
            backend: voice.backend,
            message: self
                .unavailable
                .get(&voice.backend)
                .cloned()
                .unwrap_or_else(|| "not registered".to_string()),
        })?;
        backend.synthesize(text, &voice.params).await
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::new()
    }
}

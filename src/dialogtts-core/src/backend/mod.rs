//! Speech synthesis backends.
//!
//! Each backend wraps one external service behind the [`SpeechBackend`]
//! trait. Backends are built by the [`BackendRegistry`] from
//! [`BackendSettings`]; a backend that cannot be built (missing credentials,
//! bad configuration) is simply left out of the run.

pub mod elevenlabs;
pub mod google;
pub mod registry;

use std::collections::BTreeMap;
use std::env;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::BackendError;
use crate::voice::BackendKind;

pub use elevenlabs::ElevenLabsBackend;
pub use google::GoogleBackend;
pub use registry::{BackendFactory, BackendRegistry};

/// Environment variable holding the ElevenLabs API key.
pub const ELEVENLABS_API_KEY_ENV: &str = "ELEVENLABS_API_KEY";

/// One speech synthesis service.
#[async_trait]
pub trait SpeechBackend: Send + Sync {
    /// Which backend this is.
    fn kind(&self) -> BackendKind;

    /// Synthesize `text` with the voice described by `params` and return
    /// the encoded MP3 bytes.
    async fn synthesize(
        &self,
        text: &str,
        params: &BTreeMap<String, String>,
    ) -> Result<Vec<u8>, BackendError>;
}

/// Settings shared by all backends.
#[derive(Debug, Clone)]
pub struct BackendSettings {
    /// Language hint (e.g. "en", "es").
    pub lang: String,
    /// Default Google domain when a voice does not set `tld`.
    pub tld: String,
    /// Per-request timeout.
    pub timeout: Duration,
    /// Extra attempts for retryable failures.
    pub retries: u32,
    pub elevenlabs_api_key: Option<String>,
    pub elevenlabs_model: String,
    pub elevenlabs_base_url: String,
}

impl Default for BackendSettings {
    fn default() -> Self {
        Self {
            lang: "en".to_string(),
            tld: "com".to_string(),
            timeout: Duration::from_secs(30),
            retries: 2,
            elevenlabs_api_key: None,
            elevenlabs_model: "eleven_monolingual_v1".to_string(),
            elevenlabs_base_url: "https://api.elevenlabs.io".to_string(),
        }
    }
}

impl BackendSettings {
    /// Defaults plus credentials found in the environment.
    pub fn from_env() -> Self {
        Self {
            elevenlabs_api_key: env::var(ELEVENLABS_API_KEY_ENV)
                .ok()
                .filter(|key| !key.trim().is_empty()),
            ..Self::default()
        }
    }

    pub fn with_lang(mut self, lang: impl Into<String>) -> Self {
        self.lang = lang.into();
        self
    }

    pub fn with_tld(mut self, tld: impl Into<String>) -> Self {
        self.tld = tld.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn with_elevenlabs_api_key(mut self, key: impl Into<String>) -> Self {
        self.elevenlabs_api_key = Some(key.into());
        self
    }
}

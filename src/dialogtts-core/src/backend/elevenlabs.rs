//! ElevenLabs AI voice backend.

use std::collections::BTreeMap;

use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::{ACCEPT, HeaderValue};
use serde::Serialize;

use crate::backend::{BackendSettings, ELEVENLABS_API_KEY_ENV, SpeechBackend};
use crate::error::BackendError;
use crate::voice::BackendKind;

const XI_API_KEY_HEADER: &str = "xi-api-key";

pub struct ElevenLabsBackend {
    client: Client,
    api_key: String,
    model_id: String,
    base_url: String,
}

#[derive(Debug, Serialize)]
struct SpeechRequest<'a> {
    text: &'a str,
    model_id: &'a str,
}

impl ElevenLabsBackend {
    /// Build the backend. Fails when no API key is configured.
    pub fn new(settings: &BackendSettings) -> Result<Self, BackendError> {
        let api_key = settings
            .elevenlabs_api_key
            .clone()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| BackendError::Unavailable {
                backend: BackendKind::ElevenLabs,
                message: format!("API key not provided; set {}", ELEVENLABS_API_KEY_ENV),
            })?;

        let client = Client::builder()
            .timeout(settings.timeout)
            .build()
            .map_err(|e| BackendError::Unavailable {
                backend: BackendKind::ElevenLabs,
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            api_key,
            model_id: settings.elevenlabs_model.clone(),
            base_url: settings.elevenlabs_base_url.trim_end_matches('/').to_string(),
        })
    }

    fn endpoint(&self, voice_id: &str) -> String {
        format!("{}/v1/text-to-speech/{}", self.base_url, voice_id)
    }
}

#[async_trait]
impl SpeechBackend for ElevenLabsBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::ElevenLabs
    }

    async fn synthesize(
        &self,
        text: &str,
        params: &BTreeMap<String, String>,
    ) -> Result<Vec<u8>, BackendError> {
        let voice_id = params
            .get("voice_id")
            .map(|id| id.trim())
            .filter(|id| !id.is_empty() && id.chars().all(|c| c.is_ascii_alphanumeric()))
            .ok_or_else(|| BackendError::InvalidVoice {
                backend: BackendKind::ElevenLabs,
                message: "voice_id missing or malformed".to_string(),
            })?;
        let model_id = params
            .get("model_id")
            .map(String::as_str)
            .unwrap_or(&self.model_id);

        let response = self
            .client
            .post(self.endpoint(voice_id))
            .header(XI_API_KEY_HEADER, &self.api_key)
            .header(ACCEPT, HeaderValue::from_static("audio/mpeg"))
            .json(&SpeechRequest { text, model_id })
            .send()
            .await
            .map_err(|e| BackendError::from_reqwest(BackendKind::ElevenLabs, e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::Request {
                backend: BackendKind::ElevenLabs,
                message: if body.is_empty() {
                    status.to_string()
                } else {
                    body
                },
                status: Some(status.as_u16()),
            });
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| BackendError::from_reqwest(BackendKind::ElevenLabs, e))?;
        Ok(bytes.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_requires_api_key() {
        let settings = BackendSettings::default();
        match ElevenLabsBackend::new(&settings) {
            Err(BackendError::Unavailable { backend, message }) => {
                assert_eq!(backend, BackendKind::ElevenLabs);
                assert!(message.contains(ELEVENLABS_API_KEY_ENV));
            }
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("backend should not build without a key"),
        }

        let blank = BackendSettings::default().with_elevenlabs_api_key("   ");
        assert!(ElevenLabsBackend::new(&blank).is_err());
    }

    #[test]
    fn test_endpoint_uses_voice_id() {
        let settings = BackendSettings {
            elevenlabs_base_url: "https://example.test/".to_string(),
            ..BackendSettings::default().with_elevenlabs_api_key("key")
        };
        let backend = ElevenLabsBackend::new(&settings).unwrap();
        assert_eq!(
            backend.endpoint("abc123"),
            "https://example.test/v1/text-to-speech/abc123"
        );
    }

    #[tokio::test]
    async fn test_missing_voice_id_is_rejected_before_request() {
        let settings = BackendSettings::default().with_elevenlabs_api_key("key");
        let backend = ElevenLabsBackend::new(&settings).unwrap();
        let err = backend.synthesize("Hello", &BTreeMap::new()).await.unwrap_err();
        assert!(matches!(err, BackendError::InvalidVoice { .. }));

        let params = BTreeMap::from([("voice_id".to_string(), "../admin".to_string())]);
        let err = backend.synthesize("Hello", &params).await.unwrap_err();
        assert!(matches!(err, BackendError::InvalidVoice { .. }));
    }
}

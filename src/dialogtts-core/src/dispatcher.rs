//! Synthesis dispatch.
//!
//! Routes one utterance to the backend owning the chosen voice and lands the
//! returned audio in a uniquely named temporary file.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::backend::BackendRegistry;
use crate::error::{BackendError, DialogueError};
use crate::voice::{BackendKind, VoiceIdentity};

/// Audio produced for one line, not yet given its final name.
///
/// The file is deleted when the handle is dropped without being persisted.
#[derive(Debug)]
pub struct TempAudioHandle {
    file: NamedTempFile,
    backend: BackendKind,
    voice_name: String,
}

impl TempAudioHandle {
    pub fn path(&self) -> &Path {
        self.file.path()
    }

    pub fn backend(&self) -> BackendKind {
        self.backend
    }

    pub fn voice_name(&self) -> &str {
        &self.voice_name
    }

    /// Move the clip to `dest`, replacing any existing file.
    pub fn persist(self, dest: &Path) -> Result<PathBuf, DialogueError> {
        self.file
            .persist(dest)
            .map_err(|e| DialogueError::io(dest, e.error))?;
        Ok(dest.to_path_buf())
    }
}

pub struct SynthesisDispatcher {
    registry: BackendRegistry,
    scratch_dir: PathBuf,
    retries: u32,
    retry_base: Duration,
    sequence: AtomicU64,
}

impl SynthesisDispatcher {
    /// Dispatcher writing temporary clips under `scratch_dir`.
    pub fn new(registry: BackendRegistry, scratch_dir: impl Into<PathBuf>) -> Self {
        Self {
            registry,
            scratch_dir: scratch_dir.into(),
            retries: 0,
            retry_base: Duration::from_secs(1),
            sequence: AtomicU64::new(0),
        }
    }

    /// Retry retryable failures up to `retries` times, doubling the delay
    /// from `base_delay` on each attempt.
    pub fn with_retries(mut self, retries: u32, base_delay: Duration) -> Self {
        self.retries = retries;
        self.retry_base = base_delay;
        self
    }

    pub fn registry(&self) -> &BackendRegistry {
        &self.registry
    }

    pub fn scratch_dir(&self) -> &Path {
        &self.scratch_dir
    }

    /// Synthesize `text` with `voice` into a fresh temporary file.
    pub async fn synthesize(
        &self,
        text: &str,
        voice: &VoiceIdentity,
    ) -> Result<TempAudioHandle, DialogueError> {
        let audio = self.dispatch_with_retry(text, voice).await?;
        if audio.is_empty() {
            return Err(BackendError::Response {
                backend: voice.backend,
                message: "empty audio".to_string(),
            }
            .into());
        }

        fs::create_dir_all(&self.scratch_dir)
            .map_err(|e| DialogueError::io(&self.scratch_dir, e))?;

        let seq = self.sequence.fetch_add(1, Ordering::Relaxed);
        let mut file = tempfile::Builder::new()
            .prefix(&format!("tmp_{}_{:06}_", voice.backend, seq))
            .suffix(".mp3")
            .tempfile_in(&self.scratch_dir)
            .map_err(|e| DialogueError::io(&self.scratch_dir, e))?;
        file.write_all(&audio)
            .and_then(|_| file.flush())
            .map_err(|e| DialogueError::io(file.path(), e))?;

        debug!(
            voice = %voice.name,
            backend = %voice.backend,
            bytes = audio.len(),
            path = %file.path().display(),
            "clip synthesized"
        );

        Ok(TempAudioHandle {
            file,
            backend: voice.backend,
            voice_name: voice.name.clone(),
        })
    }

    async fn dispatch_with_retry(
        &self,
        text: &str,
        voice: &VoiceIdentity,
    ) -> Result<Vec<u8>, BackendError> {
        let mut attempt = 0;
        loop {
            match self.registry.dispatch(text, voice).await {
                Ok(audio) => return Ok(audio),
                Err(e) if e.is_retryable() && attempt < self.retries => {
                    // 1x, 2x, 4x ... the base delay
                    let delay = self.retry_base * (1 << attempt.min(16));
                    warn!(
                        backend = %voice.backend,
                        attempt = attempt + 1,
                        error = %e,
                        "retrying in {:?}",
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

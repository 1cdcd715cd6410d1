//! Conversation pipeline.
//!
//! Runs one conversation line by line: pick a voice, synthesize, measure,
//! place the clip on the timeline. A failed line is reported and skipped;
//! the rest of the conversation still gets processed.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::audio::AudioTools;
use crate::backend::BackendRegistry;
use crate::catalog::VoiceCatalog;
use crate::conversation::{
    Conversation, DialogueLine, Speaker, VoiceAssignment, generate_dialog_id,
};
use crate::dispatcher::SynthesisDispatcher;
use crate::error::DialogueError;
use crate::selector::{SelectionPolicy, VoiceSelector};
use crate::voice::{BackendKind, VoiceIdentity};

/// Name of the merged track inside a conversation directory.
pub const MERGED_AUDIO_FILE: &str = "output.mp3";
/// Name of the manifest inside a conversation directory.
pub const MANIFEST_FILE: &str = "output.json";

/// Callback for pipeline events.
pub type PipelineCallback = Box<dyn Fn(PipelineEvent) + Send + Sync>;

/// Events emitted while a conversation is processed.
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    /// No id was supplied, so one was generated.
    DialogIdGenerated { dialog_id: String },
    /// Processing of a conversation is starting.
    ConversationStart { dialog_id: String, lines: usize },
    /// A line was synthesized and placed on the timeline.
    LineSynthesized {
        index: usize,
        speaker: String,
        voice: String,
        backend: BackendKind,
        start_time: f64,
        duration: f64,
    },
    /// A line could not be produced and was skipped.
    LineFailed {
        index: usize,
        speaker: String,
        error: String,
    },
    /// The successful clips were joined into one track.
    Merged { path: PathBuf, clips: usize },
    /// The conversation is done.
    ConversationEnd {
        dialog_id: String,
        synthesized: usize,
        failed: usize,
        total_duration: f64,
    },
}

/// Result of processing one conversation; serialized as the manifest.
#[derive(Debug, Clone, Serialize)]
pub struct ConversationOutput {
    pub dialog_id: String,
    pub speakers: Vec<Speaker>,
    pub total_duration: f64,
    pub lines: Vec<DialogueLine>,
    pub output_directory: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub merged_audio_file: Option<String>,
}

impl ConversationOutput {
    pub fn synthesized_lines(&self) -> usize {
        self.lines.iter().filter(|line| line.is_synthesized()).count()
    }
}

/// Turns conversations into clips, a merged track and a manifest.
pub struct ConversationPipeline {
    catalog: VoiceCatalog,
    dispatcher: SynthesisDispatcher,
    policy: SelectionPolicy,
    output_dir: PathBuf,
    audio: Box<dyn AudioTools>,
    seed: Option<u64>,
    conversations: u64,
    callback: Option<PipelineCallback>,
}

impl ConversationPipeline {
    /// Create a pipeline over an initialized registry.
    ///
    /// Fails if the available backends leave any gender without a voice.
    pub fn new(
        catalog: VoiceCatalog,
        registry: BackendRegistry,
        policy: SelectionPolicy,
        output_dir: impl Into<PathBuf>,
        audio: Box<dyn AudioTools>,
    ) -> Result<Self, DialogueError> {
        VoiceSelector::seeded(policy, &catalog, &registry.available_backends(), 0)?;

        let output_dir = output_dir.into();
        Ok(Self {
            catalog,
            dispatcher: SynthesisDispatcher::new(registry, output_dir.clone()),
            policy,
            output_dir,
            audio,
            seed: None,
            conversations: 0,
            callback: None,
        })
    }

    /// Make voice choices reproducible. Each conversation still gets its own
    /// selector, seeded from `seed` and its position in the run.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Set a callback for pipeline events.
    pub fn with_callback(mut self, callback: PipelineCallback) -> Self {
        self.callback = Some(callback);
        self
    }

    /// Retry retryable backend failures.
    pub fn with_retries(mut self, retries: u32, base_delay: Duration) -> Self {
        self.dispatcher = self.dispatcher.with_retries(retries, base_delay);
        self
    }

    pub fn available_backends(&self) -> BTreeSet<BackendKind> {
        self.dispatcher.registry().available_backends()
    }

    pub fn policy(&self) -> SelectionPolicy {
        self.policy
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Process one conversation.
    ///
    /// Invalid input or an unvoiceable speaker fails the whole conversation;
    /// a failure on a single line only skips that line.
    pub async fn process(
        &mut self,
        conversation: &Conversation,
    ) -> Result<ConversationOutput, DialogueError> {
        conversation.validate()?;
        let mut lines = conversation.lines()?;

        let dialog_id = match &conversation.dialog_id {
            Some(id) => id.trim().to_string(),
            None => {
                let id = generate_dialog_id();
                warn!(dialog_id = %id, "no dialog_id given, generated one");
                self.emit_event(PipelineEvent::DialogIdGenerated {
                    dialog_id: id.clone(),
                });
                id
            }
        };

        let mut selector = self.new_selector()?;

        let conversation_dir = self.output_dir.join(&dialog_id);
        let audio_dir = conversation_dir.join("audio");
        fs::create_dir_all(&audio_dir).map_err(|e| DialogueError::io(&audio_dir, e))?;

        info!(dialog_id = %dialog_id, lines = lines.len(), policy = %self.policy, "processing conversation");
        self.emit_event(PipelineEvent::ConversationStart {
            dialog_id: dialog_id.clone(),
            lines: lines.len(),
        });

        let mut running_total = 0.0;
        let mut clips = Vec::new();
        let mut failed = 0;

        for line in &mut lines {
            let gender = conversation.speaker_gender(&line.speaker).ok_or_else(|| {
                DialogueError::Config(format!("Undeclared speaker '{}'", line.speaker))
            })?;
            let voice = selector.select(&line.speaker, gender)?;

            let file_name = format!("{}_{}.mp3", dialog_id, line.index);
            let dest = audio_dir.join(&file_name);

            match self.render_line(&line.text, &voice, &dest).await {
                Ok(duration) => {
                    line.start_time = running_total;
                    line.duration = duration;
                    line.audio_file = Some(file_name);
                    line.voice = Some(VoiceAssignment {
                        name: voice.name.clone(),
                        backend: voice.backend,
                    });
                    running_total += duration;
                    clips.push(dest);

                    debug!(index = line.index, voice = %voice.name, duration, "line done");
                    self.emit_event(PipelineEvent::LineSynthesized {
                        index: line.index,
                        speaker: line.speaker.clone(),
                        voice: voice.name.clone(),
                        backend: voice.backend,
                        start_time: line.start_time,
                        duration,
                    });
                }
                Err(e) => {
                    failed += 1;
                    warn!(
                        index = line.index,
                        speaker = %line.speaker,
                        voice = %voice.display_name_with_backend(),
                        error = %e,
                        "skipping line"
                    );
                    self.emit_event(PipelineEvent::LineFailed {
                        index: line.index,
                        speaker: line.speaker.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }

        let merged_audio_file = self.merge(&clips, &conversation_dir.join(MERGED_AUDIO_FILE));

        self.emit_event(PipelineEvent::ConversationEnd {
            dialog_id: dialog_id.clone(),
            synthesized: clips.len(),
            failed,
            total_duration: running_total,
        });
        info!(
            dialog_id = %dialog_id,
            synthesized = clips.len(),
            failed,
            total_duration = running_total,
            "conversation processed"
        );

        Ok(ConversationOutput {
            dialog_id,
            speakers: conversation.speakers.clone(),
            total_duration: running_total,
            lines,
            output_directory: conversation_dir.display().to_string(),
            merged_audio_file,
        })
    }

    /// Write the manifest into the conversation's directory.
    pub fn write_manifest(&self, output: &ConversationOutput) -> Result<PathBuf, DialogueError> {
        let dir = Path::new(&output.output_directory);
        fs::create_dir_all(dir).map_err(|e| DialogueError::io(dir, e))?;

        let path = dir.join(MANIFEST_FILE);
        let json = serde_json::to_string_pretty(output)?;
        fs::write(&path, json).map_err(|e| DialogueError::io(&path, e))?;
        debug!(path = %path.display(), "manifest written");
        Ok(path)
    }

    fn new_selector(&mut self) -> Result<VoiceSelector, DialogueError> {
        let available = self.available_backends();
        let selector = match self.seed {
            Some(seed) => VoiceSelector::seeded(
                self.policy,
                &self.catalog,
                &available,
                seed.wrapping_add(self.conversations),
            ),
            None => VoiceSelector::from_os_rng(self.policy, &self.catalog, &available),
        }?;
        self.conversations += 1;
        Ok(selector)
    }

    /// Synthesize, measure and store one clip. Nothing is kept on failure.
    async fn render_line(
        &self,
        text: &str,
        voice: &VoiceIdentity,
        dest: &Path,
    ) -> Result<f64, DialogueError> {
        let handle = self.dispatcher.synthesize(text, voice).await?;
        let duration = self.audio.duration(handle.path())?;
        if !duration.is_finite() || duration < 0.0 {
            return Err(DialogueError::Audio(format!(
                "Invalid clip duration {}",
                duration
            )));
        }
        handle.persist(dest)?;
        Ok(duration)
    }

    fn merge(&self, clips: &[PathBuf], dest: &Path) -> Option<String> {
        if clips.is_empty() {
            warn!("no clips synthesized, skipping merged track");
            return None;
        }
        match self.audio.concatenate(clips, dest) {
            Ok(()) => {
                self.emit_event(PipelineEvent::Merged {
                    path: dest.to_path_buf(),
                    clips: clips.len(),
                });
                Some(MERGED_AUDIO_FILE.to_string())
            }
            Err(e) => {
                warn!(error = %e, "failed to build merged track");
                None
            }
        }
    }

    fn emit_event(&self, event: PipelineEvent) {
        if let Some(ref callback) = self.callback {
            callback(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::audio::testing::ByteClockTools;
    use crate::backend::registry::testing::echo_registry;
    use crate::voice::Gender;

    fn catalog() -> VoiceCatalog {
        VoiceCatalog::from_toml_str(
            r#"
            [weights]
            google = 1.0

            [[voices.female]]
            name = "us"
            backend = "google"
            tld = "com"

            [[voices.male]]
            name = "uk"
            backend = "google"
            tld = "co.uk"

            [[voices.male]]
            name = "adam"
            backend = "elevenlabs"
            voice_id = "pNInz6obpgDQGcFmaJgB"
            "#,
        )
        .unwrap()
    }

    fn pipeline(dir: &Path) -> ConversationPipeline {
        ConversationPipeline::new(
            catalog(),
            echo_registry(&[BackendKind::Google]),
            SelectionPolicy::Fixed,
            dir,
            Box::new(ByteClockTools),
        )
        .unwrap()
        .with_seed(7)
    }

    fn conversation(content: &str) -> Conversation {
        Conversation {
            dialog_id: Some("demo".to_string()),
            speakers: vec![
                Speaker::new("Jane", Gender::Female),
                Speaker::new("David", Gender::Male),
            ],
            content: content.to_string(),
        }
    }

    #[tokio::test]
    async fn test_timeline_is_cumulative() {
        let dir = tempfile::tempdir().unwrap();
        let mut pipeline = pipeline(dir.path());

        let output = pipeline
            .process(&conversation("Jane: Hi, David: Hello"))
            .await
            .unwrap();

        let lines = &output.lines;
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].start_time, 0.0);
        assert_eq!(lines[0].duration, 2.0);
        assert_eq!(lines[1].start_time, lines[0].duration);
        assert_eq!(output.total_duration, lines[0].duration + lines[1].duration);
        assert_eq!(lines[0].audio_file.as_deref(), Some("demo_0.mp3"));
        assert_eq!(lines[1].voice.as_ref().unwrap().backend, BackendKind::Google);

        let conversation_dir = dir.path().join("demo");
        assert_eq!(fs::read(conversation_dir.join("audio/demo_1.mp3")).unwrap(), b"Hello");
        assert_eq!(output.merged_audio_file.as_deref(), Some(MERGED_AUDIO_FILE));
        assert_eq!(
            fs::read(conversation_dir.join(MERGED_AUDIO_FILE)).unwrap(),
            b"HiHello"
        );
    }

    #[tokio::test]
    async fn test_failed_line_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        let mut pipeline = pipeline(dir.path()).with_callback(Box::new(move |event| {
            sink.lock().unwrap().push(event);
        }));

        let output = pipeline
            .process(&conversation("Jane: FAIL now, David: Hello"))
            .await
            .unwrap();

        let failed = &output.lines[0];
        assert_eq!((failed.start_time, failed.duration), (0.0, 0.0));
        assert!(failed.audio_file.is_none() && failed.voice.is_none());
        assert_eq!(output.lines[1].start_time, 0.0);
        assert_eq!(output.total_duration, output.lines[1].duration);
        assert_eq!(output.merged_audio_file.as_deref(), Some(MERGED_AUDIO_FILE));
        assert!(!dir.path().join("demo/audio/demo_0.mp3").exists());

        let events = events.lock().unwrap();
        assert!(events.iter().any(|e| matches!(e, PipelineEvent::LineFailed { index: 0, .. })));
        assert!(events.iter().any(|e| matches!(e, PipelineEvent::Merged { clips: 1, .. })));
    }

    #[tokio::test]
    async fn test_all_lines_failing_omits_merged_track() {
        let dir = tempfile::tempdir().unwrap();
        let mut pipeline = pipeline(dir.path());

        let output = pipeline
            .process(&conversation("Jane: FAIL, David: FAIL too"))
            .await
            .unwrap();
        assert_eq!(output.synthesized_lines(), 0);
        assert!(output.merged_audio_file.is_none());
        assert!(!dir.path().join("demo").join(MERGED_AUDIO_FILE).exists());

        let manifest = pipeline.write_manifest(&output).unwrap();
        let json: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&manifest).unwrap()).unwrap();
        assert!(json.get("merged_audio_file").is_none());
        assert_eq!(json["total_duration"], 0.0);
    }

    #[tokio::test]
    async fn test_fixed_policy_reuses_voice_and_manifest_is_written() {
        let dir = tempfile::tempdir().unwrap();
        let mut pipeline = pipeline(dir.path());

        let output = pipeline
            .process(&conversation("David: One. Jane: Two. David: Three."))
            .await
            .unwrap();
        assert_eq!(output.lines[0].voice, output.lines[2].voice);
        // Only Google is available, so the ElevenLabs male voice is never used.
        assert_eq!(output.lines[0].voice.as_ref().unwrap().name, "uk");

        let manifest = pipeline.write_manifest(&output).unwrap();
        assert_eq!(manifest, dir.path().join("demo").join(MANIFEST_FILE));
        let json: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&manifest).unwrap()).unwrap();
        assert_eq!(json["dialog_id"], "demo");
        assert_eq!(json["lines"][1]["speaker"], "Jane");
        assert_eq!(json["lines"][2]["audio_file"], "demo_2.mp3");
        assert_eq!(json["merged_audio_file"], MERGED_AUDIO_FILE);
    }

    #[tokio::test]
    async fn test_missing_dialog_id_is_generated() {
        let dir = tempfile::tempdir().unwrap();
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        let mut pipeline = pipeline(dir.path()).with_callback(Box::new(move |event| {
            sink.lock().unwrap().push(event);
        }));

        let mut input = conversation("Jane: Hi");
        input.dialog_id = None;
        let output = pipeline.process(&input).await.unwrap();

        assert!(output.dialog_id.starts_with("dialog_"));
        assert!(dir.path().join(&output.dialog_id).join("audio").is_dir());
        assert!(events.lock().unwrap().iter().any(|e| matches!(
            e,
            PipelineEvent::DialogIdGenerated { dialog_id } if *dialog_id == output.dialog_id
        )));
    }

    #[tokio::test]
    async fn test_invalid_conversation_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mut pipeline = pipeline(dir.path());

        let err = pipeline
            .process(&conversation("Bob: who am I? Jane: Hi"))
            .await
            .unwrap_err();
        assert!(matches!(err, DialogueError::Config(_)));

        let mut input = conversation("Jane: Hi");
        input.dialog_id = Some("../up".to_string());
        assert!(pipeline.process(&input).await.is_err());
    }

    #[test]
    fn test_new_fails_when_gender_has_no_available_voice() {
        let dir = tempfile::tempdir().unwrap();
        let result = ConversationPipeline::new(
            catalog(),
            echo_registry(&[BackendKind::ElevenLabs]),
            SelectionPolicy::GenderBalanced,
            dir.path(),
            Box::new(ByteClockTools),
        );
        assert!(matches!(result, Err(DialogueError::Config(_))));
    }
}

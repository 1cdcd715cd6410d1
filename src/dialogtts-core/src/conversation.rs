//! Conversation input and parsed dialogue lines.

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use chrono::Local;
use rand::Rng;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::DialogueError;
use crate::voice::{BackendKind, Gender};

/// A declared participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Speaker {
    pub name: String,
    pub gender: Gender,
}

impl Speaker {
    pub fn new(name: impl Into<String>, gender: Gender) -> Self {
        Self {
            name: name.into(),
            gender,
        }
    }
}

/// One input script: speakers plus `Name: utterance` content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dialog_id: Option<String>,
    pub speakers: Vec<Speaker>,
    pub content: String,
}

impl Conversation {
    /// Read and validate a conversation from a JSON file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, DialogueError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| DialogueError::io(path, e))?;
        let conversation: Conversation = serde_json::from_str(&content).map_err(|e| {
            DialogueError::Config(format!("Invalid conversation {}: {}", path.display(), e))
        })?;
        conversation.validate()?;
        Ok(conversation)
    }

    /// Check the schema rules serde cannot express.
    pub fn validate(&self) -> Result<(), DialogueError> {
        if self.speakers.is_empty() {
            return Err(DialogueError::Config(
                "Conversation declares no speakers".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for speaker in &self.speakers {
            let name = speaker.name.trim();
            if name.is_empty() {
                return Err(DialogueError::Config(
                    "Speaker name must not be empty".to_string(),
                ));
            }
            if name.contains(':') {
                return Err(DialogueError::Config(format!(
                    "Speaker name '{}' must not contain ':'",
                    name
                )));
            }
            if !seen.insert(name) {
                return Err(DialogueError::Config(format!(
                    "Speaker '{}' declared twice",
                    name
                )));
            }
        }

        if self.content.trim().is_empty() {
            return Err(DialogueError::Config(
                "Conversation content is empty".to_string(),
            ));
        }

        if let Some(id) = &self.dialog_id {
            validate_dialog_id(id)?;
        }

        Ok(())
    }

    pub fn speaker_gender(&self, name: &str) -> Option<Gender> {
        self.speakers
            .iter()
            .find(|speaker| speaker.name.trim() == name)
            .map(|speaker| speaker.gender)
    }

    /// Split the content into lines spoken by the declared speakers.
    pub fn lines(&self) -> Result<Vec<DialogueLine>, DialogueError> {
        let names: Vec<&str> = self.speakers.iter().map(|s| s.name.trim()).collect();
        let lines = parse_content(&self.content, &names)?;
        if lines.is_empty() {
            return Err(DialogueError::Config(
                "Conversation content has no speaker lines".to_string(),
            ));
        }
        Ok(lines)
    }
}

/// Voice used for a synthesized line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VoiceAssignment {
    pub name: String,
    pub backend: BackendKind,
}

/// One utterance and, once processed, its place on the timeline.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DialogueLine {
    pub index: usize,
    pub speaker: String,
    pub text: String,
    pub start_time: f64,
    pub duration: f64,
    /// Clip file name, relative to the conversation's audio directory.
    pub audio_file: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice: Option<VoiceAssignment>,
}

impl DialogueLine {
    pub fn new(index: usize, speaker: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            index,
            speaker: speaker.into(),
            text: text.into(),
            start_time: 0.0,
            duration: 0.0,
            audio_file: None,
            voice: None,
        }
    }

    pub fn is_synthesized(&self) -> bool {
        self.audio_file.is_some()
    }
}

/// Parse `Name: text` segments for the given speaker names.
///
/// A marker is a declared name followed by `:` at the start of the content
/// or after whitespace, `,` or `;`. Text may itself contain colons, but a
/// speaker-shaped label (up to three capitalized words, then `:`) for a name
/// that is not declared is an error wherever it appears.
pub fn parse_content(content: &str, speakers: &[&str]) -> Result<Vec<DialogueLine>, DialogueError> {
    if speakers.is_empty() {
        return Ok(Vec::new());
    }

    let mut names: Vec<&str> = speakers.to_vec();
    // Longest first so "Ann" never shadows "Anna".
    names.sort_by_key(|name| std::cmp::Reverse(name.len()));
    let alternation = names
        .iter()
        .map(|name| regex::escape(name))
        .collect::<Vec<_>>()
        .join("|");
    let marker = Regex::new(&format!(r"(?:^|[\s,;])({})\s*:", alternation))
        .map_err(|e| DialogueError::Config(format!("Invalid speaker names: {}", e)))?;

    let label = Regex::new(r"(?:^|[\s,;])(\p{Lu}[\w'-]*(?:[ \t]+\p{Lu}[\w'-]*){0,2})\s*:")
        .map_err(|e| DialogueError::Config(format!("Invalid label pattern: {}", e)))?;

    let markers: Vec<(usize, usize, &str)> = marker
        .captures_iter(content)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let name = caps.get(1)?;
            Some((name.start(), whole.end(), name.as_str()))
        })
        .collect();

    let preamble_end = markers.first().map_or(content.len(), |m| m.0);
    let preamble = content[..preamble_end].trim();
    if !preamble.is_empty() {
        reject_undeclared(&label, preamble)?;
        warn!(text = preamble, "skipping text before the first speaker");
    }

    let mut lines = Vec::new();
    for (i, (_, text_start, name)) in markers.iter().enumerate() {
        let text_end = markers.get(i + 1).map_or(content.len(), |next| next.0);
        let text = content[*text_start..text_end]
            .trim()
            .trim_end_matches([',', ';'])
            .trim();
        reject_undeclared(&label, text)?;
        if text.is_empty() {
            warn!(speaker = name, "skipping empty utterance");
            continue;
        }
        lines.push(DialogueLine::new(lines.len(), *name, text));
    }

    Ok(lines)
}

/// Fail on the first speaker-shaped label in `text`. Declared markers have
/// already been split out, so any label left over names an unknown speaker.
fn reject_undeclared(label: &Regex, text: &str) -> Result<(), DialogueError> {
    match label.captures(text).and_then(|caps| caps.get(1)) {
        Some(undeclared) => Err(DialogueError::Config(format!(
            "Undeclared speaker '{}'",
            undeclared.as_str()
        ))),
        None => Ok(()),
    }
}

pub fn validate_dialog_id(id: &str) -> Result<(), DialogueError> {
    let id = id.trim();
    if id.is_empty() {
        return Err(DialogueError::Config("dialog_id must not be empty".to_string()));
    }
    if id.contains(['/', '\\']) || id.contains("..") {
        return Err(DialogueError::Config(format!(
            "dialog_id '{}' must not contain path separators or '..'",
            id
        )));
    }
    Ok(())
}

/// A fresh id of the form `dialog_<YYYYmmdd_HHMMSS>_<8 hex>`.
pub fn generate_dialog_id() -> String {
    let suffix: u32 = rand::rng().random();
    format!(
        "dialog_{}_{:08x}",
        Local::now().format("%Y%m%d_%H%M%S"),
        suffix
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn demo() -> Conversation {
        serde_json::from_str(
            r#"{"dialog_id":"demo","speakers":[{"name":"Jane","gender":"female"},{"name":"David","gender":"male"}],"content":"Jane: Hi, David: Hello"}"#,
        )
        .unwrap()
    }

    #[test]
    fn test_parse_demo_conversation() {
        let conversation = demo();
        conversation.validate().unwrap();
        let lines = conversation.lines().unwrap();

        assert_eq!(lines.len(), 2);
        assert_eq!((lines[0].index, lines[0].speaker.as_str(), lines[0].text.as_str()), (0, "Jane", "Hi"));
        assert_eq!((lines[1].index, lines[1].speaker.as_str(), lines[1].text.as_str()), (1, "David", "Hello"));
        assert!(lines.iter().all(|line| line.audio_file.is_none()));
        assert_eq!(conversation.speaker_gender("David"), Some(Gender::Male));
    }

    #[test]
    fn test_parse_keeps_colons_and_order() {
        let lines = parse_content(
            "Jane: The time is 10:30. David: remember: bring coffee; Jane: Ok",
            &["Jane", "David"],
        )
        .unwrap();
        let texts: Vec<_> = lines.iter().map(|l| l.text.as_str()).collect();
        assert_eq!(texts, vec!["The time is 10:30.", "remember: bring coffee", "Ok"]);
        let speakers: Vec<_> = lines.iter().map(|l| l.speaker.as_str()).collect();
        assert_eq!(speakers, vec!["Jane", "David", "Jane"]);
    }

    #[test]
    fn test_parse_prefers_longest_name() {
        let lines = parse_content("Ann: hi\nAnna: hello", &["Ann", "Anna"]).unwrap();
        assert_eq!(lines[1].speaker, "Anna");
        assert_eq!(lines[1].text, "hello");
    }

    #[test]
    fn test_parse_skips_empty_and_preamble() {
        let lines = parse_content("(intro) Jane: , David: Hello", &["Jane", "David"]).unwrap();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].index, 0);
        assert_eq!(lines[0].speaker, "David");
    }

    #[test]
    fn test_parse_rejects_undeclared_leading_speaker() {
        let err = parse_content("Bob: hi Jane: hello", &["Jane"]).unwrap_err();
        assert!(err.to_string().contains("Bob"));
    }

    #[test]
    fn test_parse_rejects_undeclared_speaker_mid_content() {
        let err = parse_content(
            "Jane: Hi, Bob: give me the money, David: Hello",
            &["Jane", "David"],
        )
        .unwrap_err();
        assert!(matches!(&err, DialogueError::Config(msg) if msg.contains("'Bob'")));

        let err = parse_content("Jane: Hi\nMary Ann: hello", &["Jane"]).unwrap_err();
        assert!(err.to_string().contains("Mary Ann"));
    }

    #[test]
    fn test_validate_rejects_bad_input() {
        let mut conversation = demo();
        conversation.speakers.push(Speaker::new("Jane", Gender::Female));
        assert!(conversation.validate().is_err());

        let mut conversation = demo();
        conversation.content = "  ".to_string();
        assert!(conversation.validate().is_err());

        let mut conversation = demo();
        conversation.speakers.clear();
        assert!(conversation.validate().is_err());

        for id in ["", "../escape", "a/b", "a\\b"] {
            let mut conversation = demo();
            conversation.dialog_id = Some(id.to_string());
            assert!(conversation.validate().is_err(), "accepted {id:?}");
        }
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("demo.json");
        fs::write(&path, r#"{"speakers":[{"name":"Jane","gender":"female"}],"content":"Jane: Hi"}"#)
            .unwrap();
        let conversation = Conversation::from_file(&path).unwrap();
        assert!(conversation.dialog_id.is_none());

        fs::write(&path, r#"{"speakers":[{"name":"Jane","gender":"other"}],"content":"Jane: Hi"}"#)
            .unwrap();
        assert!(matches!(
            Conversation::from_file(&path),
            Err(DialogueError::Config(_))
        ));
    }

    #[test]
    fn test_generated_dialog_id_shape() {
        let id = generate_dialog_id();
        let pattern = Regex::new(r"^dialog_\d{8}_\d{6}_[0-9a-f]{8}$").unwrap();
        assert!(pattern.is_match(&id), "unexpected id {id}");
        assert!(validate_dialog_id(&id).is_ok());
        assert_ne!(id, generate_dialog_id());
    }

    #[test]
    fn test_failed_line_omits_voice() {
        let line = DialogueLine::new(0, "Jane", "Hi");
        let json = serde_json::to_value(&line).unwrap();
        assert!(json.get("voice").is_none());
        assert!(json["audio_file"].is_null());
        assert_eq!(json["start_time"], 0.0);
    }
}

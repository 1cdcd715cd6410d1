//! DialogTTS Core Library
//!
//! Turns scripted multi-speaker conversations into per-line speech clips,
//! a merged track and a JSON manifest, spreading speakers across several
//! synthesis backends.

pub mod audio;
pub mod backend;
pub mod batch;
pub mod catalog;
pub mod conversation;
pub mod dispatcher;
pub mod error;
pub mod pipeline;
pub mod selector;
pub mod voice;

pub use audio::{AudioTools, Mp3Tools};
pub use backend::{BackendRegistry, BackendSettings, SpeechBackend};
pub use batch::find_input_files;
pub use catalog::VoiceCatalog;
pub use conversation::{Conversation, DialogueLine, Speaker, VoiceAssignment};
pub use dispatcher::{SynthesisDispatcher, TempAudioHandle};
pub use error::{BackendError, DialogueError};
pub use pipeline::{ConversationOutput, ConversationPipeline, PipelineCallback, PipelineEvent};
pub use selector::{GenderSummary, SelectionPolicy, VoiceSelector};
pub use voice::{BackendKind, Gender, VoiceIdentity};

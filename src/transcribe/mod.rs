mod beam;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::lang::Language;

pub use beam::BeamClient;

/// What the backend should do with the audio.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Task {
    /// Same-language speech to text.
    Transcribe,
    /// Speech to text in the target language.
    Translate,
}

/// Which hosted model serves the request. Each variant has its own endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ModelChoice {
    #[default]
    #[serde(rename = "Whisper v3")]
    WhisperV3,
    #[serde(rename = "SeamlessM4T")]
    SeamlessM4T,
}

impl ModelChoice {
    pub const ALL: [ModelChoice; 2] = [ModelChoice::WhisperV3, ModelChoice::SeamlessM4T];

    pub fn name(self) -> &'static str {
        match self {
            ModelChoice::WhisperV3 => "Whisper v3",
            ModelChoice::SeamlessM4T => "SeamlessM4T",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|model| model.name() == name)
    }
}

impl std::fmt::Display for ModelChoice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// One voice note on its way to a backend. Built per message, dropped after
/// the reply.
#[derive(Debug)]
pub struct TranscriptionRequest {
    pub audio: Vec<u8>,
    pub language: Language,
    pub model: ModelChoice,
    pub task: Task,
}

#[derive(Debug, Error)]
pub enum TranscribeError {
    #[error("transcription backend unavailable: {0}")]
    BackendUnavailable(String),
    /// The backend rejected the target language; the message is the
    /// backend's own wording.
    #[error("{0}")]
    UnsupportedLanguage(String),
}

/// A speech backend reachable over HTTP.
///
/// The endpoints own signal preprocessing: they resample to 16 kHz and
/// truncate anything longer than 120 seconds instead of rejecting it, so
/// implementations ship the raw voice-note bytes.
#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(&self, request: TranscriptionRequest) -> Result<String, TranscribeError>;
}

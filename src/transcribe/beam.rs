use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use super::{ModelChoice, Task, TranscribeError, Transcriber, TranscriptionRequest};
use crate::config::Config;

/// Covers model cold starts on the inference side.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Client for the hosted speech endpoints. Credentials are shared, the URL
/// is picked per request from [`ModelChoice`].
pub struct BeamClient {
    http: reqwest::Client,
    client_id: String,
    client_secret: String,
    whisper_endpoint: String,
    sm4t_endpoint: String,
}

#[derive(Serialize)]
struct TranscribeBody {
    audio_file: String,
    target_language: String,
    task_name: &'static str,
}

#[derive(Deserialize)]
struct TranscribeReply {
    transcript: Option<String>,
    error: Option<String>,
}

impl BeamClient {
    pub fn new(config: &Config) -> color_eyre::Result<Self> {
        let http = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            http,
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            whisper_endpoint: config.whisper_endpoint.clone(),
            sm4t_endpoint: config.sm4t_endpoint.clone(),
        })
    }

    fn endpoint(&self, model: ModelChoice) -> &str {
        match model {
            ModelChoice::WhisperV3 => &self.whisper_endpoint,
            ModelChoice::SeamlessM4T => &self.sm4t_endpoint,
        }
    }
}

/// Wire task names differ per backend: the whisper endpoint speaks the
/// whisper vocabulary, the SeamlessM4T endpoint its own.
fn task_name(model: ModelChoice, task: Task) -> &'static str {
    match (model, task) {
        (ModelChoice::WhisperV3, Task::Transcribe) => "transcribe",
        (ModelChoice::WhisperV3, Task::Translate) => "translate",
        (ModelChoice::SeamlessM4T, Task::Transcribe) => "asr",
        (ModelChoice::SeamlessM4T, Task::Translate) => "s2tt",
    }
}

fn names_unsupported_language(text: &str) -> bool {
    let text = text.to_ascii_lowercase();
    text.contains("language") && text.contains("not supported")
}

fn transcript_from_reply(reply: TranscribeReply) -> Result<String, TranscribeError> {
    if let Some(error) = reply.error {
        return Err(if names_unsupported_language(&error) {
            TranscribeError::UnsupportedLanguage(error)
        } else {
            TranscribeError::BackendUnavailable(error)
        });
    }
    match reply.transcript {
        // The whisper endpoint reports an unsupported language inside a
        // 200 reply, in the transcript field itself.
        Some(transcript) if names_unsupported_language(&transcript) => {
            Err(TranscribeError::UnsupportedLanguage(transcript))
        }
        Some(transcript) => Ok(transcript),
        None => Err(TranscribeError::BackendUnavailable(
            "reply carried no transcript".to_string(),
        )),
    }
}

#[async_trait]
impl Transcriber for BeamClient {
    #[instrument(skip_all, fields(model = %request.model, language = %request.language), err)]
    async fn transcribe(&self, request: TranscriptionRequest) -> Result<String, TranscribeError> {
        let body = TranscribeBody {
            audio_file: STANDARD.encode(&request.audio),
            target_language: request.language.name().to_string(),
            task_name: task_name(request.model, request.task),
        };
        debug!(audio_bytes = request.audio.len(), "sending voice note");

        let response = self
            .http
            .post(self.endpoint(request.model))
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .json(&body)
            .send()
            .await
            .map_err(|err| TranscribeError::BackendUnavailable(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            if status == StatusCode::BAD_REQUEST && names_unsupported_language(&body) {
                return Err(TranscribeError::UnsupportedLanguage(body));
            }
            return Err(TranscribeError::BackendUnavailable(format!(
                "backend replied {status}: {body}"
            )));
        }

        let reply = response
            .json::<TranscribeReply>()
            .await
            .map_err(|err| TranscribeError::BackendUnavailable(err.to_string()))?;
        transcript_from_reply(reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_names_follow_the_backend_vocabulary() {
        assert_eq!(task_name(ModelChoice::WhisperV3, Task::Transcribe), "transcribe");
        assert_eq!(task_name(ModelChoice::WhisperV3, Task::Translate), "translate");
        assert_eq!(task_name(ModelChoice::SeamlessM4T, Task::Transcribe), "asr");
        assert_eq!(task_name(ModelChoice::SeamlessM4T, Task::Translate), "s2tt");
    }

    #[test]
    fn transcript_is_passed_through() {
        let reply = TranscribeReply {
            transcript: Some("ciao come stai".to_string()),
            error: None,
        };
        assert_eq!(transcript_from_reply(reply).unwrap(), "ciao come stai");
    }

    #[test]
    fn in_band_language_rejection_is_surfaced_verbatim() {
        let reply = TranscribeReply {
            transcript: Some("Target language klingon not supported.".to_string()),
            error: None,
        };
        match transcript_from_reply(reply) {
            Err(TranscribeError::UnsupportedLanguage(text)) => {
                assert_eq!(text, "Target language klingon not supported.");
            }
            other => panic!("expected UnsupportedLanguage, got {other:?}"),
        }
    }

    #[test]
    fn missing_transcript_is_a_backend_failure() {
        let reply = TranscribeReply {
            transcript: None,
            error: None,
        };
        assert!(matches!(
            transcript_from_reply(reply),
            Err(TranscribeError::BackendUnavailable(_))
        ));
    }

    #[test]
    fn error_field_maps_to_the_taxonomy() {
        let unavailable = TranscribeReply {
            transcript: None,
            error: Some("worker crashed".to_string()),
        };
        assert!(matches!(
            transcript_from_reply(unavailable),
            Err(TranscribeError::BackendUnavailable(_))
        ));

        let unsupported = TranscribeReply {
            transcript: None,
            error: Some("language xx not supported".to_string()),
        };
        assert!(matches!(
            transcript_from_reply(unsupported),
            Err(TranscribeError::UnsupportedLanguage(_))
        ));
    }
}

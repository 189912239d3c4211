use std::{future::Future, time::Duration};

use async_trait::async_trait;
use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::sleep;
use tracing::{instrument, warn};

use crate::config::Config;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum RefineError {
    #[error("post-processing backend unavailable after {attempts} attempts: {last_error}")]
    PostProcessUnavailable { attempts: u32, last_error: String },
}

/// A generative-text backend that rewrites transcripts.
#[async_trait]
pub trait Refiner: Send + Sync {
    async fn refine(&self, prompt: &str, max_tokens: u32) -> Result<String, RefineError>;
}

/// Which rewrite the backend is asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefineMode {
    Clean,
    Summarize,
}

pub fn build_prompt(transcript: &str, mode: RefineMode) -> String {
    match mode {
        RefineMode::Clean => format!(
            "Add punctuation to the transcript below and lightly polish it \
             without changing its meaning. Keep the language the transcript \
             is written in. Answer with the polished transcript only, no \
             commentary.\n\n{transcript}"
        ),
        RefineMode::Summarize => format!(
            "Write a shorter summary of the transcript below that preserves \
             its meaning. Keep the language the transcript is written in. \
             Answer with the summary only, no commentary.\n\n{transcript}"
        ),
    }
}

/// Randomized exponential backoff with a bounded attempt count.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub min_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 10,
            min_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// Uniformly random delay under an exponentially growing ceiling.
    fn delay(&self, attempt: u32) -> Duration {
        let ceiling = self
            .min_delay
            .saturating_mul(2u32.saturating_pow(attempt))
            .min(self.max_delay);
        ceiling.mul_f64(rand::thread_rng().gen::<f64>())
    }
}

async fn with_backoff<T, F, Fut>(policy: RetryPolicy, mut call: F) -> Result<T, RefineError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, String>>,
{
    let mut last_error = String::new();
    for attempt in 0..policy.attempts {
        match call().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                warn!(attempt, %err, "post-processing attempt failed");
                last_error = err;
            }
        }
        if attempt + 1 < policy.attempts {
            sleep(policy.delay(attempt)).await;
        }
    }
    Err(RefineError::PostProcessUnavailable {
        attempts: policy.attempts,
        last_error,
    })
}

/// Client for the Gemini `generateContent` endpoint.
pub struct GeminiClient {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
    policy: RetryPolicy,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateBody {
    contents: Vec<RequestContent>,
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct RequestContent {
    parts: Vec<RequestPart>,
}

#[derive(Serialize)]
struct RequestPart {
    text: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    max_output_tokens: u32,
}

#[derive(Deserialize)]
struct GenerateReply {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<ReplyContent>,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct ReplyContent {
    #[serde(default)]
    parts: Vec<ReplyPart>,
}

#[derive(Deserialize)]
struct ReplyPart {
    text: String,
}

/// A completion that stopped for any reason other than a normal finish
/// yields the reason itself, never truncated or fabricated content.
fn completion_text(reply: GenerateReply) -> Result<String, String> {
    let candidate = reply
        .candidates
        .into_iter()
        .next()
        .ok_or_else(|| "reply carried no candidates".to_string())?;

    let finish_reason = candidate.finish_reason.unwrap_or_default();
    if finish_reason != "STOP" {
        return Ok(finish_reason);
    }

    let text = candidate
        .content
        .map(|content| {
            content
                .parts
                .into_iter()
                .map(|part| part.text)
                .collect::<String>()
        })
        .unwrap_or_default();
    if text.is_empty() {
        Err("candidate carried no text".to_string())
    } else {
        Ok(text)
    }
}

impl GeminiClient {
    pub fn new(config: &Config) -> color_eyre::Result<Self> {
        let http = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            http,
            endpoint: format!(
                "https://generativelanguage.googleapis.com/v1beta/models/{}:generateContent",
                config.gemini_model
            ),
            api_key: config.google_api_key.clone(),
            policy: RetryPolicy::default(),
        })
    }

    async fn generate(&self, prompt: &str, max_tokens: u32) -> Result<String, String> {
        let body = GenerateBody {
            contents: vec![RequestContent {
                parts: vec![RequestPart {
                    text: prompt.to_string(),
                }],
            }],
            generation_config: GenerationConfig {
                max_output_tokens: max_tokens,
            },
        };

        let response = self
            .http
            .post(&self.endpoint)
            .query(&[("key", self.api_key.as_str())])
            .json(&body)
            .send()
            .await
            .map_err(|err| err.to_string())?;

        let status = response.status();
        if !status.is_success() {
            return Err(format!("backend replied {status}"));
        }

        let reply = response
            .json::<GenerateReply>()
            .await
            .map_err(|err| err.to_string())?;
        completion_text(reply)
    }
}

#[async_trait]
impl Refiner for GeminiClient {
    #[instrument(skip_all, err)]
    async fn refine(&self, prompt: &str, max_tokens: u32) -> Result<String, RefineError> {
        with_backoff(self.policy, || self.generate(prompt, max_tokens)).await
    }
}

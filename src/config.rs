use std::env::var;

use camino::Utf8PathBuf;
use color_eyre::{eyre::WrapErr, Result};

/// Everything read from the environment at process start. The bot token is
/// picked up separately by `Bot::from_env`.
#[derive(Debug, Clone)]
pub struct Config {
    /// Whisper v3 inference endpoint.
    pub whisper_endpoint: String,
    /// SeamlessM4T inference endpoint.
    pub sm4t_endpoint: String,
    /// Basic-auth credentials shared by both inference endpoints.
    pub client_id: String,
    pub client_secret: String,
    /// Key and model name for the generative-text backend.
    pub google_api_key: String,
    pub gemini_model: String,
    /// Where the preference snapshot lives.
    pub preferences_path: Utf8PathBuf,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            whisper_endpoint: var("BEAM_WHISPER_ENDPOINT")
                .wrap_err("BEAM_WHISPER_ENDPOINT is not set")?,
            sm4t_endpoint: var("BEAM_SM4T_ENDPOINT").wrap_err("BEAM_SM4T_ENDPOINT is not set")?,
            client_id: var("CLIENT_ID").wrap_err("CLIENT_ID is not set")?,
            client_secret: var("CLIENT_SECRET").wrap_err("CLIENT_SECRET is not set")?,
            google_api_key: var("GOOGLE_API_KEY").wrap_err("GOOGLE_API_KEY is not set")?,
            gemini_model: var("GEMINI_MODEL").unwrap_or_else(|_| "gemini-1.5-flash".to_string()),
            preferences_path: var("PREFERENCES_PATH")
                .map(Utf8PathBuf::from)
                .unwrap_or_else(|_| Utf8PathBuf::from("preferences.json")),
        })
    }
}

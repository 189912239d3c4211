use std::{collections::HashMap, io::Write};

use camino::{Utf8Path, Utf8PathBuf};
use color_eyre::eyre::WrapErr;
use serde::{Deserialize, Serialize};
use teloxide::types::ChatId;
use tempfile::NamedTempFile;
use tokio::sync::RwLock;

use crate::{lang::Language, transcribe::ModelChoice};

/// Everything the bot remembers about one chat.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserPreferences {
    pub target_language: Option<Language>,
    #[serde(default)]
    pub model: ModelChoice,
    #[serde(default)]
    pub clean_transcript: bool,
    #[serde(default)]
    pub summarize_transcript: bool,
}

/// Per-chat settings, snapshotted to a JSON file on every mutation.
///
/// Mutations take the write lock for the full read-modify-write-persist
/// cycle, so concurrent chats cannot interleave inside one key's update and
/// snapshots land on disk in mutation order.
pub struct PreferenceStore {
    path: Utf8PathBuf,
    chats: RwLock<HashMap<i64, UserPreferences>>,
}

impl PreferenceStore {
    pub async fn open(path: impl Into<Utf8PathBuf>) -> color_eyre::Result<Self> {
        let path = path.into();
        let chats = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .wrap_err_with(|| format!("corrupt preference file at {path}"))?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(err) => {
                return Err(err).wrap_err_with(|| format!("failed to read preferences at {path}"))
            }
        };
        Ok(Self {
            path,
            chats: RwLock::new(chats),
        })
    }

    /// Never fails: chats without stored settings get the defaults.
    pub async fn get(&self, chat: ChatId) -> UserPreferences {
        self.chats
            .read()
            .await
            .get(&chat.0)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn set_language(&self, chat: ChatId, language: Language) -> color_eyre::Result<()> {
        self.mutate(chat, |prefs| prefs.target_language = Some(language))
            .await
    }

    pub async fn set_model(&self, chat: ChatId, model: ModelChoice) -> color_eyre::Result<()> {
        self.mutate(chat, |prefs| prefs.model = model).await
    }

    /// Flips the cleanup toggle and returns the new value.
    pub async fn toggle_clean(&self, chat: ChatId) -> color_eyre::Result<bool> {
        self.mutate(chat, |prefs| {
            prefs.clean_transcript = !prefs.clean_transcript;
            prefs.clean_transcript
        })
        .await
    }

    /// Flips the summary toggle and returns the new value.
    pub async fn toggle_summarize(&self, chat: ChatId) -> color_eyre::Result<bool> {
        self.mutate(chat, |prefs| {
            prefs.summarize_transcript = !prefs.summarize_transcript;
            prefs.summarize_transcript
        })
        .await
    }

    async fn mutate<R>(
        &self,
        chat: ChatId,
        update: impl FnOnce(&mut UserPreferences) -> R,
    ) -> color_eyre::Result<R> {
        let mut chats = self.chats.write().await;
        let result = update(chats.entry(chat.0).or_default());
        let snapshot = serde_json::to_vec_pretty(&*chats)?;
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || persist(&path, &snapshot)).await??;
        Ok(result)
    }
}

/// Write-then-rename keeps a crash from eating the previous snapshot.
fn persist(path: &Utf8Path, bytes: &[u8]) -> color_eyre::Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_str().is_empty() => parent,
        _ => Utf8Path::new("."),
    };
    let mut file = NamedTempFile::new_in(dir)?;
    file.write_all(bytes)?;
    file.persist(path)
        .wrap_err_with(|| format!("failed to persist preferences at {path}"))?;
    Ok(())
}

use std::{
    collections::HashSet,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex,
    },
};

use teloxide::types::ChatId;
use tracing::{info, instrument, warn};

use crate::{
    lang::Language,
    refine::{build_prompt, RefineMode, Refiner},
    store::PreferenceStore,
    transcribe::{ModelChoice, Task, TranscribeError, Transcriber, TranscriptionRequest},
};

pub const WELCOME_MESSAGE: &str = "\
Hi, this is Voice Bot. You can send or forward voice notes to me: I will transcribe them into text. Your voice note can be in any language!
Before we get started, I need to know which language I should use. Pick one below or send /language to choose.

Happy transcribing.";

const TEMPORARY_FAILURE_MESSAGE: &str = "There was an error when transcribing your voice note. It should be temporary, so try again in a while :)";
const SELECT_LANGUAGE_PROMPT: &str = "Select a language. You can always change it with /language";
const SELECT_MODEL_PROMPT: &str = "Select a model. You can always change it with /model";
const LANGUAGE_FIRST_PROMPT: &str =
    "Please, first select a language. You can always change it with /language";

/// Output token budget handed to the post-processing backend.
const MAX_REFINE_TOKENS: u32 = 256;

/// One chat event, already parsed out of the transport representation.
#[derive(Debug)]
pub enum Event {
    Start,
    ChooseLanguage,
    LanguageSelected(String),
    ChooseModel,
    ModelSelected(String),
    ToggleClean,
    ToggleSummarize,
    ShowConfig,
    Voice(Vec<u8>),
}

/// What to send back. The transport layer decides how menus are rendered.
#[derive(Debug, PartialEq, Eq)]
pub enum Reply {
    Text(String),
    LanguageMenu(String),
    ModelMenu(String),
}

/// Process-scoped counters; reset on restart.
#[derive(Default)]
pub struct Stats {
    unique_chats: AtomicU64,
    seen: Mutex<HashSet<i64>>,
}

impl Stats {
    /// True the first time a chat shows up in this process.
    fn first_contact(&self, chat: ChatId) -> bool {
        let mut seen = self.seen.lock().expect("stats mutex poisoned");
        let first = seen.insert(chat.0);
        if first {
            self.unique_chats.fetch_add(1, Ordering::Relaxed);
        }
        first
    }

    pub fn unique_chats(&self) -> u64 {
        self.unique_chats.load(Ordering::Relaxed)
    }
}

pub struct Controller {
    store: PreferenceStore,
    transcriber: Arc<dyn Transcriber>,
    refiner: Arc<dyn Refiner>,
    stats: Stats,
}

impl Controller {
    pub fn new(
        store: PreferenceStore,
        transcriber: Arc<dyn Transcriber>,
        refiner: Arc<dyn Refiner>,
    ) -> Self {
        Self {
            store,
            transcriber,
            refiner,
            stats: Stats::default(),
        }
    }

    pub fn stats(&self) -> &Stats {
        &self.stats
    }

    /// Single dispatch point for every chat event.
    #[instrument(skip_all, fields(chat_id = %chat), err)]
    pub async fn handle(&self, chat: ChatId, event: Event) -> color_eyre::Result<Reply> {
        match event {
            Event::Start => self.on_start(chat).await,
            Event::ChooseLanguage => Ok(Reply::LanguageMenu(SELECT_LANGUAGE_PROMPT.to_string())),
            Event::LanguageSelected(choice) => self.on_language_selected(chat, choice).await,
            Event::ChooseModel => Ok(Reply::ModelMenu(SELECT_MODEL_PROMPT.to_string())),
            Event::ModelSelected(choice) => self.on_model_selected(chat, choice).await,
            Event::ToggleClean => self.on_toggle_clean(chat).await,
            Event::ToggleSummarize => self.on_toggle_summarize(chat).await,
            Event::ShowConfig => self.on_show_config(chat).await,
            Event::Voice(audio) => self.on_voice(chat, audio).await,
        }
    }

    async fn on_start(&self, chat: ChatId) -> color_eyre::Result<Reply> {
        if self.stats.first_contact(chat) {
            info!(
                unique_chat_count = self.stats.unique_chats(),
                "new chat started"
            );
        }
        Ok(Reply::LanguageMenu(WELCOME_MESSAGE.to_string()))
    }

    async fn on_language_selected(
        &self,
        chat: ChatId,
        choice: String,
    ) -> color_eyre::Result<Reply> {
        let Some(language) = Language::parse(&choice) else {
            warn!(%choice, "unrecognized language choice");
            return Ok(Reply::Text(format!(
                "I don't know \"{choice}\". Pick a language from /language."
            )));
        };
        self.store.set_language(chat, language.clone()).await?;
        Ok(Reply::Text(format!("Selected language: {language}")))
    }

    async fn on_model_selected(&self, chat: ChatId, choice: String) -> color_eyre::Result<Reply> {
        let Some(model) = ModelChoice::parse(&choice) else {
            warn!(%choice, "unrecognized model choice");
            return Ok(Reply::Text(format!(
                "I don't know \"{choice}\". Pick a model from /model."
            )));
        };
        self.store.set_model(chat, model).await?;
        Ok(Reply::Text(format!("Selected model: {model}")))
    }

    async fn on_toggle_clean(&self, chat: ChatId) -> color_eyre::Result<Reply> {
        let enabled = self.store.toggle_clean(chat).await?;
        Ok(Reply::Text(format!(
            "Transcript cleanup is now {}.",
            on_off(enabled)
        )))
    }

    async fn on_toggle_summarize(&self, chat: ChatId) -> color_eyre::Result<Reply> {
        let enabled = self.store.toggle_summarize(chat).await?;
        Ok(Reply::Text(format!(
            "Transcript summaries are now {}.",
            on_off(enabled)
        )))
    }

    async fn on_show_config(&self, chat: ChatId) -> color_eyre::Result<Reply> {
        let prefs = self.store.get(chat).await;
        let language = prefs
            .target_language
            .map(|language| language.to_string())
            .unwrap_or_else(|| "not set".to_string());
        Ok(Reply::Text(format!(
            "Target language: {language}\nModel: {}\nClean transcript: {}\nSummarize transcript: {}",
            prefs.model,
            on_off(prefs.clean_transcript),
            on_off(prefs.summarize_transcript),
        )))
    }

    async fn on_voice(&self, chat: ChatId, audio: Vec<u8>) -> color_eyre::Result<Reply> {
        let prefs = self.store.get(chat).await;
        let Some(language) = prefs.target_language else {
            return Ok(Reply::LanguageMenu(LANGUAGE_FIRST_PROMPT.to_string()));
        };

        let request = TranscriptionRequest {
            audio,
            language,
            model: prefs.model,
            task: Task::Transcribe,
        };
        let transcript = match self.transcriber.transcribe(request).await {
            Ok(transcript) => transcript,
            Err(TranscribeError::UnsupportedLanguage(reason)) => return Ok(Reply::Text(reason)),
            Err(err @ TranscribeError::BackendUnavailable(_)) => {
                warn!(%err, "transcription failed");
                return Ok(Reply::Text(TEMPORARY_FAILURE_MESSAGE.to_string()));
            }
        };

        if !prefs.clean_transcript && !prefs.summarize_transcript {
            return Ok(Reply::Text(transcript));
        }

        // Summaries win when both toggles are on.
        let mode = if prefs.summarize_transcript {
            RefineMode::Summarize
        } else {
            RefineMode::Clean
        };
        let prompt = build_prompt(&transcript, mode);
        match self.refiner.refine(&prompt, MAX_REFINE_TOKENS).await {
            Ok(refined) => Ok(Reply::Text(refined)),
            Err(err) => {
                warn!(%err, "post-processing failed, replying with the raw transcript");
                Ok(Reply::Text(transcript))
            }
        }
    }
}

fn on_off(enabled: bool) -> &'static str {
    if enabled {
        "on"
    } else {
        "off"
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use async_trait::async_trait;
    use camino::Utf8PathBuf;

    use super::*;
    use crate::refine::RefineError;

    struct StubTranscriber {
        calls: AtomicUsize,
        transcript: String,
    }

    #[async_trait]
    impl Transcriber for StubTranscriber {
        async fn transcribe(
            &self,
            _request: TranscriptionRequest,
        ) -> Result<String, TranscribeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.transcript.clone())
        }
    }

    #[derive(Default)]
    struct StubRefiner {
        calls: AtomicUsize,
        prompts: Mutex<Vec<String>>,
        fail: bool,
    }

    #[async_trait]
    impl Refiner for StubRefiner {
        async fn refine(&self, prompt: &str, _max_tokens: u32) -> Result<String, RefineError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.prompts.lock().unwrap().push(prompt.to_string());
            if self.fail {
                Err(RefineError::PostProcessUnavailable {
                    attempts: 1,
                    last_error: "stub".to_string(),
                })
            } else {
                Ok("refined".to_string())
            }
        }
    }

    struct Fixture {
        controller: Controller,
        transcriber: Arc<StubTranscriber>,
        refiner: Arc<StubRefiner>,
        _dir: tempfile::TempDir,
    }

    async fn fixture(transcript: &str, failing_refiner: bool) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let store = PreferenceStore::open(
            Utf8PathBuf::from_path_buf(dir.path().join("preferences.json")).unwrap(),
        )
        .await
        .unwrap();
        let transcriber = Arc::new(StubTranscriber {
            calls: AtomicUsize::new(0),
            transcript: transcript.to_string(),
        });
        let refiner = Arc::new(StubRefiner {
            fail: failing_refiner,
            ..StubRefiner::default()
        });
        let controller = Controller::new(store, transcriber.clone(), refiner.clone());
        Fixture {
            controller,
            transcriber,
            refiner,
            _dir: dir,
        }
    }

    fn text(reply: Reply) -> String {
        match reply {
            Reply::Text(text) => text,
            other => panic!("expected a plain text reply, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn start_counts_each_chat_once() {
        let fx = fixture("", false).await;

        let reply = fx.controller.handle(ChatId(1), Event::Start).await.unwrap();
        assert_eq!(reply, Reply::LanguageMenu(WELCOME_MESSAGE.to_string()));

        fx.controller.handle(ChatId(1), Event::Start).await.unwrap();
        fx.controller.handle(ChatId(2), Event::Start).await.unwrap();
        assert_eq!(fx.controller.stats().unique_chats(), 2);
    }

    #[tokio::test]
    async fn unknown_language_leaves_preferences_untouched() {
        let fx = fixture("", false).await;
        let chat = ChatId(3);

        let reply = fx
            .controller
            .handle(chat, Event::LanguageSelected("Klingon".to_string()))
            .await
            .unwrap();
        assert!(text(reply).contains("Klingon"));

        let config = text(fx.controller.handle(chat, Event::ShowConfig).await.unwrap());
        assert!(config.contains("Target language: not set"));
    }

    #[tokio::test]
    async fn selecting_a_language_confirms_it() {
        let fx = fixture("", false).await;
        let chat = ChatId(4);

        let reply = fx
            .controller
            .handle(chat, Event::LanguageSelected("Italian".to_string()))
            .await
            .unwrap();
        assert_eq!(text(reply), "Selected language: Italian");

        let config = text(fx.controller.handle(chat, Event::ShowConfig).await.unwrap());
        assert!(config.contains("Target language: Italian"));
    }

    #[tokio::test]
    async fn voice_without_a_language_never_reaches_the_backend() {
        let fx = fixture("ciao", false).await;

        let reply = fx
            .controller
            .handle(ChatId(5), Event::Voice(vec![1, 2, 3]))
            .await
            .unwrap();

        assert!(matches!(reply, Reply::LanguageMenu(_)));
        assert_eq!(fx.transcriber.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn plain_transcript_is_passed_through_untouched() {
        let fx = fixture("ciao come stai", false).await;
        let chat = ChatId(6);

        fx.controller
            .handle(chat, Event::LanguageSelected("Italian".to_string()))
            .await
            .unwrap();
        let reply = fx
            .controller
            .handle(chat, Event::Voice(vec![0; 16]))
            .await
            .unwrap();

        assert_eq!(text(reply), "ciao come stai");
        assert_eq!(fx.refiner.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn summaries_win_when_both_toggles_are_on() {
        let fx = fixture("ciao come stai", false).await;
        let chat = ChatId(7);

        fx.controller
            .handle(chat, Event::LanguageSelected("Italian".to_string()))
            .await
            .unwrap();
        fx.controller.handle(chat, Event::ToggleClean).await.unwrap();
        fx.controller
            .handle(chat, Event::ToggleSummarize)
            .await
            .unwrap();

        let reply = fx
            .controller
            .handle(chat, Event::Voice(vec![0; 16]))
            .await
            .unwrap();
        assert_eq!(text(reply), "refined");

        let prompts = fx.refiner.prompts.lock().unwrap();
        assert_eq!(prompts.len(), 1);
        assert!(prompts[0].contains("summary"));
        assert!(!prompts[0].contains("punctuation"));
    }

    #[tokio::test]
    async fn refine_failure_falls_back_to_the_raw_transcript() {
        let fx = fixture("ciao come stai", true).await;
        let chat = ChatId(8);

        fx.controller
            .handle(chat, Event::LanguageSelected("Italian".to_string()))
            .await
            .unwrap();
        fx.controller.handle(chat, Event::ToggleClean).await.unwrap();

        let reply = fx
            .controller
            .handle(chat, Event::Voice(vec![0; 16]))
            .await
            .unwrap();

        assert_eq!(text(reply), "ciao come stai");
        assert_eq!(fx.refiner.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn toggling_clean_twice_returns_to_the_original_state() {
        let fx = fixture("", false).await;
        let chat = ChatId(9);

        let first = text(fx.controller.handle(chat, Event::ToggleClean).await.unwrap());
        assert!(first.contains("on"));
        let second = text(fx.controller.handle(chat, Event::ToggleClean).await.unwrap());
        assert!(second.contains("off"));

        let config = text(fx.controller.handle(chat, Event::ShowConfig).await.unwrap());
        assert!(config.contains("Clean transcript: off"));
    }

    struct DownTranscriber;

    #[async_trait]
    impl Transcriber for DownTranscriber {
        async fn transcribe(
            &self,
            _request: TranscriptionRequest,
        ) -> Result<String, TranscribeError> {
            Err(TranscribeError::BackendUnavailable("stub down".to_string()))
        }
    }

    struct PickyTranscriber;

    #[async_trait]
    impl Transcriber for PickyTranscriber {
        async fn transcribe(
            &self,
            _request: TranscriptionRequest,
        ) -> Result<String, TranscribeError> {
            Err(TranscribeError::UnsupportedLanguage(
                "Target language welsh not supported.".to_string(),
            ))
        }
    }

    async fn controller_with(transcriber: Arc<dyn Transcriber>) -> (Controller, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = PreferenceStore::open(
            Utf8PathBuf::from_path_buf(dir.path().join("preferences.json")).unwrap(),
        )
        .await
        .unwrap();
        let controller = Controller::new(store, transcriber, Arc::new(StubRefiner::default()));
        (controller, dir)
    }

    #[tokio::test]
    async fn backend_outage_becomes_a_temporary_failure_reply() {
        let (controller, _dir) = controller_with(Arc::new(DownTranscriber)).await;
        let chat = ChatId(10);

        controller
            .handle(chat, Event::LanguageSelected("Italian".to_string()))
            .await
            .unwrap();
        let reply = text(controller.handle(chat, Event::Voice(vec![0; 16])).await.unwrap());

        assert!(reply.contains("temporary"));
    }

    #[tokio::test]
    async fn unsupported_language_is_surfaced_verbatim() {
        let (controller, _dir) = controller_with(Arc::new(PickyTranscriber)).await;
        let chat = ChatId(11);

        controller
            .handle(chat, Event::LanguageSelected("Welsh".to_string()))
            .await
            .unwrap();
        let reply = text(controller.handle(chat, Event::Voice(vec![0; 16])).await.unwrap());

        assert_eq!(reply, "Target language welsh not supported.");
    }
}

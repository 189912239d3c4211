use std::sync::Arc;

use teloxide::{
    dispatching::UpdateHandler,
    dptree,
    net::Download,
    prelude::*,
    types::{CallbackQuery, ChatAction, InlineKeyboardButton, InlineKeyboardMarkup},
    utils::command::BotCommands,
    Bot,
};
use tracing::{error, info, instrument};

use crate::{
    controller::{Controller, Event, Reply},
    lang::SUPPORTED_LANGUAGES,
    transcribe::ModelChoice,
};

const GENERIC_FAILURE_MESSAGE: &str = "Something went wrong, please try again later.";

type HandlerResult = color_eyre::Result<()>;

#[derive(BotCommands, Clone)]
#[command(rename_rule = "lowercase", description = "These commands are supported:")]
pub enum Command {
    #[command(description = "say hello and pick a language.")]
    Start,
    #[command(description = "choose the target language.")]
    Language,
    #[command(description = "choose the transcription model.")]
    Model,
    #[command(description = "toggle transcript cleanup.")]
    Clean,
    #[command(description = "toggle transcript summaries.")]
    Summarize,
    #[command(description = "show the current settings.")]
    Config,
    #[command(description = "show this text.")]
    Help,
}

pub async fn run(bot: Bot, controller: Arc<Controller>) -> color_eyre::Result<()> {
    Dispatcher::builder(bot, schema())
        .dependencies(dptree::deps![controller])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;
    Ok(())
}

fn schema() -> UpdateHandler<color_eyre::Report> {
    dptree::entry()
        .branch(
            Update::filter_message()
                .filter_command::<Command>()
                .endpoint(handle_command),
        )
        .branch(Update::filter_callback_query().endpoint(handle_callback))
        .branch(Update::filter_message().endpoint(handle_message))
}

#[instrument(skip_all, fields(chat_id = %msg.chat.id))]
async fn handle_command(
    bot: Bot,
    msg: Message,
    command: Command,
    controller: Arc<Controller>,
) -> HandlerResult {
    let event = match command {
        Command::Help => {
            bot.send_message(msg.chat.id, Command::descriptions().to_string())
                .await?;
            return Ok(());
        }
        Command::Start => Event::Start,
        Command::Language => Event::ChooseLanguage,
        Command::Model => Event::ChooseModel,
        Command::Clean => Event::ToggleClean,
        Command::Summarize => Event::ToggleSummarize,
        Command::Config => Event::ShowConfig,
    };

    let outcome = controller.handle(msg.chat.id, event).await;
    respond_in_chat(&bot, msg.chat.id, outcome).await
}

#[instrument(skip_all)]
async fn handle_callback(
    bot: Bot,
    query: CallbackQuery,
    controller: Arc<Controller>,
) -> HandlerResult {
    // Clients can get stuck on an unanswered callback query.
    bot.answer_callback_query(query.id.clone()).await?;

    let Some(message) = query.message else {
        return Ok(());
    };
    let chat = message.chat.id;
    let Some(event) = query.data.as_deref().and_then(parse_callback) else {
        info!(data = ?query.data, "ignoring unknown callback");
        return Ok(());
    };

    match controller.handle(chat, event).await {
        // Selections replace the menu message they came from.
        Ok(Reply::Text(text)) => {
            bot.edit_message_text(chat, message.id, text).await?;
        }
        Ok(reply) => send_reply(&bot, chat, reply).await?,
        Err(err) => {
            error!(?err, "callback handler failed");
            bot.send_message(chat, GENERIC_FAILURE_MESSAGE).await?;
        }
    }
    Ok(())
}

#[instrument(skip_all, fields(chat_id = %msg.chat.id))]
async fn handle_message(bot: Bot, msg: Message, controller: Arc<Controller>) -> HandlerResult {
    let voice = msg.voice().map(|voice| &voice.file.id);
    let audio = msg.audio().map(|audio| &audio.file.id).or(voice);

    let Some(file_id) = audio else {
        if msg.chat.is_group() {
            return Ok(()); // ignore group messages that are not audio
        }
        bot.send_message(msg.chat.id, "Please send me a voice note or an audio file")
            .reply_to_message_id(msg.id)
            .await?;
        return Ok(());
    };

    // Notify first, then do the slow part.
    bot.send_chat_action(msg.chat.id, ChatAction::Typing)
        .await?;

    let file = bot.get_file(file_id).await?;
    info!(?file.path, ?file.id, "downloading voice note");
    let mut audio_bytes = Vec::new();
    bot.download_file(&file.path, &mut audio_bytes).await?;

    let outcome = controller.handle(msg.chat.id, Event::Voice(audio_bytes)).await;
    respond_in_chat(&bot, msg.chat.id, outcome).await
}

async fn respond_in_chat(
    bot: &Bot,
    chat: ChatId,
    outcome: color_eyre::Result<Reply>,
) -> HandlerResult {
    match outcome {
        Ok(reply) => send_reply(bot, chat, reply).await,
        Err(err) => {
            error!(?err, "handler failed");
            bot.send_message(chat, GENERIC_FAILURE_MESSAGE).await?;
            Ok(())
        }
    }
}

async fn send_reply(bot: &Bot, chat: ChatId, reply: Reply) -> HandlerResult {
    match reply {
        Reply::Text(text) => {
            bot.send_message(chat, text).await?;
        }
        Reply::LanguageMenu(text) => {
            bot.send_message(chat, text)
                .reply_markup(language_keyboard())
                .await?;
        }
        Reply::ModelMenu(text) => {
            bot.send_message(chat, text)
                .reply_markup(model_keyboard())
                .await?;
        }
    }
    Ok(())
}

/// Menu buttons keep the original wire format: `language_<name>` and
/// `model_<name>`.
fn parse_callback(data: &str) -> Option<Event> {
    if let Some(language) = data.strip_prefix("language_") {
        Some(Event::LanguageSelected(language.to_string()))
    } else if let Some(model) = data.strip_prefix("model_") {
        Some(Event::ModelSelected(model.to_string()))
    } else {
        None
    }
}

fn language_keyboard() -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(SUPPORTED_LANGUAGES.iter().map(|language| {
        [InlineKeyboardButton::callback(
            *language,
            format!("language_{language}"),
        )]
    }))
}

fn model_keyboard() -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(ModelChoice::ALL.map(|model| {
        [InlineKeyboardButton::callback(
            model.name(),
            format!("model_{model}"),
        )]
    }))
}

#[cfg(test)]
mod tests {
    use teloxide::types::InlineKeyboardButtonKind;

    use super::*;

    #[test]
    fn callback_data_round_trips_through_the_menus() {
        match parse_callback("language_Italian") {
            Some(Event::LanguageSelected(language)) => assert_eq!(language, "Italian"),
            other => panic!("unexpected event: {other:?}"),
        }
        match parse_callback("model_Whisper v3") {
            Some(Event::ModelSelected(model)) => assert_eq!(model, "Whisper v3"),
            other => panic!("unexpected event: {other:?}"),
        }
        assert!(parse_callback("something else").is_none());
    }

    #[test]
    fn language_keyboard_leads_with_the_featured_languages() {
        let keyboard = language_keyboard();
        let first = &keyboard.inline_keyboard[0][0];
        assert_eq!(first.text, "English");
        match &first.kind {
            InlineKeyboardButtonKind::CallbackData(data) => {
                assert_eq!(data, "language_English");
            }
            other => panic!("unexpected button kind: {other:?}"),
        }
    }

    #[test]
    fn model_keyboard_offers_every_model() {
        let keyboard = model_keyboard();
        let labels: Vec<_> = keyboard
            .inline_keyboard
            .iter()
            .map(|row| row[0].text.as_str())
            .collect();
        assert_eq!(labels, ["Whisper v3", "SeamlessM4T"]);
    }
}

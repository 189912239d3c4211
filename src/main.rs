use std::sync::Arc;

use color_eyre::Result;
use teloxide::prelude::*;
use tracing::info;

mod config;
mod controller;
mod lang;
mod refine;
mod store;
mod telegram;
mod transcribe;
mod utils;

use crate::{
    config::Config, controller::Controller, refine::GeminiClient, store::PreferenceStore,
    transcribe::BeamClient,
};

#[tokio::main]
async fn main() -> Result<()> {
    utils::pre_flight()?;

    let config = Config::from_env()?;
    let store = PreferenceStore::open(config.preferences_path.clone()).await?;
    let transcriber = Arc::new(BeamClient::new(&config)?);
    let refiner = Arc::new(GeminiClient::new(&config)?);
    let controller = Arc::new(Controller::new(store, transcriber, refiner));

    let bot = Bot::from_env();
    let me = bot.get_me().await?;
    info!(?me, "Starting with");

    telegram::run(bot, controller).await
}

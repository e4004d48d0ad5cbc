#![warn(missing_docs)]
//! A Telegram bot for tracking user referrals.
//!
//! Every user gets a personal referral code and deep link. Users who start
//! the bot through someone else's link, or join the configured channel
//! through their personal invite link, are credited to that referrer.

/// The main handler for the bot's logic.
pub mod bot_handler;
/// Access to the referral channel.
pub mod channel;
/// The configuration for the application.
pub mod config;
/// The dispatcher for routing updates to the correct handlers.
pub mod dispatcher;
/// The service for sending messages to the user.
pub mod messaging;
/// Referral codes, links and attribution.
pub mod referral;
/// The storage layer for persisting data.
pub mod storage;

use std::sync::Arc;

use teloxide::prelude::*;

use crate::{
    bot_handler::BotHandler,
    channel::{ChannelService, TelegramChannelService},
    config::Config,
    dispatcher::BotDispatcher,
    messaging::TelegramMessagingService,
    referral::DefaultReferralService,
    storage::postgres::PostgresStorage,
};

/// Runs the bot until it receives a shutdown signal.
pub async fn run(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    tracing::debug!("Starting with {config:?}");

    let options = config.connect_options();
    let storage = Arc::new(PostgresStorage::connect(options, config.db_max_connections).await?);
    let bot = Bot::new(config.bot_token.clone());

    let me = bot.get_me().await?;
    let bot_username = me.user.username.clone().ok_or("The bot account has no username")?;
    tracing::info!("Logged in as @{bot_username}");

    let channel_service = config.channel.clone().map(|channel| {
        Arc::new(TelegramChannelService::new(bot.clone(), channel)) as Arc<dyn ChannelService>
    });
    if channel_service.is_none() {
        tracing::info!("CHANNEL_ID is not set, channel invite links are disabled");
    }

    let messaging_service =
        Arc::new(TelegramMessagingService::new(bot.clone(), config.subscription_price));
    let referral_service =
        Arc::new(DefaultReferralService::new(storage.clone(), channel_service, bot_username));
    let handler = Arc::new(BotHandler::new(messaging_service, referral_service));

    let mut dispatcher = BotDispatcher::new(handler, config.channel.clone()).build(bot);
    tracing::debug!("Dispatcher built successfully.");

    dispatcher.dispatch().await;

    storage.close().await;
    Ok(())
}

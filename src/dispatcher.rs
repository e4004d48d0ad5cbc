use std::sync::Arc;

use teloxide::{
    dispatching::{DefaultKey, UpdateHandler},
    dptree::deps,
    prelude::*,
    types::{ChatMemberUpdated, Update},
};

use crate::{
    bot_handler::{BotHandler, BotHandlerError, Command},
    channel::ChannelTarget,
};

/// Encapsulates the dispatcher logic for the bot.
pub struct BotDispatcher {
    handler: Arc<BotHandler>,
    channel: Option<ChannelTarget>,
}

impl BotDispatcher {
    /// Creates a new `BotDispatcher`. Channel member updates are only routed
    /// when `channel` is set.
    pub fn new(handler: Arc<BotHandler>, channel: Option<ChannelTarget>) -> Self {
        Self { handler, channel }
    }

    /// Builds the dispatcher using the provided `bot` instance.
    #[must_use = "This function returns a Dispatcher that should not be ignored"]
    pub fn build(&self, bot: Bot) -> Dispatcher<Bot, BotHandlerError, DefaultKey> {
        let mut tree = dptree::entry().branch(self.build_commands_branch());
        if let Some(channel) = &self.channel {
            tree = tree.branch(Self::build_chat_member_branch(channel.clone()));
        }

        Dispatcher::builder(bot, tree)
            .dependencies(deps![self.handler.clone()])
            .default_handler(|update| async move {
                tracing::trace!("Unhandled update: {:?}", update.id);
            })
            .enable_ctrlc_handler()
            .build()
    }

    /// Builds the branch for handling text commands.
    fn build_commands_branch(&self) -> UpdateHandler<BotHandlerError> {
        Update::filter_message().filter_command::<Command>().endpoint(
            |msg: Message, cmd: Command, handler: Arc<BotHandler>| async move {
                handler.handle_commands(&msg, cmd).await
            },
        )
    }

    /// Builds the branch for members joining the referral channel.
    fn build_chat_member_branch(channel: ChannelTarget) -> UpdateHandler<BotHandlerError> {
        Update::filter_chat_member()
            .filter(move |update: ChatMemberUpdated| {
                channel.matches_chat(update.chat.id, update.chat.username())
            })
            .endpoint(|update: ChatMemberUpdated, handler: Arc<BotHandler>| async move {
                handler.handle_chat_member(&update).await
            })
    }
}

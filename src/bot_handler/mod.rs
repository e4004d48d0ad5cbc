mod commands;
#[cfg(test)]
mod tests;

use std::sync::Arc;

use teloxide::{
    prelude::*,
    types::{ChatMemberUpdated, Message, UserId},
    utils::command::BotCommands,
};
use thiserror::Error;

use crate::{
    bot_handler::commands::Context,
    messaging::{MessagingError, MessagingService},
    referral::{JoinOutcome, Member, ReferralService, ReferralServiceError},
};

/// Commands understood by the bot.
#[derive(BotCommands, Clone, Debug, PartialEq, Eq)]
#[command(rename_rule = "lowercase", description = "Available commands:")]
pub enum Command {
    #[command(description = "Get your personal referral link.")]
    Start(String),
    #[command(description = "Check how many users you have referred.")]
    Check,
    #[command(description = "Show the top referrers.")]
    Top,
    #[command(description = "Show the latest referrals (channel admins only).")]
    Latest,
    #[command(description = "Show this help text.")]
    Help,
}

/// Errors raised while handling an update.
#[derive(Debug, Error)]
pub enum BotHandlerError {
    /// The referral service failed.
    #[error("Referral error: {0}")]
    ReferralError(#[from] ReferralServiceError),
    /// A reply could not be sent.
    #[error("Failed to send message: {0}")]
    SendMessageError(#[from] MessagingError),
}

/// Result type of the handlers.
pub type BotHandlerResult<T> = Result<T, BotHandlerError>;

/// Routes commands and channel updates to the referral and messaging services.
pub struct BotHandler {
    messaging_service: Arc<dyn MessagingService>,
    referral_service: Arc<dyn ReferralService>,
}

impl BotHandler {
    /// Creates a new `BotHandler` instance.
    pub fn new(
        messaging_service: Arc<dyn MessagingService>,
        referral_service: Arc<dyn ReferralService>,
    ) -> Self {
        Self { messaging_service, referral_service }
    }

    /// Dispatches an incoming command message. Messages without a sender,
    /// such as channel posts, are ignored.
    pub async fn handle_commands(&self, msg: &Message, cmd: Command) -> BotHandlerResult<()> {
        let Some(user) = msg.from.as_ref() else {
            tracing::debug!("Ignoring command without a sender in chat {}", msg.chat.id);
            return Ok(());
        };

        self.handle_command(msg.chat.id, &Member::from(user), cmd).await
    }

    /// Runs `cmd` on behalf of `member`. Referral failures are logged and
    /// answered with a generic error message.
    pub async fn handle_command(
        &self,
        chat_id: ChatId,
        member: &Member,
        cmd: Command,
    ) -> BotHandlerResult<()> {
        let ctx = Context { handler: self, chat_id, member };

        let result = match cmd {
            Command::Start(payload) => commands::start::handle(ctx, &payload).await,
            Command::Check => commands::check::handle(ctx).await,
            Command::Top => commands::top::handle(ctx).await,
            Command::Latest => commands::latest::handle(ctx).await,
            Command::Help => commands::help::handle(ctx).await,
        };

        match result {
            Err(BotHandlerError::ReferralError(e)) => {
                tracing::error!("Failed to handle command for user {}: {e}", member.id.0);
                self.messaging_service.send_error_msg(chat_id).await?;
                Ok(())
            }
            other => other,
        }
    }

    /// Handles a member update from the referral channel. Only joins through
    /// an invite link are of interest.
    pub async fn handle_chat_member(&self, update: &ChatMemberUpdated) -> BotHandlerResult<()> {
        let joined =
            !update.old_chat_member.kind.is_present() && update.new_chat_member.kind.is_present();
        let Some(invite_link) = update.invite_link.as_ref().filter(|_| joined) else {
            return Ok(());
        };
        let member = Member::from(&update.new_chat_member.user);

        self.handle_join(&member, &invite_link.invite_link).await
    }

    /// Credits a channel join through `invite_link` to the link's owner.
    pub async fn handle_join(&self, member: &Member, invite_link: &str) -> BotHandlerResult<()> {
        let outcome = self.referral_service.attribute_join(member, invite_link).await?;
        tracing::debug!("Channel join of user {} via {invite_link}: {outcome:?}", member.id.0);

        if let JoinOutcome::Attributed { referrer } = outcome {
            self.notify_referrer(referrer, member).await;
        }
        Ok(())
    }

    /// Tells the referrer about a new invitee. The referrer may have blocked
    /// the bot, so failures are only logged.
    async fn notify_referrer(&self, referrer: UserId, invitee: &Member) {
        if let Err(e) = self.messaging_service.send_referral_notification(referrer, invitee).await {
            tracing::warn!("Failed to notify referrer {}: {e}", referrer.0);
        }
    }
}

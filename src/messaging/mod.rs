mod utils;

use async_trait::async_trait;
use lazy_static::lazy_static;
use mockall::automock;
use teloxide::{
    prelude::*,
    types::{ChatId, ParseMode, UserId},
    utils::{command::BotCommands, html},
};
use thiserror::Error;
pub use utils::user_link;

use crate::{
    bot_handler::Command,
    referral::{Attribution, Member, StartOutcome},
    storage::{LatestReferral, TopReferrer},
};

/// Errors returned by a [`MessagingService`].
#[derive(Debug, Error)]
pub enum MessagingError {
    /// The message could not be sent.
    #[error("Teloxide API request failed: {0}")]
    TeloxideRequest(#[from] teloxide::RequestError),
}

type Result<T> = std::result::Result<T, MessagingError>;

const GENERIC_ERROR_TEXT: &str = "An error occurred. Please try again later.";
const NO_REFERRAL_CODE_TEXT: &str =
    "You do not have a referral code! Please create one using /start";
const PERMISSION_DENIED_TEXT: &str = "You do not have permission to use this command.";

lazy_static! {
    static ref HELP_TEXT: String = html::escape(&Command::descriptions().to_string());
}

/// Trait for sending messages to the user.
#[automock]
#[async_trait]
pub trait MessagingService: Send + Sync {
    /// Sends an HTML formatted text message to the provided chat.
    async fn send_text_message(&self, chat_id: ChatId, text: String) -> Result<()>;

    /// Sends the user's referral links along with the outcome of the code
    /// they started the bot with.
    async fn send_start_msg(&self, chat_id: ChatId, outcome: &StartOutcome) -> Result<()>;

    /// Sends the user's referral count.
    async fn send_referral_count_msg(&self, chat_id: ChatId, count: u64) -> Result<()>;

    /// Tells the user to run /start first.
    async fn send_no_referral_code_msg(&self, chat_id: ChatId) -> Result<()>;

    /// Sends the `/top` leaderboard.
    async fn send_top_referrers_msg(&self, chat_id: ChatId, referrers: &[TopReferrer])
    -> Result<()>;

    /// Sends the `/latest` attribution list.
    async fn send_latest_referrals_msg(
        &self,
        chat_id: ChatId,
        referrals: &[LatestReferral],
    ) -> Result<()>;

    /// Tells the user the command is reserved for channel admins.
    async fn send_permission_denied_msg(&self, chat_id: ChatId) -> Result<()>;

    /// Sends the command list.
    async fn send_help_msg(&self, chat_id: ChatId) -> Result<()>;

    /// Sends a generic error message. Details stay in the logs.
    async fn send_error_msg(&self, chat_id: ChatId) -> Result<()>;

    /// Tells a referrer that `invitee` joined through their link.
    async fn send_referral_notification(&self, referrer: UserId, invitee: &Member) -> Result<()>;
}

/// Telegram messaging service.
pub struct TelegramMessagingService {
    bot: Bot,
    subscription_price: u32,
}

impl TelegramMessagingService {
    /// Creates the service. A non-zero `subscription_price` is mentioned next
    /// to invite links.
    pub fn new(bot: Bot, subscription_price: u32) -> Self {
        Self { bot, subscription_price }
    }

    /// Reply to `/start`: attribution notice, deep link and invite link.
    pub fn format_start_text(outcome: &StartOutcome, subscription_price: u32) -> String {
        let mut text = String::new();

        let notice = match outcome.attribution {
            Attribution::NoCode | Attribution::Attributed { .. } => None,
            Attribution::SelfReferral => Some("⚠️ You cannot use your own referral link."),
            Attribution::UnknownCode => Some("⚠️ This referral link is not valid."),
            Attribution::AlreadyRegistered | Attribution::AlreadyReferred => {
                Some("ℹ️ You are already registered, so this referral link was not applied.")
            }
        };
        if let Some(notice) = notice {
            text.push_str(notice);
            text.push_str("\n\n");
        }
        if let Attribution::Attributed { .. } = outcome.attribution {
            text.push_str("🎉 Welcome! You have joined through a friend's referral link.\n\n");
        }

        if outcome.created {
            text.push_str("Your referral link is:\n");
        } else {
            text.push_str("You have already created a referral link! Your referral link is:\n");
        }
        text.push_str(&html::escape(&outcome.links.start_link));

        if let Some(invite_link) = &outcome.links.invite_link {
            text.push_str("\n\nYour personal channel invite link:\n");
            text.push_str(&html::escape(invite_link));
            if subscription_price > 0 {
                text.push_str(&format!(
                    "\nJoining through this link is free. The channel subscription \
                     ({subscription_price} ⭐ per month) is arranged separately."
                ));
            }
        }

        text
    }

    /// Body of the `/top` reply.
    pub fn format_top_referrers_text(referrers: &[TopReferrer]) -> String {
        let mut text = "<b>Top referrers:</b>\n".to_string();
        if referrers.is_empty() {
            text.push_str("No referrals yet.");
            return text;
        }
        for referrer in referrers {
            text.push_str(&format!(
                "- {}: {}\n",
                user_link(referrer.user_id, referrer.username.as_deref()),
                referrer.referral_count
            ));
        }
        text
    }

    /// Body of the `/latest` reply.
    pub fn format_latest_referrals_text(referrals: &[LatestReferral]) -> String {
        let mut text = "<b>Latest referrals:</b>\n".to_string();
        if referrals.is_empty() {
            text.push_str("No referrals yet.");
            return text;
        }
        for referral in referrals {
            text.push_str(&format!(
                "- {} referred {} on {}\n",
                user_link(referral.referrer_id, referral.referrer_username.as_deref()),
                user_link(referral.invitee_id, referral.invitee_username.as_deref()),
                referral.referred_at.format("%Y-%m-%d %H:%M:%S")
            ));
        }
        text
    }

    /// Message sent to a referrer about a new invitee.
    pub fn format_referral_notification_text(invitee: &Member) -> String {
        format!(
            "You have successfully referred {}!",
            user_link(invitee.id, invitee.display_name.as_deref())
        )
    }
}

#[async_trait]
impl MessagingService for TelegramMessagingService {
    async fn send_text_message(&self, chat_id: ChatId, text: String) -> Result<()> {
        self.bot
            .send_message(chat_id, text)
            .parse_mode(ParseMode::Html)
            .await
            .map(|_| ())
            .map_err(MessagingError::TeloxideRequest)
    }

    async fn send_start_msg(&self, chat_id: ChatId, outcome: &StartOutcome) -> Result<()> {
        let text = Self::format_start_text(outcome, self.subscription_price);
        self.send_text_message(chat_id, text).await
    }

    async fn send_referral_count_msg(&self, chat_id: ChatId, count: u64) -> Result<()> {
        self.send_text_message(chat_id, format!("Referral amount: {count}")).await
    }

    async fn send_no_referral_code_msg(&self, chat_id: ChatId) -> Result<()> {
        self.send_text_message(chat_id, NO_REFERRAL_CODE_TEXT.to_string()).await
    }

    async fn send_top_referrers_msg(
        &self,
        chat_id: ChatId,
        referrers: &[TopReferrer],
    ) -> Result<()> {
        self.send_text_message(chat_id, Self::format_top_referrers_text(referrers)).await
    }

    async fn send_latest_referrals_msg(
        &self,
        chat_id: ChatId,
        referrals: &[LatestReferral],
    ) -> Result<()> {
        self.send_text_message(chat_id, Self::format_latest_referrals_text(referrals)).await
    }

    async fn send_permission_denied_msg(&self, chat_id: ChatId) -> Result<()> {
        self.send_text_message(chat_id, PERMISSION_DENIED_TEXT.to_string()).await
    }

    async fn send_help_msg(&self, chat_id: ChatId) -> Result<()> {
        self.send_text_message(chat_id, HELP_TEXT.clone()).await
    }

    async fn send_error_msg(&self, chat_id: ChatId) -> Result<()> {
        self.send_text_message(chat_id, GENERIC_ERROR_TEXT.to_string()).await
    }

    async fn send_referral_notification(&self, referrer: UserId, invitee: &Member) -> Result<()> {
        let text = Self::format_referral_notification_text(invitee);
        self.send_text_message(ChatId(referrer.0 as i64), text).await
    }
}

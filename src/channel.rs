use std::str::FromStr;

use async_trait::async_trait;
use mockall::automock;
use teloxide::{
    prelude::*,
    types::{ChatMemberKind, Recipient},
};
use thiserror::Error;

/// Errors returned by a [`ChannelService`].
#[derive(Debug, Error)]
pub enum ChannelError {
    /// The Bot API call failed.
    #[error("Teloxide API request failed: {0}")]
    TeloxideRequest(#[from] teloxide::RequestError),
    /// `CHANNEL_ID` is neither a username nor a chat id.
    #[error("Invalid channel identifier: {0:?}")]
    InvalidChannel(String),
}

type Result<T> = std::result::Result<T, ChannelError>;

/// The channel the bot hands out invite links for, as given in `CHANNEL_ID`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelTarget {
    /// Numeric chat id.
    Id(ChatId),
    /// Public username, stored with its leading `@`.
    Username(String),
}

impl ChannelTarget {
    /// The channel as a Bot API recipient.
    pub fn recipient(&self) -> Recipient {
        match self {
            Self::Id(id) => Recipient::Id(*id),
            Self::Username(username) => Recipient::ChannelUsername(username.clone()),
        }
    }

    /// Returns true if a chat with the given id and username is this channel.
    pub fn matches_chat(&self, chat_id: ChatId, chat_username: Option<&str>) -> bool {
        match self {
            Self::Id(id) => *id == chat_id,
            Self::Username(username) => chat_username.is_some_and(|name| {
                username.trim_start_matches('@').eq_ignore_ascii_case(name)
            }),
        }
    }
}

impl FromStr for ChannelTarget {
    type Err = ChannelError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if let Ok(id) = s.parse::<i64>() {
            return Ok(Self::Id(ChatId(id)));
        }
        let name = s.strip_prefix('@').unwrap_or(s);
        if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(ChannelError::InvalidChannel(s.to_string()));
        }
        Ok(Self::Username(format!("@{name}")))
    }
}

/// Operations on the referral channel.
#[automock]
#[async_trait]
pub trait ChannelService: Send + Sync {
    /// Creates a new invite link for the channel and returns its URL.
    async fn create_invite_link(&self, name: &str) -> Result<String>;

    /// Checks whether the user is the channel's owner or an administrator.
    async fn is_admin(&self, user_id: UserId) -> Result<bool>;
}

/// [`ChannelService`] backed by the Telegram Bot API.
pub struct TelegramChannelService {
    bot: Bot,
    channel: ChannelTarget,
}

impl TelegramChannelService {
    /// Creates a service managing `channel` through `bot`.
    pub fn new(bot: Bot, channel: ChannelTarget) -> Self {
        Self { bot, channel }
    }
}

#[async_trait]
impl ChannelService for TelegramChannelService {
    async fn create_invite_link(&self, name: &str) -> Result<String> {
        let link = self.bot.create_chat_invite_link(self.channel.recipient()).name(name).await?;
        tracing::debug!("Created invite link {} for {:?}", link.invite_link, self.channel);
        Ok(link.invite_link)
    }

    async fn is_admin(&self, user_id: UserId) -> Result<bool> {
        let member = self.bot.get_chat_member(self.channel.recipient(), user_id).await?;
        Ok(matches!(member.kind, ChatMemberKind::Owner(_) | ChatMemberKind::Administrator(_)))
    }
}

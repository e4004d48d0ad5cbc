
use std::sync::Arc;

use async_trait::async_trait;
use mockall::automock;
use teloxide::types::{User, UserId};
use thiserror::Error;
use url::Url;

use crate::{
    channel::{ChannelError, ChannelService},
    storage::{
        LatestReferral, ReferralStorage, StorageError, TopReferrer, UserEntity,
        normalize_referral_code,
    },
};

/// How many entries `/top` and `/latest` show.
pub const LEADERBOARD_SIZE: usize = 10;

const TELEGRAM_URL: &str = "https://t.me";

/// Errors returned by a [`ReferralService`].
#[derive(Debug, Error)]
pub enum ReferralServiceError {
    /// The referral store failed.
    #[error("Storage error: {0}")]
    StorageError(#[from] StorageError),
    /// The channel could not be reached.
    #[error("Channel error: {0}")]
    ChannelError(#[from] ChannelError),
    /// The bot username does not form a valid deep link.
    #[error("Failed to build referral link: {0}")]
    LinkError(#[from] url::ParseError),
}

type Result<T> = std::result::Result<T, ReferralServiceError>;

/// The Telegram user a command or channel update came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    /// Telegram user id.
    pub id: UserId,
    /// `@username` without the `@`, or the full name when there is none.
    pub display_name: Option<String>,
}

impl From<&User> for Member {
    fn from(user: &User) -> Self {
        let display_name = user.username.clone().unwrap_or_else(|| user.full_name());
        let display_name = Some(display_name).filter(|name| !name.trim().is_empty());
        Self { id: user.id, display_name }
    }
}

/// What happened to the referral code given to `/start`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Attribution {
    /// No code was supplied.
    NoCode,
    /// The user was credited to `referrer`.
    Attributed {
        /// Owner of the code.
        referrer: UserId,
    },
    /// The code belongs to the invoking user.
    SelfReferral,
    /// The code does not belong to anybody.
    UnknownCode,
    /// The user existed before this `/start`, so the code is ignored.
    AlreadyRegistered,
    /// The user has been credited to someone already.
    AlreadyReferred,
}

/// The links a user shares to invite others.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferralLinks {
    /// Bot deep link carrying the referral code.
    pub start_link: String,
    /// Personal channel invite link, when a channel is configured.
    pub invite_link: Option<String>,
}

/// Everything the `/start` reply is built from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartOutcome {
    /// The invoking user after the command.
    pub user: UserEntity,
    /// True when this `/start` registered the user.
    pub created: bool,
    /// The user's own links.
    pub links: ReferralLinks,
    /// What happened to the supplied code.
    pub attribution: Attribution,
}

/// Result of a channel join through an invite link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinOutcome {
    /// The member was credited to the link's owner.
    Attributed {
        /// Owner of the invite link.
        referrer: UserId,
    },
    /// The member joined through their own link.
    SelfReferral,
    /// The member already has a referrer.
    AlreadyReferred,
    /// The link was not created by the bot.
    UnknownLink,
}

/// Referral policy on top of the store and the channel.
#[automock]
#[async_trait]
pub trait ReferralService: Send + Sync {
    /// Registers the member if needed and applies the referral code from the
    /// `/start` payload. An empty payload means no code.
    async fn start(&self, member: &Member, payload: &str) -> Result<StartOutcome>;

    /// The member's referral count, or `None` if they never ran `/start`.
    async fn referral_count(&self, user_id: UserId) -> Result<Option<u64>>;

    /// Leaderboard for `/top`.
    async fn top_referrers(&self) -> Result<Vec<TopReferrer>>;

    /// Recent attributions for `/latest`.
    async fn latest_referrals(&self) -> Result<Vec<LatestReferral>>;

    /// Whether the user administers the referral channel. Always false when
    /// no channel is configured.
    async fn is_channel_admin(&self, user_id: UserId) -> Result<bool>;

    /// Credits a member who joined the channel through `invite_link` to the
    /// link's owner.
    async fn attribute_join(&self, member: &Member, invite_link: &str) -> Result<JoinOutcome>;
}

/// [`ReferralService`] used by the bot.
pub struct DefaultReferralService {
    storage: Arc<dyn ReferralStorage>,
    channel: Option<Arc<dyn ChannelService>>,
    bot_username: String,
}

impl DefaultReferralService {
    /// Creates the service. Invite links and admin checks need `channel`.
    pub fn new(
        storage: Arc<dyn ReferralStorage>,
        channel: Option<Arc<dyn ChannelService>>,
        bot_username: impl Into<String>,
    ) -> Self {
        Self { storage, channel, bot_username: bot_username.into() }
    }

    /// Builds the `https://t.me/<bot>?start=<code>` deep link.
    pub fn start_link(&self, referral_code: &str) -> Result<String> {
        let base = format!("{TELEGRAM_URL}/{}", self.bot_username);
        let url = Url::parse_with_params(&base, &[("start", referral_code)])?;
        Ok(url.to_string())
    }

    async fn apply_code(
        &self,
        user: &UserEntity,
        created: bool,
        payload: &str,
    ) -> Result<Attribution> {
        let Some(code) = normalize_referral_code(payload) else {
            if payload.trim().is_empty() {
                return Ok(Attribution::NoCode);
            }
            return Ok(Attribution::UnknownCode);
        };

        if code == user.referral_code {
            return Ok(Attribution::SelfReferral);
        }

        let Some(referrer) = self.storage.resolve_code(code).await? else {
            tracing::debug!("Referral code {code} not found");
            return Ok(Attribution::UnknownCode);
        };

        if referrer == user.user_id {
            return Ok(Attribution::SelfReferral);
        }
        if !created {
            tracing::debug!("User {} already registered, ignoring code {code}", user.user_id.0);
            return Ok(Attribution::AlreadyRegistered);
        }

        match self.storage.record_referral(referrer, user.user_id).await {
            Ok(()) => Ok(Attribution::Attributed { referrer }),
            Err(StorageError::SelfReferral(_)) => Ok(Attribution::SelfReferral),
            Err(StorageError::AlreadyReferred(_)) => Ok(Attribution::AlreadyReferred),
            Err(e) => Err(e.into()),
        }
    }

    /// Returns the user's channel invite link, creating one if a channel is
    /// configured and the user has none yet. Failing to create or store a
    /// link is not fatal; the user still gets the deep link.
    async fn ensure_invite_link(&self, user: &UserEntity) -> Option<String> {
        if user.invite_link.is_some() {
            return user.invite_link.clone();
        }
        let channel = self.channel.as_ref()?;

        let name = format!("ref {}", user.referral_code);
        let link = match channel.create_invite_link(&name).await {
            Ok(link) => link,
            Err(e) => {
                tracing::warn!("Failed to create invite link for user {}: {e}", user.user_id.0);
                return None;
            }
        };

        match self.storage.set_invite_link(user.user_id, &link).await {
            Ok(link) => Some(link),
            Err(e) => {
                tracing::warn!("Failed to store invite link for user {}: {e}", user.user_id.0);
                None
            }
        }
    }
}

#[async_trait]
impl ReferralService for DefaultReferralService {
    async fn start(&self, member: &Member, payload: &str) -> Result<StartOutcome> {
        let registered = self.storage.get_or_create(member.id, member.display_name.clone()).await?;
        let mut user = registered.user;

        let attribution = self.apply_code(&user, registered.created, payload).await?;
        if let Attribution::Attributed { referrer } = attribution {
            user.referrer_id = Some(referrer);
        }

        user.invite_link = self.ensure_invite_link(&user).await;
        let links = ReferralLinks {
            start_link: self.start_link(&user.referral_code)?,
            invite_link: user.invite_link.clone(),
        };

        Ok(StartOutcome { user, created: registered.created, links, attribution })
    }

    async fn referral_count(&self, user_id: UserId) -> Result<Option<u64>> {
        let user = self.storage.get_user(user_id).await?;
        Ok(user.map(|u| u.referral_count))
    }

    async fn top_referrers(&self) -> Result<Vec<TopReferrer>> {
        Ok(self.storage.top_referrers(LEADERBOARD_SIZE).await?)
    }

    async fn latest_referrals(&self) -> Result<Vec<LatestReferral>> {
        Ok(self.storage.latest_referrals(LEADERBOARD_SIZE).await?)
    }

    async fn is_channel_admin(&self, user_id: UserId) -> Result<bool> {
        let Some(channel) = &self.channel else {
            return Ok(false);
        };
        match channel.is_admin(user_id).await {
            Ok(is_admin) => Ok(is_admin),
            Err(e) => {
                tracing::debug!("Failed to check admin status of user {}: {e}", user_id.0);
                Ok(false)
            }
        }
    }

    async fn attribute_join(&self, member: &Member, invite_link: &str) -> Result<JoinOutcome> {
        let Some(referrer) = self.storage.resolve_invite_link(invite_link).await? else {
            tracing::debug!("Invite link {invite_link} is not a referral link");
            return Ok(JoinOutcome::UnknownLink);
        };
        if referrer == member.id {
            return Ok(JoinOutcome::SelfReferral);
        }

        self.storage.get_or_create(member.id, member.display_name.clone()).await?;
        match self.storage.record_referral(referrer, member.id).await {
            Ok(()) => Ok(JoinOutcome::Attributed { referrer }),
            Err(StorageError::SelfReferral(_)) => Ok(JoinOutcome::SelfReferral),
            Err(StorageError::AlreadyReferred(_)) => Ok(JoinOutcome::AlreadyReferred),
            Err(e) => Err(e.into()),
        }
    }
}

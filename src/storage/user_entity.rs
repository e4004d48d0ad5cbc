use chrono::{DateTime, Utc};
use teloxide::types::UserId;

/// A user known to the bot together with their referral state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserEntity {
    /// Telegram user id.
    pub user_id: UserId,
    /// Username or full name at registration time.
    pub username: Option<String>,
    /// The user's own code, fixed once generated.
    pub referral_code: String,
    /// Number of users attributed to this one.
    pub referral_count: u64,
    /// Who referred this user. Set at most once.
    pub referrer_id: Option<UserId>,
    /// Personal channel invite link.
    pub invite_link: Option<String>,
    /// When the user was attributed to `referrer_id`.
    pub referred_at: Option<DateTime<Utc>>,
    /// When the user first reached the bot.
    pub created_at: DateTime<Utc>,
}

impl UserEntity {
    /// A freshly registered user without referrals.
    pub fn new(user_id: UserId, username: Option<String>, referral_code: String) -> Self {
        Self {
            user_id,
            username,
            referral_code,
            referral_count: 0,
            referrer_id: None,
            invite_link: None,
            referred_at: None,
            created_at: Utc::now(),
        }
    }

    /// Returns true once the user has been attributed to a referrer.
    pub fn is_referred(&self) -> bool {
        self.referrer_id.is_some()
    }
}

/// Result of `get_or_create`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registered {
    /// The stored record.
    pub user: UserEntity,
    /// True when the record was created by this call.
    pub created: bool,
}

/// A leaderboard row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopReferrer {
    /// The referrer.
    pub user_id: UserId,
    /// The referrer's stored name.
    pub username: Option<String>,
    /// How many users they referred.
    pub referral_count: u64,
}

/// One attribution, as listed by `/latest`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LatestReferral {
    /// Who got the credit.
    pub referrer_id: UserId,
    /// The referrer's stored name.
    pub referrer_username: Option<String>,
    /// Who was referred.
    pub invitee_id: UserId,
    /// The invitee's stored name.
    pub invitee_username: Option<String>,
    /// When the attribution was recorded.
    pub referred_at: DateTime<Utc>,
}

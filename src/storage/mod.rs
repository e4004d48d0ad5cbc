#[cfg(any(test, feature = "test-utils"))]
/// In-memory store for tests.
pub mod memory_storage;
/// PostgreSQL store.
pub mod postgres;
mod referral_code;
mod user_entity;

use async_trait::async_trait;
use mockall::automock;
pub use referral_code::{
    CodeGenerator, MAX_CODE_ATTEMPTS, REFERRAL_CODE_LENGTH, generate_referral_code,
    normalize_referral_code,
};
use teloxide::types::UserId;
use thiserror::Error;
pub use user_entity::{LatestReferral, Registered, TopReferrer, UserEntity};

/// Errors returned by a [`ReferralStorage`].
#[derive(Debug, Error)]
pub enum StorageError {
    /// The database query failed.
    #[error("Database error: {0}")]
    DbError(#[from] sqlx::Error),
    /// The embedded migrations could not be applied.
    #[error("Database migration failed: {0}")]
    MigrationError(#[from] sqlx::migrate::MigrateError),
    /// The referrer and the invitee are the same user.
    #[error("User {0} cannot refer themselves")]
    SelfReferral(u64),
    /// The invitee already has a referrer.
    #[error("User {0} has already been referred")]
    AlreadyReferred(u64),
    /// No such user.
    #[error("User {0} not found")]
    UserNotFound(u64),
    /// Every generated code collided with an existing one.
    #[error("Failed to generate a unique referral code after {0} attempts")]
    CodeGenerationExhausted(usize),
}

/// Result type of storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Persistence of users, codes and referral relations.
#[automock]
#[async_trait]
pub trait ReferralStorage: Send + Sync {
    /// Returns the user's record, creating it with a fresh referral code if it
    /// does not exist yet.
    async fn get_or_create(&self, user_id: UserId, username: Option<String>)
    -> StorageResult<Registered>;

    /// Get a user by id.
    async fn get_user(&self, user_id: UserId) -> StorageResult<Option<UserEntity>>;

    /// Resolve a referral code to the user owning it.
    async fn resolve_code(&self, code: &str) -> StorageResult<Option<UserId>>;

    /// Attribute `invitee` to `referrer` and increment the referrer's count.
    ///
    /// Runs as a single transaction. Fails with `SelfReferral`,
    /// `AlreadyReferred` or `UserNotFound` without changing any state.
    async fn record_referral(&self, referrer: UserId, invitee: UserId) -> StorageResult<()>;

    /// Store a personal channel invite link unless the user already has one.
    /// Returns the link that is stored after the call.
    async fn set_invite_link(&self, user_id: UserId, invite_link: &str) -> StorageResult<String>;

    /// Resolve a channel invite link to the user owning it.
    async fn resolve_invite_link(&self, invite_link: &str) -> StorageResult<Option<UserId>>;

    /// Users with the most referrals, highest first. Users without referrals
    /// are omitted.
    async fn top_referrers(&self, limit: usize) -> StorageResult<Vec<TopReferrer>>;

    /// The most recent attributions, newest first.
    async fn latest_referrals(&self, limit: usize) -> StorageResult<Vec<LatestReferral>>;
}

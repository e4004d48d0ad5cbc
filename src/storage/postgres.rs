use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use backoff::{Error as BackoffError, ExponentialBackoff, future::retry};
use chrono::{DateTime, Utc};
use sqlx::{
    FromRow, PgPool,
    migrate,
    postgres::{PgConnectOptions, PgPoolOptions},
};
use teloxide::types::UserId;
use tracing::{debug, warn};

use super::{
    CodeGenerator, LatestReferral, MAX_CODE_ATTEMPTS, ReferralStorage, Registered, StorageError,
    StorageResult, TopReferrer, UserEntity, generate_referral_code,
};

const SELECT_USER: &str = "SELECT user_id, username, referral_code, referral_count, \
                           referrer_id, invite_link, referred_at, created_at \
                           FROM users WHERE user_id = $1";

const INSERT_USER: &str = "INSERT INTO users (user_id, username, referral_code) \
                           VALUES ($1, $2, $3) ON CONFLICT DO NOTHING \
                           RETURNING user_id, username, referral_code, referral_count, \
                           referrer_id, invite_link, referred_at, created_at";

#[derive(Debug, FromRow)]
struct UserRow {
    user_id: i64,
    username: Option<String>,
    referral_code: String,
    referral_count: i64,
    referrer_id: Option<i64>,
    invite_link: Option<String>,
    referred_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl From<UserRow> for UserEntity {
    fn from(row: UserRow) -> Self {
        Self {
            user_id: from_db_id(row.user_id),
            username: row.username,
            referral_code: row.referral_code,
            referral_count: to_count(row.referral_count),
            referrer_id: row.referrer_id.map(from_db_id),
            invite_link: row.invite_link,
            referred_at: row.referred_at,
            created_at: row.created_at,
        }
    }
}

// Telegram user ids are positive and fit in a BIGINT.
fn db_id(user_id: UserId) -> i64 {
    user_id.0 as i64
}

fn from_db_id(id: i64) -> UserId {
    UserId(id as u64)
}

fn to_count(value: i64) -> u64 {
    u64::try_from(value).unwrap_or_default()
}

/// PostgreSQL backed referral store.
pub struct PostgresStorage {
    pool: PgPool,
    generate_code: CodeGenerator,
}

impl PostgresStorage {
    /// Wraps an existing pool and applies the embedded migrations.
    pub async fn new(pool: PgPool) -> StorageResult<Self> {
        migrate!("./migrations").run(&pool).await?;
        debug!("PostgreSQL database migrated");

        Ok(Self { pool, generate_code: Arc::new(generate_referral_code) })
    }

    /// Connects to the database, retrying while it is still starting up.
    pub async fn connect(options: PgConnectOptions, max_connections: u32) -> StorageResult<Self> {
        debug!("Connecting to PostgreSQL with at most {max_connections} connections");

        let operation = || {
            let options = options.clone();
            async move {
                PgPoolOptions::new()
                    .max_connections(max_connections)
                    .connect_with(options)
                    .await
                    .map_err(|e| {
                        warn!("Failed to connect to the database: {e}. Retrying...");
                        BackoffError::transient(e)
                    })
            }
        };
        let pool = retry(Self::backoff_config(), operation).await?;

        Self::new(pool).await
    }

    /// Replaces the referral code generator.
    pub fn with_code_generator(mut self, generate_code: CodeGenerator) -> Self {
        self.generate_code = generate_code;
        self
    }

    /// Closes all pooled connections.
    pub async fn close(&self) {
        self.pool.close().await;
        debug!("Database connection pool closed");
    }

    fn backoff_config() -> ExponentialBackoff {
        ExponentialBackoff {
            initial_interval: Duration::from_secs(1),
            max_interval: Duration::from_secs(10),
            max_elapsed_time: Some(Duration::from_secs(60)),
            multiplier: 2.0,
            ..Default::default()
        }
    }
}

#[async_trait]
impl ReferralStorage for PostgresStorage {
    async fn get_or_create(
        &self,
        user_id: UserId,
        username: Option<String>,
    ) -> StorageResult<Registered> {
        if let Some(user) = self.get_user(user_id).await? {
            return Ok(Registered { user, created: false });
        }

        for attempt in 1..=MAX_CODE_ATTEMPTS {
            let code = (self.generate_code)();
            let inserted = sqlx::query_as::<_, UserRow>(INSERT_USER)
                .bind(db_id(user_id))
                .bind(username.as_deref())
                .bind(&code)
                .fetch_optional(&self.pool)
                .await?;

            if let Some(row) = inserted {
                debug!("Created user {} with referral code {}", user_id.0, code);
                return Ok(Registered { user: row.into(), created: true });
            }

            // Nothing inserted: either a concurrent call created the user or the code is taken.
            if let Some(user) = self.get_user(user_id).await? {
                return Ok(Registered { user, created: false });
            }
            debug!("Referral code collision on attempt {attempt}, regenerating");
        }

        Err(StorageError::CodeGenerationExhausted(MAX_CODE_ATTEMPTS))
    }

    async fn get_user(&self, user_id: UserId) -> StorageResult<Option<UserEntity>> {
        let row = sqlx::query_as::<_, UserRow>(SELECT_USER)
            .bind(db_id(user_id))
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(UserEntity::from))
    }

    async fn resolve_code(&self, code: &str) -> StorageResult<Option<UserId>> {
        debug!("Resolving referral code: {}", code);
        let row: Option<(i64,)> =
            sqlx::query_as("SELECT user_id FROM users WHERE referral_code = $1")
                .bind(code)
                .fetch_optional(&self.pool)
                .await?;

        Ok(row.map(|(id,)| from_db_id(id)))
    }

    async fn record_referral(&self, referrer: UserId, invitee: UserId) -> StorageResult<()> {
        if referrer == invitee {
            return Err(StorageError::SelfReferral(invitee.0));
        }

        let mut tx = self.pool.begin().await?;

        // Lock both rows in id order so crossed referrals cannot deadlock.
        let locked: Vec<(i64, Option<i64>)> = sqlx::query_as(
            "SELECT user_id, referrer_id FROM users WHERE user_id IN ($1, $2) \
             ORDER BY user_id FOR UPDATE",
        )
        .bind(db_id(referrer))
        .bind(db_id(invitee))
        .fetch_all(&mut *tx)
        .await?;

        let current = locked.iter().find(|(id, _)| *id == db_id(invitee));
        match current {
            None => return Err(StorageError::UserNotFound(invitee.0)),
            Some((_, Some(_))) => return Err(StorageError::AlreadyReferred(invitee.0)),
            Some((_, None)) => {}
        }
        if !locked.iter().any(|(id, _)| *id == db_id(referrer)) {
            return Err(StorageError::UserNotFound(referrer.0));
        }

        let incremented =
            sqlx::query("UPDATE users SET referral_count = referral_count + 1 WHERE user_id = $1")
                .bind(db_id(referrer))
                .execute(&mut *tx)
                .await?;
        if incremented.rows_affected() == 0 {
            return Err(StorageError::UserNotFound(referrer.0));
        }

        sqlx::query(
            "UPDATE users SET referrer_id = $1, referred_at = CURRENT_TIMESTAMP WHERE user_id = $2",
        )
        .bind(db_id(referrer))
        .bind(db_id(invitee))
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        debug!("User {} referred by {}", invitee.0, referrer.0);

        Ok(())
    }

    async fn set_invite_link(&self, user_id: UserId, invite_link: &str) -> StorageResult<String> {
        let row: Option<(Option<String>,)> = sqlx::query_as(
            "UPDATE users SET invite_link = COALESCE(invite_link, $2) WHERE user_id = $1 \
             RETURNING invite_link",
        )
        .bind(db_id(user_id))
        .bind(invite_link)
        .fetch_optional(&self.pool)
        .await?;

        row.and_then(|(link,)| link).ok_or(StorageError::UserNotFound(user_id.0))
    }

    async fn resolve_invite_link(&self, invite_link: &str) -> StorageResult<Option<UserId>> {
        let row: Option<(i64,)> =
            sqlx::query_as("SELECT user_id FROM users WHERE invite_link = $1")
                .bind(invite_link)
                .fetch_optional(&self.pool)
                .await?;

        Ok(row.map(|(id,)| from_db_id(id)))
    }

    async fn top_referrers(&self, limit: usize) -> StorageResult<Vec<TopReferrer>> {
        let rows: Vec<(i64, Option<String>, i64)> = sqlx::query_as(
            "SELECT user_id, username, referral_count FROM users WHERE referral_count > 0 \
             ORDER BY referral_count DESC, user_id LIMIT $1",
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(id, username, referral_count)| TopReferrer {
                user_id: from_db_id(id),
                username,
                referral_count: to_count(referral_count),
            })
            .collect())
    }

    async fn latest_referrals(&self, limit: usize) -> StorageResult<Vec<LatestReferral>> {
        let rows: Vec<(i64, Option<String>, i64, Option<String>, DateTime<Utc>)> = sqlx::query_as(
            "SELECT r.user_id, r.username, u.user_id, u.username, u.referred_at \
             FROM users u INNER JOIN users r ON u.referrer_id = r.user_id \
             WHERE u.referred_at IS NOT NULL \
             ORDER BY u.referred_at DESC, u.user_id DESC LIMIT $1",
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(
                |(referrer_id, referrer_username, invitee_id, invitee_username, referred_at)| {
                    LatestReferral {
                        referrer_id: from_db_id(referrer_id),
                        referrer_username,
                        invitee_id: from_db_id(invitee_id),
                        invitee_username,
                        referred_at,
                    }
                },
            )
            .collect())
    }
}

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use chrono::Utc;
use teloxide::types::UserId;
use tokio::sync::Mutex;
use tracing::debug;

use super::{
    CodeGenerator, LatestReferral, MAX_CODE_ATTEMPTS, ReferralStorage, Registered, StorageError,
    StorageResult, TopReferrer, UserEntity, generate_referral_code,
};

#[derive(Default)]
struct State {
    users: HashMap<UserId, UserEntity>,
    // Invitees in attribution order.
    attributions: Vec<UserId>,
}

/// Referral store kept in memory behind an async mutex.
///
/// Every operation holds the lock for its whole duration, which gives the
/// same all-or-nothing behaviour as the database transaction.
pub struct InMemoryStorage {
    state: Mutex<State>,
    generate_code: CodeGenerator,
}

impl Default for InMemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStorage {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            generate_code: Arc::new(generate_referral_code),
        }
    }

    /// Replaces the referral code generator.
    pub fn with_code_generator(mut self, generate_code: CodeGenerator) -> Self {
        self.generate_code = generate_code;
        self
    }
}

#[async_trait]
impl ReferralStorage for InMemoryStorage {
    async fn get_or_create(
        &self,
        user_id: UserId,
        username: Option<String>,
    ) -> StorageResult<Registered> {
        let mut state = self.state.lock().await;
        if let Some(user) = state.users.get(&user_id) {
            return Ok(Registered { user: user.clone(), created: false });
        }

        for _ in 0..MAX_CODE_ATTEMPTS {
            let code = (self.generate_code)();
            if state.users.values().any(|u| u.referral_code == code) {
                debug!("Referral code collision, regenerating");
                continue;
            }
            let user = UserEntity::new(user_id, username, code);
            state.users.insert(user_id, user.clone());
            return Ok(Registered { user, created: true });
        }

        Err(StorageError::CodeGenerationExhausted(MAX_CODE_ATTEMPTS))
    }

    async fn get_user(&self, user_id: UserId) -> StorageResult<Option<UserEntity>> {
        Ok(self.state.lock().await.users.get(&user_id).cloned())
    }

    async fn resolve_code(&self, code: &str) -> StorageResult<Option<UserId>> {
        let state = self.state.lock().await;
        Ok(state.users.values().find(|u| u.referral_code == code).map(|u| u.user_id))
    }

    async fn record_referral(&self, referrer: UserId, invitee: UserId) -> StorageResult<()> {
        if referrer == invitee {
            return Err(StorageError::SelfReferral(invitee.0));
        }

        let mut state = self.state.lock().await;
        match state.users.get(&invitee) {
            None => return Err(StorageError::UserNotFound(invitee.0)),
            Some(user) if user.is_referred() => {
                return Err(StorageError::AlreadyReferred(invitee.0));
            }
            Some(_) => {}
        }
        let referrer_user =
            state.users.get_mut(&referrer).ok_or(StorageError::UserNotFound(referrer.0))?;
        referrer_user.referral_count += 1;

        if let Some(invitee_user) = state.users.get_mut(&invitee) {
            invitee_user.referrer_id = Some(referrer);
            invitee_user.referred_at = Some(Utc::now());
        }
        state.attributions.push(invitee);

        Ok(())
    }

    async fn set_invite_link(&self, user_id: UserId, invite_link: &str) -> StorageResult<String> {
        let mut state = self.state.lock().await;
        let user = state.users.get_mut(&user_id).ok_or(StorageError::UserNotFound(user_id.0))?;
        Ok(user.invite_link.get_or_insert_with(|| invite_link.to_string()).clone())
    }

    async fn resolve_invite_link(&self, invite_link: &str) -> StorageResult<Option<UserId>> {
        let state = self.state.lock().await;
        Ok(state
            .users
            .values()
            .find(|u| u.invite_link.as_deref() == Some(invite_link))
            .map(|u| u.user_id))
    }

    async fn top_referrers(&self, limit: usize) -> StorageResult<Vec<TopReferrer>> {
        let state = self.state.lock().await;
        let mut referrers: Vec<TopReferrer> = state
            .users
            .values()
            .filter(|u| u.referral_count > 0)
            .map(|u| TopReferrer {
                user_id: u.user_id,
                username: u.username.clone(),
                referral_count: u.referral_count,
            })
            .collect();
        referrers.sort_by(|a, b| {
            b.referral_count.cmp(&a.referral_count).then_with(|| a.user_id.0.cmp(&b.user_id.0))
        });
        referrers.truncate(limit);
        Ok(referrers)
    }

    async fn latest_referrals(&self, limit: usize) -> StorageResult<Vec<LatestReferral>> {
        let state = self.state.lock().await;
        Ok(state
            .attributions
            .iter()
            .rev()
            .filter_map(|invitee_id| {
                let invitee = state.users.get(invitee_id)?;
                let referrer_id = invitee.referrer_id?;
                let referrer = state.users.get(&referrer_id)?;
                Some(LatestReferral {
                    referrer_id,
                    referrer_username: referrer.username.clone(),
                    invitee_id: invitee.user_id,
                    invitee_username: invitee.username.clone(),
                    referred_at: invitee.referred_at?,
                })
            })
            .take(limit)
            .collect())
    }
}

use std::sync::Arc;

use chrono::Utc;
use mockall::predicate::*;
use serde_json::json;
use teloxide::{
    ApiError, RequestError,
    types::{ChatId, ChatMemberUpdated, UserId},
};

use crate::{
    bot_handler::{BotHandler, Command},
    messaging::{MessagingError, MockMessagingService},
    referral::{
        Attribution, JoinOutcome, Member, MockReferralService, ReferralLinks, ReferralServiceError,
        StartOutcome,
    },
    storage::{LatestReferral, StorageError, TopReferrer, UserEntity},
};

const CHAT: ChatId = ChatId(100);

fn bob() -> Member {
    Member { id: UserId(2), display_name: Some("bob".to_string()) }
}

fn start_outcome(attribution: Attribution) -> StartOutcome {
    StartOutcome {
        user: UserEntity::new(UserId(2), Some("bob".to_string()), "BOBCODE1".to_string()),
        created: true,
        links: ReferralLinks {
            start_link: "https://t.me/test_bot?start=BOBCODE1".to_string(),
            invite_link: None,
        },
        attribution,
    }
}

fn storage_failure() -> ReferralServiceError {
    ReferralServiceError::StorageError(StorageError::DbError(sqlx::Error::PoolTimedOut))
}

// Bob's membership change in the referral channel.
fn chat_member_update(old: &str, new: &str, invite_link: Option<&str>) -> ChatMemberUpdated {
    let bob = json!({ "id": 2, "is_bot": false, "first_name": "Bob", "username": "bob" });
    let mut update = json!({
        "chat": { "id": -1001234567890i64, "type": "channel", "title": "Referrals" },
        "from": bob.clone(),
        "date": 1_700_000_000,
        "old_chat_member": { "status": old, "user": bob.clone() },
        "new_chat_member": { "status": new, "user": bob },
    });
    if let Some(link) = invite_link {
        update["invite_link"] = json!({
            "invite_link": link,
            "creator": { "id": 999, "is_bot": true, "first_name": "Referral Bot" },
            "creates_join_request": false,
            "is_primary": false,
            "is_revoked": false,
        });
    }
    serde_json::from_value(update).unwrap()
}

fn handler(messaging: MockMessagingService, referral: MockReferralService) -> BotHandler {
    BotHandler::new(Arc::new(messaging), Arc::new(referral))
}

#[tokio::test]
async fn test_start_sends_links_and_notifies_referrer() {
    let mut messaging = MockMessagingService::new();
    let mut referral = MockReferralService::new();

    referral
        .expect_start()
        .withf(|member, payload| member.id == UserId(2) && payload == "ALICE123")
        .times(1)
        .returning(|_, _| Ok(start_outcome(Attribution::Attributed { referrer: UserId(1) })));
    messaging
        .expect_send_start_msg()
        .withf(|chat_id, outcome| *chat_id == CHAT && outcome.user.user_id == UserId(2))
        .times(1)
        .returning(|_, _| Ok(()));
    messaging
        .expect_send_referral_notification()
        .withf(|referrer, invitee| *referrer == UserId(1) && invitee.id == UserId(2))
        .times(1)
        .returning(|_, _| Ok(()));

    let result = handler(messaging, referral)
        .handle_command(CHAT, &bob(), Command::Start("ALICE123".to_string()))
        .await;

    assert!(result.is_ok());
}

#[tokio::test]
async fn test_start_without_attribution_does_not_notify() {
    let mut messaging = MockMessagingService::new();
    let mut referral = MockReferralService::new();

    referral.expect_start().returning(|_, _| Ok(start_outcome(Attribution::SelfReferral)));
    messaging.expect_send_start_msg().times(1).returning(|_, _| Ok(()));
    messaging.expect_send_referral_notification().never();

    let result = handler(messaging, referral)
        .handle_command(CHAT, &bob(), Command::Start(String::new()))
        .await;

    assert!(result.is_ok());
}

#[tokio::test]
async fn test_start_ignores_notification_failure() {
    let mut messaging = MockMessagingService::new();
    let mut referral = MockReferralService::new();

    referral
        .expect_start()
        .returning(|_, _| Ok(start_outcome(Attribution::Attributed { referrer: UserId(1) })));
    messaging.expect_send_start_msg().returning(|_, _| Ok(()));
    messaging.expect_send_referral_notification().times(1).returning(|_, _| {
        Err(MessagingError::TeloxideRequest(RequestError::Api(ApiError::BotBlocked)))
    });

    let result = handler(messaging, referral)
        .handle_command(CHAT, &bob(), Command::Start("ALICE123".to_string()))
        .await;

    assert!(result.is_ok());
}

#[tokio::test]
async fn test_start_notifies_referrer_even_if_reply_fails() {
    let mut messaging = MockMessagingService::new();
    let mut referral = MockReferralService::new();

    referral
        .expect_start()
        .returning(|_, _| Ok(start_outcome(Attribution::Attributed { referrer: UserId(1) })));
    messaging.expect_send_referral_notification().times(1).returning(|_, _| Ok(()));
    messaging.expect_send_start_msg().times(1).returning(|_, _| {
        Err(MessagingError::TeloxideRequest(RequestError::Api(ApiError::BotBlocked)))
    });

    let result = handler(messaging, referral)
        .handle_command(CHAT, &bob(), Command::Start("ALICE123".to_string()))
        .await;

    assert!(result.is_err());
}

#[tokio::test]
async fn test_referral_error_sends_generic_error() {
    let mut messaging = MockMessagingService::new();
    let mut referral = MockReferralService::new();

    referral.expect_start().returning(|_, _| Err(storage_failure()));
    messaging.expect_send_start_msg().never();
    messaging.expect_send_error_msg().with(eq(CHAT)).times(1).returning(|_| Ok(()));

    let result = handler(messaging, referral)
        .handle_command(CHAT, &bob(), Command::Start(String::new()))
        .await;

    assert!(result.is_ok());
}

#[tokio::test]
async fn test_send_failure_is_returned() {
    let mut messaging = MockMessagingService::new();
    let referral = MockReferralService::new();

    messaging.expect_send_help_msg().returning(|_| {
        Err(MessagingError::TeloxideRequest(RequestError::Api(ApiError::BotBlocked)))
    });

    let result = handler(messaging, referral).handle_command(CHAT, &bob(), Command::Help).await;

    assert!(result.is_err());
}

#[tokio::test]
async fn test_check_with_referral_code() {
    let mut messaging = MockMessagingService::new();
    let mut referral = MockReferralService::new();

    referral.expect_referral_count().with(eq(UserId(2))).returning(|_| Ok(Some(3)));
    messaging
        .expect_send_referral_count_msg()
        .with(eq(CHAT), eq(3))
        .times(1)
        .returning(|_, _| Ok(()));

    let result = handler(messaging, referral).handle_command(CHAT, &bob(), Command::Check).await;

    assert!(result.is_ok());
}

#[tokio::test]
async fn test_check_without_referral_code() {
    let mut messaging = MockMessagingService::new();
    let mut referral = MockReferralService::new();

    referral.expect_referral_count().returning(|_| Ok(None));
    messaging.expect_send_referral_count_msg().never();
    messaging.expect_send_no_referral_code_msg().with(eq(CHAT)).times(1).returning(|_| Ok(()));

    let result = handler(messaging, referral).handle_command(CHAT, &bob(), Command::Check).await;

    assert!(result.is_ok());
}

#[tokio::test]
async fn test_top() {
    let mut messaging = MockMessagingService::new();
    let mut referral = MockReferralService::new();

    referral.expect_top_referrers().returning(|| {
        Ok(vec![TopReferrer {
            user_id: UserId(1),
            username: Some("alice".to_string()),
            referral_count: 2,
        }])
    });
    messaging
        .expect_send_top_referrers_msg()
        .withf(|chat_id, referrers| *chat_id == CHAT && referrers.len() == 1)
        .times(1)
        .returning(|_, _| Ok(()));

    let result = handler(messaging, referral).handle_command(CHAT, &bob(), Command::Top).await;

    assert!(result.is_ok());
}

#[tokio::test]
async fn test_latest_for_admin() {
    let mut messaging = MockMessagingService::new();
    let mut referral = MockReferralService::new();

    referral.expect_is_channel_admin().with(eq(UserId(2))).returning(|_| Ok(true));
    referral.expect_latest_referrals().times(1).returning(|| {
        Ok(vec![LatestReferral {
            referrer_id: UserId(1),
            referrer_username: Some("alice".to_string()),
            invitee_id: UserId(3),
            invitee_username: None,
            referred_at: Utc::now(),
        }])
    });
    messaging
        .expect_send_latest_referrals_msg()
        .withf(|chat_id, referrals| *chat_id == CHAT && referrals.len() == 1)
        .times(1)
        .returning(|_, _| Ok(()));

    let result = handler(messaging, referral).handle_command(CHAT, &bob(), Command::Latest).await;

    assert!(result.is_ok());
}

#[tokio::test]
async fn test_latest_for_non_admin() {
    let mut messaging = MockMessagingService::new();
    let mut referral = MockReferralService::new();

    referral.expect_is_channel_admin().returning(|_| Ok(false));
    referral.expect_latest_referrals().never();
    messaging.expect_send_permission_denied_msg().with(eq(CHAT)).times(1).returning(|_| Ok(()));

    let result = handler(messaging, referral).handle_command(CHAT, &bob(), Command::Latest).await;

    assert!(result.is_ok());
}

#[tokio::test]
async fn test_help() {
    let mut messaging = MockMessagingService::new();
    let referral = MockReferralService::new();

    messaging.expect_send_help_msg().with(eq(CHAT)).times(1).returning(|_| Ok(()));

    let result = handler(messaging, referral).handle_command(CHAT, &bob(), Command::Help).await;

    assert!(result.is_ok());
}

#[tokio::test]
async fn test_join_notifies_referrer() {
    let mut messaging = MockMessagingService::new();
    let mut referral = MockReferralService::new();

    referral
        .expect_attribute_join()
        .withf(|member, link| member.id == UserId(2) && link == "https://t.me/+alice")
        .times(1)
        .returning(|_, _| Ok(JoinOutcome::Attributed { referrer: UserId(1) }));
    messaging
        .expect_send_referral_notification()
        .withf(|referrer, invitee| *referrer == UserId(1) && invitee.id == UserId(2))
        .times(1)
        .returning(|_, _| Ok(()));

    let result = handler(messaging, referral).handle_join(&bob(), "https://t.me/+alice").await;

    assert!(result.is_ok());
}

#[tokio::test]
async fn test_join_through_unknown_link() {
    let mut messaging = MockMessagingService::new();
    let mut referral = MockReferralService::new();

    referral.expect_attribute_join().returning(|_, _| Ok(JoinOutcome::UnknownLink));
    messaging.expect_send_referral_notification().never();

    let result = handler(messaging, referral).handle_join(&bob(), "https://t.me/+other").await;

    assert!(result.is_ok());
}

#[tokio::test]
async fn test_join_error_is_returned() {
    let messaging = MockMessagingService::new();
    let mut referral = MockReferralService::new();

    referral.expect_attribute_join().returning(|_, _| Err(storage_failure()));

    let result = handler(messaging, referral).handle_join(&bob(), "https://t.me/+alice").await;

    assert!(result.is_err());
}

#[tokio::test]
async fn test_chat_member_join_through_invite_link() {
    let mut messaging = MockMessagingService::new();
    let mut referral = MockReferralService::new();

    referral
        .expect_attribute_join()
        .withf(|member, link| *member == bob() && link == "https://t.me/+alice")
        .times(1)
        .returning(|_, _| Ok(JoinOutcome::Attributed { referrer: UserId(1) }));
    messaging
        .expect_send_referral_notification()
        .withf(|referrer, invitee| *referrer == UserId(1) && *invitee == bob())
        .times(1)
        .returning(|_, _| Ok(()));

    let update = chat_member_update("left", "member", Some("https://t.me/+alice"));
    let result = handler(messaging, referral).handle_chat_member(&update).await;

    assert!(result.is_ok());
}

#[tokio::test]
async fn test_chat_member_join_without_invite_link_is_ignored() {
    let mut messaging = MockMessagingService::new();
    let mut referral = MockReferralService::new();

    referral.expect_attribute_join().never();
    messaging.expect_send_referral_notification().never();

    let update = chat_member_update("left", "member", None);
    let result = handler(messaging, referral).handle_chat_member(&update).await;

    assert!(result.is_ok());
}

#[tokio::test]
async fn test_chat_member_leaving_is_ignored() {
    let mut messaging = MockMessagingService::new();
    let mut referral = MockReferralService::new();

    referral.expect_attribute_join().never();
    messaging.expect_send_referral_notification().never();

    let update = chat_member_update("member", "left", Some("https://t.me/+alice"));
    let result = handler(messaging, referral).handle_chat_member(&update).await;

    assert!(result.is_ok());
}

#[test]
fn test_parse_commands() {
    use teloxide::utils::command::BotCommands;

    assert_eq!(
        Command::parse("/start ABC123", "test_bot").unwrap(),
        Command::Start("ABC123".to_string())
    );
    assert_eq!(Command::parse("/start", "test_bot").unwrap(), Command::Start(String::new()));
    assert_eq!(Command::parse("/check", "test_bot").unwrap(), Command::Check);
    assert_eq!(Command::parse("/latest@test_bot", "test_bot").unwrap(), Command::Latest);
}

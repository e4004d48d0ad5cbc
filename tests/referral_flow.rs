use std::sync::{Arc, Mutex};

use referral_bot::{
    bot_handler::{BotHandler, Command},
    messaging::MockMessagingService,
    referral::{Attribution, DefaultReferralService, Member, ReferralService},
    storage::{ReferralStorage, memory_storage::InMemoryStorage},
};
use teloxide::types::{ChatId, UserId};

fn member(id: u64, name: &str) -> Member {
    Member { id: UserId(id), display_name: Some(name.to_string()) }
}

#[tokio::test]
async fn test_referral_flow_through_handler() {
    let storage = Arc::new(InMemoryStorage::new());
    let referral = Arc::new(DefaultReferralService::new(storage.clone(), None, "flow_bot"));

    let attributions = Arc::new(Mutex::new(Vec::new()));
    let notified = Arc::new(Mutex::new(Vec::new()));
    let counts = Arc::new(Mutex::new(Vec::new()));

    let mut messaging = MockMessagingService::new();
    let seen = attributions.clone();
    messaging.expect_send_start_msg().returning(move |_, outcome| {
        seen.lock().unwrap().push(outcome.attribution.clone());
        Ok(())
    });
    let seen = notified.clone();
    messaging.expect_send_referral_notification().returning(move |referrer, invitee| {
        seen.lock().unwrap().push((referrer, invitee.id));
        Ok(())
    });
    let seen = counts.clone();
    messaging.expect_send_referral_count_msg().returning(move |_, count| {
        seen.lock().unwrap().push(count);
        Ok(())
    });

    let handler = BotHandler::new(Arc::new(messaging), referral.clone());
    let alice = member(1, "alice");
    let bob = member(2, "bob");

    handler.handle_command(ChatId(1), &alice, Command::Start(String::new())).await.unwrap();
    let code = storage.get_user(alice.id).await.unwrap().unwrap().referral_code;

    handler.handle_command(ChatId(2), &bob, Command::Start(code.clone())).await.unwrap();
    handler.handle_command(ChatId(2), &bob, Command::Start(code.clone())).await.unwrap();
    handler.handle_command(ChatId(1), &alice, Command::Start(code)).await.unwrap();
    handler.handle_command(ChatId(1), &alice, Command::Check).await.unwrap();

    assert_eq!(
        *attributions.lock().unwrap(),
        vec![
            Attribution::NoCode,
            Attribution::Attributed { referrer: alice.id },
            Attribution::AlreadyRegistered,
            Attribution::SelfReferral,
        ]
    );
    assert_eq!(*notified.lock().unwrap(), vec![(alice.id, bob.id)]);
    assert_eq!(*counts.lock().unwrap(), vec![1]);
    assert_eq!(referral.referral_count(bob.id).await.unwrap(), Some(0));
}

#[tokio::test]
async fn test_top_referrers_after_several_invites() {
    let storage = Arc::new(InMemoryStorage::new());
    let referral = DefaultReferralService::new(storage.clone(), None, "flow_bot");

    let alice_code = referral.start(&member(1, "alice"), "").await.unwrap().user.referral_code;
    let carol_code = referral.start(&member(3, "carol"), "").await.unwrap().user.referral_code;
    for id in 10..13 {
        referral.start(&member(id, "invitee"), &alice_code).await.unwrap();
    }
    referral.start(&member(20, "invitee"), &carol_code).await.unwrap();

    let top = referral.top_referrers().await.unwrap();
    let latest = referral.latest_referrals().await.unwrap();

    assert_eq!(top[0].user_id, UserId(1));
    assert_eq!(top[0].referral_count, 3);
    assert_eq!(top[1].user_id, UserId(3));
    assert_eq!(top[1].referral_count, 1);
    assert_eq!(latest.len(), 4);
    assert_eq!(latest[0].invitee_id, UserId(20));
}

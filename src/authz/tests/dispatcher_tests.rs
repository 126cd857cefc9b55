//! Event dispatcher integration tests

use std::sync::Arc;
use std::time::Duration;
use tessera_authz::{
    AuthzError, CheckPerformed, Dispatcher, EventPayload, EventType, Item, ItemAction,
    ManualClock, Policy,
};

fn policy_changed(id: &str) -> EventPayload {
    EventPayload::item_changed(ItemAction::Update, Item::Policy(Policy::new(id)))
}

fn dispatcher_at(secs: i64) -> (Dispatcher, ManualClock) {
    let clock = ManualClock::at_secs(secs);
    (Dispatcher::new(Arc::new(clock.clone())), clock)
}

// ============================================================================
// DELIVERY
// ============================================================================

#[tokio::test]
async fn test_each_subscriber_gets_exactly_one_copy() {
    let (dispatcher, _clock) = dispatcher_at(1_234);
    let mut first = dispatcher.subscribe(EventType::PolicyChanged);
    let mut second = dispatcher.subscribe(EventType::PolicyChanged);

    let payload = policy_changed("p");
    dispatcher
        .dispatch(EventType::PolicyChanged, payload.clone())
        .await
        .unwrap();

    for subscription in [&mut first, &mut second] {
        let event = subscription.try_recv().expect("one event");
        assert_eq!(event.event_type, EventType::PolicyChanged);
        assert_eq!(event.payload, payload);
        assert_eq!(event.timestamp.timestamp(), 1_234);
        assert!(subscription.try_recv().is_none());
    }
}

#[tokio::test]
async fn test_subscribers_of_other_types_see_nothing() {
    let (dispatcher, _clock) = dispatcher_at(0);
    let mut policies = dispatcher.subscribe(EventType::PolicyChanged);
    let mut checks = dispatcher.subscribe(EventType::CheckPerformed);

    dispatcher
        .dispatch(EventType::PolicyChanged, policy_changed("p"))
        .await
        .unwrap();

    assert!(policies.try_recv().is_some());
    assert!(checks.try_recv().is_none());
}

#[tokio::test]
async fn test_events_arrive_in_dispatch_order() {
    let (dispatcher, clock) = dispatcher_at(10);
    let mut subscription = dispatcher.subscribe(EventType::PolicyChanged);

    for id in ["a", "b", "c"] {
        dispatcher
            .dispatch(EventType::PolicyChanged, policy_changed(id))
            .await
            .unwrap();
        clock.advance(chrono::Duration::seconds(1));
    }

    let mut seen = Vec::new();
    while let Some(event) = subscription.try_recv() {
        let changed = match event.payload {
            EventPayload::ItemChanged(changed) => changed,
            other => panic!("unexpected payload {:?}", other),
        };
        seen.push((changed.item.id().to_string(), event.timestamp.timestamp()));
    }
    assert_eq!(
        seen,
        vec![("a".to_string(), 10), ("b".to_string(), 11), ("c".to_string(), 12)]
    );
}

#[tokio::test]
async fn test_full_queue_applies_backpressure() {
    let clock = ManualClock::at_secs(0);
    let dispatcher = Arc::new(Dispatcher::with_capacity(Arc::new(clock), 1));
    let mut subscription = dispatcher.subscribe(EventType::CheckPerformed);

    let check = EventPayload::CheckPerformed(CheckPerformed {
        principal_id: "alice".to_string(),
        resource_kind: "post".to_string(),
        resource_value: "1".to_string(),
        action_id: "edit".to_string(),
        allowed: true,
    });

    dispatcher
        .dispatch(EventType::CheckPerformed, check.clone())
        .await
        .unwrap();

    let blocked = {
        let dispatcher = dispatcher.clone();
        let check = check.clone();
        tokio::spawn(async move { dispatcher.dispatch(EventType::CheckPerformed, check).await })
    };

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!blocked.is_finished());

    assert!(subscription.recv().await.is_some());
    blocked.await.unwrap().unwrap();
    assert!(subscription.recv().await.is_some());
}

// ============================================================================
// UNSUBSCRIBE
// ============================================================================

#[tokio::test]
async fn test_unsubscribe_only_removes_that_queue() {
    let (dispatcher, _clock) = dispatcher_at(0);
    let gone = dispatcher.subscribe(EventType::PolicyChanged);
    let mut kept = dispatcher.subscribe(EventType::PolicyChanged);

    dispatcher
        .unsubscribe(EventType::PolicyChanged, gone.id())
        .unwrap();
    dispatcher
        .dispatch(EventType::PolicyChanged, policy_changed("p"))
        .await
        .unwrap();

    assert!(kept.try_recv().is_some());
}

#[tokio::test]
async fn test_only_dropped_receivers_counts_as_no_subscriber() {
    let (dispatcher, _clock) = dispatcher_at(0);
    let first = dispatcher.subscribe(EventType::PolicyChanged);
    let second = dispatcher.subscribe(EventType::PolicyChanged);
    drop(first);
    drop(second);

    // Still registered, but nobody can receive
    assert_eq!(dispatcher.subscriber_count(EventType::PolicyChanged), 2);
    assert!(matches!(
        dispatcher
            .dispatch(EventType::PolicyChanged, policy_changed("p"))
            .await,
        Err(AuthzError::NoSubscriber(_))
    ));
}

#[tokio::test]
async fn test_independent_dispatchers_do_not_share_queues() {
    let (one, _) = dispatcher_at(0);
    let (two, _) = dispatcher_at(0);
    let _subscription = one.subscribe(EventType::PolicyChanged);

    assert!(two
        .dispatch(EventType::PolicyChanged, policy_changed("p"))
        .await
        .is_err());
}

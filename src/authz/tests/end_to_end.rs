//! End-to-end tests through the runtime
//!
//! Policy change → compile subscriber → flat index → checker → check events →
//! audit, stats and metrics subscribers.

mod common;

use common::principal_with;
use std::sync::Arc;
use std::time::Duration;
use tessera_authz::store::{Filter, Pagination, Repository};
use tessera_authz::{
    Action, AuthzConfig, AuthzError, AuthzRuntime, EventType, Grantee, Item, ItemAction,
    ManualClock, Policy, Repositories, Resource,
};

const T1: i64 = 1_700_000_000;

fn post_editors() -> Policy {
    Policy::new("post-editors")
        .with_resource(Resource::parse("post.*").unwrap())
        .with_action(Action::new("edit"))
}

async fn seeded_repositories() -> Repositories {
    let repos = Repositories::in_memory();
    repos.policies.create(vec![post_editors()]).await.unwrap();
    repos
        .principals
        .create(vec![principal_with("p", "editor", vec![post_editors()])])
        .await
        .unwrap();
    repos
}

async fn wait_for_rows(repos: &Repositories, policy_id: &str, expected: u64) {
    for _ in 0..200 {
        let (_, total) = repos
            .index
            .find(&Filter::new().eq("policy_id", policy_id), Pagination::all(), None)
            .await
            .unwrap();
        if total == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("index never reached {} row(s) for {}", expected, policy_id);
}

// ============================================================================
// POLICY TO DECISION
// ============================================================================

#[tokio::test]
async fn test_post_editors_scenario() {
    let repos = seeded_repositories().await;
    let clock = ManualClock::at_secs(T1);
    let runtime = AuthzRuntime::start(&AuthzConfig::default(), repos.clone(), Arc::new(clock)).unwrap();

    runtime
        .publish_change(ItemAction::Create, Item::Policy(post_editors()))
        .await
        .unwrap();
    wait_for_rows(&repos, "post-editors", 1).await;

    let (rows, _) = repos
        .index
        .find(&Filter::new(), Pagination::all(), None)
        .await
        .unwrap();
    let row = &rows[0];
    assert_eq!(row.grantee, Grantee::Policy("post-editors".to_string()));
    assert_eq!(row.resource_kind, "post");
    assert_eq!(row.resource_value, "*");
    assert_eq!(row.action_id, "edit");
    assert_eq!(row.version, T1);

    let checker = runtime.checker();
    assert!(checker.is_allowed("p", "post", "42", "edit").await.unwrap());
    assert!(!checker.is_allowed("p", "post", "42", "delete").await.unwrap());
    assert!(!checker.is_allowed("p", "comment", "42", "edit").await.unwrap());

    runtime.shutdown().await;
}

#[tokio::test]
async fn test_failed_compile_does_not_stop_subscriber() {
    let repos = seeded_repositories().await;
    let runtime =
        AuthzRuntime::start(&AuthzConfig::default(), repos.clone(), Arc::new(ManualClock::at_secs(T1)))
            .unwrap();

    runtime
        .publish_change(ItemAction::Update, Item::Policy(Policy::new("ghost")))
        .await
        .unwrap();
    runtime
        .publish_change(ItemAction::Update, Item::Policy(post_editors()))
        .await
        .unwrap();

    wait_for_rows(&repos, "post-editors", 1).await;
    runtime.shutdown().await;
}

#[tokio::test]
async fn test_changes_without_listeners_fail_fast() {
    let repos = seeded_repositories().await;
    let runtime =
        AuthzRuntime::start(&AuthzConfig::default(), repos, Arc::new(ManualClock::at_secs(T1))).unwrap();

    let err = runtime
        .publish_change(ItemAction::Create, Item::Action(Action::new("edit")))
        .await
        .unwrap_err();
    assert!(matches!(err, AuthzError::NoSubscriber(EventType::ActionChanged)));

    runtime.shutdown().await;
}

// ============================================================================
// DECISION RECORDING
// ============================================================================

#[tokio::test]
async fn test_checks_are_audited_counted_and_measured() {
    let repos = seeded_repositories().await;
    let runtime =
        AuthzRuntime::start(&AuthzConfig::default(), repos.clone(), Arc::new(ManualClock::at_secs(T1)))
            .unwrap();
    runtime.compiler().compile_policy("post-editors").await.unwrap();
    let metrics = runtime.metrics().clone();

    let checker = runtime.checker();
    assert!(checker.is_allowed("p", "post", "1", "edit").await.unwrap());
    assert!(!checker.is_allowed("p", "post", "1", "delete").await.unwrap());
    assert!(!checker.is_allowed("p", "comment", "1", "edit").await.unwrap());

    // Below the flush size; shutdown flushes what is spooled
    runtime.shutdown().await;

    let (audit, total) = repos
        .audit
        .find(&Filter::new(), Pagination::all(), None)
        .await
        .unwrap();
    assert_eq!(total, 3);
    assert_eq!(audit.iter().filter(|e| e.allowed).count(), 1);
    assert!(audit.iter().all(|e| e.timestamp.timestamp() == T1));

    let stats = repos
        .stats
        .get_by_fields(&Filter::new().eq("day", "2023-11-14"))
        .await
        .unwrap();
    assert_eq!((stats.allowed, stats.denied), (1, 2));

    assert_eq!(metrics.count("post", "edit", true), 1);
    assert_eq!(metrics.count("post", "delete", false), 1);
    assert_eq!(metrics.count("comment", "edit", false), 1);
}

#[tokio::test]
async fn test_stats_accumulate_across_flushes() {
    let repos = seeded_repositories().await;
    let mut config = AuthzConfig::default();
    config.spooler.flush_size = 2;
    let runtime = AuthzRuntime::start(&config, repos.clone(), Arc::new(ManualClock::at_secs(T1))).unwrap();
    runtime.compiler().compile_policy("post-editors").await.unwrap();

    for _ in 0..5 {
        runtime.checker().is_allowed("p", "post", "1", "edit").await.unwrap();
    }
    runtime.shutdown().await;

    let stats = repos
        .stats
        .get_by_fields(&Filter::new().eq("day", "2023-11-14"))
        .await
        .unwrap();
    assert_eq!(stats.allowed, 5);
    assert_eq!(stats.denied, 0);
}

// ============================================================================
// LIFECYCLE
// ============================================================================

#[tokio::test]
async fn test_shutdown_removes_every_queue() {
    let repos = seeded_repositories().await;
    let runtime =
        AuthzRuntime::start(&AuthzConfig::default(), repos, Arc::new(ManualClock::at_secs(T1))).unwrap();
    let dispatcher = runtime.dispatcher().clone();

    assert_eq!(dispatcher.subscriber_count(EventType::PolicyChanged), 1);
    assert_eq!(dispatcher.subscriber_count(EventType::CheckPerformed), 3);

    runtime.shutdown().await;

    assert_eq!(dispatcher.subscriber_count(EventType::PolicyChanged), 0);
    assert_eq!(dispatcher.subscriber_count(EventType::CheckPerformed), 0);
}

#[tokio::test]
async fn test_invalid_config_is_rejected() {
    let mut config = AuthzConfig::default();
    config.dispatcher.queue_capacity = 0;

    let result = AuthzRuntime::start(&config, Repositories::in_memory(), Arc::new(ManualClock::at_secs(T1)));
    assert!(matches!(result, Err(AuthzError::Config(_))));
}

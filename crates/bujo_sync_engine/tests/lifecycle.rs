//! Engine lifecycle: guards, single-flight cycles, backoff, signals and
//! reset.

mod common;

use bujo_sync_engine::{
    EntityStore, LocalWriter, MockFailure, MutationStore, SyncConfig, SyncEventKind, SyncStats, SyncStatus,
    TriggerOutcome,
};
use bujo_sync_protocol::{EntityKind, MutationOperation};
use bujo_sync_testkit::prelude::*;
use common::{capped_retry, eventually, remote, Device};
use pretty_assertions::assert_eq;
use std::time::Duration;
use uuid::Uuid;

fn synced(status: &SyncStatus) -> bool {
    matches!(status, SyncStatus::Synced { .. })
}

#[tokio::test(start_paused = true)]
async fn second_trigger_while_running_is_refused() {
    let device = Device::new(remote());
    device.policy.set_forced_duration(Some(Duration::from_secs(10)));

    let engine = device.engine.clone();
    let first = tokio::spawn(async move { engine.trigger_now().await });
    eventually(|| device.engine.status().is_syncing()).await;

    assert_eq!(
        device.engine.trigger_now().await,
        TriggerOutcome::AlreadyRunning
    );

    let outcome = first.await.unwrap();
    assert!(matches!(outcome, TriggerOutcome::Completed(_)));
    assert_eq!(device.engine.stats().cycles_completed, 1);
}

#[tokio::test(start_paused = true)]
async fn retries_back_off_up_to_the_cap_then_recover() {
    let device = Device::with_config(
        remote(),
        SyncConfig::new(Uuid::new_v4()).with_retry(capped_retry()),
    );
    device
        .remote()
        .fail_next_fetches(MockFailure::Transport { retryable: true }, 4);

    let outcome = device.engine.trigger_now().await;
    assert!(matches!(outcome, TriggerOutcome::Failed { .. }));

    let mut delays = Vec::new();
    while let Some(retry) = device.engine.scheduled_retry() {
        delays.push(retry.delay.as_secs());
        tokio::time::sleep(retry.delay + Duration::from_millis(1)).await;
    }

    assert_eq!(delays, vec![2, 4, 8, 10]);
    assert!(synced(&device.engine.status()));
    assert_eq!(device.engine.failure_count(), 0);

    let stats = device.engine.stats();
    assert_eq!(stats.cycles_failed, 4);
    assert_eq!(stats.retries_scheduled, 4);
    assert_eq!(stats.cycles_completed, 1);
    assert!(stats.last_error.is_none());
}

#[tokio::test(start_paused = true)]
async fn manual_trigger_supersedes_pending_retry() {
    let device = Device::new(remote());
    device
        .remote()
        .fail_next_fetches(MockFailure::Status(503), 1);

    device.engine.trigger_now().await;
    assert!(device.engine.scheduled_retry().is_some());

    let outcome = device.engine.trigger_now().await;
    assert!(matches!(outcome, TriggerOutcome::Completed(_)));
    assert!(device.engine.scheduled_retry().is_none());

    // The superseded timer must not start another cycle.
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(device.engine.stats().cycles_completed, 1);
}

#[tokio::test(start_paused = true)]
async fn connectivity_changes_drive_the_engine() {
    let device = Device::new(remote());
    device.engine.start();
    eventually(|| synced(&device.engine.status())).await;

    device.network.set_connected(false);
    eventually(|| device.engine.status() == SyncStatus::Offline).await;

    let id = Uuid::new_v4();
    device.remote().insert_raw(
        EntityKind::Collection,
        RowBuilder::collection(id, "travel").build(),
    );
    device.network.set_connected(true);
    eventually(|| synced(&device.engine.status())).await;

    assert!(device
        .store()
        .get(EntityKind::Collection, id)
        .unwrap()
        .is_some());
    device.engine.stop();
}

#[tokio::test(start_paused = true)]
async fn foreground_triggers_a_cycle() {
    let device = Device::new(remote());
    device.engine.start();
    eventually(|| device.engine.stats().cycles_completed == 1).await;

    device.lifecycle.enter_foreground();
    eventually(|| device.engine.stats().cycles_completed == 2).await;
    device.engine.stop();
}

#[tokio::test(start_paused = true)]
async fn stopped_engine_ignores_signals() {
    let device = Device::new(remote());
    device.engine.start();
    eventually(|| device.engine.stats().cycles_completed == 1).await;

    device.engine.stop();
    device.lifecycle.enter_foreground();
    device.network.set_connected(false);
    tokio::time::sleep(Duration::from_secs(1)).await;

    assert_eq!(device.engine.stats().cycles_completed, 1);
    assert!(synced(&device.engine.status()));
}

#[tokio::test]
async fn signing_out_and_back_in() {
    let device = Device::new(remote());
    device
        .store()
        .write_entity(&collection("inbox"), MutationOperation::Create, &[])
        .unwrap();

    device.auth.sign_out();
    assert_eq!(
        device.engine.trigger_now().await,
        TriggerOutcome::AuthRequired
    );
    assert_eq!(device.engine.status(), SyncStatus::AuthRequired);
    assert_eq!(device.store().count().unwrap(), 1);

    let user = Uuid::new_v4();
    device.auth.sign_in(user, "fresh-token");
    assert!(matches!(
        device.engine.trigger_now().await,
        TriggerOutcome::Completed(_)
    ));
    assert_eq!(device.store().count().unwrap(), 0);

    let pushed = &device.remote().merge_calls()[0].record;
    assert_eq!(pushed["user_id"], serde_json::json!(user.to_string()));
}

#[tokio::test]
async fn disabled_build_stays_disabled() {
    let device = Device::with_config(remote(), SyncConfig::disabled());
    device.engine.start();

    assert_eq!(device.engine.trigger_now().await, TriggerOutcome::Disabled);
    device.engine.reset_state();
    device.network.set_connected(false);

    assert_eq!(device.engine.status(), SyncStatus::Disabled);
    assert!(device.remote().fetch_calls().is_empty());
}

#[tokio::test]
async fn declined_trigger_leaves_status_alone() {
    let device = Device::new(remote());
    device.policy.set_declined(true);

    assert_eq!(device.engine.trigger_now().await, TriggerOutcome::Declined);
    assert_eq!(device.engine.status(), SyncStatus::Idle);
    assert!(device.remote().fetch_calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn forced_failure_is_reported_and_retried() {
    let device = Device::new(remote());
    device
        .policy
        .set_forced_failure(Some("simulated outage".into()));

    let outcome = device.engine.trigger_now().await;

    let TriggerOutcome::Failed { message, retry_in } = outcome else {
        panic!("expected a failure, got {outcome:?}");
    };
    assert!(message.contains("simulated outage"));
    assert_eq!(retry_in, Some(Duration::from_secs(2)));
    assert!(matches!(device.engine.status(), SyncStatus::Error { .. }));
    assert!(device.remote().fetch_calls().is_empty());

    device.policy.set_forced_failure(None);
    tokio::time::sleep(Duration::from_secs(3)).await;
    assert!(synced(&device.engine.status()));
}

#[tokio::test(start_paused = true)]
async fn reset_during_a_cycle_cancels_it() {
    let device = Device::new(remote());
    device
        .store()
        .write_entity(&note("draft", ""), MutationOperation::Create, &[])
        .unwrap();
    device.policy.set_forced_duration(Some(Duration::from_secs(10)));

    let engine = device.engine.clone();
    let running = tokio::spawn(async move { engine.trigger_now().await });
    eventually(|| device.engine.status().is_syncing()).await;

    device.engine.reset_state();
    assert_eq!(device.store().count().unwrap(), 0);

    assert_eq!(running.await.unwrap(), TriggerOutcome::Cancelled);
    assert_eq!(device.engine.status(), SyncStatus::Idle);
    assert!(device.remote().merge_calls().is_empty());
    assert!(device
        .engine
        .events()
        .iter()
        .any(|event| event.kind == SyncEventKind::CycleCancelled));
}

#[tokio::test(start_paused = true)]
async fn reset_during_a_failing_merge_schedules_nothing() {
    let device = Device::new(remote());
    device
        .store()
        .write_entity(&note("draft", ""), MutationOperation::Create, &[])
        .unwrap();
    device.remote().set_latency(Some(Duration::from_secs(5)));
    device
        .remote()
        .fail_next_merges(MockFailure::Transport { retryable: true }, 1);

    let engine = device.engine.clone();
    let running = tokio::spawn(async move { engine.trigger_now().await });
    eventually(|| device.engine.status().is_syncing()).await;
    device.engine.reset_state();

    assert_eq!(running.await.unwrap(), TriggerOutcome::Cancelled);
    assert_eq!(device.engine.status(), SyncStatus::Idle);
    assert!(device.engine.scheduled_retry().is_none());
    assert_eq!(device.engine.failure_count(), 0);
    assert_eq!(device.engine.stats(), SyncStats::default());
}

#[tokio::test(start_paused = true)]
async fn reset_stops_pushing_the_wiped_outbox() {
    let device = Device::new(remote());
    for title in ["first", "second"] {
        device
            .store()
            .write_entity(&note(title, ""), MutationOperation::Create, &[])
            .unwrap();
    }
    device.remote().set_latency(Some(Duration::from_secs(5)));

    let engine = device.engine.clone();
    let running = tokio::spawn(async move { engine.trigger_now().await });
    eventually(|| device.engine.status().is_syncing()).await;
    device.engine.reset_state();

    assert_eq!(running.await.unwrap(), TriggerOutcome::Cancelled);
    assert_eq!(device.remote().merge_calls().len(), 1);
    assert_eq!(device.engine.stats(), SyncStats::default());
}

#[tokio::test(start_paused = true)]
async fn reset_during_the_final_fetch_does_not_end_synced() {
    let device = Device::new(remote());
    device.remote().set_latency(Some(Duration::from_secs(5)));

    let engine = device.engine.clone();
    let running = tokio::spawn(async move { engine.trigger_now().await });
    // Six fetches of five seconds each; the seventh and last is in flight.
    tokio::time::sleep(Duration::from_secs(32)).await;
    assert_eq!(device.remote().fetch_calls().len(), 6);
    device.engine.reset_state();

    assert_eq!(running.await.unwrap(), TriggerOutcome::Cancelled);
    assert_eq!(device.engine.status(), SyncStatus::Idle);
}

#[tokio::test]
async fn status_changes_are_published() {
    let device = Device::new(remote());
    let mut status = device.engine.subscribe_status();

    device.engine.trigger_now().await;

    assert!(status.has_changed().unwrap());
    assert!(synced(&status.borrow_and_update()));
}

#[tokio::test]
async fn event_log_keeps_only_the_most_recent_entries() {
    let device = Device::with_config(
        remote(),
        SyncConfig::new(Uuid::new_v4()).with_event_log_capacity(3),
    );
    for _ in 0..5 {
        device.engine.trigger_now().await;
    }

    let events = device.engine.events();
    assert_eq!(events.len(), 3);
    assert_eq!(events.last().unwrap().kind, SyncEventKind::CycleCompleted);
}

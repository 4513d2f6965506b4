//! Two devices converging through one remote.

mod common;

use bujo_sync_engine::{EntityStore, LocalWriter, TriggerOutcome};
use bujo_sync_protocol::{AssignmentStatus, EntityKind, LocalEntity, MutationOperation, Note};
use bujo_sync_testkit::prelude::*;
use common::{remote, Device};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

async fn sync(device: &Device) {
    let outcome = device.engine.trigger_now().await;
    assert!(
        matches!(outcome, TriggerOutcome::Completed(_)),
        "sync failed: {outcome:?}"
    );
}

/// Distinct write timestamps on the millisecond wire clock.
async fn tick() {
    tokio::time::sleep(Duration::from_millis(5)).await;
}

fn stored_note(device: &Device, id: Uuid) -> (String, String) {
    match device.store().get(EntityKind::Note, id).unwrap() {
        Some(LocalEntity::Note(note)) => (note.title, note.content),
        other => panic!("expected note, got {other:?}"),
    }
}

fn edit_note(device: &Device, id: Uuid, edit: impl FnOnce(&mut Note), field: &str) {
    let Some(LocalEntity::Note(mut note)) = device.store().get(EntityKind::Note, id).unwrap()
    else {
        panic!("note missing");
    };
    edit(&mut note);
    device
        .store()
        .write_entity(&LocalEntity::Note(note), MutationOperation::Update, &[field])
        .unwrap();
}

#[tokio::test]
async fn concurrent_edits_to_different_fields_both_survive() {
    let remote = remote();
    let phone = Device::new(Arc::clone(&remote));
    let laptop = Device::new(Arc::clone(&remote));

    let note = note("Groceries", "milk");
    let id = note.id();
    phone
        .store()
        .write_entity(&note, MutationOperation::Create, &[])
        .unwrap();
    sync(&phone).await;
    sync(&laptop).await;

    tick().await;
    edit_note(&phone, id, |n| n.title = "Shopping".into(), "title");
    tick().await;
    edit_note(&laptop, id, |n| n.content = "milk, eggs".into(), "content");

    sync(&laptop).await;
    sync(&phone).await;
    sync(&laptop).await;

    let expected = ("Shopping".to_string(), "milk, eggs".to_string());
    assert_eq!(stored_note(&phone, id), expected);
    assert_eq!(stored_note(&laptop, id), expected);
}

#[tokio::test]
async fn later_write_to_same_field_wins_regardless_of_push_order() {
    let remote = remote();
    let phone = Device::new(Arc::clone(&remote));
    let laptop = Device::new(Arc::clone(&remote));

    let note = note("Draft", "");
    let id = note.id();
    phone
        .store()
        .write_entity(&note, MutationOperation::Create, &[])
        .unwrap();
    sync(&phone).await;
    sync(&laptop).await;

    tick().await;
    edit_note(&laptop, id, |n| n.title = "Older".into(), "title");
    tick().await;
    edit_note(&phone, id, |n| n.title = "Newer".into(), "title");

    // The newer write reaches the remote first; the older one must not
    // overwrite it.
    sync(&phone).await;
    sync(&laptop).await;
    sync(&phone).await;

    assert_eq!(stored_note(&phone, id).0, "Newer");
    assert_eq!(stored_note(&laptop, id).0, "Newer");
}

#[tokio::test]
async fn deletion_reaches_the_other_device() {
    let remote = remote();
    let phone = Device::new(Arc::clone(&remote));
    let laptop = Device::new(Arc::clone(&remote));

    let list = collection("Books");
    phone
        .store()
        .write_entity(&list, MutationOperation::Create, &[])
        .unwrap();
    sync(&phone).await;
    sync(&laptop).await;
    assert!(laptop
        .store()
        .get(EntityKind::Collection, list.id())
        .unwrap()
        .is_some());

    tick().await;
    let deleted = tombstoned(&list, chrono::Utc::now());
    phone
        .store()
        .write_entity(&deleted, MutationOperation::Delete, &[])
        .unwrap();
    sync(&phone).await;
    sync(&laptop).await;

    assert!(laptop
        .store()
        .get(EntityKind::Collection, list.id())
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn assignment_changes_follow_the_slot() {
    let remote = remote();
    let phone = Device::new(Arc::clone(&remote));
    let laptop = Device::new(Arc::clone(&remote));

    let task = task("Renew passport");
    let monday = day(2024, 6, 3);
    let mut placement = assignment(task.id(), monday);
    phone
        .store()
        .write_entity(&task, MutationOperation::Create, &[])
        .unwrap();
    phone
        .store()
        .write_assignment(EntityKind::Task, &placement, MutationOperation::Create)
        .unwrap();
    sync(&phone).await;
    sync(&laptop).await;

    let slots = |device: &Device| {
        device
            .store()
            .get(EntityKind::Task, task.id())
            .unwrap()
            .and_then(|task| task.assignments().map(<[_]>::to_vec))
            .unwrap_or_default()
    };
    assert_eq!(slots(&laptop).len(), 1);
    assert_eq!(slots(&laptop)[0].status, AssignmentStatus::Open);

    tick().await;
    placement.status = AssignmentStatus::Complete;
    phone
        .store()
        .write_assignment(EntityKind::Task, &placement, MutationOperation::Update)
        .unwrap();
    sync(&phone).await;
    sync(&laptop).await;

    let on_laptop = slots(&laptop);
    assert_eq!(on_laptop.len(), 1);
    assert_eq!(on_laptop[0].date, monday);
    assert_eq!(on_laptop[0].status, AssignmentStatus::Complete);

    tick().await;
    placement.deleted_at = Some(chrono::Utc::now());
    phone
        .store()
        .write_assignment(EntityKind::Task, &placement, MutationOperation::Delete)
        .unwrap();
    sync(&phone).await;
    sync(&laptop).await;

    assert!(slots(&laptop).is_empty());
    assert!(slots(&phone).is_empty());
}

#[tokio::test]
async fn moving_an_assignment_keeps_one_slot_everywhere() {
    let remote = remote();
    let phone = Device::new(Arc::clone(&remote));
    let laptop = Device::new(Arc::clone(&remote));

    let task = task("Book dentist");
    let mut placement = assignment(task.id(), day(2024, 6, 3));
    phone
        .store()
        .write_entity(&task, MutationOperation::Create, &[])
        .unwrap();
    phone
        .store()
        .write_assignment(EntityKind::Task, &placement, MutationOperation::Create)
        .unwrap();
    sync(&phone).await;
    sync(&laptop).await;

    tick().await;
    placement.date = day(2024, 6, 4);
    phone
        .store()
        .write_assignment(EntityKind::Task, &placement, MutationOperation::Update)
        .unwrap();
    sync(&phone).await;
    sync(&laptop).await;

    let slots = |device: &Device| {
        device
            .store()
            .get(EntityKind::Task, task.id())
            .unwrap()
            .and_then(|task| task.assignments().map(<[_]>::to_vec))
            .unwrap_or_default()
    };
    assert_eq!(remote.row_count(EntityKind::TaskAssignment), 1);
    for device in [&phone, &laptop] {
        let slots = slots(device);
        assert_eq!(slots.len(), 1);
        assert_eq!(slots[0].date, day(2024, 6, 4));
        assert_eq!(slots[0].id, placement.id);
    }
}

//! Property-based test generators using proptest.

use bujo_sync_protocol::{Collection, LocalEntity, Period, Task, TaskStatus};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use proptest::prelude::*;
use uuid::Uuid;

use crate::fixtures::{ts, BASE_TIME};

/// Strategy for generating entity ids.
pub fn uuid_strategy() -> impl Strategy<Value = Uuid> {
    any::<u128>().prop_map(Uuid::from_u128)
}

/// Strategy for generating titles.
pub fn title_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[A-Za-z][A-Za-z0-9 ]{0,23}").expect("Invalid regex")
}

/// Strategy for generating timestamps within a year of [`BASE_TIME`],
/// truncated to whole milliseconds like the wire format.
pub fn timestamp_strategy() -> impl Strategy<Value = DateTime<Utc>> {
    (0i64..31_536_000_000).prop_map(|millis| ts(BASE_TIME) + Duration::milliseconds(millis))
}

/// Strategy for generating dates in 2024.
pub fn date_strategy() -> impl Strategy<Value = NaiveDate> {
    (0u64..366).prop_map(|offset| {
        NaiveDate::from_ymd_opt(2024, 1, 1).expect("Invalid date") + chrono::Days::new(offset)
    })
}

/// Strategy for generating spread periods.
pub fn period_strategy() -> impl Strategy<Value = Period> {
    prop_oneof![
        Just(Period::Year),
        Just(Period::Month),
        Just(Period::Day),
        Just(Period::Multiday),
    ]
}

/// Strategy for generating task statuses.
pub fn task_status_strategy() -> impl Strategy<Value = TaskStatus> {
    prop_oneof![
        Just(TaskStatus::Open),
        Just(TaskStatus::Complete),
        Just(TaskStatus::Migrated),
        Just(TaskStatus::Cancelled),
    ]
}

/// Strategy for generating tasks without placements.
pub fn task_strategy() -> impl Strategy<Value = LocalEntity> {
    (
        uuid_strategy(),
        title_strategy(),
        task_status_strategy(),
        prop::option::of((period_strategy(), date_strategy())),
        timestamp_strategy(),
    )
        .prop_map(|(id, title, status, placement, created_at)| {
            LocalEntity::Task(Task {
                id,
                title,
                status,
                period: placement.map(|(period, _)| period),
                date: placement.map(|(_, date)| date),
                assignments: Vec::new(),
                created_at,
                deleted_at: None,
            })
        })
}

/// Strategy for generating collections.
pub fn collection_strategy() -> impl Strategy<Value = LocalEntity> {
    (
        uuid_strategy(),
        title_strategy(),
        "[a-z ]{0,64}",
        timestamp_strategy(),
    )
        .prop_map(|(id, title, content, created_at)| {
            LocalEntity::Collection(Collection {
                id,
                title,
                content,
                created_at,
                deleted_at: None,
            })
        })
}

/// Strategy for generating page sizes together with a row count that
/// spans several pages.
pub fn paging_strategy() -> impl Strategy<Value = (usize, usize)> {
    (1usize..20).prop_flat_map(|page_size| (Just(page_size), 0..page_size * 4))
}

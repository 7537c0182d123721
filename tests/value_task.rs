// CLASSIFICATION: COMMUNITY
// Filename: value_task.rs v0.1
// Date Modified: 2025-10-21
// Author: Cohesix Codex

use std::time::Duration;

use homegw_init::value_task::ValueTask;

#[tokio::test]
async fn resolves_to_produced_value() {
    let task = ValueTask::spawn(async { Some(42u32) });
    let value = task.ready().await.unwrap();
    assert_eq!(*value, 42);
}

#[tokio::test]
async fn failed_production_resolves_none() {
    let task = ValueTask::spawn(async { None::<u32> });
    assert!(task.ready().await.is_none());
}

#[tokio::test]
async fn try_get_peeks_without_blocking() {
    let task = ValueTask::spawn(async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        Some("late".to_string())
    });
    assert!(task.try_get().is_none());
    let value = task.ready().await.unwrap();
    assert_eq!(*value, "late");
    assert!(task.try_get().is_some());
}

#[tokio::test]
async fn multiple_consumers_share_one_producer() {
    let task = ValueTask::spawn(async {
        tokio::time::sleep(Duration::from_millis(20)).await;
        Some(7u64)
    });
    let other = task.clone();
    let (a, b) = tokio::join!(task.ready(), other.ready());
    assert_eq!(*a.unwrap(), 7);
    assert_eq!(*b.unwrap(), 7);
}

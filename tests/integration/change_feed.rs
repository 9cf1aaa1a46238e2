//! Integration tests for change-feed merging.
//!
//! Two stores share one in-memory backend, standing in for two devices of
//! the same user. Each runs a `FeedListener`, so writes made through one
//! show up in the other.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::sync::Arc;
use std::time::Duration;

use taskflow::backend::memory::MemoryBackend;
use taskflow::clock::{Clock, FixedClock};
use taskflow::feed::FeedListener;
use taskflow::session::{AuthState, SyncSession};
use taskflow::store::{StoreConfig, TaskStore, UpdateOutcome};
use taskflow_proto::change::ChangeEvent;
use taskflow_proto::task::{NewTask, Priority, Task, TaskDraft, TaskId, TaskPatch};
use taskflow_proto::user::{User, UserId};
use tokio::sync::watch;

// ---------------------------------------------------------------------------
// Helper functions
// ---------------------------------------------------------------------------

fn clock() -> Arc<dyn Clock> {
    Arc::new(FixedClock::at_noon(2026, 6, 10).unwrap())
}

fn store_on(backend: &MemoryBackend, user: &str) -> TaskStore<MemoryBackend> {
    TaskStore::new(
        backend.clone(),
        UserId::new(user),
        clock(),
        StoreConfig::default(),
    )
    .0
}

/// Two loaded, listening stores for user `u1` on one backend.
async fn two_devices() -> (
    MemoryBackend,
    (TaskStore<MemoryBackend>, FeedListener),
    (TaskStore<MemoryBackend>, FeedListener),
) {
    let backend = MemoryBackend::new(clock());
    let mut devices = Vec::new();
    for _ in 0..2 {
        let store = store_on(&backend, "u1");
        store.load().await.unwrap();
        let listener = FeedListener::subscribe(&store).await.unwrap();
        devices.push((store, listener));
    }
    let second = devices.pop().unwrap();
    let first = devices.pop().unwrap();
    (backend, first, second)
}

fn remote_row(id: &str, user: &str) -> Task {
    let new = NewTask::from_draft(TaskDraft::new("remote"), UserId::new(user), 0);
    Task::from_new(TaskId::new(id), &new, None)
}

/// Lets listener tasks drain their feeds.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}

// ---------------------------------------------------------------------------
// Cross-device propagation
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn insert_reaches_other_device_once() {
    let (_backend, (phone, _l1), (laptop, _l2)) = two_devices().await;

    let created = phone.create(TaskDraft::new("Buy milk")).await.unwrap();
    settle().await;

    // The writer's own echo is deduplicated.
    assert_eq!(phone.tasks(), vec![created.clone()]);
    assert_eq!(laptop.tasks(), vec![created]);
}

#[tokio::test(start_paused = true)]
async fn update_reaches_other_device_after_debounce() {
    let (_backend, (phone, _l1), (laptop, _l2)) = two_devices().await;
    let created = phone.create(TaskDraft::new("Draft")).await.unwrap();
    settle().await;

    let outcome = phone
        .update(&created.id, TaskPatch::title("Final"))
        .await
        .unwrap();
    assert!(matches!(outcome, UpdateOutcome::Saved(_)));
    settle().await;

    assert_eq!(laptop.task(&created.id).unwrap().title, "Final");
}

#[tokio::test(start_paused = true)]
async fn delete_reaches_other_device() {
    let (_backend, (phone, _l1), (laptop, _l2)) = two_devices().await;
    let created = phone.create(TaskDraft::new("Temporary")).await.unwrap();
    settle().await;

    laptop.delete(&created.id).await.unwrap();
    settle().await;

    assert!(phone.tasks().is_empty());
    assert!(laptop.tasks().is_empty());
}

#[tokio::test(start_paused = true)]
async fn remote_update_keeps_local_pending_edit() {
    let (_backend, (phone, _l1), (laptop, _l2)) = two_devices().await;
    let created = phone.create(TaskDraft::new("Shared")).await.unwrap();
    settle().await;

    let priority = TaskPatch {
        priority: Some(Priority::High),
        ..TaskPatch::default()
    };
    let laptop_edit = tokio::spawn({
        let laptop = laptop.clone();
        let id = created.id.clone();
        async move { laptop.update(&id, priority).await }
    });
    tokio::time::sleep(Duration::from_millis(100)).await;

    // Phone's edit is still inside its debounce window when the laptop's
    // write comes back over the feed.
    let phone_edit = tokio::spawn({
        let phone = phone.clone();
        let id = created.id.clone();
        async move { phone.update(&id, TaskPatch::title("Phone title")).await }
    });
    laptop_edit.await.unwrap().unwrap();
    settle().await;

    assert!(phone.has_pending_write(&created.id));
    let merged = phone.task(&created.id).unwrap();
    assert_eq!(merged.title, "Phone title");
    assert_eq!(merged.priority, Priority::High);

    phone_edit.await.unwrap().unwrap();
    settle().await;
    let converged = laptop.task(&created.id).unwrap();
    assert_eq!(converged.title, "Phone title");
    assert_eq!(converged.priority, Priority::High);
}

// ---------------------------------------------------------------------------
// Merge rules
// ---------------------------------------------------------------------------

#[tokio::test]
async fn update_for_unknown_task_is_dropped() {
    let backend = MemoryBackend::new(clock());
    let store = store_on(&backend, "u1");

    let changed = store.apply_change(&ChangeEvent::Update {
        record: remote_row("99", "u1"),
    });

    assert!(!changed);
    assert!(store.tasks().is_empty());
}

#[tokio::test]
async fn delete_for_unknown_task_is_noop() {
    let backend = MemoryBackend::new(clock());
    let store = store_on(&backend, "u1");
    store.apply_change(&ChangeEvent::Insert {
        record: remote_row("1", "u1"),
    });

    let changed = store.apply_change(&ChangeEvent::Delete {
        id: TaskId::new("2"),
        user_id: UserId::new("u1"),
    });

    assert!(!changed);
    assert_eq!(store.tasks().len(), 1);
}

#[tokio::test]
async fn events_for_other_users_are_ignored() {
    let backend = MemoryBackend::new(clock());
    let store = store_on(&backend, "u1");

    assert!(!store.apply_change(&ChangeEvent::Insert {
        record: remote_row("1", "u2"),
    }));
    assert!(store.tasks().is_empty());
}

#[tokio::test(start_paused = true)]
async fn other_users_writes_never_reach_feed() {
    let backend = MemoryBackend::new(clock());
    let mine = store_on(&backend, "u1");
    let _listener = FeedListener::subscribe(&mine).await.unwrap();
    let theirs = store_on(&backend, "u2");

    theirs.create(TaskDraft::new("private")).await.unwrap();
    settle().await;

    assert!(mine.tasks().is_empty());
}

// ---------------------------------------------------------------------------
// Session lifecycle
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn session_follows_user_switch() {
    let backend = MemoryBackend::new(clock());
    let (auth, auth_rx) = watch::channel(AuthState::signed_in(User::new("alice")));
    let mut session = SyncSession::new(backend.clone(), clock(), StoreConfig::default(), auth_rx);
    session.sync().await.unwrap();
    assert!(session.is_listening());

    let alice_phone = store_on(&backend, "alice");
    alice_phone.create(TaskDraft::new("hers")).await.unwrap();
    settle().await;
    assert_eq!(session.store().unwrap().tasks().len(), 1);

    auth.send_replace(AuthState::signed_in(User::new("bob")));
    assert!(session.changed().await.unwrap());
    assert_eq!(session.user_id(), Some(&UserId::new("bob")));
    assert!(session.store().unwrap().tasks().is_empty());

    alice_phone.create(TaskDraft::new("also hers")).await.unwrap();
    settle().await;
    assert!(session.store().unwrap().tasks().is_empty());
    assert_eq!(backend.subscriber_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn session_waits_for_auth_to_resolve() {
    let backend = MemoryBackend::new(clock());
    let (auth, auth_rx) = watch::channel(AuthState {
        user: None,
        loading: true,
    });
    let mut session = SyncSession::new(backend, clock(), StoreConfig::default(), auth_rx);

    session.sync().await.unwrap();
    assert!(session.store().is_none());

    auth.send_replace(AuthState::signed_in(User::new("alice")));
    assert!(session.changed().await.unwrap());
    assert!(session.store().is_some());
}

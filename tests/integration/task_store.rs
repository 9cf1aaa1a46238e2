//! Integration tests for the optimistic task store.
//!
//! Drives `TaskStore` against the in-memory backend with tokio's paused
//! clock, so debounce windows elapse instantly but in order.

#![allow(clippy::expect_used, clippy::unwrap_used, clippy::similar_names)]

use std::sync::Arc;
use std::time::Duration;

use taskflow::backend::memory::MemoryBackend;
use taskflow::backend::{Backend, Operation};
use taskflow::clock::{Clock, FixedClock};
use taskflow::store::{ReorderScope, StoreConfig, StoreError, StoreEvent, TaskStore, UpdateOutcome};
use taskflow::view::{Filter, View};
use taskflow_proto::category::DEFAULT_CATEGORY_COLOR;
use taskflow_proto::change::ChangeEvent;
use taskflow_proto::task::{NewTask, Priority, Task, TaskDraft, TaskId, TaskPatch};
use taskflow_proto::user::UserId;
use tokio::sync::mpsc;

// ---------------------------------------------------------------------------
// Helper functions
// ---------------------------------------------------------------------------

fn user() -> UserId {
    UserId::new("u1")
}

/// Builds a store over a fresh memory backend with the given reorder scope.
fn make_store(
    scope: ReorderScope,
) -> (
    MemoryBackend,
    TaskStore<MemoryBackend>,
    mpsc::Receiver<StoreEvent>,
) {
    let clock: Arc<dyn Clock> = Arc::new(FixedClock::at_noon(2026, 6, 10).unwrap());
    let backend = MemoryBackend::new(Arc::clone(&clock));
    let config = StoreConfig {
        reorder_scope: scope,
        ..StoreConfig::default()
    };
    let (store, events) = TaskStore::new(backend.clone(), user(), clock, config);
    (backend, store, events)
}

/// A stored row with default fields.
fn row(id: &str, position: i64) -> Task {
    Task {
        id: TaskId::new(id),
        title: format!("task {id}"),
        description: None,
        priority: Priority::Medium,
        due_date: None,
        completed: false,
        completed_at: None,
        category_id: None,
        position,
        user_id: user(),
        created_at: None,
    }
}

/// Seeds rows remotely and loads them into the store.
async fn seeded(
    scope: ReorderScope,
    rows: Vec<Task>,
) -> (
    MemoryBackend,
    TaskStore<MemoryBackend>,
    mpsc::Receiver<StoreEvent>,
) {
    let (backend, store, events) = make_store(scope);
    for task in rows {
        backend.seed_task(task);
    }
    store.load().await.unwrap();
    (backend, store, events)
}

fn by_id(mut tasks: Vec<Task>) -> Vec<Task> {
    tasks.sort_by(|a, b| a.id.cmp(&b.id));
    tasks
}

fn visible_ids(store: &TaskStore<MemoryBackend>) -> Vec<String> {
    store
        .visible_tasks()
        .into_iter()
        .map(|t| t.id.to_string())
        .collect()
}

fn drain(events: &mut mpsc::Receiver<StoreEvent>) -> Vec<StoreEvent> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        out.push(event);
    }
    out
}

// ---------------------------------------------------------------------------
// create
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn create_confirmed_with_server_id_lands_at_end() {
    let (backend, store, _events) = seeded(ReorderScope::Global, vec![row("1", 0)]).await;
    backend.set_next_id(42);

    let created = store.create(TaskDraft::new("Buy milk")).await.unwrap();

    let tasks = store.tasks();
    assert_eq!(tasks.len(), 2);
    assert_eq!(tasks[0].id, TaskId::new("1"));
    assert_eq!(tasks[1].id, TaskId::new("42"));
    assert_eq!(tasks[1].title, "Buy milk");
    assert_eq!(tasks[1].position, 1);
    assert!(!tasks[1].completed);
    assert_eq!(created, tasks[1]);
}

#[tokio::test(start_paused = true)]
async fn create_is_visible_under_temp_id_before_confirmation() {
    let (backend, store, _events) = make_store(ReorderScope::Global);
    backend.set_latency(Duration::from_millis(100));

    let pending = tokio::spawn({
        let store = store.clone();
        async move { store.create(TaskDraft::new("Draft report")).await }
    });
    tokio::time::sleep(Duration::from_millis(10)).await;

    let tasks = store.tasks();
    assert_eq!(tasks.len(), 1);
    assert!(tasks[0].id.is_temporary());
    assert_eq!(tasks[0].position, 0);

    let confirmed = pending.await.unwrap().unwrap();
    assert!(!confirmed.id.is_temporary());
    assert_eq!(store.tasks(), vec![confirmed]);
}

#[tokio::test(start_paused = true)]
async fn failed_create_leaves_no_temp_record() {
    let (backend, store, mut events) = make_store(ReorderScope::Global);
    backend.fail_next(Operation::InsertTask);

    let result = store.create(TaskDraft::new("Doomed")).await;

    assert!(matches!(result, Err(StoreError::Backend(_))));
    assert!(store.tasks().is_empty());
    let events = drain(&mut events);
    assert!(matches!(events.last(), Some(StoreEvent::RolledBack(id)) if id.is_temporary()));
}

#[tokio::test(start_paused = true)]
async fn create_confirmed_after_feed_insert_does_not_duplicate() {
    let (backend, store, _events) = make_store(ReorderScope::Global);
    backend.set_next_id(5);
    backend.set_latency(Duration::from_millis(50));

    let pending = tokio::spawn({
        let store = store.clone();
        async move { store.create(TaskDraft::new("Race")).await }
    });
    tokio::time::sleep(Duration::from_millis(10)).await;

    // The feed's copy of the row arrives while the insert is in flight.
    let new = NewTask::from_draft(TaskDraft::new("Race"), user(), 0);
    let record = Task::from_new(TaskId::new("5"), &new, None);
    assert!(store.apply_change(&ChangeEvent::Insert { record }));

    let confirmed = pending.await.unwrap().unwrap();
    assert_eq!(confirmed.id, TaskId::new("5"));
    let tasks = store.tasks();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].id, TaskId::new("5"));
}

#[tokio::test(start_paused = true)]
async fn create_confirmed_after_reload_wiped_temp_record() {
    let (backend, store, _events) = make_store(ReorderScope::Global);
    backend.set_next_id(42);
    backend.set_latency(Duration::from_millis(100));

    // This fetch reads the table before the insert lands and replaces the
    // list after the temporary record went in.
    let reload = tokio::spawn({
        let store = store.clone();
        async move { store.reload_tasks().await }
    });
    tokio::time::sleep(Duration::from_millis(10)).await;

    let created = store.create(TaskDraft::new("Buy milk")).await.unwrap();
    reload.await.unwrap().unwrap();

    assert_eq!(created.id, TaskId::new("42"));
    assert_eq!(store.tasks(), vec![created]);
    assert_eq!(by_id(store.tasks()), by_id(backend.tasks_for(&user())));
}

#[tokio::test(start_paused = true)]
async fn create_confirmed_after_failed_update_reload() {
    let (backend, store, _events) = seeded(ReorderScope::Global, vec![row("1", 0)]).await;
    backend.set_next_id(42);
    backend.set_latency(Duration::from_millis(100));
    backend.fail_next(Operation::UpdateTask);

    // Write fails at 600ms; its reload lands at 700ms, mid-create.
    let update = tokio::spawn({
        let store = store.clone();
        async move { store.update(&TaskId::new("1"), TaskPatch::title("Lost")).await }
    });
    tokio::time::sleep(Duration::from_millis(650)).await;

    let created = store.create(TaskDraft::new("Buy milk")).await.unwrap();

    assert!(matches!(update.await.unwrap(), Err(StoreError::Backend(_))));
    assert_eq!(created.id, TaskId::new("42"));
    assert!(store.task(&created.id).is_some());
    assert_eq!(by_id(store.tasks()), by_id(backend.tasks_for(&user())));
}

// ---------------------------------------------------------------------------
// update
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn update_applies_locally_before_remote_write() {
    let (backend, store, _events) = seeded(ReorderScope::Global, vec![row("1", 0)]).await;
    let id = TaskId::new("1");

    let pending = tokio::spawn({
        let store = store.clone();
        let id = id.clone();
        async move { store.update(&id, TaskPatch::title("Renamed")).await }
    });
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(store.task(&id).unwrap().title, "Renamed");
    assert!(store.has_pending_write(&id));
    assert_eq!(backend.calls(Operation::UpdateTask), 0);

    let outcome = pending.await.unwrap().unwrap();
    assert!(matches!(outcome, UpdateOutcome::Saved(ref t) if t.title == "Renamed"));
    assert_eq!(backend.calls(Operation::UpdateTask), 1);
    assert!(!store.has_pending_write(&id));
}

#[tokio::test(start_paused = true)]
async fn rapid_updates_coalesce_into_one_write() {
    let (backend, store, _events) = seeded(ReorderScope::Global, vec![row("1", 0)]).await;
    let id = TaskId::new("1");

    let first = tokio::spawn({
        let store = store.clone();
        let id = id.clone();
        async move { store.update(&id, TaskPatch::title("Second draft")).await }
    });
    tokio::time::sleep(Duration::from_millis(200)).await;

    let priority = TaskPatch {
        priority: Some(Priority::High),
        ..TaskPatch::default()
    };
    let second = store.update(&id, priority).await.unwrap();

    assert_eq!(first.await.unwrap().unwrap(), UpdateOutcome::Superseded);
    let UpdateOutcome::Saved(saved) = second else {
        panic!("second update should be written");
    };
    assert_eq!(saved.title, "Second draft");
    assert_eq!(saved.priority, Priority::High);
    assert_eq!(backend.calls(Operation::UpdateTask), 1);
}

#[tokio::test(start_paused = true)]
async fn updates_to_different_tasks_are_independent() {
    let (backend, store, _events) =
        seeded(ReorderScope::Global, vec![row("1", 0), row("2", 1)]).await;

    let (one, two) = (TaskId::new("1"), TaskId::new("2"));
    let (a, b) = tokio::join!(
        store.update(&one, TaskPatch::title("one")),
        store.update(&two, TaskPatch::title("two")),
    );

    assert!(matches!(a.unwrap(), UpdateOutcome::Saved(_)));
    assert!(matches!(b.unwrap(), UpdateOutcome::Saved(_)));
    assert_eq!(backend.calls(Operation::UpdateTask), 2);
}

#[tokio::test(start_paused = true)]
async fn failed_update_resyncs_with_remote() {
    let (backend, store, _events) = seeded(ReorderScope::Global, vec![row("1", 0)]).await;
    backend.fail_next(Operation::UpdateTask);

    let result = store.update(&TaskId::new("1"), TaskPatch::title("Lost")).await;

    assert!(matches!(result, Err(StoreError::Backend(_))));
    assert_eq!(store.tasks(), backend.tasks_for(&user()));
    assert_eq!(store.task(&TaskId::new("1")).unwrap().title, "task 1");
}

#[tokio::test(start_paused = true)]
async fn update_of_unknown_task_still_writes_and_fails_remotely() {
    let (backend, store, _events) = make_store(ReorderScope::Global);

    let result = store.update(&TaskId::new("99"), TaskPatch::title("ghost")).await;

    assert!(matches!(result, Err(StoreError::Backend(_))));
    assert_eq!(backend.calls(Operation::UpdateTask), 1);
    assert!(store.tasks().is_empty());
}

#[tokio::test(start_paused = true)]
async fn update_during_create_is_written_under_server_id() {
    let (backend, store, _events) = make_store(ReorderScope::Global);
    backend.set_next_id(42);
    backend.set_latency(Duration::from_millis(100));

    let create = tokio::spawn({
        let store = store.clone();
        async move { store.create(TaskDraft::new("Buy milk")).await }
    });
    tokio::time::sleep(Duration::from_millis(10)).await;
    let temp_id = store.tasks()[0].id.clone();

    let update = tokio::spawn({
        let store = store.clone();
        let id = temp_id.clone();
        async move { store.update(&id, TaskPatch::title("Buy oat milk")).await }
    });
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert_eq!(store.task(&temp_id).unwrap().title, "Buy oat milk");
    assert!(store.has_pending_write(&temp_id));

    let created = create.await.unwrap().unwrap();
    assert_eq!(created.id, TaskId::new("42"));
    let UpdateOutcome::Saved(saved) = update.await.unwrap().unwrap() else {
        panic!("held edit should be written");
    };
    assert_eq!(saved.id, created.id);
    assert_eq!(saved.title, "Buy oat milk");
    assert_eq!(store.task(&created.id).unwrap().title, "Buy oat milk");
    assert_eq!(backend.tasks_for(&user())[0].title, "Buy oat milk");
    assert_eq!(backend.calls(Operation::UpdateTask), 1);
    assert!(!store.has_pending_write(&temp_id));
}

#[tokio::test(start_paused = true)]
async fn update_during_failed_create_reports_missing_task() {
    let (backend, store, _events) = make_store(ReorderScope::Global);
    backend.set_latency(Duration::from_millis(100));
    backend.fail_next(Operation::InsertTask);

    let create = tokio::spawn({
        let store = store.clone();
        async move { store.create(TaskDraft::new("Doomed")).await }
    });
    tokio::time::sleep(Duration::from_millis(10)).await;
    let temp_id = store.tasks()[0].id.clone();

    let result = store.update(&temp_id, TaskPatch::title("Still doomed")).await;

    assert!(matches!(result, Err(StoreError::TaskNotFound(ref id)) if *id == temp_id));
    assert!(matches!(create.await.unwrap(), Err(StoreError::Backend(_))));
    assert!(store.tasks().is_empty());
    assert_eq!(backend.calls(Operation::UpdateTask), 0);
}

#[tokio::test(start_paused = true)]
async fn update_of_settled_temp_id_is_rejected_locally() {
    let (backend, store, _events) = make_store(ReorderScope::Global);

    let result = store
        .update(&TaskId::temporary(), TaskPatch::title("orphan"))
        .await;

    assert!(matches!(result, Err(StoreError::TaskNotFound(_))));
    assert_eq!(backend.calls(Operation::UpdateTask), 0);
}

// ---------------------------------------------------------------------------
// toggle_complete
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn toggle_twice_restores_completed() {
    let (_backend, store, _events) = seeded(ReorderScope::Global, vec![row("1", 0)]).await;
    let id = TaskId::new("1");

    store.toggle_complete(&id).await.unwrap();
    let done = store.task(&id).unwrap();
    assert!(done.completed);
    assert!(done.completed_at.is_some());

    store.toggle_complete(&id).await.unwrap();
    let reopened = store.task(&id).unwrap();
    assert!(!reopened.completed);
    assert!(reopened.completed_at.is_none());
}

#[tokio::test(start_paused = true)]
async fn toggle_leaves_completed_at_alone_until_confirmed() {
    let (_backend, store, _events) = seeded(ReorderScope::Global, vec![row("1", 0)]).await;
    let id = TaskId::new("1");

    let pending = tokio::spawn({
        let store = store.clone();
        let id = id.clone();
        async move { store.toggle_complete(&id).await }
    });
    tokio::time::sleep(Duration::from_millis(10)).await;

    let optimistic = store.task(&id).unwrap();
    assert!(optimistic.completed);
    assert!(optimistic.completed_at.is_none());

    pending.await.unwrap().unwrap();
    let stats = store.analytics();
    assert_eq!(stats.completed_today, 1);
}

// ---------------------------------------------------------------------------
// delete
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn failed_delete_restores_task() {
    let (backend, store, mut events) =
        seeded(ReorderScope::Global, vec![row("1", 0), row("2", 1)]).await;
    backend.fail_next(Operation::DeleteTask);
    let before = store.tasks();
    drain(&mut events);

    let result = store.delete(&TaskId::new("1")).await;

    assert!(matches!(result, Err(StoreError::Backend(_))));
    assert_eq!(store.tasks(), before);
    assert_eq!(
        drain(&mut events),
        vec![
            StoreEvent::TaskRemoved(TaskId::new("1")),
            StoreEvent::RolledBack(TaskId::new("1")),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn delete_of_task_not_held_locally_emits_nothing() {
    let (backend, store, mut events) = seeded(ReorderScope::Global, vec![row("1", 0)]).await;
    backend.seed_task(row("2", 1));
    drain(&mut events);

    store.delete(&TaskId::new("2")).await.unwrap();
    let missing = store.delete(&TaskId::new("99")).await;

    assert!(matches!(missing, Err(StoreError::Backend(_))));
    assert!(drain(&mut events).is_empty());
    assert_eq!(store.tasks(), vec![row("1", 0)]);
    assert_eq!(backend.tasks_for(&user()), vec![row("1", 0)]);
}

#[tokio::test(start_paused = true)]
async fn delete_drops_pending_update() {
    let (backend, store, _events) = seeded(ReorderScope::Global, vec![row("1", 0)]).await;
    let id = TaskId::new("1");

    let pending = tokio::spawn({
        let store = store.clone();
        let id = id.clone();
        async move { store.update(&id, TaskPatch::title("never sent")).await }
    });
    tokio::time::sleep(Duration::from_millis(10)).await;
    store.delete(&id).await.unwrap();

    assert_eq!(pending.await.unwrap().unwrap(), UpdateOutcome::Superseded);
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(backend.calls(Operation::UpdateTask), 0);
    assert!(backend.tasks_for(&user()).is_empty());
}

// ---------------------------------------------------------------------------
// reorder
// ---------------------------------------------------------------------------

/// `a`, `b`, `c` open; `h` completed, so hidden from the All view.
fn reorder_rows() -> Vec<Task> {
    let mut hidden = row("h", 1);
    hidden.completed = true;
    vec![row("a", 0), hidden, row("b", 2), row("c", 3)]
}

fn position(store: &TaskStore<MemoryBackend>, id: &str) -> i64 {
    store.task(&TaskId::new(id)).unwrap().position
}

#[tokio::test(start_paused = true)]
async fn global_reorder_keeps_positions_unique() {
    let (backend, store, _events) = seeded(ReorderScope::Global, reorder_rows()).await;

    store.reorder(2, 0).await.unwrap();

    assert_eq!(visible_ids(&store), ["c", "a", "b"]);
    assert_eq!(position(&store, "c"), 0);
    assert_eq!(position(&store, "h"), 1);
    assert_eq!(position(&store, "a"), 2);
    assert_eq!(position(&store, "b"), 3);
    assert_eq!(backend.calls(Operation::UpdateTask), 3);
    assert_eq!(by_id(store.tasks()), by_id(backend.tasks_for(&user())));
}

#[tokio::test(start_paused = true)]
async fn view_reorder_numbers_visible_from_zero() {
    let (backend, store, _events) = seeded(ReorderScope::View, reorder_rows()).await;

    store.reorder(2, 0).await.unwrap();

    assert_eq!(visible_ids(&store), ["c", "a", "b"]);
    assert_eq!(position(&store, "c"), 0);
    assert_eq!(position(&store, "a"), 1);
    assert_eq!(position(&store, "b"), 2);
    // Hidden task keeps its position and now shares it with "a".
    assert_eq!(position(&store, "h"), 1);
    assert_eq!(backend.calls(Operation::UpdateTask), 3);
}

#[tokio::test(start_paused = true)]
async fn reorder_there_and_back_restores_order() {
    for scope in [ReorderScope::Global, ReorderScope::View] {
        let (_backend, store, _events) = seeded(scope, reorder_rows()).await;
        let before = visible_ids(&store);

        store.reorder(0, 2).await.unwrap();
        assert_ne!(visible_ids(&store), before);
        store.reorder(2, 0).await.unwrap();

        assert_eq!(visible_ids(&store), before, "scope {scope}");
    }
}

#[tokio::test(start_paused = true)]
async fn reorder_out_of_range_changes_nothing() {
    let (backend, store, _events) = seeded(ReorderScope::Global, reorder_rows()).await;
    let before = store.tasks();

    let result = store.reorder(0, 3).await;

    assert!(matches!(
        result,
        Err(StoreError::IndexOutOfRange { index: 3, len: 3 })
    ));
    assert_eq!(store.tasks(), before);
    assert_eq!(backend.calls(Operation::UpdateTask), 0);
}

#[tokio::test(start_paused = true)]
async fn reorder_within_filtered_view() {
    let mut urgent = row("u", 5);
    urgent.priority = Priority::High;
    let (_backend, store, _events) =
        seeded(ReorderScope::Global, vec![row("a", 0), urgent, row("b", 1)]).await;
    store.set_filter(Filter {
        priority: Some(Priority::Medium),
        ..Filter::default()
    });

    store.reorder(1, 0).await.unwrap();

    assert_eq!(visible_ids(&store), ["b", "a"]);
    assert_eq!(position(&store, "u"), 2);
}

#[tokio::test(start_paused = true)]
async fn failed_reorder_write_resyncs_with_remote() {
    let (backend, store, _events) = seeded(ReorderScope::Global, reorder_rows()).await;
    backend.fail_next(Operation::UpdateTask);

    let result = store.reorder(2, 0).await;

    assert!(matches!(result, Err(StoreError::Backend(_))));
    assert_eq!(by_id(store.tasks()), by_id(backend.tasks_for(&user())));
}

// ---------------------------------------------------------------------------
// whole-store properties
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn successful_operations_match_fresh_fetch() {
    let (backend, store, _events) = make_store(ReorderScope::Global);

    let a = store.create(TaskDraft::new("a")).await.unwrap();
    let b = store
        .create(TaskDraft::new("b").with_priority(Priority::Low))
        .await
        .unwrap();
    let c = store.create(TaskDraft::new("c")).await.unwrap();
    store.update(&a.id, TaskPatch::title("a2")).await.unwrap();
    store.toggle_complete(&b.id).await.unwrap();
    store.reorder(1, 0).await.unwrap();
    store.delete(&c.id).await.unwrap();
    store.create(TaskDraft::new("d")).await.unwrap();

    assert_eq!(by_id(store.tasks()), by_id(backend.tasks_for(&user())));
}

#[tokio::test(start_paused = true)]
async fn completed_view_counts_only_completed() {
    let mut done = row("1", 0);
    done.completed = true;
    let (_backend, store, _events) = seeded(ReorderScope::Global, vec![done, row("2", 1)]).await;

    store.set_filter(Filter {
        view: View::Completed,
        ..Filter::default()
    });

    assert_eq!(store.visible_tasks().len(), 1);
}

// ---------------------------------------------------------------------------
// categories
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn category_create_and_delete() {
    let (backend, store, _events) = make_store(ReorderScope::Global);

    let work = store.create_category("Work", None).await.unwrap();
    assert_eq!(work.color, DEFAULT_CATEGORY_COLOR);
    let home = store
        .create_category("Home", Some("#22c55e".to_string()))
        .await
        .unwrap();
    assert_eq!(store.categories().len(), 2);

    store.delete_category(&work.id).await.unwrap();
    assert_eq!(store.categories(), vec![home]);
    assert_eq!(backend.fetch_categories(&user()).await.unwrap().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn failed_category_delete_keeps_local_copy() {
    let (backend, store, _events) = make_store(ReorderScope::Global);
    let work = store.create_category("Work", None).await.unwrap();
    backend.fail_next(Operation::DeleteCategory);

    assert!(store.delete_category(&work.id).await.is_err());
    assert_eq!(store.categories(), vec![work]);
}

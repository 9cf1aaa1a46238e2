//! In-process backend for tests and the offline demo.
//!
//! Keeps task and category tables in memory, assigns sequential server ids,
//! stamps `created_at` and `completed_at` the way the hosted store does, and
//! fans every committed change out to the subscribed users' feeds over
//! [`tokio::sync::mpsc`] channels. Calls can be delayed or made to fail on
//! demand so callers can exercise their confirm/rollback paths.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use taskflow_proto::category::{Category, CategoryId, NewCategory};
use taskflow_proto::change::ChangeEvent;
use taskflow_proto::task::{NewTask, Task, TaskId, TaskPatch};
use taskflow_proto::user::UserId;

use super::{Backend, BackendError, ChangeFeed, Operation};
use crate::clock::{Clock, SystemClock};

/// Default per-subscriber channel capacity.
const DEFAULT_FEED_BUFFER: usize = 256;

/// Marker for a fault that never runs out.
const ALWAYS: u32 = u32::MAX;

/// In-memory implementation of [`Backend`].
///
/// Cloning yields another handle onto the same tables, so a test can keep one
/// handle for inspection and fault injection while a store owns another.
#[derive(Clone)]
pub struct MemoryBackend {
    shared: Arc<Shared>,
}

struct Shared {
    tables: Mutex<Tables>,
    subscribers: Mutex<Vec<Subscriber>>,
    faults: Mutex<HashMap<Operation, u32>>,
    calls: Mutex<HashMap<Operation, u32>>,
    latency: Mutex<Duration>,
    clock: Arc<dyn Clock>,
    feed_buffer: usize,
}

#[derive(Default)]
struct Tables {
    tasks: Vec<Task>,
    categories: Vec<Category>,
    next_id: u64,
}

struct Subscriber {
    user_id: UserId,
    tx: mpsc::Sender<ChangeEvent>,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

impl MemoryBackend {
    /// Creates an empty backend that stamps times from `clock`.
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            shared: Arc::new(Shared {
                tables: Mutex::new(Tables {
                    next_id: 1,
                    ..Tables::default()
                }),
                subscribers: Mutex::new(Vec::new()),
                faults: Mutex::new(HashMap::new()),
                calls: Mutex::new(HashMap::new()),
                latency: Mutex::new(Duration::ZERO),
                clock,
                feed_buffer: DEFAULT_FEED_BUFFER,
            }),
        }
    }

    /// Stores a row as-is, without publishing a change.
    pub fn seed_task(&self, task: Task) {
        self.shared.tables.lock().tasks.push(task);
    }

    /// Stores a category as-is.
    pub fn seed_category(&self, category: Category) {
        self.shared.tables.lock().categories.push(category);
    }

    /// Sets the numeric id the next insert will receive.
    pub fn set_next_id(&self, next_id: u64) {
        self.shared.tables.lock().next_id = next_id;
    }

    /// Makes the next call of `op` fail.
    pub fn fail_next(&self, op: Operation) {
        self.fail_times(op, 1);
    }

    /// Makes the next `times` calls of `op` fail.
    pub fn fail_times(&self, op: Operation, times: u32) {
        self.shared.faults.lock().insert(op, times);
    }

    /// Makes every call of `op` fail until [`clear_faults`](Self::clear_faults).
    pub fn fail_always(&self, op: Operation) {
        self.fail_times(op, ALWAYS);
    }

    /// Removes every injected fault.
    pub fn clear_faults(&self) {
        self.shared.faults.lock().clear();
    }

    /// Delays every call by `latency` before it takes effect.
    pub fn set_latency(&self, latency: Duration) {
        *self.shared.latency.lock() = latency;
    }

    /// Number of times `op` has been called, including failed calls.
    #[must_use]
    pub fn calls(&self, op: Operation) -> u32 {
        self.shared.calls.lock().get(&op).copied().unwrap_or(0)
    }

    /// Snapshot of `user`'s tasks in fetch order.
    #[must_use]
    pub fn tasks_for(&self, user: &UserId) -> Vec<Task> {
        let tables = self.shared.tables.lock();
        let mut tasks: Vec<Task> = tables
            .tasks
            .iter()
            .filter(|t| &t.user_id == user)
            .cloned()
            .collect();
        drop(tables);
        tasks.sort_by_key(|t| t.position);
        tasks
    }

    /// Number of feeds still open.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        let mut subscribers = self.shared.subscribers.lock();
        subscribers.retain(|s| !s.tx.is_closed());
        subscribers.len()
    }

    /// Pushes `event` to every open feed of the event's owner.
    ///
    /// Mutations call this after committing; tests can call it to simulate a
    /// change made by another client.
    pub fn publish(&self, event: &ChangeEvent) {
        let mut subscribers = self.shared.subscribers.lock();
        subscribers.retain(|s| !s.tx.is_closed());
        for subscriber in subscribers.iter().filter(|s| &s.user_id == event.user_id()) {
            if subscriber.tx.try_send(event.clone()).is_err() {
                tracing::warn!(
                    user_id = %subscriber.user_id,
                    kind = event.kind(),
                    "change feed full, dropping event"
                );
            }
        }
    }

    /// Records the call, applies latency, then consumes an injected fault.
    async fn begin(&self, op: Operation) -> Result<(), BackendError> {
        *self.shared.calls.lock().entry(op).or_default() += 1;
        let latency = *self.shared.latency.lock();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let mut faults = self.shared.faults.lock();
        if let Some(remaining) = faults.get_mut(&op)
            && *remaining > 0
        {
            if *remaining != ALWAYS {
                *remaining -= 1;
            }
            tracing::debug!(%op, "injected backend failure");
            return Err(BackendError::Rejected(format!("injected {op} failure")));
        }
        Ok(())
    }

    fn next_id(tables: &mut Tables) -> String {
        let id = tables.next_id;
        tables.next_id += 1;
        id.to_string()
    }
}

impl Backend for MemoryBackend {
    async fn fetch_tasks(&self, user: &UserId) -> Result<Vec<Task>, BackendError> {
        self.begin(Operation::FetchTasks).await?;
        Ok(self.tasks_for(user))
    }

    async fn fetch_categories(&self, user: &UserId) -> Result<Vec<Category>, BackendError> {
        self.begin(Operation::FetchCategories).await?;
        let tables = self.shared.tables.lock();
        let mut categories: Vec<Category> = tables
            .categories
            .iter()
            .filter(|c| &c.user_id == user)
            .cloned()
            .collect();
        drop(tables);
        categories.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(categories)
    }

    async fn insert_task(&self, task: &NewTask) -> Result<Task, BackendError> {
        self.begin(Operation::InsertTask).await?;
        let stored = {
            let mut tables = self.shared.tables.lock();
            let id = TaskId::new(Self::next_id(&mut tables));
            let stored = Task::from_new(id, task, Some(self.shared.clock.now()));
            tables.tasks.push(stored.clone());
            stored
        };
        self.publish(&ChangeEvent::Insert {
            record: stored.clone(),
        });
        Ok(stored)
    }

    async fn update_task(&self, id: &TaskId, patch: &TaskPatch) -> Result<Task, BackendError> {
        self.begin(Operation::UpdateTask).await?;
        let now = self.shared.clock.now();
        let stored = {
            let mut tables = self.shared.tables.lock();
            let task = tables
                .tasks
                .iter_mut()
                .find(|t| &t.id == id)
                .ok_or_else(|| BackendError::NotFound(format!("task {id}")))?;
            let was_completed = task.completed;
            task.apply_patch(patch);
            // Completion timestamps follow the flag unless the caller set one.
            if patch.completed_at.is_none() {
                if task.completed && !was_completed {
                    task.completed_at = Some(now);
                } else if !task.completed {
                    task.completed_at = None;
                }
            }
            task.clone()
        };
        self.publish(&ChangeEvent::Update {
            record: stored.clone(),
        });
        Ok(stored)
    }

    async fn delete_task(&self, id: &TaskId) -> Result<(), BackendError> {
        self.begin(Operation::DeleteTask).await?;
        let removed = {
            let mut tables = self.shared.tables.lock();
            let index = tables
                .tasks
                .iter()
                .position(|t| &t.id == id)
                .ok_or_else(|| BackendError::NotFound(format!("task {id}")))?;
            tables.tasks.remove(index)
        };
        self.publish(&ChangeEvent::Delete {
            id: removed.id,
            user_id: removed.user_id,
        });
        Ok(())
    }

    async fn insert_category(&self, category: &NewCategory) -> Result<Category, BackendError> {
        self.begin(Operation::InsertCategory).await?;
        let mut tables = self.shared.tables.lock();
        let id = CategoryId::new(Self::next_id(&mut tables));
        let stored = category.clone().into_category(id);
        tables.categories.push(stored.clone());
        Ok(stored)
    }

    async fn delete_category(&self, id: &CategoryId) -> Result<(), BackendError> {
        self.begin(Operation::DeleteCategory).await?;
        let mut tables = self.shared.tables.lock();
        let index = tables
            .categories
            .iter()
            .position(|c| &c.id == id)
            .ok_or_else(|| BackendError::NotFound(format!("category {id}")))?;
        tables.categories.remove(index);
        Ok(())
    }

    async fn subscribe(&self, user: &UserId) -> Result<ChangeFeed, BackendError> {
        self.begin(Operation::Subscribe).await?;
        let (tx, rx) = mpsc::channel(self.shared.feed_buffer);
        self.shared.subscribers.lock().push(Subscriber {
            user_id: user.clone(),
            tx,
        });
        tracing::debug!(user_id = %user, "memory change feed opened");
        Ok(ChangeFeed::new(rx))
    }
}

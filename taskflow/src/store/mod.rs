//! Optimistic task store for one signed-in user.
//!
//! [`TaskStore`] holds the user's tasks and categories, the active
//! [`Filter`], and the table of debounced writes. Every mutation updates
//! local state first and then talks to the [`Backend`]; on failure the local
//! change is rolled back (create, delete) or the list is re-fetched (update,
//! reorder). Observers get a [`StoreEvent`] for each visible change over the
//! channel returned by [`TaskStore::new`].
//!
//! Local state sits behind a `parking_lot` mutex that is never held across
//! an `.await`.

pub mod debounce;
pub mod reorder;

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};

use taskflow_proto::category::{Category, CategoryId, NewCategory};
use taskflow_proto::change::ChangeEvent;
use taskflow_proto::task::{NewTask, Task, TaskDraft, TaskId, TaskPatch};
use taskflow_proto::user::UserId;

use crate::analytics::Analytics;
use crate::backend::{Backend, BackendError};
use crate::clock::Clock;
use crate::view::{self, Filter};

use self::debounce::Debouncer;
pub use self::reorder::ReorderScope;

/// Errors returned by store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The remote call failed. Local state has been rolled back or
    /// re-fetched.
    #[error("backend error: {0}")]
    Backend(#[from] BackendError),

    /// Task title is empty or whitespace.
    #[error("task title cannot be empty")]
    TitleEmpty,

    /// Category name is empty or whitespace.
    #[error("category name cannot be empty")]
    CategoryNameEmpty,

    /// No task with this id in the local list.
    #[error("task not found: {0}")]
    TaskNotFound(TaskId),

    /// A reorder index is outside the visible list.
    #[error("index {index} out of range for {len} visible tasks")]
    IndexOutOfRange {
        /// Offending index.
        index: usize,
        /// Length of the visible list.
        len: usize,
    },
}

/// Notification of a change to the store's state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    /// Tasks and/or categories were replaced by a fetch.
    Reloaded,
    /// A task appeared, optimistically or from the change feed.
    TaskInserted(Task),
    /// A temporary record was replaced by its confirmed row.
    TaskConfirmed {
        /// The id the record had while in flight.
        temp_id: TaskId,
        /// The stored row.
        task: Task,
    },
    /// A task's fields changed.
    TaskUpdated(Task),
    /// A task was removed.
    TaskRemoved(TaskId),
    /// Positions were renumbered.
    Reordered,
    /// A failed remote call undid the optimistic change to this task.
    RolledBack(TaskId),
    /// The category list changed.
    CategoriesChanged,
}

/// Result of a debounced [`TaskStore::update`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// The write carrying this update was confirmed.
    Saved(Task),
    /// A later update to the same task (or its deletion) replaced this one
    /// before it was sent.
    Superseded,
}

/// Tunables for a [`TaskStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreConfig {
    /// Quiet period before a task's pending update is written.
    pub debounce: Duration,
    /// Capacity of the [`StoreEvent`] channel.
    pub event_buffer: usize,
    /// How [`TaskStore::reorder`] renumbers positions.
    pub reorder_scope: ReorderScope,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(500),
            event_buffer: 64,
            reorder_scope: ReorderScope::Global,
        }
    }
}

#[derive(Debug, Default)]
struct StoreState {
    tasks: Vec<Task>,
    categories: Vec<Category>,
    filter: Filter,
}

struct Inner<B> {
    backend: B,
    user_id: UserId,
    clock: Arc<dyn Clock>,
    config: StoreConfig,
    state: Mutex<StoreState>,
    debouncer: Mutex<Debouncer>,
    events: mpsc::Sender<StoreEvent>,
}

/// Shared handle to one user's task state.
///
/// Cheap to clone; clones see the same state.
pub struct TaskStore<B: Backend> {
    inner: Arc<Inner<B>>,
}

impl<B: Backend> Clone for TaskStore<B> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<B: Backend> TaskStore<B> {
    /// Creates an empty store for `user_id`.
    ///
    /// Returns the store and the receiver for its [`StoreEvent`]s. Call
    /// [`load`](Self::load) to populate it.
    #[must_use]
    pub fn new(
        backend: B,
        user_id: UserId,
        clock: Arc<dyn Clock>,
        config: StoreConfig,
    ) -> (Self, mpsc::Receiver<StoreEvent>) {
        let (events, rx) = mpsc::channel(config.event_buffer.max(1));
        let store = Self {
            inner: Arc::new(Inner {
                backend,
                user_id,
                clock,
                config,
                state: Mutex::new(StoreState::default()),
                debouncer: Mutex::new(Debouncer::default()),
                events,
            }),
        };
        (store, rx)
    }

    // --- loading ---

    /// Fetches tasks and categories and replaces local state with them.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] if either fetch fails; local state is
    /// left untouched in that case.
    pub async fn load(&self) -> Result<(), StoreError> {
        let user = &self.inner.user_id;
        let (tasks, categories) = tokio::try_join!(
            self.inner.backend.fetch_tasks(user),
            self.inner.backend.fetch_categories(user),
        )?;
        tracing::info!(
            user_id = %user,
            tasks = tasks.len(),
            categories = categories.len(),
            "store loaded"
        );
        {
            let mut state = self.inner.state.lock();
            state.tasks = tasks;
            state.categories = categories;
        }
        self.emit(StoreEvent::Reloaded);
        Ok(())
    }

    /// Re-fetches only the task list.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] if the fetch fails.
    pub async fn reload_tasks(&self) -> Result<(), StoreError> {
        let tasks = self.inner.backend.fetch_tasks(&self.inner.user_id).await?;
        tracing::info!(user_id = %self.inner.user_id, tasks = tasks.len(), "tasks reloaded");
        self.inner.state.lock().tasks = tasks;
        self.emit(StoreEvent::Reloaded);
        Ok(())
    }

    // --- task mutations ---

    /// Creates a task at the end of the list.
    ///
    /// The task is visible immediately under a temporary id and swapped for
    /// the stored row once the backend confirms it.
    ///
    /// # Errors
    ///
    /// - [`StoreError::TitleEmpty`] for a blank title (nothing is inserted).
    /// - [`StoreError::Backend`] if the insert fails; the temporary record
    ///   is removed.
    pub async fn create(&self, draft: TaskDraft) -> Result<Task, StoreError> {
        if draft.title.trim().is_empty() {
            return Err(StoreError::TitleEmpty);
        }

        let temp_id = TaskId::temporary();
        let (new, temp) = {
            let mut state = self.inner.state.lock();
            let position = state
                .tasks
                .iter()
                .map(|t| t.position)
                .max()
                .map_or(0, |max| max + 1);
            let new = NewTask::from_draft(draft, self.inner.user_id.clone(), position);
            let temp = Task::from_new(temp_id.clone(), &new, Some(self.inner.clock.now()));
            state.tasks.push(temp.clone());
            (new, temp)
        };
        self.inner.debouncer.lock().hold(&temp_id);
        tracing::debug!(task_id = %temp_id, position = new.position, "optimistic create");
        self.emit(StoreEvent::TaskInserted(temp));

        match self.inner.backend.insert_task(&new).await {
            Ok(confirmed) => {
                {
                    let mut state = self.inner.state.lock();
                    if state.tasks.iter().any(|t| t.id == confirmed.id) {
                        // The change feed got here first.
                        state.tasks.retain(|t| t.id != temp_id);
                    } else if let Some(slot) = state.tasks.iter_mut().find(|t| t.id == temp_id) {
                        *slot = confirmed.clone();
                    } else {
                        // A reload replaced the list while the insert ran.
                        state.tasks.push(confirmed.clone());
                    }
                }
                tracing::debug!(temp_id = %temp_id, task_id = %confirmed.id, "create confirmed");
                self.emit(StoreEvent::TaskConfirmed {
                    temp_id: temp_id.clone(),
                    task: confirmed.clone(),
                });
                self.release_held(&temp_id, &confirmed.id);
                Ok(confirmed)
            }
            Err(e) => {
                tracing::warn!(task_id = %temp_id, err = %e, "create failed, rolling back");
                self.inner.state.lock().tasks.retain(|t| t.id != temp_id);
                let held = self.inner.debouncer.lock().release(&temp_id);
                if let Some((_, reply)) = held {
                    let _ = reply.send(Err(StoreError::TaskNotFound(temp_id.clone())));
                }
                self.emit(StoreEvent::RolledBack(temp_id));
                Err(e.into())
            }
        }
    }

    /// Writes the edits held while a create was in flight, now under the
    /// server-assigned `id`.
    fn release_held(&self, temp_id: &TaskId, id: &TaskId) {
        let held = self.inner.debouncer.lock().release(temp_id);
        let Some((patch, reply)) = held else {
            return;
        };
        let updated = {
            let mut state = self.inner.state.lock();
            state.tasks.iter_mut().find(|t| &t.id == id).map(|task| {
                task.apply_patch(&patch);
                task.clone()
            })
        };
        if let Some(task) = updated {
            self.emit(StoreEvent::TaskUpdated(task));
        }
        tracing::debug!(temp_id = %temp_id, task_id = %id, "writing edits held during create");
        let confirmation = self.schedule_write(id, patch);
        tokio::spawn(async move {
            if let Ok(result) = confirmation.await {
                let _ = reply.send(result);
            }
        });
    }

    /// Applies `patch` locally now and writes it remotely after the debounce
    /// window.
    ///
    /// Further updates to the same task within the window restart the timer
    /// and are folded into one remote write. An id that is not in the local
    /// list still gets the remote write. Edits to a task whose create is
    /// still in flight are held and written under the server id once the
    /// create confirms.
    ///
    /// # Errors
    ///
    /// - [`StoreError::Backend`] if the remote write fails. The task list
    ///   has been re-fetched by then.
    /// - [`StoreError::TaskNotFound`] for a temporary id whose create is no
    ///   longer in flight, or whose create failed.
    pub async fn update(&self, id: &TaskId, patch: TaskPatch) -> Result<UpdateOutcome, StoreError> {
        let applied = {
            let mut state = self.inner.state.lock();
            state.tasks.iter_mut().find(|t| &t.id == id).map(|task| {
                task.apply_patch(&patch);
                task.clone()
            })
        };
        match applied {
            Some(task) => self.emit(StoreEvent::TaskUpdated(task)),
            None => tracing::debug!(task_id = %id, "update for task not held locally"),
        }

        let reply = if id.is_temporary() {
            let deferred = self.inner.debouncer.lock().defer(id, patch);
            let Some(reply) = deferred else {
                return Err(StoreError::TaskNotFound(id.clone()));
            };
            tracing::debug!(task_id = %id, "update held until create confirms");
            reply
        } else {
            self.schedule_write(id, patch)
        };
        match reply.await {
            Ok(result) => result.map(UpdateOutcome::Saved),
            Err(_) => Ok(UpdateOutcome::Superseded),
        }
    }

    /// Flips a task's completion flag through [`update`](Self::update).
    ///
    /// # Errors
    ///
    /// - [`StoreError::TaskNotFound`] if the id is not in the local list.
    /// - Whatever [`update`](Self::update) returns.
    pub async fn toggle_complete(&self, id: &TaskId) -> Result<UpdateOutcome, StoreError> {
        let completed = self
            .task(id)
            .map(|t| t.completed)
            .ok_or_else(|| StoreError::TaskNotFound(id.clone()))?;
        self.update(id, TaskPatch::completed(!completed)).await
    }

    /// Removes a task locally, then remotely.
    ///
    /// Any pending debounced write for the task is dropped. Removal events
    /// are emitted only for a task that was held locally.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] if the remote delete fails; the task
    /// list is restored to what it was before the call.
    pub async fn delete(&self, id: &TaskId) -> Result<(), StoreError> {
        let (snapshot, removed) = {
            let mut state = self.inner.state.lock();
            let snapshot = state.tasks.clone();
            state.tasks.retain(|t| &t.id != id);
            let removed = state.tasks.len() < snapshot.len();
            (snapshot, removed)
        };
        if self.inner.debouncer.lock().cancel(id) {
            tracing::debug!(task_id = %id, "dropped pending write for deleted task");
        }
        if removed {
            self.emit(StoreEvent::TaskRemoved(id.clone()));
        }

        if let Err(e) = self.inner.backend.delete_task(id).await {
            tracing::warn!(task_id = %id, err = %e, "delete failed, restoring");
            if removed {
                self.inner.state.lock().tasks = snapshot;
                self.emit(StoreEvent::RolledBack(id.clone()));
            }
            return Err(e.into());
        }
        tracing::debug!(task_id = %id, "task deleted");
        Ok(())
    }

    /// Moves the item at `start` in the visible list to `end` and persists
    /// the resulting positions.
    ///
    /// # Errors
    ///
    /// - [`StoreError::IndexOutOfRange`] if either index is outside the
    ///   visible list; nothing changes.
    /// - [`StoreError::Backend`] with the first failed position write; the
    ///   task list has been re-fetched by then.
    pub async fn reorder(&self, start: usize, end: usize) -> Result<(), StoreError> {
        let writes = self.plan_reorder(start, end)?;
        self.emit(StoreEvent::Reordered);

        let patches: Vec<(TaskId, TaskPatch)> = writes
            .into_iter()
            .filter(|(id, _)| !id.is_temporary())
            .map(|(id, position)| (id, TaskPatch::position(position)))
            .collect();
        tracing::debug!(start, end, writes = patches.len(), "reorder");

        let backend = &self.inner.backend;
        let results = join_all(
            patches
                .iter()
                .map(|(id, patch)| backend.update_task(id, patch)),
        )
        .await;

        if let Some(e) = results.into_iter().find_map(Result::err) {
            tracing::warn!(err = %e, "reorder write failed, reloading");
            if let Err(reload) = self.reload_tasks().await {
                tracing::warn!(err = %reload, "reload after failed reorder also failed");
            }
            return Err(e.into());
        }
        Ok(())
    }

    fn plan_reorder(&self, start: usize, end: usize) -> Result<Vec<(TaskId, i64)>, StoreError> {
        let today = self.inner.clock.today();
        let mut state = self.inner.state.lock();
        let mut order: Vec<TaskId> = view::filter_and_sort(&state.tasks, &state.filter, today)
            .into_iter()
            .map(|t| t.id.clone())
            .collect();
        let len = order.len();
        for index in [start, end] {
            if index >= len {
                return Err(StoreError::IndexOutOfRange { index, len });
            }
        }

        let moved = order.remove(start);
        order.insert(end, moved);
        let writes = reorder::renumber(&state.tasks, &order, self.inner.config.reorder_scope);
        for (id, position) in &writes {
            if let Some(task) = state.tasks.iter_mut().find(|t| &t.id == id) {
                task.position = *position;
            }
        }
        Ok(writes)
    }

    // --- debounced writes ---

    fn schedule_write(
        &self,
        id: &TaskId,
        patch: TaskPatch,
    ) -> oneshot::Receiver<Result<Task, StoreError>> {
        let (reply, rx) = oneshot::channel();
        let mut debouncer = self.inner.debouncer.lock();
        let generation = debouncer.schedule(id, patch);
        let store = self.clone();
        let task_id = id.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(store.inner.config.debounce).await;
            let Some(patch) = store.take_pending(&task_id, generation) else {
                return;
            };
            let result = store.write_now(&task_id, &patch).await;
            let _ = reply.send(result);
        });
        debouncer.arm(id, generation, timer.abort_handle());
        rx
    }

    fn take_pending(&self, id: &TaskId, generation: u64) -> Option<TaskPatch> {
        self.inner.debouncer.lock().take(id, generation)
    }

    async fn write_now(&self, id: &TaskId, patch: &TaskPatch) -> Result<Task, StoreError> {
        match self.inner.backend.update_task(id, patch).await {
            Ok(confirmed) => {
                tracing::debug!(task_id = %id, "update confirmed");
                self.adopt(&confirmed);
                Ok(confirmed)
            }
            Err(e) => {
                tracing::warn!(task_id = %id, err = %e, "update failed, reloading tasks");
                if let Err(reload) = self.reload_tasks().await {
                    tracing::warn!(err = %reload, "reload after failed update also failed");
                }
                Err(e.into())
            }
        }
    }

    /// Replaces the local copy of `record`, keeping any edit still waiting
    /// to be written.
    fn adopt(&self, record: &Task) -> bool {
        let pending = self.inner.debouncer.lock().pending_patch(&record.id);
        let updated = {
            let mut state = self.inner.state.lock();
            state
                .tasks
                .iter_mut()
                .find(|t| t.id == record.id)
                .map(|slot| {
                    slot.clone_from(record);
                    if let Some(patch) = &pending {
                        slot.apply_patch(patch);
                    }
                    slot.clone()
                })
        };
        let Some(task) = updated else {
            return false;
        };
        self.emit(StoreEvent::TaskUpdated(task));
        true
    }

    // --- change feed ---

    /// Merges one remote change into local state.
    ///
    /// Inserts of ids already present, updates of unknown ids and deletes of
    /// unknown ids are no-ops. Events for other users are ignored. Returns
    /// whether local state changed.
    pub fn apply_change(&self, event: &ChangeEvent) -> bool {
        if event.user_id() != &self.inner.user_id {
            tracing::warn!(
                user_id = %event.user_id(),
                kind = event.kind(),
                "ignoring change for another user"
            );
            return false;
        }

        let changed = match event {
            ChangeEvent::Insert { record } => {
                let inserted = {
                    let mut state = self.inner.state.lock();
                    if state.tasks.iter().any(|t| t.id == record.id) {
                        false
                    } else {
                        state.tasks.push(record.clone());
                        true
                    }
                };
                if inserted {
                    self.emit(StoreEvent::TaskInserted(record.clone()));
                }
                inserted
            }
            ChangeEvent::Update { record } => self.adopt(record),
            ChangeEvent::Delete { id, .. } => {
                let removed = {
                    let mut state = self.inner.state.lock();
                    let before = state.tasks.len();
                    state.tasks.retain(|t| &t.id != id);
                    state.tasks.len() != before
                };
                if removed {
                    self.emit(StoreEvent::TaskRemoved(id.clone()));
                }
                removed
            }
        };
        tracing::debug!(kind = event.kind(), task_id = %event.task_id(), changed, "remote change");
        changed
    }

    // --- categories ---

    /// Creates a category remotely, then appends it locally.
    ///
    /// # Errors
    ///
    /// - [`StoreError::CategoryNameEmpty`] for a blank name.
    /// - [`StoreError::Backend`] if the insert fails; nothing changes locally.
    pub async fn create_category(
        &self,
        name: &str,
        color: Option<String>,
    ) -> Result<Category, StoreError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(StoreError::CategoryNameEmpty);
        }
        let new = NewCategory::new(name, color, self.inner.user_id.clone());
        let stored = self.inner.backend.insert_category(&new).await?;
        tracing::debug!(category_id = %stored.id, "category created");
        self.inner.state.lock().categories.push(stored.clone());
        self.emit(StoreEvent::CategoriesChanged);
        Ok(stored)
    }

    /// Deletes a category remotely, then drops it locally.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] if the delete fails; nothing changes
    /// locally.
    pub async fn delete_category(&self, id: &CategoryId) -> Result<(), StoreError> {
        self.inner.backend.delete_category(id).await?;
        tracing::debug!(category_id = %id, "category deleted");
        self.inner.state.lock().categories.retain(|c| &c.id != id);
        self.emit(StoreEvent::CategoriesChanged);
        Ok(())
    }

    // --- accessors ---

    /// Every task, in local list order.
    #[must_use]
    pub fn tasks(&self) -> Vec<Task> {
        self.inner.state.lock().tasks.clone()
    }

    /// One task by id.
    #[must_use]
    pub fn task(&self, id: &TaskId) -> Option<Task> {
        self.inner
            .state
            .lock()
            .tasks
            .iter()
            .find(|t| &t.id == id)
            .cloned()
    }

    /// Every category.
    #[must_use]
    pub fn categories(&self) -> Vec<Category> {
        self.inner.state.lock().categories.clone()
    }

    /// The active filter.
    #[must_use]
    pub fn filter(&self) -> Filter {
        self.inner.state.lock().filter.clone()
    }

    /// Replaces the active filter.
    pub fn set_filter(&self, filter: Filter) {
        self.inner.state.lock().filter = filter;
    }

    /// Tasks passing the active filter, in display order.
    #[must_use]
    pub fn visible_tasks(&self) -> Vec<Task> {
        let today = self.inner.clock.today();
        let state = self.inner.state.lock();
        view::filter_and_sort(&state.tasks, &state.filter, today)
            .into_iter()
            .cloned()
            .collect()
    }

    /// Completion statistics as of today.
    #[must_use]
    pub fn analytics(&self) -> Analytics {
        let today = self.inner.clock.today();
        Analytics::compute(&self.inner.state.lock().tasks, today)
    }

    /// Whether a debounced write for `id` is waiting to be sent.
    #[must_use]
    pub fn has_pending_write(&self, id: &TaskId) -> bool {
        self.inner.debouncer.lock().contains(id)
    }

    /// The user this store belongs to.
    #[must_use]
    pub fn user_id(&self) -> &UserId {
        &self.inner.user_id
    }

    /// The backend this store writes to.
    #[must_use]
    pub fn backend(&self) -> &B {
        &self.inner.backend
    }

    fn emit(&self, event: StoreEvent) {
        if let Err(e) = self.inner.events.try_send(event) {
            tracing::debug!(err = %e, "store event dropped");
        }
    }
}

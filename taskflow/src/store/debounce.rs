//! Per-task bookkeeping for debounced remote writes.
//!
//! Each task id has at most one pending write. Scheduling again while one is
//! pending folds the new patch into it, stops the old timer and bumps the
//! generation, so a timer that already woke up can tell it lost the race.
//!
//! Edits to a task whose create is still in flight cannot be written yet,
//! since the server has not assigned its id. They are held under the
//! temporary id and released once the create settles.

use std::collections::HashMap;

use tokio::sync::oneshot;
use tokio::task::AbortHandle;

use taskflow_proto::task::{Task, TaskId, TaskPatch};

use super::StoreError;

/// Where the outcome of a remote write is sent.
pub type Reply = oneshot::Sender<Result<Task, StoreError>>;

#[derive(Debug)]
struct Pending {
    generation: u64,
    patch: TaskPatch,
    timer: Option<AbortHandle>,
}

#[derive(Debug, Default)]
struct Held {
    patch: TaskPatch,
    reply: Option<Reply>,
}

/// Pending debounced writes keyed by task id.
#[derive(Debug, Default)]
pub struct Debouncer {
    pending: HashMap<TaskId, Pending>,
    held: HashMap<TaskId, Held>,
    next_generation: u64,
}

impl Debouncer {
    /// Records `patch` for `id` and returns the generation the new timer
    /// must present to [`take`](Self::take).
    pub fn schedule(&mut self, id: &TaskId, patch: TaskPatch) -> u64 {
        self.next_generation += 1;
        let generation = self.next_generation;
        if let Some(pending) = self.pending.get_mut(id) {
            if let Some(timer) = pending.timer.take() {
                timer.abort();
            }
            pending.patch.merge(patch);
            pending.generation = generation;
        } else {
            self.pending.insert(
                id.clone(),
                Pending {
                    generation,
                    patch,
                    timer: None,
                },
            );
        }
        generation
    }

    /// Attaches the timer task for `generation`. Ignored if that generation
    /// has already fired or been superseded.
    pub fn arm(&mut self, id: &TaskId, generation: u64, timer: AbortHandle) {
        match self.pending.get_mut(id) {
            Some(pending) if pending.generation == generation => pending.timer = Some(timer),
            _ => {}
        }
    }

    /// Removes and returns the patch if `generation` is still current.
    pub fn take(&mut self, id: &TaskId, generation: u64) -> Option<TaskPatch> {
        if self.pending.get(id)?.generation != generation {
            return None;
        }
        self.pending.remove(id).map(|p| p.patch)
    }

    /// Drops the pending write for `id`, stopping its timer.
    pub fn cancel(&mut self, id: &TaskId) -> bool {
        let Some(pending) = self.pending.remove(id) else {
            return false;
        };
        if let Some(timer) = pending.timer {
            timer.abort();
        }
        true
    }

    /// The patch waiting to be written for `id`, if any.
    #[must_use]
    pub fn pending_patch(&self, id: &TaskId) -> Option<TaskPatch> {
        self.pending.get(id).map(|p| p.patch.clone())
    }

    /// Whether a write for `id` is waiting on its timer or on its create.
    #[must_use]
    pub fn contains(&self, id: &TaskId) -> bool {
        self.pending.contains_key(id) || self.held.get(id).is_some_and(|h| h.reply.is_some())
    }

    /// Starts holding edits for `temp_id` until its create settles.
    pub fn hold(&mut self, temp_id: &TaskId) {
        self.held.insert(temp_id.clone(), Held::default());
    }

    /// Folds `patch` into the edits held for `temp_id`.
    ///
    /// The previous caller's reply is dropped, so it sees its write as
    /// superseded. Returns `None` if no create for `temp_id` is in flight.
    pub fn defer(
        &mut self,
        temp_id: &TaskId,
        patch: TaskPatch,
    ) -> Option<oneshot::Receiver<Result<Task, StoreError>>> {
        let held = self.held.get_mut(temp_id)?;
        held.patch.merge(patch);
        let (reply, rx) = oneshot::channel();
        held.reply = Some(reply);
        Some(rx)
    }

    /// Stops holding edits for `temp_id`. Returns the merged patch and the
    /// latest caller's reply if any edit arrived while the create ran.
    pub fn release(&mut self, temp_id: &TaskId) -> Option<(TaskPatch, Reply)> {
        let held = self.held.remove(temp_id)?;
        held.reply.map(|reply| (held.patch, reply))
    }
}

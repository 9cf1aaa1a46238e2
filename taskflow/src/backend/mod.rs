//! Remote data-platform abstraction for `Taskflow`.
//!
//! Defines the [`Backend`] trait every remote store implementation must
//! satisfy. Concrete implementations include:
//! - [`memory::MemoryBackend`]: in-process tables with a live change feed,
//!   used for tests and the offline demo
//! - [`rest::RestBackend`]: PostgREST-style HTTP API plus a WebSocket
//!   change feed ([`realtime`])

pub mod memory;
pub mod realtime;
pub mod rest;

use std::fmt;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use taskflow_proto::category::{Category, CategoryId, NewCategory};
use taskflow_proto::change::ChangeEvent;
use taskflow_proto::task::{NewTask, Task, TaskId, TaskPatch};
use taskflow_proto::user::UserId;

/// Identifies a backend call, for logging and failure injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// List a user's tasks.
    FetchTasks,
    /// List a user's categories.
    FetchCategories,
    /// Insert a task.
    InsertTask,
    /// Patch a task.
    UpdateTask,
    /// Delete a task.
    DeleteTask,
    /// Insert a category.
    InsertCategory,
    /// Delete a category.
    DeleteCategory,
    /// Open the change feed.
    Subscribe,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::FetchTasks => "fetch_tasks",
            Self::FetchCategories => "fetch_categories",
            Self::InsertTask => "insert_task",
            Self::UpdateTask => "update_task",
            Self::DeleteTask => "delete_task",
            Self::InsertCategory => "insert_category",
            Self::DeleteCategory => "delete_category",
            Self::Subscribe => "subscribe",
        };
        write!(f, "{name}")
    }
}

/// Errors that can occur talking to the remote store.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// The HTTP request could not be completed.
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The server answered with a non-success status.
    #[error("server returned {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body, as text.
        body: String,
    },

    /// The addressed row does not exist.
    #[error("{0} not found")]
    NotFound(String),

    /// A response or frame could not be decoded.
    #[error("decode error: {0}")]
    Decode(String),

    /// The change-feed connection has been closed.
    #[error("connection closed")]
    ConnectionClosed,

    /// The operation timed out before completing.
    #[error("backend operation timed out")]
    Timeout,

    /// The backend refused the write.
    #[error("rejected: {0}")]
    Rejected(String),

    /// The backend was not configured for this operation.
    #[error("unsupported: {0}")]
    Unsupported(String),
}

/// A live, per-user stream of [`ChangeEvent`]s.
///
/// Backed by a channel fed either directly by the backend or by a background
/// reader task. Dropping the feed stops that reader.
pub struct ChangeFeed {
    rx: mpsc::Receiver<ChangeEvent>,
    reader: Option<JoinHandle<()>>,
}

impl ChangeFeed {
    /// Wraps a channel that the backend pushes into directly.
    #[must_use]
    pub fn new(rx: mpsc::Receiver<ChangeEvent>) -> Self {
        Self { rx, reader: None }
    }

    /// Wraps a channel fed by `reader`, which is aborted when the feed drops.
    #[must_use]
    pub fn with_reader(rx: mpsc::Receiver<ChangeEvent>, reader: JoinHandle<()>) -> Self {
        Self {
            rx,
            reader: Some(reader),
        }
    }

    /// Waits for the next change. Returns `None` once the feed has ended.
    pub async fn recv(&mut self) -> Option<ChangeEvent> {
        self.rx.recv().await
    }
}

impl Drop for ChangeFeed {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}

impl fmt::Debug for ChangeFeed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChangeFeed")
            .field("has_reader", &self.reader.is_some())
            .finish_non_exhaustive()
    }
}

/// Async access to the remote task and category collections.
///
/// Every query is scoped by owner. Mutations return the row as the server
/// stored it (server id, timestamps), which is what the local store adopts
/// on confirmation.
pub trait Backend: Send + Sync + 'static {
    /// All tasks owned by `user`, ordered by ascending position.
    fn fetch_tasks(
        &self,
        user: &UserId,
    ) -> impl std::future::Future<Output = Result<Vec<Task>, BackendError>> + Send;

    /// All categories owned by `user`, ordered by name.
    fn fetch_categories(
        &self,
        user: &UserId,
    ) -> impl std::future::Future<Output = Result<Vec<Category>, BackendError>> + Send;

    /// Inserts a task and returns the stored row.
    fn insert_task(
        &self,
        task: &NewTask,
    ) -> impl std::future::Future<Output = Result<Task, BackendError>> + Send;

    /// Applies `patch` to one task and returns the stored row.
    fn update_task(
        &self,
        id: &TaskId,
        patch: &TaskPatch,
    ) -> impl std::future::Future<Output = Result<Task, BackendError>> + Send;

    /// Deletes one task.
    fn delete_task(
        &self,
        id: &TaskId,
    ) -> impl std::future::Future<Output = Result<(), BackendError>> + Send;

    /// Inserts a category and returns the stored row.
    fn insert_category(
        &self,
        category: &NewCategory,
    ) -> impl std::future::Future<Output = Result<Category, BackendError>> + Send;

    /// Deletes one category.
    fn delete_category(
        &self,
        id: &CategoryId,
    ) -> impl std::future::Future<Output = Result<(), BackendError>> + Send;

    /// Opens the task change feed for `user`.
    fn subscribe(
        &self,
        user: &UserId,
    ) -> impl std::future::Future<Output = Result<ChangeFeed, BackendError>> + Send;
}

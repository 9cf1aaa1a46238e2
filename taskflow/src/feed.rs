//! Background task that merges the remote change feed into a store.

use tokio::task::JoinHandle;

use crate::backend::{Backend, BackendError, ChangeFeed};
use crate::store::TaskStore;

/// Running change-feed subscription for one store.
///
/// The listener task is aborted when this handle is dropped.
#[derive(Debug)]
pub struct FeedListener {
    handle: JoinHandle<()>,
}

impl FeedListener {
    /// Opens the change feed for the store's user and starts merging it.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError`] if the feed cannot be opened.
    pub async fn subscribe<B: Backend>(store: &TaskStore<B>) -> Result<Self, BackendError> {
        let feed = store.backend().subscribe(store.user_id()).await?;
        tracing::info!(user_id = %store.user_id(), "change feed listener started");
        Ok(Self::spawn(store.clone(), feed))
    }

    /// Starts merging an already opened `feed` into `store`.
    #[must_use]
    pub fn spawn<B: Backend>(store: TaskStore<B>, feed: ChangeFeed) -> Self {
        let handle = tokio::spawn(listen(store, feed));
        Self { handle }
    }

    /// Stops the listener.
    pub fn stop(self) {
        drop(self);
    }

    /// Whether the listener task has ended, e.g. because the feed closed.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for FeedListener {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn listen<B: Backend>(store: TaskStore<B>, mut feed: ChangeFeed) {
    while let Some(event) = feed.recv().await {
        store.apply_change(&event);
    }
    tracing::info!(user_id = %store.user_id(), "change feed ended");
}

//! Follows the signed-in user and keeps one live store for them.
//!
//! The auth layer publishes an [`AuthState`] on a `watch` channel. Whenever
//! the user changes, [`SyncSession`] tears down the previous store and feed
//! listener, then builds, loads and subscribes a fresh store for the new
//! user. While auth is still loading nothing happens.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};

use taskflow_proto::user::{User, UserId};

use crate::backend::{Backend, BackendError};
use crate::clock::Clock;
use crate::feed::FeedListener;
use crate::store::{StoreConfig, StoreError, StoreEvent, TaskStore};

/// Snapshot of the authentication context.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthState {
    /// The signed-in user, if any.
    pub user: Option<User>,
    /// Whether sign-in is still being resolved.
    pub loading: bool,
}

impl AuthState {
    /// Resolved state for a signed-in user.
    #[must_use]
    pub const fn signed_in(user: User) -> Self {
        Self {
            user: Some(user),
            loading: false,
        }
    }

    /// Resolved state with nobody signed in.
    #[must_use]
    pub const fn signed_out() -> Self {
        Self {
            user: None,
            loading: false,
        }
    }
}

struct Active<B: Backend> {
    store: TaskStore<B>,
    events: Option<mpsc::Receiver<StoreEvent>>,
    listener: Option<FeedListener>,
}

/// Owns the store and change-feed listener for the current user.
pub struct SyncSession<B: Backend + Clone> {
    backend: B,
    clock: Arc<dyn Clock>,
    config: StoreConfig,
    auth: watch::Receiver<AuthState>,
    active: Option<Active<B>>,
}

impl<B: Backend + Clone> SyncSession<B> {
    /// Creates an idle session. Call [`sync`](Self::sync) to act on the
    /// current auth state.
    #[must_use]
    pub fn new(
        backend: B,
        clock: Arc<dyn Clock>,
        config: StoreConfig,
        auth: watch::Receiver<AuthState>,
    ) -> Self {
        Self {
            backend,
            clock,
            config,
            auth,
            active: None,
        }
    }

    /// Brings the session in line with the latest auth state.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if loading the new user's data or opening
    /// their change feed fails. The new store is kept either way, so a later
    /// [`TaskStore::load`] can retry.
    pub async fn sync(&mut self) -> Result<(), StoreError> {
        let state = self.auth.borrow_and_update().clone();
        if state.loading {
            tracing::debug!("auth still loading");
            return Ok(());
        }

        let wanted = state.user.map(|u| u.id);
        if wanted.as_ref() == self.user_id() {
            return Ok(());
        }

        if let Some(previous) = self.active.take() {
            tracing::info!(user_id = %previous.store.user_id(), "session ended");
        }
        let Some(user_id) = wanted else {
            return Ok(());
        };

        tracing::info!(user_id = %user_id, "session started");
        let (store, events) = TaskStore::new(
            self.backend.clone(),
            user_id,
            Arc::clone(&self.clock),
            self.config,
        );
        let active = self.active.insert(Active {
            store,
            events: Some(events),
            listener: None,
        });

        active.store.load().await?;
        match FeedListener::subscribe(&active.store).await {
            Ok(listener) => active.listener = Some(listener),
            Err(BackendError::Unsupported(reason)) => {
                tracing::info!(%reason, "live updates unavailable");
            }
            Err(e) => return Err(e.into()),
        }
        Ok(())
    }

    /// Waits for the next auth change and syncs to it.
    ///
    /// Returns `Ok(false)` once the auth publisher has gone away.
    ///
    /// # Errors
    ///
    /// Same as [`sync`](Self::sync).
    pub async fn changed(&mut self) -> Result<bool, StoreError> {
        if self.auth.changed().await.is_err() {
            return Ok(false);
        }
        self.sync().await?;
        Ok(true)
    }

    /// The current user's store.
    #[must_use]
    pub fn store(&self) -> Option<&TaskStore<B>> {
        self.active.as_ref().map(|a| &a.store)
    }

    /// Takes the event receiver of the current store. Yields it once per
    /// store.
    pub fn take_events(&mut self) -> Option<mpsc::Receiver<StoreEvent>> {
        self.active.as_mut().and_then(|a| a.events.take())
    }

    /// The user the session is currently bound to.
    #[must_use]
    pub fn user_id(&self) -> Option<&UserId> {
        self.active.as_ref().map(|a| a.store.user_id())
    }

    /// Whether a change-feed listener is running.
    #[must_use]
    pub fn is_listening(&self) -> bool {
        self.active
            .as_ref()
            .and_then(|a| a.listener.as_ref())
            .is_some_and(|l| !l.is_finished())
    }
}

//! Change-feed notifications for the `tasks` collection.
//!
//! The backend pushes one [`ChangeEvent`] per committed row change, scoped to
//! the subscribing user. On the wire each event is a JSON object tagged by
//! `type` (`INSERT`, `UPDATE`, `DELETE`). A client opens the feed by sending a
//! [`SubscribeRequest`].

use serde::{Deserialize, Serialize};

use crate::task::{Task, TaskId};
use crate::user::UserId;

/// Collection name the task feed is published under.
pub const TASKS_TABLE: &str = "tasks";

/// A single remote row change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "UPPERCASE")]
pub enum ChangeEvent {
    /// A row was inserted.
    Insert {
        /// The inserted row.
        record: Task,
    },
    /// A row was updated. Carries the full new row.
    Update {
        /// The row after the update.
        record: Task,
    },
    /// A row was deleted.
    Delete {
        /// Id of the removed row.
        id: TaskId,
        /// Owner of the removed row.
        user_id: UserId,
    },
}

impl ChangeEvent {
    /// The task id this event is about.
    #[must_use]
    pub const fn task_id(&self) -> &TaskId {
        match self {
            Self::Insert { record } | Self::Update { record } => &record.id,
            Self::Delete { id, .. } => id,
        }
    }

    /// The owner of the row this event is about.
    #[must_use]
    pub const fn user_id(&self) -> &UserId {
        match self {
            Self::Insert { record } | Self::Update { record } => &record.user_id,
            Self::Delete { user_id, .. } => user_id,
        }
    }

    /// Short lowercase name of the event kind, for logs.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Insert { .. } => "insert",
            Self::Update { .. } => "update",
            Self::Delete { .. } => "delete",
        }
    }
}

/// First frame a client sends to open a per-user change feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename = "subscribe")]
pub struct SubscribeRequest {
    /// Collection to follow.
    pub table: String,
    /// Only rows owned by this user are delivered.
    pub user_id: UserId,
    /// Bearer token or API key authorizing the subscription.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

impl SubscribeRequest {
    /// Subscription to the task collection for `user_id`.
    #[must_use]
    pub fn tasks(user_id: UserId, token: Option<String>) -> Self {
        Self {
            table: TASKS_TABLE.to_string(),
            user_id,
            token,
        }
    }
}

/// Errors from encoding or decoding change-feed frames.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The frame is not valid JSON for the expected type.
    #[error("malformed change-feed frame: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Encodes a [`ChangeEvent`] as a JSON text frame.
///
/// # Errors
///
/// Returns [`FrameError::Malformed`] if serialization fails.
pub fn encode(event: &ChangeEvent) -> Result<String, FrameError> {
    Ok(serde_json::to_string(event)?)
}

/// Decodes a [`ChangeEvent`] from frame bytes.
///
/// # Errors
///
/// Returns [`FrameError::Malformed`] for anything that is not a valid event.
pub fn decode(bytes: &[u8]) -> Result<ChangeEvent, FrameError> {
    Ok(serde_json::from_slice(bytes)?)
}

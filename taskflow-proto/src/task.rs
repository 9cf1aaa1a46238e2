//! Task records and the payloads used to create and patch them.
//!
//! A [`Task`] is the full row as stored remotely. [`TaskDraft`] is what a
//! caller fills in, [`NewTask`] is the insert payload derived from it, and
//! [`TaskPatch`] is an explicit partial update where every field is optional
//! and nullable fields distinguish "leave alone" from "set to null".

use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

use crate::category::CategoryId;
use crate::user::UserId;

/// Prefix carried by client-generated ids until the server confirms a create.
const TEMP_ID_PREFIX: &str = "tmp-";

/// Opaque task identifier.
///
/// Server ids are whatever the backend issues. Ids made with
/// [`TaskId::temporary`] mark optimistic records that have not been
/// confirmed yet.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    /// Creates a task identifier from its string form.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Creates a fresh client-side id for an optimistic insert.
    #[must_use]
    pub fn temporary() -> Self {
        Self(format!("{TEMP_ID_PREFIX}{}", Uuid::now_v7()))
    }

    /// Returns `true` for ids created by [`TaskId::temporary`].
    #[must_use]
    pub fn is_temporary(&self) -> bool {
        self.0.starts_with(TEMP_ID_PREFIX)
    }

    /// Returns the string form of this identifier.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Task priority. Declaration order is ascending importance.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    /// Nice to have.
    Low,
    /// The default.
    #[default]
    Medium,
    /// Do first.
    High,
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
        }
    }
}

/// Error returned when parsing an unknown priority name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown priority {0:?} (expected low, medium or high)")]
pub struct ParsePriorityError(String);

impl FromStr for Priority {
    type Err = ParsePriorityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            _ => Err(ParsePriorityError(s.to_string())),
        }
    }
}

/// A task row owned by one user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    /// Server id, or a temporary id while the create is in flight.
    pub id: TaskId,
    /// Non-empty title.
    pub title: String,
    /// Free-form notes.
    #[serde(default)]
    pub description: Option<String>,
    /// Priority used for ordering.
    #[serde(default)]
    pub priority: Priority,
    /// Calendar due date, no time component.
    #[serde(default)]
    pub due_date: Option<NaiveDate>,
    /// Completion flag.
    #[serde(default)]
    pub completed: bool,
    /// When the task was completed. Stamped by the remote store.
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    /// Optional category reference.
    #[serde(default)]
    pub category_id: Option<CategoryId>,
    /// Manual ordering among the owner's tasks.
    #[serde(default)]
    pub position: i64,
    /// Owner.
    pub user_id: UserId,
    /// Creation time, as stamped by whoever created the row.
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl Task {
    /// Builds a task row from an insert payload.
    #[must_use]
    pub fn from_new(id: TaskId, new: &NewTask, created_at: Option<DateTime<Utc>>) -> Self {
        Self {
            id,
            title: new.title.clone(),
            description: new.description.clone(),
            priority: new.priority,
            due_date: new.due_date,
            completed: new.completed,
            completed_at: None,
            category_id: new.category_id.clone(),
            position: new.position,
            user_id: new.user_id.clone(),
            created_at,
        }
    }

    /// Overdue means incomplete with a due date strictly before `today`.
    #[must_use]
    pub fn is_overdue(&self, today: NaiveDate) -> bool {
        !self.completed && self.due_date.is_some_and(|due| due < today)
    }

    /// The calendar date (UTC) on which the task was completed, if any.
    #[must_use]
    pub fn completed_on(&self) -> Option<NaiveDate> {
        self.completed_at.map(|at| at.date_naive())
    }

    /// Applies every field present in `patch`.
    pub fn apply_patch(&mut self, patch: &TaskPatch) {
        if let Some(title) = &patch.title {
            self.title.clone_from(title);
        }
        if let Some(description) = &patch.description {
            self.description.clone_from(description);
        }
        if let Some(priority) = patch.priority {
            self.priority = priority;
        }
        if let Some(due_date) = patch.due_date {
            self.due_date = due_date;
        }
        if let Some(completed) = patch.completed {
            self.completed = completed;
        }
        if let Some(completed_at) = patch.completed_at {
            self.completed_at = completed_at;
        }
        if let Some(category_id) = &patch.category_id {
            self.category_id.clone_from(category_id);
        }
        if let Some(position) = patch.position {
            self.position = position;
        }
    }
}

/// What a caller fills in to create a task.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskDraft {
    /// Required title.
    pub title: String,
    /// Optional notes.
    pub description: Option<String>,
    /// Priority (defaults to medium).
    pub priority: Priority,
    /// Optional due date.
    pub due_date: Option<NaiveDate>,
    /// Optional category.
    pub category_id: Option<CategoryId>,
}

impl TaskDraft {
    /// Starts a draft with just a title.
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }

    /// Sets the priority.
    #[must_use]
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Sets the due date.
    #[must_use]
    pub fn with_due_date(mut self, due_date: NaiveDate) -> Self {
        self.due_date = Some(due_date);
        self
    }

    /// Sets the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Sets the category.
    #[must_use]
    pub fn with_category(mut self, category_id: CategoryId) -> Self {
        self.category_id = Some(category_id);
        self
    }
}

/// Insert payload sent to the remote store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewTask {
    /// Owner.
    pub user_id: UserId,
    /// Title.
    pub title: String,
    /// Notes.
    #[serde(default)]
    pub description: Option<String>,
    /// Priority.
    #[serde(default)]
    pub priority: Priority,
    /// Due date.
    #[serde(default)]
    pub due_date: Option<NaiveDate>,
    /// Category.
    #[serde(default)]
    pub category_id: Option<CategoryId>,
    /// Position at the end of the owner's list.
    pub position: i64,
    /// Always `false` for new tasks.
    #[serde(default)]
    pub completed: bool,
}

impl NewTask {
    /// Builds the insert payload for `draft` at the given position.
    #[must_use]
    pub fn from_draft(draft: TaskDraft, user_id: UserId, position: i64) -> Self {
        Self {
            user_id,
            title: draft.title,
            description: draft.description,
            priority: draft.priority,
            due_date: draft.due_date,
            category_id: draft.category_id,
            position,
            completed: false,
        }
    }
}

/// Deserializes a present field (including `null`) as `Some(..)`.
///
/// Combined with `#[serde(default)]` this keeps "absent" (`None`) apart
/// from "explicit null" (`Some(None)`).
fn nullable<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

/// Partial update of a task.
///
/// `None` leaves a field untouched. For nullable columns, `Some(None)`
/// clears the value and serializes as JSON `null`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskPatch {
    /// New title.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// New description, or `Some(None)` to clear it.
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "nullable")]
    pub description: Option<Option<String>>,
    /// New priority.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,
    /// New due date, or `Some(None)` to clear it.
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "nullable")]
    pub due_date: Option<Option<NaiveDate>>,
    /// New completion flag.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed: Option<bool>,
    /// Explicit completion timestamp, or `Some(None)` to clear it.
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "nullable")]
    pub completed_at: Option<Option<DateTime<Utc>>>,
    /// New category, or `Some(None)` to detach.
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "nullable")]
    pub category_id: Option<Option<CategoryId>>,
    /// New manual position.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<i64>,
}

impl TaskPatch {
    /// A patch that only sets the completion flag.
    #[must_use]
    pub fn completed(completed: bool) -> Self {
        Self {
            completed: Some(completed),
            ..Self::default()
        }
    }

    /// A patch that only sets the position.
    #[must_use]
    pub fn position(position: i64) -> Self {
        Self {
            position: Some(position),
            ..Self::default()
        }
    }

    /// A patch that only sets the title.
    #[must_use]
    pub fn title(title: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
            ..Self::default()
        }
    }

    /// Returns `true` when the patch changes nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Folds a later patch into this one. Fields set in `later` win.
    pub fn merge(&mut self, later: Self) {
        if later.title.is_some() {
            self.title = later.title;
        }
        if later.description.is_some() {
            self.description = later.description;
        }
        if later.priority.is_some() {
            self.priority = later.priority;
        }
        if later.due_date.is_some() {
            self.due_date = later.due_date;
        }
        if later.completed.is_some() {
            self.completed = later.completed;
        }
        if later.completed_at.is_some() {
            self.completed_at = later.completed_at;
        }
        if later.category_id.is_some() {
            self.category_id = later.category_id;
        }
        if later.position.is_some() {
            self.position = later.position;
        }
    }
}

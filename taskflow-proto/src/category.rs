//! Task categories.

use serde::{Deserialize, Serialize};

use crate::user::UserId;

/// Color assigned to a category when the caller does not pick one.
pub const DEFAULT_CATEGORY_COLOR: &str = "#6366f1";

/// Server-issued category identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CategoryId(String);

impl CategoryId {
    /// Creates a category identifier from its string form.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the string form of this identifier.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CategoryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A named, colored grouping of tasks owned by one user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    /// Server-issued identifier.
    pub id: CategoryId,
    /// Display name.
    pub name: String,
    /// Display color (CSS hex string).
    pub color: String,
    /// Owner.
    pub user_id: UserId,
}

/// Insert payload for a new category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewCategory {
    /// Display name.
    pub name: String,
    /// Display color (CSS hex string).
    pub color: String,
    /// Owner.
    pub user_id: UserId,
}

impl NewCategory {
    /// Builds an insert payload, falling back to [`DEFAULT_CATEGORY_COLOR`].
    pub fn new(name: impl Into<String>, color: Option<String>, user_id: UserId) -> Self {
        Self {
            name: name.into(),
            color: color.unwrap_or_else(|| DEFAULT_CATEGORY_COLOR.to_string()),
            user_id,
        }
    }

    /// Materializes the category once the server has assigned an id.
    #[must_use]
    pub fn into_category(self, id: CategoryId) -> Category {
        Category {
            id,
            name: self.name,
            color: self.color,
            user_id: self.user_id,
        }
    }
}

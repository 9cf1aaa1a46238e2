//! Filtering and ordering of the task list for display.
//!
//! Everything here is a pure function of the task slice, a [`Filter`] and
//! the current date.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;

use taskflow_proto::task::{Priority, Task};

/// Named subset of the task list.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum View {
    /// Every incomplete task.
    #[default]
    All,
    /// Incomplete tasks due today.
    Today,
    /// Incomplete tasks due after today.
    Upcoming,
    /// Completed tasks.
    Completed,
}

impl View {
    /// Whether `task` belongs in this view.
    #[must_use]
    pub fn contains(self, task: &Task, today: NaiveDate) -> bool {
        match self {
            Self::All => !task.completed,
            Self::Today => !task.completed && task.due_date == Some(today),
            Self::Upcoming => !task.completed && task.due_date.is_some_and(|due| due > today),
            Self::Completed => task.completed,
        }
    }
}

impl fmt::Display for View {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::All => "all",
            Self::Today => "today",
            Self::Upcoming => "upcoming",
            Self::Completed => "completed",
        };
        f.write_str(name)
    }
}

/// Error returned when parsing an unknown view name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown view {0:?} (expected all, today, upcoming or completed)")]
pub struct ParseViewError(String);

impl FromStr for View {
    type Err = ParseViewError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "all" => Ok(Self::All),
            "today" => Ok(Self::Today),
            "upcoming" => Ok(Self::Upcoming),
            "completed" => Ok(Self::Completed),
            _ => Err(ParseViewError(s.to_string())),
        }
    }
}

/// Active search, priority and view selection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Filter {
    /// Case-insensitive substring of the title. Empty matches everything.
    pub search: String,
    /// Only tasks with exactly this priority.
    pub priority: Option<Priority>,
    /// Named view.
    pub view: View,
}

impl Filter {
    /// Whether `task` passes every part of the filter.
    #[must_use]
    pub fn matches(&self, task: &Task, today: NaiveDate) -> bool {
        if !self.search.is_empty()
            && !task
                .title
                .to_lowercase()
                .contains(&self.search.to_lowercase())
        {
            return false;
        }
        if self.priority.is_some_and(|p| p != task.priority) {
            return false;
        }
        self.view.contains(task, today)
    }
}

/// Display order: overdue first, then higher priority, then lower position.
#[must_use]
pub fn compare(a: &Task, b: &Task, today: NaiveDate) -> Ordering {
    b.is_overdue(today)
        .cmp(&a.is_overdue(today))
        .then_with(|| b.priority.cmp(&a.priority))
        .then_with(|| a.position.cmp(&b.position))
}

/// Tasks passing `filter`, in display order. The sort is stable.
#[must_use]
pub fn filter_and_sort<'a>(tasks: &'a [Task], filter: &Filter, today: NaiveDate) -> Vec<&'a Task> {
    let mut visible: Vec<&Task> = tasks.iter().filter(|t| filter.matches(t, today)).collect();
    visible.sort_by(|a, b| compare(a, b, today));
    visible
}

//! Position renumbering after a drag within the visible list.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;

use serde::Deserialize;

use taskflow_proto::task::{Task, TaskId};

/// Which tasks get new positions after a reorder.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReorderScope {
    /// Visible tasks take positions `0..k`; hidden tasks keep theirs, so
    /// positions may collide with hidden ones.
    View,
    /// The reordered view is written back into the slots it occupied in the
    /// full list and the whole list is renumbered `0..n`.
    #[default]
    Global,
}

impl fmt::Display for ReorderScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::View => f.write_str("view"),
            Self::Global => f.write_str("global"),
        }
    }
}

/// Error returned when parsing an unknown scope name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown reorder scope {0:?} (expected view or global)")]
pub struct ParseReorderScopeError(String);

impl FromStr for ReorderScope {
    type Err = ParseReorderScopeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "view" => Ok(Self::View),
            "global" => Ok(Self::Global),
            _ => Err(ParseReorderScopeError(s.to_string())),
        }
    }
}

fn index_position(index: usize) -> i64 {
    i64::try_from(index).unwrap_or(i64::MAX)
}

/// Computes new positions once the visible list has been rearranged into
/// `view_order`.
///
/// With [`ReorderScope::View`] every visible task is returned. With
/// [`ReorderScope::Global`] only tasks whose position actually changes are.
#[must_use]
pub fn renumber(tasks: &[Task], view_order: &[TaskId], scope: ReorderScope) -> Vec<(TaskId, i64)> {
    match scope {
        ReorderScope::View => view_order
            .iter()
            .enumerate()
            .map(|(i, id)| (id.clone(), index_position(i)))
            .collect(),
        ReorderScope::Global => {
            let mut global: Vec<&Task> = tasks.iter().collect();
            global.sort_by_key(|t| t.position);

            let visible: HashSet<&TaskId> = view_order.iter().collect();
            let current: HashMap<&TaskId, i64> =
                tasks.iter().map(|t| (&t.id, t.position)).collect();

            // Visible slots are refilled in the new view order.
            let mut refill = view_order.iter();
            global
                .iter()
                .map(|t| {
                    if visible.contains(&t.id) {
                        refill.next().unwrap_or(&t.id)
                    } else {
                        &t.id
                    }
                })
                .enumerate()
                .filter_map(|(i, id)| {
                    let position = index_position(i);
                    (current.get(id) != Some(&position)).then(|| (id.clone(), position))
                })
                .collect()
        }
    }
}

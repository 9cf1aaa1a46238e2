//! Completion statistics derived from the task list.

use chrono::{Days, NaiveDate};

use taskflow_proto::task::Task;

/// Days covered by [`Analytics::weekly`], ending today.
pub const WEEK_DAYS: u64 = 7;

/// Completions on one calendar day.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DayCount {
    /// The day.
    pub date: NaiveDate,
    /// Short weekday name, e.g. `Mon`.
    pub label: String,
    /// Tasks completed on that day.
    pub completed: usize,
}

/// Snapshot of completion statistics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Analytics {
    /// Tasks whose completion date is today.
    pub completed_today: usize,
    /// Every task.
    pub total: usize,
    /// Completed tasks.
    pub completed: usize,
    /// One entry per day, oldest first, the last being today.
    pub weekly: Vec<DayCount>,
}

impl Analytics {
    /// Computes statistics for `tasks` as of `today`.
    #[must_use]
    pub fn compute(tasks: &[Task], today: NaiveDate) -> Self {
        let completed_on = |date: NaiveDate| {
            tasks
                .iter()
                .filter(|t| t.completed_on() == Some(date))
                .count()
        };

        let weekly = (0..WEEK_DAYS)
            .rev()
            .filter_map(|back| today.checked_sub_days(Days::new(back)))
            .map(|date| DayCount {
                date,
                label: date.format("%a").to_string(),
                completed: completed_on(date),
            })
            .collect();

        Self {
            completed_today: completed_on(today),
            total: tasks.len(),
            completed: tasks.iter().filter(|t| t.completed).count(),
            weekly,
        }
    }

    /// Share of completed tasks, rounded to the nearest whole percent.
    /// Zero when there are no tasks.
    #[must_use]
    pub const fn percentage(&self) -> usize {
        if self.total == 0 {
            return 0;
        }
        (self.completed * 200 + self.total) / (self.total * 2)
    }
}

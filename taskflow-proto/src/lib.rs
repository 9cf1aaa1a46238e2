//! Shared data model and change-feed wire types for `Taskflow`.

pub mod category;
pub mod change;
pub mod task;
pub mod user;

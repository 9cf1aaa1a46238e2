//! `Taskflow`: personal task manager client with optimistic sync.

pub mod analytics;
pub mod backend;
pub mod clock;
pub mod config;
pub mod feed;
pub mod focus;
pub mod session;
pub mod store;
pub mod view;

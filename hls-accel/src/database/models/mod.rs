//! Database models.
//!
//! These map directly onto the `tasks` and `task_item` tables.

pub mod task;

pub use task::*;

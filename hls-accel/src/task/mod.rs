//! Download task lifecycle.
//!
//! A task is created once per source variant playlist. Its segment, key and
//! init-section files are dispatched to the fetch engine and land in the cache
//! store; progress is derived by intersecting task item rows with what is
//! actually complete on disk.

mod manager;

pub use manager::{
    CreationDecision, DispatchSummary, StartOutcome, TaskManager, TaskPlan, TaskProgress,
    TriggerOrigin, creation_decision,
};

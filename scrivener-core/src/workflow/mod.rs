//! Workflow intelligence
//!
//! Derives research progress, milestones and next-step recommendations from
//! the event log. The submodules `progress`, `milestones`, `patterns` and
//! `recommend` are pure functions; [`WorkflowEngine`] wires them to a
//! [`ProjectStore`](crate::db::ProjectStore).

pub mod engine;
pub mod milestones;
pub mod patterns;
pub mod progress;
pub mod recommend;

pub use engine::{RecomputeReport, WorkflowEngine};
pub use patterns::{classify, PatternAnalysis};
pub use progress::completion_percentage;
pub use recommend::recommend;

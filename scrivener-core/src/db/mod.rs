//! Storage layer for scrivener
//!
//! One SQLite store per project root, holding:
//! - Canonical records (project, sessions, the append-only event log)
//! - Derived records (progress, milestones, recommendations) that can be
//!   regenerated from the event log

pub mod events;
pub mod repo;
pub mod schema;
pub mod workflow;

pub use events::{args_digest, HistoryFilter, CATEGORY_RESET_TOOL};
pub use repo::{is_project_root, project_id_for, store_path, ProjectStore, MARKER_DIR, STORE_FILE};

//! # scrivener-core
//!
//! Core library for scrivener - project context resolution and research
//! workflow telemetry for tool-serving research assistants.
//!
//! This library provides:
//! - Active-project resolution with a persistent, atomically replaced pointer
//! - A per-project SQLite store for invocations, sessions and derived state
//! - The invocation interceptor that logs every tool call
//! - Workflow intelligence: progress, milestones and recommendations
//! - Configuration management and logging infrastructure
//!
//! ## Architecture
//!
//! Data flows through two layers:
//! - **Event log:** append-only `tool_invocations`, ordered by a per-project sequence
//! - **Derived:** progress, milestones and recommendations, recomputable from the log
//!
//! ## Example
//!
//! ```rust,no_run
//! use scrivener_core::{tools, Config, Interceptor, ToolRegistry};
//! use serde_json::json;
//!
//! let interceptor = Interceptor::from_config(Config::load().expect("failed to load config"))
//!     .expect("failed to load taxonomy");
//! let mut registry = ToolRegistry::new(interceptor);
//! tools::register_builtin_tools(&mut registry);
//!
//! let outcome = registry
//!     .dispatch("research_status", &json!({}), None)
//!     .expect("no active project");
//! println!("{:?}", outcome.result);
//! ```

// Re-export commonly used items at the crate root
pub use config::Config;
pub use context::{init_project, ContextResolver, ContextSource, ProjectRef};
pub use db::{HistoryFilter, ProjectStore};
pub use error::{Error, Result};
pub use interceptor::{Interceptor, Tool, ToolContext, ToolError, ToolOutcome, ToolRegistry, ToolResult};
pub use sessions::SessionManager;
pub use taxonomy::Taxonomy;
pub use types::*;
pub use workflow::{RecomputeReport, WorkflowEngine};

// Public modules
pub mod config;
pub mod context;
pub mod db;
pub mod error;
pub mod interceptor;
pub mod logging;
pub mod sessions;
pub mod taxonomy;
pub mod tools;
pub mod types;
pub mod workflow;

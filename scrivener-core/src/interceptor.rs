//! Invocation interceptor
//!
//! Every tool call goes through [`Interceptor::run`]:
//!
//! ```text
//! resolve context ─► start timer ─► tool.call() ─► record event ─► recompute
//!        │                               │               │              │
//!   NoActiveProject               result is final   warn + skip   warn + mark stale
//!   (only failure                 from here on
//!    surfaced)
//! ```
//!
//! Telemetry is best-effort. Once the tool has produced its result, nothing
//! that happens in logging or recompute can change it.

use crate::config::Config;
use crate::context::{ContextResolver, ProjectRef};
use crate::db::{args_digest, ProjectStore};
use crate::error::{Error, Result};
use crate::sessions::SessionManager;
use crate::taxonomy::Taxonomy;
use crate::types::{EventId, NewInvocation, ToolInvocationEvent};
use crate::workflow::WorkflowEngine;
use serde_json::Value;
use std::path::Path;
use std::time::{Duration, Instant};

/// Marker appended to truncated result summaries
pub const TRUNCATION_MARKER: &str = "…";

/// Failure reported by a tool body
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{message}")]
pub struct ToolError {
    pub message: String,
}

impl ToolError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<Error> for ToolError {
    fn from(e: Error) -> Self {
        Self::new(e.to_string())
    }
}

/// What a tool returns: an opaque JSON payload or an error
pub type ToolResult = std::result::Result<Value, ToolError>;

/// Everything a tool body can see
pub struct ToolContext<'a> {
    /// Resolved project; `None` only for context-free tools
    pub project: Option<&'a ProjectRef>,
    pub session_id: Option<&'a str>,
    pub config: &'a Config,
    pub taxonomy: &'a Taxonomy,
    pub resolver: &'a ContextResolver,
}

impl ToolContext<'_> {
    /// The resolved project, or an error for tools that ran without one
    pub fn require_project(&self) -> std::result::Result<&ProjectRef, ToolError> {
        self.project
            .ok_or_else(|| ToolError::new("this tool needs an active project"))
    }
}

/// A host-invocable tool.
///
/// Tools are treated as black boxes: the interceptor never inspects their
/// arguments or results beyond digesting and summarizing them.
pub trait Tool: Send + Sync {
    /// Unique tool name, also the key into the taxonomy
    fn name(&self) -> &str;

    /// Whether the call fails with `NoActiveProject` when nothing resolves
    fn requires_context(&self) -> bool {
        true
    }

    fn call(&self, ctx: &ToolContext<'_>, args: &Value) -> ToolResult;
}

/// Result of an intercepted call
#[derive(Debug, Clone)]
pub struct ToolOutcome {
    /// Exactly what the tool returned
    pub result: ToolResult,
    /// Logged event, when telemetry succeeded
    pub event_id: Option<EventId>,
    pub elapsed_ms: u64,
    pub project: Option<ProjectRef>,
}

/// Truncate `text` to at most `max_chars` characters, marking the cut.
pub fn summarize(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}{}", &text[..cut], TRUNCATION_MARKER),
        None => text.to_string(),
    }
}

fn summarize_value(value: &Value, max_chars: usize) -> String {
    match value {
        Value::String(s) => summarize(s, max_chars),
        other => summarize(&other.to_string(), max_chars),
    }
}

/// Wraps tools with context resolution, telemetry and recompute
pub struct Interceptor {
    config: Config,
    taxonomy: Taxonomy,
    resolver: ContextResolver,
}

impl Interceptor {
    pub fn new(config: Config, taxonomy: Taxonomy, resolver: ContextResolver) -> Self {
        Self {
            config,
            taxonomy,
            resolver,
        }
    }

    /// Interceptor using the configured taxonomy and context locations
    pub fn from_config(config: Config) -> Result<Self> {
        let taxonomy = Taxonomy::load(&config.taxonomy)?;
        let resolver = ContextResolver::new(&config.context);
        Ok(Self::new(config, taxonomy, resolver))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn taxonomy(&self) -> &Taxonomy {
        &self.taxonomy
    }

    pub fn resolver(&self) -> &ContextResolver {
        &self.resolver
    }

    /// Wrap a tool so every call through the wrapper is intercepted
    pub fn intercept<T: Tool>(&self, tool: T) -> Intercepted<'_, T> {
        Intercepted {
            interceptor: self,
            tool,
        }
    }

    /// Run one tool call through the full pipeline.
    ///
    /// Fails only when the tool requires a project and none resolves.
    pub fn run(
        &self,
        tool: &dyn Tool,
        args: &Value,
        session_id: Option<&str>,
        explicit_root: Option<&Path>,
    ) -> Result<ToolOutcome> {
        let project = if tool.requires_context() {
            Some(self.resolver.require(explicit_root)?)
        } else {
            self.resolver.resolve(explicit_root)
        };

        let ctx = ToolContext {
            project: project.as_ref(),
            session_id,
            config: &self.config,
            taxonomy: &self.taxonomy,
            resolver: &self.resolver,
        };

        let start = Instant::now();
        let result = tool.call(&ctx, args);
        let elapsed_ms = start.elapsed().as_millis() as u64;

        let event_id = project.as_ref().and_then(|project| {
            match self.record(project, tool.name(), args, &result, elapsed_ms, session_id) {
                Ok(id) => Some(id),
                Err(e) => {
                    tracing::warn!(
                        tool = tool.name(),
                        project = %project.id,
                        error = %e,
                        "Failed to record tool invocation"
                    );
                    None
                }
            }
        });

        tracing::debug!(
            tool = tool.name(),
            success = result.is_ok(),
            elapsed_ms,
            "Tool invocation finished"
        );

        Ok(ToolOutcome {
            result,
            event_id,
            elapsed_ms,
            project,
        })
    }

    /// Log the event, then recompute. Only a failed log is returned; a failed
    /// recompute is handled here by marking the category stale.
    fn record(
        &self,
        project: &ProjectRef,
        tool_name: &str,
        args: &Value,
        result: &ToolResult,
        elapsed_ms: u64,
        session_id: Option<&str>,
    ) -> Result<EventId> {
        let store = ProjectStore::open(&project.root)
            .map_err(|e| Error::TelemetryWriteFailure(e.to_string()))?;
        store
            .ensure_project(&project.root, Some(&project.name), None)
            .map_err(|e| Error::TelemetryWriteFailure(e.to_string()))?;

        if let Some(session_id) = session_id {
            let sessions = SessionManager::new(&store, &project.id, &self.config.sessions);
            if let Err(e) = sessions.touch(session_id) {
                tracing::debug!(session_id, error = %e, "Could not touch session");
            }
        }

        let max_chars = self.config.workflow.summary_max_chars;
        let invocation = NewInvocation {
            tool_name: tool_name.to_string(),
            session_id: session_id.map(str::to_string),
            args_digest: args_digest(args),
            result_summary: result.as_ref().ok().map(|v| summarize_value(v, max_chars)),
            elapsed_ms: elapsed_ms as i64,
            success: result.is_ok(),
            error: result.as_ref().err().map(|e| summarize(&e.message, max_chars)),
        };
        let event = store.record_invocation(&self.taxonomy, &invocation)?;

        self.recompute(&store, project, &event);
        Ok(event.id)
    }

    fn recompute(&self, store: &ProjectStore, project: &ProjectRef, event: &ToolInvocationEvent) {
        let engine = WorkflowEngine::new(&self.taxonomy, &self.config.workflow);
        let Err(e) = engine.recompute(store, &project.id, event) else {
            return;
        };

        tracing::warn!(
            project = %project.id,
            act = %event.research_act,
            category = %event.research_category,
            error = %e,
            "Recompute skipped, marking category stale"
        );
        // A missed mark is recovered too: the progress row lags the event log
        let wait = Duration::from_millis(self.config.workflow.recompute_timeout_ms);
        if let Err(e) =
            store.mark_stale(&project.id, &event.research_act, &event.research_category, wait)
        {
            tracing::warn!(project = %project.id, error = %e, "Failed to mark progress stale");
        }
    }
}

/// A tool bound to an interceptor
pub struct Intercepted<'a, T: Tool> {
    interceptor: &'a Interceptor,
    tool: T,
}

impl<T: Tool> Intercepted<'_, T> {
    pub fn invoke(
        &self,
        args: &Value,
        session_id: Option<&str>,
        explicit_root: Option<&Path>,
    ) -> Result<ToolOutcome> {
        self.interceptor
            .run(&self.tool, args, session_id, explicit_root)
    }

    pub fn tool(&self) -> &T {
        &self.tool
    }
}

/// Tools addressable by name, all dispatched through one interceptor
pub struct ToolRegistry {
    interceptor: Interceptor,
    tools: Vec<Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new(interceptor: Interceptor) -> Self {
        Self {
            interceptor,
            tools: Vec::new(),
        }
    }

    pub fn register(&mut self, tool: Box<dyn Tool>) {
        tracing::debug!(tool = tool.name(), "Registered tool");
        self.tools.retain(|t| t.name() != tool.name());
        self.tools.push(tool);
    }

    pub fn tool_names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name()).collect()
    }

    pub fn interceptor(&self) -> &Interceptor {
        &self.interceptor
    }

    /// Invoke a tool by name against the active project
    pub fn dispatch(&self, tool_name: &str, args: &Value, session_id: Option<&str>) -> Result<ToolOutcome> {
        self.dispatch_in(tool_name, args, session_id, None)
    }

    /// Invoke a tool by name with an explicit project override
    pub fn dispatch_in(
        &self,
        tool_name: &str,
        args: &Value,
        session_id: Option<&str>,
        explicit_root: Option<&Path>,
    ) -> Result<ToolOutcome> {
        let tool = self
            .tools
            .iter()
            .find(|t| t.name() == tool_name)
            .ok_or_else(|| Error::ToolNotFound(tool_name.to_string()))?;
        self.interceptor
            .run(tool.as_ref(), args, session_id, explicit_root)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::init_project;
    use crate::db::HistoryFilter;
    use serde_json::json;
    use tempfile::TempDir;

    struct Echo;

    impl Tool for Echo {
        fn name(&self) -> &str {
            "literature_search"
        }

        fn call(&self, _ctx: &ToolContext<'_>, args: &Value) -> ToolResult {
            Ok(json!({ "echo": args }))
        }
    }

    struct Failing;

    impl Tool for Failing {
        fn name(&self) -> &str {
            "draft_section"
        }

        fn call(&self, _ctx: &ToolContext<'_>, _args: &Value) -> ToolResult {
            Err(ToolError::new("compiler not found"))
        }
    }

    struct Anywhere;

    impl Tool for Anywhere {
        fn name(&self) -> &str {
            "anywhere"
        }

        fn requires_context(&self) -> bool {
            false
        }

        fn call(&self, ctx: &ToolContext<'_>, _args: &Value) -> ToolResult {
            Ok(json!({ "has_project": ctx.project.is_some() }))
        }
    }

    fn interceptor(dir: &TempDir) -> Interceptor {
        Interceptor::new(
            Config::default(),
            Taxonomy::builtin().unwrap(),
            ContextResolver::with_parts(
                dir.path().join("active_project.json"),
                None,
                dir.path().join("default-project"),
            ),
        )
    }

    fn project_root(dir: &TempDir) -> std::path::PathBuf {
        let root = dir.path().join("thesis");
        std::fs::create_dir_all(&root).unwrap();
        init_project(&root, None, None).unwrap();
        root
    }

    #[test]
    fn test_summarize() {
        assert_eq!(summarize("short", 10), "short");
        assert_eq!(summarize("abcdef", 3), "abc…");
        // Never splits a multi-byte character
        assert_eq!(summarize("ééééé", 2), "éé…");
    }

    #[test]
    fn test_requires_context() {
        let dir = TempDir::new().unwrap();
        let interceptor = interceptor(&dir);
        let err = interceptor
            .intercept(Echo)
            .invoke(&json!({}), None, None)
            .unwrap_err();
        assert!(matches!(err, Error::NoActiveProject { .. }));
    }

    #[test]
    fn test_context_free_tool_runs_without_project() {
        let dir = TempDir::new().unwrap();
        let interceptor = interceptor(&dir);
        let outcome = interceptor
            .intercept(Anywhere)
            .invoke(&json!({}), None, None)
            .unwrap();
        assert_eq!(outcome.result, Ok(json!({ "has_project": false })));
        assert!(outcome.event_id.is_none());
        assert!(outcome.project.is_none());
    }

    #[test]
    fn test_success_is_logged() {
        let dir = TempDir::new().unwrap();
        let root = project_root(&dir);
        let interceptor = interceptor(&dir);

        let outcome = interceptor
            .intercept(Echo)
            .invoke(&json!({"query": "bert"}), None, Some(root.as_path()))
            .unwrap();
        assert_eq!(outcome.result, Ok(json!({ "echo": {"query": "bert"} })));
        assert!(outcome.event_id.is_some());

        let store = ProjectStore::open(&root).unwrap();
        let events = store
            .get_tool_history(None, &HistoryFilter::default())
            .unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].tool_name, "literature_search");
        assert_eq!(events[0].args_digest, args_digest(&json!({"query": "bert"})));
        assert!(events[0].success);
        assert!(!store
            .list_progress(&outcome.project.unwrap().id)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_failure_is_logged_and_returned() {
        let dir = TempDir::new().unwrap();
        let root = project_root(&dir);
        let interceptor = interceptor(&dir);

        let outcome = interceptor
            .intercept(Failing)
            .invoke(&json!({}), None, Some(root.as_path()))
            .unwrap();
        assert_eq!(outcome.result, Err(ToolError::new("compiler not found")));

        let store = ProjectStore::open(&root).unwrap();
        let events = store
            .get_tool_history(None, &HistoryFilter::default())
            .unwrap();
        assert!(!events[0].success);
        assert_eq!(events[0].error_message.as_deref(), Some("compiler not found"));
    }

    #[test]
    fn test_registry_dispatch() {
        let dir = TempDir::new().unwrap();
        let root = project_root(&dir);
        let mut registry = ToolRegistry::new(interceptor(&dir));
        registry.register(Box::new(Echo));

        assert!(matches!(
            registry.dispatch_in("missing", &json!({}), None, Some(root.as_path())),
            Err(Error::ToolNotFound(_))
        ));
        let outcome = registry
            .dispatch_in("literature_search", &json!({}), None, Some(root.as_path()))
            .unwrap();
        assert!(outcome.result.is_ok());
        assert_eq!(registry.tool_names(), vec!["literature_search"]);
    }
}

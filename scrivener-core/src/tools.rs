//! Built-in research tracking tools
//!
//! These expose the query, session and context APIs to the host as ordinary
//! tools, so they are dispatched (and logged) through the interceptor like
//! any other tool.

use crate::context::ProjectRef;
use crate::db::{HistoryFilter, ProjectStore};
use crate::interceptor::{Tool, ToolContext, ToolError, ToolRegistry, ToolResult};
use crate::sessions::SessionManager;
use crate::types::SessionStatus;
use crate::workflow::WorkflowEngine;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::path::PathBuf;

/// Names of every built-in tool
pub const BUILTIN_TOOLS: &[&str] = &[
    "research_status",
    "workflow_recommendations",
    "research_milestones",
    "tool_history",
    "start_research_session",
    "end_research_session",
    "switch_project",
    "reset_category",
];

/// Register every built-in tool
pub fn register_builtin_tools(registry: &mut ToolRegistry) {
    registry.register(Box::new(ResearchStatus));
    registry.register(Box::new(WorkflowRecommendations));
    registry.register(Box::new(ResearchMilestones));
    registry.register(Box::new(ToolHistory));
    registry.register(Box::new(StartResearchSession));
    registry.register(Box::new(EndResearchSession));
    registry.register(Box::new(SwitchProject));
    registry.register(Box::new(ResetCategory));
}

fn parse<T: DeserializeOwned>(args: &Value) -> Result<T, ToolError> {
    let args = if args.is_null() { json!({}) } else { args.clone() };
    serde_json::from_value(args).map_err(|e| ToolError::new(format!("invalid arguments: {}", e)))
}

fn to_json<T: Serialize>(value: &T) -> ToolResult {
    serde_json::to_value(value).map_err(|e| ToolError::new(e.to_string()))
}

fn open_store<'c>(ctx: &'c ToolContext<'_>) -> Result<(ProjectStore, &'c ProjectRef), ToolError> {
    let project = ctx.require_project()?;
    let store = project.open_store()?;
    store.ensure_project(&project.root, Some(&project.name), None)?;
    Ok((store, project))
}

fn engine<'c>(ctx: &'c ToolContext<'_>) -> WorkflowEngine<'c> {
    WorkflowEngine::new(ctx.taxonomy, &ctx.config.workflow)
}

fn sessions<'s>(ctx: &ToolContext<'_>, store: &'s ProjectStore, project: &ProjectRef) -> SessionManager<'s> {
    SessionManager::new(store, &project.id, &ctx.config.sessions)
}

/// `research_status`: project, active session and progress by act
pub struct ResearchStatus;

impl Tool for ResearchStatus {
    fn name(&self) -> &str {
        "research_status"
    }

    fn call(&self, ctx: &ToolContext<'_>, _args: &Value) -> ToolResult {
        let (store, project) = open_store(ctx)?;
        let progress = engine(ctx).get_progress(&store, &project.id)?;
        let active_session = sessions(ctx, &store, project).active_session()?;

        Ok(json!({
            "project": to_json(project)?,
            "active_session": to_json(&active_session)?,
            "progress": to_json(&progress)?,
        }))
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RecommendationArgs {
    session_id: Option<String>,
    include_history: bool,
    accept: Option<i64>,
    dismiss: Option<i64>,
}

/// `workflow_recommendations`: list, accept or dismiss recommendations
pub struct WorkflowRecommendations;

impl Tool for WorkflowRecommendations {
    fn name(&self) -> &str {
        "workflow_recommendations"
    }

    fn call(&self, ctx: &ToolContext<'_>, args: &Value) -> ToolResult {
        let args: RecommendationArgs = parse(args)?;
        let (store, project) = open_store(ctx)?;
        let engine = engine(ctx);

        if let Some(id) = args.accept {
            let changed = engine.accept_recommendation(&store, id)?;
            return Ok(json!({ "id": id, "accepted": changed }));
        }
        if let Some(id) = args.dismiss {
            let changed = engine.dismiss_recommendation(&store, id)?;
            return Ok(json!({ "id": id, "dismissed": changed }));
        }

        let session_id = args.session_id.as_deref().or(ctx.session_id);
        let recommendations =
            engine.get_recommendations(&store, &project.id, session_id, !args.include_history)?;
        to_json(&recommendations)
    }
}

/// `research_milestones`: milestones in the order achieved
pub struct ResearchMilestones;

impl Tool for ResearchMilestones {
    fn name(&self) -> &str {
        "research_milestones"
    }

    fn call(&self, ctx: &ToolContext<'_>, _args: &Value) -> ToolResult {
        let (store, project) = open_store(ctx)?;
        let milestones = engine(ctx).get_milestones(&store, &project.id)?;
        to_json(&milestones)
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct HistoryArgs {
    session_id: Option<String>,
    tool_name: Option<String>,
    act: Option<String>,
    category: Option<String>,
    success: Option<bool>,
    since: Option<DateTime<Utc>>,
    limit: Option<usize>,
    include_resets: bool,
}

/// `tool_history`: logged events, oldest first
pub struct ToolHistory;

impl Tool for ToolHistory {
    fn name(&self) -> &str {
        "tool_history"
    }

    fn call(&self, ctx: &ToolContext<'_>, args: &Value) -> ToolResult {
        let args: HistoryArgs = parse(args)?;
        let (store, _) = open_store(ctx)?;
        let filter = HistoryFilter {
            tool_name: args.tool_name,
            research_act: args.act,
            research_category: args.category,
            success: args.success,
            since: args.since,
            limit: args.limit,
            include_resets: args.include_resets,
        };
        let events = store.get_tool_history(args.session_id.as_deref(), &filter)?;
        to_json(&events)
    }
}

#[derive(Debug, Deserialize)]
struct StartSessionArgs {
    research_focus: String,
    #[serde(default)]
    goals: Vec<String>,
}

/// `start_research_session`: open a new session, closing the current one
pub struct StartResearchSession;

impl Tool for StartResearchSession {
    fn name(&self) -> &str {
        "start_research_session"
    }

    fn call(&self, ctx: &ToolContext<'_>, args: &Value) -> ToolResult {
        let args: StartSessionArgs = parse(args)?;
        let (store, project) = open_store(ctx)?;
        let (session, closed) =
            sessions(ctx, &store, project).start_session(&args.research_focus, &args.goals)?;
        Ok(json!({
            "session": to_json(&session)?,
            "closed": to_json(&closed)?,
        }))
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct EndSessionArgs {
    session_id: Option<String>,
    status: Option<SessionStatus>,
}

/// `end_research_session`: close a session (the active one by default)
pub struct EndResearchSession;

impl Tool for EndResearchSession {
    fn name(&self) -> &str {
        "end_research_session"
    }

    fn call(&self, ctx: &ToolContext<'_>, args: &Value) -> ToolResult {
        let args: EndSessionArgs = parse(args)?;
        let (store, project) = open_store(ctx)?;
        let sessions = sessions(ctx, &store, project);

        let session_id = match args.session_id.or_else(|| ctx.session_id.map(str::to_string)) {
            Some(id) => id,
            None => sessions
                .active_session()?
                .map(|s| s.id)
                .ok_or_else(|| ToolError::new("no active session to end"))?,
        };
        let status = args.status.unwrap_or(SessionStatus::Completed);
        let session = sessions.end_session(&session_id, status)?;
        to_json(&session)
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SwitchArgs {
    path: Option<PathBuf>,
    reset: bool,
}

/// `switch_project`: point the context at another project root
pub struct SwitchProject;

impl Tool for SwitchProject {
    fn name(&self) -> &str {
        "switch_project"
    }

    fn requires_context(&self) -> bool {
        false
    }

    fn call(&self, ctx: &ToolContext<'_>, args: &Value) -> ToolResult {
        let args: SwitchArgs = parse(args)?;
        let project = match (args.path, args.reset) {
            (_, true) => ctx.resolver.reset_context()?,
            (Some(path), false) => ctx.resolver.switch_context(&path)?,
            (None, false) => return Err(ToolError::new("either `path` or `reset` is required")),
        };
        to_json(&project)
    }
}

#[derive(Debug, Deserialize)]
struct ResetCategoryArgs {
    act: String,
    category: String,
    #[serde(default)]
    reason: String,
}

/// `reset_category`: start one category's progress over
pub struct ResetCategory;

impl Tool for ResetCategory {
    fn name(&self) -> &str {
        "reset_category"
    }

    fn call(&self, ctx: &ToolContext<'_>, args: &Value) -> ToolResult {
        let args: ResetCategoryArgs = parse(args)?;
        let (store, project) = open_store(ctx)?;
        let progress = engine(ctx).reset_category(
            &store,
            &project.id,
            &args.act,
            &args.category,
            ctx.session_id,
            &args.reason,
        )?;
        to_json(&progress)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::context::{init_project, ContextResolver};
    use crate::interceptor::Interceptor;
    use crate::taxonomy::Taxonomy;
    use std::path::Path;
    use tempfile::TempDir;

    fn registry(dir: &Path) -> ToolRegistry {
        let interceptor = Interceptor::new(
            Config::default(),
            Taxonomy::builtin().unwrap(),
            ContextResolver::with_parts(
                dir.join("active_project.json"),
                None,
                dir.join("default-project"),
            ),
        );
        let mut registry = ToolRegistry::new(interceptor);
        register_builtin_tools(&mut registry);
        registry
    }

    #[test]
    fn test_all_builtins_registered() {
        let dir = TempDir::new().unwrap();
        let registry = registry(dir.path());
        let mut names = registry.tool_names();
        names.sort();
        let mut expected = BUILTIN_TOOLS.to_vec();
        expected.sort();
        assert_eq!(names, expected);
    }

    #[test]
    fn test_switch_then_status() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("thesis");
        std::fs::create_dir_all(&root).unwrap();
        let registry = registry(dir.path());

        let switched = registry
            .dispatch("switch_project", &json!({ "path": root }), None)
            .unwrap();
        assert!(switched.result.is_ok());

        let status = registry
            .dispatch("research_status", &Value::Null, None)
            .unwrap()
            .result
            .unwrap();
        assert_eq!(status["project"]["name"], "thesis");
        assert_eq!(status["progress"]["acts"].as_array().unwrap().len(), 6);
        assert!(status["active_session"].is_null());
    }

    #[test]
    fn test_session_round() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("thesis");
        std::fs::create_dir_all(&root).unwrap();
        init_project(&root, None, None).unwrap();
        let registry = registry(dir.path());

        let started = registry
            .dispatch_in(
                "start_research_session",
                &json!({ "research_focus": "transformers", "goals": ["survey"] }),
                None,
                Some(root.as_path()),
            )
            .unwrap()
            .result
            .unwrap();
        assert_eq!(started["session"]["status"], "active");
        assert!(started["closed"].is_null());

        let ended = registry
            .dispatch_in("end_research_session", &json!({}), None, Some(root.as_path()))
            .unwrap()
            .result
            .unwrap();
        assert_eq!(ended["status"], "completed");
        assert_eq!(ended["id"], started["session"]["id"]);
    }

    #[test]
    fn test_bad_arguments_are_tool_errors() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("thesis");
        std::fs::create_dir_all(&root).unwrap();
        init_project(&root, None, None).unwrap();
        let registry = registry(dir.path());

        let outcome = registry
            .dispatch_in("reset_category", &json!({ "act": 3 }), None, Some(root.as_path()))
            .unwrap();
        assert!(outcome.result.unwrap_err().message.contains("invalid arguments"));
        // The failed call is still logged
        assert!(outcome.event_id.is_some());
    }
}

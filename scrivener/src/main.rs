//! scrivener - research project context and workflow telemetry
//!
//! Command-line front end to scrivener-core: pick the active project, run
//! tools through the interceptor, and query progress, milestones and
//! recommendations.
//!
//! Uses XDG Base Directory specification for file locations:
//! - Context pointer: $XDG_DATA_HOME/scrivener/active_project.json
//! - Default project: $XDG_DATA_HOME/scrivener/default-project/
//! - Logs: $XDG_STATE_HOME/scrivener/scrivener.log
//! - Config: $XDG_CONFIG_HOME/scrivener/config.toml

mod output;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use scrivener_core::sessions::SessionManager;
use scrivener_core::tools::register_builtin_tools;
use scrivener_core::{
    init_project, Config, HistoryFilter, Interceptor, ProjectRef, ProjectStore, SessionStatus,
    Tool, ToolContext, ToolError, ToolRegistry, ToolResult, WorkflowEngine,
};
use serde_json::Value;
use std::path::{Path, PathBuf};

use crate::output::Printer;

#[derive(Parser)]
#[command(name = "scrivener")]
#[command(about = "Research project context and workflow telemetry")]
#[command(version)]
struct Cli {
    /// Operate on this project root instead of the active one
    #[arg(long, global = true)]
    project: Option<PathBuf>,

    /// Print machine-readable JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show the active project and its overall progress
    Status,
    /// Initialize a directory as a research project
    Init {
        path: PathBuf,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        domain: Option<String>,
        /// Also make it the active project
        #[arg(long)]
        switch: bool,
    },
    /// Make another project root the active one
    Switch { path: PathBuf },
    /// Switch back to the default project
    Reset,
    /// Progress per act and category
    Progress,
    /// Milestones achieved so far
    Milestones,
    /// Workflow recommendations
    Recommendations(RecommendationArgs),
    /// Logged tool invocations, oldest first
    History(HistoryArgs),
    /// Research sessions
    #[command(subcommand)]
    Session(SessionCommand),
    /// Record a tool call that ran outside scrivener
    Log(LogArgs),
    /// Run a built-in tool through the interceptor
    Invoke {
        tool: String,
        /// Tool arguments as a JSON object
        #[arg(long, default_value = "{}")]
        args: String,
        #[arg(long)]
        session: Option<String>,
    },
    /// Print the tool taxonomy
    Taxonomy,
}

#[derive(Args)]
struct RecommendationArgs {
    /// Only recommendations for this session
    #[arg(long)]
    session: Option<String>,
    /// Include accepted and dismissed recommendations
    #[arg(long)]
    all: bool,
    #[arg(long, conflicts_with = "dismiss")]
    accept: Option<i64>,
    #[arg(long)]
    dismiss: Option<i64>,
}

#[derive(Args)]
struct HistoryArgs {
    #[arg(long)]
    session: Option<String>,
    #[arg(long)]
    tool: Option<String>,
    #[arg(long)]
    act: Option<String>,
    #[arg(long)]
    category: Option<String>,
    /// Only failed invocations
    #[arg(long)]
    failed: bool,
    #[arg(short, long)]
    limit: Option<usize>,
    /// Include category reset records
    #[arg(long)]
    resets: bool,
}

#[derive(Subcommand)]
enum SessionCommand {
    /// Start a session, closing the current one
    Start {
        focus: String,
        #[arg(long = "goal")]
        goals: Vec<String>,
    },
    /// End a session (the active one by default)
    End {
        id: Option<String>,
        #[arg(long)]
        abandon: bool,
    },
    /// Show one session (the active one by default)
    Show { id: Option<String> },
    /// List sessions, newest first
    List {
        #[arg(short, long)]
        limit: Option<usize>,
    },
}

#[derive(Args)]
struct LogArgs {
    tool: String,
    /// Tool arguments as a JSON object
    #[arg(long, default_value = "{}")]
    args: String,
    /// Result payload (JSON, or plain text)
    #[arg(long)]
    result: Option<String>,
    /// Record the call as failed with this message
    #[arg(long, conflicts_with = "result")]
    error: Option<String>,
    #[arg(long)]
    session: Option<String>,
}

/// A tool whose outcome is already known; used to log external calls
struct Replay {
    name: String,
    outcome: ToolResult,
}

impl Tool for Replay {
    fn name(&self) -> &str {
        &self.name
    }

    fn call(&self, _ctx: &ToolContext<'_>, _args: &Value) -> ToolResult {
        self.outcome.clone()
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = Config::load().context("failed to load configuration")?;

    // Initialize logging
    let _log_guard =
        scrivener_core::logging::init(&config.logging).context("failed to initialize logging")?;

    tracing::debug!("scrivener starting");

    let interceptor = Interceptor::from_config(config).context("failed to load taxonomy")?;
    let printer = Printer::new(cli.json);
    let explicit = cli.project.as_deref();

    match cli.command {
        Command::Status => status(&interceptor, explicit, &printer),
        Command::Init {
            path,
            name,
            domain,
            switch,
        } => {
            let project = init_project(&path, name.as_deref(), domain.as_deref())
                .with_context(|| format!("failed to initialize {}", path.display()))?;
            if switch {
                interceptor.resolver().switch_context(&project.root_path)?;
            }
            printer.project(&project)
        }
        Command::Switch { path } => {
            let project = interceptor
                .resolver()
                .switch_context(&path)
                .with_context(|| format!("failed to switch to {}", path.display()))?;
            printer.project_ref(&project)
        }
        Command::Reset => {
            let project = interceptor
                .resolver()
                .reset_context()
                .context("failed to reset to the default project")?;
            printer.project_ref(&project)
        }
        Command::Progress => {
            let (store, project) = open_project(&interceptor, explicit)?;
            let report = engine(&interceptor).get_progress(&store, &project.id)?;
            printer.progress(&report)
        }
        Command::Milestones => {
            let (store, project) = open_project(&interceptor, explicit)?;
            let milestones = engine(&interceptor).get_milestones(&store, &project.id)?;
            printer.milestones(&milestones)
        }
        Command::Recommendations(args) => recommendations(&interceptor, explicit, args, &printer),
        Command::History(args) => {
            let (store, _) = open_project(&interceptor, explicit)?;
            let filter = HistoryFilter {
                tool_name: args.tool,
                research_act: args.act,
                research_category: args.category,
                success: args.failed.then_some(false),
                since: None,
                limit: args.limit,
                include_resets: args.resets,
            };
            let events = store.get_tool_history(args.session.as_deref(), &filter)?;
            printer.history(&events)
        }
        Command::Session(command) => session(&interceptor, explicit, command, &printer),
        Command::Log(args) => log(&interceptor, explicit, args, &printer),
        Command::Invoke {
            tool,
            args,
            session,
        } => {
            let args = parse_json_arg(&args)?;
            let mut registry = ToolRegistry::new(interceptor);
            register_builtin_tools(&mut registry);
            let outcome = registry.dispatch_in(&tool, &args, session.as_deref(), explicit)?;
            match outcome.result {
                Ok(value) => printer.value(&value),
                Err(e) => anyhow::bail!("{} failed: {}", tool, e),
            }
        }
        Command::Taxonomy => printer.taxonomy(interceptor.taxonomy()),
    }
}

fn engine(interceptor: &Interceptor) -> WorkflowEngine<'_> {
    WorkflowEngine::new(interceptor.taxonomy(), &interceptor.config().workflow)
}

/// Resolve the project and open its store
fn open_project(interceptor: &Interceptor, explicit: Option<&Path>) -> Result<(ProjectStore, ProjectRef)> {
    let project = interceptor.resolver().require(explicit)?;
    let store = project
        .open_store()
        .with_context(|| format!("failed to open project store in {}", project.root.display()))?;
    store.ensure_project(&project.root, Some(&project.name), None)?;
    Ok((store, project))
}

fn parse_json_arg(raw: &str) -> Result<Value> {
    serde_json::from_str(raw).with_context(|| format!("invalid JSON: {}", raw))
}

fn status(interceptor: &Interceptor, explicit: Option<&Path>, printer: &Printer) -> Result<()> {
    let (store, project) = open_project(interceptor, explicit)?;
    let sessions = SessionManager::new(&store, &project.id, &interceptor.config().sessions);
    let active = sessions.active_session()?;
    let report = engine(interceptor).get_progress(&store, &project.id)?;
    let events = store.count_invocations()?;

    printer.status(&project, active.as_ref(), &report, events)
}

fn recommendations(
    interceptor: &Interceptor,
    explicit: Option<&Path>,
    args: RecommendationArgs,
    printer: &Printer,
) -> Result<()> {
    let (store, project) = open_project(interceptor, explicit)?;
    let engine = engine(interceptor);

    if let Some(id) = args.accept {
        if !engine.accept_recommendation(&store, id)? {
            anyhow::bail!("recommendation {} is not pending", id);
        }
        return printer.message(&format!("Accepted recommendation {}", id));
    }
    if let Some(id) = args.dismiss {
        if !engine.dismiss_recommendation(&store, id)? {
            anyhow::bail!("recommendation {} is not pending", id);
        }
        return printer.message(&format!("Dismissed recommendation {}", id));
    }

    let recommendations =
        engine.get_recommendations(&store, &project.id, args.session.as_deref(), !args.all)?;
    printer.recommendations(&recommendations)
}

fn session(
    interceptor: &Interceptor,
    explicit: Option<&Path>,
    command: SessionCommand,
    printer: &Printer,
) -> Result<()> {
    let (store, project) = open_project(interceptor, explicit)?;
    let sessions = SessionManager::new(&store, &project.id, &interceptor.config().sessions);

    match command {
        SessionCommand::Start { focus, goals } => {
            let (session, closed) = sessions.start_session(&focus, &goals)?;
            if let Some(closed) = &closed {
                printer.message(&format!("Closed session {} ({})", closed.id, closed.status))?;
            }
            printer.session(&session)
        }
        SessionCommand::End { id, abandon } => {
            let id = match id {
                Some(id) => id,
                None => sessions
                    .active_session()?
                    .map(|s| s.id)
                    .context("no active session")?,
            };
            let status = if abandon {
                SessionStatus::Abandoned
            } else {
                SessionStatus::Completed
            };
            let session = sessions.end_session(&id, status)?;
            printer.session(&session)
        }
        SessionCommand::Show { id } => {
            let session = match id {
                Some(id) => sessions.get_session(&id)?,
                None => sessions.active_session()?.context("no active session")?,
            };
            printer.session(&session)
        }
        SessionCommand::List { limit } => printer.sessions(&sessions.list_sessions(limit)?),
    }
}

fn log(interceptor: &Interceptor, explicit: Option<&Path>, args: LogArgs, printer: &Printer) -> Result<()> {
    let tool_args = parse_json_arg(&args.args)?;
    let outcome = match args.error {
        Some(message) => Err(ToolError::new(message)),
        None => Ok(match args.result {
            Some(raw) => serde_json::from_str(&raw).unwrap_or(Value::String(raw)),
            None => Value::Null,
        }),
    };

    let replay = interceptor.intercept(Replay {
        name: args.tool,
        outcome,
    });
    let outcome = replay.invoke(&tool_args, args.session.as_deref(), explicit)?;

    match outcome.event_id {
        Some(id) => printer.message(&format!("Logged {} as event {}", replay.tool().name, id)),
        None => anyhow::bail!("failed to record {}; see the log for details", replay.tool().name),
    }
}

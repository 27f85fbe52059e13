//! Core domain types for scrivener
//!
//! These types mirror the tables of a project store.
//!
//! ## Terminology
//!
//! | Term | Definition |
//! |------|------------|
//! | **Project** | A research project rooted at a directory carrying a `.scrivener/` marker |
//! | **Session** | A bounded run of tool invocations with a research focus and goals |
//! | **Invocation event** | Immutable record of one tool call and its outcome |
//! | **Act / Category** | The two-level research phase a tool is mapped to |
//! | **Progress** | Per-category completion derived from the event log |
//! | **Milestone** | A threshold crossed once and recorded forever |
//! | **Recommendation** | Suggested next act/tools derived from recent events |

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Row id of a `tool_usage` event.
pub type EventId = i64;

// ============================================
// Project
// ============================================

/// A research project. One project store holds exactly one project.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    /// Stable identifier derived from the canonical root path
    pub id: String,
    /// Canonical path to project root
    pub root_path: PathBuf,
    /// Human-friendly name
    pub name: String,
    /// Research domain (e.g. "computational linguistics")
    pub domain: Option<String>,
    /// When this project was initialized
    pub created_at: DateTime<Utc>,
}

// ============================================
// Sessions
// ============================================

/// Lifecycle state of a research session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Created but not yet started
    Pending,
    /// The single running session of its project
    Active,
    /// Closed explicitly or superseded by a newer session
    Completed,
    /// Left idle past the inactivity threshold
    Abandoned,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Pending => "pending",
            SessionStatus::Active => "active",
            SessionStatus::Completed => "completed",
            SessionStatus::Abandoned => "abandoned",
        }
    }

    /// Whether no further transitions are allowed
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionStatus::Completed | SessionStatus::Abandoned)
    }

    /// pending -> active -> {completed, abandoned}
    pub fn can_transition_to(&self, next: SessionStatus) -> bool {
        matches!(
            (self, next),
            (SessionStatus::Pending, SessionStatus::Active)
                | (SessionStatus::Pending, SessionStatus::Abandoned)
                | (SessionStatus::Active, SessionStatus::Completed)
                | (SessionStatus::Active, SessionStatus::Abandoned)
        )
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for SessionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(SessionStatus::Pending),
            "active" => Ok(SessionStatus::Active),
            "completed" => Ok(SessionStatus::Completed),
            "abandoned" => Ok(SessionStatus::Abandoned),
            _ => Err(format!("unknown session status: {}", s)),
        }
    }
}

/// A logical research session layered over the event stream
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub project_id: String,
    pub research_focus: String,
    pub goals: Vec<String>,
    /// Persisted status; see [`crate::sessions::SessionManager`] for the
    /// lazily computed effective status
    pub status: SessionStatus,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    /// Timestamp of the most recent event recorded against this session
    pub last_activity_at: Option<DateTime<Utc>>,
}

impl Session {
    /// Most recent sign of life: last event, or the start time
    pub fn last_seen(&self) -> DateTime<Utc> {
        self.last_activity_at.unwrap_or(self.started_at)
    }
}

// ============================================
// Tool invocation events
// ============================================

/// What a `tool_usage` row records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// A tool was dispatched
    Invocation,
    /// Progress for one category was explicitly reset
    CategoryReset,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Invocation => "invocation",
            EventKind::CategoryReset => "category_reset",
        }
    }
}

impl std::str::FromStr for EventKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "invocation" => Ok(EventKind::Invocation),
            "category_reset" => Ok(EventKind::CategoryReset),
            _ => Err(format!("unknown event kind: {}", s)),
        }
    }
}

/// Immutable record of one tool invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInvocationEvent {
    pub id: EventId,
    /// Store-wide insertion order; breaks ties between equal timestamps
    pub seq: i64,
    pub kind: EventKind,
    pub session_id: Option<String>,
    pub tool_name: String,
    pub research_act: String,
    pub research_category: String,
    /// SHA-256 of the canonical JSON arguments
    pub args_digest: String,
    /// Truncated tool result
    pub result_summary: Option<String>,
    pub execution_time_ms: i64,
    pub success: bool,
    pub error_message: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Input to [`crate::db::ProjectStore::record_invocation`]
#[derive(Debug, Clone)]
pub struct NewInvocation {
    pub tool_name: String,
    pub session_id: Option<String>,
    pub args_digest: String,
    pub result_summary: Option<String>,
    pub elapsed_ms: i64,
    pub success: bool,
    pub error: Option<String>,
}

// ============================================
// Derived views
// ============================================

/// Completion of one (act, category) pair
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchProgress {
    pub project_id: String,
    pub research_act: String,
    pub research_category: String,
    /// In [0, 100]
    pub completion_percentage: f64,
    /// Distinct tools with a successful event since the last reset, sorted
    pub distinct_tools_used: Vec<String>,
    /// Successful events since the last reset
    pub event_count: i64,
    pub last_activity: Option<DateTime<Utc>>,
    /// Set when a recompute was skipped; cleared by the next lazy refresh
    pub stale: bool,
}

/// Mean completion of an act's categories
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActProgress {
    pub act: String,
    pub completion_percentage: f64,
    pub categories: Vec<ResearchProgress>,
}

/// Answer to `get_progress`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressReport {
    pub project_id: String,
    /// Acts in taxonomy order; categories without events read as 0%
    pub acts: Vec<ActProgress>,
    /// Mean of all act completions
    pub overall_completion: f64,
    /// Progress rows outside the taxonomy (e.g. uncategorized tools)
    pub other: Vec<ResearchProgress>,
}

/// Kind of milestone
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MilestoneType {
    CategoryThreshold,
    ActThreshold,
    ToolDiversity,
}

impl MilestoneType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MilestoneType::CategoryThreshold => "category_threshold",
            MilestoneType::ActThreshold => "act_threshold",
            MilestoneType::ToolDiversity => "tool_diversity",
        }
    }
}

impl std::str::FromStr for MilestoneType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "category_threshold" => Ok(MilestoneType::CategoryThreshold),
            "act_threshold" => Ok(MilestoneType::ActThreshold),
            "tool_diversity" => Ok(MilestoneType::ToolDiversity),
            _ => Err(format!("unknown milestone type: {}", s)),
        }
    }
}

/// A threshold crossed for the first time
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Milestone {
    pub project_id: String,
    pub milestone_type: MilestoneType,
    /// Unique per project, e.g. `category:Writing:threshold:50`
    pub key: String,
    pub description: String,
    pub achieved_at: DateTime<Utc>,
    pub impact_score: f64,
}

/// Classification of a recent window of events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternType {
    Repetitive,
    LogicalProgression,
    Exploratory,
    Undetermined,
}

impl PatternType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PatternType::Repetitive => "repetitive",
            PatternType::LogicalProgression => "logical_progression",
            PatternType::Exploratory => "exploratory",
            PatternType::Undetermined => "undetermined",
        }
    }
}

impl std::fmt::Display for PatternType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for PatternType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "repetitive" => Ok(PatternType::Repetitive),
            "logical_progression" => Ok(PatternType::LogicalProgression),
            "exploratory" => Ok(PatternType::Exploratory),
            "undetermined" => Ok(PatternType::Undetermined),
            _ => Err(format!("unknown pattern type: {}", s)),
        }
    }
}

/// Lifecycle of a recommendation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendationStatus {
    Pending,
    Accepted,
    Dismissed,
}

impl RecommendationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecommendationStatus::Pending => "pending",
            RecommendationStatus::Accepted => "accepted",
            RecommendationStatus::Dismissed => "dismissed",
        }
    }
}

impl std::str::FromStr for RecommendationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(RecommendationStatus::Pending),
            "accepted" => Ok(RecommendationStatus::Accepted),
            "dismissed" => Ok(RecommendationStatus::Dismissed),
            _ => Err(format!("unknown recommendation status: {}", s)),
        }
    }
}

/// Suggested next step for a session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recommendation {
    pub id: i64,
    pub project_id: String,
    pub session_id: Option<String>,
    pub current_act: String,
    pub recommended_next_act: String,
    pub recommended_category: String,
    pub recommended_tools: Vec<String>,
    pub pattern: PatternType,
    /// Always names the pattern classification that produced it
    pub reasoning: String,
    /// 1 = high, 3 = low
    pub priority: u8,
    pub status: RecommendationStatus,
    pub created_at: DateTime<Utc>,
}

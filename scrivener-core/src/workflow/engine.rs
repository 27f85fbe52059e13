//! Workflow engine: applies the pure workflow functions to a project store
//!
//! ```text
//! event ──► recompute ──┬─► category progress ──► category milestones
//!                       ├─► act completion ─────► act + diversity milestones
//!                       └─► pattern window ─────► pending recommendation
//! ```
//!
//! A recompute runs in one IMMEDIATE transaction. The wait for the write
//! lock is capped at the budget and the deadline is checked between phases.
//! Running out of budget rolls everything back and returns
//! [`Error::RecomputeTimeout`].
//!
//! Progress rows and recommendations remember the last event they account
//! for. Anything behind the event log, or flagged stale, is rebuilt at the
//! start of the next progress, milestone or recommendation read.

use super::milestones::{self, Scope};
use super::patterns;
use super::progress::{completion_percentage, mean};
use super::recommend::{recommend, RecommendationInput};
use crate::config::WorkflowConfig;
use crate::db::events::{
    act_distinct_tools, category_activity, category_high_water, recent_invocations,
    session_categories,
};
use crate::db::workflow::{
    get_progress_row, insert_milestone_if_absent, insert_recommendation, progress_rows,
    stale_categories, stale_recommendation_scopes, upsert_progress,
};
use crate::db::ProjectStore;
use crate::error::{Error, Result};
use crate::taxonomy::{CategoryId, Taxonomy};
use crate::types::*;
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use std::collections::{BTreeSet, HashMap};
use std::time::{Duration, Instant};

/// What a recompute changed
#[derive(Debug, Clone, Default)]
pub struct RecomputeReport {
    pub progress: Option<ResearchProgress>,
    /// Milestones recorded by this recompute (not previously achieved)
    pub milestones: Vec<Milestone>,
    pub recommendation: Option<Recommendation>,
    pub elapsed_ms: u64,
}

struct Deadline {
    start: Instant,
    budget: Duration,
}

impl Deadline {
    fn new(budget_ms: u64) -> Self {
        Self {
            start: Instant::now(),
            budget: Duration::from_millis(budget_ms),
        }
    }

    fn remaining(&self) -> Duration {
        self.budget.saturating_sub(self.start.elapsed())
    }

    fn expired(&self) -> Error {
        Error::RecomputeTimeout {
            elapsed_ms: self.start.elapsed().as_millis() as u64,
            budget_ms: self.budget.as_millis() as u64,
        }
    }

    fn check(&self) -> Result<()> {
        if self.start.elapsed() >= self.budget {
            return Err(self.expired());
        }
        Ok(())
    }
}

/// Derives progress, milestones and recommendations from the event log
pub struct WorkflowEngine<'a> {
    taxonomy: &'a Taxonomy,
    config: &'a WorkflowConfig,
}

impl<'a> WorkflowEngine<'a> {
    pub fn new(taxonomy: &'a Taxonomy, config: &'a WorkflowConfig) -> Self {
        Self { taxonomy, config }
    }

    /// Bring derived state up to date after `event` was recorded.
    pub fn recompute(
        &self,
        store: &ProjectStore,
        project_id: &str,
        event: &ToolInvocationEvent,
    ) -> Result<RecomputeReport> {
        let deadline = Deadline::new(self.config.recompute_timeout_ms);

        let outcome = store.write_tx_within(deadline.remaining(), |tx| {
            let mut report = RecomputeReport::default();
            let at = event.timestamp;

            deadline.check()?;
            let (progress, awarded) = self.recompute_category(
                tx,
                project_id,
                &event.research_act,
                &event.research_category,
                at,
            )?;
            report.progress = Some(progress);
            report.milestones = awarded;

            deadline.check()?;
            if event.kind == EventKind::Invocation {
                report.recommendation =
                    self.refresh_recommendation(tx, project_id, event.session_id.as_deref(), at)?;
            }

            deadline.check()?;
            Ok(report)
        });
        let mut report = match outcome {
            Err(Error::Database(e)) if is_busy(&e) => return Err(deadline.expired()),
            other => other?,
        };

        report.elapsed_ms = deadline.start.elapsed().as_millis() as u64;
        for milestone in &report.milestones {
            tracing::info!(project = project_id, key = %milestone.key, "Milestone achieved");
        }
        tracing::debug!(
            project = project_id,
            act = %event.research_act,
            category = %event.research_category,
            elapsed_ms = report.elapsed_ms,
            "Recomputed workflow state"
        );
        Ok(report)
    }

    /// Rebuild derived state that is behind the event log: stale or lagging
    /// categories first, then recommendation scopes with newer invocations.
    /// Returns the number of categories and scopes rebuilt.
    pub fn refresh_stale(&self, store: &ProjectStore, project_id: &str) -> Result<usize> {
        let (categories, scopes) = {
            let conn = store.conn();
            (
                stale_categories(&conn, project_id)?,
                stale_recommendation_scopes(&conn, project_id)?,
            )
        };
        if categories.is_empty() && scopes.is_empty() {
            return Ok(0);
        }

        // Re-read under the write lock; a concurrent reader may have caught up
        let refreshed = store.write_tx(|tx| {
            let categories = stale_categories(tx, project_id)?;
            let scopes = stale_recommendation_scopes(tx, project_id)?;
            let at = Utc::now();
            for (act, category) in &categories {
                self.recompute_category(tx, project_id, act, category, at)?;
            }
            for session_id in &scopes {
                self.refresh_recommendation(tx, project_id, session_id.as_deref(), at)?;
            }
            Ok(categories.len() + scopes.len())
        })?;

        if refreshed > 0 {
            tracing::info!(project = project_id, refreshed, "Refreshed stale workflow state");
        }
        Ok(refreshed)
    }

    fn refresh_before_read(&self, store: &ProjectStore, project_id: &str) {
        if let Err(e) = self.refresh_stale(store, project_id) {
            tracing::warn!(project = project_id, error = %e, "Failed to refresh stale workflow state");
        }
    }

    /// Progress of every taxonomy category, grouped by act.
    ///
    /// Stale categories are recomputed first. If that fails the last known
    /// values are reported.
    pub fn get_progress(&self, store: &ProjectStore, project_id: &str) -> Result<ProgressReport> {
        store.require_project(project_id)?;
        self.refresh_before_read(store, project_id);

        let mut rows: HashMap<(String, String), ResearchProgress> = store
            .list_progress(project_id)?
            .into_iter()
            .map(|p| ((p.research_act.clone(), p.research_category.clone()), p))
            .collect();

        let acts: Vec<ActProgress> = self
            .taxonomy
            .acts()
            .iter()
            .map(|act| {
                let categories: Vec<ResearchProgress> = act
                    .categories
                    .iter()
                    .map(|id| {
                        let category = self.taxonomy.category(*id);
                        rows.remove(&(category.act.clone(), category.name.clone()))
                            .unwrap_or_else(|| empty_progress(project_id, &category.act, &category.name))
                    })
                    .collect();
                ActProgress {
                    act: act.name.clone(),
                    completion_percentage: mean(categories.iter().map(|c| c.completion_percentage)),
                    categories,
                }
            })
            .collect();

        let overall_completion = mean(acts.iter().map(|a| a.completion_percentage));
        let mut other: Vec<ResearchProgress> = rows.into_values().collect();
        other.sort_by(|a, b| {
            (&a.research_act, &a.research_category).cmp(&(&b.research_act, &b.research_category))
        });

        Ok(ProgressReport {
            project_id: project_id.to_string(),
            acts,
            overall_completion,
            other,
        })
    }

    /// Start a category over. Records an auditable reset event and zeroes
    /// the category's progress; achieved milestones are kept.
    pub fn reset_category(
        &self,
        store: &ProjectStore,
        project_id: &str,
        act: &str,
        category: &str,
        session_id: Option<&str>,
        reason: &str,
    ) -> Result<ResearchProgress> {
        if self.taxonomy.find_category(act, category).is_none() {
            return Err(Error::Taxonomy(format!(
                "unknown category '{}' in act '{}'",
                category, act
            )));
        }

        let event = store.record_category_reset(act, category, session_id, reason)?;
        let (progress, _) = store.write_tx(|tx| {
            self.recompute_category(tx, project_id, act, category, event.timestamp)
        })?;

        tracing::info!(project = project_id, act, category, reason, "Reset category progress");
        Ok(progress)
    }

    /// Recommendations for a session (project-wide ones when `None`), newest first.
    pub fn get_recommendations(
        &self,
        store: &ProjectStore,
        project_id: &str,
        session_id: Option<&str>,
        pending_only: bool,
    ) -> Result<Vec<Recommendation>> {
        store.require_project(project_id)?;
        self.refresh_before_read(store, project_id);
        store.list_recommendations(project_id, session_id, pending_only, None)
    }

    pub fn get_milestones(&self, store: &ProjectStore, project_id: &str) -> Result<Vec<Milestone>> {
        store.require_project(project_id)?;
        self.refresh_before_read(store, project_id);
        store.list_milestones(project_id)
    }

    pub fn accept_recommendation(&self, store: &ProjectStore, id: i64) -> Result<bool> {
        store.set_recommendation_status(id, RecommendationStatus::Accepted)
    }

    pub fn dismiss_recommendation(&self, store: &ProjectStore, id: i64) -> Result<bool> {
        store.set_recommendation_status(id, RecommendationStatus::Dismissed)
    }

    /// Recompute one category's progress row and, for taxonomy categories,
    /// its category, act and diversity milestones.
    fn recompute_category(
        &self,
        conn: &Connection,
        project_id: &str,
        act: &str,
        category: &str,
        at: DateTime<Utc>,
    ) -> Result<(ResearchProgress, Vec<Milestone>)> {
        let through_seq = category_high_water(conn, act, category)?;
        let activity = category_activity(conn, act, category)?;
        let id = self.taxonomy.find_category(act, category);

        let completion = match id {
            Some(id) => completion_percentage(
                activity.distinct_tools.len(),
                self.taxonomy.tool_count(id),
                activity.event_count,
                self.taxonomy.category(id).expected_events,
            ),
            None => 0.0,
        };

        let progress = ResearchProgress {
            project_id: project_id.to_string(),
            research_act: act.to_string(),
            research_category: category.to_string(),
            completion_percentage: completion,
            distinct_tools_used: activity.distinct_tools,
            event_count: activity.event_count,
            last_activity: activity.last_activity,
            stale: false,
        };
        upsert_progress(conn, &progress, through_seq)?;

        let mut awarded = Vec::new();
        if id.is_none() {
            return Ok((progress, awarded));
        }

        let thresholds = &self.config.milestone_thresholds;
        let mut candidates =
            milestones::detect(project_id, Scope::Category(category), completion, thresholds, at);

        let act_completion = self.act_completion(conn, project_id, act)?;
        candidates.extend(milestones::detect(
            project_id,
            Scope::Act(act),
            act_completion,
            thresholds,
            at,
        ));

        let act_category_names: Vec<String> = self
            .taxonomy
            .act_categories(act)
            .iter()
            .map(|id| self.taxonomy.category(*id).name.clone())
            .collect();
        let distinct = act_distinct_tools(conn, act, &act_category_names)?;
        candidates.extend(milestones::tool_diversity(
            project_id,
            act,
            distinct,
            self.config.tool_diversity_count,
            at,
        ));

        for milestone in candidates {
            if insert_milestone_if_absent(conn, &milestone)? {
                awarded.push(milestone);
            }
        }

        Ok((progress, awarded))
    }

    /// Mean completion of an act's categories; missing rows count as 0%.
    fn act_completion(&self, conn: &Connection, project_id: &str, act: &str) -> Result<f64> {
        let mut values = Vec::new();
        for id in self.taxonomy.act_categories(act) {
            let category = self.taxonomy.category(*id);
            let completion = get_progress_row(conn, project_id, act, &category.name)?
                .map(|p| p.completion_percentage)
                .unwrap_or(0.0);
            values.push(completion);
        }
        Ok(mean(values))
    }

    fn refresh_recommendation(
        &self,
        conn: &Connection,
        project_id: &str,
        session_id: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<Option<Recommendation>> {
        let window = recent_invocations(conn, session_id, self.config.pattern_window)?;
        let analysis = patterns::classify(&window, self.taxonomy, self.config);

        let touched: BTreeSet<CategoryId> = session_categories(conn, session_id)?
            .iter()
            .filter_map(|(act, category)| self.taxonomy.find_category(act, category))
            .collect();
        let progress: HashMap<CategoryId, ResearchProgress> = progress_rows(conn, project_id)?
            .into_iter()
            .filter_map(|p| {
                self.taxonomy
                    .find_category(&p.research_act, &p.research_category)
                    .map(|id| (id, p))
            })
            .collect();

        let input = RecommendationInput {
            project_id,
            session_id,
            window: &window,
            analysis: &analysis,
            progress: &progress,
            touched: &touched,
        };

        let Some(mut rec) = recommend(&input, self.taxonomy, self.config, at) else {
            return Ok(None);
        };
        let through_seq = window.last().map(|e| e.seq).unwrap_or(0);
        rec.id = insert_recommendation(conn, &rec, through_seq)?;
        Ok(Some(rec))
    }
}

fn is_busy(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(err, _)
            if matches!(err.code, rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked)
    )
}

fn empty_progress(project_id: &str, act: &str, category: &str) -> ResearchProgress {
    ResearchProgress {
        project_id: project_id.to_string(),
        research_act: act.to_string(),
        research_category: category.to_string(),
        completion_percentage: 0.0,
        distinct_tools_used: Vec::new(),
        event_count: 0,
        last_activity: None,
        stale: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::args_digest;
    use chrono::Duration as ChronoDuration;
    use std::path::Path;

    struct Fixture {
        store: ProjectStore,
        project: Project,
        taxonomy: Taxonomy,
        config: WorkflowConfig,
    }

    impl Fixture {
        fn new() -> Self {
            let store = ProjectStore::open_in_memory().unwrap();
            let project = store
                .ensure_project(Path::new("/research/thesis"), None, None)
                .unwrap();
            Self {
                store,
                project,
                taxonomy: Taxonomy::builtin().unwrap(),
                config: WorkflowConfig::default(),
            }
        }

        fn engine(&self) -> WorkflowEngine<'_> {
            WorkflowEngine::new(&self.taxonomy, &self.config)
        }

        fn call(&self, tool: &str, session_id: Option<&str>) -> RecomputeReport {
            let event = self
                .store
                .record_invocation(
                    &self.taxonomy,
                    &NewInvocation {
                        tool_name: tool.to_string(),
                        session_id: session_id.map(str::to_string),
                        args_digest: args_digest(&serde_json::json!({})),
                        result_summary: None,
                        elapsed_ms: 1,
                        success: true,
                        error: None,
                    },
                )
                .unwrap();
            self.engine()
                .recompute(&self.store, &self.project.id, &event)
                .unwrap()
        }

        fn completion(&self, act: &str, category: &str) -> f64 {
            self.engine()
                .get_progress(&self.store, &self.project.id)
                .unwrap()
                .acts
                .into_iter()
                .find(|a| a.act == act)
                .unwrap()
                .categories
                .into_iter()
                .find(|c| c.research_category == category)
                .unwrap()
                .completion_percentage
        }
    }

    #[test]
    fn test_progress_follows_formula() {
        let fixture = Fixture::new();
        let report = fixture.call("literature_search", None);
        let progress = report.progress.unwrap();
        // 1 of 3 tools, 1 of 6 expected events
        assert_eq!(progress.completion_percentage, 28.33);
        assert_eq!(progress.distinct_tools_used, vec!["literature_search".to_string()]);
        assert_eq!(
            fixture.completion("Knowledge Acquisition", "Literature Search"),
            28.33
        );
        assert_eq!(fixture.completion("Synthesis & Output", "Writing"), 0.0);
    }

    #[test]
    fn test_progress_is_monotonic() {
        let fixture = Fixture::new();
        let mut previous = 0.0;
        for tool in [
            "draft_section",
            "draft_section",
            "abstract_generator",
            "draft_section",
            "generate_latex_document",
            "draft_section",
            "draft_section",
        ] {
            fixture.call(tool, None);
            let current = fixture.completion("Synthesis & Output", "Writing");
            assert!(current >= previous, "{} < {}", current, previous);
            previous = current;
        }
        assert_eq!(previous, 100.0);
    }

    #[test]
    fn test_milestones_are_not_duplicated() {
        let fixture = Fixture::new();
        // Project Planning: 3 tools, 3 expected events
        let first = fixture.call("timeline_planner", None);
        assert!(first
            .milestones
            .iter()
            .any(|m| m.key == "category:Project Planning:threshold:25"));

        fixture.call("ethics_checklist", None);
        fixture.call("initialize_project", None);
        let keys: Vec<String> = fixture
            .store
            .list_milestones(&fixture.project.id)
            .unwrap()
            .into_iter()
            .map(|m| m.key)
            .collect();
        assert!(keys.contains(&"category:Project Planning:threshold:100".to_string()));
        assert!(keys.contains(&"act:Design & Planning:threshold:50".to_string()));

        // Recomputing from the same event set adds nothing
        let events = fixture
            .store
            .get_tool_history(None, &Default::default())
            .unwrap();
        let again = fixture
            .engine()
            .recompute(&fixture.store, &fixture.project.id, events.last().unwrap())
            .unwrap();
        assert!(again.milestones.is_empty());
        assert_eq!(
            fixture.store.list_milestones(&fixture.project.id).unwrap().len(),
            keys.len()
        );
        let unique: BTreeSet<_> = keys.iter().collect();
        assert_eq!(unique.len(), keys.len());
    }

    #[test]
    fn test_tool_diversity_milestone() {
        let mut fixture = Fixture::new();
        fixture.config.tool_diversity_count = 3;
        fixture.call("clarify_research_goals", None);
        fixture.call("scope_definition", None);
        let report = fixture.call("concept_mapping", None);
        assert!(report
            .milestones
            .iter()
            .any(|m| m.key == "act:Conceptualization:tool_diversity:3"
                && m.milestone_type == MilestoneType::ToolDiversity));
    }

    #[test]
    fn test_repetitive_recommendation() {
        let fixture = Fixture::new();
        let (session, _) = fixture
            .store
            .start_session(&fixture.project.id, "focus", &[], ChronoDuration::hours(2))
            .unwrap();

        for _ in 0..3 {
            fixture.call("X", Some(&session.id));
        }

        let recs = fixture
            .engine()
            .get_recommendations(&fixture.store, &fixture.project.id, Some(&session.id), true)
            .unwrap();
        assert_eq!(recs.len(), 1);
        assert_eq!(recs[0].pattern, PatternType::Repetitive);
        assert!(recs[0].reasoning.contains("repetitive"));
        assert!(!recs[0].recommended_tools.contains(&"X".to_string()));

        // Earlier recommendations were superseded, not deleted
        let all = fixture
            .engine()
            .get_recommendations(&fixture.store, &fixture.project.id, Some(&session.id), false)
            .unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(
            all.iter()
                .filter(|r| r.status == RecommendationStatus::Pending)
                .count(),
            1
        );
    }

    #[test]
    fn test_zero_budget_times_out_and_rolls_back() {
        let mut fixture = Fixture::new();
        fixture.config.recompute_timeout_ms = 0;
        let event = fixture
            .store
            .record_invocation(
                &fixture.taxonomy,
                &NewInvocation {
                    tool_name: "literature_search".to_string(),
                    session_id: None,
                    args_digest: String::new(),
                    result_summary: None,
                    elapsed_ms: 1,
                    success: true,
                    error: None,
                },
            )
            .unwrap();

        let err = fixture
            .engine()
            .recompute(&fixture.store, &fixture.project.id, &event)
            .unwrap_err();
        assert!(matches!(err, Error::RecomputeTimeout { .. }));
        assert!(fixture
            .store
            .list_progress(&fixture.project.id)
            .unwrap()
            .is_empty());

        // The next read picks the category up lazily
        fixture.config.recompute_timeout_ms = 250;
        assert!(fixture.completion("Knowledge Acquisition", "Literature Search") > 0.0);
    }

    #[test]
    fn test_reset_category() {
        let fixture = Fixture::new();
        fixture.call("literature_search", None);
        fixture.call("semantic_search", None);
        assert!(fixture.completion("Knowledge Acquisition", "Literature Search") > 0.0);

        let progress = fixture
            .engine()
            .reset_category(
                &fixture.store,
                &fixture.project.id,
                "Knowledge Acquisition",
                "Literature Search",
                None,
                "new search strategy",
            )
            .unwrap();
        assert_eq!(progress.completion_percentage, 0.0);
        assert_eq!(
            fixture.completion("Knowledge Acquisition", "Literature Search"),
            0.0
        );
        // Milestones survive a reset
        assert!(!fixture
            .store
            .list_milestones(&fixture.project.id)
            .unwrap()
            .is_empty());

        assert!(fixture
            .engine()
            .reset_category(&fixture.store, &fixture.project.id, "Nope", "Nope", None, "")
            .is_err());
    }

    #[test]
    fn test_uncategorized_progress_is_reported_separately() {
        let fixture = Fixture::new();
        fixture.call("mystery_tool", None);
        let report = fixture
            .engine()
            .get_progress(&fixture.store, &fixture.project.id)
            .unwrap();
        assert_eq!(report.acts.len(), 6);
        assert_eq!(report.overall_completion, 0.0);
        assert_eq!(report.other.len(), 1);
        assert_eq!(report.other[0].research_category, "uncategorized");
        assert_eq!(report.other[0].event_count, 1);
    }
}

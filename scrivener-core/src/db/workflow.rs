//! Derived workflow records: progress, milestones and recommendations
//!
//! The free functions take a bare `&Connection` so the workflow engine can
//! call them inside its own recompute transaction; the `ProjectStore`
//! methods are the read side used by queries and tools.

use super::repo::{enum_column, format_ts, json_column, now, parse_ts, parse_ts_opt, ProjectStore};
use crate::error::{Error, Result};
use crate::types::*;
use rusqlite::{params, Connection, OptionalExtension, Row};

// ============================================
// Progress
// ============================================

/// Insert or replace a progress row, clearing its stale flag. `through_seq`
/// is the last event of the category the row accounts for.
pub(crate) fn upsert_progress(
    conn: &Connection,
    progress: &ResearchProgress,
    through_seq: i64,
) -> Result<()> {
    conn.execute(
        r#"
        INSERT INTO research_progress (project_id, research_act, research_category,
                                       completion_percentage, distinct_tools_used,
                                       event_count, last_activity, stale, through_seq,
                                       updated_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 0, ?8, ?9)
        ON CONFLICT(project_id, research_act, research_category) DO UPDATE SET
            completion_percentage = excluded.completion_percentage,
            distinct_tools_used = excluded.distinct_tools_used,
            event_count = excluded.event_count,
            last_activity = excluded.last_activity,
            stale = 0,
            through_seq = MAX(through_seq, excluded.through_seq),
            updated_at = excluded.updated_at
        "#,
        params![
            progress.project_id,
            progress.research_act,
            progress.research_category,
            progress.completion_percentage,
            serde_json::to_string(&progress.distinct_tools_used)?,
            progress.event_count,
            progress.last_activity.map(format_ts),
            through_seq,
            format_ts(now()),
        ],
    )?;
    Ok(())
}

pub(crate) fn get_progress_row(
    conn: &Connection,
    project_id: &str,
    act: &str,
    category: &str,
) -> Result<Option<ResearchProgress>> {
    conn.query_row(
        r#"
        SELECT * FROM research_progress
        WHERE project_id = ?1 AND research_act = ?2 AND research_category = ?3
        "#,
        params![project_id, act, category],
        row_to_progress,
    )
    .optional()
    .map_err(Error::from)
}

pub(crate) fn progress_rows(conn: &Connection, project_id: &str) -> Result<Vec<ResearchProgress>> {
    let mut stmt = conn.prepare(
        r#"
        SELECT * FROM research_progress WHERE project_id = ?
        ORDER BY research_act, research_category
        "#,
    )?;
    let rows = stmt
        .query_map([project_id], row_to_progress)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Categories needing a recompute: rows flagged stale, plus categories whose
/// latest event is newer than their progress row (or that have no row).
pub(crate) fn stale_categories(conn: &Connection, project_id: &str) -> Result<Vec<(String, String)>> {
    let mut stmt = conn.prepare(
        r#"
        SELECT research_act, research_category FROM research_progress
        WHERE project_id = ?1 AND stale = 1
        UNION
        SELECT u.research_act, u.research_category FROM tool_usage u
        GROUP BY u.research_act, u.research_category
        HAVING MAX(u.seq) > COALESCE(
            (SELECT p.through_seq FROM research_progress p
             WHERE p.project_id = ?1
               AND p.research_act = u.research_act
               AND p.research_category = u.research_category),
            0)
        ORDER BY 1, 2
        "#,
    )?;
    let rows = stmt
        .query_map([project_id], |r| Ok((r.get(0)?, r.get(1)?)))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

// ============================================
// Milestones
// ============================================

/// Insert a milestone unless its key was already achieved. Returns true when
/// this call recorded it.
pub(crate) fn insert_milestone_if_absent(conn: &Connection, milestone: &Milestone) -> Result<bool> {
    let inserted = conn.execute(
        r#"
        INSERT OR IGNORE INTO research_milestones
            (project_id, milestone_type, milestone_key, description, achieved_at, impact_score)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6)
        "#,
        params![
            milestone.project_id,
            milestone.milestone_type.as_str(),
            milestone.key,
            milestone.description,
            format_ts(milestone.achieved_at),
            milestone.impact_score,
        ],
    )?;
    Ok(inserted > 0)
}

// ============================================
// Recommendations
// ============================================

/// Store a new pending recommendation, dismissing the one it supersedes.
/// `through_seq` is the last invocation the recommendation was derived from.
pub(crate) fn insert_recommendation(
    conn: &Connection,
    rec: &Recommendation,
    through_seq: i64,
) -> Result<i64> {
    conn.execute(
        r#"
        UPDATE workflow_recommendations SET status = 'dismissed'
        WHERE project_id = ?1 AND session_id IS ?2 AND status = 'pending'
        "#,
        params![rec.project_id, rec.session_id],
    )?;
    conn.execute(
        r#"
        INSERT INTO workflow_recommendations
            (project_id, session_id, current_act, recommended_next_act, recommended_category,
             recommended_tools, pattern, reasoning, priority, status, through_seq,
             created_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, 'pending', ?10, ?11)
        "#,
        params![
            rec.project_id,
            rec.session_id,
            rec.current_act,
            rec.recommended_next_act,
            rec.recommended_category,
            serde_json::to_string(&rec.recommended_tools)?,
            rec.pattern.as_str(),
            rec.reasoning,
            rec.priority,
            through_seq,
            format_ts(rec.created_at),
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Recommendation scopes behind the event log. A session scope lags when
/// its latest invocation is newer than every recommendation made for it;
/// the `None` scope covers invocations recorded without a session.
pub(crate) fn stale_recommendation_scopes(
    conn: &Connection,
    project_id: &str,
) -> Result<Vec<Option<String>>> {
    let mut stmt = conn.prepare(
        r#"
        SELECT u.session_id FROM tool_usage u
        WHERE u.event_kind = 'invocation'
        GROUP BY u.session_id
        HAVING MAX(u.seq) > COALESCE(
            (SELECT MAX(r.through_seq) FROM workflow_recommendations r
             WHERE r.project_id = ?1 AND r.session_id IS u.session_id),
            0)
        ORDER BY MAX(u.seq)
        "#,
    )?;
    let rows = stmt
        .query_map([project_id], |r| r.get(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

impl ProjectStore {
    /// All progress rows of a project, ordered by (act, category)
    pub fn list_progress(&self, project_id: &str) -> Result<Vec<ResearchProgress>> {
        progress_rows(&self.conn(), project_id)
    }

    /// Flag a category for lazy recompute, keeping its last known values.
    /// Waits at most `wait` for a locked store.
    pub fn mark_stale(
        &self,
        project_id: &str,
        act: &str,
        category: &str,
        wait: std::time::Duration,
    ) -> Result<()> {
        self.with_lock_wait(wait, |conn| {
            conn.execute(
                r#"
                INSERT INTO research_progress (project_id, research_act, research_category,
                                               completion_percentage, distinct_tools_used,
                                               event_count, last_activity, stale, updated_at)
                VALUES (?1, ?2, ?3, 0, '[]', 0, NULL, 1, ?4)
                ON CONFLICT(project_id, research_act, research_category) DO UPDATE SET
                    stale = 1,
                    updated_at = excluded.updated_at
                "#,
                params![project_id, act, category, format_ts(now())],
            )?;
            Ok(())
        })?;
        tracing::debug!(project = project_id, act, category, "Marked progress stale");
        Ok(())
    }

    /// Milestones of a project in the order they were achieved
    pub fn list_milestones(&self, project_id: &str) -> Result<Vec<Milestone>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            r#"
            SELECT * FROM research_milestones WHERE project_id = ?
            ORDER BY achieved_at, id
            "#,
        )?;
        let rows = stmt
            .query_map([project_id], row_to_milestone)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Recommendations for a session (or project-wide ones when `None`),
    /// newest first.
    pub fn list_recommendations(
        &self,
        project_id: &str,
        session_id: Option<&str>,
        pending_only: bool,
        limit: Option<usize>,
    ) -> Result<Vec<Recommendation>> {
        let conn = self.conn();
        let mut sql = String::from(
            "SELECT * FROM workflow_recommendations WHERE project_id = ?1 AND session_id IS ?2",
        );
        if pending_only {
            sql.push_str(" AND status = 'pending'");
        }
        sql.push_str(" ORDER BY id DESC");
        if let Some(limit) = limit {
            sql.push_str(&format!(" LIMIT {}", limit));
        }

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![project_id, session_id], row_to_recommendation)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Accept or dismiss a pending recommendation. Returns false when it was
    /// not pending any more.
    pub fn set_recommendation_status(&self, id: i64, status: RecommendationStatus) -> Result<bool> {
        if status == RecommendationStatus::Pending {
            return Err(Error::Config(
                "recommendations cannot be moved back to pending".to_string(),
            ));
        }
        let conn = self.conn();
        let changed = conn.execute(
            "UPDATE workflow_recommendations SET status = ?1 WHERE id = ?2 AND status = 'pending'",
            params![status.as_str(), id],
        )?;
        Ok(changed > 0)
    }
}

pub(crate) fn row_to_progress(row: &Row) -> rusqlite::Result<ResearchProgress> {
    let stale: i64 = row.get("stale")?;

    Ok(ResearchProgress {
        project_id: row.get("project_id")?,
        research_act: row.get("research_act")?,
        research_category: row.get("research_category")?,
        completion_percentage: row.get("completion_percentage")?,
        distinct_tools_used: json_column(row, "distinct_tools_used")?,
        event_count: row.get("event_count")?,
        last_activity: parse_ts_opt(row.get("last_activity")?),
        stale: stale != 0,
    })
}

fn row_to_milestone(row: &Row) -> rusqlite::Result<Milestone> {
    let achieved_str: String = row.get("achieved_at")?;

    Ok(Milestone {
        project_id: row.get("project_id")?,
        milestone_type: enum_column(row, "milestone_type")?,
        key: row.get("milestone_key")?,
        description: row.get("description")?,
        achieved_at: parse_ts(&achieved_str),
        impact_score: row.get("impact_score")?,
    })
}

fn row_to_recommendation(row: &Row) -> rusqlite::Result<Recommendation> {
    let created_str: String = row.get("created_at")?;

    Ok(Recommendation {
        id: row.get("id")?,
        project_id: row.get("project_id")?,
        session_id: row.get("session_id")?,
        current_act: row.get("current_act")?,
        recommended_next_act: row.get("recommended_next_act")?,
        recommended_category: row.get("recommended_category")?,
        recommended_tools: json_column(row, "recommended_tools")?,
        pattern: enum_column(row, "pattern")?,
        reasoning: row.get("reasoning")?,
        priority: row.get("priority")?,
        status: enum_column(row, "status")?,
        created_at: parse_ts(&created_str),
    })
}

//! Tool invocation event log
//!
//! `tool_usage` is append-only. Each insert runs in an IMMEDIATE transaction
//! that assigns the next store-wide `seq` and clamps the timestamp so it never
//! runs behind the previous event, giving a total (timestamp, seq) order even
//! when the wall clock stalls or steps back.

use super::repo::{enum_column, format_ts, now, parse_ts, ProjectStore};
use crate::error::{Error, Result};
use crate::taxonomy::Taxonomy;
use crate::types::{EventId, EventKind, NewInvocation, ToolInvocationEvent};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use sha2::{Digest, Sha256};

/// Tool name recorded on category reset events
pub const CATEGORY_RESET_TOOL: &str = "category_reset";

/// Filters for [`ProjectStore::get_tool_history`]
#[derive(Debug, Clone, Default)]
pub struct HistoryFilter {
    /// Only events for this tool
    pub tool_name: Option<String>,
    /// Only events in this act
    pub research_act: Option<String>,
    /// Only events in this category
    pub research_category: Option<String>,
    /// Only successful (true) or failed (false) events
    pub success: Option<bool>,
    /// Only events at or after this time
    pub since: Option<DateTime<Utc>>,
    /// Keep the most recent N matching events (still returned oldest first)
    pub limit: Option<usize>,
    /// Include category reset events
    pub include_resets: bool,
}

/// SHA-256 of the canonical JSON encoding of tool arguments.
///
/// `serde_json` maps are ordered by key, so equal argument objects digest
/// equally regardless of the order the host sent them in.
pub fn args_digest(args: &serde_json::Value) -> String {
    let canonical = serde_json::to_string(args).unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    hex::encode(hasher.finalize())
}

struct NewEvent<'a> {
    kind: EventKind,
    session_id: Option<&'a str>,
    tool_name: &'a str,
    research_act: &'a str,
    research_category: &'a str,
    args_digest: &'a str,
    result_summary: Option<&'a str>,
    execution_time_ms: i64,
    success: bool,
    error_message: Option<&'a str>,
}

impl ProjectStore {
    /// Record one tool invocation, classified through the taxonomy.
    ///
    /// Either the whole event commits or nothing does.
    pub fn record_invocation(
        &self,
        taxonomy: &Taxonomy,
        invocation: &NewInvocation,
    ) -> Result<ToolInvocationEvent> {
        let classification = taxonomy.classify(&invocation.tool_name);

        self.write_tx(|tx| {
            append_event(
                tx,
                &NewEvent {
                    kind: EventKind::Invocation,
                    session_id: invocation.session_id.as_deref(),
                    tool_name: &invocation.tool_name,
                    research_act: &classification.act,
                    research_category: &classification.category,
                    args_digest: &invocation.args_digest,
                    result_summary: invocation.result_summary.as_deref(),
                    execution_time_ms: invocation.elapsed_ms,
                    success: invocation.success,
                    error_message: invocation.error.as_deref(),
                },
            )
        })
        .map_err(|e| Error::TelemetryWriteFailure(e.to_string()))
    }

    /// Record an auditable reset of one category's progress.
    ///
    /// Progress for the category is computed only from events after the
    /// latest reset, so this is the one way completion can go down.
    pub fn record_category_reset(
        &self,
        research_act: &str,
        research_category: &str,
        session_id: Option<&str>,
        reason: &str,
    ) -> Result<ToolInvocationEvent> {
        let digest = args_digest(&serde_json::json!({
            "act": research_act,
            "category": research_category,
            "reason": reason,
        }));

        self.write_tx(|tx| {
            append_event(
                tx,
                &NewEvent {
                    kind: EventKind::CategoryReset,
                    session_id,
                    tool_name: CATEGORY_RESET_TOOL,
                    research_act,
                    research_category,
                    args_digest: &digest,
                    result_summary: Some(reason),
                    execution_time_ms: 0,
                    success: true,
                    error_message: None,
                },
            )
        })
    }

    /// Get a single event by id
    pub fn get_event(&self, id: EventId) -> Result<Option<ToolInvocationEvent>> {
        let conn = self.conn();
        conn.query_row(
            "SELECT * FROM tool_usage WHERE id = ?",
            [id],
            row_to_event,
        )
        .optional()
        .map_err(Error::from)
    }

    /// Events for a session (or the whole project when `None`), oldest first.
    pub fn get_tool_history(
        &self,
        session_id: Option<&str>,
        filter: &HistoryFilter,
    ) -> Result<Vec<ToolInvocationEvent>> {
        let conn = self.conn();

        let mut sql = String::from("SELECT * FROM tool_usage WHERE 1=1");
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = vec![];

        if let Some(session_id) = session_id {
            sql.push_str(" AND session_id = ?");
            params.push(Box::new(session_id.to_string()));
        }

        if !filter.include_resets {
            sql.push_str(" AND event_kind = 'invocation'");
        }

        if let Some(tool_name) = &filter.tool_name {
            sql.push_str(" AND tool_name = ?");
            params.push(Box::new(tool_name.clone()));
        }

        if let Some(act) = &filter.research_act {
            sql.push_str(" AND research_act = ?");
            params.push(Box::new(act.clone()));
        }

        if let Some(category) = &filter.research_category {
            sql.push_str(" AND research_category = ?");
            params.push(Box::new(category.clone()));
        }

        if let Some(success) = filter.success {
            sql.push_str(" AND success = ?");
            params.push(Box::new(success));
        }

        if let Some(since) = &filter.since {
            sql.push_str(" AND timestamp >= ?");
            params.push(Box::new(format_ts(*since)));
        }

        sql.push_str(" ORDER BY seq DESC");

        if let Some(limit) = filter.limit {
            sql.push_str(&format!(" LIMIT {}", limit));
        }

        let params_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();

        let mut stmt = conn.prepare(&sql)?;
        let mut events = stmt
            .query_map(params_refs.as_slice(), row_to_event)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        events.reverse();

        Ok(events)
    }

    /// Total number of invocation events in the store
    pub fn count_invocations(&self) -> Result<i64> {
        let conn = self.conn();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM tool_usage WHERE event_kind = 'invocation'",
            [],
            |r| r.get(0),
        )?;
        Ok(count)
    }
}

fn append_event(conn: &Connection, event: &NewEvent<'_>) -> Result<ToolInvocationEvent> {
    let last: Option<(i64, String)> = conn
        .query_row(
            "SELECT seq, timestamp FROM tool_usage ORDER BY seq DESC LIMIT 1",
            [],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()?;

    let mut timestamp = now();
    let seq = match &last {
        Some((last_seq, last_ts)) => {
            let last_ts = parse_ts(last_ts);
            if last_ts > timestamp {
                timestamp = last_ts;
            }
            last_seq + 1
        }
        None => 1,
    };

    // Events naming an unknown session are kept, detached from it
    let session_id = match event.session_id {
        Some(id) => {
            let exists: bool = conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM sessions WHERE id = ?)",
                [id],
                |r| r.get(0),
            )?;
            if !exists {
                tracing::warn!(session_id = id, "Event names unknown session, storing without it");
            }
            exists.then_some(id)
        }
        None => None,
    };

    conn.execute(
        r#"
        INSERT INTO tool_usage (seq, event_kind, session_id, tool_name, research_act,
                                research_category, args_digest, result_summary,
                                execution_time_ms, success, error_message, timestamp)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
        "#,
        params![
            seq,
            event.kind.as_str(),
            session_id,
            event.tool_name,
            event.research_act,
            event.research_category,
            event.args_digest,
            event.result_summary,
            event.execution_time_ms,
            event.success,
            event.error_message,
            format_ts(timestamp),
        ],
    )?;
    let id = conn.last_insert_rowid();

    if let Some(session_id) = session_id {
        conn.execute(
            "UPDATE sessions SET last_activity_at = ?1 WHERE id = ?2",
            params![format_ts(timestamp), session_id],
        )?;
    }

    Ok(ToolInvocationEvent {
        id,
        seq,
        kind: event.kind,
        session_id: session_id.map(str::to_string),
        tool_name: event.tool_name.to_string(),
        research_act: event.research_act.to_string(),
        research_category: event.research_category.to_string(),
        args_digest: event.args_digest.to_string(),
        result_summary: event.result_summary.map(str::to_string),
        execution_time_ms: event.execution_time_ms,
        success: event.success,
        error_message: event.error_message.map(str::to_string),
        timestamp,
    })
}

/// Aggregate of successful events in one category since its latest reset
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct CategoryActivity {
    pub distinct_tools: Vec<String>,
    pub event_count: i64,
    pub last_activity: Option<DateTime<Utc>>,
}

/// Seq of the most recent reset for a category, or 0.
fn last_reset_seq(conn: &Connection, act: &str, category: &str) -> Result<i64> {
    let seq: Option<i64> = conn.query_row(
        r#"
        SELECT MAX(seq) FROM tool_usage
        WHERE event_kind = 'category_reset' AND research_act = ?1 AND research_category = ?2
        "#,
        params![act, category],
        |r| r.get(0),
    )?;
    Ok(seq.unwrap_or(0))
}

/// Last event of any kind recorded against a category; 0 when there is none.
pub(crate) fn category_high_water(conn: &Connection, act: &str, category: &str) -> Result<i64> {
    let seq: Option<i64> = conn.query_row(
        "SELECT MAX(seq) FROM tool_usage WHERE research_act = ?1 AND research_category = ?2",
        params![act, category],
        |r| r.get(0),
    )?;
    Ok(seq.unwrap_or(0))
}

pub(crate) fn category_activity(
    conn: &Connection,
    act: &str,
    category: &str,
) -> Result<CategoryActivity> {
    let since_seq = last_reset_seq(conn, act, category)?;

    let mut stmt = conn.prepare(
        r#"
        SELECT tool_name, COUNT(*), MAX(timestamp) FROM tool_usage
        WHERE event_kind = 'invocation' AND success = 1
          AND research_act = ?1 AND research_category = ?2 AND seq > ?3
        GROUP BY tool_name
        ORDER BY tool_name
        "#,
    )?;
    let rows = stmt
        .query_map(params![act, category, since_seq], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, i64>(1)?,
                r.get::<_, String>(2)?,
            ))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut activity = CategoryActivity::default();
    for (tool, count, last) in rows {
        activity.distinct_tools.push(tool);
        activity.event_count += count;
        let last = parse_ts(&last);
        activity.last_activity = Some(activity.last_activity.map_or(last, |cur| cur.max(last)));
    }
    Ok(activity)
}

/// Distinct tools with a successful event in any category of `act` since
/// that category's latest reset.
pub(crate) fn act_distinct_tools(
    conn: &Connection,
    act: &str,
    categories: &[String],
) -> Result<usize> {
    let mut tools = std::collections::BTreeSet::new();
    for category in categories {
        tools.extend(category_activity(conn, act, category)?.distinct_tools);
    }
    Ok(tools.len())
}

/// The last `n` invocation events for a session (or the project), oldest first.
pub(crate) fn recent_invocations(
    conn: &Connection,
    session_id: Option<&str>,
    n: usize,
) -> Result<Vec<ToolInvocationEvent>> {
    let mut events = match session_id {
        Some(session_id) => {
            let mut stmt = conn.prepare(
                r#"
                SELECT * FROM tool_usage
                WHERE event_kind = 'invocation' AND session_id = ?1
                ORDER BY seq DESC LIMIT ?2
                "#,
            )?;
            let rows = stmt
                .query_map(params![session_id, n as i64], row_to_event)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows
        }
        None => {
            let mut stmt = conn.prepare(
                r#"
                SELECT * FROM tool_usage
                WHERE event_kind = 'invocation'
                ORDER BY seq DESC LIMIT ?1
                "#,
            )?;
            let rows = stmt
                .query_map(params![n as i64], row_to_event)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows
        }
    };
    events.reverse();
    Ok(events)
}

/// Categories touched by a session's invocation events
pub(crate) fn session_categories(
    conn: &Connection,
    session_id: Option<&str>,
) -> Result<Vec<(String, String)>> {
    let mut stmt = conn.prepare(
        r#"
        SELECT DISTINCT research_act, research_category FROM tool_usage
        WHERE event_kind = 'invocation' AND (?1 IS NULL OR session_id = ?1)
        "#,
    )?;
    let rows = stmt
        .query_map([session_id], |r| Ok((r.get(0)?, r.get(1)?)))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub(crate) fn row_to_event(row: &Row) -> rusqlite::Result<ToolInvocationEvent> {
    let timestamp_str: String = row.get("timestamp")?;

    Ok(ToolInvocationEvent {
        id: row.get("id")?,
        seq: row.get("seq")?,
        kind: enum_column(row, "event_kind")?,
        session_id: row.get("session_id")?,
        tool_name: row.get("tool_name")?,
        research_act: row.get("research_act")?,
        research_category: row.get("research_category")?,
        args_digest: row.get("args_digest")?,
        result_summary: row.get("result_summary")?,
        execution_time_ms: row.get("execution_time_ms")?,
        success: row.get("success")?,
        error_message: row.get("error_message")?,
        timestamp: parse_ts(&timestamp_str),
    })
}

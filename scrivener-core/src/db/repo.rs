//! Project store handle
//!
//! One SQLite file per project root, at `<root>/.scrivener/project.db`.
//! Every tool invocation opens its own handle and drops it before returning;
//! concurrent invocations coordinate only through SQLite transactions.

use crate::error::{Error, Result};
use crate::types::*;
use chrono::{DateTime, Duration, SecondsFormat, SubsecRound, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use serde::de::DeserializeOwned;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Directory whose presence marks a project root
pub const MARKER_DIR: &str = ".scrivener";

/// Store file name inside the marker directory
pub const STORE_FILE: &str = "project.db";

/// How long a writer waits on a locked store before giving up
const BUSY_TIMEOUT_MS: u64 = 5_000;

/// Current time at storage precision.
pub(crate) fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

/// Format a timestamp for storage.
///
/// Fixed microsecond precision keeps lexical order equal to time order.
pub(crate) fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse a stored timestamp.
pub(crate) fn parse_ts(value: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

pub(crate) fn parse_ts_opt(value: Option<String>) -> Option<DateTime<Utc>> {
    value
        .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

/// A stored value that does not decode, reported against its column.
fn bad_column(
    row: &Row,
    column: &str,
    err: impl Into<Box<dyn std::error::Error + Send + Sync>>,
) -> rusqlite::Error {
    let index = row.as_ref().column_index(column).unwrap_or(0);
    rusqlite::Error::FromSqlConversionFailure(index, Type::Text, err.into())
}

/// Read a TEXT column holding one of our enum names.
pub(crate) fn enum_column<T>(row: &Row, column: &str) -> rusqlite::Result<T>
where
    T: std::str::FromStr<Err = String>,
{
    let raw: String = row.get(column)?;
    raw.parse().map_err(|e: String| bad_column(row, column, e))
}

/// Read a TEXT column holding JSON.
pub(crate) fn json_column<T: DeserializeOwned>(row: &Row, column: &str) -> rusqlite::Result<T> {
    let raw: String = row.get(column)?;
    serde_json::from_str(&raw).map_err(|e| bad_column(row, column, e))
}

/// Stable project id derived from the canonical root path.
pub fn project_id_for(root: &Path) -> String {
    let mut hasher = Sha256::new();
    hasher.update(root.to_string_lossy().as_bytes());
    let digest = hasher.finalize();
    // Take first 16 bytes (32 hex chars)
    hex::encode(&digest[..16])
}

/// Whether `root` carries the project marker directory.
pub fn is_project_root(root: &Path) -> bool {
    root.join(MARKER_DIR).is_dir()
}

/// Path of the store file for a project root.
pub fn store_path(root: &Path) -> PathBuf {
    root.join(MARKER_DIR).join(STORE_FILE)
}

/// Handle to one project's relational store
pub struct ProjectStore {
    conn: Mutex<Connection>,
    root: Option<PathBuf>,
}

impl ProjectStore {
    /// Open (creating if needed) the store for a project root.
    ///
    /// The root directory must already exist; the marker directory is created.
    pub fn open(root: &Path) -> Result<Self> {
        if !root.is_dir() {
            return Err(Error::InvalidProjectRoot(root.to_path_buf()));
        }
        std::fs::create_dir_all(root.join(MARKER_DIR))?;

        let conn = Connection::open(store_path(root))?;
        conn.busy_timeout(std::time::Duration::from_millis(BUSY_TIMEOUT_MS))?;

        // Enable foreign keys and WAL mode so readers never block the writer
        conn.execute_batch(
            "
            PRAGMA foreign_keys = ON;
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            ",
        )?;
        super::schema::run_migrations(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
            root: Some(root.to_path_buf()),
        })
    }

    /// Open an in-memory store (for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute("PRAGMA foreign_keys = ON", [])?;
        super::schema::run_migrations(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            root: None,
        })
    }

    /// Project root this store was opened from (None for in-memory stores)
    pub fn root(&self) -> Option<&Path> {
        self.root.as_deref()
    }

    /// Lock the connection. A poisoned lock still guards a usable connection.
    pub(crate) fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `f` inside an IMMEDIATE transaction, committing on `Ok`.
    ///
    /// IMMEDIATE takes the write lock up front so concurrent invocations
    /// serialize on `busy_timeout` rather than failing at commit.
    pub(crate) fn write_tx<T>(
        &self,
        f: impl FnOnce(&rusqlite::Transaction<'_>) -> Result<T>,
    ) -> Result<T> {
        let mut conn = self.conn();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }

    /// [`write_tx`](Self::write_tx) that waits at most `wait` for the write
    /// lock. A store still locked after `wait` fails with `SQLITE_BUSY`.
    pub(crate) fn write_tx_within<T>(
        &self,
        wait: std::time::Duration,
        f: impl FnOnce(&rusqlite::Transaction<'_>) -> Result<T>,
    ) -> Result<T> {
        self.with_lock_wait(wait, |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let value = f(&tx)?;
            tx.commit()?;
            Ok(value)
        })
    }

    /// Run `f` with the busy timeout lowered to `wait`, then restore it.
    pub(crate) fn with_lock_wait<T>(
        &self,
        wait: std::time::Duration,
        f: impl FnOnce(&mut Connection) -> Result<T>,
    ) -> Result<T> {
        let mut conn = self.conn();
        conn.busy_timeout(wait)?;
        let result = f(&mut *conn);
        conn.busy_timeout(std::time::Duration::from_millis(BUSY_TIMEOUT_MS))?;
        result
    }

    // ============================================
    // Project operations
    // ============================================

    /// Insert the project row if absent and return the stored project.
    ///
    /// Projects are immutable once created: a second call with a different
    /// name or domain returns the original row.
    pub fn ensure_project(
        &self,
        root: &Path,
        name: Option<&str>,
        domain: Option<&str>,
    ) -> Result<Project> {
        let id = project_id_for(root);
        let name = name.map(str::to_string).unwrap_or_else(|| {
            root.file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| root.to_string_lossy().to_string())
        });

        let conn = self.conn();
        let inserted = conn.execute(
            r#"
            INSERT OR IGNORE INTO projects (id, root_path, name, domain, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            params![
                id,
                root.to_string_lossy().to_string(),
                name,
                domain,
                format_ts(now()),
            ],
        )?;
        if inserted > 0 {
            tracing::info!(project = %id, root = %root.display(), "Initialized project");
        }

        conn.query_row(
            "SELECT * FROM projects WHERE id = ?",
            [&id],
            Self::row_to_project,
        )
        .map_err(Error::from)
    }

    /// The project this store belongs to
    pub fn project(&self) -> Result<Project> {
        let conn = self.conn();
        conn.query_row(
            "SELECT * FROM projects ORDER BY created_at LIMIT 1",
            [],
            Self::row_to_project,
        )
        .optional()?
        .ok_or_else(|| Error::ProjectNotFound("store has no project".to_string()))
    }

    /// Get a project by ID
    pub fn get_project(&self, id: &str) -> Result<Option<Project>> {
        let conn = self.conn();
        conn.query_row(
            "SELECT * FROM projects WHERE id = ?",
            [id],
            Self::row_to_project,
        )
        .optional()
        .map_err(Error::from)
    }

    /// Fail with `ProjectNotFound` unless this store holds `project_id`
    pub fn require_project(&self, project_id: &str) -> Result<Project> {
        self.get_project(project_id)?
            .ok_or_else(|| Error::ProjectNotFound(project_id.to_string()))
    }

    fn row_to_project(row: &Row) -> rusqlite::Result<Project> {
        let root_str: String = row.get("root_path")?;
        let created_at_str: String = row.get("created_at")?;

        Ok(Project {
            id: row.get("id")?,
            root_path: PathBuf::from(root_str),
            name: row.get("name")?,
            domain: row.get("domain")?,
            created_at: parse_ts(&created_at_str),
        })
    }

    // ============================================
    // Session operations
    // ============================================

    /// Close the project's active session (if any) and insert a new active one.
    ///
    /// Both writes commit together, so no committed state ever holds two
    /// active sessions. The prior session becomes `abandoned` when it was idle
    /// longer than `inactivity`, otherwise `completed`.
    pub fn start_session(
        &self,
        project_id: &str,
        research_focus: &str,
        goals: &[String],
        inactivity: Duration,
    ) -> Result<(Session, Option<Session>)> {
        let goals_json = serde_json::to_string(goals)?;

        self.write_tx(|tx| {
            let now = now();
            let prior = tx
                .query_row(
                    "SELECT * FROM sessions WHERE project_id = ? AND status = 'active'",
                    [project_id],
                    Self::row_to_session,
                )
                .optional()?;

            let closed = match prior {
                Some(mut prior) => {
                    let status = if now.signed_duration_since(prior.last_seen()) > inactivity {
                        SessionStatus::Abandoned
                    } else {
                        SessionStatus::Completed
                    };
                    let ended_at = match status {
                        SessionStatus::Abandoned => prior.last_seen(),
                        _ => now,
                    };
                    tx.execute(
                        "UPDATE sessions SET status = ?1, ended_at = ?2 WHERE id = ?3",
                        params![status.as_str(), format_ts(ended_at), prior.id],
                    )?;
                    prior.status = status;
                    prior.ended_at = Some(ended_at);
                    Some(prior)
                }
                None => None,
            };

            let session = Session {
                id: uuid::Uuid::new_v4().to_string(),
                project_id: project_id.to_string(),
                research_focus: research_focus.to_string(),
                goals: goals.to_vec(),
                status: SessionStatus::Active,
                started_at: now,
                ended_at: None,
                last_activity_at: None,
            };
            tx.execute(
                r#"
                INSERT INTO sessions (id, project_id, research_focus, goals, status, started_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                "#,
                params![
                    session.id,
                    session.project_id,
                    session.research_focus,
                    goals_json,
                    session.status.as_str(),
                    format_ts(session.started_at),
                ],
            )?;

            Ok((session, closed))
        })
    }

    /// Move a session from `from` to `to`, stamping `ended_at` for terminal
    /// states. Returns false when the session was no longer in `from`.
    pub fn transition_session(
        &self,
        session_id: &str,
        from: SessionStatus,
        to: SessionStatus,
        ended_at: Option<DateTime<Utc>>,
    ) -> Result<bool> {
        let conn = self.conn();
        let changed = conn.execute(
            "UPDATE sessions SET status = ?1, ended_at = ?2 WHERE id = ?3 AND status = ?4",
            params![
                to.as_str(),
                ended_at.map(format_ts),
                session_id,
                from.as_str()
            ],
        )?;
        Ok(changed > 0)
    }

    /// Get a session by ID
    pub fn get_session(&self, id: &str) -> Result<Option<Session>> {
        let conn = self.conn();
        conn.query_row(
            "SELECT * FROM sessions WHERE id = ?",
            [id],
            Self::row_to_session,
        )
        .optional()
        .map_err(Error::from)
    }

    /// The persisted active session of a project
    pub fn get_active_session(&self, project_id: &str) -> Result<Option<Session>> {
        let conn = self.conn();
        conn.query_row(
            "SELECT * FROM sessions WHERE project_id = ? AND status = 'active'",
            [project_id],
            Self::row_to_session,
        )
        .optional()
        .map_err(Error::from)
    }

    /// Sessions of a project, newest first
    pub fn list_sessions(&self, project_id: &str, limit: Option<usize>) -> Result<Vec<Session>> {
        let conn = self.conn();
        let mut sql = String::from(
            "SELECT * FROM sessions WHERE project_id = ? ORDER BY started_at DESC, rowid DESC",
        );
        if let Some(limit) = limit {
            sql.push_str(&format!(" LIMIT {}", limit));
        }

        let mut stmt = conn.prepare(&sql)?;
        let sessions = stmt
            .query_map([project_id], Self::row_to_session)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(sessions)
    }

    pub(crate) fn row_to_session(row: &Row) -> rusqlite::Result<Session> {
        let started_at_str: String = row.get("started_at")?;

        Ok(Session {
            id: row.get("id")?,
            project_id: row.get("project_id")?,
            research_focus: row.get("research_focus")?,
            goals: json_column(row, "goals")?,
            status: enum_column(row, "status")?,
            started_at: parse_ts(&started_at_str),
            ended_at: parse_ts_opt(row.get("ended_at")?),
            last_activity_at: parse_ts_opt(row.get("last_activity_at")?),
        })
    }
}

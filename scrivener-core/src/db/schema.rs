//! Project store schema and migrations
//!
//! Uses SQLite with embedded migrations managed via PRAGMA user_version.

use rusqlite::Connection;

/// Current schema version
pub const SCHEMA_VERSION: i32 = 1;

/// SQL migrations, indexed by version number
const MIGRATIONS: &[&str] = &[
    // Version 1: Initial schema
    r#"
    -- ============================================
    -- Canonical records
    -- ============================================

    CREATE TABLE IF NOT EXISTS projects (
        id               TEXT PRIMARY KEY,
        root_path        TEXT NOT NULL UNIQUE,
        name             TEXT NOT NULL,
        domain           TEXT,
        created_at       TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS sessions (
        id               TEXT PRIMARY KEY,
        project_id       TEXT NOT NULL REFERENCES projects(id),
        research_focus   TEXT NOT NULL,
        goals            JSON NOT NULL,
        status           TEXT NOT NULL,      -- 'pending', 'active', 'completed', 'abandoned'
        started_at       TEXT NOT NULL,
        ended_at         TEXT,
        last_activity_at TEXT
    );

    -- At most one active session per project at any committed point
    CREATE UNIQUE INDEX IF NOT EXISTS idx_sessions_one_active
        ON sessions(project_id) WHERE status = 'active';
    CREATE INDEX IF NOT EXISTS idx_sessions_project ON sessions(project_id, started_at);

    -- Append-only: rows are never updated or deleted
    CREATE TABLE IF NOT EXISTS tool_usage (
        id                INTEGER PRIMARY KEY AUTOINCREMENT,
        seq               INTEGER NOT NULL UNIQUE,
        event_kind        TEXT NOT NULL,     -- 'invocation', 'category_reset'
        session_id        TEXT REFERENCES sessions(id),
        tool_name         TEXT NOT NULL,
        research_act      TEXT NOT NULL,
        research_category TEXT NOT NULL,
        args_digest       TEXT NOT NULL,
        result_summary    TEXT,
        execution_time_ms INTEGER NOT NULL,
        success           INTEGER NOT NULL,
        error_message     TEXT,
        timestamp         TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_tool_usage_session ON tool_usage(session_id, seq);
    CREATE INDEX IF NOT EXISTS idx_tool_usage_category
        ON tool_usage(research_act, research_category, seq);

    -- ============================================
    -- Derived (regenerable from tool_usage)
    -- ============================================

    CREATE TABLE IF NOT EXISTS research_progress (
        project_id            TEXT NOT NULL REFERENCES projects(id),
        research_act          TEXT NOT NULL,
        research_category     TEXT NOT NULL,
        completion_percentage REAL NOT NULL,
        distinct_tools_used   JSON NOT NULL,
        event_count           INTEGER NOT NULL,
        last_activity         TEXT,
        stale                 INTEGER NOT NULL DEFAULT 0,
        through_seq           INTEGER NOT NULL DEFAULT 0, -- last tool_usage.seq accounted for
        updated_at            TEXT NOT NULL,

        PRIMARY KEY (project_id, research_act, research_category)
    );

    CREATE INDEX IF NOT EXISTS idx_research_progress_stale
        ON research_progress(project_id) WHERE stale = 1;

    CREATE TABLE IF NOT EXISTS research_milestones (
        id               INTEGER PRIMARY KEY AUTOINCREMENT,
        project_id       TEXT NOT NULL REFERENCES projects(id),
        milestone_type   TEXT NOT NULL,
        milestone_key    TEXT NOT NULL,
        description      TEXT NOT NULL,
        achieved_at      TEXT NOT NULL,
        impact_score     REAL NOT NULL,

        UNIQUE(project_id, milestone_key)
    );

    CREATE TABLE IF NOT EXISTS workflow_recommendations (
        id                   INTEGER PRIMARY KEY AUTOINCREMENT,
        project_id           TEXT NOT NULL REFERENCES projects(id),
        session_id           TEXT REFERENCES sessions(id),
        current_act          TEXT NOT NULL,
        recommended_next_act TEXT NOT NULL,
        recommended_category TEXT NOT NULL,
        recommended_tools    JSON NOT NULL,
        pattern              TEXT NOT NULL,
        reasoning            TEXT NOT NULL,
        priority             INTEGER NOT NULL,
        status               TEXT NOT NULL,  -- 'pending', 'accepted', 'dismissed'
        through_seq          INTEGER NOT NULL DEFAULT 0,
        created_at           TEXT NOT NULL
    );

    -- At most one pending recommendation per (project, session)
    CREATE UNIQUE INDEX IF NOT EXISTS idx_recommendations_one_pending
        ON workflow_recommendations(project_id, COALESCE(session_id, ''))
        WHERE status = 'pending';
    CREATE INDEX IF NOT EXISTS idx_recommendations_session
        ON workflow_recommendations(project_id, session_id, id);
    "#,
];

/// Run all pending migrations
pub fn run_migrations(conn: &Connection) -> crate::error::Result<()> {
    let current_version: i32 = conn
        .query_row("PRAGMA user_version", [], |r| r.get(0))
        .unwrap_or(0);

    tracing::debug!(
        current_version,
        target_version = SCHEMA_VERSION,
        "Checking project store migrations"
    );

    for (i, migration) in MIGRATIONS.iter().enumerate() {
        let version = (i + 1) as i32;
        if version > current_version {
            tracing::info!(version, "Running migration");
            conn.execute_batch(migration)?;
            conn.execute_batch(&format!("PRAGMA user_version = {}", version))?;
        }
    }

    Ok(())
}

/// Get the current schema version from the database
pub fn get_schema_version(conn: &Connection) -> crate::error::Result<i32> {
    let version: i32 = conn.query_row("PRAGMA user_version", [], |r| r.get(0))?;
    Ok(version)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrations_idempotent() {
        let conn = Connection::open_in_memory().unwrap();

        run_migrations(&conn).unwrap();
        run_migrations(&conn).unwrap();

        let version = get_schema_version(&conn).unwrap();
        assert_eq!(version, SCHEMA_VERSION);
    }

    #[test]
    fn test_tables_created() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();

        let tables = [
            "projects",
            "sessions",
            "tool_usage",
            "research_progress",
            "workflow_recommendations",
            "research_milestones",
        ];

        for table in tables {
            let exists: i32 = conn
                .query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?",
                    [table],
                    |r| r.get(0),
                )
                .unwrap();
            assert_eq!(exists, 1, "Table {} should exist", table);
        }
    }

    #[test]
    fn test_single_active_session_enforced() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        conn.execute(
            "INSERT INTO projects (id, root_path, name, created_at) VALUES ('p', '/p', 'p', 'now')",
            [],
        )
        .unwrap();

        let insert = "INSERT INTO sessions (id, project_id, research_focus, goals, status, started_at)
                      VALUES (?1, 'p', 'focus', '[]', 'active', 'now')";
        conn.execute(insert, ["s1"]).unwrap();
        assert!(conn.execute(insert, ["s2"]).is_err());
    }

    #[test]
    fn test_milestone_key_unique() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        conn.execute(
            "INSERT INTO projects (id, root_path, name, created_at) VALUES ('p', '/p', 'p', 'now')",
            [],
        )
        .unwrap();

        let insert = "INSERT OR IGNORE INTO research_milestones
                      (project_id, milestone_type, milestone_key, description, achieved_at, impact_score)
                      VALUES ('p', 'category_threshold', 'category:x:threshold:25', 'd', 'now', 0.25)";
        assert_eq!(conn.execute(insert, []).unwrap(), 1);
        assert_eq!(conn.execute(insert, []).unwrap(), 0);
    }
}

//! Research session lifecycle
//!
//! Sessions move `pending -> active -> {completed, abandoned}`. There is no
//! background sweeper: a session idle past the inactivity threshold is
//! *reported* as abandoned by every query, and the status is written the
//! next time an operation touches the session.

use crate::config::SessionConfig;
use crate::db::ProjectStore;
use crate::error::{Error, Result};
use crate::types::{Session, SessionStatus};
use chrono::{DateTime, Duration, Utc};

/// Session operations for one project
pub struct SessionManager<'a> {
    store: &'a ProjectStore,
    project_id: String,
    inactivity: Duration,
}

impl<'a> SessionManager<'a> {
    pub fn new(store: &'a ProjectStore, project_id: &str, config: &SessionConfig) -> Self {
        Self::with_inactivity(
            store,
            project_id,
            Duration::minutes(i64::from(config.inactivity_minutes)),
        )
    }

    pub fn with_inactivity(store: &'a ProjectStore, project_id: &str, inactivity: Duration) -> Self {
        Self {
            store,
            project_id: project_id.to_string(),
            inactivity,
        }
    }

    /// Status as of `now`, without writing anything.
    pub fn effective(&self, mut session: Session, now: DateTime<Utc>) -> Session {
        if session.status == SessionStatus::Active && self.is_idle(&session, now) {
            session.status = SessionStatus::Abandoned;
            session.ended_at = Some(session.last_seen());
        }
        session
    }

    fn is_idle(&self, session: &Session, now: DateTime<Utc>) -> bool {
        now.signed_duration_since(session.last_seen()) > self.inactivity
    }

    /// Start a new active session, closing the current one.
    ///
    /// Returns the new session and the one it closed, if any.
    pub fn start_session(
        &self,
        research_focus: &str,
        goals: &[String],
    ) -> Result<(Session, Option<Session>)> {
        let (session, closed) =
            self.store
                .start_session(&self.project_id, research_focus, goals, self.inactivity)?;

        if let Some(closed) = &closed {
            tracing::info!(
                session_id = %closed.id,
                status = %closed.status,
                "Closed previous session"
            );
        }
        tracing::info!(session_id = %session.id, focus = research_focus, "Started session");
        Ok((session, closed))
    }

    /// Close a session as `completed` or `abandoned`.
    ///
    /// A session that has already lapsed is persisted as abandoned first, so
    /// completing it fails with `InvalidSessionTransition`.
    pub fn end_session(&self, session_id: &str, status: SessionStatus) -> Result<Session> {
        let session = self.touch(session_id)?;

        if !session.status.can_transition_to(status) || !status.is_terminal() {
            return Err(Error::InvalidSessionTransition {
                from: session.status.to_string(),
                to: status.to_string(),
            });
        }

        let ended_at = match status {
            SessionStatus::Abandoned => session.last_seen(),
            _ => Utc::now(),
        };
        if !self
            .store
            .transition_session(session_id, session.status, status, Some(ended_at))?
        {
            // Someone else closed it between our read and write
            let current = self.get_session(session_id)?;
            return Err(Error::InvalidSessionTransition {
                from: current.status.to_string(),
                to: status.to_string(),
            });
        }

        tracing::info!(session_id, status = %status, "Ended session");
        self.get_session(session_id)
    }

    /// A session of this project, with its effective status
    pub fn get_session(&self, session_id: &str) -> Result<Session> {
        let session = self.load(session_id)?;
        Ok(self.effective(session, Utc::now()))
    }

    /// The running session, if it has not lapsed
    pub fn active_session(&self) -> Result<Option<Session>> {
        let now = Utc::now();
        Ok(self
            .store
            .get_active_session(&self.project_id)?
            .map(|s| self.effective(s, now))
            .filter(|s| s.status == SessionStatus::Active))
    }

    /// Sessions of this project, newest first, with effective statuses
    pub fn list_sessions(&self, limit: Option<usize>) -> Result<Vec<Session>> {
        let now = Utc::now();
        Ok(self
            .store
            .list_sessions(&self.project_id, limit)?
            .into_iter()
            .map(|s| self.effective(s, now))
            .collect())
    }

    /// Persist a lapsed session as abandoned and return its current state.
    pub fn touch(&self, session_id: &str) -> Result<Session> {
        let session = self.load(session_id)?;
        let effective = self.effective(session.clone(), Utc::now());

        if effective.status != session.status {
            let changed = self.store.transition_session(
                session_id,
                session.status,
                effective.status,
                effective.ended_at,
            )?;
            if changed {
                tracing::info!(session_id, "Session lapsed, marked abandoned");
            }
            return self.load(session_id);
        }
        Ok(session)
    }

    fn load(&self, session_id: &str) -> Result<Session> {
        self.store
            .get_session(session_id)?
            .filter(|s| s.project_id == self.project_id)
            .ok_or_else(|| Error::SessionNotFound(session_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Project;
    use std::path::Path;

    fn setup() -> (ProjectStore, Project) {
        let store = ProjectStore::open_in_memory().unwrap();
        let project = store
            .ensure_project(Path::new("/research/thesis"), None, None)
            .unwrap();
        (store, project)
    }

    #[test]
    fn test_second_start_completes_first() {
        let (store, project) = setup();
        let sessions = SessionManager::new(&store, &project.id, &SessionConfig::default());

        let (first, _) = sessions.start_session("goal1", &[]).unwrap();
        let (second, closed) = sessions.start_session("goal2", &[]).unwrap();
        assert_eq!(closed.unwrap().id, first.id);

        let first = sessions.get_session(&first.id).unwrap();
        assert_eq!(first.status, SessionStatus::Completed);
        assert!(first.ended_at.is_some());
        assert_eq!(sessions.active_session().unwrap().unwrap().id, second.id);

        let active = sessions
            .list_sessions(None)
            .unwrap()
            .into_iter()
            .filter(|s| s.status == SessionStatus::Active)
            .count();
        assert_eq!(active, 1);
    }

    #[test]
    fn test_end_session() {
        let (store, project) = setup();
        let sessions = SessionManager::new(&store, &project.id, &SessionConfig::default());
        let (session, _) = sessions.start_session("goal", &[]).unwrap();

        let ended = sessions
            .end_session(&session.id, SessionStatus::Completed)
            .unwrap();
        assert_eq!(ended.status, SessionStatus::Completed);
        assert!(ended.ended_at.is_some());
        assert!(sessions.active_session().unwrap().is_none());

        let err = sessions
            .end_session(&session.id, SessionStatus::Abandoned)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidSessionTransition { .. }));
    }

    #[test]
    fn test_cannot_end_into_non_terminal_status() {
        let (store, project) = setup();
        let sessions = SessionManager::new(&store, &project.id, &SessionConfig::default());
        let (session, _) = sessions.start_session("goal", &[]).unwrap();
        assert!(sessions
            .end_session(&session.id, SessionStatus::Active)
            .is_err());
    }

    #[test]
    fn test_lapsed_session_is_reported_then_persisted() {
        let (store, project) = setup();
        let sessions = SessionManager::with_inactivity(&store, &project.id, Duration::milliseconds(-1));
        let (session, _) = sessions.start_session("goal", &[]).unwrap();

        // Queries report abandonment without writing it
        assert_eq!(
            sessions.get_session(&session.id).unwrap().status,
            SessionStatus::Abandoned
        );
        assert!(sessions.active_session().unwrap().is_none());
        assert_eq!(
            store.get_session(&session.id).unwrap().unwrap().status,
            SessionStatus::Active
        );

        // Touching persists it
        let touched = sessions.touch(&session.id).unwrap();
        assert_eq!(touched.status, SessionStatus::Abandoned);
        assert_eq!(
            store.get_session(&session.id).unwrap().unwrap().status,
            SessionStatus::Abandoned
        );
        assert!(matches!(
            sessions.end_session(&session.id, SessionStatus::Completed),
            Err(Error::InvalidSessionTransition { .. })
        ));
    }

    #[test]
    fn test_unknown_session() {
        let (store, project) = setup();
        let sessions = SessionManager::new(&store, &project.id, &SessionConfig::default());
        assert!(matches!(
            sessions.get_session("nope"),
            Err(Error::SessionNotFound(_))
        ));
    }
}

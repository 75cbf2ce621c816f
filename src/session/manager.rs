//! Chat session lifecycle
//!
//! One active session per (user, persona) pair, turn persistence in append
//! order, explicit end-of-session. The store's partial unique index backs
//! the one-active invariant; on a create race the loser re-reads instead of
//! failing.

use chrono::{Duration, Utc};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::errors::{MesmerError, Result};
use crate::store::{ChatSession, ExperienceDb, Role, TurnRecord};

/// Owns the chat-session state machine and message log
pub struct SessionManager {
    db: Arc<ExperienceDb>,
}

impl SessionManager {
    pub fn new(db: Arc<ExperienceDb>) -> Self {
        Self { db }
    }

    /// Return the existing active session for the pair, or create one.
    ///
    /// Two concurrent callers may both miss the lookup; the partial unique
    /// index rejects the second insert and that caller re-reads the winner's
    /// row.
    pub async fn get_or_create_session(
        &self,
        user_id: &str,
        persona_id: &str,
    ) -> Result<ChatSession> {
        if self.db.get_persona(persona_id).await?.is_none() {
            return Err(MesmerError::UnknownPersona(persona_id.to_string()));
        }

        if let Some(existing) = self.db.find_active_session(user_id, persona_id).await? {
            return Ok(existing);
        }

        let session = ChatSession::new(user_id, persona_id);
        match self.db.insert_session(&session).await {
            Ok(()) => {
                debug!(session_id = %session.id, %user_id, %persona_id, "session started");
                Ok(session)
            }
            Err(MesmerError::StoreUnavailable(e))
                if e.as_database_error()
                    .is_some_and(|db_err| db_err.is_unique_violation()) =>
            {
                // Lost the create race; the other caller's session wins.
                self.db
                    .find_active_session(user_id, persona_id)
                    .await?
                    .ok_or(MesmerError::StoreUnavailable(e))
            }
            Err(e) => Err(e),
        }
    }

    /// Append a turn to a session's transcript.
    ///
    /// Turns landing on an already-ended session are accepted; a warning is
    /// logged so a misbehaving caller is visible.
    pub async fn append_message(
        &self,
        session_id: &str,
        role: Role,
        content: &str,
    ) -> Result<TurnRecord> {
        let session = self
            .db
            .get_session(session_id)
            .await?
            .ok_or_else(|| MesmerError::UnknownSession(session_id.to_string()))?;

        if !session.active {
            warn!(%session_id, "appending a turn to an ended session");
        }

        self.db.append_turn(session_id, role, content).await
    }

    /// End a session. Idempotent in effect: re-ending leaves state
    /// unchanged.
    pub async fn end_session(&self, session_id: &str) -> Result<ChatSession> {
        let session = self.db.end_session(session_id, Utc::now()).await?;
        debug!(%session_id, message_count = session.message_count, "session ended");
        Ok(session)
    }

    /// Transcript in ascending timestamp order, ties broken by insertion
    /// order
    pub async fn list_messages(&self, session_id: &str) -> Result<Vec<TurnRecord>> {
        self.db.list_turns(session_id).await
    }

    /// Extension, not part of the core contract: close active sessions with
    /// no activity since `max_idle` ago. The embedding layer decides
    /// whether and how often to run this.
    pub async fn end_idle_sessions(&self, max_idle: Duration) -> Result<usize> {
        let cutoff = Utc::now() - max_idle;
        let stale = self.db.stale_active_sessions(cutoff).await?;
        let count = stale.len();
        for session in stale {
            warn!(session_id = %session.id, "reaping idle session");
            self.db.end_session(&session.id, Utc::now()).await?;
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn create_test_manager() -> (SessionManager, Arc<ExperienceDb>, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db = Arc::new(
            ExperienceDb::connect(&temp_dir.path().join("ledger.db"))
                .await
                .unwrap(),
        );
        db.ensure_persona("the_mentalist", "The Mentalist")
            .await
            .unwrap();
        (SessionManager::new(db.clone()), db, temp_dir)
    }

    #[tokio::test]
    async fn test_get_or_create_returns_same_session() {
        let (manager, _db, _temp) = create_test_manager().await;

        let first = manager
            .get_or_create_session("alice", "the_mentalist")
            .await
            .unwrap();
        let second = manager
            .get_or_create_session("alice", "the_mentalist")
            .await
            .unwrap();

        assert_eq!(first.id, second.id);
    }

    #[tokio::test]
    async fn test_new_session_after_end() {
        let (manager, _db, _temp) = create_test_manager().await;

        let first = manager
            .get_or_create_session("alice", "the_mentalist")
            .await
            .unwrap();
        manager.end_session(&first.id).await.unwrap();

        let second = manager
            .get_or_create_session("alice", "the_mentalist")
            .await
            .unwrap();
        assert_ne!(first.id, second.id);
    }

    #[tokio::test]
    async fn test_unknown_persona_rejected() {
        let (manager, _db, _temp) = create_test_manager().await;

        let result = manager.get_or_create_session("alice", "nobody").await;
        assert!(matches!(result, Err(MesmerError::UnknownPersona(_))));
    }

    #[tokio::test]
    async fn test_append_and_list_preserves_order() {
        let (manager, _db, _temp) = create_test_manager().await;
        let session = manager
            .get_or_create_session("alice", "the_mentalist")
            .await
            .unwrap();

        manager
            .append_message(&session.id, Role::User, "pick a card")
            .await
            .unwrap();
        manager
            .append_message(&session.id, Role::Agent, "the queen of hearts")
            .await
            .unwrap();
        manager
            .append_message(&session.id, Role::User, "no way!")
            .await
            .unwrap();

        let turns = manager.list_messages(&session.id).await.unwrap();
        assert_eq!(turns.len(), 3);
        assert_eq!(turns[0].content, "pick a card");
        assert_eq!(turns[1].role, Role::Agent);
        assert_eq!(turns[2].content, "no way!");
        assert!(turns.windows(2).all(|w| w[0].seq < w[1].seq));
    }

    #[tokio::test]
    async fn test_append_increments_message_count() {
        let (manager, db, _temp) = create_test_manager().await;
        let session = manager
            .get_or_create_session("alice", "the_mentalist")
            .await
            .unwrap();

        manager
            .append_message(&session.id, Role::User, "hello")
            .await
            .unwrap();
        manager
            .append_message(&session.id, Role::Agent, "welcome")
            .await
            .unwrap();

        let reloaded = db.get_session(&session.id).await.unwrap().unwrap();
        assert_eq!(reloaded.message_count, 2);
    }

    #[tokio::test]
    async fn test_append_unknown_session_fails() {
        let (manager, _db, _temp) = create_test_manager().await;

        let result = manager
            .append_message("no-such-session", Role::User, "hello")
            .await;
        assert!(matches!(result, Err(MesmerError::UnknownSession(_))));
    }

    #[tokio::test]
    async fn test_end_session_is_idempotent() {
        let (manager, _db, _temp) = create_test_manager().await;
        let session = manager
            .get_or_create_session("alice", "the_mentalist")
            .await
            .unwrap();

        let ended = manager.end_session(&session.id).await.unwrap();
        let again = manager.end_session(&session.id).await.unwrap();

        assert!(!ended.active);
        assert_eq!(ended.ended_at, again.ended_at);
    }

    #[tokio::test]
    async fn test_append_after_end_is_accepted() {
        let (manager, _db, _temp) = create_test_manager().await;
        let session = manager
            .get_or_create_session("alice", "the_mentalist")
            .await
            .unwrap();
        manager.end_session(&session.id).await.unwrap();

        let turn = manager
            .append_message(&session.id, Role::System, "post-session note")
            .await
            .unwrap();
        assert_eq!(turn.role, Role::System);
    }

    #[tokio::test]
    async fn test_idle_reaper_only_touches_stale_sessions() {
        let (manager, _db, _temp) = create_test_manager().await;
        let session = manager
            .get_or_create_session("alice", "the_mentalist")
            .await
            .unwrap();
        manager
            .append_message(&session.id, Role::User, "still here")
            .await
            .unwrap();

        // Nothing is older than an hour yet.
        let reaped = manager.end_idle_sessions(Duration::hours(1)).await.unwrap();
        assert_eq!(reaped, 0);

        // With a zero threshold everything is stale.
        let reaped = manager
            .end_idle_sessions(Duration::seconds(0))
            .await
            .unwrap();
        assert_eq!(reaped, 1);
    }
}

//! Experience ledger backed by SQLite
//!
//! Owns every entity the learning pipeline persists and the transactional
//! unit that keeps outcome writes, persona counters, and technique metrics
//! consistent. Persona and TechniqueMetric rows are the only entities
//! mutated by more than one logical operation; all read-modify-write cycles
//! on them run inside a single transaction so concurrent session ends
//! cannot lose updates.

pub mod models;

pub use models::{
    AnalysisSource, ChatSession, Outcome, Persona, Reaction, Role, TechniqueMetric, TurnRecord,
    GENERAL_INTERACTION,
};

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use crate::errors::{MesmerError, Result};

/// SQLite-backed store for the six learning entities
pub struct ExperienceDb {
    pool: SqlitePool,
}

impl ExperienceDb {
    /// Connect to (or create) the ledger database at the given path.
    ///
    /// Enables WAL mode and a small pool; writers serialize through
    /// SQLite's single-writer model, which is what isolates the
    /// experience-capture transaction.
    pub async fn connect(path: &Path) -> Result<Self> {
        let url = format!("sqlite:{}?mode=rwc", path.display());
        let options = SqliteConnectOptions::from_str(&url)
            .map_err(MesmerError::StoreUnavailable)?
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5))
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(2)
            .connect_with(options)
            .await?;

        sqlx::raw_sql(SCHEMA_V1).execute(&pool).await?;

        Ok(Self { pool })
    }

    // ---- personas ----

    /// Create the learning row for a persona if it does not exist yet,
    /// then return it.
    pub async fn ensure_persona(&self, id: &str, display_name: &str) -> Result<Persona> {
        sqlx::query(
            "INSERT OR IGNORE INTO personas \
             (id, display_name, experience_level, total_sessions, \
              known_successful_techniques, learning_enabled, last_session_at) \
             VALUES (?, ?, 0, 0, '[]', 1, NULL)",
        )
        .bind(id)
        .bind(display_name)
        .execute(&self.pool)
        .await?;

        self.get_persona(id)
            .await?
            .ok_or_else(|| MesmerError::UnknownPersona(id.to_string()))
    }

    pub async fn get_persona(&self, id: &str) -> Result<Option<Persona>> {
        let row = sqlx::query("SELECT * FROM personas WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(persona_from_row).transpose()
    }

    pub async fn set_learning_enabled(&self, id: &str, enabled: bool) -> Result<()> {
        let result = sqlx::query("UPDATE personas SET learning_enabled = ? WHERE id = ?")
            .bind(enabled)
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(MesmerError::UnknownPersona(id.to_string()));
        }
        Ok(())
    }

    // ---- sessions ----

    /// Most recent active session for the pair, if any
    pub async fn find_active_session(
        &self,
        user_id: &str,
        persona_id: &str,
    ) -> Result<Option<ChatSession>> {
        let row = sqlx::query(
            "SELECT * FROM chat_sessions \
             WHERE user_id = ? AND persona_id = ? AND active = 1 \
             ORDER BY started_at DESC, rowid DESC LIMIT 1",
        )
        .bind(user_id)
        .bind(persona_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(session_from_row).transpose()
    }

    /// Insert a new session row. Fails with a uniqueness violation if an
    /// active session already exists for the pair (see the partial unique
    /// index); callers handle that by re-reading.
    pub async fn insert_session(&self, session: &ChatSession) -> Result<()> {
        sqlx::query(
            "INSERT INTO chat_sessions \
             (id, user_id, persona_id, started_at, ended_at, active, message_count) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&session.id)
        .bind(&session.user_id)
        .bind(&session.persona_id)
        .bind(session.started_at)
        .bind(session.ended_at)
        .bind(session.active)
        .bind(session.message_count)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_session(&self, id: &str) -> Result<Option<ChatSession>> {
        let row = sqlx::query("SELECT * FROM chat_sessions WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(session_from_row).transpose()
    }

    /// Mark a session inactive. Idempotent in effect: an already-ended
    /// session keeps its original ended_at.
    pub async fn end_session(&self, id: &str, ended_at: DateTime<Utc>) -> Result<ChatSession> {
        sqlx::query(
            "UPDATE chat_sessions SET active = 0, ended_at = ? WHERE id = ? AND active = 1",
        )
        .bind(ended_at)
        .bind(id)
        .execute(&self.pool)
        .await?;

        self.get_session(id)
            .await?
            .ok_or_else(|| MesmerError::UnknownSession(id.to_string()))
    }

    /// Active sessions whose last activity (last turn, or start when empty)
    /// predates the cutoff
    pub async fn stale_active_sessions(&self, cutoff: DateTime<Utc>) -> Result<Vec<ChatSession>> {
        let rows = sqlx::query(
            "SELECT * FROM chat_sessions WHERE active = 1 AND COALESCE( \
               (SELECT MAX(created_at) FROM turns WHERE turns.session_id = chat_sessions.id), \
               started_at) < ?",
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(session_from_row).collect()
    }

    // ---- turns ----

    /// Append a turn and bump the session's message count in one
    /// transaction. Fails with UnknownSession if the session id is absent.
    pub async fn append_turn(
        &self,
        session_id: &str,
        role: Role,
        content: &str,
    ) -> Result<TurnRecord> {
        let created_at = Utc::now();
        let mut tx = self.pool.begin().await?;

        let exists = sqlx::query("SELECT id FROM chat_sessions WHERE id = ?")
            .bind(session_id)
            .fetch_optional(&mut *tx)
            .await?;
        if exists.is_none() {
            return Err(MesmerError::UnknownSession(session_id.to_string()));
        }

        let inserted = sqlx::query(
            "INSERT INTO turns (session_id, role, content, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(session_id)
        .bind(role.as_str())
        .bind(content)
        .bind(created_at)
        .execute(&mut *tx)
        .await?;

        sqlx::query("UPDATE chat_sessions SET message_count = message_count + 1 WHERE id = ?")
            .bind(session_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(TurnRecord {
            seq: inserted.last_insert_rowid(),
            session_id: session_id.to_string(),
            role,
            content: content.to_string(),
            created_at,
        })
    }

    /// Full transcript, ascending by timestamp with insertion order as the
    /// tie-break
    pub async fn list_turns(&self, session_id: &str) -> Result<Vec<TurnRecord>> {
        let exists = sqlx::query("SELECT id FROM chat_sessions WHERE id = ?")
            .bind(session_id)
            .fetch_optional(&self.pool)
            .await?;
        if exists.is_none() {
            return Err(MesmerError::UnknownSession(session_id.to_string()));
        }

        let rows = sqlx::query(
            "SELECT * FROM turns WHERE session_id = ? ORDER BY created_at ASC, id ASC",
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(turn_from_row).collect()
    }

    // ---- outcomes ----

    pub async fn get_outcome_for_session(&self, session_id: &str) -> Result<Option<Outcome>> {
        let row = sqlx::query("SELECT * FROM outcomes WHERE session_id = ?")
            .bind(session_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(outcome_from_row).transpose()
    }

    /// Most recent outcomes for a persona, newest first
    pub async fn recent_outcomes(&self, persona_id: &str, limit: i64) -> Result<Vec<Outcome>> {
        let rows = sqlx::query(
            "SELECT * FROM outcomes WHERE persona_id = ? \
             ORDER BY created_at DESC, rowid DESC LIMIT ?",
        )
        .bind(persona_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(outcome_from_row).collect()
    }

    /// Most recent outcomes scoped to one (user, persona) pair, newest first
    pub async fn recent_outcomes_for_user(
        &self,
        user_id: &str,
        persona_id: &str,
        limit: i64,
    ) -> Result<Vec<Outcome>> {
        let rows = sqlx::query(
            "SELECT * FROM outcomes WHERE user_id = ? AND persona_id = ? \
             ORDER BY created_at DESC, rowid DESC LIMIT ?",
        )
        .bind(user_id)
        .bind(persona_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(outcome_from_row).collect()
    }

    /// Total outcomes ever recorded for one (user, persona) pair
    pub async fn count_outcomes_for_user(&self, user_id: &str, persona_id: &str) -> Result<i64> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS n FROM outcomes WHERE user_id = ? AND persona_id = ?",
        )
        .bind(user_id)
        .bind(persona_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.try_get("n")?)
    }

    // ---- technique metrics ----

    pub async fn get_metric(
        &self,
        persona_id: &str,
        technique: &str,
    ) -> Result<Option<TechniqueMetric>> {
        let row =
            sqlx::query("SELECT * FROM technique_metrics WHERE persona_id = ? AND technique = ?")
                .bind(persona_id)
                .bind(technique)
                .fetch_optional(&self.pool)
                .await?;
        row.as_ref().map(metric_from_row).transpose()
    }

    /// Best techniques for a persona, ranked by success rate then volume
    pub async fn top_metrics(&self, persona_id: &str, limit: i64) -> Result<Vec<TechniqueMetric>> {
        let rows = sqlx::query(
            "SELECT * FROM technique_metrics WHERE persona_id = ? \
             ORDER BY success_rate DESC, total_attempts DESC LIMIT ?",
        )
        .bind(persona_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(metric_from_row).collect()
    }

    /// Record one attempt for a (persona, technique) pair as its own
    /// read-modify-write transaction
    pub async fn record_metric_attempt(
        &self,
        persona_id: &str,
        technique: &str,
        success: bool,
        rating: f64,
        now: DateTime<Utc>,
    ) -> Result<TechniqueMetric> {
        let mut tx = self.pool.begin().await?;
        let updated =
            upsert_metric_attempt(&mut tx, persona_id, technique, success, rating, now).await?;
        tx.commit().await?;
        Ok(updated)
    }

    // ---- experience capture ----

    /// Persist an outcome, update the owning persona's counters, and update
    /// the technique metric as one atomic unit. Either all three apply or
    /// none do.
    pub async fn apply_experience(&self, outcome: &Outcome, experience_gain: i64) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        insert_outcome(&mut tx, outcome).await?;

        let row = sqlx::query("SELECT * FROM personas WHERE id = ?")
            .bind(&outcome.persona_id)
            .fetch_optional(&mut *tx)
            .await?;
        let persona = match row.as_ref() {
            Some(row) => persona_from_row(row)?,
            None => return Err(MesmerError::UnknownPersona(outcome.persona_id.clone())),
        };

        let mut techniques = persona.known_successful_techniques;
        if outcome.reaction.is_success() && !techniques.contains(&outcome.technique_used) {
            techniques.push(outcome.technique_used.clone());
        }

        sqlx::query(
            "UPDATE personas SET \
               experience_level = experience_level + ?, \
               total_sessions = total_sessions + 1, \
               known_successful_techniques = ?, \
               last_session_at = ? \
             WHERE id = ?",
        )
        .bind(experience_gain)
        .bind(serde_json::to_string(&techniques)?)
        .bind(outcome.created_at)
        .bind(&outcome.persona_id)
        .execute(&mut *tx)
        .await?;

        upsert_metric_attempt(
            &mut tx,
            &outcome.persona_id,
            &outcome.technique_used,
            outcome.reaction.is_success(),
            outcome.reaction.rating(),
            outcome.created_at,
        )
        .await?;

        tx.commit().await?;
        Ok(())
    }
}

impl std::fmt::Debug for ExperienceDb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExperienceDb").finish_non_exhaustive()
    }
}

async fn insert_outcome(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    outcome: &Outcome,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO outcomes \
         (id, persona_id, user_id, session_id, sentiment, reaction, technique_used, \
          what_worked, what_did_not_work, lesson_learned, turn_count, duration_seconds, \
          key_moments, analyzed_by, created_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&outcome.id)
    .bind(&outcome.persona_id)
    .bind(&outcome.user_id)
    .bind(&outcome.session_id)
    .bind(outcome.sentiment)
    .bind(outcome.reaction.as_str())
    .bind(&outcome.technique_used)
    .bind(&outcome.what_worked)
    .bind(&outcome.what_did_not_work)
    .bind(&outcome.lesson_learned)
    .bind(outcome.turn_count)
    .bind(outcome.duration_seconds)
    .bind(serde_json::to_string(&outcome.key_moments)?)
    .bind(outcome.analyzed_by.as_str())
    .bind(outcome.created_at)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// Read-modify-write for one technique metric row, inside the caller's
/// transaction. Creates the row lazily on first attempt.
async fn upsert_metric_attempt(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    persona_id: &str,
    technique: &str,
    success: bool,
    rating: f64,
    now: DateTime<Utc>,
) -> Result<TechniqueMetric> {
    let row = sqlx::query("SELECT * FROM technique_metrics WHERE persona_id = ? AND technique = ?")
        .bind(persona_id)
        .bind(technique)
        .fetch_optional(&mut **tx)
        .await?;

    let updated = match row.as_ref() {
        Some(row) => {
            let mut metric = metric_from_row(row)?;
            metric.record(success, rating, now);
            metric
        }
        None => TechniqueMetric::first(persona_id, technique, success, rating, now),
    };

    sqlx::query(
        "INSERT INTO technique_metrics \
         (persona_id, technique, total_attempts, success_count, success_rate, \
          average_rating, last_updated_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?) \
         ON CONFLICT(persona_id, technique) DO UPDATE SET \
           total_attempts = excluded.total_attempts, \
           success_count = excluded.success_count, \
           success_rate = excluded.success_rate, \
           average_rating = excluded.average_rating, \
           last_updated_at = excluded.last_updated_at",
    )
    .bind(&updated.persona_id)
    .bind(&updated.technique)
    .bind(updated.total_attempts)
    .bind(updated.success_count)
    .bind(updated.success_rate)
    .bind(updated.average_rating)
    .bind(updated.last_updated_at)
    .execute(&mut **tx)
    .await?;

    Ok(updated)
}

// ---- row mapping ----

fn persona_from_row(row: &SqliteRow) -> Result<Persona> {
    let techniques_json: String = row.try_get("known_successful_techniques")?;
    Ok(Persona {
        id: row.try_get("id")?,
        display_name: row.try_get("display_name")?,
        experience_level: row.try_get("experience_level")?,
        total_sessions: row.try_get("total_sessions")?,
        known_successful_techniques: serde_json::from_str(&techniques_json)?,
        learning_enabled: row.try_get("learning_enabled")?,
        last_session_at: row.try_get("last_session_at")?,
    })
}

fn session_from_row(row: &SqliteRow) -> Result<ChatSession> {
    Ok(ChatSession {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        persona_id: row.try_get("persona_id")?,
        started_at: row.try_get("started_at")?,
        ended_at: row.try_get("ended_at")?,
        active: row.try_get("active")?,
        message_count: row.try_get("message_count")?,
    })
}

fn turn_from_row(row: &SqliteRow) -> Result<TurnRecord> {
    let role: String = row.try_get("role")?;
    Ok(TurnRecord {
        seq: row.try_get("id")?,
        session_id: row.try_get("session_id")?,
        role: Role::parse(&role)?,
        content: row.try_get("content")?,
        created_at: row.try_get("created_at")?,
    })
}

fn outcome_from_row(row: &SqliteRow) -> Result<Outcome> {
    let reaction: String = row.try_get("reaction")?;
    let analyzed_by: String = row.try_get("analyzed_by")?;
    let key_moments_json: String = row.try_get("key_moments")?;
    Ok(Outcome {
        id: row.try_get("id")?,
        persona_id: row.try_get("persona_id")?,
        user_id: row.try_get("user_id")?,
        session_id: row.try_get("session_id")?,
        sentiment: row.try_get("sentiment")?,
        reaction: Reaction::parse(&reaction)?,
        technique_used: row.try_get("technique_used")?,
        what_worked: row.try_get("what_worked")?,
        what_did_not_work: row.try_get("what_did_not_work")?,
        lesson_learned: row.try_get("lesson_learned")?,
        turn_count: row.try_get("turn_count")?,
        duration_seconds: row.try_get("duration_seconds")?,
        key_moments: serde_json::from_str(&key_moments_json)?,
        analyzed_by: AnalysisSource::parse(&analyzed_by)?,
        created_at: row.try_get("created_at")?,
    })
}

fn metric_from_row(row: &SqliteRow) -> Result<TechniqueMetric> {
    Ok(TechniqueMetric {
        persona_id: row.try_get("persona_id")?,
        technique: row.try_get("technique")?,
        total_attempts: row.try_get("total_attempts")?,
        success_count: row.try_get("success_count")?,
        success_rate: row.try_get("success_rate")?,
        average_rating: row.try_get("average_rating")?,
        last_updated_at: row.try_get("last_updated_at")?,
    })
}

/// Embedded ledger schema. All statements use IF NOT EXISTS so re-running
/// on connect is safe.
const SCHEMA_V1: &str = r#"
-- Persona learning state
CREATE TABLE IF NOT EXISTS personas (
    id TEXT PRIMARY KEY,
    display_name TEXT NOT NULL,
    experience_level INTEGER NOT NULL DEFAULT 0,
    total_sessions INTEGER NOT NULL DEFAULT 0,
    known_successful_techniques TEXT NOT NULL DEFAULT '[]',
    learning_enabled INTEGER NOT NULL DEFAULT 1,
    last_session_at TEXT
);

-- Conversational runs
CREATE TABLE IF NOT EXISTS chat_sessions (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    persona_id TEXT NOT NULL REFERENCES personas(id),
    started_at TEXT NOT NULL,
    ended_at TEXT,
    active INTEGER NOT NULL DEFAULT 1,
    message_count INTEGER NOT NULL DEFAULT 0
);
-- At most one active session per (user, persona) pair
CREATE UNIQUE INDEX IF NOT EXISTS idx_sessions_one_active
    ON chat_sessions(user_id, persona_id) WHERE active = 1;
CREATE INDEX IF NOT EXISTS idx_sessions_pair
    ON chat_sessions(user_id, persona_id, started_at);

-- Session transcripts, append-only
CREATE TABLE IF NOT EXISTS turns (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id TEXT NOT NULL REFERENCES chat_sessions(id),
    role TEXT NOT NULL,
    content TEXT NOT NULL,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_turns_session ON turns(session_id, created_at, id);

-- The append-only judgement ledger, one row per ended session. persona_id
-- is validated inside the capture transaction rather than by a foreign key.
CREATE TABLE IF NOT EXISTS outcomes (
    id TEXT PRIMARY KEY,
    persona_id TEXT NOT NULL,
    user_id TEXT NOT NULL,
    session_id TEXT NOT NULL UNIQUE REFERENCES chat_sessions(id),
    sentiment REAL NOT NULL,
    reaction TEXT NOT NULL,
    technique_used TEXT NOT NULL DEFAULT 'general_interaction',
    what_worked TEXT NOT NULL DEFAULT '',
    what_did_not_work TEXT NOT NULL DEFAULT '',
    lesson_learned TEXT NOT NULL DEFAULT '',
    turn_count INTEGER NOT NULL,
    duration_seconds REAL NOT NULL,
    key_moments TEXT NOT NULL DEFAULT '[]',
    analyzed_by TEXT NOT NULL,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_outcomes_persona ON outcomes(persona_id, created_at);
CREATE INDEX IF NOT EXISTS idx_outcomes_user ON outcomes(user_id, persona_id, created_at);

-- Per-(persona, technique) running statistics
CREATE TABLE IF NOT EXISTS technique_metrics (
    persona_id TEXT NOT NULL REFERENCES personas(id),
    technique TEXT NOT NULL,
    total_attempts INTEGER NOT NULL,
    success_count INTEGER NOT NULL,
    success_rate REAL NOT NULL,
    average_rating REAL NOT NULL,
    last_updated_at TEXT NOT NULL,
    PRIMARY KEY (persona_id, technique)
);
"#;

//! Domain entities for the experience ledger
//!
//! Persona accumulates learning state, ChatSession/TurnRecord hold the live
//! conversation, Outcome is the append-only judgement written once per ended
//! session, and TechniqueMetric carries the incrementally-maintained
//! per-technique statistics.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::{MesmerError, Result};

/// Sentinel technique attributed to sessions with no identifiable trick
pub const GENERAL_INTERACTION: &str = "general_interaction";

/// Audience reaction bucket, derived deterministically from sentiment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reaction {
    Amazed,
    Engaged,
    Neutral,
    Skeptical,
    Confused,
}

impl Reaction {
    /// Map a sentiment score in [-1, 1] to its reaction bucket.
    ///
    /// Thresholds are checked from the top so exact boundary values
    /// (0.7, 0.3, -0.3, -0.7) resolve to the higher bucket.
    pub fn from_sentiment(sentiment: f64) -> Self {
        if sentiment >= 0.7 {
            Reaction::Amazed
        } else if sentiment >= 0.3 {
            Reaction::Engaged
        } else if sentiment >= -0.3 {
            Reaction::Neutral
        } else if sentiment >= -0.7 {
            Reaction::Skeptical
        } else {
            Reaction::Confused
        }
    }

    /// Fixed rating used for the technique average
    pub fn rating(&self) -> f64 {
        match self {
            Reaction::Amazed => 5.0,
            Reaction::Engaged => 4.0,
            Reaction::Neutral => 3.0,
            Reaction::Skeptical => 2.0,
            Reaction::Confused => 1.0,
        }
    }

    /// Experience points awarded on top of the base gain
    pub fn experience_bonus(&self) -> i64 {
        match self {
            Reaction::Amazed => 20,
            Reaction::Engaged => 10,
            Reaction::Neutral => 5,
            Reaction::Skeptical | Reaction::Confused => 0,
        }
    }

    /// Amazed and engaged sessions count as successful attempts
    pub fn is_success(&self) -> bool {
        matches!(self, Reaction::Amazed | Reaction::Engaged)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Reaction::Amazed => "amazed",
            Reaction::Engaged => "engaged",
            Reaction::Neutral => "neutral",
            Reaction::Skeptical => "skeptical",
            Reaction::Confused => "confused",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "amazed" => Ok(Reaction::Amazed),
            "engaged" => Ok(Reaction::Engaged),
            "neutral" => Ok(Reaction::Neutral),
            "skeptical" => Ok(Reaction::Skeptical),
            "confused" => Ok(Reaction::Confused),
            other => Err(MesmerError::CorruptRecord(format!(
                "unknown reaction '{}'",
                other
            ))),
        }
    }
}

/// Author of a turn within a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Agent,
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Agent => "agent",
            Role::System => "system",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "user" => Ok(Role::User),
            "agent" => Ok(Role::Agent),
            "system" => Ok(Role::System),
            other => Err(MesmerError::CorruptRecord(format!(
                "unknown role '{}'",
                other
            ))),
        }
    }
}

/// Which path produced a session analysis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisSource {
    /// The external provider returned a parseable judgement
    External,
    /// The deterministic lexicon fallback substituted for it
    Heuristic,
}

impl AnalysisSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisSource::External => "external",
            AnalysisSource::Heuristic => "heuristic",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "external" => Ok(AnalysisSource::External),
            "heuristic" => Ok(AnalysisSource::Heuristic),
            other => Err(MesmerError::CorruptRecord(format!(
                "unknown analysis source '{}'",
                other
            ))),
        }
    }
}

/// A named agent profile accumulating learning state.
///
/// Created once at provisioning, mutated only by the experience store after
/// each session end, never deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Persona {
    pub id: String,
    pub display_name: String,
    /// Monotonic non-decreasing experience points
    pub experience_level: i64,
    pub total_sessions: i64,
    /// Grows only; techniques that have produced amazed/engaged reactions
    pub known_successful_techniques: Vec<String>,
    pub learning_enabled: bool,
    pub last_session_at: Option<DateTime<Utc>>,
}

/// One conversational run.
///
/// At most one active session exists per (user, persona) pair; the session
/// transitions to inactive exactly once and is immutable thereafter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatSession {
    pub id: String,
    pub user_id: String,
    pub persona_id: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub active: bool,
    pub message_count: i64,
}

impl ChatSession {
    pub fn new(user_id: impl Into<String>, persona_id: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            persona_id: persona_id.into(),
            started_at: Utc::now(),
            ended_at: None,
            active: true,
            message_count: 0,
        }
    }

    /// Wall-clock duration, to now if the session is still open
    pub fn duration_seconds(&self) -> f64 {
        let end = self.ended_at.unwrap_or_else(Utc::now);
        (end - self.started_at).num_milliseconds() as f64 / 1000.0
    }
}

/// One message within a session. Append-only, ordered by timestamp with
/// ties broken by insertion order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnRecord {
    /// Insertion sequence within the store (rowid)
    pub seq: i64,
    pub session_id: String,
    pub role: Role,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// The durable judgement produced once per ended session.
///
/// Never mutated or deleted afterward; this is the append-only ledger the
/// rest of the learning pipeline reads.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Outcome {
    pub id: String,
    pub persona_id: String,
    pub user_id: String,
    pub session_id: String,
    /// Judged sentiment in [-1, 1]
    pub sentiment: f64,
    pub reaction: Reaction,
    pub technique_used: String,
    pub what_worked: String,
    pub what_did_not_work: String,
    pub lesson_learned: String,
    pub turn_count: i64,
    pub duration_seconds: f64,
    pub key_moments: Vec<String>,
    pub analyzed_by: AnalysisSource,
    pub created_at: DateTime<Utc>,
}

/// Per-(persona, technique) running statistics.
///
/// Updated incrementally on every outcome, never recomputed from history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TechniqueMetric {
    pub persona_id: String,
    pub technique: String,
    pub total_attempts: i64,
    pub success_count: i64,
    /// Always exactly success_count / total_attempts
    pub success_rate: f64,
    /// Arithmetic mean of every rating ever recorded for the pair
    pub average_rating: f64,
    pub last_updated_at: DateTime<Utc>,
}

impl TechniqueMetric {
    /// First attempt for a fresh (persona, technique) pair
    pub fn first(
        persona_id: impl Into<String>,
        technique: impl Into<String>,
        success: bool,
        rating: f64,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            persona_id: persona_id.into(),
            technique: technique.into(),
            total_attempts: 1,
            success_count: if success { 1 } else { 0 },
            success_rate: if success { 1.0 } else { 0.0 },
            average_rating: rating,
            last_updated_at: now,
        }
    }

    /// Online update: exact running success rate and running mean rating.
    ///
    /// The mean update `(avg * n + rating) / (n + 1)` reproduces the
    /// arithmetic mean of all n+1 ratings without rescanning history.
    pub fn record(&mut self, success: bool, rating: f64, now: DateTime<Utc>) {
        let new_total = self.total_attempts + 1;
        if success {
            self.success_count += 1;
        }
        self.success_rate = self.success_count as f64 / new_total as f64;
        self.average_rating =
            (self.average_rating * self.total_attempts as f64 + rating) / new_total as f64;
        self.total_attempts = new_total;
        self.last_updated_at = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reaction_thresholds() {
        assert_eq!(Reaction::from_sentiment(1.0), Reaction::Amazed);
        assert_eq!(Reaction::from_sentiment(0.5), Reaction::Engaged);
        assert_eq!(Reaction::from_sentiment(0.0), Reaction::Neutral);
        assert_eq!(Reaction::from_sentiment(-0.5), Reaction::Skeptical);
        assert_eq!(Reaction::from_sentiment(-1.0), Reaction::Confused);
    }

    #[test]
    fn test_reaction_boundaries_resolve_upward() {
        assert_eq!(Reaction::from_sentiment(0.7), Reaction::Amazed);
        assert_eq!(Reaction::from_sentiment(0.3), Reaction::Engaged);
        assert_eq!(Reaction::from_sentiment(-0.3), Reaction::Neutral);
        assert_eq!(Reaction::from_sentiment(-0.7), Reaction::Skeptical);
    }

    #[test]
    fn test_reaction_ratings() {
        assert_eq!(Reaction::Amazed.rating(), 5.0);
        assert_eq!(Reaction::Engaged.rating(), 4.0);
        assert_eq!(Reaction::Neutral.rating(), 3.0);
        assert_eq!(Reaction::Skeptical.rating(), 2.0);
        assert_eq!(Reaction::Confused.rating(), 1.0);
    }

    #[test]
    fn test_reaction_roundtrip() {
        for r in [
            Reaction::Amazed,
            Reaction::Engaged,
            Reaction::Neutral,
            Reaction::Skeptical,
            Reaction::Confused,
        ] {
            assert_eq!(Reaction::parse(r.as_str()).unwrap(), r);
        }
        assert!(Reaction::parse("ecstatic").is_err());
    }

    #[test]
    fn test_role_roundtrip() {
        for role in [Role::User, Role::Agent, Role::System] {
            assert_eq!(Role::parse(role.as_str()).unwrap(), role);
        }
        assert!(Role::parse("narrator").is_err());
    }

    #[test]
    fn test_metric_first_attempt() {
        let now = Utc::now();
        let metric = TechniqueMetric::first("p1", "card_force", true, 5.0, now);
        assert_eq!(metric.total_attempts, 1);
        assert_eq!(metric.success_count, 1);
        assert_eq!(metric.success_rate, 1.0);
        assert_eq!(metric.average_rating, 5.0);
    }

    #[test]
    fn test_metric_online_update() {
        let now = Utc::now();
        let mut metric = TechniqueMetric::first("p1", "card_force", true, 5.0, now);
        metric.record(false, 2.0, now);

        assert_eq!(metric.total_attempts, 2);
        assert_eq!(metric.success_count, 1);
        assert_eq!(metric.success_rate, 0.5);
        assert_eq!(metric.average_rating, 3.5);
    }

    #[test]
    fn test_metric_mean_matches_full_recompute() {
        let now = Utc::now();
        let ratings = [5.0, 4.0, 1.0, 3.0, 2.0, 5.0, 5.0, 4.0];
        let mut metric = TechniqueMetric::first("p1", "cold_read", true, ratings[0], now);
        for &r in &ratings[1..] {
            metric.record(r >= 4.0, r, now);
        }

        let exact: f64 = ratings.iter().sum::<f64>() / ratings.len() as f64;
        assert!((metric.average_rating - exact).abs() < 1e-12);
        assert_eq!(metric.total_attempts as usize, ratings.len());
    }

    #[test]
    fn test_session_duration() {
        let mut session = ChatSession::new("u1", "p1");
        session.ended_at = Some(session.started_at + chrono::Duration::seconds(90));
        assert_eq!(session.duration_seconds(), 90.0);
    }
}

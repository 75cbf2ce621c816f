//! Experience capture
//!
//! Turns a session analysis into the durable Outcome record and applies it
//! to the owning persona's counters and technique metrics. The three writes
//! are one unit: an outcome without its counter updates (or the reverse)
//! must never be observable, so everything funnels through the store's
//! transactional apply.

use chrono::Utc;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::analysis::SessionAnalysis;
use crate::errors::Result;
use crate::store::{ExperienceDb, Outcome, Reaction, TurnRecord};

/// Experience points for one finished session.
///
/// Base 10, plus the reaction bonus, plus 5 for a non-empty lesson, plus
/// one point per turn beyond the tenth capped at 10.
pub fn experience_gain(reaction: Reaction, lesson_learned: &str, turn_count: i64) -> i64 {
    let lesson_bonus = if lesson_learned.trim().is_empty() { 0 } else { 5 };
    let stamina_bonus = (turn_count - 10).clamp(0, 10);
    10 + reaction.experience_bonus() + lesson_bonus + stamina_bonus
}

/// Persists one outcome per finished session and updates the owning
/// persona's cumulative counters
pub struct ExperienceStore {
    db: Arc<ExperienceDb>,
}

impl ExperienceStore {
    pub fn new(db: Arc<ExperienceDb>) -> Self {
        Self { db }
    }

    /// Record the judgement for an ended session.
    ///
    /// Builds the Outcome (written once, never updated), bumps the
    /// persona's session count and experience level, extends its known
    /// successful techniques on amazed/engaged reactions, and updates the
    /// technique metric row, all in one transaction.
    pub async fn capture_experience(
        &self,
        persona_id: &str,
        user_id: &str,
        session_id: &str,
        analysis: &SessionAnalysis,
        transcript: &[TurnRecord],
        duration_seconds: f64,
    ) -> Result<Outcome> {
        let reaction = analysis.reaction();
        let turn_count = transcript.len() as i64;

        let outcome = Outcome {
            id: Uuid::new_v4().to_string(),
            persona_id: persona_id.to_string(),
            user_id: user_id.to_string(),
            session_id: session_id.to_string(),
            sentiment: analysis.sentiment,
            reaction,
            technique_used: analysis.technique_used.clone(),
            what_worked: analysis.what_worked.clone(),
            what_did_not_work: analysis.what_did_not_work.clone(),
            lesson_learned: analysis.lesson_learned.clone(),
            turn_count,
            duration_seconds,
            key_moments: analysis.key_moments.clone(),
            analyzed_by: analysis.source,
            created_at: Utc::now(),
        };

        let gain = experience_gain(reaction, &outcome.lesson_learned, turn_count);
        self.db.apply_experience(&outcome, gain).await?;

        info!(
            %persona_id,
            %session_id,
            reaction = reaction.as_str(),
            technique = %outcome.technique_used,
            experience_gain = gain,
            "experience captured"
        );

        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gain_for_amazed_with_lesson() {
        // 10 base + 20 amazed + 5 lesson + 0 (six turns stay under the bar)
        assert_eq!(experience_gain(Reaction::Amazed, "smile more", 6), 35);
    }

    #[test]
    fn test_gain_for_confused_without_lesson() {
        assert_eq!(experience_gain(Reaction::Confused, "", 3), 10);
    }

    #[test]
    fn test_gain_counts_turns_beyond_ten() {
        assert_eq!(experience_gain(Reaction::Neutral, "", 14), 10 + 5 + 4);
    }

    #[test]
    fn test_gain_turn_bonus_caps_at_ten() {
        assert_eq!(experience_gain(Reaction::Engaged, "", 50), 10 + 10 + 10);
    }

    #[test]
    fn test_whitespace_lesson_earns_no_bonus() {
        assert_eq!(experience_gain(Reaction::Skeptical, "  \n", 1), 10);
    }
}

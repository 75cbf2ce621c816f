//! Relationship memory for one (user, persona) pair
//!
//! Same derivation style as the synthesizer, scoped to the outcomes shared
//! with a single user: how often we have performed for them, what they
//! respond to, and which moments are worth bringing up again.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;

use crate::errors::Result;
use crate::store::{ExperienceDb, Outcome, Reaction};

/// Briefing returned for a pair with no shared history
pub const NEW_USER_BRIEFING: &str =
    "This is a new audience member. No shared history yet; make a first impression.";

/// How many recent outcomes feed the mood average
pub const DEFAULT_RECENT_LIMIT: usize = 5;

/// How many outcomes are mined for topics and memorable moments
const MINING_WINDOW: i64 = 50;

/// Builds the "what we remember about this person" briefing
pub struct UserMemoryService {
    db: Arc<ExperienceDb>,
}

impl UserMemoryService {
    pub fn new(db: Arc<ExperienceDb>) -> Self {
        Self { db }
    }

    /// Summarize the relationship with one user. Returns the fixed "new
    /// user" sentinel when no outcomes exist for the pair.
    pub async fn generate_memory_summary(
        &self,
        user_id: &str,
        persona_id: &str,
    ) -> Result<String> {
        let total = self.db.count_outcomes_for_user(user_id, persona_id).await?;
        if total == 0 {
            return Ok(NEW_USER_BRIEFING.to_string());
        }

        let recent = self
            .db
            .recent_outcomes_for_user(user_id, persona_id, MINING_WINDOW)
            .await?;
        Ok(render_memory(total, &recent, Utc::now()))
    }
}

/// Render the relationship briefing from a newest-first window
pub fn render_memory(total: i64, outcomes: &[Outcome], now: DateTime<Utc>) -> String {
    let mut out = String::new();
    out.push_str("=== AUDIENCE MEMORY ===\n");
    out.push_str(&format!(
        "Sessions together: {} (last one {} day{} ago)\n",
        total,
        recency_days(outcomes[0].created_at, now),
        if recency_days(outcomes[0].created_at, now) == 1 {
            ""
        } else {
            "s"
        }
    ));

    let favorites = favorite_techniques(outcomes, 3);
    if !favorites.is_empty() {
        out.push_str(&format!("Favorite topics: {}\n", favorites.join(", ")));
    }

    out.push_str(&format!(
        "Overall mood: {}\n",
        mood_label(recent_mean_sentiment(outcomes, DEFAULT_RECENT_LIMIT))
    ));

    let memorable = memorable_outcomes(outcomes, 3);
    if !memorable.is_empty() {
        out.push_str("Memorable moments:\n");
        for outcome in memorable {
            let days = recency_days(outcome.created_at, now);
            let note = if outcome.what_worked.trim().is_empty() {
                outcome.lesson_learned.trim()
            } else {
                outcome.what_worked.trim()
            };
            out.push_str(&format!(
                "  - {} days ago ({}): {}\n",
                days,
                outcome.reaction.as_str(),
                note
            ));
        }
    }

    out
}

/// Whole days elapsed since a timestamp; today counts as 0
pub fn recency_days(then: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    (now - then).num_days().max(0)
}

/// Up to `limit` distinct techniques, most frequent first
fn favorite_techniques(outcomes: &[Outcome], limit: usize) -> Vec<String> {
    let mut order: Vec<&str> = Vec::new();
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for outcome in outcomes {
        let count = counts.entry(outcome.technique_used.as_str()).or_insert(0);
        if *count == 0 {
            order.push(outcome.technique_used.as_str());
        }
        *count += 1;
    }
    order.sort_by(|a, b| counts[b].cmp(&counts[a]).then(a.cmp(b)));
    order.truncate(limit);
    order.into_iter().map(str::to_string).collect()
}

/// Mean sentiment of the most recent `limit` outcomes
fn recent_mean_sentiment(outcomes: &[Outcome], limit: usize) -> f64 {
    let recent: Vec<f64> = outcomes.iter().take(limit).map(|o| o.sentiment).collect();
    recent.iter().sum::<f64>() / recent.len() as f64
}

/// Qualitative label for the mood average, reusing the reaction thresholds
fn mood_label(mean_sentiment: f64) -> &'static str {
    match Reaction::from_sentiment(mean_sentiment) {
        Reaction::Amazed => "absolutely loves the performances",
        Reaction::Engaged => "consistently enjoys the shows",
        Reaction::Neutral => "polite but hard to read",
        Reaction::Skeptical => "remains hard to impress",
        Reaction::Confused => "often left puzzled",
    }
}

/// Up to `limit` outcomes worth mentioning again: amazed reactions or ones
/// that taught a lesson
fn memorable_outcomes(outcomes: &[Outcome], limit: usize) -> Vec<&Outcome> {
    outcomes
        .iter()
        .filter(|o| o.reaction == Reaction::Amazed || !o.lesson_learned.trim().is_empty())
        .take(limit)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::AnalysisSource;
    use chrono::Duration;

    fn outcome(technique: &str, sentiment: f64, lesson: &str, days_ago: i64) -> Outcome {
        let created = Utc::now() - Duration::days(days_ago);
        Outcome {
            id: uuid::Uuid::new_v4().to_string(),
            persona_id: "p1".to_string(),
            user_id: "u1".to_string(),
            session_id: uuid::Uuid::new_v4().to_string(),
            sentiment,
            reaction: Reaction::from_sentiment(sentiment),
            technique_used: technique.to_string(),
            what_worked: "the big reveal".to_string(),
            what_did_not_work: String::new(),
            lesson_learned: lesson.to_string(),
            turn_count: 8,
            duration_seconds: 120.0,
            key_moments: Vec::new(),
            analyzed_by: AnalysisSource::External,
            created_at: created,
        }
    }

    #[test]
    fn test_recency_today_is_zero_days() {
        assert_eq!(recency_days(Utc::now(), Utc::now()), 0);
    }

    #[test]
    fn test_recency_counts_whole_days() {
        let now = Utc::now();
        assert_eq!(recency_days(now - Duration::days(3), now), 3);
        assert_eq!(recency_days(now - Duration::hours(30), now), 1);
    }

    #[test]
    fn test_favorite_techniques_most_frequent_first() {
        let outcomes = vec![
            outcome("cold_read", 0.5, "", 0),
            outcome("card_force", 0.5, "", 1),
            outcome("card_force", 0.5, "", 2),
            outcome("spoon_bend", 0.5, "", 3),
            outcome("mind_map", 0.5, "", 4),
        ];
        let favorites = favorite_techniques(&outcomes, 3);
        assert_eq!(favorites.len(), 3);
        assert_eq!(favorites[0], "card_force");
    }

    #[test]
    fn test_mood_uses_recent_window_only() {
        // Five glowing recent sessions should mask one old disaster.
        let mut outcomes: Vec<Outcome> =
            (0..5).map(|i| outcome("card_force", 0.9, "", i)).collect();
        outcomes.push(outcome("card_force", -1.0, "", 30));

        let mean = recent_mean_sentiment(&outcomes, DEFAULT_RECENT_LIMIT);
        assert!((mean - 0.9).abs() < 1e-9);
        assert_eq!(mood_label(mean), "absolutely loves the performances");
    }

    #[test]
    fn test_memorable_prefers_amazed_and_lessons() {
        let outcomes = vec![
            outcome("card_force", 0.0, "", 0),
            outcome("card_force", 0.9, "", 1),
            outcome("card_force", 0.0, "ask their name first", 2),
            outcome("card_force", 0.0, "", 3),
        ];
        let memorable = memorable_outcomes(&outcomes, 3);
        assert_eq!(memorable.len(), 2);
    }

    #[test]
    fn test_render_memory_mentions_counts_and_topics() {
        let outcomes = vec![
            outcome("card_force", 0.9, "lead with confidence", 0),
            outcome("card_force", 0.8, "", 2),
        ];
        let text = render_memory(2, &outcomes, Utc::now());
        assert!(text.contains("Sessions together: 2"));
        assert!(text.contains("card_force"));
        assert!(text.contains("Memorable moments:"));
        assert!(text.contains("0 days ago"));
    }
}

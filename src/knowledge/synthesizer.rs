//! Knowledge synthesis over historical outcomes
//!
//! Mines the most recent window of outcome records for a persona and
//! assembles a natural-language briefing for reuse as model context. All
//! derivations are read-side only and recomputed on every call; nothing
//! here persists intermediate state. The word-frequency mining is a
//! best-effort heuristic layer over free text: its output is advisory
//! briefing prose, not structured data other components may rely on.

use std::collections::HashMap;
use std::sync::Arc;

use crate::errors::Result;
use crate::store::{ExperienceDb, Outcome, Reaction};

/// Briefing returned when a persona has no recorded outcomes yet
pub const NO_EXPERIENCE_BRIEFING: &str =
    "No performance experience recorded yet. Rely on core persona instincts.";

/// Minimum word length considered meaningful for context mining
const MIN_CONTEXT_WORD_LEN: usize = 5;

/// Fraction thresholds for the audience-preference heuristics
const QUICK_ENGAGEMENT_THRESHOLD: f64 = 0.2;
const LONG_FORM_THRESHOLD: f64 = 0.3;
const POSITIVITY_THRESHOLD: f64 = 0.6;

/// One ranked technique with its mined context
#[derive(Debug, Clone)]
pub struct TechniqueSummary {
    pub technique: String,
    pub attempts: usize,
    pub success_rate: f64,
    /// Up to 3 frequent words from the group's key moments and notes
    pub best_contexts: Vec<String>,
    /// Most recent non-empty lesson in the group
    pub key_insight: Option<String>,
}

/// A lesson repeated across amazed sessions
#[derive(Debug, Clone)]
pub struct LessonRefinement {
    /// First three words of the lesson, used as its working name
    pub label: String,
    pub lesson: String,
    pub occurrences: usize,
}

/// One triggered audience-preference heuristic
#[derive(Debug, Clone)]
pub struct PreferencePattern {
    pub description: String,
    pub percentage: f64,
}

/// One observed recovery strategy
#[derive(Debug, Clone)]
pub struct RecoveryStrategy {
    pub name: String,
    pub description: String,
    pub effectiveness: f64,
}

/// A time-of-day bucket with notably positive sessions
#[derive(Debug, Clone)]
pub struct TimeOfDayInsight {
    pub period: &'static str,
    pub samples: usize,
    pub mean_sentiment: f64,
}

/// Everything the synthesizer derives from one window
#[derive(Debug, Clone)]
pub struct LearningsReport {
    pub window: usize,
    pub top_techniques: Vec<TechniqueSummary>,
    pub refinements: Vec<LessonRefinement>,
    pub preference_patterns: Vec<PreferencePattern>,
    pub recovery_strategies: Vec<RecoveryStrategy>,
    pub time_insights: Vec<TimeOfDayInsight>,
}

/// Mines recent outcomes into a reusable briefing
pub struct KnowledgeSynthesizer {
    db: Arc<ExperienceDb>,
}

impl KnowledgeSynthesizer {
    pub fn new(db: Arc<ExperienceDb>) -> Self {
        Self { db }
    }

    /// Produce the "lessons learned" briefing for a persona from its most
    /// recent `window_size` outcomes. Returns the fixed sentinel when the
    /// persona has no history.
    pub async fn synthesize_learnings(
        &self,
        persona_id: &str,
        window_size: i64,
    ) -> Result<String> {
        let outcomes = self.db.recent_outcomes(persona_id, window_size).await?;
        if outcomes.is_empty() {
            return Ok(NO_EXPERIENCE_BRIEFING.to_string());
        }
        Ok(build_report(&outcomes).render())
    }

    /// Structured form of the same derivation, for callers that want the
    /// pieces rather than the rendered text
    pub async fn learnings_report(
        &self,
        persona_id: &str,
        window_size: i64,
    ) -> Result<Option<LearningsReport>> {
        let outcomes = self.db.recent_outcomes(persona_id, window_size).await?;
        if outcomes.is_empty() {
            return Ok(None);
        }
        Ok(Some(build_report(&outcomes)))
    }
}

/// Derive the full report from a window ordered newest first
pub fn build_report(outcomes: &[Outcome]) -> LearningsReport {
    LearningsReport {
        window: outcomes.len(),
        top_techniques: top_techniques(outcomes),
        refinements: refinements(outcomes),
        preference_patterns: preference_patterns(outcomes),
        recovery_strategies: recovery_strategies(outcomes),
        time_insights: time_insights(outcomes),
    }
}

/// Group by technique, rank by success rate then attempts, keep the top 5
fn top_techniques(outcomes: &[Outcome]) -> Vec<TechniqueSummary> {
    // Preserve first-seen (most recent) order for stable grouping.
    let mut order: Vec<&str> = Vec::new();
    let mut groups: HashMap<&str, Vec<&Outcome>> = HashMap::new();
    for outcome in outcomes {
        let entry = groups.entry(outcome.technique_used.as_str()).or_default();
        if entry.is_empty() {
            order.push(outcome.technique_used.as_str());
        }
        entry.push(outcome);
    }

    let mut summaries: Vec<TechniqueSummary> = order
        .into_iter()
        .map(|technique| {
            let group = &groups[technique];
            let successes = group.iter().filter(|o| o.reaction.is_success()).count();
            let context_text: Vec<&str> = group
                .iter()
                .flat_map(|o| {
                    o.key_moments
                        .iter()
                        .map(String::as_str)
                        .chain(std::iter::once(o.what_worked.as_str()))
                })
                .collect();
            // Window is newest-first, so the first non-empty lesson is the
            // most recent one.
            let key_insight = group
                .iter()
                .map(|o| o.lesson_learned.trim())
                .find(|l| !l.is_empty())
                .map(str::to_string);

            TechniqueSummary {
                technique: technique.to_string(),
                attempts: group.len(),
                success_rate: successes as f64 / group.len() as f64,
                best_contexts: frequent_words(&context_text, 3),
                key_insight,
            }
        })
        .collect();

    summaries.sort_by(|a, b| {
        b.success_rate
            .partial_cmp(&a.success_rate)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(b.attempts.cmp(&a.attempts))
            .then(a.technique.cmp(&b.technique))
    });
    summaries.truncate(5);
    summaries
}

/// Lessons that keep recurring in amazed sessions, top 3 by frequency
fn refinements(outcomes: &[Outcome]) -> Vec<LessonRefinement> {
    let mut order: Vec<&str> = Vec::new();
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for outcome in outcomes {
        let lesson = outcome.lesson_learned.trim();
        if outcome.reaction == Reaction::Amazed && !lesson.is_empty() {
            let count = counts.entry(lesson).or_insert(0);
            if *count == 0 {
                order.push(lesson);
            }
            *count += 1;
        }
    }

    let mut refined: Vec<LessonRefinement> = order
        .into_iter()
        .map(|lesson| LessonRefinement {
            label: lesson.split_whitespace().take(3).collect::<Vec<_>>().join(" "),
            lesson: lesson.to_string(),
            occurrences: counts[lesson],
        })
        .collect();
    refined.sort_by(|a, b| b.occurrences.cmp(&a.occurrences).then(a.lesson.cmp(&b.lesson)));
    refined.truncate(3);
    refined
}

/// The three fixed audience-preference heuristics; a baseline pattern when
/// none of them trigger
fn preference_patterns(outcomes: &[Outcome]) -> Vec<PreferencePattern> {
    let total = outcomes.len() as f64;
    let mut patterns = Vec::new();

    let quick = outcomes
        .iter()
        .filter(|o| o.turn_count <= 5 && o.reaction == Reaction::Amazed)
        .count() as f64
        / total;
    if quick > QUICK_ENGAGEMENT_THRESHOLD {
        patterns.push(PreferencePattern {
            description: "audiences are amazed quickly; lead with a strong opener".to_string(),
            percentage: quick * 100.0,
        });
    }

    let long_form = outcomes.iter().filter(|o| o.turn_count > 15).count() as f64 / total;
    if long_form > LONG_FORM_THRESHOLD {
        patterns.push(PreferencePattern {
            description: "audiences stay for long performances; build slow arcs".to_string(),
            percentage: long_form * 100.0,
        });
    }

    let positive = outcomes.iter().filter(|o| o.sentiment > 0.5).count() as f64 / total;
    if positive > POSITIVITY_THRESHOLD {
        patterns.push(PreferencePattern {
            description: "sessions trend strongly positive overall".to_string(),
            percentage: positive * 100.0,
        });
    }

    if patterns.is_empty() {
        patterns.push(PreferencePattern {
            description: "still gathering data on audience preferences".to_string(),
            percentage: 0.0,
        });
    }
    patterns
}

/// Pivot-recovery and skeptical-transition scans; a baseline strategy when
/// neither applies
fn recovery_strategies(outcomes: &[Outcome]) -> Vec<RecoveryStrategy> {
    let total = outcomes.len() as f64;
    let mut strategies = Vec::new();

    // Sessions that noted both a failure and a save, ending at least
    // neutral, count as recovered.
    let recovered = outcomes
        .iter()
        .filter(|o| {
            !o.what_worked.trim().is_empty()
                && !o.what_did_not_work.trim().is_empty()
                && matches!(o.reaction, Reaction::Engaged | Reaction::Neutral)
        })
        .count();
    if recovered > 0 {
        strategies.push(RecoveryStrategy {
            name: "pivot mid-performance".to_string(),
            description: "dropping what fails and switching to what lands saves the session"
                .to_string(),
            effectiveness: recovered as f64 / total,
        });
    }

    // Adjacent-pair scan over the recency-ordered window.
    let transitions = outcomes
        .windows(2)
        .filter(|pair| {
            pair[0].reaction == Reaction::Skeptical && pair[1].reaction != Reaction::Skeptical
        })
        .count();
    if transitions > 0 {
        strategies.push(RecoveryStrategy {
            name: "win over skeptical audiences".to_string(),
            description: "skeptical sessions are followed by better ones; persistence pays"
                .to_string(),
            effectiveness: transitions as f64 / total,
        });
    }

    if strategies.is_empty() {
        strategies.push(RecoveryStrategy {
            name: "baseline".to_string(),
            description: "no recovery patterns observed yet; stay adaptable".to_string(),
            effectiveness: 0.0,
        });
    }
    strategies
}

/// Time-of-day buckets with more than 3 samples and mean sentiment above
/// 0.6, capped at 3; a baseline insight otherwise
fn time_insights(outcomes: &[Outcome]) -> Vec<TimeOfDayInsight> {
    use chrono::Timelike;

    let mut buckets: HashMap<&'static str, Vec<f64>> = HashMap::new();
    for outcome in outcomes {
        let period = match outcome.created_at.hour() {
            5..=11 => "morning",
            12..=17 => "afternoon",
            _ => "evening",
        };
        buckets.entry(period).or_default().push(outcome.sentiment);
    }

    let mut insights: Vec<TimeOfDayInsight> = ["morning", "afternoon", "evening"]
        .iter()
        .filter_map(|&period| {
            let sentiments = buckets.get(period)?;
            if sentiments.len() <= 3 {
                return None;
            }
            let mean = sentiments.iter().sum::<f64>() / sentiments.len() as f64;
            (mean > 0.6).then(|| TimeOfDayInsight {
                period,
                samples: sentiments.len(),
                mean_sentiment: mean,
            })
        })
        .collect();
    insights.truncate(3);

    if insights.is_empty() {
        insights.push(TimeOfDayInsight {
            period: "any time",
            samples: outcomes.len(),
            mean_sentiment: 0.0,
        });
    }
    insights
}

/// Up to `limit` most frequent words longer than 4 characters
fn frequent_words(texts: &[&str], limit: usize) -> Vec<String> {
    let mut order: Vec<String> = Vec::new();
    let mut counts: HashMap<String, usize> = HashMap::new();
    for text in texts {
        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| w.chars().count() >= MIN_CONTEXT_WORD_LEN)
        {
            let word = word.to_lowercase();
            let count = counts.entry(word.clone()).or_insert(0);
            if *count == 0 {
                order.push(word);
            }
            *count += 1;
        }
    }

    order.sort_by(|a, b| counts[b].cmp(&counts[a]).then(a.cmp(b)));
    order.truncate(limit);
    order
}

impl LearningsReport {
    /// Render the report as one briefing block for model context
    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!(
            "=== LEARNED PERFORMANCE NOTES (last {} sessions) ===\n",
            self.window
        ));

        out.push_str("\nTop techniques:\n");
        for (i, t) in self.top_techniques.iter().enumerate() {
            out.push_str(&format!(
                "  {}. {} - {:.0}% success over {} attempt{}\n",
                i + 1,
                t.technique,
                t.success_rate * 100.0,
                t.attempts,
                if t.attempts == 1 { "" } else { "s" }
            ));
            if !t.best_contexts.is_empty() {
                out.push_str(&format!(
                    "     works best around: {}\n",
                    t.best_contexts.join(", ")
                ));
            }
            if let Some(insight) = &t.key_insight {
                out.push_str(&format!("     key insight: {}\n", insight));
            }
        }

        if !self.refinements.is_empty() {
            out.push_str("\nRefined lessons:\n");
            for r in &self.refinements {
                out.push_str(&format!(
                    "  - \"{}\" (seen {}x): {}\n",
                    r.label, r.occurrences, r.lesson
                ));
            }
        }

        out.push_str("\nAudience preferences:\n");
        for p in &self.preference_patterns {
            if p.percentage > 0.0 {
                out.push_str(&format!(
                    "  - {} ({:.0}% of sessions)\n",
                    p.description, p.percentage
                ));
            } else {
                out.push_str(&format!("  - {}\n", p.description));
            }
        }

        out.push_str("\nRecovery strategies:\n");
        for s in &self.recovery_strategies {
            out.push_str(&format!(
                "  - {}: {} (effectiveness {:.0}%)\n",
                s.name,
                s.description,
                s.effectiveness * 100.0
            ));
        }

        out.push_str("\nTiming:\n");
        for t in &self.time_insights {
            if t.mean_sentiment > 0.0 {
                out.push_str(&format!(
                    "  - {} sessions run hot ({} samples, mean sentiment {:.2})\n",
                    t.period, t.samples, t.mean_sentiment
                ));
            } else {
                out.push_str("  - no standout time of day yet\n");
            }
        }

        out
    }
}

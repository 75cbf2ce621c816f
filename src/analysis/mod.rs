//! Post-session transcript analysis
//!
//! Converts a finished transcript into a structured outcome judgement.
//! The primary path asks the external provider for a fixed schema; when
//! that call fails, times out, or returns something unparsable, a
//! deterministic lexicon heuristic substitutes for it. The fallback is pure
//! text scanning and can never fail, so end-of-session processing always
//! produces a judgement.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::errors::Result;
use crate::store::{AnalysisSource, Reaction, Role, TurnRecord, GENERAL_INTERACTION};

/// Strongly positive audience words; any hit in a user turn marks the
/// session a success for the heuristic path.
const POSITIVE_MARKERS: &[&str] = &[
    "amazing",
    "incredible",
    "wow",
    "unbelievable",
    "impossible",
    "no way",
    "mind read",
];

/// Sentiment the heuristic assigns when a positive marker is found
const HEURISTIC_HIT_SENTIMENT: f64 = 0.7;
/// Sentiment the heuristic assigns otherwise
const HEURISTIC_MISS_SENTIMENT: f64 = 0.5;

/// Instruction text sent with the analysis request
pub const ANALYSIS_SYSTEM_TEXT: &str = "You are reviewing a finished mentalism \
performance transcript. Judge the audience's overall sentiment between -1.0 \
and 1.0, name the primary technique used, what worked, what did not, one \
lesson learned, the key moments, and whether the performance landed.";

/// Judgement object the provider is asked to return
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawAnalysis {
    pub sentiment: f64,
    #[serde(default)]
    pub technique_used: Option<String>,
    #[serde(default)]
    pub what_worked: String,
    #[serde(default)]
    pub what_did_not_work: String,
    #[serde(default)]
    pub lesson_learned: String,
    #[serde(default)]
    pub key_moments: Vec<String>,
    #[serde(default)]
    pub mentalist_success: bool,
}

/// Validated analysis, tagged with the path that produced it
#[derive(Debug, Clone)]
pub struct SessionAnalysis {
    /// Judged sentiment, clamped to [-1, 1]
    pub sentiment: f64,
    pub technique_used: String,
    pub what_worked: String,
    pub what_did_not_work: String,
    pub lesson_learned: String,
    pub key_moments: Vec<String>,
    pub mentalist_success: bool,
    pub source: AnalysisSource,
}

impl SessionAnalysis {
    /// Reaction bucket for this judgement
    pub fn reaction(&self) -> Reaction {
        Reaction::from_sentiment(self.sentiment)
    }

    fn from_raw(raw: RawAnalysis) -> Self {
        let technique = raw
            .technique_used
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| GENERAL_INTERACTION.to_string());
        Self {
            sentiment: raw.sentiment.clamp(-1.0, 1.0),
            technique_used: technique,
            what_worked: raw.what_worked,
            what_did_not_work: raw.what_did_not_work,
            lesson_learned: raw.lesson_learned,
            key_moments: raw.key_moments,
            mentalist_success: raw.mentalist_success,
            source: AnalysisSource::External,
        }
    }
}

/// Seam to the external analysis capability
#[async_trait]
pub trait TranscriptAnalyzer: Send + Sync {
    /// Request one structured judgement for the transcript
    async fn analyze(&self, system_text: &str, transcript_text: &str) -> Result<RawAnalysis>;
}

/// Converts finished transcripts into outcome judgements
pub struct AnalysisService {
    analyzer: Arc<dyn TranscriptAnalyzer>,
}

impl AnalysisService {
    pub fn new(analyzer: Arc<dyn TranscriptAnalyzer>) -> Self {
        Self { analyzer }
    }

    /// Judge a transcript. Never fails: provider errors degrade to the
    /// deterministic heuristic.
    pub async fn analyze_transcript(&self, turns: &[TurnRecord]) -> SessionAnalysis {
        let transcript = format_transcript(turns);
        match self
            .analyzer
            .analyze(ANALYSIS_SYSTEM_TEXT, &transcript)
            .await
        {
            Ok(raw) => {
                debug!(sentiment = raw.sentiment, "external analysis succeeded");
                SessionAnalysis::from_raw(raw)
            }
            Err(e) => {
                warn!(error = %e, "external analysis unavailable, using heuristic");
                heuristic_analysis(turns)
            }
        }
    }
}

/// Deterministic fallback: scan user turns for strongly positive words.
/// Pure text scanning with no external dependency.
pub fn heuristic_analysis(turns: &[TurnRecord]) -> SessionAnalysis {
    let hit = turns
        .iter()
        .filter(|t| t.role == Role::User)
        .any(|t| {
            let lower = t.content.to_lowercase();
            POSITIVE_MARKERS.iter().any(|marker| lower.contains(marker))
        });

    let sentiment = if hit {
        HEURISTIC_HIT_SENTIMENT
    } else {
        HEURISTIC_MISS_SENTIMENT
    };

    SessionAnalysis {
        sentiment,
        technique_used: GENERAL_INTERACTION.to_string(),
        what_worked: String::new(),
        what_did_not_work: String::new(),
        lesson_learned: String::new(),
        key_moments: Vec::new(),
        mentalist_success: sentiment >= 0.7,
        source: AnalysisSource::Heuristic,
    }
}

/// Render a transcript as role-prefixed lines for the provider
pub fn format_transcript(turns: &[TurnRecord]) -> String {
    turns
        .iter()
        .map(|t| format!("{}: {}", t.role.as_str(), t.content))
        .collect::<Vec<_>>()
        .join("\n")
}

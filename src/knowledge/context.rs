//! Instruction-context assembly
//!
//! Pure composition: persona base text, foundation knowledge, the
//! synthesized learnings briefing, the ranked technique list, and (when a
//! user is known) the relationship memory, concatenated into the one
//! instruction block sent with the next model call. No I/O happens here;
//! the briefings are produced by the synthesizer and memory services.

use crate::personas::PersonaProfile;
use crate::store::TechniqueMetric;

/// Composes the full instruction text for a conversational turn
pub struct ContextBuilder;

impl ContextBuilder {
    /// Assemble the instruction block.
    ///
    /// `memory` is included only when the caller supplied a user id and a
    /// briefing was produced for them.
    pub fn build_context(
        profile: &PersonaProfile,
        learnings: &str,
        top_metrics: &[TechniqueMetric],
        memory: Option<&str>,
    ) -> String {
        let mut sections: Vec<String> = Vec::new();

        sections.push(profile.base_prompt.clone());

        if !profile.knowledge_base.is_empty() {
            sections.push(format!("Foundation knowledge:\n{}", profile.knowledge_base));
        }

        sections.push(learnings.to_string());

        if !top_metrics.is_empty() {
            let mut block = String::from("Proven techniques (by success rate):\n");
            for (i, metric) in top_metrics.iter().enumerate() {
                block.push_str(&format!(
                    "  {}. {} - {:.0}% success, rated {:.1}/5 over {} attempt{}\n",
                    i + 1,
                    metric.technique,
                    metric.success_rate * 100.0,
                    metric.average_rating,
                    metric.total_attempts,
                    if metric.total_attempts == 1 { "" } else { "s" }
                ));
            }
            sections.push(block.trim_end().to_string());
        }

        if let Some(memory) = memory {
            sections.push(memory.to_string());
        }

        sections.join("\n\n")
    }
}

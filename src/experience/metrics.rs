//! Per-technique metric aggregation
//!
//! Maintains one row per (persona, technique) pair with an exact running
//! success rate and running mean rating. Rows are created lazily on the
//! first attempt and updated incrementally afterwards; history is never
//! rescanned. The arithmetic itself lives on `TechniqueMetric` so its
//! no-drift invariant is testable without a store.

use chrono::Utc;
use std::sync::Arc;
use tracing::debug;

use crate::errors::Result;
use crate::store::{ExperienceDb, Reaction, TechniqueMetric};

/// Maintains per-(persona, technique) running statistics
pub struct MetricAggregator {
    db: Arc<ExperienceDb>,
}

impl MetricAggregator {
    pub fn new(db: Arc<ExperienceDb>) -> Self {
        Self { db }
    }

    /// Record one attempt. Creates the metric row on first sight of the
    /// pair, otherwise applies the online update inside a read-modify-write
    /// transaction.
    pub async fn record_attempt(
        &self,
        persona_id: &str,
        technique: &str,
        success: bool,
        rating: f64,
    ) -> Result<TechniqueMetric> {
        let updated = self
            .db
            .record_metric_attempt(persona_id, technique, success, rating, Utc::now())
            .await?;
        debug!(
            %persona_id,
            %technique,
            attempts = updated.total_attempts,
            success_rate = updated.success_rate,
            "technique metric updated"
        );
        Ok(updated)
    }

    /// Record an attempt derived from a judged reaction
    pub async fn record_reaction(
        &self,
        persona_id: &str,
        technique: &str,
        reaction: Reaction,
    ) -> Result<TechniqueMetric> {
        self.record_attempt(persona_id, technique, reaction.is_success(), reaction.rating())
            .await
    }

    /// Best techniques for a persona, ranked by success rate then attempts
    pub async fn top_techniques(
        &self,
        persona_id: &str,
        limit: i64,
    ) -> Result<Vec<TechniqueMetric>> {
        self.db.top_metrics(persona_id, limit).await
    }
}

//! Caller-facing engine surface
//!
//! Wires the pipeline together for the embedding layer: start or resume a
//! session, submit a turn (streamed), end a session (analysis + experience
//! capture), and fetch the synthesized summaries. Analysis failures never
//! fail end-session; everything else surfaces as an explicit error.

use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::analysis::{format_transcript, AnalysisService, TranscriptAnalyzer};
use crate::config::Config;
use crate::errors::{MesmerError, Result};
use crate::experience::{ExperienceStore, MetricAggregator};
use crate::knowledge::{ContextBuilder, KnowledgeSynthesizer, UserMemoryService};
use crate::personas::PersonaCatalog;
use crate::session::SessionManager;
use crate::store::{ChatSession, ExperienceDb, Outcome, Persona, Role, TechniqueMetric};
use crate::streaming::{ProviderClient, StreamEvent};

/// Buffered events between the reply pump and the caller
const TURN_CHANNEL_CAPACITY: usize = 64;

/// How many technique metrics feed the context block
const CONTEXT_METRIC_COUNT: i64 = 5;

/// Cap on the metric listing returned to callers
const METRIC_LIST_LIMIT: i64 = 100;

/// The assembled learning pipeline
pub struct MesmerEngine {
    db: Arc<ExperienceDb>,
    catalog: PersonaCatalog,
    provider: ProviderClient,
    sessions: SessionManager,
    analysis: AnalysisService,
    experience: ExperienceStore,
    metrics: MetricAggregator,
    synthesizer: KnowledgeSynthesizer,
    memory: UserMemoryService,
    window_size: i64,
}

impl MesmerEngine {
    /// Build the engine from configuration, connecting the ledger and the
    /// provider and using the built-in persona catalog.
    pub async fn from_config(config: &Config) -> Result<Self> {
        let db_path = config.database_path();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db = Arc::new(ExperienceDb::connect(&db_path).await?);
        let provider = ProviderClient::with_config(config.provider_url(), config.model())?;

        Ok(Self::assemble(
            db,
            PersonaCatalog::builtin(),
            provider.clone(),
            Arc::new(provider),
            config.window_size(),
        ))
    }

    /// Build the engine from explicit parts. Lets tests substitute the
    /// transcript analyzer while keeping the rest of the wiring identical.
    pub fn assemble(
        db: Arc<ExperienceDb>,
        catalog: PersonaCatalog,
        provider: ProviderClient,
        analyzer: Arc<dyn TranscriptAnalyzer>,
        window_size: i64,
    ) -> Self {
        Self {
            sessions: SessionManager::new(db.clone()),
            analysis: AnalysisService::new(analyzer),
            experience: ExperienceStore::new(db.clone()),
            metrics: MetricAggregator::new(db.clone()),
            synthesizer: KnowledgeSynthesizer::new(db.clone()),
            memory: UserMemoryService::new(db.clone()),
            db,
            catalog,
            provider,
            window_size,
        }
    }

    pub fn catalog(&self) -> &PersonaCatalog {
        &self.catalog
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    /// Resume the active session for the pair or start a new one,
    /// provisioning the persona's learning row on first contact.
    pub async fn start_or_resume(&self, user_id: &str, persona_id: &str) -> Result<ChatSession> {
        let profile = self
            .catalog
            .get(persona_id)
            .ok_or_else(|| MesmerError::UnknownPersona(persona_id.to_string()))?;
        self.db
            .ensure_persona(&profile.id, &profile.display_name)
            .await?;
        self.sessions.get_or_create_session(user_id, persona_id).await
    }

    /// Submit one user turn and stream the persona's reply.
    ///
    /// The user turn is persisted before the provider call. The reply is
    /// accumulated as deltas arrive and persisted as the agent turn once
    /// the stream terminates, normally or not: an interrupted stream keeps
    /// whatever text was already produced.
    pub async fn submit_turn(
        &self,
        session_id: &str,
        content: &str,
    ) -> Result<mpsc::Receiver<StreamEvent>> {
        let session = self
            .db
            .get_session(session_id)
            .await?
            .ok_or_else(|| MesmerError::UnknownSession(session_id.to_string()))?;

        self.sessions
            .append_message(session_id, Role::User, content)
            .await?;

        let context = self
            .build_context(&session.persona_id, Some(&session.user_id))
            .await?;
        let transcript = self.sessions.list_messages(session_id).await?;
        let prompt = format_transcript(&transcript);

        let mut provider_rx = self.provider.chat_stream(&context, &prompt).await?;

        let (tx, rx) = mpsc::channel(TURN_CHANNEL_CAPACITY);
        let db = self.db.clone();
        let session_id = session_id.to_string();

        tokio::spawn(async move {
            let mut reply = String::new();
            let mut terminal: Option<StreamEvent> = None;

            while let Some(event) = provider_rx.recv().await {
                match event {
                    StreamEvent::Delta(delta) => {
                        reply.push_str(&delta);
                        let _ = tx.send(StreamEvent::Delta(delta)).await;
                    }
                    event => {
                        terminal = Some(event);
                        break;
                    }
                }
            }

            // Persist before reporting the terminal event so the caller
            // only sees completion once the turn is durable.
            if !reply.is_empty() {
                if let Err(e) = db.append_turn(&session_id, Role::Agent, &reply).await {
                    warn!(%session_id, error = %e, "failed to persist streamed reply");
                }
            }

            let terminal = terminal.unwrap_or_else(|| {
                StreamEvent::Error("stream closed without completion marker".to_string())
            });
            let _ = tx.send(terminal).await;
        });

        Ok(rx)
    }

    /// End a session and run the learning pipeline over its transcript.
    ///
    /// Returns the recorded outcome, `None` when the persona has learning
    /// disabled, or the previously recorded outcome when the session was
    /// already processed. Analysis unavailability is recovered with the
    /// heuristic and never fails this call.
    pub async fn end_session(&self, session_id: &str) -> Result<Option<Outcome>> {
        let session = self.sessions.end_session(session_id).await?;

        if let Some(existing) = self.db.get_outcome_for_session(session_id).await? {
            info!(%session_id, "session already judged; returning recorded outcome");
            return Ok(Some(existing));
        }

        let persona = self
            .db
            .get_persona(&session.persona_id)
            .await?
            .ok_or_else(|| MesmerError::UnknownPersona(session.persona_id.clone()))?;

        if !persona.learning_enabled {
            info!(persona_id = %persona.id, %session_id, "learning disabled, skipping capture");
            return Ok(None);
        }

        let transcript = self.sessions.list_messages(session_id).await?;
        let analysis = self.analysis.analyze_transcript(&transcript).await;

        let outcome = self
            .experience
            .capture_experience(
                &session.persona_id,
                &session.user_id,
                session_id,
                &analysis,
                &transcript,
                session.duration_seconds(),
            )
            .await?;

        Ok(Some(outcome))
    }

    /// Synthesized learnings briefing for a persona
    pub async fn learning_summary(&self, persona_id: &str) -> Result<String> {
        self.require_persona(persona_id).await?;
        self.synthesizer
            .synthesize_learnings(persona_id, self.window_size)
            .await
    }

    /// Ranked technique metrics for a persona
    pub async fn technique_metrics(&self, persona_id: &str) -> Result<Vec<TechniqueMetric>> {
        self.require_persona(persona_id).await?;
        self.metrics
            .top_techniques(persona_id, METRIC_LIST_LIMIT)
            .await
    }

    /// Relationship briefing for one (user, persona) pair
    pub async fn memory_summary(&self, user_id: &str, persona_id: &str) -> Result<String> {
        self.require_persona(persona_id).await?;
        self.memory.generate_memory_summary(user_id, persona_id).await
    }

    /// Persona learning state
    pub async fn persona(&self, persona_id: &str) -> Result<Persona> {
        self.require_persona(persona_id).await
    }

    async fn require_persona(&self, persona_id: &str) -> Result<Persona> {
        self.db
            .get_persona(persona_id)
            .await?
            .ok_or_else(|| MesmerError::UnknownPersona(persona_id.to_string()))
    }

    /// Assemble the instruction block for the next model call
    async fn build_context(&self, persona_id: &str, user_id: Option<&str>) -> Result<String> {
        let profile = self
            .catalog
            .get(persona_id)
            .ok_or_else(|| MesmerError::UnknownPersona(persona_id.to_string()))?;

        let learnings = self
            .synthesizer
            .synthesize_learnings(persona_id, self.window_size)
            .await?;
        let top = self
            .metrics
            .top_techniques(persona_id, CONTEXT_METRIC_COUNT)
            .await?;

        let memory = match user_id {
            Some(user_id) => Some(
                self.memory
                    .generate_memory_summary(user_id, persona_id)
                    .await?,
            ),
            None => None,
        };

        Ok(ContextBuilder::build_context(
            profile,
            &learnings,
            &top,
            memory.as_deref(),
        ))
    }
}

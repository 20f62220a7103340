use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bullbear_memory::{MemoryError, MemoryStore};
use bullbear_models::{
    AgentRole, AnalystOutcome, DebateState, DecisionSummary, DegradationKind, Deliberation,
    DeliberationConfig, DeliberationState, NewMemoryRecord, Outcome, Phase, RecordId,
    RetrievedMemory, StateInvariantViolation, StatePatch, Transcript, TranscriptEntry,
};
use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::analyst::{run_analysts, Analyst, AnalystContext, DataFeed, GeneratingAnalyst, NullFeed};
use crate::debate::{DebateContext, DebateController};
use crate::debaters::GeneratingDebater;
use crate::error::AgentError;
use crate::generation::BoundModels;
use crate::managers::{PortfolioManager, ResearchManager, Trader};
use crate::reflection::Reflector;

/// A run that could not produce a decision. Carries the transcript up to the
/// failure so the path that led there is not lost.
#[derive(Error, Debug)]
#[error("deliberation failed during {phase}: {error}")]
pub struct RunFailure {
    pub phase: Phase,
    #[source]
    pub error: AgentError,
    pub transcript: Box<Transcript>,
}

type StageResult<T> = Result<T, (Phase, AgentError)>;

/// Tag an error with the phase it happened in.
trait AtPhase<T> {
    fn at(self, phase: Phase) -> StageResult<T>;
}

impl<T, E: Into<AgentError>> AtPhase<T> for Result<T, E> {
    fn at(self, phase: Phase) -> StageResult<T> {
        self.map_err(|e| (phase, e.into()))
    }
}

/// The deliberation state machine: analysts, research debate, research
/// manager, trader, risk debate, portfolio manager.
///
/// Configuration and models are bound at construction and do not change
/// between runs. The memory store is shared with whoever else holds it.
pub struct TradingGraph {
    config: DeliberationConfig,
    models: BoundModels,
    memory: Arc<MemoryStore>,
    feed: Arc<dyn DataFeed>,
    recall_timeout: Duration,
    /// Record written by this graph's latest completed run, until reflected.
    last_record: Mutex<Option<RecordId>>,
}

impl TradingGraph {
    pub fn new(config: DeliberationConfig, models: BoundModels, memory: Arc<MemoryStore>) -> Self {
        Self {
            config,
            models,
            memory,
            feed: Arc::new(NullFeed),
            recall_timeout: Duration::from_secs(30),
            last_record: Mutex::new(None),
        }
    }

    pub fn with_data_feed(mut self, feed: Arc<dyn DataFeed>) -> Self {
        self.feed = feed;
        self
    }

    pub fn with_recall_timeout(mut self, timeout: Duration) -> Self {
        self.recall_timeout = timeout;
        self
    }

    pub fn config(&self) -> &DeliberationConfig {
        &self.config
    }

    pub fn memory(&self) -> &Arc<MemoryStore> {
        &self.memory
    }

    /// Deliberate on `symbol` as of `as_of_date` and return the decision with
    /// its full transcript.
    pub async fn propagate(
        &self,
        symbol: &str,
        as_of_date: NaiveDate,
    ) -> Result<Deliberation, RunFailure> {
        self.propagate_with_cancel(symbol, as_of_date, &CancellationToken::new())
            .await
    }

    /// As `propagate`, checking `cancel` between phases. A cancelled run is
    /// discarded: it returns `AgentError::Cancelled` and writes no memory.
    pub async fn propagate_with_cancel(
        &self,
        symbol: &str,
        as_of_date: NaiveDate,
        cancel: &CancellationToken,
    ) -> Result<Deliberation, RunFailure> {
        let start = Instant::now();
        let state = DeliberationState::new(symbol, as_of_date);
        let mut transcript = Transcript::for_state(&state);
        info!(
            run_id = %state.run_id(),
            symbol = %symbol,
            as_of_date = %as_of_date,
            "Starting deliberation"
        );

        let state = match self.deliberate(state, &mut transcript, cancel).await {
            Ok(state) => state,
            Err((phase, e)) => {
                let error = e.into_stage_failure(phase);
                match &error {
                    AgentError::Cancelled { .. } => {
                        info!(symbol = %symbol, phase = %phase, "Deliberation cancelled")
                    }
                    _ => error!(symbol = %symbol, phase = %phase, error = %error, "Deliberation failed"),
                }
                return Err(RunFailure {
                    phase,
                    error,
                    transcript: Box::new(transcript),
                });
            }
        };

        let final_decision = match state.final_decision() {
            Some(decision) => decision.clone(),
            None => {
                return Err(RunFailure {
                    phase: Phase::PortfolioManager,
                    error: StateInvariantViolation::new(
                        "final_decision",
                        "run completed without a final decision",
                    )
                    .into(),
                    transcript: Box::new(transcript),
                })
            }
        };

        let memory_record_id = self.remember(&state).await;
        *self.last_record.lock().await = memory_record_id;
        let processing_time_ms = start.elapsed().as_millis() as u64;
        info!(
            symbol = %symbol,
            action = %final_decision.action,
            confidence = %final_decision.confidence,
            degradations = transcript.degradations.len(),
            elapsed_ms = processing_time_ms,
            "Deliberation complete"
        );

        Ok(Deliberation {
            transcript,
            final_decision,
            state,
            memory_record_id,
            processing_time_ms,
        })
    }

    async fn deliberate(
        &self,
        mut state: DeliberationState,
        transcript: &mut Transcript,
        cancel: &CancellationToken,
    ) -> StageResult<DeliberationState> {
        let quick = &self.models.quick;
        let deep = &self.models.deep;
        let early_stop = self.config.allow_early_stop;

        // 1. Analysts, in parallel
        checkpoint(cancel, Phase::Analysts)?;
        let seed = format!("{} as of {}", state.symbol(), state.as_of_date());
        let memories = self
            .recall("analysts", &seed, Phase::Analysts, transcript)
            .await;
        let analysts: Vec<Arc<dyn Analyst>> = self
            .config
            .enabled_analysts()
            .into_iter()
            .map(|role| {
                Arc::new(GeneratingAnalyst::new(
                    role,
                    Arc::clone(quick),
                    self.config.use_web_search,
                )) as Arc<dyn Analyst>
            })
            .collect();
        let context = AnalystContext {
            symbol: state.symbol().to_string(),
            as_of_date: state.as_of_date(),
            data_mode: self.config.data_mode(),
            data_excerpt: None,
            memories,
        };
        for (role, outcome) in run_analysts(analysts, Arc::clone(&self.feed), context).await {
            match &outcome {
                AnalystOutcome::Report {
                    text,
                    citations,
                    elapsed_ms,
                } => transcript.push(TranscriptEntry::AnalystReport {
                    role,
                    text: text.clone(),
                    citations: citations.clone(),
                    elapsed_ms: *elapsed_ms,
                }),
                AnalystOutcome::Missing { reason } => {
                    transcript.push(TranscriptEntry::AnalystGap {
                        role,
                        reason: reason.clone(),
                    });
                    transcript.degrade(
                        Phase::Analysts,
                        DegradationKind::AnalystGap,
                        role.as_str(),
                        reason.clone(),
                    );
                }
            }
            state = state
                .apply(StatePatch::AnalystReport { role, outcome })
                .at(Phase::Analysts)?;
        }
        let situation = state.situation();

        // 2. Research debate
        checkpoint(cancel, Phase::ResearchDebate)?;
        let research_controller = DebateController::new(
            GeneratingDebater::team(&AgentRole::RESEARCH_DEBATERS, quick, early_stop),
            Phase::ResearchDebate,
        )
        .with_early_stop(early_stop);
        let memories = self
            .recall("research_debate", &situation, Phase::ResearchDebate, transcript)
            .await;
        let context = DebateContext {
            state: &state,
            memories: &memories,
        };
        let mut research = research_controller
            .run(
                DebateState::research(self.config.max_debate_rounds),
                &context,
                transcript,
            )
            .await
            .at(Phase::ResearchDebate)?;

        // 3. Research manager judges
        checkpoint(cancel, Phase::ResearchManager)?;
        let memories = self
            .recall("research_manager", &situation, Phase::ResearchManager, transcript)
            .await;
        let context = DebateContext {
            state: &state,
            memories: &memories,
        };
        let manager = ResearchManager::new(Arc::clone(deep));
        let decision = match research_controller
            .judge(&manager, &mut research, &context, transcript)
            .await
        {
            Ok(decision) => Some(decision),
            Err(AgentError::ContentPolicy(reason)) => {
                warn!(reason = %reason, "Research manager refused, trader works from the debate");
                transcript.degrade(
                    Phase::ResearchManager,
                    DegradationKind::MissingVerdict,
                    AgentRole::ResearchManager.as_str(),
                    reason,
                );
                None
            }
            Err(e) => return Err((Phase::ResearchManager, e)),
        };
        state = state
            .apply(StatePatch::ResearchDebate(research))
            .at(Phase::ResearchManager)?;
        if let Some(decision) = decision {
            transcript.push(TranscriptEntry::ResearchDecision(decision.clone()));
            state = state
                .apply(StatePatch::ResearchManagerDecision(decision))
                .at(Phase::ResearchManager)?;
        }

        // 4. Trader
        checkpoint(cancel, Phase::Trader)?;
        let memories = self
            .recall("trader", &situation, Phase::Trader, transcript)
            .await;
        let research = state
            .research_debate()
            .ok_or_else(|| StateInvariantViolation::new("research_debate", "not recorded"))
            .at(Phase::Trader)?;
        match Trader::new(Arc::clone(quick))
            .plan(&state, research, &memories)
            .await
        {
            Ok(plan) => {
                transcript.push(TranscriptEntry::TraderPlan(plan.clone()));
                state = state
                    .apply(StatePatch::TraderPlan(plan))
                    .at(Phase::Trader)?;
            }
            Err(AgentError::ContentPolicy(reason)) => {
                warn!(reason = %reason, "Trader refused, risk team works without a proposal");
                transcript.degrade(
                    Phase::Trader,
                    DegradationKind::MissingVerdict,
                    AgentRole::Trader.as_str(),
                    reason,
                );
            }
            Err(e) => return Err((Phase::Trader, e)),
        }

        // 5. Risk debate
        checkpoint(cancel, Phase::RiskDebate)?;
        let risk_controller = DebateController::new(
            GeneratingDebater::team(&AgentRole::RISK_DEBATERS, quick, early_stop),
            Phase::RiskDebate,
        )
        .with_early_stop(early_stop);
        let memories = self
            .recall("risk_debate", &situation, Phase::RiskDebate, transcript)
            .await;
        let context = DebateContext {
            state: &state,
            memories: &memories,
        };
        let mut risk = risk_controller
            .run(
                DebateState::risk(self.config.max_risk_discuss_rounds),
                &context,
                transcript,
            )
            .await
            .at(Phase::RiskDebate)?;

        // 6. Portfolio manager judges; its decision is terminal
        checkpoint(cancel, Phase::PortfolioManager)?;
        let memories = self
            .recall("portfolio_manager", &situation, Phase::PortfolioManager, transcript)
            .await;
        let context = DebateContext {
            state: &state,
            memories: &memories,
        };
        let final_decision = risk_controller
            .judge(
                &PortfolioManager::new(Arc::clone(deep)),
                &mut risk,
                &context,
                transcript,
            )
            .await
            .at(Phase::PortfolioManager)?;
        state = state
            .apply(StatePatch::RiskDebate(risk))
            .at(Phase::PortfolioManager)?;
        transcript.push(TranscriptEntry::FinalDecision(final_decision.clone()));
        state = state
            .apply(StatePatch::FinalDecision(final_decision))
            .at(Phase::PortfolioManager)?;

        Ok(state)
    }

    /// Retrieve memories for `agent`. Failure degrades to no memories and
    /// is flagged in the transcript.
    async fn recall(
        &self,
        agent: &str,
        situation: &str,
        phase: Phase,
        transcript: &mut Transcript,
    ) -> Vec<RetrievedMemory> {
        let k = self.config.memory_top_k;
        if k == 0 {
            return Vec::new();
        }

        let result = tokio::time::timeout(self.recall_timeout, self.memory.retrieve(situation, k))
            .await
            .unwrap_or_else(|_| {
                Err(MemoryError::IndexUnavailable(format!(
                    "retrieval timed out after {}ms",
                    self.recall_timeout.as_millis()
                )))
            });

        match result {
            Ok(memories) => {
                debug!(agent, hits = memories.len(), "Memory consulted");
                if !memories.is_empty() {
                    transcript.push(TranscriptEntry::MemoryConsulted {
                        agent: agent.to_string(),
                        record_ids: memories.iter().map(|m| m.record_id).collect(),
                    });
                }
                memories
            }
            Err(e) => {
                warn!(agent, error = %e, "Memory retrieval failed, continuing without");
                transcript.degrade(phase, DegradationKind::MemoryUnavailable, agent, e.to_string());
                Vec::new()
            }
        }
    }

    /// Write the unlabeled record for a completed run.
    async fn remember(&self, state: &DeliberationState) -> Option<RecordId> {
        let decision = state.final_decision()?;

        let mut positions = BTreeMap::new();
        let debates = [state.research_debate(), state.risk_debate()];
        for debate in debates.into_iter().flatten() {
            for role in debate.participants() {
                if let Some(utterance) = debate.last_utterance_of(*role) {
                    positions.insert(*role, utterance.to_string());
                }
            }
        }
        if let Some(research) = state.research_manager_decision() {
            positions.insert(AgentRole::ResearchManager, research.recommendation.clone());
        }
        if let Some(plan) = state.trader_plan() {
            positions.insert(AgentRole::Trader, plan.rationale.clone());
        }
        positions.insert(AgentRole::PortfolioManager, decision.rationale.clone());

        let record = NewMemoryRecord {
            run_id: state.run_id(),
            symbol: state.symbol().to_string(),
            as_of_date: state.as_of_date(),
            situation: state.situation(),
            decision_summary: DecisionSummary {
                action: decision.action,
                rationale: decision.rationale.clone(),
                positions,
            },
        };

        match self.memory.remember(record).await {
            Ok(id) => {
                info!(record_id = id, run_id = %state.run_id(), "Run remembered, awaiting reflection");
                Some(id)
            }
            Err(e) => {
                warn!(run_id = %state.run_id(), error = %e, "Could not remember run");
                None
            }
        }
    }

    /// Label the record of this graph's latest run with its realized return.
    ///
    /// Runs by other graphs sharing the store are never touched. Fails with
    /// `MemoryError::NothingToReflect` when this graph has no unreflected
    /// run, including when its latest run could not be remembered.
    pub async fn reflect_and_remember(
        &self,
        realized_return: Decimal,
    ) -> Result<RecordId, AgentError> {
        let mut last_record = self.last_record.lock().await;
        let id = (*last_record).ok_or(MemoryError::NothingToReflect)?;
        self.reflect_on(id, realized_return).await?;
        *last_record = None;
        Ok(id)
    }

    /// Draw a lesson for each decision role from record `id` and label it
    /// with `realized_return`. Labels exactly that record.
    pub async fn reflect_on(
        &self,
        id: RecordId,
        realized_return: Decimal,
    ) -> Result<RecordId, AgentError> {
        let record = self.memory.get(id)?.ok_or(MemoryError::UnknownRecord(id))?;
        if record.is_labeled() {
            return Err(MemoryError::AlreadyLabeled(id).into());
        }
        info!(
            record_id = record.id,
            symbol = %record.symbol,
            as_of_date = %record.as_of_date,
            realized_return = %realized_return,
            "Reflecting on outcome"
        );

        let lessons = Reflector::new(Arc::clone(&self.models.quick))
            .lessons(&record, realized_return)
            .await;
        let lesson_count = lessons.len();
        self.memory
            .label(
                record.id,
                Outcome {
                    realized_return,
                    lessons,
                    labeled_at: Utc::now(),
                },
            )
            .await?;

        info!(record_id = record.id, lessons = lesson_count, "Outcome recorded");
        Ok(record.id)
    }
}

fn checkpoint(cancel: &CancellationToken, next: Phase) -> StageResult<()> {
    if cancel.is_cancelled() {
        return Err((next, AgentError::Cancelled { phase: next }));
    }
    info!(phase = %next, "Phase starting");
    Ok(())
}

//! End-to-end deliberation scenarios.
//!
//! Every test drives a full `TradingGraph` run with the scripted generator
//! playing all agents and an in-process memory store, then checks the
//! transcript, the final decision and what memory holds afterwards.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bullbear_agents::prompts::{analyst_tag, reflection_tag};
use bullbear_agents::test_support::ScriptedGenerator;
use bullbear_agents::{
    AgentError, BoundModels, DataFeed, RetryPolicy, RetryingGenerator, TextGenerator,
    TradingGraph,
};
use bullbear_memory::{FlatIndex, HashingEmbedder, MemoryError, MemoryStore, SimilarityIndex};
use bullbear_models::{
    AgentRole, AnalystConfig, AnalystRole, DataMode, DebateKind, DegradationKind,
    DeliberationConfig, Phase, RecordId, StatePatch, TradeAction, TranscriptEntry,
};
use chrono::NaiveDate;
use rust_decimal_macros::dec;
use tokio_util::sync::CancellationToken;

fn may_10() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 5, 10).unwrap()
}

fn one_round() -> DeliberationConfig {
    DeliberationConfig {
        max_debate_rounds: 1,
        max_risk_discuss_rounds: 1,
        ..DeliberationConfig::default()
    }
}

fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(5),
        call_timeout: Duration::from_secs(5),
    }
}

fn memory() -> Arc<MemoryStore> {
    Arc::new(MemoryStore::new(
        Arc::new(HashingEmbedder::new(256)),
        Arc::new(FlatIndex::new()),
    ))
}

fn models(generator: &Arc<ScriptedGenerator>) -> BoundModels {
    let inner: Arc<dyn TextGenerator> = Arc::clone(generator) as Arc<dyn TextGenerator>;
    BoundModels::uniform(Arc::new(RetryingGenerator::new(inner, fast_retry())))
}

fn graph(
    config: DeliberationConfig,
    generator: &Arc<ScriptedGenerator>,
    memory: &Arc<MemoryStore>,
) -> TradingGraph {
    TradingGraph::new(config, models(generator), Arc::clone(memory))
}

#[tokio::test]
async fn one_round_run_produces_full_transcript() {
    let generator = Arc::new(ScriptedGenerator::canned());
    let memory = memory();
    let result = graph(one_round(), &generator, &memory)
        .propagate("NVDA", may_10())
        .await
        .unwrap();

    let research = result.state.research_debate().unwrap();
    assert_eq!(research.history().len(), 2);
    assert_eq!(research.history()[0].role, AgentRole::Bull);
    assert_eq!(research.history()[1].role, AgentRole::Bear);
    assert!(research.judge_verdict().is_some());

    let risk = result.state.risk_debate().unwrap();
    assert_eq!(risk.history().len(), 3);
    assert_eq!(
        risk.judge_verdict(),
        Some(result.final_decision.rationale.as_str())
    );

    assert!(TradeAction::ALL.contains(&result.final_decision.action));
    assert_eq!(result.final_decision.action, TradeAction::Buy);
    assert_eq!(result.final_decision.confidence, dec!(0.72));
    assert_eq!(result.final_decision.position_size_pct, Some(dec!(4)));
    assert!(!result.final_decision.overrides_trader);

    let reports = result
        .transcript
        .entries
        .iter()
        .filter(|e| matches!(e, TranscriptEntry::AnalystReport { .. }))
        .count();
    assert_eq!(reports, AnalystRole::ALL.len());
    assert_eq!(result.transcript.debate_turns(DebateKind::Research).count(), 2);
    assert_eq!(result.transcript.debate_turns(DebateKind::Risk).count(), 3);
    assert!(matches!(
        result.transcript.entries.last(),
        Some(TranscriptEntry::FinalDecision(_))
    ));
    assert!(!result.transcript.is_degraded());

    // One unlabeled record per completed run
    assert_eq!(memory.len(), 1);
    assert_eq!(result.memory_record_id, Some(1));
    assert!(!memory.pending_reflection().unwrap().is_labeled());
}

fn position(entries: &[TranscriptEntry], pred: impl Fn(&TranscriptEntry) -> bool) -> usize {
    entries.iter().position(pred).unwrap()
}

#[tokio::test]
async fn transcript_entries_follow_phase_order() {
    let generator = Arc::new(ScriptedGenerator::canned());
    let result = graph(one_round(), &generator, &memory())
        .propagate("NVDA", may_10())
        .await
        .unwrap();

    let entries = &result.transcript.entries;
    let first_research = position(entries, |e| {
        matches!(e, TranscriptEntry::DebateTurn { debate: DebateKind::Research, .. })
    });
    let research_decision = position(entries, |e| matches!(e, TranscriptEntry::ResearchDecision(_)));
    let trader = position(entries, |e| matches!(e, TranscriptEntry::TraderPlan(_)));
    let first_risk = position(entries, |e| {
        matches!(e, TranscriptEntry::DebateTurn { debate: DebateKind::Risk, .. })
    });
    let last_report = result
        .transcript
        .entries
        .iter()
        .rposition(|e| matches!(e, TranscriptEntry::AnalystReport { .. }))
        .unwrap();

    assert!(last_report < first_research);
    assert!(first_research < research_decision);
    assert!(research_decision < trader);
    assert!(trader < first_risk);
}

#[tokio::test]
async fn refused_analyst_leaves_exactly_one_gap() {
    let generator = Arc::new(
        ScriptedGenerator::canned().refuse(&analyst_tag(AnalystRole::News)),
    );
    let result = graph(one_round(), &generator, &memory())
        .propagate("NVDA", may_10())
        .await
        .unwrap();

    let gaps: Vec<_> = result
        .transcript
        .entries
        .iter()
        .filter_map(|e| match e {
            TranscriptEntry::AnalystGap { role, .. } => Some(*role),
            _ => None,
        })
        .collect();
    assert_eq!(gaps, vec![AnalystRole::News]);
    assert_eq!(
        result
            .transcript
            .degradations_of(DegradationKind::AnalystGap)
            .count(),
        1
    );
    assert_eq!(result.state.missing_analysts(), vec![AnalystRole::News]);
    // Refusals are not retried
    assert_eq!(generator.calls(&analyst_tag(AnalystRole::News)), 1);

    // Downstream prompts proceed without the missing report
    let bull_prompt = &generator.requests_for(AgentRole::Bull.as_str())[0].user_prompt;
    assert!(!bull_prompt.contains("Hyperscalers"));
    assert!(bull_prompt.contains("Data center revenue"));
}

#[tokio::test]
async fn zero_rounds_goes_straight_to_the_judge() {
    let config = DeliberationConfig {
        max_debate_rounds: 0,
        max_risk_discuss_rounds: 0,
        ..DeliberationConfig::default()
    };
    let generator = Arc::new(ScriptedGenerator::canned());
    let result = graph(config, &generator, &memory())
        .propagate("NVDA", may_10())
        .await
        .unwrap();

    let research = result.state.research_debate().unwrap();
    assert!(research.history().is_empty());
    assert!(research.judge_verdict().is_some());
    assert!(result.state.risk_debate().unwrap().history().is_empty());
    assert_eq!(generator.calls(AgentRole::Bull.as_str()), 0);
    assert_eq!(generator.calls(AgentRole::ResearchManager.as_str()), 1);
    assert_eq!(generator.calls(AgentRole::PortfolioManager.as_str()), 1);
}

#[tokio::test]
async fn multi_round_debates_alternate_speakers() {
    let config = DeliberationConfig {
        max_debate_rounds: 3,
        max_risk_discuss_rounds: 2,
        ..DeliberationConfig::default()
    };
    let generator = Arc::new(ScriptedGenerator::canned());
    let result = graph(config, &generator, &memory())
        .propagate("NVDA", may_10())
        .await
        .unwrap();

    let research = result.state.research_debate().unwrap();
    let speakers: Vec<AgentRole> = research.history().iter().map(|t| t.role).collect();
    assert_eq!(
        speakers,
        vec![
            AgentRole::Bull,
            AgentRole::Bear,
            AgentRole::Bull,
            AgentRole::Bear,
            AgentRole::Bull,
            AgentRole::Bear,
        ]
    );
    assert_eq!(result.state.risk_debate().unwrap().history().len(), 6);
}

#[tokio::test]
async fn transient_failures_are_retried_without_duplicate_turns() {
    let generator = Arc::new(
        ScriptedGenerator::canned()
            .fail_transiently(AgentRole::Bull.as_str(), 2)
            .rate_limit(AgentRole::Trader.as_str(), 1),
    );
    let result = graph(one_round(), &generator, &memory())
        .propagate("NVDA", may_10())
        .await
        .unwrap();

    assert_eq!(generator.calls(AgentRole::Bull.as_str()), 3);
    assert_eq!(generator.calls(AgentRole::Trader.as_str()), 2);
    let research = result.state.research_debate().unwrap();
    let bull_turns = research
        .history()
        .iter()
        .filter(|t| t.role == AgentRole::Bull)
        .count();
    assert_eq!(bull_turns, 1);
    assert!(!result.transcript.is_degraded());
}

#[tokio::test]
async fn exhausted_retries_fail_the_stage() {
    let generator = Arc::new(
        ScriptedGenerator::canned().fail_transiently(AgentRole::Bear.as_str(), 10),
    );
    let memory = memory();
    let failure = graph(one_round(), &generator, &memory)
        .propagate("NVDA", may_10())
        .await
        .unwrap_err();

    assert_eq!(failure.phase, Phase::ResearchDebate);
    assert!(matches!(
        failure.error,
        AgentError::StageFailed {
            stage: Phase::ResearchDebate,
            ..
        }
    ));
    assert_eq!(generator.calls(AgentRole::Bear.as_str()), 3);
    // The bull's turn made it into the transcript before the failure
    assert_eq!(failure.transcript.debate_turns(DebateKind::Research).count(), 1);
    assert!(memory.is_empty());
}

#[tokio::test]
async fn refused_debate_turn_is_skipped_and_flagged() {
    let generator = Arc::new(ScriptedGenerator::canned().refuse(AgentRole::Conservative.as_str()));
    let result = graph(one_round(), &generator, &memory())
        .propagate("NVDA", may_10())
        .await
        .unwrap();

    let risk = result.state.risk_debate().unwrap();
    let speakers: Vec<AgentRole> = risk.history().iter().map(|t| t.role).collect();
    assert_eq!(speakers, vec![AgentRole::Aggressive, AgentRole::Neutral]);
    let skipped: Vec<_> = result
        .transcript
        .degradations_of(DegradationKind::SkippedTurn)
        .collect();
    assert_eq!(skipped.len(), 1);
    assert_eq!(skipped[0].phase, Phase::RiskDebate);
    assert_eq!(skipped[0].subject, AgentRole::Conservative.as_str());
}

#[tokio::test]
async fn refused_research_verdict_hands_the_debate_to_the_trader() {
    let generator =
        Arc::new(ScriptedGenerator::canned().refuse(AgentRole::ResearchManager.as_str()));
    let result = graph(one_round(), &generator, &memory())
        .propagate("NVDA", may_10())
        .await
        .unwrap();

    assert!(result.state.research_manager_decision().is_none());
    assert!(result.state.research_debate().unwrap().judge_verdict().is_none());
    assert_eq!(
        result
            .transcript
            .degradations_of(DegradationKind::MissingVerdict)
            .count(),
        1
    );

    let trader_prompt = &generator.requests_for(AgentRole::Trader.as_str())[0].user_prompt;
    assert!(trader_prompt.contains("gave no verdict"));
    assert!(trader_prompt.contains("capex guidance from every hyperscaler"));
    assert!(trader_prompt.contains("the multiple already discounts"));
    assert_eq!(result.final_decision.action, TradeAction::Buy);
}

#[tokio::test]
async fn refused_trader_leaves_a_gap_and_still_decides() {
    let generator = Arc::new(ScriptedGenerator::canned().refuse(AgentRole::Trader.as_str()));
    let memory = memory();
    let result = graph(one_round(), &generator, &memory)
        .propagate("NVDA", may_10())
        .await
        .unwrap();

    assert!(result.state.trader_plan().is_none());
    assert!(!result
        .transcript
        .entries
        .iter()
        .any(|e| matches!(e, TranscriptEntry::TraderPlan(_))));
    let gaps: Vec<_> = result
        .transcript
        .degradations_of(DegradationKind::MissingVerdict)
        .collect();
    assert_eq!(gaps.len(), 1);
    assert_eq!(gaps[0].phase, Phase::Trader);
    assert_eq!(gaps[0].subject, AgentRole::Trader.as_str());

    // The risk team critiques the research verdict in place of a proposal
    assert_eq!(result.transcript.debate_turns(DebateKind::Risk).count(), 3);
    let aggressive = &generator.requests_for(AgentRole::Aggressive.as_str())[0].user_prompt;
    assert!(aggressive.contains("The trader made no proposal"));
    assert!(aggressive.contains("Scale in over two weeks"));
    let judge = &generator.requests_for(AgentRole::PortfolioManager.as_str())[0].user_prompt;
    assert!(judge.contains("The trader made no proposal"));

    // Nothing to override without a proposal
    assert_eq!(result.final_decision.action, TradeAction::Buy);
    assert!(!result.final_decision.overrides_trader);
    assert_eq!(memory.len(), 1);
}

#[tokio::test]
async fn refused_trader_and_manager_leave_the_risk_team_the_debate() {
    let generator = Arc::new(
        ScriptedGenerator::canned()
            .refuse(AgentRole::ResearchManager.as_str())
            .refuse(AgentRole::Trader.as_str()),
    );
    let result = graph(one_round(), &generator, &memory())
        .propagate("NVDA", may_10())
        .await
        .unwrap();

    assert_eq!(
        result
            .transcript
            .degradations_of(DegradationKind::MissingVerdict)
            .count(),
        2
    );
    let neutral = &generator.requests_for(AgentRole::Neutral.as_str())[0].user_prompt;
    assert!(neutral.contains("gave no verdict either"));
    assert!(neutral.contains("the multiple already discounts"));
    assert!(!result.final_decision.overrides_trader);
}

#[tokio::test]
async fn refused_portfolio_manager_fails_the_run() {
    let generator =
        Arc::new(ScriptedGenerator::canned().refuse(AgentRole::PortfolioManager.as_str()));
    let memory = memory();
    let failure = graph(one_round(), &generator, &memory)
        .propagate("NVDA", may_10())
        .await
        .unwrap_err();

    assert_eq!(failure.phase, Phase::PortfolioManager);
    assert_eq!(failure.transcript.debate_turns(DebateKind::Risk).count(), 3);
    assert!(memory.is_empty());
}

#[tokio::test]
async fn cancelled_before_start_does_nothing() {
    let generator = Arc::new(ScriptedGenerator::canned());
    let memory = memory();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let failure = graph(one_round(), &generator, &memory)
        .propagate_with_cancel("NVDA", may_10(), &cancel)
        .await
        .unwrap_err();

    assert!(matches!(
        failure.error,
        AgentError::Cancelled {
            phase: Phase::Analysts
        }
    ));
    assert_eq!(generator.total_calls(), 0);
    assert!(failure.transcript.entries.is_empty());
    assert!(memory.is_empty());
}

/// Cancels the run's token as soon as analysts ask for data.
struct CancellingFeed {
    cancel: CancellationToken,
}

#[async_trait]
impl DataFeed for CancellingFeed {
    async fn excerpt(
        &self,
        _role: AnalystRole,
        _symbol: &str,
        _as_of_date: NaiveDate,
        _mode: DataMode,
    ) -> Result<Option<String>, AgentError> {
        self.cancel.cancel();
        Ok(None)
    }
}

#[tokio::test]
async fn cancelled_mid_run_stops_at_the_next_phase() {
    let generator = Arc::new(ScriptedGenerator::canned());
    let memory = memory();
    let cancel = CancellationToken::new();
    let failure = graph(one_round(), &generator, &memory)
        .with_data_feed(Arc::new(CancellingFeed {
            cancel: cancel.clone(),
        }))
        .propagate_with_cancel("NVDA", may_10(), &cancel)
        .await
        .unwrap_err();

    assert_eq!(failure.phase, Phase::ResearchDebate);
    assert!(matches!(failure.error, AgentError::Cancelled { .. }));
    assert_eq!(generator.calls(AgentRole::Bull.as_str()), 0);
    assert!(memory.is_empty());
}

#[tokio::test]
async fn reflect_labels_exactly_one_record() {
    let generator = Arc::new(ScriptedGenerator::canned());
    let memory = memory();
    let graph = graph(one_round(), &generator, &memory);
    let run = graph.propagate("NVDA", may_10()).await.unwrap();

    let labeled: RecordId = graph.reflect_and_remember(dec!(0.042)).await.unwrap();
    assert_eq!(Some(labeled), run.memory_record_id);

    let record = memory.get(labeled).unwrap().unwrap();
    let outcome = record.realized_outcome().unwrap();
    assert_eq!(outcome.realized_return, dec!(0.042));
    assert_eq!(outcome.lessons.len(), AgentRole::REFLECTING.len());
    for role in AgentRole::REFLECTING {
        assert_eq!(generator.calls(&reflection_tag(role)), 1);
    }

    // Nothing left to reflect on
    let again = graph.reflect_and_remember(dec!(-0.01)).await.unwrap_err();
    assert!(matches!(
        again,
        AgentError::Memory(MemoryError::NothingToReflect)
    ));
    assert_eq!(
        memory
            .get(labeled)
            .unwrap()
            .unwrap()
            .realized_outcome()
            .unwrap()
            .realized_return,
        dec!(0.042)
    );
}

#[tokio::test]
async fn reflect_without_a_run_has_nothing_to_do() {
    let generator = Arc::new(ScriptedGenerator::canned());
    let graph = graph(one_round(), &generator, &memory());
    assert!(matches!(
        graph.reflect_and_remember(dec!(0.01)).await,
        Err(AgentError::Memory(MemoryError::NothingToReflect))
    ));
    assert_eq!(generator.total_calls(), 0);
}

#[tokio::test]
async fn reflect_labels_this_graphs_run_not_the_newest_record() {
    let generator = Arc::new(ScriptedGenerator::canned());
    let shared = memory();
    let first = graph(one_round(), &generator, &shared);
    let second = graph(one_round(), &generator, &shared);

    let nvda = first.propagate("NVDA", may_10()).await.unwrap();
    let aapl = second.propagate("AAPL", may_10()).await.unwrap();
    assert_eq!(nvda.memory_record_id, Some(1));
    assert_eq!(aapl.memory_record_id, Some(2));

    let labeled = first.reflect_and_remember(dec!(0.05)).await.unwrap();
    assert_eq!(labeled, 1);
    let nvda_record = shared.get(1).unwrap().unwrap();
    assert_eq!(nvda_record.symbol, "NVDA");
    assert_eq!(
        nvda_record.realized_outcome().unwrap().realized_return,
        dec!(0.05)
    );
    assert!(!shared.get(2).unwrap().unwrap().is_labeled());

    let labeled = second.reflect_and_remember(dec!(-0.02)).await.unwrap();
    assert_eq!(labeled, 2);
    assert_eq!(
        shared
            .get(1)
            .unwrap()
            .unwrap()
            .realized_outcome()
            .unwrap()
            .realized_return,
        dec!(0.05)
    );
}

#[tokio::test]
async fn reflect_on_names_its_record() {
    let generator = Arc::new(ScriptedGenerator::canned());
    let memory = memory();
    let graph = graph(one_round(), &generator, &memory);
    graph.propagate("NVDA", may_10()).await.unwrap();
    graph.propagate("AAPL", may_10()).await.unwrap();

    assert_eq!(graph.reflect_on(1, dec!(0.01)).await.unwrap(), 1);
    assert!(!memory.get(2).unwrap().unwrap().is_labeled());
    assert!(matches!(
        graph.reflect_on(1, dec!(0.02)).await,
        Err(AgentError::Memory(MemoryError::AlreadyLabeled(1)))
    ));

    let calls_before = generator.total_calls();
    assert!(matches!(
        graph.reflect_on(99, dec!(0.02)).await,
        Err(AgentError::Memory(MemoryError::UnknownRecord(99)))
    ));
    assert_eq!(generator.total_calls(), calls_before);
}

#[tokio::test]
async fn failed_lesson_is_omitted_not_fatal() {
    let generator =
        Arc::new(ScriptedGenerator::canned().refuse(&reflection_tag(AgentRole::Bear)));
    let memory = memory();
    let graph = graph(one_round(), &generator, &memory);
    graph.propagate("NVDA", may_10()).await.unwrap();

    let id = graph.reflect_and_remember(dec!(-0.03)).await.unwrap();
    let record = memory.get(id).unwrap().unwrap();
    let lessons = &record.realized_outcome().unwrap().lessons;
    assert!(!lessons.contains_key(&AgentRole::Bear));
    assert_eq!(lessons.len(), AgentRole::REFLECTING.len() - 1);
}

#[tokio::test]
async fn labeled_memory_reaches_later_prompts() {
    let generator = Arc::new(ScriptedGenerator::canned());
    let memory = memory();
    let graph = graph(one_round(), &generator, &memory);

    graph.propagate("NVDA", may_10()).await.unwrap();
    // Unlabeled records are never shown
    let trader_prompt = &generator.requests_for(AgentRole::Trader.as_str())[0].user_prompt;
    assert!(!trader_prompt.contains("LESSONS FROM SIMILAR PAST SITUATIONS"));

    graph.reflect_and_remember(dec!(0.042)).await.unwrap();
    let second = graph
        .propagate("NVDA", NaiveDate::from_ymd_opt(2024, 5, 17).unwrap())
        .await
        .unwrap();

    let trader_prompts = generator.requests_for(AgentRole::Trader.as_str());
    let later = &trader_prompts[1].user_prompt;
    assert!(later.contains("LESSONS FROM SIMILAR PAST SITUATIONS"));
    assert!(later.contains("2024-05-10"));
    assert!(later.contains("Lesson for trader"));
    assert!(second
        .transcript
        .entries
        .iter()
        .any(|e| matches!(e, TranscriptEntry::MemoryConsulted { record_ids, .. } if record_ids == &vec![1])));
    assert_eq!(second.memory_record_id, Some(2));
}

#[tokio::test]
async fn memory_top_k_zero_skips_retrieval() {
    let generator = Arc::new(ScriptedGenerator::canned());
    let memory = memory();
    let config = DeliberationConfig {
        memory_top_k: 0,
        ..one_round()
    };
    let graph = graph(config, &generator, &memory);
    graph.propagate("NVDA", may_10()).await.unwrap();
    graph.reflect_and_remember(dec!(0.042)).await.unwrap();

    let second = graph.propagate("NVDA", may_10()).await.unwrap();
    assert!(!second
        .transcript
        .entries
        .iter()
        .any(|e| matches!(e, TranscriptEntry::MemoryConsulted { .. })));
}

/// Index that always reports content but cannot answer.
struct BrokenIndex;

#[async_trait]
impl SimilarityIndex for BrokenIndex {
    async fn insert(&self, _id: RecordId, _vector: Vec<f32>) -> Result<(), MemoryError> {
        Err(MemoryError::IndexUnavailable("offline".to_string()))
    }

    async fn query(
        &self,
        _vector: &[f32],
        _k: usize,
    ) -> Result<Vec<(RecordId, f32)>, MemoryError> {
        Err(MemoryError::IndexUnavailable("offline".to_string()))
    }

    fn len(&self) -> usize {
        1
    }
}

#[tokio::test]
async fn broken_memory_degrades_instead_of_failing() {
    let generator = Arc::new(ScriptedGenerator::canned());
    let memory = Arc::new(MemoryStore::new(
        Arc::new(HashingEmbedder::new(64)),
        Arc::new(BrokenIndex),
    ));
    let result = graph(one_round(), &generator, &memory)
        .propagate("NVDA", may_10())
        .await
        .unwrap();

    let unavailable: Vec<_> = result
        .transcript
        .degradations_of(DegradationKind::MemoryUnavailable)
        .collect();
    // One per retrieving stage
    assert_eq!(unavailable.len(), Phase::ORDER.len());
    assert_eq!(result.final_decision.action, TradeAction::Buy);
}

#[tokio::test]
async fn only_analysts_may_use_tools() {
    let generator = Arc::new(ScriptedGenerator::canned());
    let result = graph(one_round(), &generator, &memory())
        .propagate("NVDA", may_10())
        .await
        .unwrap();

    for role in AnalystRole::ALL {
        let requests = generator.requests_for(&analyst_tag(role));
        assert!(requests.iter().all(|r| r.allow_tool_use));
    }
    for role in [
        AgentRole::Bull,
        AgentRole::Bear,
        AgentRole::ResearchManager,
        AgentRole::Trader,
        AgentRole::Aggressive,
        AgentRole::Conservative,
        AgentRole::Neutral,
        AgentRole::PortfolioManager,
    ] {
        let requests = generator.requests_for(role.as_str());
        assert!(!requests.is_empty(), "{role} was never asked");
        assert!(requests.iter().all(|r| !r.allow_tool_use), "{role} got tools");
    }

    let cited = result.transcript.entries.iter().any(|e| {
        matches!(e, TranscriptEntry::AnalystReport { citations, .. } if !citations.is_empty())
    });
    assert!(cited);
}

#[tokio::test]
async fn web_search_off_means_no_tools_at_all() {
    let config = DeliberationConfig {
        use_web_search: false,
        ..one_round()
    };
    let generator = Arc::new(ScriptedGenerator::canned());
    graph(config, &generator, &memory())
        .propagate("NVDA", may_10())
        .await
        .unwrap();

    for role in AnalystRole::ALL {
        assert!(generator
            .requests_for(&analyst_tag(role))
            .iter()
            .all(|r| !r.allow_tool_use));
    }
}

#[tokio::test]
async fn disabled_analysts_are_not_run() {
    let config = DeliberationConfig {
        analysts: vec![
            AnalystConfig {
                role: AnalystRole::Fundamentals,
                enabled: true,
            },
            AnalystConfig {
                role: AnalystRole::Technical,
                enabled: false,
            },
        ],
        ..one_round()
    };
    let generator = Arc::new(ScriptedGenerator::canned());
    let result = graph(config, &generator, &memory())
        .propagate("NVDA", may_10())
        .await
        .unwrap();

    assert_eq!(generator.calls(&analyst_tag(AnalystRole::Technical)), 0);
    assert_eq!(generator.calls(&analyst_tag(AnalystRole::News)), 0);
    let reported: Vec<AnalystRole> = result.state.analyst_reports().keys().copied().collect();
    assert_eq!(reported, vec![AnalystRole::Fundamentals]);
    assert!(result.state.missing_analysts().is_empty());
}

#[tokio::test]
async fn identical_inputs_give_identical_verdicts() {
    let first = Arc::new(ScriptedGenerator::canned());
    let second = Arc::new(ScriptedGenerator::canned());
    let a = graph(one_round(), &first, &memory())
        .propagate("NVDA", may_10())
        .await
        .unwrap();
    let b = graph(one_round(), &second, &memory())
        .propagate("NVDA", may_10())
        .await
        .unwrap();

    assert_eq!(a.final_decision, b.final_decision);
    assert_eq!(
        a.state.research_debate().unwrap().judge_verdict(),
        b.state.research_debate().unwrap().judge_verdict()
    );
    assert_eq!(
        first.requests_for(AgentRole::PortfolioManager.as_str()),
        second.requests_for(AgentRole::PortfolioManager.as_str())
    );
}

#[tokio::test]
async fn finished_state_rejects_a_second_decision() {
    let generator = Arc::new(ScriptedGenerator::canned());
    let result = graph(one_round(), &generator, &memory())
        .propagate("NVDA", may_10())
        .await
        .unwrap();

    assert!(result.state.is_terminal());
    let again = result
        .state
        .clone()
        .apply(StatePatch::FinalDecision(result.final_decision.clone()));
    assert!(again.is_err());
}

#[tokio::test]
async fn early_stop_ends_the_debate_on_consensus() {
    let generator = Arc::new(ScriptedGenerator::canned().respond(
        AgentRole::Bull.as_str(),
        "Both sides agree the setup favours buying. [CONSENSUS]",
    ));
    let config = DeliberationConfig {
        max_debate_rounds: 3,
        allow_early_stop: true,
        ..one_round()
    };
    let result = graph(config, &generator, &memory())
        .propagate("NVDA", may_10())
        .await
        .unwrap();

    let research = result.state.research_debate().unwrap();
    assert!(research.stopped_early());
    assert_eq!(research.history().len(), 1);
    assert!(research.judge_verdict().is_some());
}

#[tokio::test]
async fn consensus_marker_is_ignored_when_early_stop_is_off() {
    let generator = Arc::new(ScriptedGenerator::canned().respond(
        AgentRole::Bull.as_str(),
        "Both sides agree the setup favours buying. [CONSENSUS]",
    ));
    let result = graph(one_round(), &generator, &memory())
        .propagate("NVDA", may_10())
        .await
        .unwrap();

    let research = result.state.research_debate().unwrap();
    assert!(!research.stopped_early());
    assert_eq!(research.history().len(), 2);
}

#[tokio::test]
async fn portfolio_manager_may_override_the_trader() {
    let generator = Arc::new(ScriptedGenerator::canned().respond(
        AgentRole::PortfolioManager.as_str(),
        r#"{"action": "hold", "confidence": "0.55", "position_size_pct": null, "rationale": "Risk team is split; wait for the export ruling."}"#,
    ));
    let result = graph(one_round(), &generator, &memory())
        .propagate("NVDA", may_10())
        .await
        .unwrap();

    assert_eq!(result.state.trader_plan().unwrap().action, TradeAction::Buy);
    assert_eq!(result.final_decision.action, TradeAction::Hold);
    assert!(result.final_decision.overrides_trader);
    assert_eq!(result.final_decision.position_size_pct, None);
}

use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::debate::DebateKind;
use crate::decision::{FinalDecision, ResearchDecision, TraderPlan};
use crate::memory_record::RecordId;
use crate::roles::{AgentRole, AnalystRole};
use crate::state::DeliberationState;

/// Bumped whenever the transcript layout changes in a way renderers notice.
pub const TRANSCRIPT_SCHEMA_VERSION: u32 = 1;

/// The phases of a deliberation run, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Analysts,
    ResearchDebate,
    ResearchManager,
    Trader,
    RiskDebate,
    PortfolioManager,
}

impl Phase {
    pub const ORDER: [Phase; 6] = [
        Phase::Analysts,
        Phase::ResearchDebate,
        Phase::ResearchManager,
        Phase::Trader,
        Phase::RiskDebate,
        Phase::PortfolioManager,
    ];
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Analysts => "analysts",
            Self::ResearchDebate => "research_debate",
            Self::ResearchManager => "research_manager",
            Self::Trader => "trader",
            Self::RiskDebate => "risk_debate",
            Self::PortfolioManager => "portfolio_manager",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DegradationKind {
    /// An analyst report is missing.
    AnalystGap,
    /// A debate participant's turn produced no utterance.
    SkippedTurn,
    /// A judge could not render a verdict.
    MissingVerdict,
    /// Memory retrieval failed and the agent ran without past context.
    MemoryUnavailable,
}

/// Something the run tolerated instead of failing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Degradation {
    pub phase: Phase,
    pub kind: DegradationKind,
    /// The role or component affected.
    pub subject: String,
    pub reason: String,
}

/// One step of the decision path, in the order it happened.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TranscriptEntry {
    AnalystReport {
        role: AnalystRole,
        text: String,
        citations: Vec<String>,
        elapsed_ms: u64,
    },
    AnalystGap {
        role: AnalystRole,
        reason: String,
    },
    MemoryConsulted {
        agent: String,
        record_ids: Vec<RecordId>,
    },
    DebateTurn {
        debate: DebateKind,
        role: AgentRole,
        turn_index: u32,
        round: u32,
        utterance: String,
        elapsed_ms: u64,
    },
    DebateVerdict {
        debate: DebateKind,
        judge: AgentRole,
        verdict: String,
    },
    ResearchDecision(ResearchDecision),
    TraderPlan(TraderPlan),
    FinalDecision(FinalDecision),
}

/// The full, ordered record of a run, sufficient to reconstruct the
/// decision path.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Transcript {
    pub schema_version: u32,
    pub run_id: Uuid,
    pub symbol: String,
    pub as_of_date: NaiveDate,
    pub started_at: DateTime<Utc>,
    pub entries: Vec<TranscriptEntry>,
    pub degradations: Vec<Degradation>,
}

impl Transcript {
    pub fn for_state(state: &DeliberationState) -> Self {
        Self {
            schema_version: TRANSCRIPT_SCHEMA_VERSION,
            run_id: state.run_id(),
            symbol: state.symbol().to_string(),
            as_of_date: state.as_of_date(),
            started_at: Utc::now(),
            entries: Vec::new(),
            degradations: Vec::new(),
        }
    }

    pub fn push(&mut self, entry: TranscriptEntry) {
        self.entries.push(entry);
    }

    pub fn degrade(
        &mut self,
        phase: Phase,
        kind: DegradationKind,
        subject: impl Into<String>,
        reason: impl Into<String>,
    ) {
        self.degradations.push(Degradation {
            phase,
            kind,
            subject: subject.into(),
            reason: reason.into(),
        });
    }

    pub fn is_degraded(&self) -> bool {
        !self.degradations.is_empty()
    }

    pub fn degradations_of(&self, kind: DegradationKind) -> impl Iterator<Item = &Degradation> {
        self.degradations.iter().filter(move |d| d.kind == kind)
    }

    pub fn debate_turns(&self, debate: DebateKind) -> impl Iterator<Item = &TranscriptEntry> {
        self.entries.iter().filter(move |e| {
            matches!(e, TranscriptEntry::DebateTurn { debate: d, .. } if *d == debate)
        })
    }
}

/// The result of a completed run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Deliberation {
    pub transcript: Transcript,
    pub final_decision: FinalDecision,
    pub state: DeliberationState,
    /// The unlabeled memory record written for this run, if memory accepted it.
    pub memory_record_id: Option<RecordId>,
    pub processing_time_ms: u64,
}

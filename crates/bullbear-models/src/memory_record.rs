use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::decision::TradeAction;
use crate::roles::AgentRole;
use crate::set_once::StateInvariantViolation;

/// Monotonic record identifier. Higher ids are more recent.
pub type RecordId = u64;

/// What was decided, fixed when the record is written.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DecisionSummary {
    pub action: TradeAction,
    pub rationale: String,
    /// Each decision role's final position in the run.
    pub positions: BTreeMap<AgentRole, String>,
}

/// The realized result of a past decision, written once by reflection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Outcome {
    /// Signed return, e.g. `0.042` for +4.2%.
    pub realized_return: Decimal,
    /// Per-role lesson drawn from the outcome. Roles whose lesson could not
    /// be generated are absent.
    pub lessons: BTreeMap<AgentRole, String>,
    pub labeled_at: DateTime<Utc>,
}

/// A record waiting to be stored; the store assigns id and embedding.
#[derive(Debug, Clone, PartialEq)]
pub struct NewMemoryRecord {
    pub run_id: Uuid,
    pub symbol: String,
    pub as_of_date: NaiveDate,
    pub situation: String,
    pub decision_summary: DecisionSummary,
}

/// One persisted reflective unit. Immutable except for the one-way
/// outcome label.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MemoryRecord {
    pub id: RecordId,
    pub run_id: Uuid,
    pub symbol: String,
    pub as_of_date: NaiveDate,
    pub situation: String,
    pub situation_embedding: Vec<f32>,
    pub decision_summary: DecisionSummary,
    pub created_at: DateTime<Utc>,
    realized_outcome: Option<Outcome>,
}

impl MemoryRecord {
    pub fn new(id: RecordId, record: NewMemoryRecord, situation_embedding: Vec<f32>) -> Self {
        Self {
            id,
            run_id: record.run_id,
            symbol: record.symbol,
            as_of_date: record.as_of_date,
            situation: record.situation,
            situation_embedding,
            decision_summary: record.decision_summary,
            created_at: Utc::now(),
            realized_outcome: None,
        }
    }

    /// Rebuild a record read back from storage.
    #[allow(clippy::too_many_arguments)]
    pub fn restore(
        id: RecordId,
        run_id: Uuid,
        symbol: String,
        as_of_date: NaiveDate,
        situation: String,
        situation_embedding: Vec<f32>,
        decision_summary: DecisionSummary,
        created_at: DateTime<Utc>,
        realized_outcome: Option<Outcome>,
    ) -> Self {
        Self {
            id,
            run_id,
            symbol,
            as_of_date,
            situation,
            situation_embedding,
            decision_summary,
            created_at,
            realized_outcome,
        }
    }

    pub fn realized_outcome(&self) -> Option<&Outcome> {
        self.realized_outcome.as_ref()
    }

    pub fn is_labeled(&self) -> bool {
        self.realized_outcome.is_some()
    }

    /// Transition from unlabeled to labeled. Happens at most once.
    pub fn label(&mut self, outcome: Outcome) -> Result<(), StateInvariantViolation> {
        if self.realized_outcome.is_some() {
            return Err(StateInvariantViolation::new(
                "realized_outcome",
                format!("memory record {} is already labeled", self.id),
            ));
        }
        self.realized_outcome = Some(outcome);
        Ok(())
    }
}

/// A labeled record as presented to an agent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetrievedMemory {
    pub record_id: RecordId,
    pub similarity: f32,
    pub symbol: String,
    pub as_of_date: NaiveDate,
    pub decision_summary: DecisionSummary,
    pub realized_return: Decimal,
    pub lessons: BTreeMap<AgentRole, String>,
}

impl RetrievedMemory {
    pub fn from_record(record: &MemoryRecord, similarity: f32) -> Option<Self> {
        let outcome = record.realized_outcome()?;
        Some(Self {
            record_id: record.id,
            similarity,
            symbol: record.symbol.clone(),
            as_of_date: record.as_of_date,
            decision_summary: record.decision_summary.clone(),
            realized_return: outcome.realized_return,
            lessons: outcome.lessons.clone(),
        })
    }

    pub fn lesson_for(&self, role: AgentRole) -> Option<&str> {
        self.lessons.get(&role).map(String::as_str)
    }
}

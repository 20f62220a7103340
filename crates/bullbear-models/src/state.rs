use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::debate::{DebateKind, DebateState};
use crate::decision::{FinalDecision, ResearchDecision, TraderPlan};
use crate::roles::AnalystRole;
use crate::set_once::{SetOnce, StateInvariantViolation};

/// What one analyst contributed to the run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AnalystOutcome {
    Report {
        text: String,
        citations: Vec<String>,
        elapsed_ms: u64,
    },
    /// The analyst produced nothing; downstream stages proceed without it.
    Missing { reason: String },
}

impl AnalystOutcome {
    pub fn text(&self) -> Option<&str> {
        match self {
            Self::Report { text, .. } => Some(text),
            Self::Missing { .. } => None,
        }
    }
}

/// A stage's contribution to the state. Each variant names the only field
/// that stage owns.
#[derive(Debug, Clone)]
pub enum StatePatch {
    AnalystReport {
        role: AnalystRole,
        outcome: AnalystOutcome,
    },
    ResearchDebate(DebateState),
    ResearchManagerDecision(ResearchDecision),
    TraderPlan(TraderPlan),
    RiskDebate(DebateState),
    FinalDecision(FinalDecision),
}

/// The record threaded through one deliberation run.
///
/// Every field is single-assignment. Once `final_decision` is set the state is
/// terminal and any further patch is rejected.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeliberationState {
    run_id: Uuid,
    symbol: String,
    as_of_date: NaiveDate,
    analyst_reports: BTreeMap<AnalystRole, AnalystOutcome>,
    research_debate: SetOnce<DebateState>,
    research_manager_decision: SetOnce<ResearchDecision>,
    trader_plan: SetOnce<TraderPlan>,
    risk_debate: SetOnce<DebateState>,
    final_decision: SetOnce<FinalDecision>,
}

impl DeliberationState {
    pub fn new(symbol: impl Into<String>, as_of_date: NaiveDate) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            symbol: symbol.into(),
            as_of_date,
            analyst_reports: BTreeMap::new(),
            research_debate: SetOnce::new(),
            research_manager_decision: SetOnce::new(),
            trader_plan: SetOnce::new(),
            risk_debate: SetOnce::new(),
            final_decision: SetOnce::new(),
        }
    }

    /// Apply a stage's patch, consuming and returning the state.
    pub fn apply(mut self, patch: StatePatch) -> Result<Self, StateInvariantViolation> {
        if self.is_terminal() {
            return Err(StateInvariantViolation::new(
                "final_decision",
                "state is terminal; no further patches are accepted",
            ));
        }

        match patch {
            StatePatch::AnalystReport { role, outcome } => {
                if self.analyst_reports.contains_key(&role) {
                    return Err(StateInvariantViolation::already_set(format!(
                        "analyst_reports.{role}"
                    )));
                }
                self.analyst_reports.insert(role, outcome);
            }
            StatePatch::ResearchDebate(debate) => {
                expect_kind(&debate, DebateKind::Research, "research_debate")?;
                self.research_debate.set("research_debate", debate)?;
            }
            StatePatch::ResearchManagerDecision(decision) => {
                self.research_manager_decision
                    .set("research_manager_decision", decision)?;
            }
            StatePatch::TraderPlan(plan) => {
                self.trader_plan.set("trader_plan", plan)?;
            }
            StatePatch::RiskDebate(debate) => {
                expect_kind(&debate, DebateKind::Risk, "risk_debate")?;
                self.risk_debate.set("risk_debate", debate)?;
            }
            StatePatch::FinalDecision(decision) => {
                self.final_decision.set("final_decision", decision)?;
            }
        }

        Ok(self)
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn as_of_date(&self) -> NaiveDate {
        self.as_of_date
    }

    pub fn analyst_reports(&self) -> &BTreeMap<AnalystRole, AnalystOutcome> {
        &self.analyst_reports
    }

    pub fn research_debate(&self) -> Option<&DebateState> {
        self.research_debate.get()
    }

    pub fn research_manager_decision(&self) -> Option<&ResearchDecision> {
        self.research_manager_decision.get()
    }

    pub fn trader_plan(&self) -> Option<&TraderPlan> {
        self.trader_plan.get()
    }

    pub fn risk_debate(&self) -> Option<&DebateState> {
        self.risk_debate.get()
    }

    pub fn final_decision(&self) -> Option<&FinalDecision> {
        self.final_decision.get()
    }

    pub fn is_terminal(&self) -> bool {
        self.final_decision.is_set()
    }

    /// Reports that were actually produced, in stable role order.
    pub fn available_reports(&self) -> impl Iterator<Item = (AnalystRole, &str)> {
        self.analyst_reports
            .iter()
            .filter_map(|(role, outcome)| outcome.text().map(|text| (*role, text)))
    }

    pub fn missing_analysts(&self) -> Vec<AnalystRole> {
        self.analyst_reports
            .iter()
            .filter(|(_, outcome)| outcome.text().is_none())
            .map(|(role, _)| *role)
            .collect()
    }

    /// The market situation as seen by the analysts. This is the text that
    /// gets embedded for memory retrieval.
    pub fn situation(&self) -> String {
        let mut out = format!("{} as of {}\n", self.symbol, self.as_of_date);
        for (role, text) in self.available_reports() {
            out.push_str(&format!("\n## {role} report\n{}\n", text.trim()));
        }
        out
    }
}

fn expect_kind(
    debate: &DebateState,
    kind: DebateKind,
    field: &str,
) -> Result<(), StateInvariantViolation> {
    if debate.kind() != kind {
        return Err(StateInvariantViolation::new(
            field,
            format!("expected a {kind} debate, got {}", debate.kind()),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decision::TradeAction;
    use rust_decimal_macros::dec;

    fn state() -> DeliberationState {
        DeliberationState::new("NVDA", NaiveDate::from_ymd_opt(2024, 5, 10).unwrap())
    }

    fn report(text: &str) -> AnalystOutcome {
        AnalystOutcome::Report {
            text: text.to_string(),
            citations: vec![],
            elapsed_ms: 10,
        }
    }

    fn final_decision() -> FinalDecision {
        FinalDecision {
            action: TradeAction::Hold,
            confidence: dec!(0.5),
            position_size_pct: None,
            rationale: "wait".to_string(),
            overrides_trader: false,
        }
    }

    #[test]
    fn analyst_report_set_once_per_role() {
        let s = state()
            .apply(StatePatch::AnalystReport {
                role: AnalystRole::News,
                outcome: report("headlines"),
            })
            .unwrap();

        let err = s
            .apply(StatePatch::AnalystReport {
                role: AnalystRole::News,
                outcome: report("again"),
            })
            .unwrap_err();
        assert_eq!(err.field, "analyst_reports.news");
    }

    #[test]
    fn every_field_rejects_second_assignment() {
        let plan = TraderPlan {
            action: TradeAction::Buy,
            rationale: "momentum".to_string(),
        };
        let research = ResearchDecision {
            stance: TradeAction::Buy,
            recommendation: "buy".to_string(),
        };

        let patches = vec![
            StatePatch::ResearchDebate(DebateState::research(1)),
            StatePatch::ResearchManagerDecision(research),
            StatePatch::TraderPlan(plan),
            StatePatch::RiskDebate(DebateState::risk(1)),
        ];

        let mut s = state();
        for patch in patches {
            s = s.apply(patch.clone()).unwrap();
            assert!(s.clone().apply(patch).is_err());
        }
    }

    #[test]
    fn terminal_state_rejects_everything() {
        let s = state()
            .apply(StatePatch::FinalDecision(final_decision()))
            .unwrap();
        assert!(s.is_terminal());

        let err = s
            .apply(StatePatch::AnalystReport {
                role: AnalystRole::Technical,
                outcome: report("late"),
            })
            .unwrap_err();
        assert_eq!(err.field, "final_decision");
    }

    #[test]
    fn debate_kind_must_match_field() {
        let err = state()
            .apply(StatePatch::ResearchDebate(DebateState::risk(1)))
            .unwrap_err();
        assert_eq!(err.field, "research_debate");
    }

    #[test]
    fn situation_skips_missing_reports() {
        let s = state()
            .apply(StatePatch::AnalystReport {
                role: AnalystRole::Technical,
                outcome: report("RSI 28"),
            })
            .unwrap()
            .apply(StatePatch::AnalystReport {
                role: AnalystRole::Fundamentals,
                outcome: AnalystOutcome::Missing {
                    reason: "content policy".to_string(),
                },
            })
            .unwrap();

        let situation = s.situation();
        assert!(situation.starts_with("NVDA as of 2024-05-10"));
        assert!(situation.contains("technical report"));
        assert!(!situation.contains("fundamentals report"));
        assert_eq!(s.missing_analysts(), vec![AnalystRole::Fundamentals]);
    }
}

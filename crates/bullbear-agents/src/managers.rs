use std::sync::Arc;

use async_trait::async_trait;
use bullbear_models::{
    AgentRole, DebateState, DeliberationState, FinalDecision, ResearchDecision, RetrievedMemory,
    TraderPlan,
};
use tracing::info;

use crate::debate::{DebateContext, DebateJudge, Verdict};
use crate::error::AgentError;
use crate::generation::{GenerationRequest, TextGenerator};
use crate::parser::{parse_final_decision, parse_research_decision, parse_trader_plan};
use crate::prompts::{
    judge_user_prompt, portfolio_manager_system_prompt, research_manager_system_prompt,
    trader_system_prompt, trader_user_prompt,
};

/// Judges the bull/bear debate and hands an investment plan to the trader.
pub struct ResearchManager {
    generator: Arc<dyn TextGenerator>,
}

impl ResearchManager {
    pub fn new(generator: Arc<dyn TextGenerator>) -> Self {
        Self { generator }
    }
}

#[async_trait]
impl DebateJudge for ResearchManager {
    type Judgment = ResearchDecision;

    fn role(&self) -> AgentRole {
        AgentRole::ResearchManager
    }

    async fn judge(
        &self,
        context: &DebateContext<'_>,
        debate: &DebateState,
    ) -> Result<Verdict<ResearchDecision>, AgentError> {
        let request = GenerationRequest::new(
            research_manager_system_prompt(),
            judge_user_prompt(context.state, debate, context.memories, self.role()),
        );
        let generation = self.generator.generate(&request).await?;
        let decision = parse_research_decision(&generation.text)?;
        info!(stance = %decision.stance, "Research manager decided");
        Ok(Verdict {
            text: decision.recommendation.clone(),
            judgment: decision,
        })
    }
}

/// Judges the risk debate. Its decision is final and may override the
/// trader, or stand in for a trader who proposed nothing.
pub struct PortfolioManager {
    generator: Arc<dyn TextGenerator>,
}

impl PortfolioManager {
    pub fn new(generator: Arc<dyn TextGenerator>) -> Self {
        Self { generator }
    }
}

#[async_trait]
impl DebateJudge for PortfolioManager {
    type Judgment = FinalDecision;

    fn role(&self) -> AgentRole {
        AgentRole::PortfolioManager
    }

    async fn judge(
        &self,
        context: &DebateContext<'_>,
        debate: &DebateState,
    ) -> Result<Verdict<FinalDecision>, AgentError> {
        let request = GenerationRequest::new(
            portfolio_manager_system_prompt(),
            judge_user_prompt(context.state, debate, context.memories, self.role()),
        );
        let generation = self.generator.generate(&request).await?;
        let decision = parse_final_decision(
            &generation.text,
            context.state.trader_plan().map(|plan| plan.action),
        )?;
        info!(
            action = %decision.action,
            confidence = %decision.confidence,
            overrides_trader = decision.overrides_trader,
            "Portfolio manager decided"
        );
        Ok(Verdict {
            text: decision.rationale.clone(),
            judgment: decision,
        })
    }
}

/// Turns the research verdict (or, without one, the raw debate) into a
/// transaction proposal.
pub struct Trader {
    generator: Arc<dyn TextGenerator>,
}

impl Trader {
    pub fn new(generator: Arc<dyn TextGenerator>) -> Self {
        Self { generator }
    }

    pub async fn plan(
        &self,
        state: &DeliberationState,
        research: &DebateState,
        memories: &[RetrievedMemory],
    ) -> Result<TraderPlan, AgentError> {
        let request = GenerationRequest::new(
            trader_system_prompt(),
            trader_user_prompt(state, research, memories),
        );
        let generation = self.generator.generate(&request).await?;
        let plan = parse_trader_plan(&generation.text)?;
        info!(action = %plan.action, "Trader proposed");
        Ok(plan)
    }
}

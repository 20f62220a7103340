use bullbear_models::{
    AgentRole, AnalystRole, DataMode, DebateKind, DebateState, DeliberationState, MemoryRecord,
    RetrievedMemory,
};
use rust_decimal::Decimal;

use crate::parser::PROPOSAL_MARKER;

/// Marker a debater may emit when it has nothing left to contest.
pub const CONSENSUS_MARKER: &str = "[CONSENSUS]";

/// Every system prompt starts with a `[role:<tag>]` line so backends and
/// test doubles can tell the agents apart.
pub fn role_tag(tag: &str) -> String {
    format!("[role:{tag}]")
}

/// The tag of a system prompt built by this module.
pub fn tag_of(system_prompt: &str) -> Option<&str> {
    let rest = system_prompt.trim_start().strip_prefix("[role:")?;
    let end = rest.find(']')?;
    Some(&rest[..end])
}

pub fn analyst_tag(role: AnalystRole) -> String {
    format!("{}_analyst", role.as_str())
}

pub fn reflection_tag(role: AgentRole) -> String {
    format!("reflect_{}", role.as_str())
}

fn header(tag: &str, body: &str) -> String {
    format!(
        "{}\nYou are part of a trading firm's deliberation team. {}",
        role_tag(tag),
        body
    )
}

// ---------------------------------------------------------------------------
// Analysts
// ---------------------------------------------------------------------------

pub fn analyst_system_prompt(role: AnalystRole, mode: DataMode, web_search: bool) -> String {
    let focus = match role {
        AnalystRole::Fundamentals => {
            "You are the fundamentals analyst. Assess the company's financial health: \
             revenue and earnings trajectory, margins, balance sheet, cash flow, insider \
             transactions and valuation relative to history and peers."
        }
        AnalystRole::Sentiment => {
            "You are the social media sentiment analyst. Assess how investors and the public \
             feel about the company: tone and volume of discussion, shifts over the past \
             week, and whether sentiment is leading or lagging price."
        }
        AnalystRole::News => {
            "You are the news analyst. Assess recent company-specific and macroeconomic news \
             that bears on the instrument: earnings, guidance, regulation, supply chain, \
             rates and geopolitics."
        }
        AnalystRole::Technical => {
            "You are the technical analyst. Assess price action and indicators: trend \
             (moving averages), momentum (RSI, MACD), volatility (Bollinger Bands, ATR) and \
             volume confirmation. Choose the indicators that are complementary, not redundant."
        }
    };
    let data = match mode {
        DataMode::Live => "Use the most current data available to you.",
        DataMode::Cached => {
            "Work only from the data excerpt provided and your knowledge as of the analysis \
             date; do not assume information published after it."
        }
    };
    let tools = if web_search {
        "You may search the web. Cite every source you rely on by URL."
    } else {
        "Do not use external tools."
    };

    header(
        &analyst_tag(role),
        &format!(
            "{focus}\n\n\
             ## DATA\n\n\
             {data} {tools}\n\n\
             ## OUTPUT\n\n\
             Write a detailed report for the traders. Do not simply state that trends are \
             mixed; give fine-grained observations that could move a decision. End with a \
             Markdown table summarizing the key points."
        ),
    )
}

pub fn analyst_user_prompt(
    symbol: &str,
    as_of_date: &str,
    data_excerpt: Option<&str>,
    memories: &[RetrievedMemory],
) -> String {
    let mut prompt = format!("Instrument: {symbol}\nAnalysis date: {as_of_date}\n");
    if let Some(excerpt) = data_excerpt {
        prompt.push_str(&format!("\n## DATA EXCERPT\n\n{}\n", excerpt.trim()));
    }
    prompt.push_str(&render_memories(memories, None));
    prompt
}

// ---------------------------------------------------------------------------
// Debaters
// ---------------------------------------------------------------------------

pub fn debater_system_prompt(role: AgentRole, allow_early_stop: bool) -> String {
    let stance = match role {
        AgentRole::Bull => {
            "You are the bull researcher. Build the strongest evidence-based case for \
             investing: growth potential, competitive advantages, positive indicators. \
             Rebut the bear's latest points directly with specific data."
        }
        AgentRole::Bear => {
            "You are the bear researcher. Build the strongest evidence-based case against \
             investing: risks, competitive weaknesses, negative indicators. Rebut the \
             bull's latest points directly and expose over-optimistic assumptions."
        }
        AgentRole::Aggressive => {
            "You are the aggressive risk analyst. Champion high-reward opportunities in the \
             trader's plan, argue for bold sizing, and challenge caution that would miss \
             upside."
        }
        AgentRole::Conservative => {
            "You are the conservative risk analyst. Protect assets: stress the downside of the \
             trader's plan, volatility and drawdown risk, and argue for smaller or no exposure \
             where the risk is not paid for."
        }
        AgentRole::Neutral => {
            "You are the neutral risk analyst. Weigh the aggressive and conservative views, \
             point out where each is overreaching, and argue for a balanced, sustainable \
             position."
        }
        other => {
            return header(
                other.as_str(),
                "Contribute your perspective to the debate concisely.",
            )
        }
    };
    let early_stop = if allow_early_stop {
        format!(
            "\n\nIf the other side has conceded every material point, end your reply with \
             {CONSENSUS_MARKER}."
        )
    } else {
        String::new()
    };

    header(
        role.as_str(),
        &format!(
            "{stance}\n\n\
             ## STYLE\n\n\
             Speak conversationally, as in a live debate. Address the other participants' \
             most recent arguments; do not just list facts. Use lessons from past similar \
             situations when they are provided.{early_stop}"
        ),
    )
}

pub fn debate_user_prompt(
    role: AgentRole,
    state: &DeliberationState,
    debate: &DebateState,
    memories: &[RetrievedMemory],
) -> String {
    let mut prompt = render_situation(state);
    if let Some(decision) = state.research_manager_decision() {
        prompt.push_str(&format!(
            "\n## RESEARCH MANAGER ({})\n\n{}\n",
            decision.stance, decision.recommendation
        ));
    }
    match debate.kind() {
        DebateKind::Risk => prompt.push_str(&render_proposal(state)),
        DebateKind::Research => {}
    }
    prompt.push_str(&render_history(debate));

    let others: Vec<String> = debate
        .participants()
        .iter()
        .filter(|p| **p != role)
        .filter_map(|p| {
            debate
                .last_utterance_of(*p)
                .map(|u| format!("Latest from {p}: {u}"))
        })
        .collect();
    if !others.is_empty() {
        prompt.push_str(&format!("\n## RESPOND TO\n\n{}\n", others.join("\n\n")));
    }

    prompt.push_str(&render_memories(memories, Some(role)));
    prompt
}

// ---------------------------------------------------------------------------
// Judges and trader
// ---------------------------------------------------------------------------

pub fn research_manager_system_prompt() -> String {
    header(
        AgentRole::ResearchManager.as_str(),
        "You are the research manager and judge of the bull/bear debate. Evaluate both \
         sides critically and commit to a stance: buy, sell, or hold. Choose hold only when \
         the arguments genuinely balance, not as a fallback. Learn from the past mistakes \
         provided.\n\n\
         ## OUTPUT\n\n\
         Respond with ONLY a JSON object:\n\
         {\"stance\": \"buy|sell|hold\", \"recommendation\": \"<investment plan for the \
         trader: rationale and concrete strategic actions>\"}",
    )
}

pub fn trader_system_prompt() -> String {
    header(
        AgentRole::Trader.as_str(),
        &format!(
            "You are the trader. Turn the research team's investment plan into a concrete \
             transaction proposal: direction, entry approach, sizing and exits. Apply lessons \
             from past decisions.\n\n\
             ## OUTPUT\n\n\
             Explain your plan, then always end with \
             '{PROPOSAL_MARKER} **BUY/HOLD/SELL**'."
        ),
    )
}

pub fn trader_user_prompt(
    state: &DeliberationState,
    research: &DebateState,
    memories: &[RetrievedMemory],
) -> String {
    let mut prompt = render_situation(state);
    match state.research_manager_decision() {
        Some(decision) => prompt.push_str(&format!(
            "\n## INVESTMENT PLAN ({})\n\n{}\n",
            decision.stance, decision.recommendation
        )),
        None => {
            prompt.push_str(
                "\n## INVESTMENT PLAN\n\nThe research manager gave no verdict. Decide from the \
                 debate itself.\n",
            );
            prompt.push_str(&render_history(research));
        }
    }
    prompt.push_str(&render_memories(memories, Some(AgentRole::Trader)));
    prompt
}

pub fn portfolio_manager_system_prompt() -> String {
    header(
        AgentRole::PortfolioManager.as_str(),
        "You are the portfolio manager and judge of the risk debate. Weigh the aggressive, \
         conservative and neutral analysts' arguments and decide the firm's final action. \
         You may override the trader's proposal. Learn from past mistakes so you do not \
         repeat them.\n\n\
         ## OUTPUT\n\n\
         Respond with ONLY a JSON object:\n\
         {\"action\": \"buy|sell|hold\", \"confidence\": \"0.0-1.0\", \
         \"position_size_pct\": \"<percent of portfolio, or null>\", \
         \"rationale\": \"<reasoning anchored in the debate>\"}",
    )
}

pub fn judge_user_prompt(
    state: &DeliberationState,
    debate: &DebateState,
    memories: &[RetrievedMemory],
    judge: AgentRole,
) -> String {
    let mut prompt = render_situation(state);
    if debate.kind() == DebateKind::Risk {
        if let Some(decision) = state.research_manager_decision() {
            prompt.push_str(&format!(
                "\n## RESEARCH MANAGER ({})\n\n{}\n",
                decision.stance, decision.recommendation
            ));
        }
        prompt.push_str(&render_proposal(state));
    }
    prompt.push_str(&render_history(debate));
    if debate.history().is_empty() {
        prompt.push_str("\nNo arguments were exchanged; decide from the material above.\n");
    }
    prompt.push_str(&render_memories(memories, Some(judge)));
    prompt
}

/// The trader's plan for the risk team to critique. Without one, the risk
/// team works from the research verdict, or from the research debate when
/// that is missing too.
fn render_proposal(state: &DeliberationState) -> String {
    if let Some(plan) = state.trader_plan() {
        return format!("\n## TRADER'S PLAN ({})\n\n{}\n", plan.action, plan.rationale);
    }
    let mut section = String::from("\n## TRADER'S PLAN\n\nThe trader made no proposal. ");
    match (state.research_manager_decision(), state.research_debate()) {
        (Some(_), _) => section.push_str("Critique the research manager's plan instead.\n"),
        (None, Some(research)) => {
            section.push_str(
                "The research manager gave no verdict either. Work from the research debate.\n",
            );
            section.push_str(&render_history(research));
        }
        (None, None) => section.push_str("Work from the analyst reports.\n"),
    }
    section
}

// ---------------------------------------------------------------------------
// Reflection
// ---------------------------------------------------------------------------

pub fn reflection_system_prompt(role: AgentRole) -> String {
    header(
        &reflection_tag(role),
        &format!(
            "You are reviewing the {role}'s contribution to a past decision whose outcome \
             is now known. Judge whether the reasoning was right or wrong given the realized \
             return, identify the factors that mattered most, and state how to improve. \
             Finish with one or two sentences that capture the lesson; they will be shown to \
             the {role} in future similar situations."
        ),
    )
}

pub fn reflection_user_prompt(
    record: &MemoryRecord,
    role: AgentRole,
    realized_return: Decimal,
) -> String {
    let position = record
        .decision_summary
        .positions
        .get(&role)
        .map(String::as_str)
        .unwrap_or("(no recorded position)");
    format!(
        "## SITUATION\n\n{}\n\n\
         ## DECISION\n\n{} - {}\n\n\
         ## {} POSITION\n\n{}\n\n\
         ## REALIZED RETURN\n\n{}\n",
        record.situation.trim(),
        record.decision_summary.action,
        record.decision_summary.rationale,
        role.as_str().to_uppercase(),
        position,
        realized_return
    )
}

// ---------------------------------------------------------------------------
// Rendering helpers
// ---------------------------------------------------------------------------

fn render_situation(state: &DeliberationState) -> String {
    let mut out = format!(
        "## SITUATION\n\n{} as of {}\n",
        state.symbol(),
        state.as_of_date()
    );
    for (role, text) in state.available_reports() {
        out.push_str(&format!("\n### {role} report\n\n{}\n", text.trim()));
    }
    let missing = state.missing_analysts();
    if !missing.is_empty() {
        let names: Vec<&str> = missing.iter().map(|r| r.as_str()).collect();
        out.push_str(&format!(
            "\n(No report available from: {}.)\n",
            names.join(", ")
        ));
    }
    out
}

/// The debate so far, one line block per turn.
pub fn render_history(debate: &DebateState) -> String {
    if debate.history().is_empty() {
        return String::new();
    }
    let mut out = format!("\n## {} DEBATE SO FAR\n", debate.kind().to_string().to_uppercase());
    for turn in debate.history() {
        out.push_str(&format!("\n{}: {}\n", turn.role, turn.utterance.trim()));
    }
    out
}

/// Past situations and what came of them. When `role` is given, the lesson
/// recorded for that role is included.
pub fn render_memories(memories: &[RetrievedMemory], role: Option<AgentRole>) -> String {
    if memories.is_empty() {
        return String::new();
    }
    let mut out = String::from("\n## LESSONS FROM SIMILAR PAST SITUATIONS\n");
    for (i, memory) in memories.iter().enumerate() {
        out.push_str(&format!(
            "\n{}. {} on {}: decided {} ({}); realized return {}\n",
            i + 1,
            memory.symbol,
            memory.as_of_date,
            memory.decision_summary.action,
            memory.decision_summary.rationale.trim(),
            memory.realized_return
        ));
        if let Some(lesson) = role.and_then(|r| memory.lesson_for(r)) {
            out.push_str(&format!("   Lesson: {}\n", lesson.trim()));
        }
    }
    out
}

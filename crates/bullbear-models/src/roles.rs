use std::fmt;

use serde::{Deserialize, Serialize};

/// The four report-producing analysts that run in parallel at the start of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalystRole {
    Fundamentals,
    Sentiment,
    News,
    Technical,
}

impl AnalystRole {
    pub const ALL: [AnalystRole; 4] = [
        AnalystRole::Fundamentals,
        AnalystRole::Sentiment,
        AnalystRole::News,
        AnalystRole::Technical,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Fundamentals => "fundamentals",
            Self::Sentiment => "sentiment",
            Self::News => "news",
            Self::Technical => "technical",
        }
    }
}

impl fmt::Display for AnalystRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Every role that takes part in the decision path after the analysts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentRole {
    Bull,
    Bear,
    ResearchManager,
    Trader,
    Aggressive,
    Conservative,
    Neutral,
    PortfolioManager,
}

impl AgentRole {
    /// Participants of the bull/bear research debate, in speaking order.
    pub const RESEARCH_DEBATERS: [AgentRole; 2] = [AgentRole::Bull, AgentRole::Bear];

    /// Participants of the risk debate, in speaking order.
    pub const RISK_DEBATERS: [AgentRole; 3] = [
        AgentRole::Aggressive,
        AgentRole::Conservative,
        AgentRole::Neutral,
    ];

    /// Roles that receive a lesson when a run's outcome is reflected on.
    pub const REFLECTING: [AgentRole; 5] = [
        AgentRole::Bull,
        AgentRole::Bear,
        AgentRole::ResearchManager,
        AgentRole::Trader,
        AgentRole::PortfolioManager,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Bull => "bull",
            Self::Bear => "bear",
            Self::ResearchManager => "research_manager",
            Self::Trader => "trader",
            Self::Aggressive => "aggressive",
            Self::Conservative => "conservative",
            Self::Neutral => "neutral",
            Self::PortfolioManager => "portfolio_manager",
        }
    }
}

impl fmt::Display for AgentRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

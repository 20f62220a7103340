use std::fmt;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum TradeAction {
    Buy,
    Sell,
    Hold,
}

impl TradeAction {
    pub const ALL: [TradeAction; 3] = [TradeAction::Buy, TradeAction::Sell, TradeAction::Hold];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Buy => "buy",
            Self::Sell => "sell",
            Self::Hold => "hold",
        }
    }

    /// Case-insensitive match of a bare action word, tolerating markdown emphasis.
    pub fn parse_word(word: &str) -> Option<Self> {
        let cleaned = word.trim_matches(|c: char| !c.is_ascii_alphabetic());
        match cleaned.to_ascii_lowercase().as_str() {
            "buy" => Some(Self::Buy),
            "sell" => Some(Self::Sell),
            "hold" => Some(Self::Hold),
            _ => None,
        }
    }
}

impl fmt::Display for TradeAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The research manager's synthesis of the bull/bear debate.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResearchDecision {
    pub stance: TradeAction,
    pub recommendation: String,
}

/// The trader's proposed action, critiqued by the risk debate.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TraderPlan {
    pub action: TradeAction,
    pub rationale: String,
}

/// The portfolio manager's terminal verdict.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FinalDecision {
    pub action: TradeAction,
    /// 0.0 to 1.0.
    pub confidence: Decimal,
    /// Suggested position size as a percentage of the portfolio.
    pub position_size_pct: Option<Decimal>,
    pub rationale: String,
    /// True when the portfolio manager rejected the trader's proposed action.
    pub overrides_trader: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn parse_word_handles_emphasis_and_case() {
        assert_eq!(TradeAction::parse_word("**BUY**"), Some(TradeAction::Buy));
        assert_eq!(TradeAction::parse_word("Sell."), Some(TradeAction::Sell));
        assert_eq!(TradeAction::parse_word("hold"), Some(TradeAction::Hold));
        assert_eq!(TradeAction::parse_word("holding"), None);
    }

    #[test]
    fn final_decision_decimal_as_string() {
        let decision = FinalDecision {
            action: TradeAction::Buy,
            confidence: dec!(0.72),
            position_size_pct: Some(dec!(5)),
            rationale: "Risk acceptable".to_string(),
            overrides_trader: false,
        };
        let json = serde_json::to_value(&decision).unwrap();
        assert_eq!(json["action"], "buy");
        assert_eq!(json["confidence"], "0.72");
    }
}

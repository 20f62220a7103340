use std::str::FromStr;

use bullbear_models::{FinalDecision, ResearchDecision, TradeAction, TraderPlan};
use rust_decimal::Decimal;

use crate::error::AgentError;

/// Extract the first JSON object from a string that may contain surrounding text.
///
/// Handles common Claude response formats:
/// - Clean JSON: `{"key": "value"}`
/// - Markdown-wrapped: ```json\n{"key": "value"}\n```
/// - Prefix text: `Here is the analysis:\n{"key": "value"}`
pub fn extract_json(text: &str) -> Result<String, AgentError> {
    let trimmed = text.trim();

    // Try parsing the whole thing as JSON first
    if trimmed.starts_with('{') && serde_json::from_str::<serde_json::Value>(trimmed).is_ok() {
        return Ok(trimmed.to_string());
    }

    // Try extracting from markdown code block
    if let Some(json_str) = extract_from_markdown_block(trimmed) {
        if serde_json::from_str::<serde_json::Value>(&json_str).is_ok() {
            return Ok(json_str);
        }
    }

    // Try finding the first { ... } pair using brace matching
    if let Some(json_str) = extract_first_object(trimmed) {
        if serde_json::from_str::<serde_json::Value>(&json_str).is_ok() {
            return Ok(json_str);
        }
    }

    Err(AgentError::Parse(format!(
        "No valid JSON object found in response (length={})",
        text.len()
    )))
}

/// Extract JSON from a markdown code block (```json ... ``` or ``` ... ```)
fn extract_from_markdown_block(text: &str) -> Option<String> {
    // Look for ```json or just ```
    let start_markers = ["```json\n", "```json\r\n", "```\n", "```\r\n"];

    for marker in &start_markers {
        if let Some(start) = text.find(marker) {
            let json_start = start + marker.len();
            if let Some(end) = text[json_start..].find("```") {
                let extracted = text[json_start..json_start + end].trim();
                return Some(extracted.to_string());
            }
        }
    }

    None
}

/// Find the first balanced { ... } in the text. Braces and quotes in prose
/// before the object are ignored.
fn extract_first_object(text: &str) -> Option<String> {
    let mut depth = 0usize;
    let mut start = 0;
    let mut in_string = false;
    let mut escape_next = false;

    for (i, ch) in text.char_indices() {
        if escape_next {
            escape_next = false;
            continue;
        }

        match ch {
            '\\' if in_string => {
                escape_next = true;
            }
            '"' if depth > 0 => {
                in_string = !in_string;
            }
            '{' if !in_string => {
                if depth == 0 {
                    start = i;
                }
                depth += 1;
            }
            '}' if !in_string && depth > 0 => {
                depth -= 1;
                if depth == 0 {
                    return Some(text[start..=i].to_string());
                }
            }
            _ => {}
        }
    }

    None
}

/// Marker the trader and portfolio manager are asked to end with.
pub const PROPOSAL_MARKER: &str = "FINAL TRANSACTION PROPOSAL:";

/// Find the action an agent committed to.
///
/// Tried in order: an `action`/`stance`/`decision` field of an embedded JSON
/// object, the proposal marker, then the last standalone buy/sell/hold word.
/// Fails rather than guessing when none is present.
pub fn parse_action(text: &str) -> Result<TradeAction, AgentError> {
    if let Some(value) = json_object(text) {
        for key in ["action", "stance", "decision"] {
            if let Some(action) = value
                .get(key)
                .and_then(|v| v.as_str())
                .and_then(TradeAction::parse_word)
            {
                return Ok(action);
            }
        }
    }

    if let Some(action) = action_after_marker(text) {
        return Ok(action);
    }

    text.split_whitespace()
        .rev()
        .find_map(TradeAction::parse_word)
        .ok_or_else(|| {
            AgentError::Parse(format!(
                "No buy/sell/hold stance found in response (length={})",
                text.len()
            ))
        })
}

fn action_after_marker(text: &str) -> Option<TradeAction> {
    let upper = text.to_ascii_uppercase();
    let start = upper.rfind(PROPOSAL_MARKER)? + PROPOSAL_MARKER.len();
    text[start..].split_whitespace().next().and_then(TradeAction::parse_word)
}

fn json_object(text: &str) -> Option<serde_json::Value> {
    let json_str = extract_json(text).ok()?;
    serde_json::from_str::<serde_json::Value>(&json_str)
        .ok()
        .filter(|v| v.is_object())
}

fn string_field(value: &serde_json::Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .find_map(|key| value.get(*key).and_then(|v| v.as_str()))
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Decimal from a JSON string (`"0.72"`) or number (`0.72`).
fn decimal_field(value: &serde_json::Value, key: &str) -> Option<Decimal> {
    match value.get(key)? {
        serde_json::Value::String(s) => Decimal::from_str(s.trim().trim_end_matches('%')).ok(),
        serde_json::Value::Number(n) => Decimal::from_str(&n.to_string()).ok(),
        _ => None,
    }
}

/// Parse the research manager's synthesis.
pub fn parse_research_decision(text: &str) -> Result<ResearchDecision, AgentError> {
    let stance = parse_action(text)?;
    let recommendation = json_object(text)
        .and_then(|v| string_field(&v, &["recommendation", "rationale", "plan"]))
        .unwrap_or_else(|| text.trim().to_string());
    Ok(ResearchDecision {
        stance,
        recommendation,
    })
}

/// Parse the trader's proposal.
pub fn parse_trader_plan(text: &str) -> Result<TraderPlan, AgentError> {
    let action = parse_action(text)?;
    let rationale = json_object(text)
        .and_then(|v| string_field(&v, &["rationale", "reasoning", "plan"]))
        .unwrap_or_else(|| text.trim().to_string());
    Ok(TraderPlan { action, rationale })
}

/// Confidence recorded when the portfolio manager states none.
pub fn unstated_confidence() -> Decimal {
    Decimal::new(5, 1)
}

/// Parse the portfolio manager's verdict. `trader_action` is what the trader
/// proposed, if anything; a different action marks the decision as an
/// override. Without a proposal there is nothing to override.
pub fn parse_final_decision(
    text: &str,
    trader_action: Option<TradeAction>,
) -> Result<FinalDecision, AgentError> {
    let action = parse_action(text)?;
    let json = json_object(text);

    let confidence = json
        .as_ref()
        .and_then(|v| decimal_field(v, "confidence"))
        .map(|c| c.clamp(Decimal::ZERO, Decimal::ONE))
        .unwrap_or_else(unstated_confidence);
    let position_size_pct = json
        .as_ref()
        .and_then(|v| decimal_field(v, "position_size_pct"))
        .map(|p| p.max(Decimal::ZERO));
    let rationale = json
        .as_ref()
        .and_then(|v| string_field(v, &["rationale", "reasoning"]))
        .unwrap_or_else(|| text.trim().to_string());

    Ok(FinalDecision {
        action,
        confidence,
        position_size_pct,
        rationale,
        overrides_trader: trader_action.is_some_and(|proposed| proposed != action),
    })
}

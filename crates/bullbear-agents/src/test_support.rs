//! Test support: a deterministic text generator for driving whole runs
//! without a model backend.
//!
//! `ScriptedGenerator` answers by the `[role:<tag>]` line every system
//! prompt starts with, so one instance can play every agent. Failures can be
//! injected per tag, and every call is counted.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use bullbear_models::{AgentRole, AnalystRole};

use crate::error::AgentError;
use crate::generation::{Generation, GenerationRequest, TextGenerator};
use crate::prompts::{analyst_tag, reflection_tag, tag_of};

/// Canned generator keyed by role tag.
pub struct ScriptedGenerator {
    model: String,
    responses: HashMap<String, String>,
    refusals: HashSet<String>,
    transient_failures: Mutex<HashMap<String, u32>>,
    rate_limits: Mutex<HashMap<String, u32>>,
    calls: Mutex<HashMap<String, u32>>,
    requests: Mutex<Vec<GenerationRequest>>,
}

impl ScriptedGenerator {
    /// A generator with no responses; every call fails until `respond` is used.
    pub fn empty() -> Self {
        Self {
            model: "scripted".to_string(),
            responses: HashMap::new(),
            refusals: HashSet::new(),
            transient_failures: Mutex::new(HashMap::new()),
            rate_limits: Mutex::new(HashMap::new()),
            calls: Mutex::new(HashMap::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Responses for every agent in a bullish NVDA deliberation that ends in
    /// a buy.
    pub fn canned() -> Self {
        let mut generator = Self::empty()
            .respond(
                &analyst_tag(AnalystRole::Fundamentals),
                "Data center revenue grew 427% year over year to $22.6B; gross margin 78.4%. \
                 Forward P/E near 35 is rich but below the three-year average.",
            )
            .respond(
                &analyst_tag(AnalystRole::Sentiment),
                "Retail and institutional sentiment strongly positive ahead of the split \
                 announcement; mention volume up 60% week over week.",
            )
            .respond(
                &analyst_tag(AnalystRole::News),
                "Hyperscalers raised 2024 capex guidance. Export restrictions to China remain \
                 a headline risk. See https://example.com/nvda-capex",
            )
            .respond(
                &analyst_tag(AnalystRole::Technical),
                "Price above the 50 and 200 day SMAs; RSI 64, MACD above signal. ATR elevated \
                 at 4% of price.",
            )
            .respond(
                AgentRole::Bull.as_str(),
                "Bull: capex guidance from every hyperscaler points to demand outrunning \
                 supply through next year; margins prove pricing power.",
            )
            .respond(
                AgentRole::Bear.as_str(),
                "Bear: the multiple already discounts perfect execution, and export rules could \
                 remove a fifth of data center sales overnight.",
            )
            .respond(
                AgentRole::ResearchManager.as_str(),
                r#"{"stance": "buy", "recommendation": "Buy: demand visibility outweighs valuation risk. Scale in over two weeks."}"#,
            )
            .respond(
                AgentRole::Trader.as_str(),
                "Enter half the target position now and the rest on any pullback to the 50 day \
                 SMA.\nFINAL TRANSACTION PROPOSAL: **BUY**",
            )
            .respond(
                AgentRole::Aggressive.as_str(),
                "Aggressive: full size now; waiting for a pullback risks missing the move.",
            )
            .respond(
                AgentRole::Conservative.as_str(),
                "Conservative: cap the position at 3% given ATR at 4% of price.",
            )
            .respond(
                AgentRole::Neutral.as_str(),
                "Neutral: staged entry is right; size at 4% with a stop below the 50 day SMA.",
            )
            .respond(
                AgentRole::PortfolioManager.as_str(),
                r#"{"action": "buy", "confidence": "0.72", "position_size_pct": "4", "rationale": "Approve the staged buy at 4% of the portfolio with a stop below the 50 day SMA."}"#,
            );
        for role in AgentRole::REFLECTING {
            generator = generator.respond(
                &reflection_tag(role),
                &format!("Lesson for {role}: weigh supply constraints before sizing up."),
            );
        }
        generator
    }

    pub fn with_model(mut self, model: &str) -> Self {
        self.model = model.to_string();
        self
    }

    /// Answer `tag` with `text`.
    pub fn respond(mut self, tag: &str, text: &str) -> Self {
        self.responses.insert(tag.to_string(), text.to_string());
        self
    }

    /// Refuse every call for `tag` with a content-policy error.
    pub fn refuse(mut self, tag: &str) -> Self {
        self.refusals.insert(tag.to_string());
        self
    }

    /// Fail the next `times` calls for `tag` with a transient generation error.
    pub fn fail_transiently(mut self, tag: &str, times: u32) -> Self {
        if let Ok(map) = self.transient_failures.get_mut() {
            map.insert(tag.to_string(), times);
        }
        self
    }

    /// Fail the next `times` calls for `tag` with a rate-limit error.
    pub fn rate_limit(mut self, tag: &str, times: u32) -> Self {
        if let Ok(map) = self.rate_limits.get_mut() {
            map.insert(tag.to_string(), times);
        }
        self
    }

    /// Number of calls received for `tag`, failed ones included.
    pub fn calls(&self, tag: &str) -> u32 {
        self.calls
            .lock()
            .map(|calls| calls.get(tag).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    pub fn total_calls(&self) -> u32 {
        self.calls
            .lock()
            .map(|calls| calls.values().sum())
            .unwrap_or(0)
    }

    /// Every request received for `tag`, in order.
    pub fn requests_for(&self, tag: &str) -> Vec<GenerationRequest> {
        self.requests
            .lock()
            .map(|requests| {
                requests
                    .iter()
                    .filter(|r| tag_of(&r.system_prompt) == Some(tag))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    fn take_failure(map: &Mutex<HashMap<String, u32>>, tag: &str) -> Result<bool, AgentError> {
        let mut map = map.lock().map_err(poisoned)?;
        match map.get_mut(tag) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

fn poisoned<T>(e: std::sync::PoisonError<T>) -> AgentError {
    AgentError::Generation(format!("scripted generator lock poisoned: {e}"))
}

#[async_trait]
impl TextGenerator for ScriptedGenerator {
    fn model(&self) -> &str {
        &self.model
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<Generation, AgentError> {
        let tag = tag_of(&request.system_prompt)
            .ok_or_else(|| AgentError::Generation("system prompt has no role tag".to_string()))?
            .to_string();

        {
            let mut calls = self.calls.lock().map_err(poisoned)?;
            *calls.entry(tag.clone()).or_insert(0) += 1;
        }
        self.requests.lock().map_err(poisoned)?.push(request.clone());

        if self.refusals.contains(&tag) {
            return Err(AgentError::ContentPolicy(format!("{tag} request refused")));
        }
        if Self::take_failure(&self.rate_limits, &tag)? {
            return Err(AgentError::RateLimited(format!("{tag}: 429")));
        }
        if Self::take_failure(&self.transient_failures, &tag)? {
            return Err(AgentError::Generation(format!("{tag}: upstream 503")));
        }

        let text = self
            .responses
            .get(&tag)
            .cloned()
            .ok_or_else(|| AgentError::Generation(format!("no scripted response for {tag}")))?;
        let citations = if request.allow_tool_use {
            vec![format!("https://example.com/search/{tag}")]
        } else {
            Vec::new()
        };
        Ok(Generation { text, citations })
    }
}

//! bullbear - multi-agent trading deliberation engine
//!
//! Analysts report on an instrument in parallel, bull and bear researchers
//! debate, a research manager rules, a trader proposes, a three-way risk
//! debate critiques the proposal and a portfolio manager makes the final
//! call. Outcomes are reflected on later and fed back as memory.
//!
//! # Library Usage
//!
//! ```rust,no_run
//! use bullbear::models::BullbearConfig;
//! use chrono::NaiveDate;
//!
//! # async fn run() -> anyhow::Result<()> {
//! let config = BullbearConfig::default();
//! let date = NaiveDate::from_ymd_opt(2024, 5, 10).unwrap();
//! let result = bullbear::propagate("NVDA", date, &config).await?;
//! println!("{}", result.final_decision.action);
//! # Ok(())
//! # }
//! ```

pub use bullbear_agents as agents;
pub use bullbear_memory as memory;
pub use bullbear_models as models;

use std::sync::Arc;

use anyhow::Context;
use bullbear_agents::{BoundModels, ClaudeCliGenerator, TextGenerator, TradingGraph};
use bullbear_memory::MemoryStore;
use bullbear_models::{BullbearConfig, Deliberation};
use chrono::NaiveDate;

/// Open the memory store and bind the configured models to the claude CLI.
pub async fn build_graph(config: &BullbearConfig) -> anyhow::Result<TradingGraph> {
    let memory = MemoryStore::from_config(&config.memory)
        .await
        .context("Failed to open memory store")?;
    let models = BoundModels::resolve(&config.deliberation, &config.generation, |model| {
        Arc::new(ClaudeCliGenerator::new(model)) as Arc<dyn TextGenerator>
    });
    Ok(TradingGraph::new(
        config.deliberation.clone(),
        models,
        Arc::new(memory),
    ))
}

/// One deliberation on `symbol` as of `as_of_date` with a freshly built
/// graph.
pub async fn propagate(
    symbol: &str,
    as_of_date: NaiveDate,
    config: &BullbearConfig,
) -> anyhow::Result<Deliberation> {
    let graph = build_graph(config).await?;
    Ok(graph.propagate(symbol, as_of_date).await?)
}

/// Parse TOML configuration. Missing sections and fields take defaults.
pub fn parse_config(text: &str) -> anyhow::Result<BullbearConfig> {
    toml::from_str(text).context("Failed to parse config")
}

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use bullbear_models::{AnalystOutcome, AnalystRole, DataMode, RetrievedMemory};
use chrono::NaiveDate;
use tracing::{error, info, warn};

use crate::error::AgentError;
use crate::generation::{Generation, GenerationRequest, TextGenerator};
use crate::prompts::{analyst_system_prompt, analyst_user_prompt};

/// Everything an analyst sees.
#[derive(Debug, Clone)]
pub struct AnalystContext {
    pub symbol: String,
    pub as_of_date: NaiveDate,
    pub data_mode: DataMode,
    /// Market data supplied by the data feed, if any.
    pub data_excerpt: Option<String>,
    pub memories: Vec<RetrievedMemory>,
}

/// Source of market data handed to analysts. The firm's data vendors live
/// behind this seam.
#[async_trait]
pub trait DataFeed: Send + Sync {
    async fn excerpt(
        &self,
        role: AnalystRole,
        symbol: &str,
        as_of_date: NaiveDate,
        mode: DataMode,
    ) -> Result<Option<String>, AgentError>;
}

/// Feed that provides nothing; analysts rely on the model and its tools.
pub struct NullFeed;

#[async_trait]
impl DataFeed for NullFeed {
    async fn excerpt(
        &self,
        _role: AnalystRole,
        _symbol: &str,
        _as_of_date: NaiveDate,
        _mode: DataMode,
    ) -> Result<Option<String>, AgentError> {
        Ok(None)
    }
}

/// Trait for analyst agents. Mockable for testing.
#[async_trait]
pub trait Analyst: Send + Sync {
    fn role(&self) -> AnalystRole;

    async fn analyze(&self, context: &AnalystContext) -> Result<Generation, AgentError>;
}

/// An analyst that prompts a text generator.
pub struct GeneratingAnalyst {
    role: AnalystRole,
    generator: Arc<dyn TextGenerator>,
    allow_tool_use: bool,
}

impl GeneratingAnalyst {
    pub fn new(role: AnalystRole, generator: Arc<dyn TextGenerator>, allow_tool_use: bool) -> Self {
        Self {
            role,
            generator,
            allow_tool_use,
        }
    }
}

#[async_trait]
impl Analyst for GeneratingAnalyst {
    fn role(&self) -> AnalystRole {
        self.role
    }

    async fn analyze(&self, context: &AnalystContext) -> Result<Generation, AgentError> {
        let request = GenerationRequest::new(
            analyst_system_prompt(self.role, context.data_mode, self.allow_tool_use),
            analyst_user_prompt(
                &context.symbol,
                &context.as_of_date.to_string(),
                context.data_excerpt.as_deref(),
                &context.memories,
            ),
        )
        .with_tool_use(self.allow_tool_use);

        let generation = self.generator.generate(&request).await?;
        if generation.text.trim().is_empty() {
            return Err(AgentError::Generation(format!(
                "{} analyst returned an empty report",
                self.role
            )));
        }
        Ok(generation)
    }
}

/// Run every analyst concurrently and wait for all of them.
///
/// A failing or panicking analyst becomes an explicit `Missing` outcome;
/// the others are unaffected. Results come back in the order given.
pub async fn run_analysts(
    analysts: Vec<Arc<dyn Analyst>>,
    feed: Arc<dyn DataFeed>,
    base: AnalystContext,
) -> Vec<(AnalystRole, AnalystOutcome)> {
    let mut handles = Vec::new();
    for analyst in analysts {
        let feed = Arc::clone(&feed);
        let mut context = base.clone();
        let role = analyst.role();

        handles.push((
            role,
            tokio::spawn(async move {
                let agent_start = Instant::now();
                context.data_excerpt = match feed
                    .excerpt(role, &context.symbol, context.as_of_date, context.data_mode)
                    .await
                {
                    Ok(excerpt) => excerpt,
                    Err(e) => {
                        warn!(analyst = %role, error = %e, "Data feed failed, analysing without excerpt");
                        None
                    }
                };
                let result = analyst.analyze(&context).await;
                (result, agent_start.elapsed())
            }),
        ));
    }

    let mut outcomes = Vec::with_capacity(handles.len());
    for (role, handle) in handles {
        let outcome = match handle.await {
            Ok((Ok(generation), elapsed)) => {
                info!(
                    analyst = %role,
                    citations = generation.citations.len(),
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Analyst succeeded"
                );
                AnalystOutcome::Report {
                    text: generation.text,
                    citations: generation.citations,
                    elapsed_ms: elapsed.as_millis() as u64,
                }
            }
            Ok((Err(e), elapsed)) => {
                warn!(
                    analyst = %role,
                    error = %e,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Analyst failed"
                );
                AnalystOutcome::Missing {
                    reason: e.to_string(),
                }
            }
            Err(e) => {
                error!(analyst = %role, error = %e, "Analyst task panicked");
                AnalystOutcome::Missing {
                    reason: format!("analyst task panicked: {e}"),
                }
            }
        };
        outcomes.push((role, outcome));
    }
    outcomes
}

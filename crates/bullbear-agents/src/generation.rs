use std::sync::Arc;

use async_trait::async_trait;
use bullbear_models::config::resolve_model_id;
use bullbear_models::{DeliberationConfig, GenerationConfig};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::AgentError;
use crate::retry::{RetryPolicy, RetryingGenerator};

/// One prompt sent to a text-generation backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub system_prompt: String,
    pub user_prompt: String,
    /// Whether the backend may call tools such as web search.
    pub allow_tool_use: bool,
}

impl GenerationRequest {
    pub fn new(system_prompt: String, user_prompt: String) -> Self {
        Self {
            system_prompt,
            user_prompt,
            allow_tool_use: false,
        }
    }

    pub fn with_tool_use(mut self, allow: bool) -> Self {
        self.allow_tool_use = allow;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Generation {
    pub text: String,
    pub citations: Vec<String>,
}

impl Generation {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            citations: Vec::new(),
        }
    }
}

/// Opaque text-generation capability. Mockable for testing.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// The model this generator is bound to.
    fn model(&self) -> &str;

    async fn generate(&self, request: &GenerationRequest) -> Result<Generation, AgentError>;
}

/// The two generators a run uses, resolved once from configuration.
///
/// `deep` serves the judges (research manager, portfolio manager); `quick`
/// serves analysts, debaters, the trader and reflection.
#[derive(Clone)]
pub struct BoundModels {
    pub deep: Arc<dyn TextGenerator>,
    pub quick: Arc<dyn TextGenerator>,
}

impl BoundModels {
    pub fn new(deep: Arc<dyn TextGenerator>, quick: Arc<dyn TextGenerator>) -> Self {
        Self { deep, quick }
    }

    /// Resolve the configured model ids (aliases included) once, build a
    /// generator for each with `build`, and wrap it with timeout and retry.
    pub fn resolve<F>(
        deliberation: &DeliberationConfig,
        generation: &GenerationConfig,
        mut build: F,
    ) -> Self
    where
        F: FnMut(&str) -> Arc<dyn TextGenerator>,
    {
        let policy = RetryPolicy::from_config(generation);
        let mut bind = |configured: &str| -> Arc<dyn TextGenerator> {
            let model = resolve_model_id(configured);
            info!(configured, model = %model, "Binding model");
            Arc::new(RetryingGenerator::new(build(&model), policy.clone()))
        };
        let deep = bind(&deliberation.deep_think_model_id);
        let quick = bind(&deliberation.quick_think_model_id);
        Self { deep, quick }
    }

    /// Both tiers served by the same generator.
    pub fn uniform(generator: Arc<dyn TextGenerator>) -> Self {
        Self {
            deep: Arc::clone(&generator),
            quick: generator,
        }
    }
}

impl std::fmt::Debug for BoundModels {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundModels")
            .field("deep", &self.deep.model())
            .field("quick", &self.quick.model())
            .finish()
    }
}

use std::sync::Arc;

use async_trait::async_trait;
use bullbear_models::{AgentRole, DebateState};

use crate::debate::{DebateContext, DebateParticipant};
use crate::error::AgentError;
use crate::generation::{GenerationRequest, TextGenerator};
use crate::prompts::{debate_user_prompt, debater_system_prompt};

/// A debate participant (bull, bear, or one of the risk analysts) that
/// prompts a text generator with its role framing.
pub struct GeneratingDebater {
    role: AgentRole,
    generator: Arc<dyn TextGenerator>,
    allow_early_stop: bool,
}

impl GeneratingDebater {
    pub fn new(role: AgentRole, generator: Arc<dyn TextGenerator>) -> Self {
        Self {
            role,
            generator,
            allow_early_stop: false,
        }
    }

    pub fn with_early_stop(mut self, allow: bool) -> Self {
        self.allow_early_stop = allow;
        self
    }

    /// One debater per role, sharing a generator.
    pub fn team(
        roles: &[AgentRole],
        generator: &Arc<dyn TextGenerator>,
        allow_early_stop: bool,
    ) -> Vec<Arc<dyn DebateParticipant>> {
        roles
            .iter()
            .map(|role| {
                Arc::new(
                    GeneratingDebater::new(*role, Arc::clone(generator))
                        .with_early_stop(allow_early_stop),
                ) as Arc<dyn DebateParticipant>
            })
            .collect()
    }
}

#[async_trait]
impl DebateParticipant for GeneratingDebater {
    fn role(&self) -> AgentRole {
        self.role
    }

    async fn speak(
        &self,
        context: &DebateContext<'_>,
        debate: &DebateState,
    ) -> Result<String, AgentError> {
        let request = GenerationRequest::new(
            debater_system_prompt(self.role, self.allow_early_stop),
            debate_user_prompt(self.role, context.state, debate, context.memories),
        );
        let generation = self.generator.generate(&request).await?;
        let utterance = generation.text.trim();
        if utterance.is_empty() {
            return Err(AgentError::Generation(format!(
                "{} produced an empty argument",
                self.role
            )));
        }
        Ok(utterance.to_string())
    }
}

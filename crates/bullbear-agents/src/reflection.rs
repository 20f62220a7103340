use std::collections::BTreeMap;
use std::sync::Arc;

use bullbear_models::{AgentRole, MemoryRecord};
use rust_decimal::Decimal;
use tracing::{debug, warn};

use crate::generation::{GenerationRequest, TextGenerator};
use crate::prompts::{reflection_system_prompt, reflection_user_prompt};

/// Draws per-role lessons from a past decision once its outcome is known.
pub struct Reflector {
    generator: Arc<dyn TextGenerator>,
}

impl Reflector {
    pub fn new(generator: Arc<dyn TextGenerator>) -> Self {
        Self { generator }
    }

    /// One lesson per reflecting role. A role whose lesson cannot be
    /// generated is left out; this never fails.
    pub async fn lessons(
        &self,
        record: &MemoryRecord,
        realized_return: Decimal,
    ) -> BTreeMap<AgentRole, String> {
        let mut lessons = BTreeMap::new();
        for role in AgentRole::REFLECTING {
            let request = GenerationRequest::new(
                reflection_system_prompt(role),
                reflection_user_prompt(record, role, realized_return),
            );
            match self.generator.generate(&request).await {
                Ok(generation) if !generation.text.trim().is_empty() => {
                    debug!(record_id = record.id, role = %role, "Lesson drawn");
                    lessons.insert(role, generation.text.trim().to_string());
                }
                Ok(_) => {
                    warn!(record_id = record.id, role = %role, "Empty lesson, omitted");
                }
                Err(e) => {
                    warn!(record_id = record.id, role = %role, error = %e, "Lesson generation failed, omitted");
                }
            }
        }
        lessons
    }
}

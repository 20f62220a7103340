use bullbear_memory::MemoryError;
use bullbear_models::{Phase, StateInvariantViolation};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Generation failed: {0}")]
    Generation(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Refused by content policy: {0}")]
    ContentPolicy(String),

    #[error("Generation timed out after {0} seconds")]
    Timeout(u64),

    #[error("Agent response parse error: {0}")]
    Parse(String),

    #[error("Stage {stage} failed: {reason}")]
    StageFailed { stage: Phase, reason: String },

    #[error("State invariant violated: {0}")]
    Invariant(#[from] StateInvariantViolation),

    #[error("Memory error: {0}")]
    Memory(#[from] MemoryError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Run cancelled before {phase}")]
    Cancelled { phase: Phase },
}

impl AgentError {
    /// Transient failures worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Generation(_) | Self::RateLimited(_) | Self::Timeout(_)
        )
    }

    pub fn is_content_policy(&self) -> bool {
        matches!(self, Self::ContentPolicy(_))
    }

    /// Wrap a stage's error for the failed-run result. Invariant violations
    /// and cancellation keep their own identity.
    pub fn into_stage_failure(self, stage: Phase) -> Self {
        match self {
            Self::StageFailed { .. } | Self::Invariant(_) | Self::Cancelled { .. } => self,
            other => Self::StageFailed {
                stage,
                reason: other.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(AgentError::Generation("503".into()).is_retryable());
        assert!(AgentError::RateLimited("429".into()).is_retryable());
        assert!(AgentError::Timeout(30).is_retryable());
        assert!(!AgentError::ContentPolicy("refused".into()).is_retryable());
        assert!(!AgentError::Parse("no stance".into()).is_retryable());
    }

    #[test]
    fn stage_failure_wraps_once() {
        let err = AgentError::Generation("boom".into()).into_stage_failure(Phase::Trader);
        assert!(matches!(
            err,
            AgentError::StageFailed {
                stage: Phase::Trader,
                ..
            }
        ));

        let again = err.into_stage_failure(Phase::PortfolioManager);
        assert!(matches!(
            again,
            AgentError::StageFailed {
                stage: Phase::Trader,
                ..
            }
        ));
    }

    #[test]
    fn invariant_violation_is_not_wrapped() {
        let err: AgentError = StateInvariantViolation::already_set("trader_plan").into();
        assert!(matches!(
            err.into_stage_failure(Phase::Trader),
            AgentError::Invariant(_)
        ));
    }
}

pub mod config;
pub mod debate;
pub mod decision;
pub mod memory_record;
pub mod roles;
pub mod set_once;
pub mod state;
pub mod transcript;

pub use config::{
    AnalystConfig, BullbearConfig, DataMode, DeliberationConfig, EmbedderKind, GenerationConfig,
    MemoryConfig, RetryConfig,
};
pub use debate::{DebateKind, DebateState, DebateTurn};
pub use decision::{FinalDecision, ResearchDecision, TradeAction, TraderPlan};
pub use memory_record::{
    DecisionSummary, MemoryRecord, NewMemoryRecord, Outcome, RecordId, RetrievedMemory,
};
pub use roles::{AgentRole, AnalystRole};
pub use set_once::{SetOnce, StateInvariantViolation};
pub use state::{AnalystOutcome, DeliberationState, StatePatch};
pub use transcript::{
    Degradation, DegradationKind, Deliberation, Phase, Transcript, TranscriptEntry,
    TRANSCRIPT_SCHEMA_VERSION,
};

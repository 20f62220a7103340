pub mod analyst;
pub mod claude_cli;
pub mod debate;
pub mod debaters;
pub mod error;
pub mod generation;
pub mod graph;
pub mod managers;
pub mod parser;
pub mod prompts;
pub mod reflection;
pub mod retry;

pub mod test_support;

pub use analyst::{run_analysts, Analyst, AnalystContext, DataFeed, GeneratingAnalyst, NullFeed};
pub use claude_cli::{ClaudeCliConfig, ClaudeCliGenerator};
pub use debate::{DebateContext, DebateController, DebateJudge, DebateParticipant, Verdict};
pub use debaters::GeneratingDebater;
pub use error::AgentError;
pub use generation::{BoundModels, Generation, GenerationRequest, TextGenerator};
pub use graph::{RunFailure, TradingGraph};
pub use managers::{PortfolioManager, ResearchManager, Trader};
pub use reflection::Reflector;
pub use retry::{RetryPolicy, RetryingGenerator};

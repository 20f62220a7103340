use serde::{Deserialize, Serialize};

use crate::roles::AnalystRole;

/// Top-level configuration for bullbear.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct BullbearConfig {
    #[serde(default)]
    pub deliberation: DeliberationConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub memory: MemoryConfig,
}

/// Per-run deliberation settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeliberationConfig {
    /// Bull/bear research debate rounds.
    #[serde(default = "default_rounds")]
    pub max_debate_rounds: u32,
    /// Risk debate rounds.
    #[serde(default = "default_rounds")]
    pub max_risk_discuss_rounds: u32,
    /// Live data (true) or cached data (false) for analysts.
    #[serde(default = "default_true")]
    pub online_tools: bool,
    /// Let analysts use the generator's web search tool.
    #[serde(default = "default_true")]
    pub use_web_search: bool,
    /// Model for the judges (research manager, portfolio manager).
    #[serde(default = "default_deep_model")]
    pub deep_think_model_id: String,
    /// Model for analysts, debaters, trader and reflection.
    #[serde(default = "default_quick_model")]
    pub quick_think_model_id: String,
    /// Number of past situations shown to each agent.
    #[serde(default = "default_top_k")]
    pub memory_top_k: usize,
    /// Stop a debate when a participant emits the consensus marker.
    #[serde(default)]
    pub allow_early_stop: bool,
    #[serde(default = "default_analysts")]
    pub analysts: Vec<AnalystConfig>,
}

impl Default for DeliberationConfig {
    fn default() -> Self {
        Self {
            max_debate_rounds: default_rounds(),
            max_risk_discuss_rounds: default_rounds(),
            online_tools: true,
            use_web_search: true,
            deep_think_model_id: default_deep_model(),
            quick_think_model_id: default_quick_model(),
            memory_top_k: default_top_k(),
            allow_early_stop: false,
            analysts: default_analysts(),
        }
    }
}

impl DeliberationConfig {
    pub fn enabled_analysts(&self) -> Vec<AnalystRole> {
        let mut roles: Vec<AnalystRole> = self
            .analysts
            .iter()
            .filter(|a| a.enabled)
            .map(|a| a.role)
            .collect();
        roles.sort();
        roles.dedup();
        roles
    }

    pub fn data_mode(&self) -> DataMode {
        if self.online_tools {
            DataMode::Live
        } else {
            DataMode::Cached
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnalystConfig {
    pub role: AnalystRole,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DataMode {
    Live,
    Cached,
}

/// Settings for calls to the text generation backend.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GenerationConfig {
    /// Timeout for a single generation attempt.
    #[serde(default = "default_call_timeout")]
    pub call_timeout_seconds: u64,
    #[serde(default)]
    pub retry: RetryConfig,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            call_timeout_seconds: default_call_timeout(),
            retry: RetryConfig::default(),
        }
    }
}

/// Bounded exponential backoff.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryConfig {
    /// Total attempts including the first one.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

/// Which embedder turns situations into vectors.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EmbedderKind {
    /// Local ONNX sentence-embedding model, downloaded on first use.
    #[default]
    Fastembed,
    /// Feature hashing. Offline and deterministic, but lexical only.
    Hashing,
}

/// Configuration for the reflective memory store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MemoryConfig {
    /// SQLite file holding memory records. `None` keeps memory in-process only.
    #[serde(default)]
    pub sqlite_path: Option<String>,
    #[serde(default)]
    pub embedder: EmbedderKind,
    /// Model name for the fastembed embedder, e.g. `bge-small-en-v1.5`.
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,
    /// Where fastembed keeps downloaded models. Its own default when unset.
    #[serde(default)]
    pub embedding_model_cache_dir: Option<String>,
    /// Vector length for the hashing embedder; fastembed models fix their own.
    #[serde(default = "default_dimensions")]
    pub embedding_dimensions: usize,
    /// Maximum number of cached embeddings.
    #[serde(default = "default_cache_capacity")]
    pub embedding_cache_capacity: u64,
    #[serde(default = "default_cache_ttl")]
    pub embedding_cache_ttl_seconds: u64,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            sqlite_path: None,
            embedder: EmbedderKind::default(),
            embedding_model: default_embedding_model(),
            embedding_model_cache_dir: None,
            embedding_dimensions: default_dimensions(),
            embedding_cache_capacity: default_cache_capacity(),
            embedding_cache_ttl_seconds: default_cache_ttl(),
        }
    }
}

impl MemoryConfig {
    /// In-process memory with the offline hashing embedder.
    pub fn offline() -> Self {
        Self {
            embedder: EmbedderKind::Hashing,
            ..Self::default()
        }
    }
}

/// Short aliases accepted wherever a model id is configured.
pub const MODEL_ALIASES: &[(&str, &str)] = &[
    ("sonnet", "claude-sonnet-4-5-20250929"),
    ("haiku", "claude-3-5-haiku-latest"),
    ("opus", "claude-opus-4-1-20250805"),
];

/// Resolve a configured model id: aliases map to full ids, anything else
/// passes through unchanged.
pub fn resolve_model_id(id: &str) -> String {
    MODEL_ALIASES
        .iter()
        .find(|(alias, _)| *alias == id)
        .map(|(_, full)| (*full).to_string())
        .unwrap_or_else(|| id.to_string())
}

fn default_embedding_model() -> String {
    "bge-small-en-v1.5".to_string()
}
fn default_rounds() -> u32 {
    1
}
fn default_true() -> bool {
    true
}
fn default_deep_model() -> String {
    "claude-sonnet-4-5-20250929".to_string()
}
fn default_quick_model() -> String {
    "claude-3-5-haiku-latest".to_string()
}
fn default_top_k() -> usize {
    2
}
fn default_analysts() -> Vec<AnalystConfig> {
    AnalystRole::ALL
        .iter()
        .map(|role| AnalystConfig {
            role: *role,
            enabled: true,
        })
        .collect()
}
fn default_call_timeout() -> u64 {
    120
}
fn default_max_attempts() -> u32 {
    3
}
fn default_base_delay_ms() -> u64 {
    500
}
fn default_max_delay_ms() -> u64 {
    8_000
}
fn default_dimensions() -> usize {
    256
}
fn default_cache_capacity() -> u64 {
    1_024
}
fn default_cache_ttl() -> u64 {
    3_600
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_bullbear_config() {
        let config = BullbearConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let deserialized: BullbearConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(config, deserialized);
    }

    #[test]
    fn default_config_has_four_analysts() {
        let config = DeliberationConfig::default();
        assert_eq!(config.enabled_analysts(), AnalystRole::ALL.to_vec());
        assert_eq!(config.max_debate_rounds, 1);
        assert!(!config.allow_early_stop);
    }

    #[test]
    fn config_from_toml() {
        let toml_str = r#"
[deliberation]
max_debate_rounds = 2
max_risk_discuss_rounds = 3
online_tools = false
use_web_search = false
deep_think_model_id = "opus"
memory_top_k = 4

[[deliberation.analysts]]
role = "technical"

[[deliberation.analysts]]
role = "news"
enabled = false

[generation.retry]
max_attempts = 5

[memory]
sqlite_path = "/tmp/bullbear_memory.db"
"#;

        let config: BullbearConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.deliberation.max_debate_rounds, 2);
        assert_eq!(config.deliberation.max_risk_discuss_rounds, 3);
        assert_eq!(config.deliberation.data_mode(), DataMode::Cached);
        assert_eq!(config.deliberation.memory_top_k, 4);
        assert_eq!(
            config.deliberation.enabled_analysts(),
            vec![AnalystRole::Technical]
        );
        assert_eq!(config.generation.retry.max_attempts, 5);
        assert_eq!(config.generation.retry.base_delay_ms, 500);
        assert_eq!(config.generation.call_timeout_seconds, 120);
        assert_eq!(
            config.memory.sqlite_path.as_deref(),
            Some("/tmp/bullbear_memory.db")
        );
        assert_eq!(
            config.deliberation.quick_think_model_id,
            "claude-3-5-haiku-latest"
        );
    }

    #[test]
    fn embedder_defaults_to_fastembed_and_can_be_switched() {
        let config: BullbearConfig = toml::from_str("").unwrap();
        assert_eq!(config.memory.embedder, EmbedderKind::Fastembed);
        assert_eq!(config.memory.embedding_model, "bge-small-en-v1.5");

        let config: BullbearConfig = toml::from_str(
            r#"
[memory]
embedder = "hashing"
embedding_dimensions = 128
"#,
        )
        .unwrap();
        assert_eq!(config.memory.embedder, EmbedderKind::Hashing);
        assert_eq!(config.memory.embedding_dimensions, 128);
        assert!(toml::from_str::<BullbearConfig>("[memory]\nembedder = \"word2vec\"").is_err());
    }

    #[test]
    fn empty_toml_uses_defaults() {
        let config: BullbearConfig = toml::from_str("").unwrap();
        assert_eq!(config, BullbearConfig::default());
    }

    #[test]
    fn model_aliases_resolve() {
        assert_eq!(resolve_model_id("sonnet"), "claude-sonnet-4-5-20250929");
        assert_eq!(resolve_model_id("my-custom-model"), "my-custom-model");
    }
}

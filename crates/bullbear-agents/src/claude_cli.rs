use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::AgentError;
use crate::generation::{Generation, GenerationRequest, TextGenerator};

/// Configuration for a Claude CLI invocation.
#[derive(Debug, Clone)]
pub struct ClaudeCliConfig {
    pub model: String,
    /// Binary to invoke; `claude` on PATH by default.
    pub program: String,
}

impl Default for ClaudeCliConfig {
    fn default() -> Self {
        Self {
            model: "claude-3-5-haiku-latest".to_string(),
            program: "claude".to_string(),
        }
    }
}

/// Invoke the `claude` CLI with a system prompt and user prompt.
/// Returns the raw stdout text.
///
/// The child is killed if the returned future is dropped, so a caller-side
/// timeout does not leave processes behind.
pub async fn invoke_claude(
    system_prompt: &str,
    user_prompt: &str,
    allow_tool_use: bool,
    config: &ClaudeCliConfig,
) -> Result<String, AgentError> {
    debug!(model = %config.model, allow_tool_use, "Invoking claude CLI");

    let mut command = Command::new(&config.program);
    command
        .args([
            "-p",
            user_prompt,
            "--system-prompt",
            system_prompt,
            "--model",
            &config.model,
            "--output-format",
            "text",
        ])
        .kill_on_drop(true);
    if allow_tool_use {
        command.args(["--allowedTools", "WebSearch"]);
    }

    let result = command
        .output()
        .await
        .map_err(|e| AgentError::Generation(format!("Failed to spawn {}: {e}", config.program)))?;

    if !result.status.success() {
        let stderr = String::from_utf8_lossy(&result.stderr);
        warn!(status = %result.status, stderr = %stderr, "Claude CLI failed");
        return Err(classify_failure(&result.status.to_string(), &stderr));
    }

    let stdout = String::from_utf8_lossy(&result.stdout).to_string();
    if stdout.trim().is_empty() {
        return Err(AgentError::Generation(
            "Claude returned empty response".to_string(),
        ));
    }

    Ok(stdout)
}

/// Map a failed invocation onto the error taxonomy by its stderr.
fn classify_failure(status: &str, stderr: &str) -> AgentError {
    let lower = stderr.to_ascii_lowercase();
    let message = format!("claude exited {status}: {}", stderr.trim());
    if lower.contains("rate limit") || lower.contains("429") || lower.contains("overloaded") {
        AgentError::RateLimited(message)
    } else if lower.contains("content policy")
        || lower.contains("content filtering")
        || lower.contains("usage policy")
    {
        AgentError::ContentPolicy(message)
    } else {
        AgentError::Generation(message)
    }
}

/// URLs mentioned in a response, in order of first appearance.
pub fn extract_citations(text: &str) -> Vec<String> {
    let mut citations: Vec<String> = Vec::new();
    for token in text.split_whitespace() {
        let Some(start) = token.find("http://").or_else(|| token.find("https://")) else {
            continue;
        };
        let url = token[start..]
            .trim_end_matches(|c: char| matches!(c, ')' | ']' | '>' | ',' | '.' | ';' | '"' | '\''));
        if !url.is_empty() && !citations.iter().any(|c| c == url) {
            citations.push(url.to_string());
        }
    }
    citations
}

/// Text generator backed by the `claude` CLI.
pub struct ClaudeCliGenerator {
    config: ClaudeCliConfig,
}

impl ClaudeCliGenerator {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            config: ClaudeCliConfig {
                model: model.into(),
                ..ClaudeCliConfig::default()
            },
        }
    }

    pub fn with_config(config: ClaudeCliConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl TextGenerator for ClaudeCliGenerator {
    fn model(&self) -> &str {
        &self.config.model
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<Generation, AgentError> {
        let text = invoke_claude(
            &request.system_prompt,
            &request.user_prompt,
            request.allow_tool_use,
            &self.config,
        )
        .await?;
        let citations = if request.allow_tool_use {
            extract_citations(&text)
        } else {
            Vec::new()
        };
        Ok(Generation { text, citations })
    }
}

/// Check if the `claude` CLI is available on the system.
pub async fn check_cli_available() -> bool {
    match Command::new("claude").arg("--version").output().await {
        Ok(output) => output.status.success(),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = ClaudeCliConfig::default();
        assert_eq!(config.model, "claude-3-5-haiku-latest");
        assert_eq!(config.program, "claude");
    }

    #[test]
    fn classify_rate_limit_and_policy() {
        assert!(matches!(
            classify_failure("exit status: 1", "Error: 429 rate limit exceeded"),
            AgentError::RateLimited(_)
        ));
        assert!(matches!(
            classify_failure("exit status: 1", "Output blocked by content filtering policy"),
            AgentError::ContentPolicy(_)
        ));
        assert!(matches!(
            classify_failure("exit status: 1", "connection reset"),
            AgentError::Generation(_)
        ));
    }

    #[test]
    fn citations_are_deduplicated_and_trimmed() {
        let text = "Revenue beat (https://example.com/q1). See https://example.com/q1, \
                    and [guidance](https://news.example.org/nvda).";
        assert_eq!(
            extract_citations(text),
            vec![
                "https://example.com/q1".to_string(),
                "https://news.example.org/nvda".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn missing_binary_is_a_generation_error() {
        let generator = ClaudeCliGenerator::with_config(ClaudeCliConfig {
            model: "haiku".to_string(),
            program: "/nonexistent/claude-binary".to_string(),
        });
        let err = generator
            .generate(&GenerationRequest::new("sys".into(), "user".into()))
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::Generation(_)));
    }
}

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, StrandError};

/// Top-level Strand configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub agent: AgentConfig,
    pub model: ModelConfig,
    #[serde(default)]
    pub checkpoint: Option<CheckpointConfig>,
    #[serde(default)]
    pub log: Option<LogConfig>,
}

/// Run configuration handed to every execution context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Ceiling on node executions per run.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
    #[serde(default)]
    pub system_prompt: Option<String>,
    /// How tool messages for tools outside the visible set are sent to the model.
    #[serde(default)]
    pub tool_formatting: ToolFormatting,
    #[serde(default = "default_parallel_tools")]
    pub parallel_tools: bool,
    #[serde(default = "default_max_context_tokens")]
    pub max_context_tokens: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            system_prompt: None,
            tool_formatting: ToolFormatting::default(),
            parallel_tools: default_parallel_tools(),
            max_context_tokens: default_max_context_tokens(),
        }
    }
}

impl AgentConfig {
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }
}

fn default_max_iterations() -> usize {
    50
}

fn default_parallel_tools() -> bool {
    true
}

fn default_max_context_tokens() -> usize {
    100_000
}

/// Missing-tool formatting policy.
///
/// Tool calls and results in the history are rewritten as plain text before a
/// model request: `Missing` rewrites only those whose tool is not visible in
/// the current session, `All` rewrites every one of them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolFormatting {
    #[default]
    Missing,
    All,
}

/// Model parameters for a session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    pub model_id: String,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
}

impl ModelConfig {
    pub fn new(model_id: impl Into<String>) -> Self {
        Self {
            model_id: model_id.into(),
            ..Default::default()
        }
    }
}

/// Checkpoint store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointConfig {
    /// Enable checkpointing (default: true when section is present).
    #[serde(default = "default_checkpoint_enabled")]
    pub enabled: bool,
    /// SQLite file for checkpoints. Default: ./strand-checkpoints.db
    #[serde(default)]
    pub path: Option<String>,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: None,
        }
    }
}

impl CheckpointConfig {
    pub fn resolved_path(&self) -> PathBuf {
        self.path
            .as_deref()
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("strand-checkpoints.db"))
    }
}

fn default_checkpoint_enabled() -> bool {
    true
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
        }
    }
}

fn default_log_filter() -> String {
    "strand=info,warn".to_string()
}

impl AppConfig {
    /// Load config from a TOML file, with env var expansion.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|_| StrandError::ConfigNotFound(path.display().to_string()))?;
        Self::parse(&content)
    }

    /// Parse config text, expanding `${ENV_VAR}` references first.
    pub fn parse(content: &str) -> Result<Self> {
        let expanded = expand_env_vars(content);
        toml::from_str(&expanded).map_err(|e| StrandError::Config(e.to_string()))
    }
}

/// Expand `${ENV_VAR}` patterns in a string.
fn expand_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '$' && chars.peek() == Some(&'{') {
            chars.next(); // consume '{'
            let mut var_name = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_name.push(c);
            }
            match std::env::var(&var_name) {
                Ok(val) => result.push_str(&val),
                Err(_) => {
                    // Keep original if env var not set
                    result.push_str(&format!("${{{}}}", var_name));
                }
            }
        } else {
            result.push(c);
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply() {
        let config = AppConfig::parse(
            r#"
[model]
model_id = "test-model"
"#,
        )
        .unwrap();
        assert_eq!(config.agent.max_iterations, 50);
        assert_eq!(config.agent.tool_formatting, ToolFormatting::Missing);
        assert!(config.agent.parallel_tools);
        assert!(config.checkpoint.is_none());
    }

    #[test]
    fn expand_keeps_unknown_vars() {
        let out = expand_env_vars("key = \"${STRAND_SURELY_UNSET_VAR}\"");
        assert_eq!(out, "key = \"${STRAND_SURELY_UNSET_VAR}\"");
    }

    #[test]
    fn checkpoint_default_path() {
        let cfg = CheckpointConfig::default();
        assert!(cfg.enabled);
        assert_eq!(cfg.resolved_path(), PathBuf::from("strand-checkpoints.db"));
    }
}

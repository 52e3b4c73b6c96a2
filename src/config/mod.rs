use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

/// Top-level configuration loaded from `config.yaml`.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Total model context size in tokens.
    pub context_length: usize,
    /// Tokens reserved for generation; history may use the remainder.
    pub max_new_tokens: usize,
    /// Prefix that marks a message as a bot command (matched
    /// case-insensitively), e.g. `!chat`.
    pub command_prefix: String,
    /// Default system prompt when no directive in the reply chain
    /// overrides it.
    pub system_prompt: String,
    /// Discord presence text ("Playing …"). Optional.
    #[serde(default)]
    pub activity: Option<String>,
    /// Override for the built-in chat template (minijinja source).
    #[serde(default)]
    pub chat_template: Option<String>,
    /// Discord bot token: a literal, or `$VAR` to read from the
    /// environment. The `DISCORD_TOKEN` env var takes precedence.
    #[serde(default)]
    pub discord_token: Option<String>,
}

impl Config {
    /// Read and parse a YAML configuration file.
    pub async fn load(path: &Path) -> anyhow::Result<Config> {
        let contents = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("failed to read config file: {}", path.display()))?;

        let config: Config =
            serde_yaml::from_str(&contents).context("failed to parse config YAML")?;
        config.validate()?;

        tracing::debug!(
            context_length = config.context_length,
            max_new_tokens = config.max_new_tokens,
            prefix = %config.command_prefix,
            "configuration loaded"
        );

        Ok(config)
    }

    /// Validate semantic constraints that serde cannot enforce.
    fn validate(&self) -> anyhow::Result<()> {
        if self.command_prefix.trim().is_empty() {
            anyhow::bail!("config: command_prefix must not be empty");
        }
        if self.max_new_tokens >= self.context_length {
            anyhow::bail!(
                "config: max_new_tokens ({}) must be smaller than context_length ({})",
                self.max_new_tokens,
                self.context_length
            );
        }
        Ok(())
    }

    /// Tokens available to compiled history: `context_length - max_new_tokens`.
    pub fn history_token_limit(&self) -> usize {
        self.context_length.saturating_sub(self.max_new_tokens)
    }

    /// Resolve the Discord bot token.
    ///
    /// Resolution order:
    /// 1. `DISCORD_TOKEN` environment variable
    /// 2. `discord_token` from the config file (literal, or `$VAR`
    ///    env-var reference)
    pub fn resolve_token(&self) -> Option<String> {
        if let Ok(tok) = std::env::var("DISCORD_TOKEN") {
            if !tok.is_empty() {
                return Some(tok);
            }
        }

        match self.discord_token.as_deref() {
            Some(s) if s.starts_with('$') && s.len() > 1 => std::env::var(&s[1..]).ok(),
            Some(s) if !s.is_empty() => Some(s.to_string()),
            _ => None,
        }
    }
}

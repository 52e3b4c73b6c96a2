//! CLI subcommand handlers extracted from `main.rs`.
//!
//! Keeps `main.rs` slim: clap parsing stays there, heavy logic lives
//! here. The `compile` subcommand replays a recorded transcript through
//! the history compiler without touching Discord, which is the fastest
//! way to inspect what the bot would send to a model.

use std::collections::HashMap;
use std::path::Path;

use anyhow::Context as _;
use async_trait::async_trait;
use serde::Deserialize;

use crate::attachments::NoExtractor;
use crate::chat::{Attachment, ChatClient, ChatMessage, FetchError};
use crate::config::Config;
use crate::context::HistoryCompiler;
use crate::render;

/// A recorded conversation for offline replay.
#[derive(Debug, Deserialize)]
pub struct Transcript {
    pub messages: Vec<ChatMessage>,
    /// Id of the newest message to compile from. Defaults to the last
    /// entry in `messages`.
    #[serde(default)]
    pub start: Option<u64>,
    /// Author id treated as the bot. Defaults to 0, i.e. every message
    /// is user-authored.
    #[serde(default)]
    pub bot_user_id: u64,
}

/// [`ChatClient`] over an in-memory transcript. Attachment `url` fields
/// are read as local file paths.
pub struct TranscriptClient {
    messages: HashMap<u64, ChatMessage>,
}

impl TranscriptClient {
    pub fn new(messages: Vec<ChatMessage>) -> Self {
        Self {
            messages: messages.into_iter().map(|m| (m.id, m)).collect(),
        }
    }
}

#[async_trait]
impl ChatClient for TranscriptClient {
    async fn fetch_message(
        &self,
        _channel_id: u64,
        message_id: u64,
    ) -> Result<ChatMessage, FetchError> {
        self.messages
            .get(&message_id)
            .cloned()
            .ok_or(FetchError::NotFound)
    }

    async fn read_attachment(&self, attachment: &Attachment) -> anyhow::Result<Vec<u8>> {
        tokio::fs::read(&attachment.url)
            .await
            .with_context(|| format!("failed to read attachment file: {}", attachment.url))
    }
}

/// Compile a transcript and print the rendered prompt to stdout.
pub async fn compile_transcript(config_path: &Path, transcript_path: &Path) -> anyhow::Result<()> {
    let config = Config::load(config_path).await?;

    let raw = tokio::fs::read_to_string(transcript_path)
        .await
        .with_context(|| format!("failed to read transcript: {}", transcript_path.display()))?;
    let transcript: Transcript =
        serde_json::from_str(&raw).context("failed to parse transcript JSON")?;

    let start_id = transcript
        .start
        .or_else(|| transcript.messages.last().map(|m| m.id))
        .ok_or_else(|| anyhow::anyhow!("transcript has no messages"))?;
    let start = transcript
        .messages
        .iter()
        .find(|m| m.id == start_id)
        .cloned()
        .ok_or_else(|| anyhow::anyhow!("start message {start_id} is not in the transcript"))?;

    let client = TranscriptClient::new(transcript.messages);
    let compiler = HistoryCompiler::new(&client, &NoExtractor, &config, transcript.bot_user_id);
    let history = compiler.compile(start, &config.system_prompt).await;

    let template = config
        .chat_template
        .as_deref()
        .unwrap_or(render::DEFAULT_CHAT_TEMPLATE);
    let prompt = render::render_prompt(&history.messages, template)?;

    println!("{prompt}");
    Ok(())
}

/// Load and validate the configuration file, reporting the derived
/// history budget.
pub async fn check_config(config_path: &Path) -> anyhow::Result<()> {
    let config = Config::load(config_path).await?;
    println!(
        "config OK: history budget is {} tokens ({} context - {} generation)",
        config.history_token_limit(),
        config.context_length,
        config.max_new_tokens
    );
    Ok(())
}

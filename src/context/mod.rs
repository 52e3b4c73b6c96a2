//! Reply-chain history compilation: token estimation, chain traversal,
//! and the budgeted message compiler.
//!
//! Given the newest message in a reply chain, [`HistoryCompiler`] walks
//! backwards through replies, converts each message (and its
//! attachments) into role-tagged text, and truncates the result to fit
//! inside `context_length - max_new_tokens` estimated tokens. A system
//! prompt directive found anywhere in the chain overrides the default,
//! newest directive first.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::attachments::{self, DocumentExtractor, Extracted};
use crate::chat::{ChatClient, ChatMessage, SYSTEM_TAG};
use crate::commands::{self, ParsedCommand};
use crate::config::Config;

// ---------------------------------------------------------------------------
// Token estimation
// ---------------------------------------------------------------------------

/// A rough measure of how many characters are in each token.
pub const EST_CHARS_PER_TOKEN: usize = 3;

/// Estimated token count for a string: `chars / 3`.
///
/// A heuristic, not a tokenizer. It only needs to be deterministic and
/// monotone in input length so the budget arithmetic is stable.
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count() / EST_CHARS_PER_TOKEN
}

// ---------------------------------------------------------------------------
// Compiled history types
// ---------------------------------------------------------------------------

/// Who a compiled message is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// A single role-tagged entry in compiled history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompiledMessage {
    pub role: Role,
    pub content: String,
}

impl CompiledMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// The compiler's output: messages ordered oldest-to-newest with exactly
/// one leading system entry, plus the active command for the chain (the
/// first one encountered walking from the newest end).
#[derive(Debug, Clone)]
pub struct CompiledHistory {
    pub messages: Vec<CompiledMessage>,
    pub command: Option<ParsedCommand>,
}

// ---------------------------------------------------------------------------
// Reply-chain traversal
// ---------------------------------------------------------------------------

/// Follows a chain of message replies until it reaches the end or fails
/// to fetch the next link.
///
/// An explicit "produce next or end" state object rather than a stream:
/// the termination-on-fetch-failure rule stays visible and testable with
/// a mock fetch function. The first produced element is the starting
/// message itself; each later element is the reply target of the
/// previous one, so the sequence moves strictly into the past.
pub struct ReplyChain<'a> {
    client: &'a dyn ChatClient,
    current: Option<ChatMessage>,
    started: bool,
}

impl<'a> ReplyChain<'a> {
    pub fn new(client: &'a dyn ChatClient, start: ChatMessage) -> Self {
        Self {
            client,
            current: Some(start),
            started: false,
        }
    }

    /// Produce the next message in the chain, or `None` when exhausted.
    ///
    /// A fetch failure (deleted message, missing permissions, transport
    /// error) ends the sequence; it is not surfaced as an error because
    /// the history simply stops there.
    pub async fn next(&mut self) -> Option<ChatMessage> {
        if !self.started {
            self.started = true;
            return self.current.clone();
        }

        let current = self.current.take()?;
        let reply_to = current.reply_to?;
        match self.client.fetch_message(current.channel_id, reply_to).await {
            Ok(message) => {
                self.current = Some(message.clone());
                Some(message)
            }
            Err(err) => {
                debug!(
                    message_id = reply_to,
                    error = %err,
                    "reply chain ended: could not fetch replied-to message"
                );
                None
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Attachment outcome classification
// ---------------------------------------------------------------------------

const NOTE_UNREADABLE: &str = "\n\nA file was attached to this message, \
                               but it is either empty or is not a file type you can read.";
const NOTE_TOO_LARGE: &str =
    "\n\nA file was attached to this message, but it was too large to be read.";
const NOTE_CONTENTS: &str = "\n\nA file was attached to this message. Here are the contents:\n";

/// What a single attachment contributes to the message text.
#[derive(Debug, Clone, PartialEq, Eq)]
enum AttachmentOutcome {
    /// Full extracted content fits in the remaining budget.
    Include(String),
    /// Extracted content would blow the remaining token budget.
    TooLarge,
    /// Empty, unsupported, or failed to read.
    Unreadable,
}

fn classify_attachment(
    extracted: anyhow::Result<Extracted>,
    remaining_tokens: usize,
) -> AttachmentOutcome {
    match extracted {
        Ok(Extracted::Text(text)) => {
            if text.trim().is_empty() {
                AttachmentOutcome::Unreadable
            } else if estimate_tokens(&text) > remaining_tokens {
                AttachmentOutcome::TooLarge
            } else {
                AttachmentOutcome::Include(text)
            }
        }
        Ok(Extracted::Unsupported) => AttachmentOutcome::Unreadable,
        Err(err) => {
            debug!(error = %err, "attachment read failed");
            AttachmentOutcome::Unreadable
        }
    }
}

// ---------------------------------------------------------------------------
// History compiler
// ---------------------------------------------------------------------------

/// Compiles a reply chain into a token-budgeted, role-tagged history.
///
/// One compilation is a pure function of (starting message, config,
/// fetch/read capabilities): no state crosses invocations.
pub struct HistoryCompiler<'a> {
    client: &'a dyn ChatClient,
    extractor: &'a dyn DocumentExtractor,
    config: &'a Config,
    bot_user_id: u64,
}

impl<'a> HistoryCompiler<'a> {
    pub fn new(
        client: &'a dyn ChatClient,
        extractor: &'a dyn DocumentExtractor,
        config: &'a Config,
        bot_user_id: u64,
    ) -> Self {
        Self {
            client,
            extractor,
            config,
            bot_user_id,
        }
    }

    /// Compile the reply chain ending at `start`.
    ///
    /// Messages are visited newest-to-oldest and prepended to the
    /// accumulator, so the returned list reads oldest-to-newest with the
    /// system prompt first.
    pub async fn compile(
        &self,
        start: ChatMessage,
        default_system_prompt: &str,
    ) -> CompiledHistory {
        let history_token_limit = self.config.history_token_limit();
        let mut messages: Vec<CompiledMessage> = Vec::new();
        let mut command: Option<ParsedCommand> = None;
        let mut system_override: Option<String> = None;

        // The default system prompt reserves budget up front even though
        // an override found mid-chain may replace its text. The
        // reservation is intentionally not refunded: it can only
        // under-fill the budget, never overflow it.
        let mut token_count = estimate_tokens(default_system_prompt);

        let mut chain = ReplyChain::new(self.client, start);
        while let Some(message) = chain.next().await {
            // Command detection: first command seen from the newest end
            // becomes the chain's active command, and the first
            // system-prompt directive wins. A malformed command is still
            // conversational content, handled below by text extraction.
            if commands::matches_prefix(&message.content, &self.config.command_prefix) {
                match commands::parse(&message.content, &self.config.command_prefix) {
                    Ok(parsed) => {
                        if system_override.is_none() {
                            system_override = parsed.system.clone();
                        }
                        if command.is_none() {
                            command = Some(parsed);
                        }
                    }
                    Err(err) => {
                        debug!(
                            message_id = message.id,
                            error = %err,
                            "malformed command kept as plain text"
                        );
                    }
                }
            }

            let remaining = history_token_limit.saturating_sub(token_count);
            let (text, added_tokens) = self.message_text(&message, remaining).await;

            // Bot system announcements (command acknowledgements, error
            // reports) are internal signaling, not conversation.
            if command.is_none()
                && message.author_id == self.bot_user_id
                && message.embed_footer() == Some(SYSTEM_TAG)
            {
                continue;
            }

            // Don't include empty messages so the model doesn't get
            // confused.
            if text.trim().is_empty() {
                continue;
            }

            // Stop retrieving context once it would overflow.
            if token_count + added_tokens > history_token_limit {
                debug!(
                    token_count,
                    added_tokens, history_token_limit, "token budget reached, truncating history"
                );
                break;
            }

            let compiled = if message.author_id == self.bot_user_id {
                CompiledMessage::new(Role::Assistant, text)
            } else {
                CompiledMessage::new(
                    Role::User,
                    format!("Message from {}\n{}", message.author_name, text),
                )
            };
            messages.insert(0, compiled);
            token_count += added_tokens;
        }

        let system_text =
            system_override.unwrap_or_else(|| default_system_prompt.to_string());
        messages.insert(0, CompiledMessage::new(Role::System, system_text));

        debug!(
            messages = messages.len(),
            token_count, "compiled chat history"
        );

        CompiledHistory { messages, command }
    }

    /// Effective text and token cost for a single message.
    ///
    /// Base text is the embed description for bot "character" messages,
    /// the command prompt for recognized commands, and the raw content
    /// otherwise. Attachment text is appended afterwards, degraded to
    /// fixed notes when unreadable or over budget. No error escapes.
    pub async fn message_text(
        &self,
        message: &ChatMessage,
        remaining_tokens: usize,
    ) -> (String, usize) {
        // When the bot plays characters it stores text in embeds rather
        // than content.
        let mut text = if message.author_id == self.bot_user_id && !message.embeds.is_empty() {
            message.embeds[0].description.clone()
        } else if commands::matches_prefix(&message.content, &self.config.command_prefix) {
            match commands::parse(&message.content, &self.config.command_prefix) {
                Ok(parsed) => parsed.prompt,
                // If the command is invalid, keep the whole thing.
                Err(_) => message.content.clone(),
            }
        } else {
            message.content.clone()
        };

        for attachment in &message.attachments {
            let extracted =
                attachments::read_attachment(self.client, self.extractor, attachment).await;
            match classify_attachment(extracted, remaining_tokens) {
                AttachmentOutcome::Include(content) => {
                    text.push_str(NOTE_CONTENTS);
                    text.push_str(&content);
                }
                AttachmentOutcome::TooLarge => text.push_str(NOTE_TOO_LARGE),
                AttachmentOutcome::Unreadable => text.push_str(NOTE_UNREADABLE),
            }
        }

        let tokens = estimate_tokens(&text);
        (text, tokens)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

//! Platform-neutral chat message model and the fetch capability the
//! prompt compiler consumes.
//!
//! The Discord connector converts serenity messages into these types;
//! tests drive the compiler with an in-memory implementation of
//! [`ChatClient`]. The compiler itself never touches serenity directly.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Embed footer text reserved for bot "system announcement" messages.
///
/// Messages the bot sends with this footer (command acknowledgements,
/// error reports) are internal signaling and are excluded from compiled
/// chat history.
pub const SYSTEM_TAG: &str = "System";

/// A structured embed attached to a message.
///
/// The bot stores character speech in the embed description rather than
/// the message content, and uses the footer to carry the character id
/// (or [`SYSTEM_TAG`]).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Embed {
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub footer: Option<String>,
}

/// A file attached to a message. The payload is fetched on demand
/// through [`ChatClient::read_attachment`]; this struct only carries the
/// descriptor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attachment {
    pub filename: String,
    #[serde(default)]
    pub content_type: Option<String>,
    #[serde(default)]
    pub url: String,
}

/// One chat message, read-only to the compiler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: u64,
    pub channel_id: u64,
    pub author_id: u64,
    /// Display name used in the `"Message from {name}"` prefix.
    #[serde(default)]
    pub author_name: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub embeds: Vec<Embed>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    /// Id of the message this one replies to, if any.
    #[serde(default)]
    pub reply_to: Option<u64>,
}

impl ChatMessage {
    /// The first embed's footer text, if the message carries any embed.
    pub fn embed_footer(&self) -> Option<&str> {
        self.embeds.first().and_then(|e| e.footer.as_deref())
    }
}

/// Why a message could not be fetched while walking a reply chain.
///
/// All variants terminate traversal; none are surfaced to the caller of
/// the history compiler.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("message not found")]
    NotFound,
    #[error("access to message denied")]
    Forbidden,
    #[error("transport error: {0}")]
    Transport(String),
}

/// Capabilities the compiler needs from the chat platform.
#[async_trait]
pub trait ChatClient: Send + Sync {
    /// Fetch a single message by id from a channel.
    async fn fetch_message(&self, channel_id: u64, message_id: u64)
        -> Result<ChatMessage, FetchError>;

    /// Download the raw bytes of an attachment.
    async fn read_attachment(&self, attachment: &Attachment) -> anyhow::Result<Vec<u8>>;
}

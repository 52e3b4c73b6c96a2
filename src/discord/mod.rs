//! Discord integration: the serenity-backed [`ChatClient`], conversion
//! into the platform-neutral message model, and the event handler that
//! compiles a reply chain into a prompt whenever a message addresses the
//! bot (command prefix or reply-to-bot).
//!
//! Replies go out as embeds. Character replies carry the character id in
//! the embed footer so later compilations can recognize who was
//! speaking; command acknowledgements and errors carry [`SYSTEM_TAG`]
//! so they are excluded from compiled history.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, Context as AnyhowContext};
use async_trait::async_trait;
use serenity::async_trait as serenity_async_trait;
use serenity::builder::{CreateEmbed, CreateEmbedFooter, CreateMessage};
use serenity::client::{Client, Context, EventHandler};
use serenity::gateway::ActivityData;
use serenity::http::{Http, HttpError};
use serenity::model::channel::{Message, Reaction, ReactionType};
use serenity::model::gateway::{GatewayIntents, Ready};
use serenity::model::id::{ChannelId, MessageId};
use tracing::{debug, info, warn};

use crate::attachments::DocumentExtractor;
use crate::characters;
use crate::chat::{Attachment, ChatClient, ChatMessage, Embed, FetchError, SYSTEM_TAG};
use crate::commands::{self, CommandError};
use crate::config::Config;
use crate::context::{CompiledHistory, HistoryCompiler};
use crate::render;

/// Discord's embed description limit.
const EMBED_DESCRIPTION_LIMIT: usize = 4096;
const EMBED_TITLE_LIMIT: usize = 256;
const ERROR_REPLY_LIMIT: usize = 1024;

/// Control reactions seeded onto bot replies. Reacting with one drives
/// the bot: 🗑️ deletes the reply, 🔁 regenerates it.
const DELETE_BUTTON: &str = "\u{1F5D1}\u{FE0F}";
const REGENERATE_BUTTON: &str = "\u{1F501}";

/// What a reaction on one of the bot's replies asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ControlAction {
    Delete,
    Regenerate,
}

fn control_action(emoji: &ReactionType) -> Option<ControlAction> {
    if emoji.unicode_eq(DELETE_BUTTON) {
        Some(ControlAction::Delete)
    } else if emoji.unicode_eq(REGENERATE_BUTTON) {
        Some(ControlAction::Regenerate)
    } else {
        None
    }
}

// ---------------------------------------------------------------------------
// Completion seam
// ---------------------------------------------------------------------------

/// Turns a rendered prompt into a reply. Model invocation lives outside
/// this crate; embedders plug their client in here.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    async fn complete(&self, prompt: &str, history: &CompiledHistory) -> anyhow::Result<String>;
}

/// Built-in backend that returns the rendered prompt itself — a dry-run
/// mode for inspecting exactly what the compiler would send to a model.
pub struct PromptPreview;

#[async_trait]
impl CompletionBackend for PromptPreview {
    async fn complete(&self, prompt: &str, _history: &CompiledHistory) -> anyhow::Result<String> {
        Ok(prompt.to_string())
    }
}

// ---------------------------------------------------------------------------
// Serenity-backed chat client
// ---------------------------------------------------------------------------

/// [`ChatClient`] over the Discord HTTP API. Message lookups go through
/// serenity; attachment payloads are fetched from their CDN URLs.
pub struct SerenityClient {
    http: Arc<Http>,
    web: reqwest::Client,
}

impl SerenityClient {
    pub fn new(http: Arc<Http>, web: reqwest::Client) -> Self {
        Self { http, web }
    }
}

#[async_trait]
impl ChatClient for SerenityClient {
    async fn fetch_message(
        &self,
        channel_id: u64,
        message_id: u64,
    ) -> Result<ChatMessage, FetchError> {
        match self
            .http
            .get_message(ChannelId::new(channel_id), MessageId::new(message_id))
            .await
        {
            Ok(message) => Ok(convert_message(&message)),
            Err(err) => Err(map_fetch_error(err)),
        }
    }

    async fn read_attachment(&self, attachment: &Attachment) -> anyhow::Result<Vec<u8>> {
        let response = self
            .web
            .get(&attachment.url)
            .send()
            .await
            .with_context(|| format!("attachment request failed: {}", attachment.filename))?
            .error_for_status()
            .with_context(|| format!("attachment download failed: {}", attachment.filename))?;
        Ok(response.bytes().await?.to_vec())
    }
}

fn map_fetch_error(err: serenity::Error) -> FetchError {
    if let serenity::Error::Http(HttpError::UnsuccessfulRequest(ref response)) = err {
        return match response.status_code.as_u16() {
            404 => FetchError::NotFound,
            403 => FetchError::Forbidden,
            _ => FetchError::Transport(err.to_string()),
        };
    }
    FetchError::Transport(err.to_string())
}

/// Convert a serenity message into the platform-neutral model the
/// compiler consumes.
pub fn convert_message(msg: &Message) -> ChatMessage {
    ChatMessage {
        id: msg.id.get(),
        channel_id: msg.channel_id.get(),
        author_id: msg.author.id.get(),
        author_name: msg
            .author
            .global_name
            .clone()
            .unwrap_or_else(|| msg.author.name.clone()),
        content: msg.content.clone(),
        embeds: msg
            .embeds
            .iter()
            .map(|e| Embed {
                description: e.description.clone().unwrap_or_default(),
                footer: e.footer.as_ref().map(|f| f.text.clone()),
            })
            .collect(),
        attachments: msg
            .attachments
            .iter()
            .map(|a| Attachment {
                filename: a.filename.clone(),
                content_type: a.content_type.clone(),
                url: a.url.clone(),
            })
            .collect(),
        reply_to: msg
            .message_reference
            .as_ref()
            .and_then(|r| r.message_id)
            .map(|id| id.get()),
    }
}

// ---------------------------------------------------------------------------
// Event handler
// ---------------------------------------------------------------------------

struct Handler {
    config: Config,
    backend: Arc<dyn CompletionBackend>,
    extractor: Arc<dyn DocumentExtractor>,
    web: reqwest::Client,
    /// Our own user id, learned from the ready event. Zero until then.
    bot_user_id: AtomicU64,
}

#[serenity_async_trait]
impl EventHandler for Handler {
    async fn ready(&self, ctx: Context, ready: Ready) {
        self.bot_user_id.store(ready.user.id.get(), Ordering::Relaxed);
        if let Some(activity) = self.config.activity.as_deref() {
            ctx.set_activity(Some(ActivityData::playing(activity)));
        }
        info!(user = %ready.user.name, "logged in");
    }

    async fn message(&self, ctx: Context, msg: Message) {
        // Ignore other bots, ourselves, and our own webhooks.
        if msg.author.bot || msg.webhook_id.is_some() {
            return;
        }
        let bot_id = self.bot_user_id.load(Ordering::Relaxed);
        if bot_id == 0 {
            return;
        }

        let client = SerenityClient::new(ctx.http.clone(), self.web.clone());
        let message = convert_message(&msg);
        if !self.invokes_bot(&client, &message, bot_id).await {
            return;
        }

        debug!(
            author = %message.author_name,
            channel_id = message.channel_id,
            content_len = message.content.len(),
            "message addresses the bot"
        );

        // Progress reactions are best-effort; the reply matters, they don't.
        let _ = msg.react(&ctx.http, '⏳').await;
        match self.respond(&ctx, &client, &msg, message, bot_id).await {
            Ok(()) => {
                let _ = msg.react(&ctx.http, '✅').await;
            }
            Err(err) => {
                warn!(error = %err, "failed to respond");
                let _ = msg.react(&ctx.http, '❌').await;
                let text = truncate(&format!("❌ {err}"), ERROR_REPLY_LIMIT);
                let _ = msg.reply(&ctx.http, text).await;
            }
        }
        let _ = msg.delete_reaction(&ctx.http, None, '⏳').await;
    }

    /// Control reactions on the bot's own replies: 🗑️ deletes the
    /// reply, 🔁 deletes it and generates a fresh one from the same
    /// invoking message.
    async fn reaction_add(&self, ctx: Context, reaction: Reaction) {
        let bot_id = self.bot_user_id.load(Ordering::Relaxed);
        if bot_id == 0 {
            return;
        }
        // Seeding the buttons fires this event too; only act on other
        // users' reactions.
        if reaction.user_id.map(|u| u.get()) != Some(bot_id) {
            if let Some(action) = control_action(&reaction.emoji) {
                if let Err(err) = self.handle_control(&ctx, &reaction, action, bot_id).await {
                    warn!(error = %err, "control reaction failed");
                }
            }
        }
    }
}

impl Handler {
    /// A message addresses the bot when it starts with the command
    /// prefix or replies to one of the bot's own messages.
    async fn invokes_bot(
        &self,
        client: &SerenityClient,
        message: &ChatMessage,
        bot_id: u64,
    ) -> bool {
        if commands::matches_prefix(&message.content, &self.config.command_prefix) {
            return true;
        }
        let Some(reply_to) = message.reply_to else {
            return false;
        };
        match client.fetch_message(message.channel_id, reply_to).await {
            Ok(replied) => replied.author_id == bot_id,
            Err(err) => {
                debug!(error = %err, "could not inspect replied-to message");
                false
            }
        }
    }

    async fn respond(
        &self,
        ctx: &Context,
        client: &SerenityClient,
        msg: &Message,
        message: ChatMessage,
        bot_id: u64,
    ) -> anyhow::Result<()> {
        // Grammar problems are user-visible on direct invocation, unlike
        // during history compilation where they degrade to plain text.
        if commands::matches_prefix(&message.content, &self.config.command_prefix) {
            match commands::parse(&message.content, &self.config.command_prefix) {
                Ok(cmd) if cmd.use_as_system_prompt() && cmd.prompt.is_empty() => {
                    // Directive-only command: acknowledge and wait for
                    // further prompts in the chain.
                    self.send_system_reply(ctx, msg, "Conversation started...").await?;
                    return Ok(());
                }
                Ok(_) => {}
                Err(CommandError::Help(text)) | Err(CommandError::Invalid(text)) => {
                    self.send_system_reply(ctx, msg, &text).await?;
                    return Ok(());
                }
            }
        }

        let compiler = HistoryCompiler::new(client, self.extractor.as_ref(), &self.config, bot_id);
        let mut history = compiler
            .compile(message.clone(), &self.config.system_prompt)
            .await;

        // The active command's character, or the character whose message
        // the user replied to.
        let char_id = match history.command.as_ref().and_then(|c| c.character.clone()) {
            Some(id) => Some(id),
            None => replied_character(client, &message, bot_id).await,
        };

        let mut character = None;
        if let Some(id) = char_id {
            let card = characters::load_character(&characters::characters_dir(), &id).await?;
            // Recompile with the persona prompt as the default; an
            // explicit directive in the chain still wins.
            if let Some(persona) = card.compiled_system_prompt() {
                history = compiler.compile(message, &persona).await;
            }
            character = Some(card);
        }

        let template = self
            .config
            .chat_template
            .as_deref()
            .unwrap_or(render::DEFAULT_CHAT_TEMPLATE);
        let prompt = render::render_prompt(&history.messages, template)?;
        let response = self.backend.complete(&prompt, &history).await?;

        match character {
            Some(card) => {
                let mut embed = CreateEmbed::new()
                    .title(truncate(card.display_name(), EMBED_TITLE_LIMIT))
                    .description(truncate(&response, EMBED_DESCRIPTION_LIMIT))
                    .footer(CreateEmbedFooter::new(card.id.clone()));
                if let Some(url) = card.avatar_url.as_deref() {
                    embed = embed.thumbnail(url);
                }
                self.send_embed(ctx, msg, embed, true).await
            }
            None => {
                let embed =
                    CreateEmbed::new().description(truncate(&response, EMBED_DESCRIPTION_LIMIT));
                self.send_embed(ctx, msg, embed, true).await
            }
        }
    }

    /// Act on a control reaction added to one of the bot's replies.
    async fn handle_control(
        &self,
        ctx: &Context,
        reaction: &Reaction,
        action: ControlAction,
        bot_id: u64,
    ) -> anyhow::Result<()> {
        let target = reaction
            .message(&ctx.http)
            .await
            .context("could not fetch reacted-to message")?;
        if target.author.id.get() != bot_id {
            return Ok(());
        }

        match action {
            ControlAction::Delete => {
                debug!(message_id = target.id.get(), "deleting reply on request");
                target
                    .delete(&ctx.http)
                    .await
                    .context("could not delete reply")?;
            }
            ControlAction::Regenerate => {
                // The reply reference points back at the invoking
                // message; without it there is nothing to regenerate.
                let Some(reference) = target.message_reference.as_ref().and_then(|r| r.message_id)
                else {
                    return Ok(());
                };
                let invoking = ctx
                    .http
                    .get_message(target.channel_id, reference)
                    .await
                    .context("could not fetch the invoking message")?;

                debug!(message_id = target.id.get(), "regenerating reply on request");
                target
                    .delete(&ctx.http)
                    .await
                    .context("could not delete the old reply")?;
                for emoji in ['❌', '✅'] {
                    let _ = invoking.delete_reaction(&ctx.http, None, emoji).await;
                }

                let client = SerenityClient::new(ctx.http.clone(), self.web.clone());
                let message = convert_message(&invoking);
                let _ = invoking.react(&ctx.http, '⏳').await;
                match self.respond(ctx, &client, &invoking, message, bot_id).await {
                    Ok(()) => {
                        let _ = invoking.react(&ctx.http, '✅').await;
                    }
                    Err(err) => {
                        warn!(error = %err, "failed to regenerate");
                        let _ = invoking.react(&ctx.http, '❌').await;
                    }
                }
                let _ = invoking.delete_reaction(&ctx.http, None, '⏳').await;
            }
        }
        Ok(())
    }

    /// Reply with a system-tagged embed. These are excluded from
    /// compiled history by the announcement filter and carry no control
    /// reactions.
    async fn send_system_reply(
        &self,
        ctx: &Context,
        msg: &Message,
        text: &str,
    ) -> anyhow::Result<()> {
        let embed = CreateEmbed::new()
            .description(truncate(text, EMBED_DESCRIPTION_LIMIT))
            .footer(CreateEmbedFooter::new(SYSTEM_TAG));
        self.send_embed(ctx, msg, embed, false).await
    }

    async fn send_embed(
        &self,
        ctx: &Context,
        msg: &Message,
        embed: CreateEmbed,
        controls: bool,
    ) -> anyhow::Result<()> {
        let builder = CreateMessage::new().embed(embed).reference_message(msg);
        let sent = msg
            .channel_id
            .send_message(&ctx.http, builder)
            .await
            .map_err(|e| anyhow!("discord send error: {e:?}"))?;
        if controls {
            for button in [DELETE_BUTTON, REGENERATE_BUTTON] {
                let _ = sent
                    .react(&ctx.http, ReactionType::Unicode(button.to_string()))
                    .await;
            }
        }
        Ok(())
    }
}

/// The character id of the bot message the user replied to, if any.
///
/// Character replies carry their id in the embed footer; the reserved
/// system tag is not a character.
async fn replied_character(
    client: &SerenityClient,
    message: &ChatMessage,
    bot_id: u64,
) -> Option<String> {
    let reply_to = message.reply_to?;
    match client.fetch_message(message.channel_id, reply_to).await {
        Ok(replied) if replied.author_id == bot_id => match replied.embed_footer() {
            Some(footer) if footer != SYSTEM_TAG && !footer.is_empty() => {
                Some(footer.to_string())
            }
            _ => None,
        },
        Ok(_) => None,
        Err(err) => {
            // Maybe deleted; then nobody was replied to.
            debug!(error = %err, "could not fetch replied-to message");
            None
        }
    }
}

/// Truncate a string to `max` characters, appending "…" when shortened.
/// Discord's embed limits count characters, not bytes.
fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let cut: String = s.chars().take(max.saturating_sub(1)).collect();
    format!("{cut}…")
}

/// Connect to Discord and run the bot until the gateway connection ends.
pub async fn run(
    config: Config,
    backend: Arc<dyn CompletionBackend>,
    extractor: Arc<dyn DocumentExtractor>,
) -> anyhow::Result<()> {
    let token = config.resolve_token().ok_or_else(|| {
        anyhow!("no Discord token configured (set DISCORD_TOKEN or discord_token)")
    })?;

    let intents = GatewayIntents::GUILD_MESSAGES
        | GatewayIntents::DIRECT_MESSAGES
        | GatewayIntents::GUILD_MESSAGE_REACTIONS
        | GatewayIntents::DIRECT_MESSAGE_REACTIONS
        | GatewayIntents::MESSAGE_CONTENT;

    let handler = Handler {
        config,
        backend,
        extractor,
        web: reqwest::Client::new(),
        bot_user_id: AtomicU64::new(0),
    };

    let mut client = Client::builder(&token, intents)
        .event_handler(handler)
        .await
        .context("failed to build Discord client")?;

    info!("starting Discord bot");
    client.start().await.context("Discord client error")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("hello", 10), "hello");
        assert_eq!(truncate("hello world", 6), "hello…");
        // Multibyte content must not split inside a char.
        let t = truncate("héllo wörld", 7);
        assert!(t.ends_with('…'));
        assert_eq!(t.chars().count(), 7);
    }

    #[test]
    fn truncate_counts_chars_not_bytes() {
        // 5 chars but 10 bytes; a byte-based cut would keep only one.
        assert_eq!(truncate("ééééé", 3), "éé…");
        assert_eq!(truncate("ééé", 3), "ééé");
    }

    #[test]
    fn truncate_zero_budget() {
        assert_eq!(truncate("abc", 0), "…");
    }

    #[test]
    fn control_reactions_map_to_actions() {
        let delete = ReactionType::Unicode(DELETE_BUTTON.to_string());
        let regen = ReactionType::Unicode(REGENERATE_BUTTON.to_string());
        let other = ReactionType::Unicode("👍".to_string());
        assert_eq!(control_action(&delete), Some(ControlAction::Delete));
        assert_eq!(control_action(&regen), Some(ControlAction::Regenerate));
        assert_eq!(control_action(&other), None);
    }
}

//! Prompt rendering: applies a chat template to compiled history.
//!
//! The template is minijinja source operating on a `messages` list of
//! `{role, content}` records. A broken template is a deployment problem,
//! so rendering failures propagate as fatal errors instead of degrading.

use anyhow::Context;
use minijinja::{context, Environment};

use crate::context::CompiledMessage;

/// The built-in chat template: instruction/response markers around user
/// and assistant turns, system text passed through, and a trailing
/// response cue for the model to continue from.
pub const DEFAULT_CHAT_TEMPLATE: &str = "{% for message in messages %}\
{% if message.role == 'user' %}{{ '### Instruction:\n' ~ (message.content | trim) }}\
{% elif message.role == 'system' %}{{ message.content | trim }}\
{% elif message.role == 'assistant' %}{{ '### Response\n' ~ message.content }}\
{% endif %}{{ '\n\n' }}{% endfor %}{{ '### Response:\n' }}";

/// Render compiled messages into a single model-ready prompt string.
pub fn render_prompt(messages: &[CompiledMessage], template_source: &str) -> anyhow::Result<String> {
    let env = Environment::new();
    let template = env
        .template_from_str(template_source)
        .context("chat template failed to compile")?;
    template
        .render(context! { messages => messages })
        .context("chat template failed to render")
}

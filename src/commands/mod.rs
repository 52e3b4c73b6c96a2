//! The bot command grammar.
//!
//! A message addressed to the bot starts with the configured prefix
//! (matched case-insensitively) followed by command-line style flags and
//! a free-form prompt, e.g.
//!
//! ```text
//! !chat --character pirate --system "Be terse" tell me a story
//! ```
//!
//! Parsing is delegated to clap so the grammar gets real validation and
//! `-h` help output for free; the caller decides whether a parse failure
//! is an error (direct invocation) or falls back to plain text (history
//! compilation).

use clap::Parser;
use thiserror::Error;

/// The result of parsing a command message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedCommand {
    /// Character id for the bot to speak as.
    pub character: Option<String>,
    /// Override system prompt for the rest of the reply chain.
    pub system: Option<String>,
    /// The conversational prompt (everything after the flags).
    pub prompt: String,
}

impl ParsedCommand {
    /// Whether this command carries a system-prompt directive.
    pub fn use_as_system_prompt(&self) -> bool {
        self.system.is_some()
    }
}

/// Parse failures, split so the handler can reply with help text rather
/// than an error message when the user asked for `-h`.
#[derive(Debug, Error)]
pub enum CommandError {
    /// The command was malformed.
    #[error("{0}")]
    Invalid(String),
    /// The user asked for help; the payload is the rendered help text.
    #[error("{0}")]
    Help(String),
}

#[derive(Parser, Debug)]
#[command(
    name = "chat",
    no_binary_name = true,
    disable_version_flag = true,
    about = "Chat with the bot. Anything that is not a flag becomes the prompt."
)]
struct CommandArgs {
    /// The character for the bot to assume in its response.
    #[arg(short = 'c', long = "character")]
    character: Option<String>,

    /// Use the given text as the system prompt for the rest of the reply
    /// chain.
    #[arg(short = 's', long = "system", visible_alias = "use-as-system-prompt")]
    system: Option<String>,

    /// The prompt to give the bot.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    prompt: Vec<String>,
}

/// Does `text` start with the command prefix, ignoring ASCII case?
pub fn matches_prefix(text: &str, prefix: &str) -> bool {
    !prefix.is_empty()
        && text.len() >= prefix.len()
        && text.is_char_boundary(prefix.len())
        && text[..prefix.len()].eq_ignore_ascii_case(prefix)
}

/// Parse a command message.
///
/// The prefix is stripped if present; the remainder is tokenized with
/// double-quote grouping (so `--system "Be terse"` works) and handed to
/// clap.
pub fn parse(text: &str, prefix: &str) -> Result<ParsedCommand, CommandError> {
    let body = if matches_prefix(text, prefix) {
        &text[prefix.len()..]
    } else {
        text
    };

    let tokens = tokenize(body);
    match CommandArgs::try_parse_from(tokens) {
        Ok(args) => Ok(ParsedCommand {
            character: args.character,
            system: args.system,
            prompt: args.prompt.join(" "),
        }),
        Err(e) => match e.kind() {
            clap::error::ErrorKind::DisplayHelp => Err(CommandError::Help(e.render().to_string())),
            _ => Err(CommandError::Invalid(e.render().to_string())),
        },
    }
}

/// Split a command body into tokens, honoring double quotes.
///
/// Unterminated quotes are tolerated: the rest of the input becomes one
/// token. Quotes inside a token are stripped, matching what users expect
/// from a shell-ish grammar without pulling in a full shell lexer.
fn tokenize(body: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut has_token = false;

    for ch in body.chars() {
        match ch {
            '"' => {
                in_quotes = !in_quotes;
                has_token = true;
            }
            c if c.is_whitespace() && !in_quotes => {
                if has_token {
                    tokens.push(std::mem::take(&mut current));
                    has_token = false;
                }
            }
            c => {
                current.push(c);
                has_token = true;
            }
        }
    }
    if has_token {
        tokens.push(current);
    }
    tokens
}

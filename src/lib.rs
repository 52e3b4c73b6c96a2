//! replyline — Discord chatbot core built around a reply-chain prompt
//! compiler.
//!
//! The interesting logic lives in [`context`]: walking a reply chain
//! backwards, converting each message into role-tagged text, and fitting
//! the result into a token budget. Everything else is plumbing around it.
//!
//! This library crate re-exports modules so integration tests
//! (under `tests/`) can access them.

pub mod attachments;
pub mod characters;
pub mod chat;
pub mod cli;
pub mod commands;
pub mod config;
pub mod context;
pub mod discord;
pub mod render;

/// Return the replyline home directory.
///
/// Resolution order:
/// 1. `REPLYLINE_HOME` environment variable
/// 2. `$HOME/.replyline`
pub fn replyline_home() -> std::path::PathBuf {
    if let Ok(p) = std::env::var("REPLYLINE_HOME") {
        std::path::PathBuf::from(p)
    } else {
        dirs::home_dir()
            .unwrap_or_else(|| std::path::PathBuf::from("."))
            .join(".replyline")
    }
}

//! Character (persona) cards.
//!
//! A character is a YAML file under `<replyline_home>/characters/<id>.yaml`.
//! When the bot speaks as a character it replies through an embed whose
//! footer carries the character id, and the card's persona prompt
//! replaces the default system prompt for that chain.

use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

/// A persona the bot can assume in its responses.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CharacterCard {
    pub id: String,
    /// Name shown as the embed title. Falls back to the id.
    #[serde(default)]
    pub display_name: Option<String>,
    /// Persona instruction text.
    #[serde(default)]
    pub system_prompt: Option<String>,
    /// Example lines appended to the persona prompt.
    #[serde(default)]
    pub example_messages: Option<String>,
    /// Thumbnail image for the embed.
    #[serde(default)]
    pub avatar_url: Option<String>,
}

impl CharacterCard {
    pub fn display_name(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.id)
    }

    /// The system prompt this character contributes: persona text plus
    /// speech examples, or `None` when the card has neither.
    pub fn compiled_system_prompt(&self) -> Option<String> {
        let mut prompt = self.system_prompt.clone().unwrap_or_default();
        if let Some(examples) = self.example_messages.as_deref() {
            if !examples.is_empty() {
                prompt.push_str("\n\nHere are some examples of how to speak:\n");
                prompt.push_str(examples);
            }
        }
        if prompt.is_empty() {
            None
        } else {
            Some(prompt)
        }
    }
}

/// Directory that holds character cards.
pub fn characters_dir() -> PathBuf {
    crate::replyline_home().join("characters")
}

/// Load a character card by id from the given directory.
pub async fn load_character(dir: &Path, id: &str) -> anyhow::Result<CharacterCard> {
    // Ids come from user input; refuse anything that could escape the
    // characters directory.
    if id.is_empty() || !id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') {
        anyhow::bail!("invalid character id: {id:?}");
    }

    let path = dir.join(format!("{id}.yaml"));
    let contents = tokio::fs::read_to_string(&path)
        .await
        .with_context(|| format!("no character card at {}", path.display()))?;
    let card: CharacterCard =
        serde_yaml::from_str(&contents).with_context(|| format!("invalid character card: {id}"))?;
    Ok(card)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn load_card_from_yaml() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("pirate.yaml"),
            "id: pirate\ndisplay_name: Dread Pirate\nsystem_prompt: Speak like a pirate.\n",
        )
        .unwrap();

        let card = load_character(dir.path(), "pirate").await.unwrap();
        assert_eq!(card.display_name(), "Dread Pirate");
        assert_eq!(
            card.compiled_system_prompt().as_deref(),
            Some("Speak like a pirate.")
        );
    }

    #[tokio::test]
    async fn examples_are_appended_to_the_persona_prompt() {
        let card = CharacterCard {
            id: "poet".to_string(),
            display_name: None,
            system_prompt: Some("You are a poet.".to_string()),
            example_messages: Some("Roses are red.".to_string()),
            avatar_url: None,
        };
        let prompt = card.compiled_system_prompt().unwrap();
        assert!(prompt.starts_with("You are a poet."));
        assert!(prompt.ends_with("Roses are red."));
    }

    #[tokio::test]
    async fn missing_card_is_an_error() {
        let dir = TempDir::new().unwrap();
        assert!(load_character(dir.path(), "ghost").await.is_err());
    }

    #[tokio::test]
    async fn path_escaping_ids_are_rejected() {
        let dir = TempDir::new().unwrap();
        assert!(load_character(dir.path(), "../etc/passwd").await.is_err());
        assert!(load_character(dir.path(), "").await.is_err());
    }

    #[test]
    fn empty_card_contributes_no_prompt() {
        let card = CharacterCard {
            id: "blank".to_string(),
            display_name: None,
            system_prompt: None,
            example_messages: None,
            avatar_url: None,
        };
        assert!(card.compiled_system_prompt().is_none());
    }
}

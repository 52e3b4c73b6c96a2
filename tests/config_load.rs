//! Integration tests for configuration loading and validation.

use std::path::PathBuf;

use replyline::config::Config;
use tempfile::TempDir;

async fn write_config(dir: &TempDir, contents: &str) -> PathBuf {
    let path = dir.path().join("config.yaml");
    tokio::fs::write(&path, contents).await.unwrap();
    path
}

#[tokio::test]
async fn loads_a_minimal_config() {
    let dir = TempDir::new().unwrap();
    let path = write_config(
        &dir,
        "context_length: 4096\n\
         max_new_tokens: 512\n\
         command_prefix: \"!chat\"\n\
         system_prompt: \"You are a helpful assistant.\"\n",
    )
    .await;

    let config = Config::load(&path).await.unwrap();

    assert_eq!(config.context_length, 4096);
    assert_eq!(config.history_token_limit(), 3584);
    assert!(config.activity.is_none());
    assert!(config.chat_template.is_none());
}

#[tokio::test]
async fn loads_optional_fields() {
    let dir = TempDir::new().unwrap();
    let path = write_config(
        &dir,
        "context_length: 2048\n\
         max_new_tokens: 256\n\
         command_prefix: \"!chat\"\n\
         system_prompt: \"S\"\n\
         activity: \"with reply chains\"\n\
         chat_template: \"{{ messages | length }}\"\n\
         discord_token: \"$REPLYLINE_TEST_TOKEN\"\n",
    )
    .await;

    let config = Config::load(&path).await.unwrap();

    assert_eq!(config.activity.as_deref(), Some("with reply chains"));
    assert_eq!(config.chat_template.as_deref(), Some("{{ messages | length }}"));
    assert_eq!(config.discord_token.as_deref(), Some("$REPLYLINE_TEST_TOKEN"));
}

#[tokio::test]
async fn rejects_unknown_fields() {
    let dir = TempDir::new().unwrap();
    let path = write_config(
        &dir,
        "context_length: 4096\n\
         max_new_tokens: 512\n\
         command_prefix: \"!chat\"\n\
         system_prompt: \"S\"\n\
         max_tokens: 99\n",
    )
    .await;

    let err = Config::load(&path).await.unwrap_err();
    assert!(err.to_string().contains("parse"));
}

#[tokio::test]
async fn rejects_generation_budget_at_or_above_context() {
    let dir = TempDir::new().unwrap();
    let path = write_config(
        &dir,
        "context_length: 512\n\
         max_new_tokens: 512\n\
         command_prefix: \"!chat\"\n\
         system_prompt: \"S\"\n",
    )
    .await;

    assert!(Config::load(&path).await.is_err());
}

#[tokio::test]
async fn rejects_blank_command_prefix() {
    let dir = TempDir::new().unwrap();
    let path = write_config(
        &dir,
        "context_length: 4096\n\
         max_new_tokens: 512\n\
         command_prefix: \"  \"\n\
         system_prompt: \"S\"\n",
    )
    .await;

    assert!(Config::load(&path).await.is_err());
}

#[tokio::test]
async fn missing_file_reports_the_path() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nope.yaml");

    let err = Config::load(&path).await.unwrap_err();
    assert!(err.to_string().contains("nope.yaml"));
}

#[tokio::test]
async fn token_env_reference_resolves_through_the_environment() {
    let dir = TempDir::new().unwrap();
    let path = write_config(
        &dir,
        "context_length: 4096\n\
         max_new_tokens: 512\n\
         command_prefix: \"!chat\"\n\
         system_prompt: \"S\"\n\
         discord_token: \"$REPLYLINE_CONFIG_TEST_TOKEN\"\n",
    )
    .await;
    // A DISCORD_TOKEN in the ambient environment would take precedence
    // over the config reference.
    std::env::remove_var("DISCORD_TOKEN");
    std::env::set_var("REPLYLINE_CONFIG_TEST_TOKEN", "secret-from-env");

    let config = Config::load(&path).await.unwrap();

    assert_eq!(config.resolve_token().as_deref(), Some("secret-from-env"));
}

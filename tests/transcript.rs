//! Integration tests for offline transcript replay.

use replyline::attachments::NoExtractor;
use replyline::chat::ChatClient;
use replyline::cli::{self, Transcript, TranscriptClient};
use replyline::config::Config;
use replyline::context::{HistoryCompiler, Role};
use replyline::render;
use tempfile::TempDir;

const CONFIG_YAML: &str = "context_length: 4096\n\
                           max_new_tokens: 512\n\
                           command_prefix: \"!chat\"\n\
                           system_prompt: \"You are a helpful assistant.\"\n";

fn transcript_json() -> String {
    serde_json::json!({
        "bot_user_id": 999,
        "messages": [
            {
                "id": 1,
                "channel_id": 1,
                "author_id": 42,
                "author_name": "alice",
                "content": "what is a monad"
            },
            {
                "id": 2,
                "channel_id": 1,
                "author_id": 999,
                "author_name": "bot",
                "content": "",
                "embeds": [{"description": "A monoid in disguise.", "footer": "tutor"}],
                "reply_to": 1
            },
            {
                "id": 3,
                "channel_id": 1,
                "author_id": 42,
                "author_name": "alice",
                "content": "go on",
                "reply_to": 2
            }
        ]
    })
    .to_string()
}

#[tokio::test]
async fn transcript_compiles_and_renders() {
    let transcript: Transcript = serde_json::from_str(&transcript_json()).unwrap();
    assert_eq!(transcript.bot_user_id, 999);
    assert!(transcript.start.is_none());

    let config: Config = serde_yaml::from_str(CONFIG_YAML).unwrap();
    let start = transcript.messages.last().cloned().unwrap();
    let client = TranscriptClient::new(transcript.messages);
    let compiler = HistoryCompiler::new(&client, &NoExtractor, &config, transcript.bot_user_id);

    let history = compiler.compile(start, &config.system_prompt).await;

    assert_eq!(history.messages.len(), 4);
    assert_eq!(history.messages[2].role, Role::Assistant);
    assert_eq!(history.messages[2].content, "A monoid in disguise.");

    let prompt = render::render_prompt(&history.messages, render::DEFAULT_CHAT_TEMPLATE).unwrap();
    assert!(prompt.contains("### Instruction:\nMessage from alice\nwhat is a monad"));
    assert!(prompt.contains("### Response\nA monoid in disguise."));
    assert!(prompt.ends_with("### Response:\n"));
}

#[tokio::test]
async fn compile_subcommand_runs_end_to_end() {
    let dir = TempDir::new().unwrap();
    let config_path = dir.path().join("config.yaml");
    let transcript_path = dir.path().join("chat.json");
    tokio::fs::write(&config_path, CONFIG_YAML).await.unwrap();
    tokio::fs::write(&transcript_path, transcript_json())
        .await
        .unwrap();

    cli::compile_transcript(&config_path, &transcript_path)
        .await
        .unwrap();
}

#[tokio::test]
async fn empty_transcript_is_an_error() {
    let dir = TempDir::new().unwrap();
    let config_path = dir.path().join("config.yaml");
    let transcript_path = dir.path().join("chat.json");
    tokio::fs::write(&config_path, CONFIG_YAML).await.unwrap();
    tokio::fs::write(&transcript_path, r#"{"messages": []}"#)
        .await
        .unwrap();

    let err = cli::compile_transcript(&config_path, &transcript_path)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("no messages"));
}

#[tokio::test]
async fn attachment_urls_are_read_as_local_files() {
    let dir = TempDir::new().unwrap();
    let notes = dir.path().join("notes.txt");
    tokio::fs::write(&notes, "local file contents").await.unwrap();

    let transcript: Transcript = serde_json::from_str(
        &serde_json::json!({
            "messages": [{
                "id": 1,
                "channel_id": 1,
                "author_id": 42,
                "author_name": "alice",
                "content": "see attached",
                "attachments": [{
                    "filename": "notes.txt",
                    "content_type": "text/plain",
                    "url": notes.to_string_lossy()
                }]
            }]
        })
        .to_string(),
    )
    .unwrap();

    let client = TranscriptClient::new(transcript.messages);
    let attachment = client
        .fetch_message(1, 1)
        .await
        .unwrap()
        .attachments
        .remove(0);
    let bytes = client.read_attachment(&attachment).await.unwrap();
    assert_eq!(bytes, b"local file contents");
}

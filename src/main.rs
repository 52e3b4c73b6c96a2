use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use replyline::attachments::NoExtractor;
use replyline::cli;
use replyline::config::Config;
use replyline::discord::{self, PromptPreview};

#[derive(Parser, Debug)]
#[command(
    name = "replyline",
    version,
    about = "Discord chatbot that compiles reply chains into token-budgeted prompts"
)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the Discord bot
    Start,
    /// Compile a recorded transcript and print the rendered prompt
    Compile {
        /// Path to a transcript JSON file
        transcript: PathBuf,
    },
    /// Validate the configuration file
    CheckConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    {
        use tracing_subscriber::layer::SubscriberExt;
        use tracing_subscriber::util::SubscriberInitExt;

        let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    let cli = Cli::parse();
    let config_path = cli
        .config
        .unwrap_or_else(|| replyline::replyline_home().join("config.yaml"));

    match cli.command {
        Some(Command::Compile { transcript }) => {
            cli::compile_transcript(&config_path, &transcript).await
        }
        Some(Command::CheckConfig) => cli::check_config(&config_path).await,
        Some(Command::Start) | None => {
            let config = Config::load(&config_path).await?;
            discord::run(config, Arc::new(PromptPreview), Arc::new(NoExtractor)).await
        }
    }
}

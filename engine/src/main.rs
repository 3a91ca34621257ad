// chatstream
// Main entry point for the chatstream binary

use chatstream_engine::cli::{Cli, Command};
use chatstream_engine::config::Config;
use chatstream_engine::handlers::{handle_chat, handle_end, handle_show, OutputFormat};
use chatstream_engine::telemetry::init_telemetry_with_level;
use clap::Parser;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Load configuration (or use custom path if provided)
    let config = if let Some(config_path) = &cli.config {
        Config::load_from_path(config_path)?
    } else {
        Config::load_or_create()?
    };

    // --log wins over the config file; RUST_LOG wins over both
    let log_level = cli.log.as_deref().unwrap_or(&config.core.log_level);
    init_telemetry_with_level(log_level);

    let version = env!("CARGO_PKG_VERSION");
    let commit = env!("GIT_COMMIT_HASH");
    let timestamp = env!("BUILD_TIMESTAMP");

    tracing::debug!("chatstream v{} ({} - {})", version, commit, timestamp);

    // Determine output format
    let format = if cli.json {
        OutputFormat::Json
    } else {
        OutputFormat::Text
    };

    // Handle commands
    match cli.command {
        Command::Chat {
            user,
            chat,
            message,
        } => {
            tracing::info!(user = %user, chat = ?chat, "Running chat turn");
            handle_chat(user, chat, message, &config, format).await
        }

        Command::Show { chat_id } => {
            tracing::info!("Showing chat: {}", chat_id);
            handle_show(chat_id, &config, format).await
        }

        Command::End { chat_id } => {
            tracing::info!("Ending chat: {}", chat_id);
            handle_end(chat_id, &config, format).await
        }
    }
}

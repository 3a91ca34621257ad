//! CLI interface for chatstream
//!
//! This module provides the command-line interface using clap's derive API.
//! It defines all commands and global flags.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Streaming chat with a bounded conversation context
///
/// Sends messages to an OpenAI-compatible model, streams the answer to the
/// terminal and keeps each conversation within the model's context window.
#[derive(Parser, Debug)]
#[command(name = "chatstream")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Output in JSON format
    #[arg(long, global = true)]
    pub json: bool,

    /// Set log level (error, warn, info, debug, trace)
    #[arg(long, global = true, value_name = "LEVEL")]
    pub log: Option<String>,

    /// Specify alternate configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Send a message and stream the answer
    Chat {
        /// User sending the message
        #[arg(short, long)]
        user: String,

        /// Conversation to continue; a new one is created when omitted or unknown
        #[arg(short, long, value_name = "CHAT_ID")]
        chat: Option<String>,

        /// The message to send
        message: String,
    },

    /// Show a conversation's status and messages
    Show {
        /// Conversation ID
        chat_id: String,
    },

    /// End a conversation so it accepts no more messages
    End {
        /// Conversation ID
        chat_id: String,
    },
}
